// This file is part of datastore, a content-addressed blob store.
// Copyright (C) 2021 The datastore Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// In addition, as a special exception, the copyright holders give
// permission to link the code of portions of this program with the
// OpenSSL library under certain conditions as described in each
// individual source file, and distribute linked combinations including
// the two.
//
// You must obey the GNU General Public License in all respects for all
// of the code used other than OpenSSL. If you modify file(s) with this
// exception, you may extend this exception to your version of the
// file(s), but you are not obligated to do so. If you do not wish to do
// so, delete this exception statement from your version. If you delete
// this exception statement from all source files in the program, then
// also delete it here.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Digest engine: computes the 160-bit content hash of a stream as it's
//! read, without buffering it, via `openssl::hash::Hasher`.

use crate::error::{Result, StoreErrorKind};
use crate::record::{DataIdentifier, DIGEST_LEN};
use failure::ResultExt;
use openssl::hash::{Hasher, MessageDigest};

/// Incremental SHA-1 state plus a running byte count, with no opinion on
/// where the bytes come from. `put`'s spool step feeds each chunk straight
/// through this as it's teed off the source stream.
pub(crate) struct Digest {
    hasher: Hasher,
    len: u64,
}

impl Digest {
    pub fn new() -> Result<Self> {
        let hasher = Hasher::new(MessageDigest::sha1())
            .context(StoreErrorKind::DigestUnavailable)?;
        Ok(Digest { hasher, len: 0 })
    }

    /// Bytes observed so far; the authoritative `LENGTH` once the source is
    /// fully consumed.
    pub fn len(&self) -> u64 { self.len }

    pub fn update(&mut self, chunk: &[u8]) -> Result<()> {
        self.hasher.update(chunk).context(StoreErrorKind::DigestUnavailable)?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    /// Consumes the engine, finalizing the digest. Callers must have already
    /// driven the source to EOF through `update`.
    pub fn finish(mut self) -> Result<DataIdentifier> {
        let digest = self.hasher.finish().context(StoreErrorKind::DigestUnavailable)?;
        if digest.len() != DIGEST_LEN {
            return Err(failure::format_err!(
                "digest produced {} bytes, expected {}", digest.len(), DIGEST_LEN)
                .context(StoreErrorKind::DigestUnavailable).into());
        }
        let mut buf = [0u8; DIGEST_LEN];
        buf.copy_from_slice(&digest);
        Ok(DataIdentifier::from_digest(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_hello_to_known_sha1() {
        let mut digest = Digest::new().unwrap();
        digest.update(b"hello").unwrap();
        let id = digest.finish().unwrap();
        assert_eq!(id.as_hex(), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn empty_stream_has_the_empty_sha1() {
        let digest = Digest::new().unwrap();
        let id = digest.finish().unwrap();
        assert_eq!(id.as_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn update_tracks_length_alongside_the_hash() {
        let mut digest = Digest::new().unwrap();
        digest.update(b"hel").unwrap();
        digest.update(b"lo").unwrap();
        assert_eq!(digest.len(), 5);
        assert_eq!(digest.finish().unwrap().as_hex(), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }
}
