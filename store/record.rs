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

//! In-memory entities: `DataIdentifier` and `DataRecord`.

use crate::store::Inner;
use std::fmt;
use std::sync::Arc;

/// Length in bytes of the fixed content digest: a 160-bit hash.
pub const DIGEST_LEN: usize = 20;

/// Immutable wrapper around a digest's raw bytes; its string form (lowercase
/// hex) is the committed row's `ID`.
///
/// Identical digests returned from `Liveness::uses` share the same
/// underlying `Arc`, which is exactly what lets the liveness registry track
/// "does any live handle still reference this id" via `Arc` refcounting
/// instead of a real weak-keyed hash map (see liveness.rs).
#[derive(Clone)]
pub struct DataIdentifier(pub(crate) Arc<[u8; DIGEST_LEN]>);

impl DataIdentifier {
    pub(crate) fn from_digest(digest: [u8; DIGEST_LEN]) -> Self {
        DataIdentifier(Arc::new(digest))
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] { &self.0 }

    /// Lowercase hex encoding of the digest; the committed row's primary key.
    pub fn as_hex(&self) -> String { encode_hex(&self.0[..]) }
}

impl fmt::Display for DataIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl fmt::Debug for DataIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DataIdentifier({})", self.as_hex())
    }
}

impl PartialEq for DataIdentifier {
    fn eq(&self, other: &Self) -> bool { *self.0 == *other.0 }
}
impl Eq for DataIdentifier {}

/// A handle bundling `identifier`, `length`, `last_modified`, and a
/// back-reference to the store for stream access. Owned by the caller; its
/// mere existence is what the liveness registry observes, via the
/// `DataIdentifier`'s `Arc` refcount.
#[derive(Clone)]
pub struct DataRecord {
    identifier: DataIdentifier,
    length: u64,
    last_modified: i64,
    store: Arc<Inner>,
}

impl DataRecord {
    pub(crate) fn new(identifier: DataIdentifier, length: u64, last_modified: i64,
                       store: Arc<Inner>) -> Self {
        DataRecord { identifier, length, last_modified, store }
    }

    pub fn identifier(&self) -> &DataIdentifier { &self.identifier }
    pub fn length(&self) -> u64 { self.length }
    pub fn last_modified(&self) -> i64 { self.last_modified }

    /// Opens a streaming reader over this blob's bytes.
    pub fn open_stream(&self) -> crate::error::Result<Box<dyn std::io::Read + Send>> {
        self.store.open_stream(&self.identifier)
    }
}

impl fmt::Debug for DataRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DataRecord")
            .field("identifier", &self.identifier)
            .field("length", &self.length)
            .field("last_modified", &self.last_modified)
            .finish()
    }
}

/// Prefix marking a reserved, not-yet-committed row.
pub const TEMP_PREFIX: &str = "TEMP_";

pub fn encode_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Parses a lowercase hex digest via a direct nibble loop, rather than
/// pulling in a hex crate for a handful of lines.
pub fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 2);
    let mut i = 0;
    while i < bytes.len() {
        let hi = nibble(bytes[i])?;
        let lo = nibble(bytes[i + 1])?;
        out.push((hi << 4) | lo);
        i += 2;
    }
    Some(out)
}

fn nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let digest = [0xaa, 0xf4, 0xc6, 0x1d, 0xdc, 0xc5, 0xe8, 0xa2, 0xda, 0xbe,
                      0xde, 0x0f, 0x3b, 0x48, 0x2c, 0xd9, 0xae, 0xa9, 0x43, 0x4d];
        let id = DataIdentifier::from_digest(digest);
        assert_eq!(id.as_hex(), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
        assert_eq!(decode_hex(&id.as_hex()).unwrap(), digest.to_vec());
    }

    #[test]
    fn decode_hex_rejects_garbage() {
        assert!(decode_hex("xy").is_none());
        assert!(decode_hex("abc").is_none());
    }
}
