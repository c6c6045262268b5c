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

//! Liveness registry: tracks which ids are referenced by a live
//! `DataRecord` somewhere in the process, so GC never deletes a blob a
//! caller currently holds, plus the parallel set of temp ids currently
//! mid-ingest.
//!
//! This is a weak-keyed liveness map: Rust has no arbitrary weak-keyed map
//! in the standard library, so the effect is built from `Arc`/`Weak`
//! directly. `uses()` returns a `DataIdentifier` sharing the one canonical
//! `Arc` for that digest; as long as any clone of it (including the one
//! embedded in a `DataRecord`) is alive, `Weak::upgrade` succeeds and the id
//! counts as in use. Entries for digests with no more live holders are
//! reaped lazily, on the next `uses()` or `snapshot_committed()` call rather
//! than eagerly.

use crate::record::{DataIdentifier, DIGEST_LEN};
use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

pub(crate) struct Liveness {
    committed: Mutex<FnvHashMap<[u8; DIGEST_LEN], Weak<[u8; DIGEST_LEN]>>>,
    temp: Mutex<FnvHashSet<String>>,
}

impl Liveness {
    pub fn new() -> Self {
        Liveness {
            committed: Mutex::new(FnvHashMap::default()),
            temp: Mutex::new(FnvHashSet::default()),
        }
    }

    /// Returns the canonical `DataIdentifier` for `digest`, registering it as
    /// in use for as long as the returned value (or any clone of it) lives.
    pub fn uses(&self, digest: [u8; DIGEST_LEN]) -> DataIdentifier {
        let mut m = self.committed.lock();
        if let Some(existing) = m.get(&digest) {
            if let Some(arc) = existing.upgrade() {
                return DataIdentifier(arc);
            }
        }
        let id = DataIdentifier::from_digest(digest);
        m.insert(digest, Arc::downgrade(&id.0));
        id
    }

    /// All ids currently referenced by a live handle. Reaps dead entries as
    /// a side effect of the scan.
    pub fn snapshot_committed(&self) -> Vec<DataIdentifier> {
        let mut m = self.committed.lock();
        let mut out = Vec::with_capacity(m.len());
        m.retain(|_, w| match w.upgrade() {
            Some(arc) => { out.push(DataIdentifier(arc)); true }
            None => false,
        });
        out
    }

    pub fn temp_insert(&self, id: String) {
        self.temp.lock().insert(id);
    }

    pub fn temp_remove(&self, id: &str) {
        self.temp.lock().remove(id);
    }

    pub fn temp_snapshot(&self) -> Vec<String> {
        self.temp.lock().iter().cloned().collect()
    }

    /// Drops all bookkeeping, used by tests and by `Store::clear_in_use` to
    /// simulate a restart's cold liveness state without dropping every
    /// outstanding `DataRecord` first.
    pub fn clear(&self) {
        self.committed.lock().clear();
        self.temp.lock().clear();
    }

    /// `(committed, temp)` set sizes, for callers that want a cheap
    /// point-in-time view of liveness bookkeeping without a full snapshot.
    pub fn counts(&self) -> (usize, usize) {
        (self.committed.lock().len(), self.temp.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(b: u8) -> [u8; DIGEST_LEN] { [b; DIGEST_LEN] }

    #[test]
    fn live_handle_keeps_id_in_the_committed_snapshot() {
        let liveness = Liveness::new();
        let id = liveness.uses(digest(1));
        assert_eq!(liveness.snapshot_committed().len(), 1);
        drop(id);
        assert_eq!(liveness.snapshot_committed().len(), 0);
    }

    #[test]
    fn repeated_uses_share_the_same_arc() {
        let liveness = Liveness::new();
        let a = liveness.uses(digest(2));
        let b = liveness.uses(digest(2));
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn temp_ids_are_tracked_independently_of_committed_ids() {
        let liveness = Liveness::new();
        liveness.temp_insert("TEMP_abc".to_string());
        assert_eq!(liveness.counts(), (0, 1));
        liveness.temp_remove("TEMP_abc");
        assert_eq!(liveness.counts(), (0, 0));
    }

    #[test]
    fn clear_drops_committed_and_temp_bookkeeping() {
        let liveness = Liveness::new();
        let _id = liveness.uses(digest(3));
        liveness.temp_insert("TEMP_x".to_string());
        liveness.clear();
        assert_eq!(liveness.counts(), (0, 0));
    }
}
