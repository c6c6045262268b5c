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

//! Test-only helpers: an in-memory store wired to a `SimulatedClocks`,
//! mirroring this workspace's `db::testutil::TestDb::new`.

use crate::config::Config;
use crate::store::Store;
use base::clock::SimulatedClocks;
use std::sync::Arc;
use time::Timespec;

/// A ready-to-use store over an in-memory database plus the simulated
/// clock driving it, so GC-window and touch-on-access tests can advance
/// time deterministically without sleeping.
pub struct TestStore {
    pub store: Store,
    pub clocks: SimulatedClocks,
}

impl TestStore {
    pub fn new() -> Self {
        Self::with_config(Config { url: Some(":memory:".to_string()), ..Config::default() })
    }

    pub fn with_config(config: Config) -> Self {
        let clocks = SimulatedClocks::new(Timespec::new(1_500_000_000, 0));
        let store = Store::open_with_clocks(&config, Arc::new(clocks.clone()))
            .expect("test store configuration should always resolve");
        TestStore { store, clocks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn test_store_is_immediately_usable() {
        let t = TestStore::new();
        let record = t.store.put(Cursor::new(b"hi".to_vec())).unwrap();
        let mut buf = Vec::new();
        record.open_stream().unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hi");
    }
}
