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

//! Content-addressed blob store over a relational table: a two-phase
//! ingest protocol (reserve → stream+digest → atomic rename) plus an
//! in-use-aware garbage collector, built in the idiom of the `db` crate
//! this workspace's `base` crate was split from.

mod config;
mod digest;
mod error;
mod liveness;
mod record;
mod sql;
mod spool;
mod store;
pub mod testutil;

pub use config::Config;
pub use error::{Error, Result, StoreErrorKind};
pub use record::{DataIdentifier, DataRecord};
pub use spool::SpoolStrategy;
pub use store::Store;
