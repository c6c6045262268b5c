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

//! Uniform error type for the store.
//!
//! Grounded on the `failure`-crate "kind + Context" idiom (the pattern the
//! `failure` guide itself teaches, and the one this workspace's `db`/`base`
//! crates follow via `failure::Error` + `.context(...)`): a small
//! `Fail`-deriving enum distinguishes the handful of kinds a caller might
//! want to match on, and `Error` wraps a `failure::Context` over that enum
//! so the original cause is preserved in the `Display`/`Debug` chain while
//! `Error::kind()` gives callers a concrete match arm instead of an opaque
//! downcast.

use failure::{Backtrace, Context, Fail};
use std::fmt;

/// The five error kinds a caller might need to match on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Fail)]
pub enum StoreErrorKind {
    /// Bad configuration: unknown dialect, unknown spool strategy, missing
    /// or conflicting credentials. Always raised at construction time.
    #[fail(display = "configuration error")]
    Configuration,

    /// `selectMeta`/`selectData` found no row for the id the caller supplied.
    #[fail(display = "no such blob")]
    NotFound,

    /// Any transport-level (SQL or I/O) failure.
    #[fail(display = "sql or I/O error")]
    Sql,

    /// Two committed rows share an id but disagree on length: a fatal digest
    /// collision (or a corrupted table).
    #[fail(display = "digest collision")]
    DigestCollision,

    /// The configured digest algorithm is unavailable in this process.
    #[fail(display = "digest algorithm unavailable")]
    DigestUnavailable,
}

pub struct Error {
    inner: Context<StoreErrorKind>,
}

impl Error {
    /// The kind a caller can match on, regardless of what underlying cause
    /// (a `rusqlite::Error`, an `io::Error`, ...) produced this error.
    pub fn kind(&self) -> StoreErrorKind {
        *self.inner.get_context()
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> { self.inner.cause() }
    fn backtrace(&self) -> Option<&Backtrace> { self.inner.backtrace() }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl From<StoreErrorKind> for Error {
    fn from(kind: StoreErrorKind) -> Error {
        Error { inner: Context::new(kind) }
    }
}

impl From<Context<StoreErrorKind>> for Error {
    fn from(inner: Context<StoreErrorKind>) -> Error {
        Error { inner }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use failure::ResultExt;

    #[test]
    fn kind_survives_context_wrapping() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let result: std::result::Result<(), std::io::Error> = Err(io_err);
        let err: Error = result.context(StoreErrorKind::Sql).unwrap_err().into();
        assert_eq!(err.kind(), StoreErrorKind::Sql);
        assert!(!err.to_string().is_empty());
    }
}
