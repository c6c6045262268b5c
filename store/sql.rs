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

//! SQL gateway: the ten statement templates the store issues against its
//! backing table, resolved once against a table name (baking the schema
//! constants into plain `String`s at the top of the module, the same way
//! this workspace's `db` crate bakes its own schema constants into `const`
//! SQL strings) and executed here via `rusqlite::Connection::prepare_cached`
//! plus positional parameters.

use crate::error::{Result, StoreErrorKind};
use failure::ResultExt;
use rusqlite::{params, Connection, OptionalExtension};

/// The ten resolved templates. `{table}` placeholders are substituted once
/// in `resolve`.
pub(crate) struct Templates {
    pub create_table: String,
    pub insert_temp: String,
    pub update_data: String,
    pub update_rename: String,
    pub delete: String,
    pub delete_older: String,
    pub update_last_modified: String,
    pub select_meta: String,
    pub select_all: String,
    pub select_data: String,
}

impl Templates {
    pub fn resolve(table: &str) -> Self {
        Templates {
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 ID VARCHAR(255) PRIMARY KEY, LENGTH BIGINT, LAST_MODIFIED BIGINT, DATA BLOB)",
                table = table),
            insert_temp: format!(
                "INSERT INTO {table} (ID, LENGTH, LAST_MODIFIED, DATA) VALUES (?, 0, ?, NULL)",
                table = table),
            update_data: format!("UPDATE {table} SET DATA=? WHERE ID=?", table = table),
            update_rename: format!(
                "UPDATE {table} SET ID=?, LENGTH=?, LAST_MODIFIED=? \
                 WHERE ID=? AND NOT EXISTS (SELECT ID FROM {table} WHERE ID=?)",
                table = table),
            delete: format!("DELETE FROM {table} WHERE ID=?", table = table),
            delete_older: format!("DELETE FROM {table} WHERE LAST_MODIFIED < ?", table = table),
            update_last_modified: format!(
                "UPDATE {table} SET LAST_MODIFIED=? WHERE ID=? AND LAST_MODIFIED < ?",
                table = table),
            select_meta: format!(
                "SELECT LENGTH, LAST_MODIFIED FROM {table} WHERE ID=?", table = table),
            select_all: format!("SELECT ID FROM {table}", table = table),
            select_data: format!("SELECT DATA FROM {table} WHERE ID=?", table = table),
        }
    }
}

pub(crate) fn create_table(conn: &Connection, t: &Templates) -> Result<()> {
    conn.execute(&t.create_table, params![]).context(StoreErrorKind::Sql)?;
    Ok(())
}

pub(crate) fn insert_temp(conn: &Connection, t: &Templates, id: &str, now: i64) -> Result<()> {
    conn.prepare_cached(&t.insert_temp).context(StoreErrorKind::Sql)?
        .execute(params![id, now]).context(StoreErrorKind::Sql)?;
    Ok(())
}

pub(crate) fn update_data(conn: &Connection, t: &Templates, id: &str, bytes: &[u8]) -> Result<()> {
    conn.prepare_cached(&t.update_data).context(StoreErrorKind::Sql)?
        .execute(params![bytes, id]).context(StoreErrorKind::Sql)?;
    Ok(())
}

/// The atomic rename at the heart of `put`'s commit step. Returns the
/// affected row count: 1 on a winning rename, 0 when a row with `new_id`
/// already exists (the duplicate branch).
pub(crate) fn update_rename(
    conn: &Connection, t: &Templates, new_id: &str, length: u64, now: i64, temp_id: &str,
) -> Result<usize> {
    let n = conn.prepare_cached(&t.update_rename).context(StoreErrorKind::Sql)?
        .execute(params![new_id, length as i64, now, temp_id, new_id])
        .context(StoreErrorKind::Sql)?;
    Ok(n)
}

pub(crate) fn delete(conn: &Connection, t: &Templates, id: &str) -> Result<usize> {
    let n = conn.prepare_cached(&t.delete).context(StoreErrorKind::Sql)?
        .execute(params![id]).context(StoreErrorKind::Sql)?;
    Ok(n)
}

pub(crate) fn delete_older(conn: &Connection, t: &Templates, threshold: i64) -> Result<usize> {
    let n = conn.prepare_cached(&t.delete_older).context(StoreErrorKind::Sql)?
        .execute(params![threshold]).context(StoreErrorKind::Sql)?;
    Ok(n)
}

pub(crate) fn update_last_modified(
    conn: &Connection, t: &Templates, now: i64, id: &str, older_than: i64,
) -> Result<usize> {
    let n = conn.prepare_cached(&t.update_last_modified).context(StoreErrorKind::Sql)?
        .execute(params![now, id, older_than]).context(StoreErrorKind::Sql)?;
    Ok(n)
}

/// `(length, last_modified)` for `id`, or `None` if no such row.
pub(crate) fn select_meta(conn: &Connection, t: &Templates, id: &str) -> Result<Option<(u64, i64)>> {
    conn.prepare_cached(&t.select_meta).context(StoreErrorKind::Sql)?
        .query_row(params![id], |row| {
            let length: i64 = row.get(0)?;
            let last_modified: i64 = row.get(1)?;
            Ok((length as u64, last_modified))
        })
        .optional()
        .context(StoreErrorKind::Sql)
        .map_err(Into::into)
}

pub(crate) fn select_all_ids(conn: &Connection, t: &Templates) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(&t.select_all).context(StoreErrorKind::Sql)?;
    let rows = stmt.query_map(params![], |row| row.get::<_, String>(0)).context(StoreErrorKind::Sql)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r.context(StoreErrorKind::Sql)?);
    }
    Ok(out)
}

/// `DATA` column bytes for `id`: `Some(None)` for a reserved-but-unwritten
/// row (`DATA IS NULL`), `Some(Some(bytes))` for a written row, `None` if no
/// row exists at all.
pub(crate) fn select_data(conn: &Connection, t: &Templates, id: &str) -> Result<Option<Option<Vec<u8>>>> {
    conn.prepare_cached(&t.select_data).context(StoreErrorKind::Sql)?
        .query_row(params![id], |row| row.get::<_, Option<Vec<u8>>>(0))
        .optional()
        .context(StoreErrorKind::Sql)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Connection, Templates) {
        let conn = Connection::open_in_memory().unwrap();
        let t = Templates::resolve("DATASTORE");
        create_table(&conn, &t).unwrap();
        (conn, t)
    }

    #[test]
    fn insert_then_select_meta_round_trips() {
        let (conn, t) = setup();
        insert_temp(&conn, &t, "TEMP_abc", 1000).unwrap();
        let meta = select_meta(&conn, &t, "TEMP_abc").unwrap().unwrap();
        assert_eq!(meta, (0, 1000));
        assert!(select_meta(&conn, &t, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn update_rename_reports_zero_on_existing_target() {
        let (conn, t) = setup();
        insert_temp(&conn, &t, "TEMP_a", 1).unwrap();
        insert_temp(&conn, &t, "TEMP_b", 1).unwrap();
        assert_eq!(update_rename(&conn, &t, "digest1", 5, 2, "TEMP_a").unwrap(), 1);
        assert_eq!(update_rename(&conn, &t, "digest1", 5, 3, "TEMP_b").unwrap(), 0);
    }

    #[test]
    fn select_data_distinguishes_missing_row_from_null_data() {
        let (conn, t) = setup();
        insert_temp(&conn, &t, "TEMP_a", 1).unwrap();
        assert_eq!(select_data(&conn, &t, "TEMP_a").unwrap(), Some(None));
        update_data(&conn, &t, "TEMP_a", b"hi").unwrap();
        assert_eq!(select_data(&conn, &t, "TEMP_a").unwrap(), Some(Some(b"hi".to_vec())));
        assert_eq!(select_data(&conn, &t, "missing").unwrap(), None);
    }

    #[test]
    fn select_all_ids_lists_every_row() {
        let (conn, t) = setup();
        insert_temp(&conn, &t, "a", 1).unwrap();
        insert_temp(&conn, &t, "b", 1).unwrap();
        let mut ids = select_all_ids(&conn, &t).unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn delete_older_removes_only_stale_rows() {
        let (conn, t) = setup();
        insert_temp(&conn, &t, "old", 10).unwrap();
        insert_temp(&conn, &t, "new", 1000).unwrap();
        let n = delete_older(&conn, &t, 500).unwrap();
        assert_eq!(n, 1);
        assert!(select_meta(&conn, &t, "old").unwrap().is_none());
        assert!(select_meta(&conn, &t, "new").unwrap().is_some());
    }
}
