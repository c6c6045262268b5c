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

//! Configuration: the store's only externally supplied construction input,
//! validated once up front rather than checked piecemeal at each call site.

use crate::error::{Result, StoreErrorKind};
use crate::spool::SpoolStrategy;
use crate::sql::Templates;
use failure::ResultExt;

/// Raw, unvalidated construction parameters. Every field here has a direct
/// counterpart in the configuration table below.
#[derive(Clone, Debug)]
pub struct Config {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub driver: Option<String>,
    pub database_type: Option<String>,
    pub data_source_name: Option<String>,
    pub min_record_length: u64,
    pub max_connections: u32,
    pub copy_when_reading: bool,
    pub table_prefix: String,
    pub schema_object_prefix: String,
    pub schema_check_enabled: bool,
    pub spool_strategy: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            url: None,
            user: None,
            password: None,
            driver: None,
            database_type: Some("sqlite".to_string()),
            data_source_name: None,
            min_record_length: 0,
            max_connections: 10,
            copy_when_reading: true,
            table_prefix: String::new(),
            schema_object_prefix: String::new(),
            schema_check_enabled: true,
            spool_strategy: "SPOOL".to_string(),
        }
    }
}

/// Validated, fully-resolved configuration: the table name and the ten SQL
/// templates are computed here, once, rather than re-derived per call.
pub(crate) struct Resolved {
    pub table: String,
    pub templates: Templates,
    pub min_record_length: u64,
    pub copy_when_reading: bool,
    pub schema_check_enabled: bool,
    pub spool_strategy: SpoolStrategy,
}

impl Config {
    /// Validates the raw config and resolves the table name, dialect, and
    /// spool strategy. This is the single place configuration errors
    /// ("unknown dialect", "unknown spool strategy", "missing or conflicting
    /// credentials") are raised.
    pub(crate) fn resolve(&self) -> Result<Resolved> {
        if self.data_source_name.is_some() && (self.url.is_some() || self.user.is_some()) {
            return Err(failure::format_err!(
                "dataSourceName is mutually exclusive with url/user")
                .context(StoreErrorKind::Configuration).into());
        }
        if self.data_source_name.is_none() && self.url.is_none() {
            return Err(failure::format_err!(
                "either dataSourceName or url must be set")
                .context(StoreErrorKind::Configuration).into());
        }

        let dialect = self.resolve_dialect()?;
        if dialect != "sqlite" && dialect != "generic" {
            return Err(failure::format_err!("unknown database dialect {:?}", dialect)
                .context(StoreErrorKind::Configuration).into());
        }

        let spool_strategy = SpoolStrategy::parse(&self.spool_strategy)?;

        let table = format!("{}{}DATASTORE", self.table_prefix, self.schema_object_prefix);
        let templates = Templates::resolve(&table);

        Ok(Resolved {
            table,
            templates,
            min_record_length: self.min_record_length,
            copy_when_reading: self.copy_when_reading,
            schema_check_enabled: self.schema_check_enabled,
            spool_strategy,
        })
    }

    /// An unresolvable dialect is always a configuration error, never a
    /// silent default: falling through unnoticed when `url` lacks a
    /// `jdbc:`-style prefix and `database_type` is unset would leave the
    /// store running against template set nobody chose.
    fn resolve_dialect(&self) -> Result<String> {
        if let Some(dt) = &self.database_type {
            return Ok(dt.clone());
        }
        if let Some(url) = &self.url {
            if let Some(rest) = url.strip_prefix("jdbc:") {
                if let Some(sub) = rest.split(':').next() {
                    if !sub.is_empty() {
                        return Ok(sub.to_string());
                    }
                }
            }
        }
        Err(failure::format_err!(
            "no databaseType set and no dialect derivable from url")
            .context(StoreErrorKind::Configuration).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_against_an_in_memory_url() {
        let cfg = Config { url: Some(":memory:".to_string()), ..Config::default() };
        let resolved = cfg.resolve().unwrap();
        assert_eq!(resolved.table, "DATASTORE");
        assert_eq!(resolved.min_record_length, 0);
    }

    #[test]
    fn table_prefix_and_schema_object_prefix_compose() {
        let cfg = Config {
            url: Some(":memory:".to_string()),
            table_prefix: "app_".to_string(),
            schema_object_prefix: "v2_".to_string(),
            ..Config::default()
        };
        assert_eq!(cfg.resolve().unwrap().table, "app_v2_DATASTORE");
    }

    #[test]
    fn rejects_unknown_dialect() {
        let cfg = Config {
            url: Some(":memory:".to_string()),
            database_type: Some("oracle".to_string()),
            ..Config::default()
        };
        assert!(cfg.resolve().is_err());
    }

    #[test]
    fn rejects_conflicting_data_source_name_and_url() {
        let cfg = Config {
            url: Some(":memory:".to_string()),
            data_source_name: Some("jdbc/Pool".to_string()),
            ..Config::default()
        };
        assert!(cfg.resolve().is_err());
    }

    #[test]
    fn rejects_missing_dialect_and_url() {
        let cfg = Config {
            url: None,
            database_type: None,
            data_source_name: Some("jdbc/Pool".to_string()),
            ..Config::default()
        };
        assert!(cfg.resolve().is_err());
    }

    #[test]
    fn derives_dialect_from_jdbc_url_when_database_type_unset() {
        let cfg = Config {
            url: Some("jdbc:sqlite:file.db".to_string()),
            database_type: None,
            ..Config::default()
        };
        assert!(cfg.resolve().is_ok());
    }
}
