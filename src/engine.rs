use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BrokerError;

/// A supported database engine. MariaDB reuses the MySQL SQL dialect and
/// wire protocol end to end; it only differs at the cloud-provider engine
/// identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgres,
    MySql,
    MariaDb,
}

impl Engine {
    /// The cloud provider's `Engine` field value for `CreateDBInstance`.
    pub fn rds_engine_name(self) -> &'static str {
        match self {
            Engine::Postgres => "postgres",
            Engine::MySql => "mysql",
            Engine::MariaDb => "mariadb",
        }
    }

    /// The parameter-group "family" prefix, e.g. `postgres` + `13` -> `postgres13`.
    pub fn family(self, major_version: &str) -> String {
        let name = match self {
            Engine::Postgres => "postgres",
            Engine::MySql => "mysql",
            Engine::MariaDb => "mariadb",
        };
        format!("{name}{major_version}")
    }

    /// Maximum identifier length the engine's SQL dialect permits for a
    /// role/user name (PostgreSQL: NAMEDATALEN-1; MySQL/MariaDB: 32).
    pub fn max_identifier_len(self) -> usize {
        match self {
            Engine::Postgres => 63,
            Engine::MySql | Engine::MariaDb => 32,
        }
    }

    pub fn dsn_scheme(self) -> &'static str {
        match self {
            Engine::Postgres => "postgres",
            Engine::MySql | Engine::MariaDb => "mysql",
        }
    }

    pub fn supports_extensions(self) -> bool {
        matches!(self, Engine::Postgres)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Engine::Postgres => "postgres",
            Engine::MySql => "mysql",
            Engine::MariaDb => "mariadb",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Engine {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" | "postgresql" => Ok(Engine::Postgres),
            "mysql" => Ok(Engine::MySql),
            "mariadb" => Ok(Engine::MariaDb),
            other => Err(BrokerError::ValidationError(format!(
                "unknown engine {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        for engine in [Engine::Postgres, Engine::MySql, Engine::MariaDb] {
            let s = engine.to_string();
            assert_eq!(Engine::from_str(&s).unwrap(), engine);
        }
    }

    #[test]
    fn mariadb_shares_the_mysql_dialect() {
        assert_eq!(Engine::MariaDb.dsn_scheme(), Engine::MySql.dsn_scheme());
        assert_eq!(
            Engine::MariaDb.max_identifier_len(),
            Engine::MySql.max_identifier_len()
        );
    }

    #[test]
    fn only_postgres_supports_extensions() {
        assert!(Engine::Postgres.supports_extensions());
        assert!(!Engine::MySql.supports_extensions());
        assert!(!Engine::MariaDb.supports_extensions());
    }
}
