//! SQL Engine Adapter. Polymorphic over the capability set of the backing
//! engine; `PostgresEngine` and `MySqlEngine` each wrap a
//! `sqlx` connection pool. Generalizes the identifier-safety check
//! `coredb-operator/src/extensions.rs` applies only to extension names to
//! every identifier this adapter interpolates into SQL text, since binding
//! and provision parameters here can originate from a less-trusted platform
//! caller than a CRD author.

mod mysql;
mod postgres;

pub use mysql::MySqlEngine;
pub use postgres::PostgresEngine;

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::BrokerError;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap())
}

/// Rejects anything that isn't a safe bare SQL identifier. Every call site
/// that interpolates a username, database name, schema name, or extension
/// name into a SQL string must pass it through this first.
pub fn validate_identifier(value: &str) -> Result<(), BrokerError> {
    if identifier_pattern().is_match(value) {
        Ok(())
    } else {
        Err(BrokerError::SqlFailed(format!(
            "{value:?} is not a valid SQL identifier"
        )))
    }
}

/// Extensions bundled into every database by the engine itself. A reconciled
/// `desired` extension set must never cause one of these to be dropped, even
/// when a caller's `protected` list doesn't happen to mention it.
pub const ALWAYS_PROTECTED_EXTENSIONS: &[&str] = &["plpgsql"];

#[derive(Clone, Debug)]
pub struct BindingCredentials {
    pub username: String,
    pub password: String,
}

/// Result of `createUser`: a DSN usable by the bound application, built as
/// `<scheme>://<username>:<password>@<host>:<port>/<dbname>`.
#[derive(Clone, Debug)]
pub struct Dsn {
    pub uri: String,
    pub jdbc_uri: String,
}

#[async_trait]
pub trait SqlEngine: Send + Sync {
    async fn create_database(&self, name: &str) -> Result<(), BrokerError>;
    async fn drop_database(&self, name: &str) -> Result<(), BrokerError>;

    /// Creates a binding user and returns the DSN the platform should hand
    /// to the bound application. `granted_to` is the per-instance group
    /// role the new user should inherit from, when the engine has one.
    async fn create_user(
        &self,
        username: &str,
        password: &str,
        database: &str,
        host: &str,
        port: u16,
        granted_to: Option<&str>,
    ) -> Result<Dsn, BrokerError>;

    /// `true` if the user existed and was dropped, `false` if it was
    /// already absent (absence is not an error — `Unbind` must be safe to
    /// call twice).
    async fn drop_user(&self, username: &str) -> Result<bool, BrokerError>;

    async fn reset_user_password(&self, username: &str, password: &str) -> Result<(), BrokerError>;

    async fn grant_privileges(&self, from_user: &str, to_user: &str) -> Result<(), BrokerError>;

    /// Reconciles the live extension set against `desired`, honoring the
    /// plan's `allowed`/`protected` extension lists. No-op (never an error)
    /// on engines without extension support when `desired` is empty.
    async fn ensure_extensions(
        &self,
        database: &str,
        desired: &[String],
        protected: &[String],
    ) -> Result<(), BrokerError>;

    /// Reassigns ownership of every object `username` owns in `database` to
    /// the instance's group role, so `username` can be dropped afterward
    /// without a dependency error.
    async fn correct_access_privileges(&self, database: &str, username: &str) -> Result<(), BrokerError>;

    fn max_identifier_len(&self) -> usize;
}

/// Production [`crate::broker::SqlEngineFactory`]: opens a fresh connection
/// pool per call, dispatching on [`crate::engine::Engine`] the same way
/// [`crate::broker::admin_uri`] picks the admin database name. No pooling
/// across requests, per the broker's "SQL admin connection is created per
/// request and closed on exit" resource policy.
#[derive(Default)]
pub struct DefaultSqlEngineFactory;

#[async_trait]
impl crate::broker::SqlEngineFactory for DefaultSqlEngineFactory {
    async fn open(
        &self,
        engine: crate::engine::Engine,
        admin_uri: &str,
    ) -> Result<Box<dyn SqlEngine>, BrokerError> {
        match engine {
            crate::engine::Engine::Postgres => {
                Ok(Box::new(PostgresEngine::open(admin_uri).await?))
            }
            crate::engine::Engine::MySql | crate::engine::Engine::MariaDb => {
                Ok(Box::new(MySqlEngine::open(admin_uri).await?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_identifier("binding_user_1").is_ok());
        assert!(validate_identifier("u1234567890abcdef").is_ok());
    }

    #[test]
    fn rejects_identifiers_with_sql_metacharacters() {
        assert!(validate_identifier("robert'; drop table users;--").is_err());
        assert!(validate_identifier("user name").is_err());
        assert!(validate_identifier("1leading-digit").is_err());
        assert!(validate_identifier("").is_err());
    }
}
