use async_trait::async_trait;
use sqlx::{Executor, PgPool};
use tracing::{debug, info, warn};

use super::{validate_identifier, BindingCredentials, Dsn, SqlEngine, ALWAYS_PROTECTED_EXTENSIONS};
use crate::error::BrokerError;

/// PostgreSQL implementation of the SQL Engine Adapter. Maintains a
/// per-instance group role
/// so that objects created by one binding stay readable/writable by every
/// other current and future binding on the same instance.
///
/// `admin_pool` stays connected to the fixed maintenance database (always
/// `postgres`, per [`crate::broker::admin_uri`]) for cluster-wide operations
/// (`CREATE ROLE`, `CREATE DATABASE`, `GRANT ... ON DATABASE`). Anything that
/// is per-database in PostgreSQL — extensions, default privileges, object
/// ownership — has to run against a connection to the service database
/// itself, so those call sites open a short-lived pool via
/// `open_database_pool` instead.
pub struct PostgresEngine {
    admin_pool: PgPool,
    admin_uri: String,
}

impl PostgresEngine {
    pub async fn open(admin_uri: &str) -> Result<Self, BrokerError> {
        let admin_pool = PgPool::connect(admin_uri)
            .await
            .map_err(map_connect_err)?;
        Ok(Self {
            admin_pool,
            admin_uri: admin_uri.to_owned(),
        })
    }

    pub async fn close(self) {
        self.admin_pool.close().await;
    }

    fn group_role_for(database: &str) -> String {
        format!("{database}_group")
    }

    fn uri_for_database(&self, database: &str) -> String {
        match self.admin_uri.rsplit_once('/') {
            Some((prefix, _)) => format!("{prefix}/{database}"),
            None => self.admin_uri.clone(),
        }
    }

    async fn open_database_pool(&self, database: &str) -> Result<PgPool, BrokerError> {
        PgPool::connect(&self.uri_for_database(database))
            .await
            .map_err(map_connect_err)
    }

    async fn reconcile_extensions(
        &self,
        database_pool: &PgPool,
        database: &str,
        desired: &[String],
        protected: &[String],
    ) -> Result<(), BrokerError> {
        let present: Vec<String> = sqlx::query_scalar("SELECT extname FROM pg_catalog.pg_extension")
            .fetch_all(database_pool)
            .await
            .map_err(map_sql_err)?;

        for ext in desired.iter().filter(|e| !present.contains(e)) {
            info!(%ext, %database, "enabling extension");
            database_pool
                .execute(format!(r#"CREATE EXTENSION IF NOT EXISTS "{ext}""#).as_str())
                .await
                .map_err(map_sql_err)?;
        }
        for ext in present.iter().filter(|e| {
            !desired.contains(e) && !protected.contains(e) && !ALWAYS_PROTECTED_EXTENSIONS.contains(&e.as_str())
        }) {
            info!(%ext, %database, "disabling extension");
            database_pool
                .execute(format!(r#"DROP EXTENSION IF EXISTS "{ext}""#).as_str())
                .await
                .map_err(map_sql_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl SqlEngine for PostgresEngine {
    async fn create_database(&self, name: &str) -> Result<(), BrokerError> {
        validate_identifier(name)?;
        self.admin_pool
            .execute(format!(r#"CREATE DATABASE "{name}""#).as_str())
            .await
            .map(|_| ())
            .or_else(|err| {
                if is_duplicate(&err) {
                    debug!(%name, "database already exists, skipping create");
                    Ok(())
                } else {
                    Err(map_sql_err(err))
                }
            })
    }

    async fn drop_database(&self, name: &str) -> Result<(), BrokerError> {
        validate_identifier(name)?;
        self.admin_pool
            .execute(format!(r#"DROP DATABASE IF EXISTS "{name}""#).as_str())
            .await
            .map(|_| ())
            .map_err(map_sql_err)
    }

    async fn create_user(
        &self,
        username: &str,
        password: &str,
        database: &str,
        host: &str,
        port: u16,
        granted_to: Option<&str>,
    ) -> Result<Dsn, BrokerError> {
        validate_identifier(username)?;
        validate_identifier(database)?;
        let group_role = granted_to
            .map(str::to_owned)
            .unwrap_or_else(|| Self::group_role_for(database));
        validate_identifier(&group_role)?;

        self.admin_pool
            .execute(format!(r#"CREATE ROLE "{group_role}" NOLOGIN"#).as_str())
            .await
            .or_else(|err| if is_duplicate(&err) { Ok(Default::default()) } else { Err(err) })
            .map_err(map_sql_err)?;

        self.admin_pool
            .execute(
                format!(
                    r#"CREATE ROLE "{username}" LOGIN NOINHERIT PASSWORD '{password}' IN ROLE "{group_role}""#
                )
                .as_str(),
            )
            .await
            .map_err(map_sql_err)?;

        self.admin_pool
            .execute(
                format!(
                    r#"GRANT CREATE, CONNECT, TEMPORARY ON DATABASE "{database}" TO "{group_role}""#
                )
                .as_str(),
            )
            .await
            .map_err(map_sql_err)?;

        // `FOR ROLE` only governs objects later created *by* the named role,
        // so this has to name the new binding user, not the (NOLOGIN,
        // never-creates-anything) group role — and default privileges are
        // per-database, so it has to run against `database` itself, not
        // whatever database `admin_pool` happens to be connected to.
        let database_pool = self.open_database_pool(database).await?;
        let result = database_pool
            .execute(
                format!(
                    r#"ALTER DEFAULT PRIVILEGES FOR ROLE "{username}" IN SCHEMA public GRANT ALL ON TABLES TO "{group_role}""#
                )
                .as_str(),
            )
            .await
            .map(|_| ())
            .map_err(map_sql_err);
        database_pool.close().await;
        result?;

        let dsn = build_dsn("postgres", username, password, host, port, database);
        Ok(dsn)
    }

    async fn drop_user(&self, username: &str) -> Result<bool, BrokerError> {
        validate_identifier(username)?;
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)",
        )
        .bind(username)
        .fetch_one(&self.admin_pool)
        .await
        .map_err(map_sql_err)?;
        if !exists {
            return Ok(false);
        }
        self.admin_pool
            .execute(format!(r#"DROP ROLE "{username}""#).as_str())
            .await
            .map_err(map_sql_err)?;
        Ok(true)
    }

    async fn reset_user_password(&self, username: &str, password: &str) -> Result<(), BrokerError> {
        validate_identifier(username)?;
        self.admin_pool
            .execute(format!(r#"ALTER ROLE "{username}" WITH PASSWORD '{password}'"#).as_str())
            .await
            .map(|_| ())
            .map_err(map_sql_err)
    }

    async fn grant_privileges(&self, from_user: &str, to_user: &str) -> Result<(), BrokerError> {
        validate_identifier(from_user)?;
        validate_identifier(to_user)?;
        self.admin_pool
            .execute(format!(r#"GRANT "{from_user}" TO "{to_user}""#).as_str())
            .await
            .map(|_| ())
            .map_err(map_sql_err)
    }

    async fn ensure_extensions(
        &self,
        database: &str,
        desired: &[String],
        protected: &[String],
    ) -> Result<(), BrokerError> {
        validate_identifier(database)?;
        for ext in desired {
            validate_identifier(ext)?;
        }
        // `CREATE`/`DROP EXTENSION` and `pg_catalog.pg_extension` are
        // per-database, so this has to run against `database` itself rather
        // than whatever database `admin_pool` is connected to.
        let database_pool = self.open_database_pool(database).await?;
        let result = self.reconcile_extensions(&database_pool, database, desired, protected).await;
        database_pool.close().await;
        result
    }

    async fn correct_access_privileges(&self, database: &str, username: &str) -> Result<(), BrokerError> {
        validate_identifier(database)?;
        validate_identifier(username)?;
        let group_role = Self::group_role_for(database);
        validate_identifier(&group_role)?;
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)",
        )
        .bind(username)
        .fetch_one(&self.admin_pool)
        .await
        .map_err(map_sql_err)?;
        if !exists {
            return Ok(());
        }
        warn!(%database, %username, "reassigning ownership to the instance group role before dropping the binding user");
        let database_pool = self.open_database_pool(database).await?;
        let result = database_pool
            .execute(format!(r#"REASSIGN OWNED BY "{username}" TO "{group_role}""#).as_str())
            .await
            .map(|_| ())
            .map_err(map_sql_err);
        database_pool.close().await;
        result
    }

    fn max_identifier_len(&self) -> usize {
        63
    }
}

pub fn build_dsn(
    scheme: &str,
    username: &str,
    password: &str,
    host: &str,
    port: u16,
    database: &str,
) -> Dsn {
    let uri = format!("{scheme}://{username}:{password}@{host}:{port}/{database}");
    let jdbc_uri = format!(
        "jdbc:postgresql://{host}:{port}/{database}?user={username}&password={password}"
    );
    Dsn { uri, jdbc_uri }
}

pub fn build_binding_credentials(username: String, password: String) -> BindingCredentials {
    BindingCredentials { username, password }
}

fn is_duplicate(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("42710") || db.code().as_deref() == Some("42P04"))
}

fn map_connect_err(err: sqlx::Error) -> BrokerError {
    BrokerError::ConnectionFailed(err.to_string())
}

fn map_sql_err(err: sqlx::Error) -> BrokerError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("28P01") => {
            BrokerError::AuthenticationFailed(err.to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => BrokerError::ConnectionFailed(err.to_string()),
        _ => BrokerError::SqlFailed(err.to_string()),
    }
}
