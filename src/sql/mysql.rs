use async_trait::async_trait;
use sqlx::{Executor, MySqlPool};

use super::{validate_identifier, Dsn, SqlEngine};
use crate::error::BrokerError;

/// MySQL (and MariaDB, which speaks the same wire protocol and DDL used
/// here) implementation of the SQL Engine Adapter. There is no per-instance
/// group role: permissions are granted per-user directly on the single
/// database.
pub struct MySqlEngine {
    admin_pool: MySqlPool,
}

impl MySqlEngine {
    pub async fn open(admin_uri: &str) -> Result<Self, BrokerError> {
        let admin_pool = MySqlPool::connect(admin_uri)
            .await
            .map_err(map_connect_err)?;
        Ok(Self { admin_pool })
    }

    pub async fn close(self) {
        self.admin_pool.close().await;
    }
}

#[async_trait]
impl SqlEngine for MySqlEngine {
    async fn create_database(&self, name: &str) -> Result<(), BrokerError> {
        validate_identifier(name)?;
        self.admin_pool
            .execute(format!("CREATE DATABASE IF NOT EXISTS `{name}`").as_str())
            .await
            .map(|_| ())
            .map_err(map_sql_err)
    }

    async fn drop_database(&self, name: &str) -> Result<(), BrokerError> {
        validate_identifier(name)?;
        self.admin_pool
            .execute(format!("DROP DATABASE IF EXISTS `{name}`").as_str())
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
        _granted_to: Option<&str>,
    ) -> Result<Dsn, BrokerError> {
        validate_identifier(username)?;
        validate_identifier(database)?;
        self.admin_pool
            .execute(
                format!("CREATE USER '{username}'@'%' IDENTIFIED BY '{password}'").as_str(),
            )
            .await
            .map_err(map_sql_err)?;
        self.admin_pool
            .execute(format!("GRANT ALL PRIVILEGES ON `{database}`.* TO '{username}'@'%'").as_str())
            .await
            .map_err(map_sql_err)?;
        self.admin_pool
            .execute("FLUSH PRIVILEGES")
            .await
            .map_err(map_sql_err)?;

        let uri = format!("mysql://{username}:{password}@{host}:{port}/{database}");
        let jdbc_uri = format!(
            "jdbc:mysql://{host}:{port}/{database}?user={username}&password={password}"
        );
        Ok(Dsn { uri, jdbc_uri })
    }

    async fn drop_user(&self, username: &str) -> Result<bool, BrokerError> {
        validate_identifier(username)?;
        let exists: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM mysql.user WHERE User = ?")
                .bind(username)
                .fetch_one(&self.admin_pool)
                .await
                .map_err(map_sql_err)?;
        if exists == 0 {
            return Ok(false);
        }
        self.admin_pool
            .execute(format!("DROP USER '{username}'@'%'").as_str())
            .await
            .map_err(map_sql_err)?;
        Ok(true)
    }

    async fn reset_user_password(&self, username: &str, password: &str) -> Result<(), BrokerError> {
        validate_identifier(username)?;
        self.admin_pool
            .execute(format!("ALTER USER '{username}'@'%' IDENTIFIED BY '{password}'").as_str())
            .await
            .map(|_| ())
            .map_err(map_sql_err)
    }

    async fn grant_privileges(&self, from_user: &str, to_user: &str) -> Result<(), BrokerError> {
        // MySQL has no inheritable group role equivalent at this scope;
        // direct per-user grants are already applied in `create_user`.
        let _ = (from_user, to_user);
        Ok(())
    }

    async fn ensure_extensions(
        &self,
        _database: &str,
        desired: &[String],
        _protected: &[String],
    ) -> Result<(), BrokerError> {
        if desired.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::ExtensionsUnsupported(desired.to_vec()))
        }
    }

    async fn correct_access_privileges(&self, _database: &str, _username: &str) -> Result<(), BrokerError> {
        // No per-instance group role to reassign ownership to; MySQL grants
        // are already per-user and survive a snapshot restore unchanged.
        Ok(())
    }

    fn max_identifier_len(&self) -> usize {
        32
    }
}

fn map_connect_err(err: sqlx::Error) -> BrokerError {
    BrokerError::ConnectionFailed(err.to_string())
}

fn map_sql_err(err: sqlx::Error) -> BrokerError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("1045") => {
            BrokerError::AuthenticationFailed(err.to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => BrokerError::ConnectionFailed(err.to_string()),
        _ => BrokerError::SqlFailed(err.to_string()),
    }
}
