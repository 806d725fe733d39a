//! Query executor backed by the blocking `postgres` client.
//!
//! Deadlines are enforced server-side: before each statement the session's
//! `statement_timeout` is set to the time remaining in the caller's context,
//! and a cancelled statement (SQLSTATE 57014) is reported as
//! [`QpmError::DeadlineExceeded`].

use postgres::error::SqlState;
use postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::debug;

use super::{Connector, QueryExecutor, Row};
use crate::catalog::queries;
use crate::context::Context;
use crate::error::{QpmError, format_postgres_error};

/// Seconds allowed for establishing a connection.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Opens connections using a libpq-style connection string.
///
/// Connection parameters come from the standard environment variables:
/// - PGHOST (default: localhost)
/// - PGPORT (default: 5432)
/// - PGUSER (default: $USER)
/// - PGPASSWORD (default: empty)
/// - PGDATABASE (default: same as PGUSER)
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    connection_string: String,
    default_database: String,
    host: String,
    port: String,
}

impl PostgresConnector {
    /// Creates a connector from environment variables.
    ///
    /// Uses $USER as default if PGUSER is not set.
    pub fn from_env() -> Result<Self, QpmError> {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| QpmError::EnvNotSet("PGUSER or USER".to_string()))?;

        let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        let database = std::env::var("PGDATABASE").unwrap_or_else(|_| user.clone());

        let connection_string = if password.is_empty() {
            format!(
                "host={} port={} user={} dbname={} connect_timeout={}",
                host, port, user, database, CONNECT_TIMEOUT_SECS
            )
        } else {
            format!(
                "host={} port={} user={} password={} dbname={} connect_timeout={}",
                host, port, user, password, database, CONNECT_TIMEOUT_SECS
            )
        };

        Ok(Self {
            connection_string,
            default_database: database,
            host,
            port,
        })
    }

    /// Creates a connector with an explicit connection string.
    pub fn with_connection_string(
        connection_string: String,
        default_database: String,
        host: String,
        port: String,
    ) -> Self {
        Self {
            connection_string,
            default_database,
            host,
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Lists connectable, non-template databases.
    pub fn list_databases(&self, ctx: &Context) -> Result<Vec<String>, QpmError> {
        let mut executor = self.connect(&self.default_database)?;
        let rows = executor.query(ctx, queries::DATABASES)?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get("datname").map(str::to_string))
            .collect())
    }
}

impl Connector for PostgresConnector {
    type Executor = PostgresExecutor;

    fn connect(&self, database: &str) -> Result<PostgresExecutor, QpmError> {
        let conn_str = replace_dbname(&self.connection_string, database);
        match Client::connect(&conn_str, NoTls) {
            Ok(client) => {
                debug!(database, "connection established");
                Ok(PostgresExecutor { client })
            }
            Err(e) => Err(QpmError::Connection(format_postgres_error(&e))),
        }
    }

    fn default_database(&self) -> &str {
        &self.default_database
    }
}

/// A single connection to one database.
pub struct PostgresExecutor {
    client: Client,
}

impl QueryExecutor for PostgresExecutor {
    fn query(&mut self, ctx: &Context, sql: &str) -> Result<Vec<Row>, QpmError> {
        ctx.check()?;
        let timeout_ms = ctx.remaining().as_millis().max(1);
        self.client
            .batch_execute(&format!("SET statement_timeout = {timeout_ms}"))
            .map_err(|e| classify(&e))?;

        let messages = self.client.simple_query(sql).map_err(|e| classify(&e))?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let columns = row
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect::<Vec<_>>();
                let values = (0..columns.len())
                    .map(|i| row.get(i).map(str::to_string))
                    .collect();
                rows.push(Row::new(columns, values));
            }
        }
        Ok(rows)
    }
}

fn classify(e: &postgres::Error) -> QpmError {
    if e.code() == Some(&SqlState::QUERY_CANCELED) {
        QpmError::DeadlineExceeded
    } else {
        QpmError::Query(format_postgres_error(e))
    }
}

/// Replaces the `dbname=xxx` parameter in a libpq-style connection string.
///
/// If the connection string contains `dbname=...`, it is replaced with the new database name.
/// If it does not contain `dbname=`, the parameter is appended.
pub fn replace_dbname(connection_string: &str, new_db: &str) -> String {
    let mut found = false;
    let parts: Vec<String> = connection_string
        .split_whitespace()
        .map(|token| {
            if token.starts_with("dbname=") {
                found = true;
                format!("dbname={}", new_db)
            } else {
                token.to_string()
            }
        })
        .collect();

    if found {
        parts.join(" ")
    } else {
        format!("{} dbname={}", connection_string, new_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_dbname_replaces_existing() {
        let conn = "host=localhost port=5432 user=app dbname=postgres connect_timeout=5";
        assert_eq!(
            replace_dbname(conn, "mydb"),
            "host=localhost port=5432 user=app dbname=mydb connect_timeout=5"
        );
    }

    #[test]
    fn replace_dbname_appends_when_missing() {
        let conn = "host=localhost port=5432 user=app";
        assert_eq!(
            replace_dbname(conn, "mydb"),
            "host=localhost port=5432 user=app dbname=mydb"
        );
    }

    #[test]
    fn connect_failure_is_reported_as_connection_error() {
        let connector = PostgresConnector::with_connection_string(
            "host=127.0.0.1 port=1 user=nobody connect_timeout=1".to_string(),
            "postgres".to_string(),
            "127.0.0.1".to_string(),
            "1".to_string(),
        );
        assert!(matches!(
            connector.connect("postgres"),
            Err(QpmError::Connection(_))
        ));
    }
}
