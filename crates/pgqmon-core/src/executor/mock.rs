//! Scripted in-memory executor for testing the pipeline without a server.
//!
//! Responses are matched by SQL substring, optionally restricted to one
//! database. Unmatched statements return no rows. Every executed statement is
//! recorded so tests can assert on what reached the "server".

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use super::{Connector, QueryExecutor, Row};
use crate::context::Context;
use crate::error::QpmError;

#[derive(Debug, Clone)]
enum Response {
    Rows(Vec<Row>),
    Fail(QpmError),
}

#[derive(Debug, Clone)]
struct Rule {
    database: Option<String>,
    pattern: String,
    response: Response,
}

#[derive(Debug, Default)]
struct Script {
    rules: Vec<Rule>,
    executed: Vec<(String, String)>,
}

impl Script {
    fn answer(&mut self, database: &str, sql: &str) -> Result<Vec<Row>, QpmError> {
        self.executed.push((database.to_string(), sql.to_string()));
        let rule = self.rules.iter().find(|r| {
            sql.contains(&r.pattern) && r.database.as_deref().is_none_or(|db| db == database)
        });
        match rule.map(|r| &r.response) {
            Some(Response::Rows(rows)) => Ok(rows.clone()),
            Some(Response::Fail(e)) => Err(e.clone()),
            None => Ok(Vec::new()),
        }
    }
}

type Shared = Arc<Mutex<Script>>;

fn lock(script: &Shared) -> std::sync::MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connector handing out [`MockExecutor`]s that share one script.
#[derive(Debug, Clone)]
pub struct MockConnector {
    script: Shared,
    default_database: String,
    unreachable: HashSet<String>,
}

impl MockConnector {
    pub fn new(default_database: &str) -> Self {
        Self {
            script: Shared::default(),
            default_database: default_database.to_string(),
            unreachable: HashSet::new(),
        }
    }

    /// Answers statements containing `pattern` with `rows`.
    pub fn respond(&self, pattern: &str, rows: Vec<Row>) -> &Self {
        self.push(None, pattern, Response::Rows(rows))
    }

    /// Like [`respond`](Self::respond) but only on connections to `database`.
    pub fn respond_in(&self, database: &str, pattern: &str, rows: Vec<Row>) -> &Self {
        self.push(Some(database), pattern, Response::Rows(rows))
    }

    /// Fails statements containing `pattern` with `error`.
    pub fn fail(&self, pattern: &str, error: QpmError) -> &Self {
        self.push(None, pattern, Response::Fail(error))
    }

    /// Makes `connect(database)` fail.
    pub fn unreachable(mut self, database: &str) -> Self {
        self.unreachable.insert(database.to_string());
        self
    }

    /// Executed statements as `(database, sql)`, in order.
    pub fn executed(&self) -> Vec<(String, String)> {
        lock(&self.script).executed.clone()
    }

    /// Number of executed statements containing `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        lock(&self.script)
            .executed
            .iter()
            .filter(|(_, sql)| sql.contains(pattern))
            .count()
    }

    fn push(&self, database: Option<&str>, pattern: &str, response: Response) -> &Self {
        lock(&self.script).rules.push(Rule {
            database: database.map(str::to_string),
            pattern: pattern.to_string(),
            response,
        });
        self
    }
}

impl Connector for MockConnector {
    type Executor = MockExecutor;

    fn connect(&self, database: &str) -> Result<MockExecutor, QpmError> {
        if self.unreachable.contains(database) {
            return Err(QpmError::Connection(format!(
                "database \"{database}\" is unreachable"
            )));
        }
        Ok(MockExecutor {
            database: database.to_string(),
            script: Arc::clone(&self.script),
        })
    }

    fn default_database(&self) -> &str {
        &self.default_database
    }
}

/// Executor answering from a shared script.
#[derive(Debug, Clone)]
pub struct MockExecutor {
    database: String,
    script: Shared,
}

impl MockExecutor {
    /// Standalone executor with its own empty script.
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            script: Shared::default(),
        }
    }

    pub fn respond(&mut self, pattern: &str, rows: Vec<Row>) {
        lock(&self.script).rules.push(Rule {
            database: None,
            pattern: pattern.to_string(),
            response: Response::Rows(rows),
        });
    }

    pub fn fail(&mut self, pattern: &str, error: QpmError) {
        lock(&self.script).rules.push(Rule {
            database: None,
            pattern: pattern.to_string(),
            response: Response::Fail(error),
        });
    }
}

impl QueryExecutor for MockExecutor {
    fn query(&mut self, ctx: &Context, sql: &str) -> Result<Vec<Row>, QpmError> {
        ctx.check()?;
        lock(&self.script).answer(&self.database, sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn database_scoped_rules_take_effect_only_there() {
        let connector = MockConnector::new("postgres");
        connector.respond_in("app", "SELECT 1", vec![Row::from_pairs([("x", Some("1"))])]);
        let ctx = Context::with_timeout(Duration::from_secs(1));

        let mut app = connector.connect("app").unwrap();
        let mut other = connector.connect("other").unwrap();
        assert_eq!(app.query(&ctx, "SELECT 1").unwrap().len(), 1);
        assert!(other.query(&ctx, "SELECT 1").unwrap().is_empty());
        assert_eq!(connector.count_matching("SELECT 1"), 2);
    }

    #[test]
    fn unreachable_database_fails_connect() {
        let connector = MockConnector::new("postgres").unreachable("down");
        assert!(connector.connect("down").is_err());
        assert!(connector.connect("up").is_ok());
    }

    #[test]
    fn expired_context_is_rejected_before_execution() {
        let mut exec = MockExecutor::new("postgres");
        let ctx = Context::with_timeout(Duration::ZERO);
        assert_eq!(exec.query(&ctx, "SELECT 1"), Err(QpmError::DeadlineExceeded));
    }
}
