//! Database access boundary.
//!
//! The pipeline only needs two capabilities from the driver layer: open a
//! connection to a named database ([`Connector`]) and run one statement under
//! a deadline, returning rows ([`QueryExecutor`]).
//!
//! ```text
//!   Pipeline ──► Connector::connect(db) ──► QueryExecutor::query(ctx, sql)
//!                      │                              │
//!              ┌───────┴────────┐            ┌────────┴───────┐
//!              │ PostgresConnector │         │ PostgresExecutor │  (postgres crate)
//!              │ MockConnector     │         │ MockExecutor     │  (tests)
//!              └────────────────┘            └────────────────┘
//! ```

pub mod mock;
mod pg;
mod row;

pub use mock::{MockConnector, MockExecutor};
pub use pg::{PostgresConnector, PostgresExecutor, replace_dbname};
pub use row::{FromColumn, FromRow, Row};

use crate::context::Context;
use crate::error::QpmError;

/// Executes one SQL statement within the deadline of `ctx`.
pub trait QueryExecutor {
    fn query(&mut self, ctx: &Context, sql: &str) -> Result<Vec<Row>, QpmError>;
}

/// Opens executors bound to a specific database.
pub trait Connector: Send + Sync {
    type Executor: QueryExecutor;

    fn connect(&self, database: &str) -> Result<Self::Executor, QpmError>;

    /// Database used for instance-level statistics.
    fn default_database(&self) -> &str;
}

/// Runs `sql` and decodes every row into `T`.
///
/// The first undecodable row fails the whole call.
pub fn fetch_all<E, T>(executor: &mut E, ctx: &Context, sql: &str) -> Result<Vec<T>, QpmError>
where
    E: QueryExecutor + ?Sized,
    T: FromRow,
{
    executor
        .query(ctx, sql)?
        .iter()
        .map(T::from_row)
        .collect()
}

/// Runs `sql` and decodes the first row, if any.
pub fn fetch_one<E, T>(executor: &mut E, ctx: &Context, sql: &str) -> Result<Option<T>, QpmError>
where
    E: QueryExecutor + ?Sized,
    T: FromRow,
{
    executor
        .query(ctx, sql)?
        .first()
        .map(T::from_row)
        .transpose()
}
