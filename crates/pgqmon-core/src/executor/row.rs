//! Text-valued result rows and typed decoding.
//!
//! Rows arrive through the simple query protocol, so every value is either
//! NULL or its text representation. Decoding into numbers happens here.

use crate::error::QpmError;

/// One result row: column names with optional text values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Option<String>>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    /// Builds a row from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<Option<String>>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.map(Into::into)))
            .unzip();
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Raw value by column name. Missing columns and NULLs both yield `None`.
    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx)?.as_deref()
    }

    /// Raw value by position.
    pub fn get_index(&self, idx: usize) -> Option<&str> {
        self.values.get(idx)?.as_deref()
    }

    pub fn get_str(&self, column: &str) -> Result<Option<&str>, QpmError> {
        Ok(self.get(column))
    }

    pub fn get_i64(&self, column: &str) -> Result<Option<i64>, QpmError> {
        self.get(column)
            .map(|v| v.trim().parse::<i64>().map_err(|e| decode_err(column, e)))
            .transpose()
    }

    pub fn get_f64(&self, column: &str) -> Result<Option<f64>, QpmError> {
        self.get(column)
            .map(|v| v.trim().parse::<f64>().map_err(|e| decode_err(column, e)))
            .transpose()
    }

    pub fn get_bool(&self, column: &str) -> Result<Option<bool>, QpmError> {
        self.get(column)
            .map(|v| match v.trim() {
                "t" | "true" | "TRUE" | "on" | "1" => Ok(true),
                "f" | "false" | "FALSE" | "off" | "0" => Ok(false),
                other => Err(decode_err(column, format!("not a boolean: {other}"))),
            })
            .transpose()
    }
}

fn decode_err(column: &str, e: impl std::fmt::Display) -> QpmError {
    QpmError::Decode {
        column: column.to_string(),
        message: e.to_string(),
    }
}

/// Decodes a typed record from a result row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self, QpmError>;
}

/// Decodes a single column into a field type.
///
/// `Option<T>` maps NULL and missing columns to `None`. Bare types fall
/// back to their default on NULL.
pub trait FromColumn: Sized {
    fn from_column(row: &Row, column: &str) -> Result<Self, QpmError>;
}

impl FromColumn for Option<String> {
    fn from_column(row: &Row, column: &str) -> Result<Self, QpmError> {
        Ok(row.get(column).map(str::to_string))
    }
}

impl FromColumn for Option<i64> {
    fn from_column(row: &Row, column: &str) -> Result<Self, QpmError> {
        row.get_i64(column)
    }
}

impl FromColumn for Option<f64> {
    fn from_column(row: &Row, column: &str) -> Result<Self, QpmError> {
        row.get_f64(column)
    }
}

impl FromColumn for Option<bool> {
    fn from_column(row: &Row, column: &str) -> Result<Self, QpmError> {
        row.get_bool(column)
    }
}

impl FromColumn for String {
    fn from_column(row: &Row, column: &str) -> Result<Self, QpmError> {
        Ok(row.get(column).unwrap_or_default().to_string())
    }
}

impl FromColumn for i64 {
    fn from_column(row: &Row, column: &str) -> Result<Self, QpmError> {
        Ok(row.get_i64(column)?.unwrap_or_default())
    }
}

impl FromColumn for f64 {
    fn from_column(row: &Row, column: &str) -> Result<Self, QpmError> {
        Ok(row.get_f64(column)?.unwrap_or_default())
    }
}

impl FromColumn for bool {
    fn from_column(row: &Row, column: &str) -> Result<Self, QpmError> {
        Ok(row.get_bool(column)?.unwrap_or_default())
    }
}
