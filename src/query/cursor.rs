//! Forward-only result cursor.

use std::cell::Cell;

use time::Date;

use crate::error::{GraphError, Result};
use crate::query::executor::RowSource;
use crate::query::value::Value;
use crate::session::TxState;

/// Forward-only cursor over the rows of a pattern query.
///
/// Rows are produced on demand by [`Cursor::next`]; a failure while
/// producing rows aborts the owning session's transaction.
pub struct Cursor<'s> {
    tx: &'s Cell<TxState>,
    columns: Vec<String>,
    source: Option<RowSource<'s>>,
    current: Option<Vec<Value>>,
    exhausted: bool,
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("columns", &self.columns)
            .field("current", &self.current)
            .field("exhausted", &self.exhausted)
            .field("closed", &self.source.is_none())
            .finish()
    }
}

impl<'s> Cursor<'s> {
    pub(crate) fn new(tx: &'s Cell<TxState>, columns: Vec<String>, source: RowSource<'s>) -> Self {
        Self {
            tx,
            columns,
            source: Some(source),
            current: None,
            exhausted: false,
        }
    }

    /// Output column names in SELECT order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Advances to the next row. Returns `false` once the result is exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<bool> {
        let Some(source) = self.source.as_mut() else {
            return Err(GraphError::InvalidState("cursor is closed".into()));
        };
        if self.exhausted {
            return Ok(false);
        }
        if self.tx.get() == TxState::Aborted {
            return Err(GraphError::Transaction(
                "transaction was aborted by an earlier failure; roll back first".into(),
            ));
        }
        match source.next_row() {
            Ok(Some(row)) => {
                self.current = Some(row);
                Ok(true)
            }
            Ok(None) => {
                self.current = None;
                self.exhausted = true;
                Ok(false)
            }
            Err(err) => {
                self.current = None;
                self.exhausted = true;
                self.tx.set(TxState::Aborted);
                Err(err)
            }
        }
    }

    /// Values of the current row.
    pub fn row(&self) -> Result<&[Value]> {
        if self.source.is_none() {
            return Err(GraphError::InvalidState("cursor is closed".into()));
        }
        self.current
            .as_deref()
            .ok_or_else(|| GraphError::InvalidState("cursor is not positioned on a row".into()))
    }

    /// Value of a column of the current row, by case-insensitive name.
    pub fn get(&self, column: &str) -> Result<&Value> {
        let row = self.row()?;
        let idx = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .ok_or_else(|| GraphError::ColumnNotFound {
                column: column.to_string(),
            })?;
        Ok(&row[idx])
    }

    /// Value of a column of the current row, by position.
    pub fn get_at(&self, idx: usize) -> Result<&Value> {
        self.row()?.get(idx).ok_or_else(|| GraphError::ColumnNotFound {
            column: format!("#{idx}"),
        })
    }

    fn typed<'v, T>(
        &'v self,
        column: &str,
        expected: &str,
        extract: impl FnOnce(&'v Value) -> Option<T>,
    ) -> Result<Option<T>> {
        let value = self.get(column)?;
        if value.is_null() {
            return Ok(None);
        }
        extract(value).map(Some).ok_or_else(|| {
            GraphError::type_mismatch(
                column,
                format!("expected {expected}, found {}", value.type_name()),
            )
        })
    }

    /// String column; `None` for NULL.
    pub fn get_str(&self, column: &str) -> Result<Option<&str>> {
        self.typed(column, "string", Value::as_str)
    }

    /// Integer column; `None` for NULL.
    pub fn get_i64(&self, column: &str) -> Result<Option<i64>> {
        self.typed(column, "integer", Value::as_i64)
    }

    /// Numeric column widened to `f64`; `None` for NULL.
    pub fn get_f64(&self, column: &str) -> Result<Option<f64>> {
        self.typed(column, "number", Value::as_f64)
    }

    /// Boolean column; `None` for NULL.
    pub fn get_bool(&self, column: &str) -> Result<Option<bool>> {
        self.typed(column, "boolean", |v| match v {
            Value::Bool(b) => Some(*b),
            _ => None,
        })
    }

    /// Date column; `None` for NULL.
    pub fn get_date(&self, column: &str) -> Result<Option<Date>> {
        self.typed(column, "date", Value::as_date)
    }

    /// Drains the remaining rows.
    pub fn fetch_all(&mut self) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while self.next()? {
            if let Some(row) = self.current.take() {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Releases the cursor's resources. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.source = None;
        self.current = None;
    }

    /// True once [`Cursor::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }
}
