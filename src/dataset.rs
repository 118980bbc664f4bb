/// Dataset Module
///
/// The boundary consumed by query-building layers: hand in SQL text, get
/// back rows keyed by field name. How the SQL was built is not this
/// module's concern.

use crate::config::IdentifierCase;
use crate::core::db::{Rows, Value};
use crate::core::Result;
use crate::database::{Database, ExecuteOptions};
use crate::native::Driver;
use std::collections::HashMap;
use std::iter::FusedIterator;
use std::time::Duration;

/// A row keyed by (transformed) column name.
pub type FieldRow = HashMap<String, Value>;

pub struct Dataset<'db, D: Driver> {
    db: &'db Database<D>,
    opts: ExecuteOptions,
    identifier_output: IdentifierCase,
    columns: Vec<String>,
}

impl<'db, D: Driver> Dataset<'db, D> {
    pub fn new(db: &'db Database<D>) -> Self {
        Dataset {
            db,
            opts: ExecuteOptions::new(),
            identifier_output: IdentifierCase::Preserve,
            columns: Vec::new(),
        }
    }

    /// Targets a named server; its `identifier_output` setting applies.
    pub fn server(mut self, server: &str) -> Self {
        if let Some(case) = self.db.config().server_opts(server).identifier_output {
            self.identifier_output = case;
        }
        self.opts = self.opts.server(server);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts = self.opts.timeout(timeout);
        self
    }

    pub fn identifier_output(mut self, case: IdentifierCase) -> Self {
        self.identifier_output = case;
        self
    }

    /// Field names captured by the most recent fetch.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Runs `sql` and hands `f` a lazy sequence of field rows.
    pub fn stream_rows<T, F>(&mut self, sql: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut FieldRows<'_, '_>) -> Result<T>,
    {
        let case = self.identifier_output;
        let captured = &mut self.columns;
        self.db.execute_with(sql, &self.opts, |cursor| {
            let columns: Vec<String> = cursor.columns()?.iter().map(|c| case.apply(c)).collect();
            *captured = columns.clone();
            let mut rows = FieldRows {
                columns,
                rows: cursor.rows(),
            };
            f(&mut rows)
        })
    }

    /// Calls `f` once per row, in result order.
    ///
    /// Rows already passed to `f` stay with the caller if a later row fails.
    pub fn fetch_rows<F>(&mut self, sql: &str, mut f: F) -> Result<()>
    where
        F: FnMut(FieldRow) -> Result<()>,
    {
        self.stream_rows(sql, |rows| {
            for row in rows {
                f(row?)?;
            }
            Ok(())
        })
    }

    /// Collects every row.
    pub fn all(&mut self, sql: &str) -> Result<Vec<FieldRow>> {
        self.stream_rows(sql, |rows| rows.collect())
    }
}

/// Lazy field rows over an open cursor.
pub struct FieldRows<'c, 'r> {
    columns: Vec<String>,
    rows: Rows<'c, 'r>,
}

impl FieldRows<'_, '_> {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Iterator for FieldRows<'_, '_> {
    type Item = Result<FieldRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(row.map(|values| self.columns.iter().cloned().zip(values).collect()))
    }
}

impl FusedIterator for FieldRows<'_, '_> {}
