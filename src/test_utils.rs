/// # Test Utilities Module
///
/// A scripted native driver for exercising the bridge without a database
/// engine. Each SQL text maps to a canned result; the shared `ScriptLog`
/// records what the bridge did to the driver (commands sent, readers and
/// connections closed, rows fetched) so tests can assert on resource
/// handling, not just on the rows that came back.
///
/// Like a real ADO connection, a `ScriptedConnection` refuses to run a new
/// command while a reader it handed out has not been closed.

use crate::native::{
    Driver, NativeCommand, NativeConnection, NativeError, NativeReader, NativeResult, NativeValue,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

pub const SCRIPTED_VERSION_QUERY: &str = "SELECT SERVERPROPERTY('ProductVersion')";

#[derive(Debug, Default)]
struct LogInner {
    reader_closes: AtomicUsize,
    connection_closes: AtomicUsize,
    rows_fetched: AtomicUsize,
    commands: Mutex<Vec<String>>,
    connection_strings: Mutex<Vec<String>>,
}

/// Shared record of driver activity.
#[derive(Debug, Clone, Default)]
pub struct ScriptLog(Arc<LogInner>);

impl ScriptLog {
    /// Every call to `NativeReader::close`, including repeated ones
    pub fn reader_closes(&self) -> usize {
        self.0.reader_closes.load(Ordering::SeqCst)
    }

    /// Every call to `NativeConnection::close`, including repeated ones
    pub fn connection_closes(&self) -> usize {
        self.0.connection_closes.load(Ordering::SeqCst)
    }

    pub fn rows_fetched(&self) -> usize {
        self.0.rows_fetched.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.0.commands.lock().unwrap().clone()
    }

    pub fn count_of(&self, sql: &str) -> usize {
        self.commands().iter().filter(|c| c.as_str() == sql).count()
    }

    pub fn connection_strings(&self) -> Vec<String> {
        self.0.connection_strings.lock().unwrap().clone()
    }
}

/// Canned outcome for one SQL text.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResult {
    columns: Vec<Vec<u8>>,
    rows: Vec<Vec<NativeValue>>,
    affected: u64,
    fail_at: Option<(usize, String)>,
    error: Option<String>,
}

impl ScriptedResult {
    pub fn rows(columns: &[&str], rows: Vec<Vec<NativeValue>>) -> Self {
        Self::raw_rows(columns.iter().map(|c| c.as_bytes().to_vec()).collect(), rows)
    }

    /// Column names given as raw native bytes
    pub fn raw_rows(columns: Vec<Vec<u8>>, rows: Vec<Vec<NativeValue>>) -> Self {
        ScriptedResult {
            columns,
            rows,
            ..Default::default()
        }
    }

    pub fn affected(count: u64) -> Self {
        ScriptedResult {
            affected: count,
            ..Default::default()
        }
    }

    pub fn scalar(value: NativeValue) -> Self {
        Self::rows(&[""], vec![vec![value]])
    }

    /// The command itself fails with `message`
    pub fn error(message: &str) -> Self {
        ScriptedResult {
            error: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Reading row `index` fails with `message`
    pub fn fail_at(mut self, index: usize, message: &str) -> Self {
        self.fail_at = Some((index, message.to_string()));
        self
    }
}

/// Reader over a `ScriptedResult`.
pub struct ScriptedReader {
    result: ScriptedResult,
    log: ScriptLog,
    current: Option<usize>,
    next: usize,
    closed: bool,
}

impl ScriptedReader {
    pub fn new(result: ScriptedResult, log: ScriptLog) -> Self {
        ScriptedReader {
            result,
            log,
            current: None,
            next: 0,
            closed: false,
        }
    }
}

impl NativeReader for ScriptedReader {
    fn read(&mut self) -> NativeResult<bool> {
        if self.closed {
            return Err(NativeError::new("Invalid attempt to call Read when reader is closed."));
        }
        if let Some((index, message)) = &self.result.fail_at {
            if *index == self.next {
                return Err(NativeError::with_code(-2, message.clone()));
            }
        }
        if self.next < self.result.rows.len() {
            self.current = Some(self.next);
            self.next += 1;
            self.log.0.rows_fetched.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        } else {
            self.current = None;
            Ok(false)
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn field_count(&self) -> usize {
        self.result.columns.len()
    }

    fn get_name(&self, index: usize) -> NativeResult<Vec<u8>> {
        self.result
            .columns
            .get(index)
            .cloned()
            .ok_or_else(|| NativeError::new(format!("Index {} was outside the bounds of the array.", index)))
    }

    fn get_value(&self, index: usize) -> NativeResult<NativeValue> {
        let row = self
            .current
            .and_then(|r| self.result.rows.get(r))
            .ok_or_else(|| NativeError::new("Invalid attempt to read when no data is present."))?;
        row.get(index)
            .cloned()
            .ok_or_else(|| NativeError::new(format!("Index {} was outside the bounds of the array.", index)))
    }

    fn close(&mut self) {
        self.closed = true;
        self.log.0.reader_closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ScriptedConnection {
    scripts: HashMap<String, ScriptedResult>,
    log: ScriptLog,
    closed: bool,
    reader_open: bool,
}

impl ScriptedConnection {
    fn begin(&mut self, command: &NativeCommand) -> NativeResult<ScriptedResult> {
        if self.closed {
            return Err(NativeError::new("ExecuteReader requires an open and available Connection."));
        }
        if self.reader_open {
            return Err(NativeError::new(
                "There is already an open DataReader associated with this Command which must be closed first.",
            ));
        }
        let sql = String::from_utf8_lossy(&command.text).into_owned();
        self.log.0.commands.lock().unwrap().push(sql.clone());

        let result = self
            .scripts
            .get(&sql)
            .cloned()
            .ok_or_else(|| NativeError::with_code(208, format!("Invalid object name in '{}'.", sql)))?;
        match &result.error {
            Some(message) => Err(NativeError::with_code(50000, message.clone())),
            None => Ok(result),
        }
    }
}

impl NativeConnection for ScriptedConnection {
    fn close(&mut self) -> NativeResult<()> {
        self.closed = true;
        self.log.0.connection_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn execute_non_query(&mut self, command: &NativeCommand) -> NativeResult<u64> {
        Ok(self.begin(command)?.affected)
    }

    fn execute_scalar(&mut self, command: &NativeCommand) -> NativeResult<NativeValue> {
        let result = self.begin(command)?;
        Ok(result
            .rows
            .first()
            .and_then(|row| row.first())
            .cloned()
            .unwrap_or(NativeValue::Null))
    }

    fn execute_reader(
        &mut self,
        command: &NativeCommand,
        consumer: &mut dyn FnMut(&mut dyn NativeReader),
    ) -> NativeResult<()> {
        let result = self.begin(command)?;
        let mut reader = ScriptedReader::new(result, self.log.clone());
        consumer(&mut reader);
        if !reader.is_closed() {
            self.reader_open = true;
        }
        Ok(())
    }
}

/// Driver handing out `ScriptedConnection`s that share one script and log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDriver {
    scripts: HashMap<String, ScriptedResult>,
    log: ScriptLog,
    open_gate: Option<(String, Arc<Barrier>)>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, sql: &str, result: ScriptedResult) -> Self {
        self.scripts.insert(sql.to_string(), result);
        self
    }

    pub fn log(&self) -> ScriptLog {
        self.log.clone()
    }

    /// Opens whose connection string contains `marker` wait on `gate` twice:
    /// once on entry, once before returning.
    pub fn gate_open(mut self, marker: &str, gate: Arc<Barrier>) -> Self {
        self.open_gate = Some((marker.to_string(), gate));
        self
    }
}

impl Driver for ScriptedDriver {
    type Connection = ScriptedConnection;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&self, connection_string: &str) -> NativeResult<ScriptedConnection> {
        self.log
            .0
            .connection_strings
            .lock()
            .unwrap()
            .push(connection_string.to_string());
        if let Some((marker, gate)) = &self.open_gate {
            if connection_string.contains(marker.as_str()) {
                gate.wait();
                gate.wait();
            }
        }
        if connection_string.contains("unreachable") {
            return Err(NativeError::with_code(
                53,
                "A network-related error occurred: server 'unreachable' was not found.",
            ));
        }
        Ok(ScriptedConnection {
            scripts: self.scripts.clone(),
            log: self.log.clone(),
            closed: false,
            reader_open: false,
        })
    }

    fn version_query(&self) -> &'static str {
        SCRIPTED_VERSION_QUERY
    }
}
