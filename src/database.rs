/// Database Facade
///
/// Resolves logical servers to connection handles, serializes access to
/// each handle, and runs SQL through them. Every native failure raised
/// while executing is translated once, via `core::raise_error`, and cursors
/// are closed before any call returns, including when the caller's
/// callback fails.
///
/// ## Concurrency
///
/// Execution is blocking. Each server's handle sits behind its own mutex,
/// so calls on the same server from different threads run one after
/// another. A callback that calls back into the same server on the same
/// thread gets `SqlBridgeError::Busy`, since the handle can only stream one
/// result at a time.

use crate::config::{DatabaseConfig, IdentifierCase, DEFAULT_SERVER};
use crate::core::db::{marshal, ConnectionHandle, RowCursor, Value};
use crate::core::{raise_error, ErrorStage, Result, SqlBridgeError};
use crate::dataset::Dataset;
use crate::native::{Driver, NativeConnection};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static SERVER_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)").expect("server version pattern is valid"));

/// Per-call execution options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOptions {
    /// Logical server to run on; the default server when `None`
    pub server: Option<String>,
    /// Overrides the server's configured `command_timeout`
    pub command_timeout: Option<Duration>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(server: Option<&str>) -> Self {
        ExecuteOptions {
            server: server.map(str::to_string),
            command_timeout: None,
        }
    }

    pub fn server(mut self, server: &str) -> Self {
        self.server = Some(server.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }
}

/// Parses `major.minor.patch` and encodes it as
/// `major * 1_000_000 + minor * 10_000 + patch`.
pub fn parse_server_version(version: &str) -> Result<u64> {
    let invalid = || SqlBridgeError::ServerVersion(version.to_string());
    let captures = SERVER_VERSION_RE.captures(version.trim()).ok_or_else(invalid)?;
    let part = |i: usize| captures[i].parse::<u64>().map_err(|_| invalid());
    let (major, minor, patch) = (part(1)?, part(2)?, part(3)?);
    major
        .checked_mul(1_000_000)
        .and_then(|v| v.checked_add(minor.checked_mul(10_000)?))
        .and_then(|v| v.checked_add(patch))
        .ok_or_else(invalid)
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| SqlBridgeError::App("Failed to acquire database lock".to_string()))
}

/// A server's handle plus the thread currently executing on it.
struct Slot<C: NativeConnection> {
    handle: Mutex<ConnectionHandle<C>>,
    owner: Mutex<Option<ThreadId>>,
}

/// Marks the current thread as the slot's user until dropped.
struct Claim<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
}

impl<'a> Claim<'a> {
    fn new(owner: &'a Mutex<Option<ThreadId>>, thread: ThreadId) -> Result<Self> {
        *lock(owner)? = Some(thread);
        Ok(Claim { owner })
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Ok(mut owner) = self.owner.lock() {
            *owner = None;
        }
    }
}

/// Entry point: configuration plus a native driver.
pub struct Database<D: Driver> {
    driver: D,
    config: DatabaseConfig,
    connections: Mutex<HashMap<String, Arc<Slot<D::Connection>>>>,
    server_version: Mutex<Option<u64>>,
}

impl<D: Driver> Database<D> {
    /// Creates the facade. No connection is opened until first use or
    /// an explicit [`connect`](Self::connect).
    pub fn new(driver: D, config: DatabaseConfig) -> Self {
        Database {
            driver,
            config,
            connections: Mutex::new(HashMap::new()),
            server_version: Mutex::new(None),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Opens a fresh handle for `server`, replacing any existing one.
    ///
    /// A replaced handle still in use elsewhere is closed once released.
    pub fn connect(&self, server: Option<&str>) -> Result<()> {
        let server = server.unwrap_or(DEFAULT_SERVER);
        let handle = self.open_handle(server)?;
        lock(&self.connections)?.insert(server.to_string(), Arc::new(Self::slot_for(handle)));
        self.invalidate_server_version()
    }

    /// Drops the handle for `server`; it closes as soon as nothing uses it.
    pub fn disconnect(&self, server: Option<&str>) -> Result<()> {
        let server = server.unwrap_or(DEFAULT_SERVER);
        let removed = lock(&self.connections)?.remove(server);
        if let Some(slot) = removed {
            Self::release(server, slot);
        }
        self.invalidate_server_version()
    }

    pub fn disconnect_all(&self) -> Result<()> {
        let drained: Vec<_> = lock(&self.connections)?.drain().collect();
        for (server, slot) in drained {
            Self::release(&server, slot);
        }
        self.invalidate_server_version()
    }

    pub fn is_connected(&self, server: Option<&str>) -> bool {
        let server = server.unwrap_or(DEFAULT_SERVER);
        lock(&self.connections)
            .map(|connections| connections.contains_key(server))
            .unwrap_or(false)
    }

    fn release(server: &str, slot: Arc<Slot<D::Connection>>) {
        match Arc::try_unwrap(slot) {
            Ok(slot) => match slot.handle.into_inner() {
                Ok(mut handle) => handle.close(),
                Err(poisoned) => poisoned.into_inner().close(),
            },
            Err(_) => debug!("connection for '{}' still in use; it closes when released", server),
        }
    }

    fn open_handle(&self, server: &str) -> Result<ConnectionHandle<D::Connection>> {
        let options = self.config.server_opts(server);
        ConnectionHandle::open(&self.driver, server, &options)
    }

    fn slot_for(handle: ConnectionHandle<D::Connection>) -> Slot<D::Connection> {
        Slot {
            handle: Mutex::new(handle),
            owner: Mutex::new(None),
        }
    }

    /// The slot for `server`, opening it on first use.
    ///
    /// The native open runs without the connections lock held; if another
    /// thread registered the server meanwhile, its slot is kept and ours closes.
    fn slot(&self, server: &str) -> Result<Arc<Slot<D::Connection>>> {
        if let Some(slot) = lock(&self.connections)?.get(server) {
            return Ok(Arc::clone(slot));
        }
        let handle = self.open_handle(server)?;
        let mut connections = lock(&self.connections)?;
        let slot = connections
            .entry(server.to_string())
            .or_insert_with(|| Arc::new(Self::slot_for(handle)));
        Ok(Arc::clone(slot))
    }

    /// Runs `f` with exclusive use of the handle for `server`.
    fn synchronize<T, F>(&self, server: Option<&str>, f: F) -> Result<T>
    where
        F: FnOnce(&mut ConnectionHandle<D::Connection>) -> Result<T>,
    {
        let server = server.unwrap_or(DEFAULT_SERVER);
        let slot = self.slot(server)?;
        let current = thread::current().id();
        if *lock(&slot.owner)? == Some(current) {
            return Err(SqlBridgeError::Busy(server.to_string()));
        }

        // poisoned by a panicking callback; its cursor closed while unwinding
        let mut handle = slot.handle.lock().unwrap_or_else(|poisoned| {
            warn!(server, "reusing connection after a panicked call");
            poisoned.into_inner()
        });
        let _claim = Claim::new(&slot.owner, current)?;
        f(&mut handle)
    }

    /// Runs `sql` as a reader and hands the cursor to `f`.
    ///
    /// The cursor is closed before this returns, whether `f` succeeds,
    /// stops early or fails; `f`'s error is then returned unchanged.
    pub fn execute_with<T, F>(&self, sql: &str, opts: &ExecuteOptions, f: F) -> Result<T>
    where
        F: FnOnce(&mut RowCursor<'_>) -> Result<T>,
    {
        info!("{}", sql);
        let started = Instant::now();
        let result = self.synchronize(opts.server.as_deref(), |handle| {
            handle
                .with_reader(sql, opts.command_timeout, f)
                .map_err(|e| raise_error(ErrorStage::Command, e))?
        });
        debug!("execute finished in {:?}", started.elapsed());
        result
    }

    /// Runs `sql` as a reader and discards the rows.
    pub fn execute(&self, sql: &str, opts: &ExecuteOptions) -> Result<()> {
        self.execute_with(sql, opts, |_| Ok(()))
    }

    /// Runs a statement without result rows and returns the affected-row count.
    pub fn execute_non_query(&self, sql: &str, opts: &ExecuteOptions) -> Result<u64> {
        info!("{}", sql);
        self.synchronize(opts.server.as_deref(), |handle| {
            handle
                .execute_non_query(sql, opts.command_timeout)
                .map_err(|e| raise_error(ErrorStage::Command, e))
        })
    }

    /// First column of the first row; `Value::Null` when there are no rows.
    pub fn single_value(&self, sql: &str, opts: &ExecuteOptions) -> Result<Value> {
        info!("{}", sql);
        self.synchronize(opts.server.as_deref(), |handle| {
            let value = handle
                .execute_scalar(sql, opts.command_timeout)
                .map_err(|e| raise_error(ErrorStage::Command, e))?;
            marshal(value, handle.codec())
        })
    }

    /// Server version as `major * 1_000_000 + minor * 10_000 + patch`.
    ///
    /// Probed once and cached until the next `connect`/`disconnect`.
    pub fn server_version(&self, server: Option<&str>) -> Result<u64> {
        if let Some(version) = *lock(&self.server_version)? {
            return Ok(version);
        }
        let raw = self.single_value(self.driver.version_query(), &ExecuteOptions::on(server))?;
        let version = parse_server_version(&raw.to_text())?;
        *lock(&self.server_version)? = Some(version);
        Ok(version)
    }

    fn invalidate_server_version(&self) -> Result<()> {
        *lock(&self.server_version)? = None;
        Ok(())
    }

    /// A dataset on the default server.
    pub fn dataset(&self) -> Dataset<'_, D> {
        let case = self
            .config
            .defaults
            .identifier_output
            .unwrap_or(IdentifierCase::Preserve);
        Dataset::new(self).identifier_output(case)
    }
}

impl<D: Driver> Drop for Database<D> {
    fn drop(&mut self) {
        let _ = self.disconnect_all();
    }
}
