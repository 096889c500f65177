//! Scoped connection execution.
//!
//! Every repository operation runs inside [`ScopedExecutor::with_connection`]:
//! the product is resolved, a fresh connection is opened, the unit of work
//! runs against it, and the connection is closed again. The connection is
//! released exactly once on every path, including errors, timeouts,
//! cancellation and the caller dropping the future.
//!
//! # Timeouts
//!
//! - Opening a connection is bounded by `connect_timeout`
//! - Every command is bounded by `command_timeout`
//!
//! Both come from [`ExecutorSettings`] and can be overridden per call through
//! [`CallContext`].

use crate::db::connection::DbConnection;
use crate::db::resolver::ConnectionResolver;
use crate::db::types::Row;
use crate::error::{DbError, DbResult};
use crate::models::{
    CommandSpec, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS, DatabaseType,
    ExecOutcome, Product,
};
use crate::sql::{CallStyle, Dialect, compile};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Executor-wide defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cancels the calls it was handed to. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Call Context
// =============================================================================

/// Per-call parameters: which product, optional timeout overrides, and an
/// optional cancellation handle.
#[derive(Debug, Clone)]
pub struct CallContext {
    product: Product,
    command_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    cancel: Option<CancelHandle>,
}

impl CallContext {
    pub fn new(product: impl Into<Product>) -> Self {
        Self {
            product: product.into(),
            command_timeout: None,
            connect_timeout: None,
            cancel: None,
        }
    }

    /// Override the command timeout for this call.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.command_timeout = Some(limit);
        self
    }

    pub fn with_connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = Some(limit);
        self
    }

    pub fn with_cancel(mut self, handle: CancelHandle) -> Self {
        self.cancel = Some(handle);
        self
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    pub fn cancel_handle(&self) -> Option<&CancelHandle> {
        self.cancel.as_ref()
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct StatsInner {
    opened: AtomicU64,
    released: AtomicU64,
    commands: AtomicU64,
}

/// Point-in-time connection counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutorStats {
    pub opened: u64,
    pub released: u64,
    /// Commands sent through scoped connections.
    pub commands: u64,
}

impl ExecutorStats {
    /// Connections opened and not yet released.
    pub fn open(&self) -> u64 {
        self.opened.saturating_sub(self.released)
    }
}

/// Counts one open connection; releases it when dropped.
struct Lease {
    stats: Arc<StatsInner>,
}

impl Lease {
    fn acquire(stats: &Arc<StatsInner>) -> Self {
        stats.opened.fetch_add(1, Ordering::SeqCst);
        Self {
            stats: Arc::clone(stats),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Scoped Connection
// =============================================================================

/// A connection lent to one unit of work.
pub struct ScopedConnection {
    conn: DbConnection,
    product: Product,
    command_timeout: Duration,
    stats: Arc<StatsInner>,
}

impl ScopedConnection {
    pub fn db_type(&self) -> DatabaseType {
        self.conn.db_type()
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::new(self.conn.db_type())
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    /// Run a command and decode the rows of its first result.
    pub async fn fetch_rows(&mut self, spec: &CommandSpec) -> DbResult<Vec<Row>> {
        let compiled = compile(spec, self.dialect(), CallStyle::Query)?;
        self.stats.commands.fetch_add(1, Ordering::SeqCst);
        debug!(
            product = %self.product,
            sql = %compiled.sql,
            params = compiled.params.len(),
            "Executing query"
        );
        self.conn
            .fetch_rows(&compiled.sql, &compiled.params, self.command_timeout)
            .await
    }

    /// Run a command and buffer every result set it produces, in order.
    pub async fn fetch_result_sets(&mut self, spec: &CommandSpec) -> DbResult<Vec<Vec<Row>>> {
        let compiled = compile(spec, self.dialect(), CallStyle::Query)?;
        self.stats.commands.fetch_add(1, Ordering::SeqCst);
        debug!(
            product = %self.product,
            sql = %compiled.sql,
            params = compiled.params.len(),
            "Executing multi-result query"
        );
        self.conn
            .fetch_result_sets(&compiled.sql, &compiled.params, self.command_timeout)
            .await
    }

    /// Run a command for its side effects.
    pub async fn execute(&mut self, spec: &CommandSpec) -> DbResult<ExecOutcome> {
        let compiled = compile(spec, self.dialect(), CallStyle::Execute)?;
        self.stats.commands.fetch_add(1, Ordering::SeqCst);
        debug!(
            product = %self.product,
            sql = %compiled.sql,
            params = compiled.params.len(),
            "Executing command"
        );
        self.conn
            .execute(&compiled.sql, &compiled.params, self.command_timeout)
            .await
    }
}

impl std::fmt::Debug for ScopedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedConnection")
            .field("product", &self.product)
            .field("db_type", &self.conn.db_type())
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Opens one connection per unit of work.
#[derive(Clone)]
pub struct ScopedExecutor {
    resolver: Arc<dyn ConnectionResolver>,
    settings: ExecutorSettings,
    stats: Arc<StatsInner>,
}

impl ScopedExecutor {
    pub fn new(resolver: Arc<dyn ConnectionResolver>, settings: ExecutorSettings) -> Self {
        Self {
            resolver,
            settings,
            stats: Arc::default(),
        }
    }

    pub fn settings(&self) -> ExecutorSettings {
        self.settings
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            opened: self.stats.opened.load(Ordering::SeqCst),
            released: self.stats.released.load(Ordering::SeqCst),
            commands: self.stats.commands.load(Ordering::SeqCst),
        }
    }

    /// Run `work` on a fresh connection to the context's product.
    ///
    /// The unit of work borrows the connection for its whole duration; move
    /// owned values into the closure rather than borrowing from the caller.
    pub async fn with_connection<T, F>(&self, ctx: &CallContext, work: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut ScopedConnection) -> BoxFuture<'c, DbResult<T>>,
    {
        let cancel = ctx.cancel.as_ref();
        if cancel.is_some_and(CancelHandle::is_cancelled) {
            return Err(DbError::cancelled("before connect"));
        }

        let target = self.resolver.resolve(&ctx.product)?;
        let connect_timeout = ctx.connect_timeout.unwrap_or(self.settings.connect_timeout);

        let opening = timeout(connect_timeout, DbConnection::open(&target));
        let conn = match cancellable(cancel, "connect", opening).await? {
            Ok(opened) => opened?,
            Err(_) => {
                return Err(DbError::timeout(
                    format!("connect to product '{}'", ctx.product),
                    u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }
        };
        let lease = Lease::acquire(&self.stats);

        let mut scoped = ScopedConnection {
            conn,
            product: ctx.product.clone(),
            command_timeout: ctx.command_timeout.unwrap_or(self.settings.command_timeout),
            stats: Arc::clone(&self.stats),
        };

        let result = cancellable(cancel, "command", work(&mut scoped))
            .await
            .and_then(|inner| inner);

        match timeout(connect_timeout, scoped.conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(product = %ctx.product, error = %e, "Error while closing connection"),
            Err(_) => warn!(product = %ctx.product, "Timed out closing connection"),
        }
        drop(lease);

        result
    }
}

impl std::fmt::Debug for ScopedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedExecutor")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Await `fut`, giving up with `Cancelled` if the handle fires first.
async fn cancellable<F: Future>(
    cancel: Option<&CancelHandle>,
    operation: &str,
    fut: F,
) -> DbResult<F::Output> {
    match cancel {
        None => Ok(fut.await),
        Some(handle) => tokio::select! {
            biased;
            _ = handle.cancelled() => Err(DbError::cancelled(operation)),
            out = fut => Ok(out),
        },
    }
}
