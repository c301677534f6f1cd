//! A bounded pool of execution contexts sharing one catalog.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, warn};
use warden_capability::Catalog;

use crate::config::PoolConfig;
use crate::context::{ExecutionContext, RunOutcome};
use crate::error::{CoreError, CoreResult};

/// Snapshot of pool activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Contexts created over the pool's lifetime.
    pub created: u64,
    /// Contexts thrown away instead of reused.
    pub discarded: u64,
    /// Successful acquisitions.
    pub acquired: u64,
    /// Contexts waiting for a caller.
    pub idle: usize,
    /// Contexts checked out right now.
    pub in_use: usize,
    /// Configured bound.
    pub max_contexts: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<ExecutionContext>,
    /// Live contexts, idle or checked out, including ones being created.
    total: usize,
}

#[derive(Debug)]
struct PoolInner {
    catalog: Arc<Catalog>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
    created: AtomicU64,
    discarded: AtomicU64,
    acquired: AtomicU64,
}

impl PoolInner {
    fn create(&self) -> CoreResult<ExecutionContext> {
        let ctx = ExecutionContext::new(&self.catalog, &self.config);
        if ctx.is_ok() {
            self.created.fetch_add(1, Ordering::Relaxed);
        }
        ctx
    }

    fn release(&self, ctx: ExecutionContext) {
        let reason = ctx.discard_reason(&self.config);
        let mut state = self.state.lock();
        match reason {
            Some(reason) => {
                state.total -= 1;
                self.discarded.fetch_add(1, Ordering::Relaxed);
                drop(state);
                warn!(context_id = %ctx.id(), runs = ctx.runs(), %reason, "Discarding execution context");
                drop(ctx);
            }
            None => {
                debug!(context_id = %ctx.id(), "Context returned to pool");
                state.idle.push(ctx);
            }
        }
        self.available.notify_one();
    }
}

/// Builder for [`ExecutionPool`].
#[derive(Debug, Default)]
pub struct ExecutionPoolBuilder {
    config: PoolConfig,
    catalog: Catalog,
}

impl ExecutionPoolBuilder {
    /// Create a builder with the default configuration and no modules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool configuration.
    pub fn with_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the modules every context will carry.
    ///
    /// May be called more than once: catalogs merge by namespace and the
    /// last binding of a namespace wins.
    pub fn preload(mut self, catalog: Catalog) -> Self {
        self.catalog = std::mem::take(&mut self.catalog).merge(catalog);
        self
    }

    /// Build the pool, creating the configured number of prewarmed contexts.
    ///
    /// # Errors
    ///
    /// `CatalogBindingFailed` if a prewarmed context cannot bind the catalog.
    pub fn build(self) -> CoreResult<ExecutionPool> {
        let config = PoolConfig {
            max_contexts: self.config.max_contexts.max(1),
            ..self.config
        };
        let inner = Arc::new(PoolInner {
            catalog: Arc::new(self.catalog),
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
            created: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            acquired: AtomicU64::new(0),
            config,
        });

        let prewarm = inner.config.prewarm.min(inner.config.max_contexts);
        for _ in 0..prewarm {
            let ctx = inner.create()?;
            let mut state = inner.state.lock();
            state.total += 1;
            state.idle.push(ctx);
        }

        info!(
            max_contexts = inner.config.max_contexts,
            prewarmed = prewarm,
            modules = inner.catalog.len(),
            "Execution pool ready"
        );
        Ok(ExecutionPool { inner })
    }
}

/// A bounded set of reusable [`ExecutionContext`]s.
///
/// Cloning the pool is cheap; clones share contexts.
///
/// # Example
///
/// ```
/// use warden_capability::CatalogBuilder;
/// use warden_capability::builtin::BitModule;
/// use warden_core::{ExecutionPool, PoolConfig};
///
/// let catalog = CatalogBuilder::<()>::new()
///     .module("bit", BitModule::new())
///     .build(&())?;
/// let pool = ExecutionPool::builder()
///     .with_config(PoolConfig::new().with_max_contexts(2))
///     .preload(catalog)
///     .build()?;
///
/// let outcome = pool.do_string(r#"return require("bit").bor(1, 2)"#)?;
/// assert_eq!(outcome.values, vec!["3"]);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionPool {
    inner: Arc<PoolInner>,
}

impl ExecutionPool {
    /// Start building a pool.
    pub fn builder() -> ExecutionPoolBuilder {
        ExecutionPoolBuilder::new()
    }

    /// The catalog bound into every context.
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a context, waiting up to the configured acquire timeout.
    pub fn acquire(&self) -> CoreResult<PooledContext> {
        self.acquire_timeout(self.inner.config.acquire_timeout)
    }

    /// Check out a context without waiting.
    pub fn try_acquire(&self) -> CoreResult<PooledContext> {
        self.acquire_timeout(Some(Duration::ZERO))
    }

    /// Check out a context, waiting up to `timeout` (`None` waits forever).
    ///
    /// # Errors
    ///
    /// `PoolExhausted` when no context frees up in time; creation errors
    /// when a new context cannot bind the catalog.
    pub fn acquire_timeout(&self, timeout: Option<Duration>) -> CoreResult<PooledContext> {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let max_contexts = self.inner.config.max_contexts;
        let mut state = self.inner.state.lock();

        loop {
            if let Some(ctx) = state.idle.pop() {
                drop(state);
                return Ok(self.checked_out(ctx));
            }

            if state.total < max_contexts {
                state.total += 1;
                drop(state);
                return match self.inner.create() {
                    Ok(ctx) => Ok(self.checked_out(ctx)),
                    Err(e) => {
                        self.inner.state.lock().total -= 1;
                        self.inner.available.notify_one();
                        Err(e)
                    }
                };
            }

            let expired = match deadline {
                None => {
                    self.inner.available.wait(&mut state);
                    false
                }
                Some(deadline) => {
                    Instant::now() >= deadline
                        || self.inner.available.wait_until(&mut state, deadline).timed_out()
                }
            };
            if expired && state.idle.is_empty() && state.total >= max_contexts {
                let waited = started.elapsed();
                debug!(max_contexts, ?waited, "Execution pool exhausted");
                return Err(CoreError::PoolExhausted {
                    max_contexts,
                    waited,
                });
            }
        }
    }

    fn checked_out(&self, ctx: ExecutionContext) -> PooledContext {
        self.inner.acquired.fetch_add(1, Ordering::Relaxed);
        debug!(context_id = %ctx.id(), "Context acquired");
        PooledContext {
            pool: Arc::clone(&self.inner),
            ctx: ManuallyDrop::new(ctx),
        }
    }

    /// Run inline source on a pooled context.
    pub fn do_string(&self, source: &str) -> CoreResult<RunOutcome> {
        self.do_chunk("inline", source.as_bytes())
    }

    /// Run `source` under the chunk name `chunk`.
    pub fn do_chunk(&self, chunk: &str, source: &[u8]) -> CoreResult<RunOutcome> {
        let mut ctx = self.acquire()?;
        ctx.run(chunk, source)
    }

    /// Read and run a script file.
    ///
    /// # Errors
    ///
    /// `ScriptLoadError` when the file cannot be read, plus everything
    /// [`ExecutionContext::run`] returns.
    pub fn do_file(&self, path: impl AsRef<Path>) -> CoreResult<RunOutcome> {
        let path = path.as_ref();
        let chunk = path.display().to_string();
        let source = std::fs::read(path).map_err(|e| CoreError::ScriptLoadError {
            chunk: chunk.clone(),
            message: e.to_string(),
        })?;
        self.do_chunk(&chunk, &source)
    }

    /// Current statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            created: self.inner.created.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
            acquired: self.inner.acquired.load(Ordering::Relaxed),
            idle: state.idle.len(),
            in_use: state.total - state.idle.len(),
            max_contexts: self.inner.config.max_contexts,
        }
    }
}

/// A context checked out of the pool. Dropping it returns the context.
#[derive(Debug)]
pub struct PooledContext {
    pool: Arc<PoolInner>,
    ctx: ManuallyDrop<ExecutionContext>,
}

impl PooledContext {
    /// Return the context now.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for PooledContext {
    type Target = ExecutionContext;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

impl DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ctx
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        // SAFETY: `ctx` is never touched again after this point.
        let ctx = unsafe { ManuallyDrop::take(&mut self.ctx) };
        self.pool.release(ctx);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;

    use mlua::{Lua, Table};
    use warden_capability::builtin::{BitModule, StoreModule, TimeModule};
    use warden_capability::{CapabilityModule, CatalogBuilder};

    use super::*;
    use crate::context::ContextId;

    /// Tracks runs inside each interpreter. Every context installs the
    /// module once and gets its own slot; `enter()` returns that slot and
    /// counts an overlap when the slot is already occupied.
    #[derive(Debug, Default)]
    struct Occupancy {
        next_slot: AtomicUsize,
        active: Arc<Mutex<HashMap<usize, usize>>>,
        overlaps: Arc<AtomicUsize>,
    }

    impl CapabilityModule for Occupancy {
        fn name(&self) -> &str {
            "Occupancy"
        }

        fn install(&self, lua: &Lua) -> mlua::Result<Table> {
            let slot = self.next_slot.fetch_add(1, Ordering::SeqCst);
            let module = lua.create_table()?;

            let active = Arc::clone(&self.active);
            let overlaps = Arc::clone(&self.overlaps);
            module.set(
                "enter",
                lua.create_function(move |_, ()| {
                    let mut active = active.lock();
                    let count = active.entry(slot).or_insert(0);
                    *count += 1;
                    if *count > 1 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(slot)
                })?,
            )?;
            let active = Arc::clone(&self.active);
            module.set(
                "exit",
                lua.create_function(move |_, ()| {
                    if let Some(count) = active.lock().get_mut(&slot) {
                        *count -= 1;
                    }
                    Ok(())
                })?,
            )?;
            Ok(module)
        }
    }

    fn pool(config: PoolConfig) -> ExecutionPool {
        let catalog = CatalogBuilder::<()>::new()
            .module("store", StoreModule::new())
            .module("time", TimeModule::new())
            .build(&())
            .unwrap();
        ExecutionPool::builder()
            .with_config(config)
            .preload(catalog)
            .build()
            .unwrap()
    }

    #[test]
    fn test_contexts_are_reused() {
        let pool = pool(PoolConfig::new().with_max_contexts(2));
        let first = pool.do_string("return 1").unwrap();
        let second = pool.do_string("return 2").unwrap();
        assert_eq!(first.context_id, second.context_id);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[test]
    fn test_globals_do_not_leak_between_runs() {
        let pool = pool(PoolConfig::new().with_max_contexts(1));
        pool.do_string("counter = 41; string_backup = string").unwrap();
        let outcome = pool.do_string("return counter == nil, type(string)").unwrap();
        assert_eq!(outcome.values, vec!["true", "table"]);
    }

    #[test]
    fn test_shared_store_is_visible_to_all_runs() {
        let pool = pool(PoolConfig::new().with_max_contexts(1));
        pool.do_string(r#"require("store").set("hits", 1)"#).unwrap();
        let outcome = pool.do_string(r#"return require("store").get("hits")"#).unwrap();
        assert_eq!(outcome.values, vec!["1"]);
    }

    #[test]
    fn test_exclusive_checkout_and_exhaustion() {
        let pool = pool(
            PoolConfig::new()
                .with_max_contexts(1)
                .with_acquire_timeout(Some(Duration::from_millis(50))),
        );

        let held = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, CoreError::PoolExhausted { max_contexts: 1, .. }));
        assert!(pool.try_acquire().is_err());
        assert_eq!(pool.stats().in_use, 1);

        let held_id = held.id();
        held.release();
        assert_eq!(pool.acquire().unwrap().id(), held_id);
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let pool = pool(
            PoolConfig::new()
                .with_max_contexts(1)
                .with_acquire_timeout(None),
        );
        let held = pool.acquire().unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                let ctx = pool.acquire().unwrap();
                tx.send(ctx.id()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        let id = held.id();
        drop(held);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), id);
        waiter.join().unwrap();
    }

    #[test]
    fn test_concurrent_runs_stay_within_bound() {
        let occupancy = Occupancy::default();
        let overlaps = Arc::clone(&occupancy.overlaps);
        let catalog = CatalogBuilder::<()>::new()
            .module("time", TimeModule::new())
            .module("occupancy", occupancy)
            .build(&())
            .unwrap();
        let pool = ExecutionPool::builder()
            .with_config(
                PoolConfig::new()
                    .with_max_contexts(2)
                    .with_acquire_timeout(None),
            )
            .preload(catalog)
            .build()
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = pool.clone();
                thread::spawn(move || {
                    let source = format!(
                        "local o = require('occupancy'); local slot = o.enter(); \
                         require('time').sleep(0.02); o.exit(); return {i}, slot"
                    );
                    pool.do_string(&source).unwrap()
                })
            })
            .collect();

        let mut slots: HashMap<String, ContextId> = HashMap::new();
        for (i, handle) in handles.into_iter().enumerate() {
            let outcome = handle.join().unwrap();
            assert_eq!(outcome.values[0], i.to_string());
            let owner = *slots
                .entry(outcome.values[1].clone())
                .or_insert(outcome.context_id);
            assert_eq!(owner, outcome.context_id, "one interpreter served two contexts");
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0, "two runs shared a context");
        assert!(slots.len() <= 2);
        let stats = pool.stats();
        assert!(stats.created <= 2);
        assert_eq!(stats.acquired, 8);
    }

    #[test]
    fn test_discarded_context_is_replaced() {
        let pool = pool(PoolConfig::new().with_max_contexts(1).with_max_runs_per_context(1));
        let first = pool.do_string("return 1").unwrap();
        let second = pool.do_string("return 1").unwrap();
        assert_ne!(first.context_id, second.context_id);
        assert_eq!(pool.stats().discarded, 2);
    }

    #[test]
    fn test_errors_release_context() {
        let pool = pool(PoolConfig::new().with_max_contexts(1));
        assert!(matches!(
            pool.do_string("return +").unwrap_err(),
            CoreError::ScriptLoadError { .. }
        ));
        assert!(matches!(
            pool.do_string("error('x')").unwrap_err(),
            CoreError::ScriptRuntimeError { .. }
        ));
        assert!(matches!(
            pool.do_file("/definitely/not/here.lua").unwrap_err(),
            CoreError::ScriptLoadError { .. }
        ));
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_do_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.lua");
        std::fs::write(&path, "return 'from file'").unwrap();
        let pool = pool(PoolConfig::new());
        assert_eq!(pool.do_file(&path).unwrap().values, vec!["from file"]);
    }

    #[test]
    fn test_preload_merges_last_write_wins() {
        let first = CatalogBuilder::<()>::new()
            .module("shared", StoreModule::new())
            .module("bit", BitModule::new())
            .build(&())
            .unwrap();
        let second = CatalogBuilder::<()>::new()
            .module("shared", TimeModule::new())
            .build(&())
            .unwrap();
        let pool = ExecutionPool::builder()
            .preload(first)
            .preload(second)
            .build()
            .unwrap();

        assert_eq!(pool.catalog().len(), 2);
        assert_eq!(pool.catalog().get("shared").unwrap().name(), "Time");
        let outcome = pool
            .do_string(r#"return type(require("shared").millis), type(require("bit").band)"#)
            .unwrap();
        assert_eq!(outcome.values, vec!["function", "function"]);
    }

    #[test]
    fn test_prewarm_and_stats_serialize() {
        let pool = pool(PoolConfig::new().with_max_contexts(3).with_prewarm(2));
        let stats = pool.stats();
        assert_eq!((stats.created, stats.idle, stats.in_use), (2, 2, 0));
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["max_contexts"], 3);
    }
}
