//! One interpreter with the catalog bound.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mlua::{ChunkMode, Function, HookTriggers, Lua, MultiValue, Table, VmState};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_capability::Catalog;

use crate::config::PoolConfig;
use crate::error::{CoreError, CoreResult};
use crate::sandbox;

/// Unique identifier for an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Create a new random context ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Context the script ran on.
    pub context_id: ContextId,
    /// The script's return values, converted with `tostring`.
    pub values: Vec<String>,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

/// Why a context is not returned to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// A host callback panicked or the interpreter ran out of memory.
    Poisoned,
    /// The context reached its run limit.
    RunLimit,
    /// The heap stayed above the recycle threshold after a full collection.
    Memory,
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Poisoned => "poisoned",
            Self::RunLimit => "run limit reached",
            Self::Memory => "memory above recycle threshold",
        })
    }
}

/// A hardened interpreter with every catalog module installed.
///
/// Contexts are owned by the pool; scripts reach them through a
/// [`PooledContext`](crate::PooledContext).
pub struct ExecutionContext {
    id: ContextId,
    lua: Lua,
    globals: Table,
    timeout: Option<Duration>,
    hook_interval: u32,
    runs: u64,
    poisoned: bool,
    created_at: Instant,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("runs", &self.runs)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

/// Install every catalog module and the `require` that serves them.
fn bind_catalog(lua: &Lua, catalog: &Catalog) -> CoreResult<()> {
    let loaded = lua.create_table()?;
    for entry in catalog.iter() {
        let table = entry
            .module
            .install(lua)
            .map_err(|e| CoreError::CatalogBindingFailed {
                namespace: entry.namespace.to_string(),
                reason: e.to_string(),
            })?;
        loaded.raw_set(entry.namespace.as_str(), sandbox::read_only(lua, table)?)?;
    }

    let require = lua.create_function(move |_, namespace: String| {
        match loaded.raw_get::<Option<Table>>(namespace.as_str())? {
            Some(module) => Ok(module),
            None => Err(mlua::Error::runtime(format!("module '{namespace}' not found"))),
        }
    })?;
    lua.globals().raw_set("require", require)?;
    Ok(())
}

fn is_memory_error(error: &mlua::Error) -> bool {
    match error {
        mlua::Error::MemoryError(_) => true,
        mlua::Error::CallbackError { cause, .. } => is_memory_error(cause),
        _ => false,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl ExecutionContext {
    /// Create a context: harden a fresh interpreter and bind `catalog`.
    ///
    /// # Errors
    ///
    /// `CatalogBindingFailed` when a module fails to install.
    pub fn new(catalog: &Catalog, config: &PoolConfig) -> CoreResult<Self> {
        let id = ContextId::new();
        let lua = sandbox::new_interpreter()?;
        if let Some(limit) = config.memory_limit {
            lua.set_memory_limit(limit)?;
        }
        sandbox::harden(&lua)?;
        bind_catalog(&lua, catalog)?;
        let globals = lua.globals();

        info!(context_id = %id, modules = catalog.len(), "Created execution context");

        Ok(Self {
            id,
            lua,
            globals,
            timeout: config.execution_timeout,
            hook_interval: config.hook_interval.max(1),
            runs: 0,
            poisoned: false,
            created_at: Instant::now(),
        })
    }

    /// Get the context ID.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Number of runs started on this context.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Time since creation.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Interpreter heap in bytes.
    pub fn used_memory(&self) -> usize {
        self.lua.used_memory()
    }

    /// Whether a run left the interpreter unfit for reuse.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Compile and run `source` in a fresh environment.
    ///
    /// `chunk` names the source in error messages and tracebacks.
    ///
    /// # Errors
    ///
    /// - `ScriptLoadError` if the source does not compile
    /// - `ScriptRuntimeError` if it raises an uncaught error
    /// - `ExecutionTimeout` if it outlives the configured limit
    pub fn run(&mut self, chunk: &str, source: &[u8]) -> CoreResult<RunOutcome> {
        self.runs += 1;
        let started = Instant::now();
        let env = sandbox::run_environment(&self.lua, &self.globals)?;

        let function = self
            .lua
            .load(source)
            .set_name(format!("@{chunk}"))
            .set_mode(ChunkMode::Text)
            .set_environment(env)
            .into_function()
            .map_err(|e| CoreError::ScriptLoadError {
                chunk: chunk.to_string(),
                message: e.to_string(),
            })?;

        let timed_out = Arc::new(AtomicBool::new(false));
        if let Some(limit) = self.timeout {
            let deadline = started + limit;
            let flag = Arc::clone(&timed_out);
            self.lua.set_hook(
                HookTriggers::new().every_nth_instruction(self.hook_interval),
                move |_, _| {
                    if Instant::now() >= deadline {
                        flag.store(true, Ordering::SeqCst);
                        return Err(mlua::Error::runtime("execution timeout"));
                    }
                    Ok(VmState::Continue)
                },
            );
        }

        debug!(context_id = %self.id, chunk, run = self.runs, "Running script");
        let result = panic::catch_unwind(AssertUnwindSafe(|| function.call::<MultiValue>(())));
        self.lua.remove_hook();
        let elapsed = started.elapsed();

        let values = match result {
            Ok(Ok(values)) => values,
            Ok(Err(_)) if timed_out.load(Ordering::SeqCst) => {
                warn!(context_id = %self.id, chunk, ?elapsed, "Execution timeout");
                return Err(CoreError::ExecutionTimeout {
                    chunk: chunk.to_string(),
                    limit: self.timeout.unwrap_or(elapsed),
                });
            }
            Ok(Err(e)) => {
                if is_memory_error(&e) {
                    warn!(context_id = %self.id, chunk, "Script exhausted interpreter memory");
                    self.poisoned = true;
                }
                debug!(context_id = %self.id, chunk, error = %e, "Script failed");
                return Err(CoreError::ScriptRuntimeError {
                    chunk: chunk.to_string(),
                    message: e.to_string(),
                });
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(context_id = %self.id, chunk, panic = %message, "Host callback panicked");
                self.poisoned = true;
                return Err(CoreError::ScriptRuntimeError {
                    chunk: chunk.to_string(),
                    message: format!("host callback panicked: {message}"),
                });
            }
        };

        let tostring: Function = self.globals.get("tostring")?;
        let values = values
            .into_iter()
            .map(|value| {
                tostring
                    .call::<mlua::String>(value)
                    .map(|s| s.to_string_lossy().to_string())
            })
            .collect::<mlua::Result<Vec<_>>>()
            .map_err(|e| CoreError::ScriptRuntimeError {
                chunk: chunk.to_string(),
                message: e.to_string(),
            })?;

        info!(context_id = %self.id, chunk, ?elapsed, "Script completed successfully");
        Ok(RunOutcome {
            context_id: self.id,
            values,
            elapsed,
        })
    }

    /// Decide whether this context may serve another run.
    pub fn discard_reason(&self, config: &PoolConfig) -> Option<DiscardReason> {
        if self.poisoned {
            return Some(DiscardReason::Poisoned);
        }
        if config.max_runs_per_context.is_some_and(|max| self.runs >= max) {
            return Some(DiscardReason::RunLimit);
        }
        if let Some(limit) = config.recycle_memory_bytes {
            if self.lua.gc_collect().is_err() || self.lua.used_memory() > limit {
                return Some(DiscardReason::Memory);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use mlua::Table;
    use warden_capability::builtin::StoreModule;
    use warden_capability::{CapabilityModule, CatalogBuilder};

    use super::*;

    #[derive(Debug)]
    struct Panicking;

    impl CapabilityModule for Panicking {
        fn name(&self) -> &str {
            "Panicking"
        }

        fn install(&self, lua: &Lua) -> mlua::Result<Table> {
            let module = lua.create_table()?;
            module.set(
                "boom",
                lua.create_function(|_, ()| -> mlua::Result<()> { panic!("boom") })?,
            )?;
            Ok(module)
        }
    }

    #[derive(Debug)]
    struct Broken;

    impl CapabilityModule for Broken {
        fn name(&self) -> &str {
            "Broken"
        }

        fn install(&self, _lua: &Lua) -> mlua::Result<Table> {
            Err(mlua::Error::runtime("cannot install"))
        }
    }

    fn context_with(catalog: Catalog, config: &PoolConfig) -> ExecutionContext {
        ExecutionContext::new(&catalog, config).unwrap()
    }

    #[test]
    fn test_require_catalog_module() {
        let catalog = CatalogBuilder::<()>::new()
            .module("store", StoreModule::new())
            .build(&())
            .unwrap();
        let mut ctx = context_with(catalog, &PoolConfig::default());

        let outcome = ctx
            .run("inline", br#"local s = require("store"); s.set("k", 1); return s.get("k")"#)
            .unwrap();
        assert_eq!(outcome.values, vec!["1"]);

        let err = ctx.run("inline", br#"require("fs")"#).unwrap_err();
        assert!(err.to_string().contains("module 'fs' not found"), "{err}");
    }

    #[test]
    fn test_module_tables_are_read_only() {
        let catalog = CatalogBuilder::<()>::new()
            .module("store", StoreModule::new())
            .build(&())
            .unwrap();
        let mut ctx = context_with(catalog, &PoolConfig::default());
        let err = ctx.run("inline", br#"require("store").get = nil"#).unwrap_err();
        assert!(matches!(err, CoreError::ScriptRuntimeError { .. }));
    }

    #[test]
    fn test_load_and_runtime_errors() {
        let mut ctx = context_with(Catalog::empty(), &PoolConfig::default());

        let err = ctx.run("bad.lua", b"return +").unwrap_err();
        assert!(matches!(err, CoreError::ScriptLoadError { ref chunk, .. } if chunk == "bad.lua"));

        let err = ctx.run("fail.lua", br#"error("nope")"#).unwrap_err();
        match err {
            CoreError::ScriptRuntimeError { chunk, message } => {
                assert_eq!(chunk, "fail.lua");
                assert!(message.contains("nope"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!ctx.is_poisoned());
    }

    #[test]
    fn test_timeout_interrupts_loop() {
        let config = PoolConfig::new()
            .with_execution_timeout(Some(Duration::from_millis(100)))
            .with_hook_interval(1_000);
        let mut ctx = context_with(Catalog::empty(), &config);

        let err = ctx
            .run("spin", b"while true do pcall(function() end) end")
            .unwrap_err();
        assert!(matches!(err, CoreError::ExecutionTimeout { .. }), "{err}");

        // The hook is gone; the context still works.
        assert_eq!(ctx.run("after", b"return 2 + 2").unwrap().values, vec!["4"]);
    }

    #[test]
    fn test_panic_poisons_context() {
        let catalog = CatalogBuilder::<()>::new()
            .module("panicking", Panicking)
            .build(&())
            .unwrap();
        let mut ctx = context_with(catalog, &PoolConfig::default());

        let err = ctx.run("inline", br#"require("panicking").boom()"#).unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert!(ctx.is_poisoned());
        assert_eq!(ctx.discard_reason(&PoolConfig::default()), Some(DiscardReason::Poisoned));
    }

    #[test]
    fn test_memory_limit_poisons_context() {
        let config = PoolConfig::new().with_memory_limit(Some(4 * 1024 * 1024));
        let mut ctx = context_with(Catalog::empty(), &config);
        let err = ctx
            .run("hog", b"local t = {} for i = 1, 1e8 do t[i] = i end")
            .unwrap_err();
        assert!(matches!(err, CoreError::ScriptRuntimeError { .. }));
        assert!(ctx.is_poisoned());
    }

    #[test]
    fn test_run_limit() {
        let config = PoolConfig::new().with_max_runs_per_context(2);
        let mut ctx = context_with(Catalog::empty(), &config);
        ctx.run("one", b"").unwrap();
        assert_eq!(ctx.discard_reason(&config), None);
        ctx.run("two", b"").unwrap();
        assert_eq!(ctx.discard_reason(&config), Some(DiscardReason::RunLimit));
    }

    #[test]
    fn test_binding_failure() {
        let catalog = CatalogBuilder::<()>::new()
            .module("broken", Broken)
            .build(&())
            .unwrap();
        let err = ExecutionContext::new(&catalog, &PoolConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::CatalogBindingFailed { ref namespace, .. } if namespace == "broken"));
    }
}
