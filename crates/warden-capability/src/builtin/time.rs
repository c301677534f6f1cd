//! `time` module: wall clock, monotonic clock and sleeping.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::DateTime;
use mlua::{Lua, Table};

use crate::capability::CapabilityModule;

/// Longest single `time.sleep` a guest may request.
const MAX_SLEEP: Duration = Duration::from_secs(60);

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Provides `time.now`, `time.unix`, `time.millis`, `time.monotonic`,
/// `time.sleep` and `time.format`.
#[derive(Debug)]
pub struct TimeModule {
    origin: Instant,
}

impl Default for TimeModule {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeModule {
    /// Create the module. `monotonic()` counts from this moment.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl CapabilityModule for TimeModule {
    fn name(&self) -> &str {
        "Time"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        let origin = self.origin;

        module.set(
            "now",
            lua.create_function(|_, ()| Ok(since_epoch().as_secs_f64()))?,
        )?;
        module.set(
            "unix",
            lua.create_function(|_, ()| Ok(since_epoch().as_secs() as i64))?,
        )?;
        module.set(
            "millis",
            lua.create_function(|_, ()| Ok(since_epoch().as_millis() as i64))?,
        )?;
        module.set(
            "monotonic",
            lua.create_function(move |_, ()| Ok(origin.elapsed().as_secs_f64()))?,
        )?;
        module.set(
            "sleep",
            lua.create_function(|_, seconds: f64| {
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(mlua::Error::runtime("sleep duration must be >= 0"));
                }
                std::thread::sleep(Duration::from_secs_f64(seconds).min(MAX_SLEEP));
                Ok(())
            })?,
        )?;
        module.set(
            "format",
            lua.create_function(|_, (ts, fmt): (Option<i64>, Option<String>)| {
                let ts = ts.unwrap_or_else(|| since_epoch().as_secs() as i64);
                let fmt = fmt.unwrap_or_else(|| "%Y-%m-%d %H:%M:%S".to_string());
                let moment = DateTime::from_timestamp(ts, 0)
                    .ok_or_else(|| mlua::Error::runtime(format!("timestamp out of range: {ts}")))?;
                Ok(moment.format(&fmt).to_string())
            })?,
        )?;

        Ok(module)
    }
}
