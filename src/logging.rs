use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use parking_lot::RwLock;

/// Embedders receive engine logs by registering sinks; the engine itself
/// only emits through the `log` facade. Each sink chooses its own verbosity
/// ceiling, so a host can collect traces while another sink only sees
/// warnings.
pub trait LogSink: Send + Sync + 'static {
    fn log(&self, record: &log::Record<'_>);
}

struct Registration {
    sink: Arc<dyn LogSink>,
    max_level: log::LevelFilter,
}

static SINKS: once_cell::sync::Lazy<RwLock<HashMap<String, Registration>>> =
    once_cell::sync::Lazy::new(|| RwLock::new(HashMap::new()));
static LOGGER: EngineLogger = EngineLogger;
static LOGGER_ONCE: Once = Once::new();
static LOGGER_INSTALLED: AtomicBool = AtomicBool::new(false);

struct EngineLogger;

impl log::Log for EngineLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        SINKS
            .read()
            .values()
            .any(|r| r.max_level >= metadata.level())
    }

    fn log(&self, record: &log::Record<'_>) {
        let sinks = SINKS.read();
        for r in sinks.values() {
            if r.max_level >= record.level() {
                r.sink.log(record);
            }
        }
    }

    fn flush(&self) {}
}

/// Install the engine logger as the process logger. Safe to call more than
/// once. Returns false when the embedder installed its own logger first; in
/// that case registered sinks receive nothing and the embedder's logger
/// carries the engine's records instead.
pub fn ensure_logger() -> bool {
    LOGGER_ONCE.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
            LOGGER_INSTALLED.store(true, Ordering::Relaxed);
        }
    });
    LOGGER_INSTALLED.load(Ordering::Relaxed)
}

/// Register `sink` under `name`, receiving records up to `max_level`.
/// Returns false when a sink with that name was already registered and got
/// replaced.
pub fn register_sink(
    name: impl Into<String>,
    sink: Arc<dyn LogSink>,
    max_level: log::LevelFilter,
) -> bool {
    SINKS
        .write()
        .insert(name.into(), Registration { sink, max_level })
        .is_none()
}

/// Remove the sink registered under `name`. Returns false when no such sink
/// existed.
pub fn remove_sink(name: &str) -> bool {
    SINKS.write().remove(name).is_some()
}
