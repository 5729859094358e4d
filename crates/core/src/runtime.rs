//! Process-wide initialization and runtime settings
//!
//! [`ProcessState`] is created once per process. It initializes the engine,
//! installs the [`LoggerBridge`] as the global `tracing` subscriber (unless the
//! host already installed one) and holds the log level, logger and block size
//! limit that every handle reads at create and deserialize time.

use crate::logging::{LogLevel, Logger, LoggerBridge};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use tracing_subscriber::layer::SubscriberExt;
use vecbridge_engine::{EngineOptions, DEFAULT_BLOCK_SIZE_LIMIT};

static STATE: OnceLock<ProcessState> = OnceLock::new();

/// Startup configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub log_level: LogLevel,
    /// Upper bound in bytes for one engine storage block
    pub block_size_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            block_size_limit: DEFAULT_BLOCK_SIZE_LIMIT,
        }
    }
}

impl RuntimeConfig {
    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    pub fn with_block_size_limit(mut self, block_size_limit: usize) -> Self {
        self.block_size_limit = block_size_limit;
        self
    }
}

/// Mutable part of the process state
pub(crate) struct RuntimeSettings {
    pub(crate) config: RuntimeConfig,
    pub(crate) logger: Option<Arc<dyn Logger>>,
}

impl RuntimeSettings {
    pub(crate) fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            logger: None,
        }
    }
}

pub struct ProcessState {
    settings: Arc<RwLock<RuntimeSettings>>,
    engine_ready: bool,
    bridge_installed: bool,
}

impl ProcessState {
    /// Initialize with `config`; later calls return the existing state unchanged
    pub fn init(config: RuntimeConfig) -> &'static ProcessState {
        STATE.get_or_init(|| {
            let settings = Arc::new(RwLock::new(RuntimeSettings::new(config)));
            let subscriber =
                tracing_subscriber::registry().with(LoggerBridge::new(Arc::clone(&settings)));
            let bridge_installed = tracing::subscriber::set_global_default(subscriber).is_ok();
            let engine_ready = vecbridge_engine::init();
            tracing::debug!(engine_ready, bridge_installed, "process state initialized");
            ProcessState {
                settings,
                engine_ready,
                bridge_installed,
            }
        })
    }

    /// The process state, initializing with defaults on first use
    pub fn get() -> &'static ProcessState {
        Self::init(RuntimeConfig::default())
    }

    pub fn is_initialized(&self) -> bool {
        self.engine_ready
    }

    /// Whether events reach the installed logger (false when the host owns the
    /// global subscriber)
    pub fn bridge_installed(&self) -> bool {
        self.bridge_installed
    }

    pub fn log_level(&self) -> LogLevel {
        self.settings.read().config.log_level
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.settings.write().config.log_level = level;
    }

    /// Install `logger` and reset the level to `Debug`
    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        let mut settings = self.settings.write();
        settings.logger = Some(logger);
        settings.config.log_level = LogLevel::Debug;
    }

    pub fn clear_logger(&self) {
        self.settings.write().logger = None;
    }

    pub fn logger(&self) -> Option<Arc<dyn Logger>> {
        self.settings.read().logger.clone()
    }

    pub fn block_size_limit(&self) -> usize {
        self.settings.read().config.block_size_limit
    }

    pub fn set_block_size_limit(&self, limit: usize) {
        self.settings.write().config.block_size_limit = limit;
    }

    /// Options handed to the engine factory
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions::default().with_block_size_limit(self.block_size_limit())
    }
}

/// One-time library initialization; true when the engine is ready
pub fn init() -> bool {
    tracing::debug!("TRACE LOG[init]:");
    let ready = ProcessState::get().is_initialized();
    if ready {
        tracing::debug!("   init success");
    } else {
        tracing::error!("   init failed");
    }
    ready
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl Logger for Silent {
        fn log(&self, _level: LogLevel, _message: &str) {}
    }

    #[test]
    fn test_config_builders() {
        let config = RuntimeConfig::default()
            .with_log_level(LogLevel::Warn)
            .with_block_size_limit(4096);
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.block_size_limit, 4096);
        assert_eq!(RuntimeConfig::default().block_size_limit, DEFAULT_BLOCK_SIZE_LIMIT);
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init());
        let first = ProcessState::get() as *const ProcessState;
        let second = ProcessState::init(RuntimeConfig::default()) as *const ProcessState;
        assert_eq!(first, second);
    }

    // Touches global state; keep every mutation in this single test.
    #[test]
    fn test_settings_roundtrip() {
        let state = ProcessState::get();
        let limit = state.block_size_limit();

        state.set_block_size_limit(1 << 20);
        assert_eq!(state.engine_options().block_size_limit, 1 << 20);
        state.set_block_size_limit(limit);

        state.set_log_level(LogLevel::Error);
        assert_eq!(state.log_level(), LogLevel::Error);
        state.set_logger(Arc::new(Silent));
        assert_eq!(state.log_level(), LogLevel::Debug);
        assert!(state.logger().is_some());
        state.clear_logger();
        assert!(state.logger().is_none());
    }
}
