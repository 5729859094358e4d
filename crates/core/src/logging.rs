//! Pluggable logger and the tracing bridge that feeds it
//!
//! Every crate in the workspace logs through `tracing`. [`LoggerBridge`] is a
//! `tracing-subscriber` layer that forwards events at or above the configured
//! [`LogLevel`] to the caller's [`Logger`].

use crate::runtime::RuntimeSettings;
use parking_lot::RwLock;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Six-level severity scheme plus `Off`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
    Off = 6,
}

impl LogLevel {
    /// Numbers outside 0..=6 clamp to `Off`
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            5 => LogLevel::Critical,
            _ => LogLevel::Off,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    fn from_tracing(level: &Level) -> Self {
        if *level == Level::TRACE {
            LogLevel::Trace
        } else if *level == Level::DEBUG {
            LogLevel::Debug
        } else if *level == Level::INFO {
            LogLevel::Info
        } else if *level == Level::WARN {
            LogLevel::Warn
        } else {
            LogLevel::Error
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
            LogLevel::Off => "off",
        };
        f.write_str(name)
    }
}

/// Destination for log lines
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message)
    }

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message)
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message)
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message)
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message)
    }

    fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message)
    }
}

/// `tracing` layer forwarding events to the installed [`Logger`]
pub struct LoggerBridge {
    settings: Arc<RwLock<RuntimeSettings>>,
}

impl LoggerBridge {
    pub(crate) fn new(settings: Arc<RwLock<RuntimeSettings>>) -> Self {
        Self { settings }
    }
}

impl<S: Subscriber> Layer<S> for LoggerBridge {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = LogLevel::from_tracing(event.metadata().level());
        let logger = {
            let settings = self.settings.read();
            if level < settings.config.log_level {
                return;
            }
            match &settings.logger {
                Some(logger) => Arc::clone(logger),
                None => return,
            }
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        logger.log(level, &visitor.finish());
    }
}

/// Renders `message` first, then remaining fields as `key=value`
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={:?}", field.name(), value);
    }
}

/// Logs `"<name> cost <t>ms"` (or seconds) at debug level on drop when the
/// elapsed time exceeds the threshold.
pub struct TaskTimer {
    name: &'static str,
    threshold: Duration,
    start: Instant,
}

impl TaskTimer {
    pub fn new(name: &'static str) -> Self {
        Self::with_threshold(name, Duration::ZERO)
    }

    pub fn with_threshold(name: &'static str, threshold: Duration) -> Self {
        Self {
            name,
            threshold,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TaskTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if elapsed <= self.threshold {
            return;
        }
        let ms = elapsed.as_secs_f64() * 1000.0;
        if ms >= 1000.0 {
            tracing::debug!("  {} cost {:.3}s", self.name, ms / 1000.0);
        } else {
            tracing::debug!("  {} cost {:.3}ms", self.name, ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeConfig;
    use parking_lot::Mutex;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Default)]
    struct Capture {
        lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl Logger for Capture {
        fn log(&self, level: LogLevel, message: &str) {
            self.lines.lock().push((level, message.to_string()));
        }
    }

    fn settings_with(capture: &Arc<Capture>, level: LogLevel) -> Arc<RwLock<RuntimeSettings>> {
        let mut settings = RuntimeSettings::new(RuntimeConfig::default().with_log_level(level));
        settings.logger = Some(Arc::clone(capture) as Arc<dyn Logger>);
        Arc::new(RwLock::new(settings))
    }

    #[test]
    fn test_level_from_raw() {
        assert_eq!(LogLevel::from_raw(0), LogLevel::Trace);
        assert_eq!(LogLevel::from_raw(5), LogLevel::Critical);
        assert_eq!(LogLevel::from_raw(6), LogLevel::Off);
        assert_eq!(LogLevel::from_raw(42), LogLevel::Off);
        assert_eq!(LogLevel::from_raw(-1), LogLevel::Off);
        assert!(LogLevel::Debug < LogLevel::Warn);
    }

    #[test]
    fn test_bridge_forwards_and_filters() {
        let capture = Arc::new(Capture::default());
        let settings = settings_with(&capture, LogLevel::Info);
        let subscriber = tracing_subscriber::registry().with(LoggerBridge::new(settings));

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("hidden");
            tracing::info!(count = 3, "built");
            tracing::error!("failed");
        });

        let lines = capture.lines.lock();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], (LogLevel::Info, "built count=3".to_string()));
        assert_eq!(lines[1], (LogLevel::Error, "failed".to_string()));
    }

    #[test]
    fn test_bridge_without_logger_is_inert() {
        let settings = Arc::new(RwLock::new(RuntimeSettings::new(RuntimeConfig::default())));
        let subscriber = tracing_subscriber::registry().with(LoggerBridge::new(settings));
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("nobody listens");
        });
    }

    #[test]
    fn test_task_timer_logs_cost() {
        let capture = Arc::new(Capture::default());
        let settings = settings_with(&capture, LogLevel::Trace);
        let subscriber = tracing_subscriber::registry().with(LoggerBridge::new(settings));

        tracing::subscriber::with_default(subscriber, || {
            let timer = TaskTimer::new("build index");
            std::thread::sleep(Duration::from_millis(2));
            assert!(timer.elapsed() >= Duration::from_millis(2));
        });

        let lines = capture.lines.lock();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].1.starts_with("  build index cost "));
        assert!(lines[0].1.ends_with("ms"));
    }

    #[test]
    fn test_logger_convenience_methods() {
        let capture = Capture::default();
        capture.critical("disk full");
        capture.trace("step");
        let lines = capture.lines.lock();
        assert_eq!(lines[0].0, LogLevel::Critical);
        assert_eq!(lines[1], (LogLevel::Trace, "step".to_string()));
    }
}
