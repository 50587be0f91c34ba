//! Pipeline event stream and stage model.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::tl::TranslationStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Validating,
    Unrpa,
    Generating,
    Parsing,
    Translating,
    Saving,
    Completed,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Validating => "validating",
            Stage::Unrpa => "unrpa",
            Stage::Generating => "generating",
            Stage::Parsing => "parsing",
            Stage::Translating => "translating",
            Stage::Saving => "saving",
            Stage::Completed => "completed",
            Stage::Error => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub success: bool,
    pub message: String,
    pub stage: Stage,
    pub stats: Option<TranslationStats>,
    pub output_path: Option<std::path::PathBuf>,
    pub error: Option<String>,
}

impl PipelineResult {
    pub fn failure(stage: Stage, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            error: Some(message.clone()),
            message,
            stage,
            stats: None,
            output_path: None,
        }
    }

    pub fn stopped() -> Self {
        Self {
            success: false,
            message: "stopped by user".to_string(),
            stage: Stage::Idle,
            stats: None,
            output_path: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageChanged {
        stage: Stage,
        message: String,
    },
    ProgressUpdated {
        current: usize,
        total: usize,
        text: String,
    },
    LogMessage {
        level: LogLevel,
        message: String,
    },
    WarningRaised {
        title: String,
        message: String,
    },
    Finished(PipelineResult),
}

const LOG_THROTTLE: Duration = Duration::from_millis(80);

/// Event emitter with log coalescing. Informational messages are limited
/// to one per ~80ms so a fast loop cannot flood the consumer; warnings and
/// errors always go through.
pub struct EventSink {
    sender: Option<mpsc::UnboundedSender<PipelineEvent>>,
    last_log: Mutex<Option<Instant>>,
}

impl EventSink {
    pub fn new(sender: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self {
            sender: Some(sender),
            last_log: Mutex::new(None),
        }
    }

    /// A sink that drops everything, for callers that only want the final
    /// result.
    pub fn disconnected() -> Self {
        Self {
            sender: None,
            last_log: Mutex::new(None),
        }
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    pub fn stage(&self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("[{}] {}", stage.as_str().to_uppercase(), message);
        self.emit(PipelineEvent::StageChanged { stage, message });
    }

    pub fn progress(&self, current: usize, total: usize, text: impl Into<String>) {
        self.emit(PipelineEvent::ProgressUpdated {
            current,
            total,
            text: text.into(),
        });
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Debug => tracing::debug!("{message}"),
        }

        if matches!(level, LogLevel::Info | LogLevel::Debug) {
            let mut last = self.last_log.lock().unwrap();
            if let Some(at) = *last {
                if at.elapsed() < LOG_THROTTLE {
                    return;
                }
            }
            *last = Some(Instant::now());
        }
        self.emit(PipelineEvent::LogMessage { level, message });
    }

    pub fn warn_popup(&self, title: impl Into<String>, message: impl Into<String>) {
        self.emit(PipelineEvent::WarningRaised {
            title: title.into(),
            message: message.into(),
        });
    }

    pub fn finished(&self, result: PipelineResult) {
        self.emit(PipelineEvent::Finished(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_logs_are_throttled_warnings_pass() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);

        for i in 0..10 {
            sink.log(LogLevel::Info, format!("tick {i}"));
        }
        for i in 0..10 {
            sink.log(LogLevel::Warning, format!("warn {i}"));
        }
        drop(sink);

        let mut infos = 0;
        let mut warnings = 0;
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::LogMessage { level, .. } = event {
                match level {
                    LogLevel::Info => infos += 1,
                    LogLevel::Warning => warnings += 1,
                    _ => {}
                }
            }
        }
        assert!(infos < 10, "burst of info logs must be coalesced");
        assert_eq!(warnings, 10, "warnings bypass the throttle");
    }
}
