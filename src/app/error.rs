use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_VALIDATION", message, trace_id)
    }

    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_DEPENDENCY", message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_SYSTEM", message, trace_id)
    }

    pub fn cancelled(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_CANCELLED", message, trace_id)
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == "ERR_CANCELLED"
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}

/// Conditions that abort the process before the console loop starts.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Multiple instances are running of the same process (lock: {})", lock_path.display())]
    AlreadyRunning { lock_path: PathBuf },

    #[error("Failed to find adb files in {}", searched.display())]
    BridgeFilesNotFound { searched: PathBuf },

    #[error("Failed to start adb server: {0}")]
    ServerStart(AppError),

    #[error("Failed to connect adb client: {0}")]
    Connect(AppError),

    #[error("Failed to start device monitor: {0}")]
    Monitor(AppError),

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("Configuration error: {0}")]
    Config(AppError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
