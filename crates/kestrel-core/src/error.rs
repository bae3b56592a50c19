use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy for launch, discovery, and session failures.
///
/// Every variant maps to a stable code string (see [`Error::code`]) so
/// callers can branch on failure class without string-matching messages.
#[derive(Error, Debug)]
pub enum Error {
    /// The target process could not be started, or could not be terminated.
    #[error("spawn/terminate failure: {detail}")]
    Spawn { detail: String },

    /// The process started but died before its debug endpoint came up.
    #[error("process exited before becoming reachable (exit: {exit_code:?}, signal: {signal:?})")]
    ExitedEarly {
        exit_code: Option<i32>,
        signal: Option<i32>,
        /// Path to the captured stderr log, when one was written.
        log_path: Option<PathBuf>,
    },

    /// The debug endpoint never became reachable within the budget.
    #[error("debug endpoint on port {port} not reachable within {timeout_ms}ms (last error: {last_error})")]
    CdpTimeout {
        port: u16,
        timeout_ms: u64,
        last_error: String,
    },

    /// No open page/window matched the given hints.
    #[error("no window matched: {hint}")]
    NoPage { hint: String },

    /// A bounded wait (window, text, bridge-ready) expired.
    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    WaitTimeout { what: String, timeout_ms: u64 },

    /// Failure reported by the control-protocol client.
    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for this failure class.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Spawn { .. } => "E_SPAWN",
            Error::ExitedEarly { .. } => "E_EXIT_EARLY",
            Error::CdpTimeout { .. } => "E_CDP_TIMEOUT",
            Error::NoPage { .. } => "E_NO_PAGE",
            Error::WaitTimeout { .. } => "E_WAIT_TIMEOUT",
            Error::Cdp(_) | Error::Io(_) | Error::Internal(_) => "E_INTERNAL",
        }
    }

    pub fn spawn(detail: impl Into<String>) -> Self {
        Error::Spawn {
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Error::Internal(detail.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("JSON: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::spawn("x").code(), "E_SPAWN");
        assert_eq!(
            Error::ExitedEarly {
                exit_code: Some(1),
                signal: None,
                log_path: None
            }
            .code(),
            "E_EXIT_EARLY"
        );
        assert_eq!(
            Error::CdpTimeout {
                port: 9222,
                timeout_ms: 200,
                last_error: "refused".into()
            }
            .code(),
            "E_CDP_TIMEOUT"
        );
        assert_eq!(Error::NoPage { hint: "-".into() }.code(), "E_NO_PAGE");
        assert_eq!(
            Error::WaitTimeout {
                what: "window".into(),
                timeout_ms: 1
            }
            .code(),
            "E_WAIT_TIMEOUT"
        );
        assert_eq!(Error::Internal("x".into()).code(), "E_INTERNAL");
    }

    #[test]
    fn test_exit_early_carries_log_path() {
        let err = Error::ExitedEarly {
            exit_code: Some(127),
            signal: None,
            log_path: Some(PathBuf::from("/tmp/run/stderr.log")),
        };
        let msg = err.to_string();
        assert!(msg.contains("127"));
    }
}
