//! Error kinds the pipeline branches on.

use std::time::Duration;
use thiserror::Error;

/// Coarse classification used for step-level retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Cancelled,
    Other,
}

/// Failures of the closed script runtime
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("line {line}: unknown call `{call}`")]
    UnknownCall { line: usize, call: String },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: {call} failed")]
    Primitive {
        line: usize,
        call: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("script cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture cancelled")]
    Cancelled,

    #[error("capture worker is not running")]
    WorkerStopped,
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    #[error("step cancelled")]
    Cancelled,

    #[error("script has no code for step {0}")]
    MissingCode(usize),
}

/// Classify an error by type first, then by message.
pub fn classify_error(error: &anyhow::Error) -> ErrorKind {
    for cause in error.chain() {
        if cause.is::<tokio::time::error::Elapsed>() {
            return ErrorKind::Timeout;
        }
        if let Some(step) = cause.downcast_ref::<StepError>() {
            match step {
                StepError::Timeout(_) => return ErrorKind::Timeout,
                StepError::Cancelled => return ErrorKind::Cancelled,
                StepError::MissingCode(_) => {}
            }
        }
        if matches!(cause.downcast_ref::<ScriptError>(), Some(ScriptError::Cancelled))
            || matches!(cause.downcast_ref::<CaptureError>(), Some(CaptureError::Cancelled))
        {
            return ErrorKind::Cancelled;
        }
    }

    let message = format!("{:#}", error).to_lowercase();
    if message.contains("timeout") || message.contains("timed out") {
        ErrorKind::Timeout
    } else if message.contains("cancelled") || message.contains("canceled") {
        ErrorKind::Cancelled
    } else {
        ErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[tokio::test]
    async fn test_elapsed_is_timeout() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        let error = anyhow::Error::new(elapsed).context("running step 2");
        assert_eq!(classify_error(&error), ErrorKind::Timeout);
    }

    #[test]
    fn test_message_heuristics() {
        assert_eq!(
            classify_error(&anyhow!("Navigation timed out after 30s")),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify_error(&anyhow!("element not found: #go")),
            ErrorKind::Other
        );
        let wrapped = Err::<(), _>(anyhow!("waitFor: Timeout waiting for #list"))
            .context("line 3")
            .unwrap_err();
        assert_eq!(classify_error(&wrapped), ErrorKind::Timeout);
    }

    #[test]
    fn test_typed_errors() {
        let primitive = ScriptError::Primitive {
            line: 4,
            call: "page.waitFor".to_string(),
            source: anyhow::Error::new(StepError::Timeout(Duration::from_secs(1))),
        };
        assert_eq!(classify_error(&anyhow::Error::new(primitive)), ErrorKind::Timeout);
        assert_eq!(
            classify_error(&anyhow::Error::new(ScriptError::Cancelled)),
            ErrorKind::Cancelled
        );
        let unknown = ScriptError::UnknownCall {
            line: 1,
            call: "page.evaluate".to_string(),
        };
        assert_eq!(unknown.to_string(), "line 1: unknown call `page.evaluate`");
        assert_eq!(classify_error(&anyhow::Error::new(unknown)), ErrorKind::Other);
    }
}
