use std::io;
use std::sync::Arc;
use std::time::Duration;

use netgauge_summariser::SchemaError;
use netgauge_summary_model::{MeasurementSet, ToolKind};

use crate::locator::ArtifactNotFound;
use crate::process::LaunchError;

/// Why a run did not produce a [MeasurementSet].
///
/// Cloneable so that every observer of a handle sees the same outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("Process exited with {}", describe_exit(*code))]
    ProcessExit {
        code: Option<i32>,
        /// Whatever could be read from the artifact the process left behind.
        partial: Option<MeasurementSet>,
    },
    #[error("Process did not exit within {0:?} and was killed")]
    TimedOut(Duration),
    #[error(transparent)]
    ArtifactNotFound(#[from] ArtifactNotFound),
    #[error("Unsupported result document: {kind}")]
    UnsupportedSchema { kind: String },
    #[error("Failed to decode result document: {0}")]
    Decode(String),
    #[error("Run was cancelled")]
    Cancelled,
    #[error("{tool} does not write a result file")]
    NoArtifact { tool: ToolKind },
    #[error("Failed to supervise process: {0}")]
    Io(Arc<io::Error>),
}

impl RunError {
    /// Cancellation is not a failure of the measurement.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
    }
}

impl From<SchemaError> for RunError {
    fn from(value: SchemaError) -> Self {
        match value {
            SchemaError::UnsupportedSchema { kind, .. } => RunError::UnsupportedSchema { kind },
            other => RunError::Decode(other.to_string()),
        }
    }
}

impl From<io::Error> for RunError {
    fn from(value: io::Error) -> Self {
        RunError::Io(Arc::new(value))
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_errors_keep_the_document_kind() {
        let err: RunError = SchemaError::UnsupportedSchema {
            family: None,
            kind: "object with keys [foo]".to_string(),
        }
        .into();

        match err {
            RunError::UnsupportedSchema { kind } => assert_eq!(kind, "object with keys [foo]"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn exit_messages() {
        let err = RunError::ProcessExit {
            code: Some(2),
            partial: None,
        };
        assert_eq!(err.to_string(), "Process exited with code 2");

        let err = RunError::ProcessExit {
            code: None,
            partial: None,
        };
        assert_eq!(err.to_string(), "Process exited with a signal");
        assert!(!err.is_cancelled());
        assert!(RunError::Cancelled.is_cancelled());
    }
}
