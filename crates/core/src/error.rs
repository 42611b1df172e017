//! Error taxonomy shared by every converge crate.

use std::ops::Range;
use std::time::Duration;

use crate::policy::RemoteError;

/// Every failure the engine can surface. Nothing is swallowed: each variant
/// carries enough context (what was being done, last observed state, item
/// ranges) to log or show to an operator.
#[derive(Debug, thiserror::Error)]
pub enum ConvergeError {
    /// The remote rejected a request with an error classified as fatal.
    #[error("{what}: {source}")]
    FatalRemote {
        what: String,
        #[source]
        source: RemoteError,
    },

    /// The deadline passed while the remote was still transient (or still
    /// returning retryable errors).
    #[error("{what}: timed out after {}ms (last state: {}) {detail}", .elapsed.as_millis(), .last_state.as_deref().unwrap_or("none"))]
    ConvergenceTimeout {
        what: String,
        elapsed: Duration,
        last_state: Option<String>,
        detail: String,
        last_error: Option<RemoteError>,
    },

    /// The remote reported a terminal failure state.
    #[error("{what}: reached failure state {state}: {detail}")]
    ConvergenceFailure {
        what: String,
        state: String,
        detail: String,
    },

    #[error("malformed identity {id:?}: expected {expected} parts, found {found}")]
    MalformedIdentity {
        id: String,
        expected: usize,
        found: usize,
    },

    #[error("identity part {part:?} contains separator {separator:?}")]
    InvalidIdentityPart { part: String, separator: char },

    /// A decoded part has the right position but a value the kind does not know.
    #[error("identity {id:?}: unexpected part {part:?} (expected {expected})")]
    UnexpectedIdentityPart {
        id: String,
        part: String,
        expected: &'static str,
    },

    /// A batched apply failed part way. Items in `applied` are live on the
    /// remote and are not rolled back.
    #[error("batch failed for items {}..{} (items {}..{} applied): {source}", .failed.start, .failed.end, .applied.start, .applied.end)]
    PartialBatchFailure {
        applied: Range<usize>,
        failed: Range<usize>,
        #[source]
        source: Box<ConvergeError>,
    },

    #[error("duplicate key {key} in declared set")]
    DuplicateKey { key: String },

    #[error("{what}: cancelled")]
    Cancelled { what: String },

    /// Context wrapper added by the orchestrator.
    #[error("{kind} {identity}: {source}")]
    Resource {
        kind: &'static str,
        identity: String,
        #[source]
        source: Box<ConvergeError>,
    },
}

pub type ConvergeResult<T> = Result<T, ConvergeError>;

impl ConvergeError {
    /// Innermost error, looking through `Resource` context wrappers.
    pub fn root(&self) -> &ConvergeError {
        match self {
            ConvergeError::Resource { source, .. } => source.root(),
            other => other,
        }
    }

    /// Wrap with resource context. Already-wrapped errors are left alone so the
    /// outermost context is the one closest to the failure.
    pub fn in_resource(self, kind: &'static str, identity: impl Into<String>) -> Self {
        match self {
            e @ ConvergeError::Resource { .. } => e,
            e => ConvergeError::Resource { kind, identity: identity.into(), source: Box::new(e) },
        }
    }

    /// The remote error behind a fatal remote failure.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self.root() {
            ConvergeError::FatalRemote { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn remote_code(&self) -> Option<&str> { self.remote().map(|r| r.code.as_str()) }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), ConvergeError::Cancelled { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), ConvergeError::ConvergenceTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_and_code_look_through_context() {
        let e = ConvergeError::FatalRemote {
            what: "delete cluster".into(),
            source: RemoteError::new("InternalError.ClusterNotFound", "gone"),
        }
        .in_resource("cluster", "cls-1")
        .in_resource("ignored", "outer");
        match &e {
            ConvergeError::Resource { kind, identity, .. } => {
                assert_eq!(*kind, "cluster");
                assert_eq!(identity, "cls-1");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(e.remote_code(), Some("InternalError.ClusterNotFound"));
        assert!(!e.is_timeout());
        assert!(!e.is_cancelled());
    }

    #[test]
    fn timeout_message_carries_last_state() {
        let e = ConvergeError::ConvergenceTimeout {
            what: "wait cluster ready".into(),
            elapsed: Duration::from_millis(1500),
            last_state: Some("Creating".into()),
            detail: "3 masters pending".into(),
            last_error: None,
        };
        let msg = e.to_string();
        assert!(msg.contains("1500ms"), "msg={}", msg);
        assert!(msg.contains("Creating"), "msg={}", msg);
        assert!(e.is_timeout());
    }

    #[test]
    fn partial_batch_message_names_ranges() {
        let e = ConvergeError::PartialBatchFailure {
            applied: 0..100,
            failed: 100..200,
            source: Box::new(ConvergeError::Cancelled { what: "grant".into() }),
        };
        let msg = e.to_string();
        assert!(msg.contains("100..200"), "msg={}", msg);
        assert!(msg.contains("0..100"), "msg={}", msg);
    }
}
