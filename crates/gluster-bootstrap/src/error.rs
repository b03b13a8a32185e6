use crate::topology::TopologyError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("volume {volume}: {source}. Skipping...")]
    InvalidTopology {
        volume: String,
        #[source]
        source: TopologyError,
    },

    #[error("volume {volume}: no bricks registered by peer(s) {}", .missing.join(", "))]
    MissingPeerBricks { volume: String, missing: Vec<String> },

    #[error("volume {volume}: brick path {path} is not provisioned")]
    BrickPathMissing { volume: String, path: String },

    #[error("volume {volume}: membership step aborted: {reason}")]
    Membership { volume: String, reason: String },

    #[error("volume {volume}: {reason}")]
    Operational { volume: String, reason: String },

    #[error("failed to resolve local node identity: {0}")]
    Identity(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("brick registry error: {0}")]
    Registry(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Expected during partial rollout; the volume is retried next run.
    Skip,
    /// Network or remote failure; the membership step is retried next run.
    Transient,
    /// Genuine operational fault for the volume.
    Fatal,
}

impl ReconcileError {
    pub fn severity(&self) -> Severity {
        match self {
            ReconcileError::InvalidTopology { .. }
            | ReconcileError::MissingPeerBricks { .. }
            | ReconcileError::BrickPathMissing { .. } => Severity::Skip,
            ReconcileError::Membership { .. } => Severity::Transient,
            ReconcileError::Operational { .. }
            | ReconcileError::Identity(_)
            | ReconcileError::Config(_)
            | ReconcileError::Registry(_)
            | ReconcileError::Io(_) => Severity::Fatal,
        }
    }

    pub(crate) fn operational(volume: &str, reason: impl Into<String>) -> Self {
        ReconcileError::Operational {
            volume: volume.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn membership(volume: &str, reason: impl Into<String>) -> Self {
        ReconcileError::Membership {
            volume: volume.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ReconcileError> for io::Error {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::Io(e) => e,
            e => io::Error::other(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classification() {
        let skip = ReconcileError::InvalidTopology {
            volume: "gv0".to_string(),
            source: TopologyError::NotMultiple {
                brick_count: 6,
                replica_count: 4,
            },
        };
        assert_eq!(skip.severity(), Severity::Skip);
        assert_eq!(
            ReconcileError::membership("gv0", "ssh timed out").severity(),
            Severity::Transient
        );
        assert_eq!(
            ReconcileError::operational("gv0", "start failed").severity(),
            Severity::Fatal
        );
    }

    #[test]
    fn test_messages_name_volume_and_precondition() {
        let err = ReconcileError::InvalidTopology {
            volume: "gv0".to_string(),
            source: TopologyError::NotMultiple {
                brick_count: 6,
                replica_count: 4,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("gv0"));
        assert!(msg.contains("6 needs to be a multiple of 4"));

        let err = ReconcileError::MissingPeerBricks {
            volume: "gv1".to_string(),
            missing: vec!["gfs2".to_string(), "gfs3".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "volume gv1: no bricks registered by peer(s) gfs2, gfs3"
        );
    }
}
