//! Error types for topology editing and applying

use thiserror::Error;

use crate::backend::{ConfigStatus, CrtcId, OutputId};
use crate::mode::{ModeId, Rotation};

#[derive(Debug, Error)]
pub enum TopologyError {
    /// The server handle is unusable; there is nothing to configure
    #[error("failed to read display configuration from the server")]
    Discovery(#[source] anyhow::Error),

    #[error("unknown output {0}")]
    UnknownOutput(OutputId),

    #[error("unknown controller {0}")]
    UnknownController(CrtcId),

    #[error("unknown mode {0}")]
    UnknownMode(ModeId),

    #[error("controller {crtc} does not support rotation {rotation}")]
    UnsupportedRotation { crtc: CrtcId, rotation: Rotation },

    #[error("no usable controller for output {output}")]
    NoUsableController { output: String },

    #[error("display server request failed")]
    Transport(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Width,
    Height,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Width => f.write_str("width"),
            Axis::Height => f.write_str("height"),
        }
    }
}

/// Requested layout is larger than the server allows. Nothing was changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("requested screen {axis} {requested} exceeds the maximum {max}")]
pub struct OversizeError {
    pub axis: Axis,
    pub requested: u32,
    pub max: u16,
}

/// Why a single controller's commit did not take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Status(ConfigStatus),
    Transport(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Status(status) => write!(f, "server replied {}", status),
            FailureReason::Transport(err) => f.write_str(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerFailure {
    pub crtc: CrtcId,
    pub reason: FailureReason,
}

impl std::fmt::Display for ControllerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "controller {}: {}", self.crtc, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Oversize(#[from] OversizeError),

    /// A controller that had to be switched off before shrinking the screen
    /// refused; the screen size was left alone
    #[error("could not disable {0} before resizing the screen")]
    ShrinkRejected(ControllerFailure),

    #[error("display server request failed")]
    Transport(#[from] anyhow::Error),

    /// Every controller was attempted; these ones failed
    #[error("{} controller(s) rejected their configuration", .0.len())]
    Controllers(Vec<ControllerFailure>),
}

impl ApplyError {
    /// Per-controller failures, if this is a partial-success outcome
    pub fn controller_failures(&self) -> &[ControllerFailure] {
        match self {
            ApplyError::Controllers(failures) => failures,
            _ => &[],
        }
    }
}
