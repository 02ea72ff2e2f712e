//! CommError: unified error type for ghostcomm public APIs.
//!
//! Every condition reported here is fatal for the whole process group: the
//! communication layer is a tightly synchronized collective algorithm, so a
//! caller receiving an `Err` is expected to abort all ranks (see
//! [`Communicator::abort`](crate::algs::communicator::Communicator::abort)).

use thiserror::Error;

/// Unified error type for ghostcomm operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommError {
    /// The ghost cutoff is longer than the periodic box along `axis`.
    #[error("communication cutoff {cutoff} exceeds periodic box length {period} along axis {axis}")]
    CutoffExceedsPeriod {
        axis: usize,
        cutoff: f64,
        period: f64,
    },
    /// Tiled communication was requested for a triclinic box.
    #[error("tiled communication cannot be used with a triclinic box")]
    TriclinicUnsupported,
    /// Tiled communication was requested with per-type (multi) cutoffs.
    #[error("tiled communication cannot be used with multi-mode cutoffs")]
    MultiModeUnsupported,
    /// Only 2-d and 3-d domains are supported.
    #[error("invalid domain dimension {0} (expected 2 or 3)")]
    InvalidDimension(usize),
    /// Rejected configuration value.
    #[error("invalid communication config: {0}")]
    InvalidConfig(String),
    /// Partition descriptor is inconsistent (gaps, overlaps, bad sizes).
    #[error("invalid partition: {0}")]
    InvalidPartition(String),
    /// A ghost slab did not start at any face the brick walk knows about.
    #[error("box drop mismatch along axis {axis}: slab does not abut local or global box")]
    BoxDropMismatch { axis: usize },
    /// A rank named by the schedule is not part of the processor layout.
    #[error("owner lookup failed along axis {axis}: rank {rank} is not part of the layout")]
    OwnerNotFound { axis: usize, rank: usize },
    /// Point-to-point communication with `neighbor` failed.
    #[error("communication error with rank {neighbor}: {reason}")]
    Transport { neighbor: usize, reason: String },
    /// A message arrived with an unexpected byte length.
    #[error("message from rank {neighbor}: expected {expected} bytes, got {got}")]
    MessageSize {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Global atom-count reconciliation found a different total.
    #[error("atom count mismatch: expected {expected}, found {found}")]
    AtomCountMismatch { expected: u64, found: u64 },
}

impl CommError {
    pub(crate) fn transport(neighbor: usize, reason: impl Into<String>) -> Self {
        CommError::Transport {
            neighbor,
            reason: reason.into(),
        }
    }
}
