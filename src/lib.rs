#![cfg_attr(docsrs, feature(doc_cfg))]
//! # ghostcomm
//!
//! ghostcomm is the halo communication layer of a spatially decomposed
//! particle simulation. Every rank owns one rectangular sub-box of the global
//! box (a regular brick grid or a recursive-bisection tiling) together with
//! the atoms inside it, and keeps copies of the atoms within a cutoff of its
//! sub-box as ghosts.
//!
//! ## Features
//! - Geometric overlap queries for brick and RCB layouts ([`overlap`])
//! - Swap schedules with periodic images and corner coverage ([`swap`])
//! - `exchange`, `borders`, `forward_comm` and `reverse_comm` ([`tiled`])
//! - Collaborator payloads riding on the same schedule ([`hooks`])
//! - Pluggable communication backends: serial, in-process threads, MPI
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! ghostcomm = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "check-invariants"]
//! ```
//!
//! A reneighboring step runs `setup`, `exchange` and `borders`; ordinary
//! steps only run `forward_comm` before the force computation and
//! `reverse_comm` after it. Any `Err` returned by these calls is fatal for the
//! whole process group.

pub mod algs;
pub mod atom;
pub mod buffers;
pub mod comm_error;
pub mod config;
pub mod debug_invariants;
pub mod geometry;
pub mod hooks;
pub mod overlap;
pub mod swap;
pub mod tiled;

pub use comm_error::CommError;
pub use debug_invariants::DebugInvariants;
pub use tiled::TiledComm;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm, Wait};
    pub use crate::atom::{AtomVec, Atoms, PbcImage, PbcShift};
    pub use crate::comm_error::CommError;
    pub use crate::config::{BufferPolicy, CommConfig, CommMode, Layout};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::geometry::{Bounds, Domain, ProcGrid, RcbInfo, RcbPartition};
    pub use crate::hooks::{CommHook, HookKind, PerAtomArray};
    pub use crate::overlap::OverlapStrategy;
    pub use crate::swap::SwapPlan;
    pub use crate::tiled::TiledComm;
}
