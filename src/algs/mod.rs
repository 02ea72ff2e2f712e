//! Message passing backends and wire helpers.

pub mod communicator;
pub mod wire;
