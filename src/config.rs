//! Communication settings.
//!
//! `CommConfig` is plain serde data so the surrounding application can load it
//! from whatever input format it uses; every field has a default.

use serde::{Deserialize, Serialize};

use crate::comm_error::CommError;
use crate::geometry::Domain;

/// Cutoff mode: one cutoff for all atom types, or one per type.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommMode {
    #[default]
    Single,
    Multi,
}

/// How sub-boxes are laid out across ranks.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Regular brick grid with equal splits.
    #[default]
    Uniform,
    /// Brick grid with arbitrary split fractions per axis.
    NonUniform,
    /// Recursive coordinate bisection tiles.
    Tiled,
}

impl Layout {
    pub fn is_tiled(self) -> bool {
        matches!(self, Layout::Tiled)
    }
}

/// Growth policy of the flat send/recv buffers.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPolicy {
    /// Multiplicative growth factor applied to the requested size.
    pub factor: f64,
    /// Initial capacity (in doubles).
    pub min: usize,
    /// Slack kept past `maxsend` so one exchange record always fits.
    pub extra: usize,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            factor: 1.5,
            min: 1000,
            extra: 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    /// Neighbor-list cutoff (force cutoff plus skin).
    pub neighbor_cutoff: f64,
    /// User-requested minimum ghost cutoff.
    pub cutghost_user: f64,
    pub mode: CommMode,
    pub layout: Layout,
    /// Ghost atoms also carry velocities.
    pub ghost_velocity: bool,
    /// Newton's third law across ranks: forces on ghosts are reverse-communicated.
    pub newton: bool,
    pub buffer: BufferPolicy,
    /// Fraction of the sub-box length a boundary-ambiguous point is nudged by.
    pub point_drop_epsilon: f64,
    /// Re-resolves allowed for a boundary-ambiguous point.
    pub point_drop_retries: usize,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            neighbor_cutoff: 0.0,
            cutghost_user: 0.0,
            mode: CommMode::Single,
            layout: Layout::Uniform,
            ghost_velocity: false,
            newton: true,
            buffer: BufferPolicy::default(),
            point_drop_epsilon: 1.0e-6,
            point_drop_retries: 2,
        }
    }
}

impl CommConfig {
    /// Config with a single ghost cutoff.
    pub fn with_cutoff(cutoff: f64) -> Self {
        Self {
            neighbor_cutoff: cutoff,
            ..Self::default()
        }
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn ghost_velocity(mut self, on: bool) -> Self {
        self.ghost_velocity = on;
        self
    }

    /// Effective ghost cutoff.
    pub fn cutoff(&self) -> f64 {
        self.neighbor_cutoff.max(self.cutghost_user)
    }

    /// Reject combinations the tiled communication pattern cannot handle.
    pub fn validate(&self, domain: &Domain) -> Result<(), CommError> {
        if domain.triclinic {
            return Err(CommError::TriclinicUnsupported);
        }
        if self.mode == CommMode::Multi {
            return Err(CommError::MultiModeUnsupported);
        }
        if !(self.cutoff() > 0.0) {
            return Err(CommError::InvalidConfig(format!(
                "ghost cutoff must be positive, got {}",
                self.cutoff()
            )));
        }
        if !(self.buffer.factor > 1.0) || self.buffer.min == 0 {
            return Err(CommError::InvalidConfig(format!(
                "buffer policy must grow (factor {} min {})",
                self.buffer.factor, self.buffer.min
            )));
        }
        if !(self.point_drop_epsilon > 0.0 && self.point_drop_epsilon < 0.5) {
            return Err(CommError::InvalidConfig(format!(
                "point_drop_epsilon {} outside (0, 0.5)",
                self.point_drop_epsilon
            )));
        }
        Ok(())
    }
}
