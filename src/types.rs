//! Shared types for LOOPSIM.
//!
//! These are the record shapes of the driving-log store plus the
//! crate-wide error type. They carry no simulation logic so that the
//! store, dataset and simulation modules can all depend on them.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::geometry::rotation33_as_yaw;

// ---------------------------------------------------------------------------
// Perception labels
// ---------------------------------------------------------------------------

/// Class slots of `AgentRecord::label_probabilities`.
pub const NUM_PERCEPTION_LABELS: usize = 17;

/// Slot of `PERCEPTION_LABEL_CAR`.
pub const CAR_LABEL_INDEX: usize = 3;

/// First slot that names a real object class (skips NOT_SET/UNKNOWN/DONTCARE).
pub const FIRST_OBJECT_LABEL_INDEX: usize = 3;

/// Minimum car-slot probability for an agent to be admitted into simulation.
pub const VALID_AGENT_CAR_PROBABILITY: f64 = 0.5;

/// Ego bounding box (length, width, height) in metres.
pub const EGO_EXTENT: [f64; 3] = [4.869, 1.852, 1.476];

/// Key of one simulated agent: `(scene_id, track_id)`.
pub type AgentKey = (usize, u64);

// ---------------------------------------------------------------------------
// Index intervals
// ---------------------------------------------------------------------------

/// Half-open `[start, end)` interval into one of the store tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IndexInterval {
    pub start: usize,
    pub end: usize,
}

impl IndexInterval {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Move both ends by `-offset` (used when copying a sub-table).
    pub fn rebased(&self, offset: usize) -> Self {
        Self {
            start: self.start.saturating_sub(offset),
            end: self.end.saturating_sub(offset),
        }
    }
}

impl fmt::Display for IndexInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Store records
// ---------------------------------------------------------------------------

/// One recorded driving episode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scene {
    pub frame_index_interval: IndexInterval,
    /// Vehicle that recorded the scene.
    pub host: String,
    pub start_time: i64,
    pub end_time: i64,
}

/// One timestep of a scene: the ego pose plus the agents and
/// traffic-light faces seen at that time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Nanoseconds since epoch.
    pub timestamp: i64,
    pub agent_index_interval: IndexInterval,
    pub traffic_light_faces_index_interval: IndexInterval,
    pub ego_translation: [f64; 3],
    pub ego_rotation: Matrix3<f64>,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            timestamp: 0,
            agent_index_interval: IndexInterval::default(),
            traffic_light_faces_index_interval: IndexInterval::default(),
            ego_translation: [0.0; 3],
            ego_rotation: Matrix3::identity(),
        }
    }
}

impl Frame {
    /// Planar (x, y) ego position.
    pub fn ego_position(&self) -> [f64; 2] {
        [self.ego_translation[0], self.ego_translation[1]]
    }

    pub fn ego_yaw(&self) -> f64 {
        rotation33_as_yaw(&self.ego_rotation)
    }
}

/// One detected agent in one frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentRecord {
    pub centroid: [f64; 2],
    /// Bounding box (length, width, height).
    pub extent: [f64; 3],
    pub yaw: f64,
    pub velocity: [f64; 2],
    /// Stable across frames for the same physical object.
    pub track_id: u64,
    pub label_probabilities: [f64; NUM_PERCEPTION_LABELS],
}

impl AgentRecord {
    pub fn new(track_id: u64, centroid: [f64; 2], yaw: f64, extent: [f64; 3]) -> Self {
        Self {
            centroid,
            extent,
            yaw,
            track_id,
            ..Self::default()
        }
    }

    /// Builder: set the probability of one label slot.
    pub fn with_label_probability(mut self, label_index: usize, probability: f64) -> Self {
        if let Some(slot) = self.label_probabilities.get_mut(label_index) {
            *slot = probability;
        }
        self
    }

    /// Whether this agent may be admitted into simulation: the car slot
    /// must carry more than `VALID_AGENT_CAR_PROBABILITY`.
    pub fn is_valid(&self) -> bool {
        self.label_probabilities[CAR_LABEL_INDEX] > VALID_AGENT_CAR_PROBABILITY
    }

    /// Highest probability among the real object classes.
    pub fn max_object_probability(&self) -> f64 {
        self.label_probabilities[FIRST_OBJECT_LABEL_INDEX..]
            .iter()
            .copied()
            .fold(0.0, f64::max)
    }
}

impl fmt::Display for AgentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "agent #{} @ ({:.2}, {:.2}) yaw {:.3}",
            self.track_id, self.centroid[0], self.centroid[1], self.yaw
        )
    }
}

/// One traffic-light face observation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrafficLightFace {
    pub face_id: String,
    pub traffic_light_id: String,
    /// (active, inactive, unknown) probabilities.
    pub traffic_light_face_status: [f64; 3],
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which actor class a policy drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
    Ego,
    Agents,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Ego => write!(f, "ego"),
            Actor::Agents => write!(f, "agents"),
        }
    }
}

/// Compute device a model runs on. Opaque to the core; handed to
/// predictors once at simulator construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for LOOPSIM.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Invalid or contradictory construction arguments.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A frame or scene position outside the simulation horizon.
    #[error("Index {index} is out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// A prediction model failed or returned a malformed output.
    #[error("Model error ({actor}): {source}")]
    Model {
        actor: Actor,
        #[source]
        source: anyhow::Error,
    },

    /// Inconsistent store content.
    #[error("Dataset error: {0}")]
    Dataset(String),
}

pub type SimResult<T> = Result<T, SimError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
