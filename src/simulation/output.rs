//! Per-scene unroll results.

use ndarray::{Array2, ArrayView1};
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::data::{filter_agents_by_track_id, ChunkedDataset};
use crate::geometry::{planar_distance, rotation33_as_yaw};
use crate::types::{AgentRecord, Frame, SimError, SimResult};

use super::dataset::SimulationDataset;

/// Column layout of the compact ego state arrays.
pub struct TrajectoryStateIndices;

impl TrajectoryStateIndices {
    pub const X: usize = 0;
    pub const Y: usize = 1;
    pub const THETA: usize = 2;
    pub const COUNT: usize = 3;
}

/// What one actor saw and predicted at one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct UnrollInputOutput {
    pub scene_id: usize,
    pub frame_index: usize,
    /// `None` for the ego.
    pub track_id: Option<u64>,
    pub centroid: [f64; 2],
    pub yaw: f64,
    pub extent: [f64; 3],
    /// Agent-frame positions. Shape: `[horizon, 2]`.
    pub predicted_positions: Array2<f64>,
    /// Agent-frame yaw deltas. Shape: `[horizon, 1]`.
    pub predicted_yaws: Array2<f64>,
}

/// Recorded vs simulated trajectories of one scene.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub run_id: Uuid,
    pub scene_id: usize,
    pub recorded_ego: Vec<Frame>,
    pub simulated_ego: Vec<Frame>,
    /// Shape: `[frames, TrajectoryStateIndices::COUNT]`.
    pub recorded_ego_states: Array2<f64>,
    pub simulated_ego_states: Array2<f64>,
    pub recorded_agents: Vec<AgentRecord>,
    pub simulated_agents: Vec<AgentRecord>,
    pub ego_ins_outs: Vec<UnrollInputOutput>,
    pub agents_ins_outs: Vec<UnrollInputOutput>,
}

/// Serializable digest of one output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationSummary {
    pub run_id: Uuid,
    pub scene_id: usize,
    pub frames: usize,
    /// Mean ego distance (metres) between simulated and recorded poses.
    pub ego_mean_displacement: f64,
    /// Ego distance at the last frame.
    pub ego_final_displacement: f64,
    pub agents_simulated: usize,
}

impl SimulationOutput {
    /// Snapshot `scene_id` of `dataset` once the unroll is done.
    pub fn new(
        run_id: Uuid,
        scene_id: usize,
        dataset: &SimulationDataset,
        ego_ins_outs: Vec<UnrollInputOutput>,
        agents_ins_outs: Vec<UnrollInputOutput>,
    ) -> SimResult<Self> {
        let unknown = || SimError::Config(format!("scene {scene_id} is not part of this simulation"));
        let recorded = dataset.recorded_scene(scene_id).ok_or_else(unknown)?;
        let simulated = dataset.scene(scene_id).ok_or_else(unknown)?.dataset();

        let (recorded_ego, recorded_agents) = snapshot(recorded, dataset.len())?;
        let (simulated_ego, simulated_agents) = snapshot(simulated, dataset.len())?;

        Ok(Self {
            run_id,
            scene_id,
            recorded_ego_states: build_trajectory_states(&recorded_ego),
            simulated_ego_states: build_trajectory_states(&simulated_ego),
            recorded_ego,
            simulated_ego,
            recorded_agents,
            simulated_agents,
            ego_ins_outs,
            agents_ins_outs,
        })
    }

    pub fn len(&self) -> usize {
        self.simulated_ego.len()
    }

    pub fn is_empty(&self) -> bool {
        self.simulated_ego.is_empty()
    }

    /// Simulated states of one agent, one per frame it appears in.
    pub fn simulated_agent_track(&self, track_id: u64) -> Vec<AgentRecord> {
        filter_agents_by_track_id(&self.simulated_agents, track_id)
    }

    pub fn recorded_agent_track(&self, track_id: u64) -> Vec<AgentRecord> {
        filter_agents_by_track_id(&self.recorded_agents, track_id)
    }

    /// Track ids driven by the agents policy at least once.
    pub fn simulated_track_ids(&self) -> BTreeSet<u64> {
        self.agents_ins_outs.iter().filter_map(|io| io.track_id).collect()
    }

    pub fn summary(&self) -> SimulationSummary {
        let displacements: Vec<f64> = self
            .simulated_ego_states
            .rows()
            .into_iter()
            .zip(self.recorded_ego_states.rows())
            .map(|(sim, rec)| planar_distance(state_position(sim), state_position(rec)))
            .collect();
        let mean = if displacements.is_empty() {
            0.0
        } else {
            displacements.iter().sum::<f64>() / displacements.len() as f64
        };

        SimulationSummary {
            run_id: self.run_id,
            scene_id: self.scene_id,
            frames: self.len(),
            ego_mean_displacement: mean,
            ego_final_displacement: displacements.last().copied().unwrap_or(0.0),
            agents_simulated: self.simulated_track_ids().len(),
        }
    }
}

/// `[x, y, theta]` per frame.
pub fn build_trajectory_states(frames: &[Frame]) -> Array2<f64> {
    let mut states = Array2::zeros((frames.len(), TrajectoryStateIndices::COUNT));
    for (i, frame) in frames.iter().enumerate() {
        states[[i, TrajectoryStateIndices::X]] = frame.ego_translation[0];
        states[[i, TrajectoryStateIndices::Y]] = frame.ego_translation[1];
        states[[i, TrajectoryStateIndices::THETA]] = rotation33_as_yaw(&frame.ego_rotation);
    }
    states
}

fn state_position(row: ArrayView1<'_, f64>) -> [f64; 2] {
    [row[TrajectoryStateIndices::X], row[TrajectoryStateIndices::Y]]
}

/// First `len` frames of a scene-local store and the agents they own.
fn snapshot(store: &ChunkedDataset, len: usize) -> SimResult<(Vec<Frame>, Vec<AgentRecord>)> {
    let frames = store
        .frames
        .get(..len)
        .ok_or(SimError::IndexOutOfRange {
            index: len,
            len: store.frames.len(),
        })?
        .to_vec();
    let mut agents = Vec::new();
    for frame_index in 0..len {
        agents.extend_from_slice(store.frame_agents(frame_index)?);
    }
    Ok((frames, agents))
}
