//! Ego/agent sample construction.
//!
//! `EgoDataset` turns a (scene, frame[, track]) triple into a model
//! [`Sample`]: an opaque raster plus the pose of the centred actor, its
//! world ⇄ agent transforms, and its past and future trajectory
//! expressed in its own frame. Future targets are what the ground-truth
//! policy replays.

pub mod rasterizer;

use nalgebra::Matrix3;
use ndarray::{Array, Array1, Array2, Array3, Array4, ArrayView, Axis, Dimension, RemoveAxis};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::DatasetConfig;
use crate::data::{filter_agents_by_labels, ChunkedDataset};
use crate::geometry::{agent_from_world, normalize_angle, transform_point, world_from_agent};
use crate::types::{AgentRecord, SimError, SimResult, EGO_EXTENT, NUM_PERCEPTION_LABELS};
use rasterizer::{RasterContext, Rasterizer};

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

/// Model input for one actor at one frame.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Shape: `[channels, height, width]`.
    pub image: Array3<f32>,
    /// Future positions in the actor frame. Shape: `[future_num_frames, 2]`.
    pub target_positions: Array2<f64>,
    /// Future yaw deltas. Shape: `[future_num_frames, 1]`.
    pub target_yaws: Array2<f64>,
    /// 1.0 where the future frame exists (and holds the track), else 0.0.
    pub target_availabilities: Array1<f64>,
    /// Past positions in the actor frame, current frame first.
    /// Shape: `[history_num_frames + 1, 2]`.
    pub history_positions: Array2<f64>,
    pub history_yaws: Array2<f64>,
    pub history_availabilities: Array1<f64>,
    pub world_from_agent: Matrix3<f64>,
    pub agent_from_world: Matrix3<f64>,
    pub centroid: [f64; 2],
    pub yaw: f64,
    pub extent: [f64; 3],
    /// Recorded velocity for agents; zero for the ego.
    pub velocity: [f64; 2],
    /// All zero for the ego.
    pub label_probabilities: [f64; NUM_PERCEPTION_LABELS],
    /// `None` for the ego.
    pub track_id: Option<u64>,
    pub scene_index: usize,
    /// Frame position within the scene.
    pub frame_index: usize,
    pub timestamp: i64,
}

/// Samples stacked along a leading batch axis.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    pub image: Array4<f32>,
    /// Shape: `[batch, 2]`.
    pub centroid: Array2<f64>,
    pub yaw: Array1<f64>,
    /// Shape: `[batch, 3]`.
    pub extent: Array2<f64>,
    /// Shape: `[batch, future, 2]`.
    pub target_positions: Array3<f64>,
    /// Shape: `[batch, future, 1]`.
    pub target_yaws: Array3<f64>,
    pub target_availabilities: Array2<f64>,
    pub history_positions: Array3<f64>,
    pub history_yaws: Array3<f64>,
    pub history_availabilities: Array2<f64>,
    pub world_from_agent: Vec<Matrix3<f64>>,
    pub track_ids: Vec<Option<u64>>,
    pub scene_indices: Vec<usize>,
    pub frame_indices: Vec<usize>,
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        self.yaw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.yaw.is_empty()
    }
}

fn stack_field<A, D>(field: &str, views: &[ArrayView<'_, A, D>]) -> SimResult<Array<A, D::Larger>>
where
    A: Clone,
    D: Dimension,
    D::Larger: RemoveAxis,
{
    ndarray::stack(Axis(0), views)
        .map_err(|e| SimError::Dataset(format!("cannot collate field `{field}`: {e}")))
}

/// Stack samples into a batch. All samples must share shapes.
pub fn collate(samples: &[Sample]) -> SimResult<SampleBatch> {
    if samples.is_empty() {
        return Err(SimError::Dataset("cannot collate an empty batch".to_string()));
    }
    let n = samples.len();

    let image = stack_field("image", &samples.iter().map(|s| s.image.view()).collect::<Vec<_>>())?;
    let target_positions = stack_field(
        "target_positions",
        &samples.iter().map(|s| s.target_positions.view()).collect::<Vec<_>>(),
    )?;
    let target_yaws = stack_field(
        "target_yaws",
        &samples.iter().map(|s| s.target_yaws.view()).collect::<Vec<_>>(),
    )?;
    let target_availabilities = stack_field(
        "target_availabilities",
        &samples.iter().map(|s| s.target_availabilities.view()).collect::<Vec<_>>(),
    )?;
    let history_positions = stack_field(
        "history_positions",
        &samples.iter().map(|s| s.history_positions.view()).collect::<Vec<_>>(),
    )?;
    let history_yaws = stack_field(
        "history_yaws",
        &samples.iter().map(|s| s.history_yaws.view()).collect::<Vec<_>>(),
    )?;
    let history_availabilities = stack_field(
        "history_availabilities",
        &samples.iter().map(|s| s.history_availabilities.view()).collect::<Vec<_>>(),
    )?;

    Ok(SampleBatch {
        image,
        centroid: Array2::from_shape_fn((n, 2), |(i, j)| samples[i].centroid[j]),
        yaw: samples.iter().map(|s| s.yaw).collect(),
        extent: Array2::from_shape_fn((n, 3), |(i, j)| samples[i].extent[j]),
        target_positions,
        target_yaws,
        target_availabilities,
        history_positions,
        history_yaws,
        history_availabilities,
        world_from_agent: samples.iter().map(|s| s.world_from_agent).collect(),
        track_ids: samples.iter().map(|s| s.track_id).collect(),
        scene_indices: samples.iter().map(|s| s.scene_index).collect(),
        frame_indices: samples.iter().map(|s| s.frame_index).collect(),
    })
}

// ---------------------------------------------------------------------------
// EgoDataset
// ---------------------------------------------------------------------------

/// Random-access sample view over a driving-log store.
#[derive(Clone)]
pub struct EgoDataset {
    config: DatasetConfig,
    dataset: ChunkedDataset,
    rasterizer: Arc<dyn Rasterizer>,
}

impl fmt::Debug for EgoDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EgoDataset")
            .field("config", &self.config)
            .field("scenes", &self.dataset.scenes.len())
            .field("frames", &self.dataset.frames.len())
            .field("agents", &self.dataset.agents.len())
            .finish()
    }
}

/// Planar pose of one actor at one frame.
type Pose = ([f64; 2], f64);

impl EgoDataset {
    pub fn new(config: DatasetConfig, dataset: ChunkedDataset, rasterizer: Arc<dyn Rasterizer>) -> SimResult<Self> {
        config.validate()?;
        dataset.validate()?;
        if rasterizer.num_channels() != config.num_channels {
            return Err(SimError::Config(format!(
                "rasterizer draws {} channels, dataset expects {}",
                rasterizer.num_channels(),
                config.num_channels
            )));
        }
        Ok(Self {
            config,
            dataset,
            rasterizer,
        })
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    pub fn dataset(&self) -> &ChunkedDataset {
        &self.dataset
    }

    pub fn dataset_mut(&mut self) -> &mut ChunkedDataset {
        &mut self.dataset
    }

    /// Number of frames across all scenes.
    pub fn len(&self) -> usize {
        self.dataset.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.frames.is_empty()
    }

    pub fn num_scenes(&self) -> usize {
        self.dataset.scenes.len()
    }

    /// Same configuration and rasterizer over a different store.
    pub fn with_dataset(&self, dataset: ChunkedDataset) -> SimResult<Self> {
        Self::new(self.config.clone(), dataset, Arc::clone(&self.rasterizer))
    }

    /// Self-contained single-scene dataset; scene 0 of the result is
    /// `scene_index` of this one.
    pub fn get_scene_dataset(&self, scene_index: usize) -> SimResult<Self> {
        self.with_dataset(self.dataset.scene_subset(scene_index)?)
    }

    /// Build the sample for the ego (`track_id == None`) or one agent at
    /// frame position `state_index` of scene `scene_index`.
    pub fn get_frame(&self, scene_index: usize, state_index: usize, track_id: Option<u64>) -> SimResult<Sample> {
        let scene_start = self.dataset.scene(scene_index)?.frame_index_interval.start;
        let scene_len = self.dataset.scene_frames(scene_index)?.len();
        if state_index >= scene_len {
            return Err(SimError::IndexOutOfRange {
                index: state_index,
                len: scene_len,
            });
        }
        let frame_index = scene_start + state_index;
        let frame = self.dataset.frame(frame_index)?;

        let agent = match track_id {
            None => None,
            Some(id) => Some(
                self.dataset
                    .frame_agents(frame_index)?
                    .iter()
                    .find(|a| a.track_id == id)
                    .ok_or_else(|| {
                        SimError::Dataset(format!(
                            "track {id} not present in frame {state_index} of scene {scene_index}"
                        ))
                    })?,
            ),
        };

        let (centroid, yaw, extent, velocity, label_probabilities) = match agent {
            Some(a) => (a.centroid, a.yaw, a.extent, a.velocity, a.label_probabilities),
            None => (
                frame.ego_position(),
                frame.ego_yaw(),
                EGO_EXTENT,
                [0.0; 2],
                [0.0; NUM_PERCEPTION_LABELS],
            ),
        };
        let world_from_agent = world_from_agent(centroid, yaw);
        let agent_from_world = agent_from_world(centroid, yaw);

        let relative = |pose: Option<Pose>| -> ([f64; 2], f64, f64) {
            match pose {
                Some((position, pose_yaw)) => (
                    transform_point(&agent_from_world, position),
                    normalize_angle(pose_yaw - yaw),
                    1.0,
                ),
                None => ([0.0; 2], 0.0, 0.0),
            }
        };

        let future = self.config.future_num_frames;
        let mut target_positions = Array2::zeros((future, 2));
        let mut target_yaws = Array2::zeros((future, 1));
        let mut target_availabilities = Array1::zeros(future);
        for k in 0..future {
            let state = state_index + k + 1;
            let pose = if state < scene_len {
                self.pose_at(scene_start + state, track_id)?
            } else {
                None
            };
            let (position, rel_yaw, available) = relative(pose);
            target_positions[[k, 0]] = position[0];
            target_positions[[k, 1]] = position[1];
            target_yaws[[k, 0]] = rel_yaw;
            target_availabilities[k] = available;
        }

        let history = self.config.history_num_frames + 1;
        let mut history_positions = Array2::zeros((history, 2));
        let mut history_yaws = Array2::zeros((history, 1));
        let mut history_availabilities = Array1::zeros(history);
        for k in 0..history {
            let pose = match state_index.checked_sub(k) {
                Some(state) => self.pose_at(scene_start + state, track_id)?,
                None => None,
            };
            let (position, rel_yaw, available) = relative(pose);
            history_positions[[k, 0]] = position[0];
            history_positions[[k, 1]] = position[1];
            history_yaws[[k, 0]] = rel_yaw;
            history_availabilities[k] = available;
        }

        let image = self.rasterize(scene_start, state_index, agent)?;

        Ok(Sample {
            image,
            target_positions,
            target_yaws,
            target_availabilities,
            history_positions,
            history_yaws,
            history_availabilities,
            world_from_agent,
            agent_from_world,
            centroid,
            yaw,
            extent,
            velocity,
            label_probabilities,
            track_id,
            scene_index,
            frame_index: state_index,
            timestamp: frame.timestamp,
        })
    }

    /// World pose of the ego or of `track_id` at absolute frame `frame_index`.
    fn pose_at(&self, frame_index: usize, track_id: Option<u64>) -> SimResult<Option<Pose>> {
        match track_id {
            None => {
                let frame = self.dataset.frame(frame_index)?;
                Ok(Some((frame.ego_position(), frame.ego_yaw())))
            }
            Some(id) => Ok(self
                .dataset
                .frame_agents(frame_index)?
                .iter()
                .find(|a| a.track_id == id)
                .map(|a| (a.centroid, a.yaw))),
        }
    }

    fn rasterize(&self, scene_start: usize, state_index: usize, agent: Option<&AgentRecord>) -> SimResult<Array3<f32>> {
        let oldest = state_index.saturating_sub(self.config.history_num_frames);
        let mut context = RasterContext {
            history_frames: Vec::new(),
            history_agents: Vec::new(),
            history_tl_faces: Vec::new(),
            agent,
        };
        for state in (oldest..=state_index).rev() {
            let frame_index = scene_start + state;
            context.history_frames.push(self.dataset.frame(frame_index)?);
            context.history_agents.push(filter_agents_by_labels(
                self.dataset.frame_agents(frame_index)?,
                self.config.filter_agents_threshold,
            ));
            context.history_tl_faces.push(self.dataset.frame_tl_faces(frame_index)?);
        }
        debug!(
            frames = context.history_frames.len(),
            centred_on = ?agent.map(|a| a.track_id),
            "Rasterizing sample"
        );
        Ok(self.rasterizer.rasterize(&context))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
