//! Simulation dataset.
//!
//! A multi-scene, frame-indexed cursor used by the unroll loop. Each
//! scene gets its own copy of the store that the simulator overwrites
//! in place, next to an untouched recorded copy kept for comparison.

use ndarray::{ArrayView2, ArrayView3};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use crate::config::SimulationConfig;
use crate::data::{AgentWrite, ChunkedDataset};
use crate::dataset::{EgoDataset, Sample};
use crate::types::{AgentKey, AgentRecord, SimError, SimResult};

use super::tracker::AgentTracker;

/// One scene under simulation.
#[derive(Debug, Clone)]
struct SceneSlot {
    scene_id: usize,
    simulated: EgoDataset,
    recorded: ChunkedDataset,
}

#[derive(Debug, Clone)]
pub struct SimulationDataset {
    config: SimulationConfig,
    scenes: Vec<SceneSlot>,
    tracker: AgentTracker,
    len: usize,
}

impl SimulationDataset {
    /// Build one sub-dataset per scene of `scene_indices`, in that order.
    ///
    /// Frames before `start_frame_index` are dropped, and so are frames
    /// past `num_simulation_steps` when it is set.
    pub fn from_dataset_indices(
        dataset: &EgoDataset,
        scene_indices: &[usize],
        config: &SimulationConfig,
    ) -> SimResult<Self> {
        config.validate()?;
        if scene_indices.is_empty() {
            return Err(SimError::Config("scene index list is empty".to_string()));
        }
        let mut unique = HashSet::new();
        for &scene_id in scene_indices {
            if !unique.insert(scene_id) {
                return Err(SimError::Config(format!("scene {scene_id} listed more than once")));
            }
            if scene_id >= dataset.num_scenes() {
                return Err(SimError::Config(format!(
                    "scene {scene_id} out of range for {} scenes",
                    dataset.num_scenes()
                )));
            }
        }

        let start = config.start_frame_index;
        let mut scenes = Vec::with_capacity(scene_indices.len());
        for &scene_id in scene_indices {
            let scene = dataset.get_scene_dataset(scene_id)?;
            let num_frames = scene.len();
            if num_frames <= start {
                return Err(SimError::Config(format!(
                    "scene {scene_id} has {num_frames} frames, cannot start at frame {start}"
                )));
            }
            let end = match config.num_simulation_steps {
                Some(steps) => (start + steps).min(num_frames),
                None => num_frames,
            };
            let sliced = scene.dataset().slice_frames(start, end)?;
            scenes.push(SceneSlot {
                scene_id,
                recorded: sliced.clone(),
                simulated: scene.with_dataset(sliced)?,
            });
        }

        let len = scenes.iter().map(|s| s.simulated.len()).min().unwrap_or(0);
        info!(
            scenes = scenes.len(),
            frames = len,
            start_frame = start,
            "Simulation dataset ready"
        );

        Ok(Self {
            config: config.clone(),
            scenes,
            tracker: AgentTracker::from_config(config)?,
            len,
        })
    }

    /// Number of frames every scene can be simulated for.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Scene ids in construction order.
    pub fn scene_ids(&self) -> Vec<usize> {
        self.scenes.iter().map(|s| s.scene_id).collect()
    }

    /// Simulated (possibly overwritten) view of one scene.
    pub fn scene(&self, scene_id: usize) -> Option<&EgoDataset> {
        self.slot(scene_id).map(|s| &s.simulated)
    }

    /// Scene data as it was before simulation started.
    pub fn recorded_scene(&self, scene_id: usize) -> Option<&ChunkedDataset> {
        self.slot(scene_id).map(|s| &s.recorded)
    }

    pub fn agents_tracked(&self) -> &BTreeMap<AgentKey, AgentRecord> {
        self.tracker.tracked()
    }

    fn slot(&self, scene_id: usize) -> Option<&SceneSlot> {
        self.scenes.iter().find(|s| s.scene_id == scene_id)
    }

    fn check_frame(&self, frame_index: usize) -> SimResult<()> {
        if frame_index >= self.len {
            return Err(SimError::IndexOutOfRange {
                index: frame_index,
                len: self.len,
            });
        }
        Ok(())
    }

    /// Ego sample of the scene at `scene_position` (construction order).
    pub fn get(&self, scene_position: usize, frame_index: usize) -> SimResult<Sample> {
        self.check_frame(frame_index)?;
        let slot = self.scenes.get(scene_position).ok_or(SimError::IndexOutOfRange {
            index: scene_position,
            len: self.scenes.len(),
        })?;
        let mut sample = slot.simulated.get_frame(0, frame_index, None)?;
        sample.scene_index = slot.scene_id;
        Ok(sample)
    }

    /// One ego sample per scene, in scene order.
    pub fn rasterise_frame_batch(&self, frame_index: usize) -> SimResult<Vec<Sample>> {
        self.check_frame(frame_index)?;
        (0..self.scenes.len())
            .map(|position| self.get(position, frame_index))
            .collect()
    }

    /// Update the tracker with `frame_index` of every scene and return a
    /// sample for each agent tracked afterwards.
    pub fn rasterise_agents_frame_batch(&mut self, frame_index: usize) -> SimResult<BTreeMap<AgentKey, Sample>> {
        self.check_frame(frame_index)?;
        let mut batch = BTreeMap::new();
        for slot in &self.scenes {
            let store = slot.simulated.dataset();
            let ego_position = store.frame(frame_index)?.ego_position();
            let in_scope = self
                .tracker
                .update(slot.scene_id, frame_index, ego_position, store.frame_agents(frame_index)?);
            for agent in in_scope {
                let mut sample = slot.simulated.get_frame(0, frame_index, Some(agent.track_id))?;
                sample.scene_index = slot.scene_id;
                batch.insert((slot.scene_id, agent.track_id), sample);
            }
        }
        debug!(frame_index, agents = batch.len(), "Agents rasterised");
        Ok(batch)
    }

    /// Overwrite the ego pose at `frame_index + future_offset` in every
    /// scene. Row `i` of `translations`/`yaws` belongs to the i-th scene
    /// and element `k` of a row is the pose for frame `frame_index + k`.
    pub fn set_ego(
        &mut self,
        frame_index: usize,
        future_offset: usize,
        translations: ArrayView3<'_, f64>,
        yaws: ArrayView2<'_, f64>,
    ) -> SimResult<()> {
        let target = frame_index
            .checked_add(future_offset)
            .ok_or(SimError::IndexOutOfRange {
                index: frame_index,
                len: self.len,
            })?;
        self.check_frame(target)?;

        let scenes = self.scenes.len();
        let (rows, steps, dims) = translations.dim();
        if rows != scenes || dims < 2 || steps <= future_offset {
            return Err(SimError::Config(format!(
                "ego translations of shape {:?} do not cover {scenes} scenes at offset {future_offset}",
                translations.shape()
            )));
        }
        let (yaw_rows, yaw_steps) = yaws.dim();
        if yaw_rows != scenes || yaw_steps <= future_offset {
            return Err(SimError::Config(format!(
                "ego yaws of shape {:?} do not cover {scenes} scenes at offset {future_offset}",
                yaws.shape()
            )));
        }

        for (i, slot) in self.scenes.iter_mut().enumerate() {
            let position = [
                translations[[i, future_offset, 0]],
                translations[[i, future_offset, 1]],
            ];
            slot.simulated
                .dataset_mut()
                .set_ego_pose(target, position, yaws[[i, future_offset]])?;
        }
        Ok(())
    }

    /// Write agent states into `frame_index`, overwriting the record with
    /// the same track id or inserting a new one.
    pub fn set_agents(&mut self, frame_index: usize, agents: &BTreeMap<AgentKey, AgentRecord>) -> SimResult<()> {
        self.check_frame(frame_index)?;
        if let Some((scene_id, _)) = agents.keys().find(|(scene_id, _)| self.slot(*scene_id).is_none()) {
            return Err(SimError::Config(format!("scene {scene_id} is not part of this simulation")));
        }

        for (&(scene_id, track_id), agent) in agents {
            let Some(slot) = self.scenes.iter_mut().find(|s| s.scene_id == scene_id) else {
                continue;
            };
            let mut agent = agent.clone();
            agent.track_id = track_id;
            let write = slot.simulated.dataset_mut().upsert_agent(frame_index, agent)?;
            if write == AgentWrite::Inserted {
                debug!(scene_id, track_id, frame_index, "Agent inserted");
            }
        }
        Ok(())
    }
}
