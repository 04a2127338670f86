//! Driving-log store.
//!
//! An in-memory chunked columnar store: scenes own frame intervals,
//! frames own agent and traffic-light-face intervals. The simulation
//! core reads it as random-access arrays of records and mutates ego
//! poses and agents in place on its own scene-local copies.

pub mod synthetic;

use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

use crate::geometry::yaw_as_rotation33;
use crate::types::{AgentRecord, Frame, IndexInterval, Scene, SimError, SimResult, TrafficLightFace};

/// Result of writing one agent into a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentWrite {
    /// An agent with the same track id already existed in the frame.
    Overwritten,
    /// The agent was appended to the frame's interval.
    Inserted,
}

/// Scene → frame → agent tables plus traffic-light faces.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChunkedDataset {
    pub scenes: Vec<Scene>,
    pub frames: Vec<Frame>,
    pub agents: Vec<AgentRecord>,
    pub tl_faces: Vec<TrafficLightFace>,
}

impl ChunkedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that every interval points inside its table and that
    /// scene/frame intervals are ordered.
    pub fn validate(&self) -> SimResult<()> {
        for (i, scene) in self.scenes.iter().enumerate() {
            let iv = scene.frame_index_interval;
            if iv.start > iv.end || iv.end > self.frames.len() {
                return Err(SimError::Dataset(format!(
                    "scene {i} frame interval {iv} exceeds {} frames",
                    self.frames.len()
                )));
            }
        }
        for (i, frame) in self.frames.iter().enumerate() {
            let agents = frame.agent_index_interval;
            if agents.start > agents.end || agents.end > self.agents.len() {
                return Err(SimError::Dataset(format!(
                    "frame {i} agent interval {agents} exceeds {} agents",
                    self.agents.len()
                )));
            }
            let faces = frame.traffic_light_faces_index_interval;
            if faces.start > faces.end || faces.end > self.tl_faces.len() {
                return Err(SimError::Dataset(format!(
                    "frame {i} face interval {faces} exceeds {} faces",
                    self.tl_faces.len()
                )));
            }
        }
        Ok(())
    }

    pub fn scene(&self, scene_index: usize) -> SimResult<&Scene> {
        self.scenes.get(scene_index).ok_or(SimError::IndexOutOfRange {
            index: scene_index,
            len: self.scenes.len(),
        })
    }

    /// All frames of one scene.
    pub fn scene_frames(&self, scene_index: usize) -> SimResult<&[Frame]> {
        let scene = self.scene(scene_index)?;
        self.frames
            .get(get_frames_slice_from_scenes(scene))
            .ok_or_else(|| {
                SimError::Dataset(format!(
                    "scene {scene_index} frame interval {} exceeds {} frames",
                    scene.frame_index_interval,
                    self.frames.len()
                ))
            })
    }

    pub fn frame(&self, frame_index: usize) -> SimResult<&Frame> {
        self.frames.get(frame_index).ok_or(SimError::IndexOutOfRange {
            index: frame_index,
            len: self.frames.len(),
        })
    }

    /// Agents of one frame.
    pub fn frame_agents(&self, frame_index: usize) -> SimResult<&[AgentRecord]> {
        let frame = self.frame(frame_index)?;
        self.agents
            .get(get_agents_slice_from_frames(frame))
            .ok_or_else(|| {
                SimError::Dataset(format!(
                    "frame {frame_index} agent interval {} exceeds {} agents",
                    frame.agent_index_interval,
                    self.agents.len()
                ))
            })
    }

    /// Traffic-light faces of one frame.
    pub fn frame_tl_faces(&self, frame_index: usize) -> SimResult<&[TrafficLightFace]> {
        let frame = self.frame(frame_index)?;
        self.tl_faces
            .get(get_tl_faces_slice_from_frames(frame))
            .ok_or_else(|| {
                SimError::Dataset(format!(
                    "frame {frame_index} face interval {} exceeds {} faces",
                    frame.traffic_light_faces_index_interval,
                    self.tl_faces.len()
                ))
            })
    }

    /// Self-contained copy of one scene with intervals rebased to zero.
    pub fn scene_subset(&self, scene_index: usize) -> SimResult<ChunkedDataset> {
        let scene = self.scene(scene_index)?.clone();
        let mut subset = self.copy_frames(scene.frame_index_interval.range())?;
        subset.scenes[0].host = scene.host;
        subset.scenes[0].start_time = scene.start_time;
        subset.scenes[0].end_time = scene.end_time;
        Ok(subset)
    }

    /// Self-contained single-scene copy of frames `[start, end)`.
    pub fn slice_frames(&self, start: usize, end: usize) -> SimResult<ChunkedDataset> {
        if start > end || end > self.frames.len() {
            return Err(SimError::IndexOutOfRange {
                index: end.max(start),
                len: self.frames.len(),
            });
        }
        let mut sliced = self.copy_frames(start..end)?;
        if let Some(scene) = self.scenes.first() {
            sliced.scenes[0].host = scene.host.clone();
        }
        Ok(sliced)
    }

    fn copy_frames(&self, frame_range: Range<usize>) -> SimResult<ChunkedDataset> {
        let frames = self.frames.get(frame_range.clone()).ok_or(SimError::IndexOutOfRange {
            index: frame_range.end,
            len: self.frames.len(),
        })?;

        let (agent_range, face_range) = match (frames.first(), frames.last()) {
            (Some(first), Some(last)) => (
                first.agent_index_interval.start..last.agent_index_interval.end,
                first.traffic_light_faces_index_interval.start
                    ..last.traffic_light_faces_index_interval.end,
            ),
            _ => (0..0, 0..0),
        };

        let agents = self
            .agents
            .get(agent_range.clone())
            .ok_or_else(|| SimError::Dataset(format!("agent range {agent_range:?} out of bounds")))?
            .to_vec();
        let tl_faces = self
            .tl_faces
            .get(face_range.clone())
            .ok_or_else(|| SimError::Dataset(format!("face range {face_range:?} out of bounds")))?
            .to_vec();

        let frames: Vec<Frame> = frames
            .iter()
            .map(|f| Frame {
                agent_index_interval: f.agent_index_interval.rebased(agent_range.start),
                traffic_light_faces_index_interval: f
                    .traffic_light_faces_index_interval
                    .rebased(face_range.start),
                ..f.clone()
            })
            .collect();

        let scene = Scene {
            frame_index_interval: IndexInterval::new(0, frames.len()),
            host: String::new(),
            start_time: frames.first().map_or(0, |f| f.timestamp),
            end_time: frames.last().map_or(0, |f| f.timestamp),
        };

        Ok(ChunkedDataset {
            scenes: vec![scene],
            frames,
            agents,
            tl_faces,
        })
    }

    /// Overwrite the ego pose of one frame. The z translation is kept.
    pub fn set_ego_pose(&mut self, frame_index: usize, position: [f64; 2], yaw: f64) -> SimResult<()> {
        let len = self.frames.len();
        let frame = self
            .frames
            .get_mut(frame_index)
            .ok_or(SimError::IndexOutOfRange { index: frame_index, len })?;
        frame.ego_translation[0] = position[0];
        frame.ego_translation[1] = position[1];
        frame.ego_rotation = yaw_as_rotation33(yaw);
        Ok(())
    }

    /// Write `agent` into `frame_index`: overwrite the slot holding the same
    /// track id, or insert it at the end of the frame's interval and shift
    /// every later interval by one.
    pub fn upsert_agent(&mut self, frame_index: usize, agent: AgentRecord) -> SimResult<AgentWrite> {
        let interval = self.frame(frame_index)?.agent_index_interval;
        let existing = self
            .agents
            .get(interval.range())
            .ok_or_else(|| SimError::Dataset(format!("frame {frame_index} agent interval {interval} out of bounds")))?
            .iter()
            .position(|a| a.track_id == agent.track_id);

        if let Some(offset) = existing {
            self.agents[interval.start + offset] = agent;
            return Ok(AgentWrite::Overwritten);
        }

        let insert_at = interval.end;
        debug!(frame_index, track_id = agent.track_id, insert_at, "Inserting agent");
        self.agents.insert(insert_at, agent);
        for (i, frame) in self.frames.iter_mut().enumerate() {
            let iv = &mut frame.agent_index_interval;
            if i == frame_index {
                iv.end += 1;
            } else if iv.start >= insert_at && i > frame_index {
                iv.start += 1;
                iv.end += 1;
            }
        }
        Ok(AgentWrite::Inserted)
    }
}

// ---------------------------------------------------------------------------
// Slicing and filtering helpers
// ---------------------------------------------------------------------------

pub fn get_frames_slice_from_scenes(scene: &Scene) -> Range<usize> {
    scene.frame_index_interval.range()
}

pub fn get_agents_slice_from_frames(frame: &Frame) -> Range<usize> {
    frame.agent_index_interval.range()
}

pub fn get_tl_faces_slice_from_frames(frame: &Frame) -> Range<usize> {
    frame.traffic_light_faces_index_interval.range()
}

/// All records of one track, in table order.
pub fn filter_agents_by_track_id(agents: &[AgentRecord], track_id: u64) -> Vec<AgentRecord> {
    agents.iter().filter(|a| a.track_id == track_id).cloned().collect()
}

/// Agents whose most likely real object class exceeds `threshold`.
pub fn filter_agents_by_labels(agents: &[AgentRecord], threshold: f64) -> Vec<AgentRecord> {
    agents
        .iter()
        .filter(|a| a.max_object_probability() > threshold)
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
