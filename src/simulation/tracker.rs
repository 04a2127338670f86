//! Agent tracker.
//!
//! Decides, frame by frame, which agents are simulated. Two distance
//! thresholds form a hysteresis band: untracked agents must come closer
//! than `distance_th_close` to be admitted, tracked agents are only
//! evicted beyond `distance_th_far` or when they vanish from the frame.
//! With `disable_new_agents`, admission is only possible on the first
//! simulated frame.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::config::SimulationConfig;
use crate::geometry::planar_distance;
use crate::types::{AgentKey, AgentRecord, SimError, SimResult};

/// Outcome of one agent's evaluation in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Admitted,
    Retained,
    Evicted,
    Ignored,
}

#[derive(Debug, Clone)]
pub struct AgentTracker {
    distance_th_close: f64,
    distance_th_far: f64,
    disable_new_agents: bool,
    tracked: BTreeMap<AgentKey, AgentRecord>,
}

impl AgentTracker {
    pub fn new(distance_th_close: f64, distance_th_far: f64, disable_new_agents: bool) -> SimResult<Self> {
        if !(distance_th_close >= 0.0 && distance_th_far >= distance_th_close) {
            return Err(SimError::Config(format!(
                "tracker thresholds must satisfy 0 <= close ({distance_th_close}) <= far ({distance_th_far})"
            )));
        }
        Ok(Self {
            distance_th_close,
            distance_th_far,
            disable_new_agents,
            tracked: BTreeMap::new(),
        })
    }

    pub fn from_config(config: &SimulationConfig) -> SimResult<Self> {
        Self::new(config.distance_th_close, config.distance_th_far, config.disable_new_agents)
    }

    /// Currently tracked agents with their last seen state.
    pub fn tracked(&self) -> &BTreeMap<AgentKey, AgentRecord> {
        &self.tracked
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn contains(&self, key: &AgentKey) -> bool {
        self.tracked.contains_key(key)
    }

    /// Whether untracked agents may be admitted at `frame_index`.
    pub fn admits_new(&self, frame_index: usize) -> bool {
        !self.disable_new_agents || frame_index == 0
    }

    /// Pure transition rule for one agent present in frame `frame_index`.
    pub fn transition(&self, frame_index: usize, was_tracked: bool, distance: f64, valid: bool) -> Transition {
        if was_tracked {
            if distance <= self.distance_th_far {
                Transition::Retained
            } else {
                Transition::Evicted
            }
        } else if distance < self.distance_th_close && self.admits_new(frame_index) && valid {
            Transition::Admitted
        } else {
            Transition::Ignored
        }
    }

    /// Apply frame `frame_index` of `scene_id` and return the agents
    /// tracked afterwards, in ascending track-id order.
    pub fn update(
        &mut self,
        scene_id: usize,
        frame_index: usize,
        ego_position: [f64; 2],
        frame_agents: &[AgentRecord],
    ) -> Vec<AgentRecord> {
        let mut seen = BTreeSet::new();
        let mut in_scope = Vec::new();

        for agent in frame_agents {
            let key = (scene_id, agent.track_id);
            if !seen.insert(agent.track_id) {
                warn!(scene_id, track_id = agent.track_id, "Duplicate track id in frame, keeping first");
                continue;
            }
            let distance = planar_distance(agent.centroid, ego_position);
            match self.transition(frame_index, self.contains(&key), distance, agent.is_valid()) {
                Transition::Admitted | Transition::Retained => {
                    self.tracked.insert(key, agent.clone());
                    in_scope.push(agent.clone());
                }
                Transition::Evicted => {
                    debug!(scene_id, track_id = agent.track_id, distance, "Agent left range");
                    self.tracked.remove(&key);
                }
                Transition::Ignored => {}
            }
        }

        let vanished: Vec<AgentKey> = self
            .tracked
            .keys()
            .filter(|(scene, track)| *scene == scene_id && !seen.contains(track))
            .copied()
            .collect();
        for key in vanished {
            debug!(scene_id, track_id = key.1, "Agent vanished from frame");
            self.tracked.remove(&key);
        }

        in_scope.sort_by_key(|a| a.track_id);
        in_scope
    }
}
