//! Closed-loop unroll.
//!
//! Steps every requested scene in lockstep. At each frame the agents
//! policy moves the tracked agents, then the ego policy moves the ego;
//! both write the first predicted step into the next frame so that the
//! following iteration reads simulated state instead of the log.

use ndarray::{s, Array2, Array3};
use std::collections::BTreeMap;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::dataset::{collate, EgoDataset, Sample};
use crate::geometry::{normalize_angle, transform_point};
use crate::types::{Actor, AgentKey, AgentRecord, Device, SimResult};

use super::dataset::SimulationDataset;
use super::output::{SimulationOutput, UnrollInputOutput};
use super::policy::{PosePredictor, Policy, Prediction};

#[derive(Debug)]
pub struct ClosedLoopSimulator {
    config: SimulationConfig,
    dataset: EgoDataset,
    device: Device,
    ego_policy: Policy,
    agents_policy: Policy,
}

impl ClosedLoopSimulator {
    /// Resolve both policies, then place the models on `device`. No model
    /// is run here.
    pub fn new(
        config: SimulationConfig,
        dataset: EgoDataset,
        device: Device,
        model_ego: Option<Box<dyn PosePredictor>>,
        model_agents: Option<Box<dyn PosePredictor>>,
    ) -> SimResult<Self> {
        config.validate()?;
        let mut ego_policy = Policy::resolve(Actor::Ego, config.use_ego_gt, model_ego)?;
        let mut agents_policy = Policy::resolve(Actor::Agents, config.use_agents_gt, model_agents)?;
        ego_policy.to_device(Actor::Ego, device)?;
        agents_policy.to_device(Actor::Agents, device)?;

        info!(
            ego = ego_policy.kind(),
            agents = agents_policy.kind(),
            %device,
            steps = ?config.num_simulation_steps,
            "Closed-loop simulator ready"
        );

        Ok(Self {
            config,
            dataset,
            device,
            ego_policy,
            agents_policy,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn ego_policy(&self) -> &Policy {
        &self.ego_policy
    }

    pub fn agents_policy(&self) -> &Policy {
        &self.agents_policy
    }

    /// Simulate `scene_indices` and return one output per scene, in the
    /// order given.
    pub fn unroll(&mut self, scene_indices: &[usize]) -> SimResult<Vec<SimulationOutput>> {
        let run_id = Uuid::new_v4();
        let span = info_span!("unroll", %run_id, scenes = scene_indices.len());
        let _guard = span.enter();

        let mut sim = SimulationDataset::from_dataset_indices(&self.dataset, scene_indices, &self.config)?;
        let mut ego_ins_outs: BTreeMap<usize, Vec<UnrollInputOutput>> = BTreeMap::new();
        let mut agents_ins_outs: BTreeMap<usize, Vec<UnrollInputOutput>> = BTreeMap::new();

        let len = sim.len();
        for frame_index in 0..len {
            let should_update = frame_index + 1 != len;

            let agent_samples = sim.rasterise_agents_frame_batch(frame_index)?;
            if !agent_samples.is_empty() {
                let (keys, samples): (Vec<AgentKey>, Vec<Sample>) = agent_samples.into_iter().unzip();
                let batch = collate(&samples)?;
                let prediction = self.agents_policy.forward(Actor::Agents, &batch)?;
                if should_update && !self.agents_policy.is_ground_truth() {
                    let next = next_agent_states(&keys, &samples, &prediction);
                    sim.set_agents(frame_index + 1, &next)?;
                }
                record_ins_outs(&mut agents_ins_outs, frame_index, &samples, &prediction);
                debug!(frame_index, agents = samples.len(), "Agents stepped");
            }

            let ego_samples = sim.rasterise_frame_batch(frame_index)?;
            let batch = collate(&ego_samples)?;
            let prediction = self.ego_policy.forward(Actor::Ego, &batch)?;
            if should_update && !self.ego_policy.is_ground_truth() {
                let (translations, yaws) = next_ego_poses(&ego_samples, &prediction);
                sim.set_ego(frame_index, 1, translations.view(), yaws.view())?;
            }
            record_ins_outs(&mut ego_ins_outs, frame_index, &ego_samples, &prediction);
            debug!(frame_index, scenes = ego_samples.len(), "Ego stepped");
        }

        let outputs = sim
            .scene_ids()
            .into_iter()
            .map(|scene_id| {
                SimulationOutput::new(
                    run_id,
                    scene_id,
                    &sim,
                    ego_ins_outs.remove(&scene_id).unwrap_or_default(),
                    agents_ins_outs.remove(&scene_id).unwrap_or_default(),
                )
            })
            .collect::<SimResult<Vec<_>>>()?;

        info!(frames = len, outputs = outputs.len(), "Unroll complete");
        Ok(outputs)
    }
}

/// World pose reached after the first predicted step of sample `i`.
fn first_step_pose(sample: &Sample, prediction: &Prediction, i: usize) -> ([f64; 2], f64) {
    let offset = [prediction.positions[[i, 0, 0]], prediction.positions[[i, 0, 1]]];
    (
        transform_point(&sample.world_from_agent, offset),
        normalize_angle(sample.yaw + prediction.yaws[[i, 0, 0]]),
    )
}

fn next_agent_states(
    keys: &[AgentKey],
    samples: &[Sample],
    prediction: &Prediction,
) -> BTreeMap<AgentKey, AgentRecord> {
    keys.iter()
        .zip(samples)
        .enumerate()
        .map(|(i, (key, sample))| {
            let (centroid, yaw) = first_step_pose(sample, prediction, i);
            let record = AgentRecord {
                centroid,
                extent: sample.extent,
                yaw,
                velocity: sample.velocity,
                track_id: key.1,
                label_probabilities: sample.label_probabilities,
            };
            (*key, record)
        })
        .collect()
}

/// Per-scene `[current, next]` pose sequences for `set_ego` at offset 1.
fn next_ego_poses(samples: &[Sample], prediction: &Prediction) -> (Array3<f64>, Array2<f64>) {
    let mut translations = Array3::zeros((samples.len(), 2, 2));
    let mut yaws = Array2::zeros((samples.len(), 2));
    for (i, sample) in samples.iter().enumerate() {
        let (position, yaw) = first_step_pose(sample, prediction, i);
        translations[[i, 0, 0]] = sample.centroid[0];
        translations[[i, 0, 1]] = sample.centroid[1];
        yaws[[i, 0]] = sample.yaw;
        translations[[i, 1, 0]] = position[0];
        translations[[i, 1, 1]] = position[1];
        yaws[[i, 1]] = yaw;
    }
    (translations, yaws)
}

fn record_ins_outs(
    ins_outs: &mut BTreeMap<usize, Vec<UnrollInputOutput>>,
    frame_index: usize,
    samples: &[Sample],
    prediction: &Prediction,
) {
    for (i, sample) in samples.iter().enumerate() {
        ins_outs.entry(sample.scene_index).or_default().push(UnrollInputOutput {
            scene_id: sample.scene_index,
            frame_index,
            track_id: sample.track_id,
            centroid: sample.centroid,
            yaw: sample.yaw,
            extent: sample.extent,
            predicted_positions: prediction.positions.slice(s![i, .., ..]).to_owned(),
            predicted_yaws: prediction.yaws.slice(s![i, .., ..]).to_owned(),
        });
    }
}
