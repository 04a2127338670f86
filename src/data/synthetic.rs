//! Deterministic synthetic driving logs.
//!
//! Every scene is a straight drive: the ego moves at constant speed
//! along the scene heading, followed by a column of labelled cars in
//! the neighbouring lanes and one unlabelled detection that must never
//! be admitted into simulation.

use serde::Deserialize;

use crate::geometry::yaw_as_rotation33;
use crate::types::{AgentRecord, Frame, IndexInterval, Scene, TrafficLightFace, CAR_LABEL_INDEX};

use super::ChunkedDataset;

/// Track id given to the unlabelled detection.
pub const UNLABELLED_TRACK_ID: u64 = 0;

#[derive(Debug, Clone, Deserialize)]
pub struct SyntheticConfig {
    pub num_scenes: usize,
    pub frames_per_scene: usize,
    /// Labelled cars per frame (track ids `1..=agents_per_frame`).
    pub agents_per_frame: usize,
    /// Metres per frame.
    pub ego_speed: f64,
    /// Metres per frame.
    pub agent_speed: f64,
    /// Lateral spacing between lanes in metres.
    pub lane_offset: f64,
    /// Heading increment between consecutive scenes (radians).
    pub heading_step: f64,
    pub frame_interval_ns: i64,
    #[serde(default = "default_true")]
    pub include_unlabelled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_scenes: 2,
            frames_per_scene: 20,
            agents_per_frame: 3,
            ego_speed: 1.0,
            agent_speed: 0.8,
            lane_offset: 3.5,
            heading_step: 0.4,
            frame_interval_ns: 100_000_000, // 10 Hz
            include_unlabelled: true,
        }
    }
}

/// Build a store from `config`.
pub fn generate(config: &SyntheticConfig) -> ChunkedDataset {
    let mut dataset = ChunkedDataset::new();

    for scene_index in 0..config.num_scenes {
        let heading = scene_index as f64 * config.heading_step;
        let (sin, cos) = heading.sin_cos();
        let origin = [scene_index as f64 * 500.0, 0.0];
        let along = |d: f64, lateral: f64| {
            [
                origin[0] + d * cos - lateral * sin,
                origin[1] + d * sin + lateral * cos,
            ]
        };

        let first_frame = dataset.frames.len();
        for frame_offset in 0..config.frames_per_scene {
            let t = frame_offset as f64;
            let agent_start = dataset.agents.len();

            for k in 1..=config.agents_per_frame {
                let side = if k % 2 == 1 { 1.0 } else { -1.0 };
                let lane = side * config.lane_offset * k.div_ceil(2) as f64;
                let ahead = 8.0 * k as f64 + t * config.agent_speed;
                let velocity = [config.agent_speed * cos, config.agent_speed * sin];
                let mut agent = AgentRecord::new(k as u64, along(ahead, lane), heading, [4.5, 1.9, 1.6])
                    .with_label_probability(CAR_LABEL_INDEX, 1.0);
                agent.velocity = velocity;
                dataset.agents.push(agent);
            }
            if config.include_unlabelled {
                dataset.agents.push(AgentRecord::new(
                    UNLABELLED_TRACK_ID,
                    along(-6.0 + t * config.ego_speed, 0.0),
                    heading,
                    [0.5, 0.5, 0.5],
                ));
            }

            let face_start = dataset.tl_faces.len();
            dataset.tl_faces.push(TrafficLightFace {
                face_id: format!("face-{scene_index}"),
                traffic_light_id: format!("light-{scene_index}"),
                traffic_light_face_status: if frame_offset % 20 < 10 {
                    [1.0, 0.0, 0.0]
                } else {
                    [0.0, 1.0, 0.0]
                },
            });

            let ego = along(t * config.ego_speed, 0.0);
            dataset.frames.push(Frame {
                timestamp: frame_offset as i64 * config.frame_interval_ns,
                agent_index_interval: IndexInterval::new(agent_start, dataset.agents.len()),
                traffic_light_faces_index_interval: IndexInterval::new(face_start, dataset.tl_faces.len()),
                ego_translation: [ego[0], ego[1], 0.0],
                ego_rotation: yaw_as_rotation33(heading),
            });
        }

        let frames = IndexInterval::new(first_frame, dataset.frames.len());
        dataset.scenes.push(Scene {
            frame_index_interval: frames,
            host: format!("synthetic-{scene_index}"),
            start_time: 0,
            end_time: frames.len().saturating_sub(1) as i64 * config.frame_interval_ns,
        });
    }

    dataset
}
