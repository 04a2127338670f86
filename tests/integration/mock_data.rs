//! Fixtures for integration testing.
//!
//! A hand-built four-frame scene with known agent positions, a
//! multi-scene synthetic log, and a deterministic predictor that moves
//! every actor straight ahead by a fixed distance per frame.

use anyhow::Result;
use ndarray::{s, Array3};
use std::sync::Arc;

use loopsim::config::{DatasetConfig, SimulationConfig};
use loopsim::data::synthetic::{generate, SyntheticConfig};
use loopsim::data::ChunkedDataset;
use loopsim::dataset::rasterizer::StubRasterizer;
use loopsim::dataset::{EgoDataset, SampleBatch};
use loopsim::simulation::{PosePredictor, Prediction};
use loopsim::types::*;

/// Horizon of every `AdvanceModel` prediction.
pub const MODEL_HORIZON: usize = 12;

pub fn dataset_config() -> DatasetConfig {
    DatasetConfig {
        history_num_frames: 2,
        future_num_frames: 12,
        raster_size: [16, 16],
        num_channels: 3,
        filter_agents_threshold: 0.5,
    }
}

pub fn ego_dataset(store: ChunkedDataset) -> EgoDataset {
    EgoDataset::new(dataset_config(), store, Arc::new(StubRasterizer::new([16, 16], 3))).unwrap()
}

pub fn sim_config(distance_th_close: f64, distance_th_far: f64, disable_new_agents: bool) -> SimulationConfig {
    SimulationConfig {
        use_ego_gt: false,
        use_agents_gt: false,
        disable_new_agents,
        distance_th_close,
        distance_th_far,
        num_simulation_steps: None,
        start_frame_index: 0,
    }
}

/// One scene, four frames, ego parked at the origin.
///
/// Frame 0: an invalid detection, track 1 at (1, 1), track 2 at (100, 100).
/// Frame 1: track 1 at (1, 2), track 2 at (1, 1).
/// Frame 2: track 1 at (100, 100).
/// Frame 3: empty.
pub fn mock_dataset() -> ChunkedDataset {
    let car = |track_id: u64, x: f64, y: f64| {
        AgentRecord::new(track_id, [x, y], 0.0, [4.0, 2.0, 1.5]).with_label_probability(CAR_LABEL_INDEX, 1.0)
    };
    let agents = vec![
        AgentRecord::default(),
        car(1, 1.0, 1.0),
        car(2, 100.0, 100.0),
        car(1, 1.0, 2.0),
        car(2, 1.0, 1.0),
        car(1, 100.0, 100.0),
    ];
    let frames = [(0, 3), (3, 5), (5, 6), (6, 6)]
        .iter()
        .enumerate()
        .map(|(i, &(start, end))| Frame {
            timestamp: i as i64 * 100_000_000,
            agent_index_interval: IndexInterval::new(start, end),
            ..Frame::default()
        })
        .collect();

    ChunkedDataset {
        scenes: vec![Scene {
            frame_index_interval: IndexInterval::new(0, 4),
            host: "mock".to_string(),
            ..Scene::default()
        }],
        frames,
        agents,
        tl_faces: Vec::new(),
    }
}

/// Several synthetic scenes with identical track ids.
pub fn multi_scene_dataset() -> ChunkedDataset {
    generate(&SyntheticConfig {
        num_scenes: 3,
        frames_per_scene: 30,
        agents_per_frame: 3,
        ..SyntheticConfig::default()
    })
}

/// Moves every sample `advance_x` metres along its own heading.
pub struct AdvanceModel {
    pub advance_x: f64,
}

impl AdvanceModel {
    pub fn boxed(advance_x: f64) -> Option<Box<dyn PosePredictor>> {
        Some(Box::new(Self { advance_x }))
    }
}

impl PosePredictor for AdvanceModel {
    fn forward(&mut self, batch: &SampleBatch) -> Result<Prediction> {
        let n = batch.centroid.nrows();
        let mut positions = Array3::zeros((n, MODEL_HORIZON, 2));
        positions.slice_mut(s![.., .., 0]).fill(self.advance_x);
        Ok(Prediction {
            positions,
            yaws: Array3::zeros((n, MODEL_HORIZON, 1)),
        })
    }

    fn kind(&self) -> &'static str {
        "advance"
    }

    fn to_device(&mut self, _device: Device) -> Result<()> {
        Ok(())
    }
}
