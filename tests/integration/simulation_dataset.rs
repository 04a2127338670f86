//! Simulation dataset behaviour against the mock and synthetic logs.

use approx::assert_abs_diff_eq;
use ndarray::{Array2, Array3};
use std::collections::BTreeMap;

use loopsim::geometry::rotation33_as_yaw;
use loopsim::simulation::SimulationDataset;
use loopsim::types::*;

use crate::mock_data::*;

#[test]
fn test_simulation_ego() {
    let ego = ego_dataset(multi_scene_dataset());
    let scene_indices: Vec<usize> = (0..ego.num_scenes()).collect();
    let mut dataset = SimulationDataset::from_dataset_indices(&ego, &scene_indices, &sim_config(30.0, 30.0, false)).unwrap();

    // Order is preserved.
    assert_eq!(dataset.scene_ids(), scene_indices);

    let len = dataset.len();
    assert_eq!(len, 30);
    assert!(dataset.get(0, 0).is_ok());
    assert!(dataset.get(0, len - 1).is_ok());
    assert!(matches!(dataset.get(0, len), Err(SimError::IndexOutOfRange { .. })));

    assert_eq!(dataset.rasterise_frame_batch(0).unwrap().len(), scene_indices.len());
    assert_eq!(dataset.rasterise_frame_batch(len - 1).unwrap().len(), scene_indices.len());
    assert!(matches!(
        dataset.rasterise_frame_batch(len),
        Err(SimError::IndexOutOfRange { .. })
    ));

    // Set the ego in several frames for all scenes.
    for (round, frame_index) in [3usize, 17, 0, 29, 3].into_iter().enumerate() {
        let translations = Array3::from_shape_fn((scene_indices.len(), 12, 2), |(s, k, d)| {
            (round * 100 + s * 10 + k) as f64 * 0.1 + d as f64
        });
        let yaws = Array2::from_shape_fn((scene_indices.len(), 12), |(s, k)| {
            0.05 * (round + s + k) as f64
        });

        dataset.set_ego(frame_index, 0, translations.view(), yaws.view()).unwrap();

        for (s, &scene_id) in scene_indices.iter().enumerate() {
            let frame = &dataset.scene(scene_id).unwrap().dataset().frames[frame_index];
            assert_abs_diff_eq!(frame.ego_translation[0], translations[[s, 0, 0]], epsilon = 1e-12);
            assert_abs_diff_eq!(frame.ego_translation[1], translations[[s, 0, 1]], epsilon = 1e-12);
            assert_abs_diff_eq!(rotation33_as_yaw(&frame.ego_rotation), yaws[[s, 0]], epsilon = 1e-9);
        }
    }
}

#[test]
fn test_simulation_agents() {
    let ego = ego_dataset(multi_scene_dataset());
    let scene_indices: Vec<usize> = (0..ego.num_scenes()).collect();
    let mut dataset = SimulationDataset::from_dataset_indices(&ego, &scene_indices, &sim_config(30.0, 30.0, false)).unwrap();

    // Nothing is tracked before the first frame is rasterised.
    assert!(dataset.agents_tracked().is_empty());

    let agents = dataset.rasterise_agents_frame_batch(0).unwrap();
    assert!(!agents.is_empty());

    // Every scene carries the same tracks.
    for (scene_id, track_id) in agents.keys() {
        assert!(agents.contains_key(&(0, *track_id)), "scene {scene_id} track {track_id}");
    }

    assert_eq!(dataset.agents_tracked().len(), agents.len());
}

#[test]
fn test_simulation_agents_mock() {
    let ego = ego_dataset(mock_dataset());
    let mut dataset = SimulationDataset::from_dataset_indices(&ego, &[0], &sim_config(10.0, 30.0, false)).unwrap();
    assert!(dataset.agents_tracked().is_empty());

    let agents = dataset.rasterise_agents_frame_batch(0).unwrap();
    assert_eq!(agents.keys().copied().collect::<Vec<_>>(), vec![(0, 1)]);
    assert_eq!(dataset.agents_tracked().len(), 1);

    let agents = dataset.rasterise_agents_frame_batch(1).unwrap();
    assert_eq!(agents.keys().copied().collect::<Vec<_>>(), vec![(0, 1), (0, 2)]);
    assert_eq!(dataset.agents_tracked().len(), 2);

    let agents = dataset.rasterise_agents_frame_batch(2).unwrap();
    assert!(agents.is_empty());
    assert!(dataset.agents_tracked().is_empty());
}

#[test]
fn test_simulation_agents_mock_disable() {
    let ego = ego_dataset(mock_dataset());
    let mut dataset = SimulationDataset::from_dataset_indices(&ego, &[0], &sim_config(10.0, 30.0, true)).unwrap();
    assert!(dataset.agents_tracked().is_empty());

    let agents = dataset.rasterise_agents_frame_batch(0).unwrap();
    assert_eq!(agents.keys().copied().collect::<Vec<_>>(), vec![(0, 1)]);
    assert_eq!(dataset.agents_tracked().len(), 1);

    // Track 2 comes close but new agents are disabled.
    let agents = dataset.rasterise_agents_frame_batch(1).unwrap();
    assert_eq!(agents.keys().copied().collect::<Vec<_>>(), vec![(0, 1)]);
    assert_eq!(dataset.agents_tracked().len(), 1);

    let agents = dataset.rasterise_agents_frame_batch(2).unwrap();
    assert!(agents.is_empty());
    assert!(dataset.agents_tracked().is_empty());
}

#[test]
fn test_simulation_agents_mock_insert() {
    let ego = ego_dataset(mock_dataset());
    let mut dataset = SimulationDataset::from_dataset_indices(&ego, &[0], &sim_config(10.0, 30.0, true)).unwrap();
    dataset.rasterise_agents_frame_batch(0).unwrap();

    let next_agent =
        AgentRecord::new(1, [-1.0, -1.0], -0.5, [1.0, 1.0, 1.0]).with_label_probability(CAR_LABEL_INDEX, 1.0);

    for frame_index in [1, 2, 3] {
        let mut update = BTreeMap::new();
        update.insert((0, 1), next_agent.clone());
        dataset.set_agents(frame_index, &update).unwrap();

        let agents = dataset.rasterise_agents_frame_batch(frame_index).unwrap();
        assert_eq!(agents.len(), 1);
        let sample = &agents[&(0, 1)];
        assert_eq!(sample.centroid, [-1.0, -1.0]);
        assert_abs_diff_eq!(sample.yaw, -0.5);
        assert_eq!(sample.extent, [1.0, 1.0, 1.0]);
    }

    // Frame 3 was empty in the log; the record was inserted.
    let store = dataset.scene(0).unwrap().dataset();
    assert_eq!(store.frame_agents(3).unwrap().len(), 1);
    assert!(dataset.recorded_scene(0).unwrap().frame_agents(3).unwrap().is_empty());
}

#[test]
fn test_set_agents_overwrite_keeps_count() {
    let ego = ego_dataset(mock_dataset());
    let mut dataset = SimulationDataset::from_dataset_indices(&ego, &[0], &sim_config(10.0, 30.0, false)).unwrap();
    let mut update = BTreeMap::new();
    update.insert((0, 2), AgentRecord::new(2, [5.0, 5.0], 0.1, [1.0, 1.0, 1.0]));
    dataset.set_agents(1, &update).unwrap();

    let store = dataset.scene(0).unwrap().dataset();
    assert_eq!(store.agents.len(), 6);
    let frame_1 = store.frame_agents(1).unwrap();
    assert_eq!(frame_1[1].track_id, 2);
    assert_eq!(frame_1[1].centroid, [5.0, 5.0]);
}

#[test]
fn test_construction_errors() {
    let ego = ego_dataset(multi_scene_dataset());
    let cfg = sim_config(30.0, 30.0, false);
    assert!(matches!(
        SimulationDataset::from_dataset_indices(&ego, &[], &cfg),
        Err(SimError::Config(_))
    ));
    assert!(matches!(
        SimulationDataset::from_dataset_indices(&ego, &[1, 1], &cfg),
        Err(SimError::Config(_))
    ));
    assert!(matches!(
        SimulationDataset::from_dataset_indices(&ego, &[0, 3], &cfg),
        Err(SimError::Config(_))
    ));
}
