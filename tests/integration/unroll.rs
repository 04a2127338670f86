//! End-to-end unrolls with deterministic predictors.

use approx::assert_abs_diff_eq;
use std::collections::BTreeSet;

use loopsim::config::SimulationConfig;
use loopsim::data::filter_agents_by_track_id;
use loopsim::geometry::{planar_distance, rotation33_as_yaw, yaw_as_rotation33};
use loopsim::simulation::{ClosedLoopSimulator, SimulationDataset, TrajectoryStateIndices};
use loopsim::types::*;

use crate::mock_data::*;

fn unroll_config(use_ego_gt: bool, use_agents_gt: bool) -> SimulationConfig {
    SimulationConfig {
        use_ego_gt,
        use_agents_gt,
        disable_new_agents: true,
        distance_th_close: 1000.0,
        distance_th_far: 1000.0,
        num_simulation_steps: Some(10),
        start_frame_index: 0,
    }
}

#[test]
fn test_unroll_invalid_input() {
    let ego = ego_dataset(multi_scene_dataset());
    let cfg = unroll_config(false, false);

    let missing_agents = ClosedLoopSimulator::new(cfg.clone(), ego.clone(), Device::Cpu, AdvanceModel::boxed(0.0), None);
    assert!(matches!(missing_agents, Err(SimError::Config(_))));

    let missing_ego = ClosedLoopSimulator::new(cfg.clone(), ego.clone(), Device::Cpu, None, AdvanceModel::boxed(0.0));
    assert!(matches!(missing_ego, Err(SimError::Config(_))));

    let missing_both = ClosedLoopSimulator::new(cfg, ego, Device::Cpu, None, None);
    assert!(matches!(missing_both, Err(SimError::Config(_))));
}

#[test]
fn test_unroll_none_input() {
    let ego = ego_dataset(multi_scene_dataset());

    let sim = ClosedLoopSimulator::new(unroll_config(true, false), ego.clone(), Device::Cpu, None, AdvanceModel::boxed(0.0))
        .unwrap();
    assert!(sim.ego_policy().is_ground_truth());
    assert_eq!(sim.agents_policy().kind(), "advance");

    let sim = ClosedLoopSimulator::new(unroll_config(false, true), ego.clone(), Device::Cpu, AdvanceModel::boxed(0.0), None)
        .unwrap();
    assert_eq!(sim.ego_policy().kind(), "advance");
    assert!(sim.agents_policy().is_ground_truth());

    let sim = ClosedLoopSimulator::new(unroll_config(true, true), ego, Device::Cpu, None, None).unwrap();
    assert!(sim.ego_policy().is_ground_truth());
    assert!(sim.agents_policy().is_ground_truth());
}

#[test]
fn test_unroll() {
    let mut store = multi_scene_dataset();

    // Turn the first ego pose of scene 1 so per-scene values cannot be
    // broadcast across scenes unnoticed.
    let first = store.scenes[1].frame_index_interval.start;
    let yaw = rotation33_as_yaw(&store.frames[first].ego_rotation);
    store.frames[first].ego_rotation = yaw_as_rotation33(yaw + 0.75);

    let ego = ego_dataset(store);
    let scene_indices: Vec<usize> = (0..ego.num_scenes()).collect();
    let cfg = unroll_config(false, false);
    let steps = 10;

    let mut sim = ClosedLoopSimulator::new(
        cfg.clone(),
        ego.clone(),
        Device::Cpu,
        AdvanceModel::boxed(1.0),
        AdvanceModel::boxed(0.5),
    )
    .unwrap();
    let outputs = sim.unroll(&scene_indices).unwrap();
    assert_eq!(outputs.iter().map(|o| o.scene_id).collect::<Vec<_>>(), scene_indices);

    for output in &outputs {
        assert_eq!(output.len(), steps);

        for pair in output.simulated_ego.windows(2) {
            let a = [pair[0].ego_translation[0], pair[0].ego_translation[1]];
            let b = [pair[1].ego_translation[0], pair[1].ego_translation[1]];
            assert_abs_diff_eq!(planar_distance(a, b), 1.0, epsilon = 1e-9);
        }

        let states = &output.simulated_ego_states;
        for t in 1..steps {
            let a = [states[[t - 1, TrajectoryStateIndices::X]], states[[t - 1, TrajectoryStateIndices::Y]]];
            let b = [states[[t, TrajectoryStateIndices::X]], states[[t, TrajectoryStateIndices::Y]]];
            assert_abs_diff_eq!(planar_distance(a, b), 1.0, epsilon = 1e-3);
        }

        // The model never turns, so every heading equals the first one.
        let first_yaw = rotation33_as_yaw(&output.recorded_ego[0].ego_rotation);
        for frame in &output.simulated_ego {
            assert_abs_diff_eq!(rotation33_as_yaw(&frame.ego_rotation), first_yaw, epsilon = 1e-2);
        }
        let first_theta = output.recorded_ego_states[[0, TrajectoryStateIndices::THETA]];
        for t in 0..steps {
            assert_abs_diff_eq!(states[[t, TrajectoryStateIndices::THETA]], first_theta, epsilon = 1e-2);
        }
    }

    // Scene 1 starts turned relative to scene 0.
    let theta_0 = outputs[0].simulated_ego_states[[steps - 1, TrajectoryStateIndices::THETA]];
    let theta_1 = outputs[1].simulated_ego_states[[steps - 1, TrajectoryStateIndices::THETA]];
    assert!((theta_1 - theta_0).abs() > 0.5);

    for output in &outputs {
        // Agents admitted at the first frame are controlled throughout.
        let mut probe = SimulationDataset::from_dataset_indices(&ego, &[output.scene_id], &cfg).unwrap();
        probe.rasterise_agents_frame_batch(0).unwrap();
        let tracks: BTreeSet<u64> = probe.agents_tracked().keys().map(|(_, track_id)| *track_id).collect();
        assert!(!tracks.is_empty());
        assert_eq!(output.simulated_track_ids(), tracks);

        for track_id in tracks {
            let states = filter_agents_by_track_id(&output.simulated_agents, track_id);
            assert_eq!(states.len(), steps);
            for pair in states.windows(2) {
                assert_abs_diff_eq!(planar_distance(pair[0].centroid, pair[1].centroid), 0.5, epsilon = 1e-9);
            }
        }
    }
}

#[test]
fn test_unroll_ground_truth_matches_log() {
    let ego = ego_dataset(multi_scene_dataset());
    let mut sim = ClosedLoopSimulator::new(unroll_config(true, true), ego, Device::Cpu, None, None).unwrap();
    let outputs = sim.unroll(&[2, 0]).unwrap();
    assert_eq!(outputs[0].scene_id, 2);
    for output in &outputs {
        assert_eq!(output.simulated_ego, output.recorded_ego);
        assert_eq!(output.simulated_agents, output.recorded_agents);
        assert_eq!(output.simulated_ego_states, output.recorded_ego_states);
        let summary = output.summary();
        assert_abs_diff_eq!(summary.ego_mean_displacement, 0.0);
        assert_eq!(summary.frames, 10);
    }
}

#[test]
fn test_unroll_from_start_frame() {
    let ego = ego_dataset(multi_scene_dataset());
    let cfg = SimulationConfig {
        start_frame_index: 25,
        num_simulation_steps: Some(10),
        ..unroll_config(false, true)
    };
    let mut sim = ClosedLoopSimulator::new(cfg, ego, Device::Cpu, AdvanceModel::boxed(2.0), None).unwrap();
    let outputs = sim.unroll(&[0]).unwrap();
    let output = &outputs[0];
    // Only frames 25..30 exist.
    assert_eq!(output.len(), 5);
    assert_abs_diff_eq!(output.recorded_ego[0].ego_translation[0], 25.0, epsilon = 1e-9);
    assert_abs_diff_eq!(output.simulated_ego[4].ego_translation[0], 33.0, epsilon = 1e-9);
    assert_eq!(output.ego_ins_outs.len(), 5);
    assert_eq!(output.ego_ins_outs[0].predicted_positions.shape(), &[MODEL_HORIZON, 2]);
}

#[test]
fn test_unroll_mock_scene() {
    let ego = ego_dataset(mock_dataset());
    let cfg = SimulationConfig {
        num_simulation_steps: None,
        ..sim_config(10.0, 30.0, true)
    };
    let mut sim = ClosedLoopSimulator::new(cfg, ego, Device::Cpu, AdvanceModel::boxed(0.0), AdvanceModel::boxed(1.0))
        .unwrap();
    let outputs = sim.unroll(&[0]).unwrap();
    let output = &outputs[0];
    assert_eq!(output.len(), 4);

    // Track 1 is admitted at frame 0 and driven forward along x.
    let track = output.simulated_agent_track(1);
    assert_eq!(
        track.iter().map(|a| a.centroid).collect::<Vec<_>>(),
        vec![[1.0, 1.0], [2.0, 1.0], [3.0, 1.0], [4.0, 1.0]]
    );
    // Track 2 is never admitted, so it keeps its recorded states.
    assert_eq!(output.simulated_agent_track(2), output.recorded_agent_track(2));
    assert_eq!(output.simulated_track_ids().into_iter().collect::<Vec<_>>(), vec![1]);
}
