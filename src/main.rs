//! LOOPSIM: closed-loop simulation over recorded driving logs
//!
//! Entry point. Loads configuration, initialises structured logging,
//! generates a synthetic driving log and unrolls every scene once,
//! printing a JSON summary per scene.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use loopsim::config;
use loopsim::data::synthetic;
use loopsim::dataset::rasterizer::StubRasterizer;
use loopsim::dataset::EgoDataset;
use loopsim::simulation::{ClosedLoopSimulator, ConstantVelocityModel, PosePredictor, SimulationSummary};
use loopsim::types::Device;

const BANNER: &str = r#"
 _     ___   ___  ____  ____ ___ __  __
| |   / _ \ / _ \|  _ \/ ___|_ _|  \/  |
| |  | | | | | | | |_) \___ \| || |\/| |
| |__| |_| | |_| |  __/ ___) | || |  | |
|_____\___/ \___/|_|   |____/___|_|  |_|

  Closed-loop driving-log simulation
  v0.1.0
"#;

fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging(&cfg);

    println!("{BANNER}");
    info!(
        config = %config_path,
        scenes = cfg.synthetic.num_scenes,
        frames_per_scene = cfg.synthetic.frames_per_scene,
        "LOOPSIM starting up"
    );

    // -- Build the log and the sample view ---------------------------------

    let store = synthetic::generate(&cfg.synthetic);
    let rasterizer = Arc::new(StubRasterizer::new(cfg.dataset.raster_size, cfg.dataset.num_channels));
    let ego_dataset =
        EgoDataset::new(cfg.dataset.clone(), store, rasterizer).context("Failed to build ego dataset")?;

    // -- Models ------------------------------------------------------------

    let horizon = cfg.dataset.future_num_frames;
    let model = |use_gt: bool| -> Option<Box<dyn PosePredictor>> {
        if use_gt {
            None
        } else {
            Some(Box::new(ConstantVelocityModel::new(horizon)))
        }
    };
    let mut simulator = ClosedLoopSimulator::new(
        cfg.simulation.clone(),
        ego_dataset,
        Device::Cpu,
        model(cfg.simulation.use_ego_gt),
        model(cfg.simulation.use_agents_gt),
    )
    .context("Failed to build simulator")?;

    // -- Unroll ------------------------------------------------------------

    let scene_indices: Vec<usize> = (0..cfg.synthetic.num_scenes).collect();
    let outputs = simulator.unroll(&scene_indices).context("Unroll failed")?;

    for output in &outputs {
        let summary = output.summary();
        log_summary(&summary);
        println!("{}", serde_json::to_string(&summary)?);
    }
    if outputs.is_empty() {
        warn!("No scenes were simulated");
    }

    Ok(())
}

fn log_summary(summary: &SimulationSummary) {
    info!(
        run_id = %summary.run_id,
        scene = summary.scene_id,
        frames = summary.frames,
        ade = format!("{:.3}m", summary.ego_mean_displacement),
        fde = format!("{:.3}m", summary.ego_final_displacement),
        agents = summary.agents_simulated,
        "Scene simulated"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_filter = cfg.logging.filter.as_deref().unwrap_or("loopsim=info");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let json_logging = cfg.logging.json || std::env::var("LOOPSIM_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
