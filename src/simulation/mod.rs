//! Closed-loop simulation core.
//!
//! `SimulationDataset` holds mutable per-scene copies of the log and the
//! `AgentTracker` that decides which agents are simulated.
//! `ClosedLoopSimulator` drives the unroll with one `Policy` per actor
//! class and returns a `SimulationOutput` per scene.

pub mod dataset;
pub mod output;
pub mod policy;
pub mod tracker;
pub mod unroll;

pub use dataset::SimulationDataset;
pub use output::{SimulationOutput, SimulationSummary, TrajectoryStateIndices, UnrollInputOutput};
pub use policy::{ConstantVelocityModel, Policy, PosePredictor, Prediction};
pub use tracker::AgentTracker;
pub use unroll::ClosedLoopSimulator;
