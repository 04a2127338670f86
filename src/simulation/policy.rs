//! Pose prediction policies.
//!
//! Defines the `PosePredictor` trait models implement, and the `Policy`
//! each actor class resolves to once at simulator construction: replay
//! of recorded futures, or a model queried every frame.

use anyhow::{bail, Result};
use ndarray::Array3;
use std::fmt;
use tracing::{info, warn};

use crate::dataset::SampleBatch;
use crate::types::{Actor, Device, SimError, SimResult};

/// Predicted future poses, expressed in each sample's own agent frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Shape: `[batch, horizon, 2]`.
    pub positions: Array3<f64>,
    /// Shape: `[batch, horizon, 1]`.
    pub yaws: Array3<f64>,
}

impl Prediction {
    /// Replays the recorded future of every sample.
    pub fn from_targets(batch: &SampleBatch) -> Self {
        Self {
            positions: batch.target_positions.clone(),
            yaws: batch.target_yaws.clone(),
        }
    }

    pub fn horizon(&self) -> usize {
        self.positions.shape()[1]
    }

    /// Check the shapes against a batch of `batch_len` samples.
    pub fn validate(&self, batch_len: usize) -> Result<()> {
        let (rows, horizon, dims) = self.positions.dim();
        if rows != batch_len {
            bail!("positions cover {rows} samples, batch has {batch_len}");
        }
        if horizon == 0 {
            bail!("prediction horizon is empty");
        }
        if dims != 2 {
            bail!("positions must be [batch, horizon, 2], got {:?}", self.positions.shape());
        }
        if self.yaws.dim() != (batch_len, horizon, 1) {
            bail!(
                "yaws must be [{batch_len}, {horizon}, 1], got {:?}",
                self.yaws.shape()
            );
        }
        Ok(())
    }
}

/// A trajectory prediction model.
///
/// `forward` gets a collated batch and returns one future per sample.
/// Only the first predicted step is applied by the simulator.
#[cfg_attr(test, mockall::automock)]
pub trait PosePredictor: Send {
    fn forward(&mut self, batch: &SampleBatch) -> Result<Prediction>;

    /// Short identifier for logs.
    fn kind(&self) -> &'static str;

    /// Move the model to `device`. Called once before the first forward.
    fn to_device(&mut self, device: Device) -> Result<()>;
}

/// How one actor class advances during an unroll.
pub enum Policy {
    /// Recorded futures are replayed and nothing is written back.
    GroundTruth,
    Model(Box<dyn PosePredictor>),
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::GroundTruth => write!(f, "Policy::GroundTruth"),
            Policy::Model(model) => write!(f, "Policy::Model({})", model.kind()),
        }
    }
}

impl Policy {
    /// Pick the policy for `actor`. A missing model is only accepted when
    /// ground truth was requested.
    pub fn resolve(actor: Actor, use_gt: bool, model: Option<Box<dyn PosePredictor>>) -> SimResult<Self> {
        match (use_gt, model) {
            (true, Some(model)) => {
                warn!(%actor, model = model.kind(), "Ground truth requested, ignoring supplied model");
                Ok(Policy::GroundTruth)
            }
            (true, None) => Ok(Policy::GroundTruth),
            (false, Some(model)) => Ok(Policy::Model(model)),
            (false, None) => Err(SimError::Config(format!(
                "{actor} model is required when ground truth is disabled"
            ))),
        }
    }

    pub fn is_ground_truth(&self) -> bool {
        matches!(self, Policy::GroundTruth)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Policy::GroundTruth => "ground_truth",
            Policy::Model(model) => model.kind(),
        }
    }

    pub fn to_device(&mut self, actor: Actor, device: Device) -> SimResult<()> {
        if let Policy::Model(model) = self {
            model
                .to_device(device)
                .map_err(|e| SimError::Config(format!("cannot move {actor} model to {device}: {e:#}")))?;
            info!(%actor, model = model.kind(), %device, "Model placed on device");
        }
        Ok(())
    }

    /// Predict for a whole batch; failures and malformed outputs become
    /// `SimError::Model`.
    pub fn forward(&mut self, actor: Actor, batch: &SampleBatch) -> SimResult<Prediction> {
        let prediction = match self {
            Policy::GroundTruth => Prediction::from_targets(batch),
            Policy::Model(model) => model
                .forward(batch)
                .map_err(|source| SimError::Model { actor, source })?,
        };
        prediction
            .validate(batch.len())
            .map_err(|source| SimError::Model { actor, source })?;
        Ok(prediction)
    }
}

/// Extrapolates the last observed displacement. Used by the demo binary.
#[derive(Debug, Clone)]
pub struct ConstantVelocityModel {
    horizon: usize,
    device: Device,
}

impl ConstantVelocityModel {
    pub fn new(horizon: usize) -> Self {
        Self {
            horizon: horizon.max(1),
            device: Device::Cpu,
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

impl PosePredictor for ConstantVelocityModel {
    fn forward(&mut self, batch: &SampleBatch) -> Result<Prediction> {
        let n = batch.len();
        let mut positions = Array3::zeros((n, self.horizon, 2));
        let yaws = Array3::zeros((n, self.horizon, 1));
        if batch.history_positions.shape()[1] < 2 {
            return Ok(Prediction { positions, yaws });
        }
        for b in 0..n {
            if batch.history_availabilities[[b, 1]] == 0.0 {
                continue;
            }
            // Current position is the origin; the previous one sits one step back.
            let previous = [batch.history_positions[[b, 1, 0]], batch.history_positions[[b, 1, 1]]];
            for k in 0..self.horizon {
                let steps = (k + 1) as f64;
                positions[[b, k, 0]] = -previous[0] * steps;
                positions[[b, k, 1]] = -previous[1] * steps;
            }
        }
        Ok(Prediction { positions, yaws })
    }

    fn kind(&self) -> &'static str {
        "constant_velocity"
    }

    fn to_device(&mut self, device: Device) -> Result<()> {
        self.device = device;
        Ok(())
    }
}
