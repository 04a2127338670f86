//! Rasterizer seam.
//!
//! The core never looks inside a raster; it only forwards whatever the
//! rasterizer produces to the prediction models.

use ndarray::Array3;

use crate::types::{AgentRecord, Frame, TrafficLightFace};

/// Everything a rasterizer may draw for one sample. History slices are
/// ordered newest first; index 0 is the current frame.
#[derive(Debug, Clone)]
pub struct RasterContext<'a> {
    pub history_frames: Vec<&'a Frame>,
    pub history_agents: Vec<Vec<AgentRecord>>,
    pub history_tl_faces: Vec<&'a [TrafficLightFace]>,
    /// Agent the raster is centred on; `None` centres on the ego.
    pub agent: Option<&'a AgentRecord>,
}

/// Produces a `(channels, height, width)` image for one sample.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, context: &RasterContext<'_>) -> Array3<f32>;

    fn num_channels(&self) -> usize;
}

/// Debug rasterizer that returns an all-zero image of a fixed size.
#[derive(Debug, Clone)]
pub struct StubRasterizer {
    raster_size: [usize; 2],
    num_channels: usize,
}

impl StubRasterizer {
    /// `raster_size` is (width, height).
    pub fn new(raster_size: [usize; 2], num_channels: usize) -> Self {
        Self {
            raster_size,
            num_channels,
        }
    }
}

impl Rasterizer for StubRasterizer {
    fn rasterize(&self, _context: &RasterContext<'_>) -> Array3<f32> {
        let [width, height] = self.raster_size;
        Array3::zeros((self.num_channels, height, width))
    }

    fn num_channels(&self) -> usize {
        self.num_channels
    }
}
