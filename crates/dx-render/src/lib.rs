//! Rasterisation for deepfake-xai.
//!
//! Turns scalar grids into colormapped RGB rasters, resizes them, draws
//! explanation overlays and writes PNG files.

pub mod export;
pub mod overlay;
pub mod raster;
pub mod resize;
