//! Visualization module: prediction plots written alongside training runs.

pub mod scatter;

pub use scatter::{class_color, ScatterConfig, ScatterPlot, ScatterPoint};
