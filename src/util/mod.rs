pub mod logging;
pub mod geometry;
