//! Greenroom: chroma-key video billboard compositor
//!
//! Decodes a video stream, keys out its green screen on the GPU, and
//! composites the remaining footage onto a billboard in a 3D stage.

pub mod config;
pub mod frame;
pub mod keying;
pub mod render;
pub mod scene;
pub mod video;
