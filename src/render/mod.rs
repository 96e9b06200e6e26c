//! GPU context, scene compositor and window presenter.

pub mod compositor;
pub mod gpu;
pub mod window;

pub use compositor::Compositor;
pub use gpu::GpuContext;
pub use window::StageWindow;
