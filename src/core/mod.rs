pub mod errors;
pub mod format;
pub mod time;
pub mod device;
pub mod framebuffer;
pub mod surface;
pub mod output;
pub mod planes;
pub mod render;
pub mod repaint;
pub mod notifier;
pub mod backend;

// Re-export key types
pub use backend::{Backend, HwcState};
pub use framebuffer::{FbId, FbKind, FramebufferRegistry};
pub use notifier::{FrameListener, FrameNotifier, VsyncHandle};
pub use output::{Mode, Output, OutputId};
pub use planes::{Plane, PlaneAssignment};
pub use repaint::PendingState;
