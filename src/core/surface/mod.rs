pub mod buffer;
pub mod view;

pub use buffer::{Buffer, BufferType, DmaBufData, DmaBufPlane, NativeBufferData, ShmBufferData};
pub use view::View;

#[cfg(test)]
pub mod tests;
