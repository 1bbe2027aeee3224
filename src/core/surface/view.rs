use super::buffer::Buffer;
use crate::prelude::*;

/// A surface placed on screen, as handed to plane assignment each cycle.
#[derive(Debug, Clone)]
pub struct View {
    pub surface_id: u32,
    /// Global position and size after the view transform
    pub bounding_box: Rect,
    pub buffer: Option<Arc<Buffer>>,
    pub buffer_scale: i32,
    /// Whether the view transform is at most a translation
    pub transform_is_translation: bool,
    /// Bit per output index the view is visible on
    pub output_mask: u32,
    pub scissor_enabled: bool,
}

impl View {
    pub fn new(surface_id: u32, bounding_box: Rect, buffer: Option<Arc<Buffer>>) -> Self {
        Self {
            surface_id,
            bounding_box,
            buffer,
            buffer_scale: 1,
            transform_is_translation: true,
            output_mask: 1,
            scissor_enabled: false,
        }
    }

    pub fn x(&self) -> i32 {
        self.bounding_box.x
    }

    pub fn y(&self) -> i32 {
        self.bounding_box.y
    }

    pub fn visible_only_on(&self, output_index: u32) -> bool {
        self.output_mask == 1 << output_index
    }
}
