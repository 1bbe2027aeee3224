//! Common imports and types used throughout the backend.

pub use std::sync::Arc;
pub use std::collections::HashMap;

pub use crate::util::geometry::{Rect, Region};

pub type Result<T> = std::result::Result<T, crate::core::errors::CoreError>;
