//! # Backend Configuration
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables:
//! - `WAWONA_HWC_RENDERER`: `gl` or `pixman`
//! - `WAWONA_HWC_FORMAT`: `xrgb8888`, `rgb565` or `xrgb2101010`
//! - `WAWONA_HWC_CURSOR_SIZE`: `64` or `64x64`
//! - `WAWONA_HWC_FENCE_TIMEOUT_MS`: bounded wait on release fences

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::CoreError;
use crate::core::format;
use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    #[default]
    Gl,
    Pixman,
}

impl std::str::FromStr for RendererKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gl" => Ok(Self::Gl),
            "pixman" => Ok(Self::Pixman),
            other => Err(CoreError::config(format!("unknown renderer {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub renderer: RendererKind,
    /// Scanout pixel format name
    pub format: String,
    pub cursor_width: u32,
    pub cursor_height: u32,
    pub fence_timeout_ms: u64,
    /// sysfs backlight directory, e.g. /sys/class/backlight/intel_backlight
    pub backlight: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            renderer: RendererKind::Gl,
            format: "xrgb8888".to_string(),
            cursor_width: 256,
            cursor_height: 256,
            fence_timeout_ms: 1000,
            backlight: None,
        }
    }
}

impl BackendConfig {
    /// Load a TOML file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CoreError::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `WAWONA_HWC_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(renderer) = lookup("WAWONA_HWC_RENDERER") {
            self.renderer = renderer.parse()?;
        }
        if let Some(format) = lookup("WAWONA_HWC_FORMAT") {
            self.format = format.trim().to_string();
        }
        if let Some(size) = lookup("WAWONA_HWC_CURSOR_SIZE") {
            let (width, height) = parse_size(&size)?;
            self.cursor_width = width;
            self.cursor_height = height;
        }
        if let Some(timeout) = lookup("WAWONA_HWC_FENCE_TIMEOUT_MS") {
            self.fence_timeout_ms = timeout
                .trim()
                .parse()
                .map_err(|_| CoreError::config(format!("invalid fence timeout {:?}", timeout)))?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        self.output_format()?;
        if self.cursor_width == 0 || self.cursor_height == 0 {
            return Err(CoreError::config("cursor size must be non-zero"));
        }
        Ok(())
    }

    /// Scanout format as a fourcc
    pub fn output_format(&self) -> Result<u32> {
        format::parse_output_format(&self.format)
            .ok_or_else(|| CoreError::config(format!("invalid output format {:?}", self.format)))
    }

    pub fn cursor_size(&self) -> (u32, u32) {
        (self.cursor_width, self.cursor_height)
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}

/// `64` or `64x48`
fn parse_size(value: &str) -> Result<(u32, u32)> {
    let invalid = || CoreError::config(format!("invalid size {:?}", value));
    let value = value.trim();
    match value.split_once('x') {
        Some((w, h)) => Ok((w.parse().map_err(|_| invalid())?, h.parse().map_err(|_| invalid())?)),
        None => {
            let side = value.parse().map_err(|_| invalid())?;
            Ok((side, side))
        }
    }
}
