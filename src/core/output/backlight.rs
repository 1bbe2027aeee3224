//! Panel backlight control.
//!
//! Brightness is exposed to the compositor on a 0-255 scale and converted to
//! the device's own range.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::CoreError;
use crate::prelude::*;

pub trait Backlight: std::fmt::Debug {
    fn path(&self) -> &Path;

    fn max_brightness(&self) -> Result<u32>;

    fn brightness(&self) -> Result<u32>;

    fn set_brightness(&mut self, value: u32) -> Result<()>;
}

/// Current brightness normalized to 0-255
pub fn normalized(backlight: &dyn Backlight) -> Result<u32> {
    let max = backlight.max_brightness()?;
    if max == 0 {
        return Err(CoreError::unsupported(format!("{} reports max brightness 0", backlight.path().display())));
    }
    Ok((backlight.brightness()? as u64 * 255 / max as u64) as u32)
}

/// Set brightness from a 0-255 value. Values above 255 are ignored.
pub fn set_normalized(backlight: &mut dyn Backlight, value: u32) -> Result<()> {
    if value > 255 {
        return Ok(());
    }
    let max = backlight.max_brightness()?;
    backlight.set_brightness((value as u64 * max as u64 / 255) as u32)
}

/// A `/sys/class/backlight/<name>` device
#[derive(Debug, Clone)]
pub struct SysfsBacklight {
    dir: PathBuf,
}

impl SysfsBacklight {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.join("max_brightness").is_file() {
            return Err(CoreError::unsupported(format!("{} is not a backlight device", dir.display())));
        }
        Ok(Self { dir })
    }

    fn read_value(&self, name: &str) -> Result<u32> {
        let path = self.dir.join(name);
        let text = fs::read_to_string(&path)?;
        text.trim()
            .parse()
            .map_err(|_| CoreError::unsupported(format!("unparsable value {:?} in {}", text.trim(), path.display())))
    }
}

impl Backlight for SysfsBacklight {
    fn path(&self) -> &Path {
        &self.dir
    }

    fn max_brightness(&self) -> Result<u32> {
        self.read_value("max_brightness")
    }

    fn brightness(&self) -> Result<u32> {
        // actual_brightness reflects what the hardware applied
        self.read_value("actual_brightness").or_else(|_| self.read_value("brightness"))
    }

    fn set_brightness(&mut self, value: u32) -> Result<()> {
        fs::write(self.dir.join("brightness"), value.to_string())?;
        Ok(())
    }
}
