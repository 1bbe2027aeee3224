use wayland_server::protocol::wl_output;

use crate::core::device::ConfigId;

/// A display mode backed by a hardware composer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub width: i32,
    pub height: i32,
    /// mHz; 0 in a request means "any refresh"
    pub refresh: i32,
    pub config_id: ConfigId,
    pub flags: wl_output::Mode,
}

impl Mode {
    pub fn new(width: i32, height: i32, refresh: i32, config_id: ConfigId) -> Self {
        Self { width, height, refresh, config_id, flags: wl_output::Mode::empty() }
    }

    /// A mode request; the config id is ignored when matching
    pub fn request(width: i32, height: i32, refresh: i32) -> Self {
        Self::new(width, height, refresh, 0)
    }

    fn same_size(&self, other: &Mode) -> bool {
        self.width == other.width && self.height == other.height
    }

    fn refresh_satisfies(&self, target: &Mode) -> bool {
        self.refresh == target.refresh || target.refresh == 0
    }
}

/// Pick the catalog entry for `target`.
///
/// The current mode wins if it already satisfies the request. Otherwise the
/// first entry with matching size and refresh, then the first entry with
/// matching size and some other refresh.
pub fn choose_mode(modes: &[Mode], current: usize, target: &Mode) -> Option<usize> {
    if let Some(mode) = modes.get(current) {
        if mode.same_size(target) && mode.refresh_satisfies(target) {
            return Some(current);
        }
    }

    let mut fallback = None;
    for (index, mode) in modes.iter().enumerate() {
        if !mode.same_size(target) {
            continue;
        }
        if mode.refresh_satisfies(target) {
            return Some(index);
        }
        fallback.get_or_insert(index);
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<Mode> {
        vec![
            Mode::new(1920, 1080, 60000, 0),
            Mode::new(1280, 720, 50000, 1),
            Mode::new(1280, 720, 60000, 2),
            Mode::new(800, 600, 60000, 3),
        ]
    }

    #[test]
    fn test_current_mode_preferred() {
        let modes = catalog();
        assert_eq!(choose_mode(&modes, 0, &Mode::request(1920, 1080, 60000)), Some(0));
        assert_eq!(choose_mode(&modes, 0, &Mode::request(1920, 1080, 0)), Some(0));
    }

    #[test]
    fn test_exact_match_beats_first_size_match() {
        let modes = catalog();
        assert_eq!(choose_mode(&modes, 0, &Mode::request(1280, 720, 60000)), Some(2));
    }

    #[test]
    fn test_size_match_with_other_refresh() {
        let modes = catalog();
        assert_eq!(choose_mode(&modes, 0, &Mode::request(1280, 720, 75000)), Some(1));
        assert_eq!(choose_mode(&modes, 0, &Mode::request(640, 480, 60000)), None);
    }

    #[test]
    fn test_choose_mode_idempotent() {
        let modes = catalog();
        for target in &modes {
            let first = choose_mode(&modes, 0, target).unwrap();
            // choosing again from the chosen mode lands on the same entry
            assert_eq!(choose_mode(&modes, first, &modes[first]), Some(first));
        }
    }
}
