use super::*;
use wayland_server::protocol::wl_output;

fn output_with_modes() -> Output {
    let mut output = Output::new(0, 0, "HWC-0".to_string());
    output.modes = vec![
        Mode::new(1920, 1080, 60000, 10),
        Mode::new(1280, 720, 60000, 11),
        Mode::new(1920, 1080, 30000, 12),
    ];
    output
}

#[test]
fn test_initial_mode_follows_active_config() {
    let mut output = output_with_modes();
    assert!(output.choose_initial_mode(11));
    assert_eq!(output.current_mode, 1);
    assert_eq!(output.size(), (1280, 720));
    assert!(output.modes[1].flags.contains(wl_output::Mode::Current));
    assert!(output.modes[0].flags.is_empty());
}

#[test]
fn test_initial_mode_unknown_config() {
    let mut output = output_with_modes();
    assert!(!output.choose_initial_mode(99));
    assert_eq!(output.current_mode, 0);
}

#[test]
fn test_output_geometry() {
    let mut output = output_with_modes();
    output.choose_initial_mode(10);
    output.x = 100;
    assert_eq!(output.rect(), Rect::new(100, 0, 1920, 1080));
    assert_eq!(output.viewport(), Rect::new(0, 0, 1920, 1080));

    output.damage_all();
    assert_eq!(output.damage.extents(), output.rect());
}

#[test]
fn test_physical_size_from_dpi() {
    let mut output = output_with_modes();
    output.choose_initial_mode(10);
    output.set_physical_size_from_dpi(160, 160);
    // 1920 px at 160 dpi = 12 in
    assert_eq!(output.mm_width, 304);
    assert_eq!(output.mm_height, 171);

    output.set_physical_size_from_dpi(0, -1);
    assert_eq!((output.mm_width, output.mm_height), (0, 0));
}

#[test]
fn test_new_output_defaults() {
    let output = Output::new(3, 0, "HWC-0".to_string());
    assert_eq!(output.make, "unknown");
    assert_eq!(output.subpixel, wl_output::Subpixel::Unknown);
    assert!(!output.enabled);
    assert!(output.slots_empty_except_current());
    assert!(output.current_mode().is_none());
    assert_eq!(output.size(), (0, 0));
}
