use std::fs;

use wayland_server::protocol::wl_output;

use super::*;
use crate::core::device::HwcDevice;
use crate::core::errors::CoreError;
use crate::core::output::{Mode, RenderTargets};

#[test]
fn test_create_outputs_builds_mode_catalog() {
    let h = Harness::created(test_config(RendererKind::Gl));
    let output = h.state.backend.output(h.output).unwrap();

    assert_eq!(output.name, "HWC-0");
    assert_eq!(output.modes.len(), 3);
    assert_eq!(output.current_mode, 0);
    assert!(output.modes[0].flags.contains(wl_output::Mode::Current));
    assert_eq!(output.size(), (640, 480));
    // 96 dpi
    assert_eq!((output.mm_width, output.mm_height), (169, 127));
    assert!(!output.enabled);
    assert!(output.backlight.is_none());
}

#[test]
fn test_no_display_no_output() {
    let mut backend = Backend::new(
        test_config(RendererKind::Gl),
        Box::new(VirtualHwc::default()),
        Box::new(VirtualGpu::new()),
    )
    .unwrap();
    assert!(backend.create_outputs().unwrap().is_empty());
}

#[test]
fn test_gl_renderer_requires_gpu() {
    let err = Backend::new(test_config(RendererKind::Gl), Box::new(test_hwc()), Box::new(VirtualGpu::without_gpu()))
        .unwrap_err();
    assert!(err.is_fatal());

    assert!(Backend::new(
        test_config(RendererKind::Pixman),
        Box::new(test_hwc()),
        Box::new(VirtualGpu::without_gpu())
    )
    .is_ok());
}

#[test]
fn test_enable_sets_up_output() {
    let h = Harness::new(RendererKind::Gl);
    let output = h.state.backend.output(0).unwrap();

    assert!(output.enabled);
    assert!(output.state_invalid);
    assert!(matches!(output.targets, Some(RenderTargets::Gl { cursors: Some(_), .. })));
    assert_eq!(output.damage.extents(), output.rect());
    assert!(h.hwc.has_vsync_callback(0));
    assert!(!h.state.backend.cursors_are_broken);
}

#[test]
fn test_disable_releases_everything() {
    let mut h = Harness::new(RendererKind::Gl);
    h.cycle(&[]).unwrap();
    h.vsync();

    h.state.backend.disable(0).unwrap();
    let output = h.state.backend.output(0).unwrap();
    assert!(!output.enabled);
    assert!(output.fb_current.is_none() && output.fb_last.is_none() && output.fb_pending.is_none());
    assert!(output.targets.is_none());
    assert!(h.state.backend.registry().is_empty());
    assert_eq!(h.gpu.live_bos(), 0);

    // the vsync callback no longer completes anything
    h.vsync();
    assert_eq!(h.frames().len(), 1);
    assert!(matches!(h.cycle(&[]).unwrap_err(), CoreError::NotEnabled(0)));
}

#[test]
fn test_disable_deferred_until_frame_completes() {
    let mut h = Harness::new(RendererKind::Pixman);
    h.cycle(&[]).unwrap();

    let err = h.state.backend.disable(0).unwrap_err();
    assert!(matches!(err, CoreError::DisableDeferred(0)));
    let output = h.state.backend.output(0).unwrap();
    assert!(output.disable_pending);
    assert!(output.enabled);

    // busy outputs neither repaint nor restart their loop
    assert!(matches!(h.cycle(&[]).unwrap_err(), CoreError::OutputBusy(0)));
    let TestState { backend, listener } = &mut h.state;
    backend.start_repaint_loop(0, listener).unwrap();

    h.vsync();
    let output = h.state.backend.output(0).unwrap();
    assert!(!output.enabled);
    assert!(!output.disable_pending);
    assert!(output.fb_current.is_none() && output.fb_last.is_none() && output.fb_pending.is_none());
    assert!(h.state.backend.registry().is_empty());
    assert_eq!(h.gpu.live_dumbs(), 0);
    assert_eq!(h.gpu.live_framebuffers(), 0);
    // the compositor still hears about the frame
    assert_eq!(h.frames().len(), 1);
}

#[test]
fn test_busy_output_refuses_repaint() {
    let mut h = Harness::new(RendererKind::Gl);
    h.state.backend.output_mut(0).unwrap().disable_pending = true;
    assert!(matches!(h.cycle(&[]).unwrap_err(), CoreError::OutputBusy(0)));
}

#[test]
fn test_destroy_deferred_until_frame_completes() {
    let mut h = Harness::new(RendererKind::Gl);
    h.cycle(&[]).unwrap();

    h.state.backend.destroy(0).unwrap();
    assert!(h.state.backend.output(0).unwrap().destroy_pending);

    h.vsync();
    assert!(h.state.backend.output(0).is_none());
    assert!(h.state.backend.registry().is_empty());
    assert_eq!(h.gpu.live_bos(), 0);
    // destroyed outputs are not reported
    assert!(h.frames().is_empty());
}

#[test]
fn test_destroy_idle_output() {
    let mut h = Harness::new(RendererKind::Gl);
    h.state.backend.destroy(0).unwrap();
    assert!(h.state.backend.output_ids().is_empty());
    assert!(matches!(h.state.backend.destroy(0).unwrap_err(), CoreError::InvalidOutputId(0)));
}

#[test]
fn test_switch_mode_with_refresh_wildcard() {
    let mut h = Harness::new(RendererKind::Gl);
    h.cycle(&[]).unwrap();
    h.vsync();

    h.state.backend.switch_mode(0, &Mode::request(1024, 768, 0)).unwrap();
    let output = h.state.backend.output(0).unwrap();
    assert_eq!(output.current_mode, 1);
    assert_eq!(output.size(), (1024, 768));
    assert_eq!(output.modes[1].flags, wl_output::Mode::Current | wl_output::Mode::Preferred);
    assert!(output.modes[0].flags.is_empty());
    assert!(output.fb_current.is_none());
    assert!(output.state_invalid);
    assert_eq!(h.hwc.active_config(0).unwrap(), 1);

    // the current mode satisfies a wildcard request: nothing changes
    h.state.backend.switch_mode(0, &Mode::request(1024, 768, 0)).unwrap();
    assert_eq!(h.state.backend.output(0).unwrap().current_mode, 1);

    h.state.backend.switch_mode(0, &Mode::request(1024, 768, 50000)).unwrap();
    assert_eq!(h.state.backend.output(0).unwrap().current_mode, 2);
    assert_eq!(h.hwc.active_config(0).unwrap(), 2);

    h.cycle(&[]).unwrap();
    let present = h.hwc.presents().pop().unwrap();
    assert_eq!(present.layers[0].1.display_frame, Rect::from_size(1024, 768));
}

#[test]
fn test_switch_mode_errors() {
    let mut h = Harness::new(RendererKind::Gl);
    let err = h.state.backend.switch_mode(0, &Mode::request(800, 600, 0)).unwrap_err();
    assert!(matches!(err, CoreError::NoMatchingMode { width: 800, height: 600, refresh: 0 }));

    h.cycle(&[]).unwrap();
    let err = h.state.backend.switch_mode(0, &Mode::request(1024, 768, 0)).unwrap_err();
    assert!(matches!(err, CoreError::FrameInFlight(0)));
    assert_eq!(h.state.backend.output(0).unwrap().current_mode, 0);
}

#[test]
fn test_switch_mode_target_failure_leaves_output_without_targets() {
    let mut h = Harness::new(RendererKind::Pixman);
    h.gpu.limit_dumb_buffers(1);

    assert!(h.state.backend.switch_mode(0, &Mode::request(1024, 768, 60000)).is_err());
    let output = h.state.backend.output(0).unwrap();
    assert!(output.enabled);
    assert!(output.targets.is_none());
    assert_eq!(h.gpu.live_dumbs(), 0);

    let err = h.cycle(&[]).unwrap_err();
    assert!(matches!(err, CoreError::NothingToPresent(0)));
}

#[test]
fn test_set_gamma_uses_first_ramp_entries() {
    let mut h = Harness::new(RendererKind::Gl);
    h.state.backend.set_gamma(0, &[10, 20], &[30, 40], &[50, 60]).unwrap();
    assert_eq!(h.hwc.gamma(0), Some((10.0, 30.0, 50.0)));

    h.hwc.set_fail_gamma(true);
    assert!(h.state.backend.set_gamma(0, &[1], &[2], &[3]).is_ok());
    assert_eq!(h.hwc.gamma(0), Some((10.0, 30.0, 50.0)));

    assert!(h.state.backend.set_gamma(0, &[], &[2], &[3]).is_err());
}

#[test]
fn test_backlight_read_at_enable_and_set() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("max_brightness"), "1000\n").unwrap();
    fs::write(dir.path().join("brightness"), "500\n").unwrap();

    let mut config = test_config(RendererKind::Gl);
    config.backlight = Some(dir.path().to_path_buf());
    let mut h = Harness::created(config);
    h.enable().unwrap();
    assert_eq!(h.state.backend.output(0).unwrap().backlight_current, 127);

    h.state.backend.set_backlight(0, 51).unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("brightness")).unwrap(), "200");
    assert_eq!(h.state.backend.output(0).unwrap().backlight_current, 51);

    h.state.backend.set_backlight(0, 256).unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("brightness")).unwrap(), "200");
}

#[test]
fn test_missing_backlight_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(RendererKind::Gl);
    config.backlight = Some(dir.path().join("absent"));

    let mut h = Harness::created(config);
    h.enable().unwrap();
    assert!(h.state.backend.output(0).unwrap().backlight.is_none());
    assert!(h.state.backend.set_backlight(0, 100).is_ok());
}

#[test]
fn test_switch_to_gl_renderer() {
    let mut h = Harness::new(RendererKind::Pixman);
    h.state.backend.switch_to_gl_renderer().unwrap();

    assert_eq!(h.state.backend.renderer(), RendererKind::Gl);
    let output = h.state.backend.output(0).unwrap();
    assert!(matches!(output.targets, Some(RenderTargets::Gl { .. })));
    assert_eq!(h.gpu.live_dumbs(), 0);

    h.cycle(&[]).unwrap();
    assert_eq!(h.renderer.frames(), 1);
}

#[test]
fn test_switch_to_gl_renderer_without_gpu() {
    let mut backend = Backend::new(
        test_config(RendererKind::Pixman),
        Box::new(test_hwc()),
        Box::new(VirtualGpu::without_gpu()),
    )
    .unwrap();
    assert!(backend.switch_to_gl_renderer().is_err());
    assert_eq!(backend.renderer(), RendererKind::Pixman);
}
