use super::*;
use crate::core::device::{BufferDevice, LayerBuffer, LayerUsage};
use crate::core::errors::CoreError;
use crate::core::planes::Plane;

fn planes(assignments: &[PlaneAssignment]) -> Vec<Plane> {
    assignments.iter().map(|a| a.plane).collect()
}

#[test]
fn test_cursor_view_lands_on_cursor_plane() {
    let mut h = Harness::new(RendererKind::Gl);
    let view = shm_view(1, Rect::new(10, 20, 32, 16), wl_shm::Format::Argb8888);
    let shm = view.buffer.as_ref().unwrap().shm().unwrap().clone();

    let assignments = h.cycle(&[view]).unwrap();
    assert_eq!(planes(&assignments), vec![Plane::Cursor]);
    assert_eq!(assignments[0].feedback, Kind::empty());
    assert!(assignments[0].keep_buffer);

    let output = h.state.backend.output(0).unwrap();
    assert_eq!(output.cursor_view, Some(1));
    assert_eq!(output.cursor_plane_pos, Some((10, 20)));

    let layers = h.hwc.layers(0);
    let (_, cursor) = layers.iter().find(|(_, l)| l.usage == LayerUsage::Cursor).unwrap();
    assert_eq!(cursor.source_crop, Rect::from_size(32, 16));
    assert_eq!(cursor.display_frame, Rect::new(10, 20, 32, 16));
    assert_eq!(cursor.damage, vec![Rect::from_size(32, 16)]);

    // the cursor buffer holds the client rows at the cursor stride, zero padded
    let Some(LayerBuffer::Bo(bo)) = cursor.buffer else {
        panic!("cursor layer without buffer object");
    };
    let bytes = h.gpu.read_bo(bo).unwrap();
    let stride = 64 * 4;
    for y in 0..16 {
        let row = &bytes[y * stride..(y + 1) * stride];
        assert_eq!(&row[..32 * 4], shm.row(y as i32, 4).unwrap());
        assert!(row[32 * 4..].iter().all(|b| *b == 0));
    }
    assert!(bytes[16 * stride..].iter().all(|b| *b == 0));
}

#[test]
fn test_cursor_buffers_alternate_between_frames() {
    let mut h = Harness::new(RendererKind::Gl);
    let view = shm_view(1, Rect::new(0, 0, 16, 16), wl_shm::Format::Argb8888);

    let mut used = Vec::new();
    for _ in 0..3 {
        h.cycle(&[view.clone()]).unwrap();
        h.vsync();
        let layers = h.hwc.layers(0);
        let (_, cursor) = layers.iter().find(|(_, l)| l.usage == LayerUsage::Cursor).unwrap();
        used.push(cursor.buffer);
    }
    assert_ne!(used[0], used[1]);
    assert_eq!(used[0], used[2]);
}

#[test]
fn test_at_most_one_cursor_view() {
    let mut h = Harness::new(RendererKind::Gl);
    let views = [
        shm_view(1, Rect::new(0, 0, 16, 16), wl_shm::Format::Argb8888),
        shm_view(2, Rect::new(100, 100, 16, 16), wl_shm::Format::Argb8888),
        shm_view(3, Rect::new(200, 200, 16, 16), wl_shm::Format::Argb8888),
    ];

    let first = h.cycle(&views).unwrap();
    assert_eq!(planes(&first), vec![Plane::Cursor, Plane::Primary, Plane::Primary]);

    // same input, same assignment
    h.vsync();
    let second = h.cycle(&views).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_oversize_shm_falls_back_to_primary() {
    let mut h = Harness::new(RendererKind::Gl);
    let assignments = h.cycle(&[shm_view(1, Rect::new(0, 0, 128, 128), wl_shm::Format::Argb8888)]).unwrap();

    assert_eq!(planes(&assignments), vec![Plane::Primary]);
    assert!(!assignments[0].keep_buffer);
    assert!(h.state.backend.output(0).unwrap().cursor_view.is_none());
}

#[test]
fn test_opaque_format_not_put_on_cursor_plane() {
    let mut h = Harness::new(RendererKind::Gl);
    let assignments = h.cycle(&[shm_view(1, Rect::new(0, 0, 16, 16), wl_shm::Format::Xrgb8888)]).unwrap();
    assert_eq!(planes(&assignments), vec![Plane::Primary]);
}

#[test]
fn test_view_below_composited_view_stays_primary() {
    let mut h = Harness::new(RendererKind::Gl);
    let views = [
        shm_view(1, Rect::new(0, 0, 200, 200), wl_shm::Format::Xrgb8888),
        shm_view(2, Rect::new(10, 10, 16, 16), wl_shm::Format::Argb8888),
    ];
    let assignments = h.cycle(&views).unwrap();
    assert_eq!(planes(&assignments), vec![Plane::Primary, Plane::Primary]);
}

#[test]
fn test_cursor_plane_requirements() {
    let mut h = Harness::new(RendererKind::Gl);

    let mut rotated = shm_view(1, Rect::new(0, 0, 16, 16), wl_shm::Format::Argb8888);
    rotated.transform_is_translation = false;
    let mut scaled = shm_view(2, Rect::new(100, 0, 16, 16), wl_shm::Format::Argb8888);
    scaled.buffer_scale = 2;
    let mut clipped = shm_view(3, Rect::new(200, 0, 16, 16), wl_shm::Format::Argb8888);
    clipped.scissor_enabled = true;
    let mut elsewhere = shm_view(4, Rect::new(300, 0, 16, 16), wl_shm::Format::Argb8888);
    elsewhere.output_mask = 0b11;
    let no_buffer = View::new(5, Rect::new(400, 0, 16, 16), None);

    let assignments = h.cycle(&[rotated, scaled, clipped, elsewhere, no_buffer]).unwrap();
    assert!(assignments.iter().all(|a| a.plane == Plane::Primary));
    assert!(!assignments[4].keep_buffer);
}

#[test]
fn test_cursor_toggle_and_disable_planes() {
    let mut h = Harness::new(RendererKind::Gl);
    let view = shm_view(1, Rect::new(0, 0, 16, 16), wl_shm::Format::Argb8888);

    h.state.backend.toggle_cursor_planes();
    assert_eq!(planes(&h.cycle(&[view.clone()]).unwrap()), vec![Plane::Primary]);
    h.vsync();

    h.state.backend.toggle_cursor_planes();
    h.state.backend.output_mut(0).unwrap().disable_planes = true;
    assert_eq!(planes(&h.cycle(&[view.clone()]).unwrap()), vec![Plane::Primary]);
    h.vsync();

    h.state.backend.output_mut(0).unwrap().disable_planes = false;
    assert_eq!(planes(&h.cycle(&[view]).unwrap()), vec![Plane::Cursor]);
}

#[test]
fn test_cursor_allocation_failure_disables_cursor_plane() {
    let mut h = Harness::created(test_config(RendererKind::Gl));
    h.gpu.limit_cursor_bos(1);
    h.enable().unwrap();
    assert!(h.state.backend.cursors_are_broken);

    let view = shm_view(1, Rect::new(0, 0, 16, 16), wl_shm::Format::Argb8888);
    assert_eq!(planes(&h.cycle(&[view]).unwrap()), vec![Plane::Primary]);
}

#[test]
fn test_pixman_keeps_every_buffer_and_has_no_cursor_plane() {
    let mut h = Harness::new(RendererKind::Pixman);
    let views = [
        shm_view(1, Rect::new(0, 0, 16, 16), wl_shm::Format::Argb8888),
        shm_view(2, Rect::new(100, 0, 128, 128), wl_shm::Format::Argb8888),
    ];
    let assignments = h.cycle(&views).unwrap();
    assert!(assignments.iter().all(|a| a.plane == Plane::Primary && a.keep_buffer));
}

#[test]
fn test_partial_dmabuf_is_composited() {
    let mut h = Harness::new(RendererKind::Gl);
    let assignments = h.cycle(&[dmabuf_view(1, Rect::new(0, 0, 320, 240))]).unwrap();
    assert_eq!(planes(&assignments), vec![Plane::Primary]);
    assert_eq!(assignments[0].feedback, Kind::empty());
    assert!(assignments[0].keep_buffer);
    assert_eq!(h.renderer.frames(), 1);
}

#[test]
fn test_disabled_output_refuses_assignment() {
    let mut h = Harness::created(test_config(RendererKind::Gl));
    let backend = h.backend();
    let state = backend.repaint_begin();
    let err = backend.assign_planes(&state, 0, &[]).unwrap_err();
    assert!(matches!(err, CoreError::NotEnabled(0)));
    assert!(matches!(backend.assign_planes(&state, 9, &[]).unwrap_err(), CoreError::InvalidOutputId(9)));
    backend.repaint_cancel(state);
}
