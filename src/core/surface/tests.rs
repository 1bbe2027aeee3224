use crate::core::surface::*;
use crate::prelude::*;
use wayland_server::protocol::wl_shm;

fn shm(width: i32, height: i32, stride: i32) -> ShmBufferData {
    let data = (0..(stride * height)).map(|i| i as u8).collect();
    ShmBufferData {
        width,
        height,
        stride,
        format: wl_shm::Format::Argb8888,
        data: Arc::new(data),
    }
}

#[test]
fn test_shm_row_skips_stride_padding() {
    // 2 pixels wide, 12 byte stride: 4 bytes of padding per row
    let data = shm(2, 3, 12);
    assert_eq!(data.row(1, 4).unwrap(), &(12u8..20).collect::<Vec<_>>()[..]);
    assert!(data.row(3, 4).is_none());
    assert!(data.row(-1, 4).is_none());
}

#[test]
fn test_buffer_accessors() {
    let buffer = Buffer::new(2, BufferType::Shm(shm(16, 8, 64)));
    assert_eq!(buffer.buffer_type.size(), Some((16, 8)));
    assert!(buffer.shm().is_some() && buffer.dmabuf().is_none());
    assert_eq!(buffer.shm().unwrap().drm_format(), crate::core::format::ARGB8888);

    let dmabuf = Buffer::new(3, BufferType::DmaBuf(DmaBufData::linear(640, 480, 0, 5, 2560)));
    assert_eq!(dmabuf.buffer_type.size(), Some((640, 480)));
    assert_eq!(dmabuf.dmabuf().unwrap().planes, vec![DmaBufPlane { fd: 5, offset: 0, stride: 2560 }]);
    assert_eq!(BufferType::default().size(), None);
}

#[test]
fn test_view_output_mask() {
    let mut view = View::new(7, Rect::new(10, 10, 64, 64), None);
    assert!(view.visible_only_on(0));
    view.output_mask = 0b11;
    assert!(!view.visible_only_on(0));
}
