//! Backend scenarios driven through a calloop loop with the virtual
//! hardware composer and GPU.

use std::time::Duration;

use calloop::EventLoop;
use wayland_protocols::wp::presentation_time::server::wp_presentation_feedback::Kind;
use wayland_server::protocol::wl_shm;

use crate::config::{BackendConfig, RendererKind};
use crate::core::backend::{Backend, HwcState};
use crate::core::device::{VirtualConfig, VirtualGpu, VirtualHwc};
use crate::core::format;
use crate::core::notifier::FrameListener;
use crate::core::output::OutputId;
use crate::core::planes::PlaneAssignment;
use crate::core::render::{Renderer, SoftwareRenderer};
use crate::core::surface::{Buffer, BufferType, DmaBufData, ShmBufferData, View};
use crate::prelude::*;

mod lifecycle;
mod planes;

#[derive(Debug, Default)]
pub struct RecordedFrames {
    pub frames: Vec<(OutputId, Option<Duration>, Kind)>,
}

impl FrameListener for RecordedFrames {
    fn frame_finished(&mut self, output: OutputId, presented_at: Option<Duration>, flags: Kind) {
        self.frames.push((output, presented_at, flags));
    }
}

pub struct TestState {
    pub backend: Backend,
    pub listener: RecordedFrames,
}

impl HwcState for TestState {
    fn backend_and_listener(&mut self) -> (&mut Backend, &mut dyn FrameListener) {
        (&mut self.backend, &mut self.listener)
    }
}

pub struct Harness {
    pub event_loop: EventLoop<'static, TestState>,
    pub state: TestState,
    pub hwc: VirtualHwc,
    pub gpu: VirtualGpu,
    pub renderer: SoftwareRenderer,
    pub output: OutputId,
}

pub fn test_config(renderer: RendererKind) -> BackendConfig {
    BackendConfig { renderer, cursor_width: 64, cursor_height: 64, fence_timeout_ms: 20, ..Default::default() }
}

/// 640x480@60 (active), 1024x768@60, 1024x768@50
pub fn test_hwc() -> VirtualHwc {
    VirtualHwc::new(
        "HWC-0",
        vec![
            VirtualConfig::new(0, 640, 480, 60000),
            VirtualConfig::new(1, 1024, 768, 60000),
            VirtualConfig::new(2, 1024, 768, 50000),
        ],
    )
}

impl Harness {
    /// Backend with one output, created and enabled
    pub fn new(renderer: RendererKind) -> Self {
        let mut harness = Self::created(test_config(renderer));
        let handle = harness.event_loop.handle();
        harness.state.backend.enable(harness.output, &handle).unwrap();
        harness
    }

    /// Backend with one output, created but not enabled
    pub fn created(config: BackendConfig) -> Self {
        let hwc = test_hwc();
        let gpu = VirtualGpu::new();
        let event_loop = EventLoop::try_new().unwrap();
        let mut backend = Backend::new(config, Box::new(hwc.clone()), Box::new(gpu.clone())).unwrap();
        let output = backend.create_outputs().unwrap()[0];
        Self {
            event_loop,
            state: TestState { backend, listener: RecordedFrames::default() },
            hwc,
            gpu,
            renderer: SoftwareRenderer::default(),
            output,
        }
    }

    pub fn backend(&mut self) -> &mut Backend {
        &mut self.state.backend
    }

    pub fn enable(&mut self) -> Result<()> {
        let handle = self.event_loop.handle();
        self.state.backend.enable(self.output, &handle)
    }

    /// One repaint cycle over the whole output
    pub fn cycle(&mut self, views: &[View]) -> Result<Vec<PlaneAssignment>> {
        let id = self.output;
        let backend = &mut self.state.backend;
        let damage = Region::from_rect(backend.output(id).map(|o| o.rect()).unwrap_or_default());
        let mut primary_damage = damage.clone();

        let state = backend.repaint_begin();
        let result = backend
            .assign_planes(&state, id, views)
            .and_then(|assignments| {
                backend.repaint(&state, id, &damage, &mut self.renderer, &mut primary_damage)?;
                Ok(assignments)
            });
        backend.repaint_flush(state);
        result
    }

    /// Repaint `damage` with `renderer`, no views. Returns what is left of
    /// a full-output primary damage.
    pub fn repaint_damage(&mut self, damage: Rect, renderer: &mut dyn Renderer) -> Result<Region> {
        let id = self.output;
        let backend = &mut self.state.backend;
        let mut primary_damage = Region::from_rect(backend.output(id).map(|o| o.rect()).unwrap_or_default());

        let state = backend.repaint_begin();
        let result = backend
            .assign_planes(&state, id, &[])
            .and_then(|_| backend.repaint(&state, id, &Region::from_rect(damage), renderer, &mut primary_damage));
        backend.repaint_flush(state);
        result.map(|()| primary_damage)
    }

    /// Fire a vsync from another thread and run the loop once
    pub fn vsync(&mut self) {
        let hwc = self.hwc.clone();
        std::thread::spawn(move || hwc.fire_vsync(0, 16_666_667)).join().unwrap();
        self.dispatch();
    }

    pub fn dispatch(&mut self) {
        self.event_loop.dispatch(Some(Duration::ZERO), &mut self.state).unwrap();
    }

    pub fn frames(&self) -> &[(OutputId, Option<Duration>, Kind)] {
        &self.state.listener.frames
    }
}

pub fn shm_view(surface_id: u32, rect: Rect, format: wl_shm::Format) -> View {
    let stride = rect.width * 4;
    let data: Vec<u8> = (0..stride * rect.height).map(|i| (i % 251) as u8 + 1).collect();
    let shm = ShmBufferData { width: rect.width, height: rect.height, stride, format, data: Arc::new(data) };
    let buffer = Buffer::new(surface_id, BufferType::Shm(shm));
    View::new(surface_id, rect, Some(Arc::new(buffer)))
}

pub fn dmabuf_view(surface_id: u32, rect: Rect) -> View {
    let dmabuf = DmaBufData::linear(rect.width as u32, rect.height as u32, format::XRGB8888, 42, rect.width as u32 * 4);
    let buffer = Buffer::new(surface_id, BufferType::DmaBuf(dmabuf));
    View::new(surface_id, rect, Some(Arc::new(buffer)))
}
