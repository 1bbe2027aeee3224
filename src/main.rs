//! Headless run of the hardware-composer backend.
//!
//! Drives a virtual display through the complete repaint cycle: plane
//! assignment with a moving cursor, software rendering, present and vsync
//! completion on the calloop event loop. A thread stands in for the
//! display's vsync interrupt.
//!
//! Environment:
//! - `WAWONA_HWC_CONFIG`: optional TOML configuration file
//! - `WAWONA_HWC_FRAMES`: frames to present before exiting (default 120)
//! - `WAWONA_HWC_*`: configuration overrides, see `BackendConfig`

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use calloop::EventLoop;
use wayland_protocols::wp::presentation_time::server::wp_presentation_feedback::Kind;
use wayland_server::protocol::wl_shm;

use wawona_hwc::core::device::{VirtualConfig, VirtualGpu, VirtualHwc};
use wawona_hwc::core::render::SoftwareRenderer;
use wawona_hwc::core::surface::{Buffer, BufferType, ShmBufferData, View};
use wawona_hwc::core::{time, FrameListener, HwcState};
use wawona_hwc::util::geometry::{Rect, Region};
use wawona_hwc::util::logging;
use wawona_hwc::{wlog, Backend, BackendConfig, OutputId};

const CURSOR_SIZE: i32 = 32;

/// Compositor side: reschedules an output once its frame finished
#[derive(Debug, Default)]
struct Scheduler {
    repaint_needed: BTreeSet<OutputId>,
    presented: u64,
}

impl FrameListener for Scheduler {
    fn frame_finished(&mut self, output: OutputId, presented_at: Option<Duration>, _flags: Kind) {
        if let Some(ts) = presented_at {
            self.presented += 1;
            tracing::trace!("output {} presented at {:?}", output, ts);
        }
        self.repaint_needed.insert(output);
    }
}

struct Headless {
    backend: Backend,
    scheduler: Scheduler,
}

impl HwcState for Headless {
    fn backend_and_listener(&mut self) -> (&mut Backend, &mut dyn FrameListener) {
        (&mut self.backend, &mut self.scheduler)
    }
}

fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,wawona_hwc=debug");
    }
    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(false)
        .init();

    let mut config = match std::env::var_os("WAWONA_HWC_CONFIG") {
        Some(path) => {
            let path = PathBuf::from(path);
            BackendConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
        }
        None => BackendConfig::default(),
    };
    config.apply_env().context("invalid WAWONA_HWC_* override")?;

    let frames: u64 = match std::env::var("WAWONA_HWC_FRAMES") {
        Ok(value) => value.trim().parse().context("WAWONA_HWC_FRAMES must be a number")?,
        Err(_) => 120,
    };

    let hwc = VirtualHwc::new(
        "HWC-0",
        vec![VirtualConfig::new(0, 1920, 1080, 60000), VirtualConfig::new(1, 1280, 720, 60000)],
    );
    let gpu = VirtualGpu::new();

    let mut event_loop: EventLoop<Headless> = EventLoop::try_new().context("creating event loop")?;
    let backend = Backend::new(config, Box::new(hwc.clone()), Box::new(gpu.clone()))?;
    let mut state = Headless { backend, scheduler: Scheduler::default() };

    let outputs = state.backend.create_outputs()?;
    for &id in &outputs {
        state.backend.enable(id, &event_loop.handle())?;
        let Headless { backend, scheduler } = &mut state;
        backend.start_repaint_loop(id, scheduler)?;
    }
    wlog!(logging::MAIN, "Headless backend up with {} output(s), presenting {} frames", outputs.len(), frames);

    let running = Arc::new(AtomicBool::new(true));
    let vsync_thread = {
        let running = running.clone();
        let hwc = hwc.clone();
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_micros(16_667));
                hwc.fire_vsync(0, time::presentation_clock().as_nanos() as i64);
            }
        })
    };

    let mut renderer = SoftwareRenderer::default();
    let mut serial = 0u32;
    while state.scheduler.presented < frames {
        let ready: Vec<OutputId> = std::mem::take(&mut state.scheduler.repaint_needed).into_iter().collect();
        if !ready.is_empty() {
            serial += 1;
            renderer.color = 0xff00_0000 | (serial.wrapping_mul(0x0001_0307) & 0x00ff_ffff);
            // failed outputs get no vsync, try them again next round
            let failed = repaint(&mut state.backend, &ready, &mut renderer, serial);
            state.scheduler.repaint_needed.extend(failed);
        }
        event_loop
            .dispatch(Some(Duration::from_millis(100)), &mut state)
            .context("event loop dispatch")?;
    }

    running.store(false, Ordering::Relaxed);
    if vsync_thread.join().is_err() {
        tracing::error!("vsync thread panicked");
    }

    state.backend.shutdown();
    let counters = gpu.counters();
    wlog!(
        logging::MAIN,
        "Presented {} frames ({} rendered, {} presents); buffer objects {}/{} created/destroyed",
        state.scheduler.presented,
        renderer.frames(),
        hwc.present_count(),
        counters.bos_created,
        counters.bos_destroyed
    );
    Ok(())
}

/// One repaint cycle over `outputs`, returning those that failed
fn repaint(backend: &mut Backend, outputs: &[OutputId], renderer: &mut SoftwareRenderer, serial: u32) -> Vec<OutputId> {
    let mut failed = Vec::new();
    let pending = backend.repaint_begin();
    for &id in outputs {
        let Some(output) = backend.output(id) else {
            continue;
        };
        let rect = output.rect();
        let views = [cursor_view(rect, serial)];
        let damage = Region::from_rect(rect);
        let mut primary_damage = damage.clone();

        let result = backend
            .assign_planes(&pending, id, &views)
            .and_then(|_| backend.repaint(&pending, id, &damage, renderer, &mut primary_damage));
        if let Err(e) = result {
            tracing::warn!("repaint of output {} failed: {}", id, e);
            failed.push(id);
        }
    }
    backend.repaint_flush(pending);
    failed
}

/// A cursor sprite walking along the diagonal of `output`
fn cursor_view(output: Rect, serial: u32) -> View {
    let span = (output.width.min(output.height) - CURSOR_SIZE).max(1);
    let offset = (serial as i32 * 4) % span;

    let stride = CURSOR_SIZE * 4;
    let pixels: Vec<u8> = (0..CURSOR_SIZE * CURSOR_SIZE).flat_map(|_| 0xffff_ffffu32.to_le_bytes()).collect();
    let shm = ShmBufferData {
        width: CURSOR_SIZE,
        height: CURSOR_SIZE,
        stride,
        format: wl_shm::Format::Argb8888,
        data: Arc::new(pixels),
    };
    let buffer = Buffer::new(1, BufferType::Shm(shm));
    View::new(1, Rect::new(output.x + offset, output.y + offset, CURSOR_SIZE, CURSOR_SIZE), Some(Arc::new(buffer)))
}
