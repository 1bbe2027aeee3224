//! Frame completion notifier.
//!
//! Vsync arrives on whatever thread the hardware composer uses. The device
//! callback only touches an atomic "frame committed" flag and a calloop
//! [`Ping`]; the frame is finished later on the event loop thread, where all
//! backend state lives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use calloop::ping::{make_ping, Ping};
use calloop::LoopHandle;
use wayland_protocols::wp::presentation_time::server::wp_presentation_feedback::Kind;

use crate::core::backend::Backend;
use crate::core::device::DisplayId;
use crate::core::errors::CoreError;
use crate::core::output::OutputId;
use crate::core::time;
use crate::prelude::*;

/// Receives "frame finished" from the backend
pub trait FrameListener {
    /// `presented_at` is `None` when no presentation happened (the
    /// feedback is invalid).
    fn frame_finished(&mut self, output: OutputId, presented_at: Option<Duration>, flags: Kind);
}

/// Event loop data that owns the backend.
///
/// The notifier's loop-side handler uses this to reach the backend and the
/// compositor at the same time.
pub trait HwcState {
    fn backend_and_listener(&mut self) -> (&mut Backend, &mut dyn FrameListener);
}

/// Loop-side half: owns the flag and the registration of the ping source.
pub struct FrameNotifier {
    committed: Arc<AtomicBool>,
    ping: Ping,
    remove: Option<Box<dyn FnOnce()>>,
}

impl std::fmt::Debug for FrameNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameNotifier")
            .field("committed", &self.committed.load(Ordering::Relaxed))
            .field("registered", &self.remove.is_some())
            .finish()
    }
}

impl FrameNotifier {
    /// Register a ping source with the loop that finishes the frame of `output`
    pub fn register<D: HwcState + 'static>(handle: &LoopHandle<'static, D>, output: OutputId) -> Result<Self> {
        let (ping, source) = make_ping()?;
        let token = handle
            .insert_source(source, move |_, _, state: &mut D| {
                let presented_at = time::presentation_clock();
                let (backend, listener) = state.backend_and_listener();
                backend.finish_frame(output, Some(presented_at), Kind::empty(), listener);
            })
            .map_err(|err| CoreError::unsupported(format!("failed to register frame notifier: {}", err.error)))?;

        let handle = handle.clone();
        tracing::debug!("frame notifier registered for output {}", output);
        Ok(Self {
            committed: Arc::new(AtomicBool::new(false)),
            ping,
            remove: Some(Box::new(move || handle.remove(token))),
        })
    }

    /// Handle for the device vsync callback
    pub fn vsync_handle(&self) -> VsyncHandle {
        VsyncHandle { committed: self.committed.clone(), ping: self.ping.clone() }
    }

    /// Arm: the next vsync completes the frame
    pub fn mark_committed(&self) {
        self.committed.store(true, Ordering::Release);
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }
}

impl Drop for FrameNotifier {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

/// Vsync-side half, safe to move to the device's callback thread.
#[derive(Clone)]
pub struct VsyncHandle {
    committed: Arc<AtomicBool>,
    ping: Ping,
}

impl VsyncHandle {
    /// Called on every vsync. Wakes the loop only if a frame was committed;
    /// returns whether it did.
    pub fn on_vsync(&self, display_id: DisplayId, timestamp_ns: i64) -> bool {
        if self
            .committed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("vsync on display {} with nothing committed", display_id);
            return false;
        }
        tracing::trace!("vsync on display {} at {}ns completes frame", display_id, timestamp_ns);
        self.ping.ping();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vsync_consumes_committed_flag_once() {
        let (ping, _source) = make_ping().unwrap();
        let handle = VsyncHandle { committed: Arc::new(AtomicBool::new(false)), ping };
        assert!(!handle.on_vsync(0, 1));

        handle.committed.store(true, Ordering::Release);
        let remote = handle.clone();
        assert!(std::thread::spawn(move || remote.on_vsync(0, 2)).join().unwrap());
        assert!(!handle.on_vsync(0, 3));
    }
}
