//! ==============================================================================
//! feedback.rs - a node's light, shared by every writer
//! ==============================================================================
//!
//! purpose:
//!     round feedback, the idle animation and the manual `led` endpoint all
//!     write to the same physical light. every write goes through the
//!     per-device lock so they can never interleave on the hardware.
//!
//! relationships:
//!     - uses: hal.rs (Light), idle.rs (frame computation)
//!     - used by: agent.rs, session.rs, server.rs
//!
//! ==============================================================================

use crate::domain::{now_ms, IdleEpoch, LightColor, Rgb};
use crate::hal::Light;
use crate::idle::{IdleFrame, IdleTiming};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// hue of the attract mode
const IDLE_COLOR: LightColor = LightColor::Blue;

#[derive(Clone)]
pub struct FeedbackPort {
    inner: Arc<Inner>,
}

struct Inner {
    /// this light's lock; held only for a single device write
    device: Mutex<Box<dyn Light>>,
    idle: tokio::sync::Mutex<Option<IdleTask>>,
    timing: IdleTiming,
    frame: Duration,
}

struct IdleTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FeedbackPort {
    pub fn new(light: Box<dyn Light>, timing: IdleTiming, frame: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                device: Mutex::new(light),
                idle: tokio::sync::Mutex::new(None),
                timing,
                frame,
            }),
        }
    }

    pub fn set_color(&self, color: LightColor) {
        self.set_rgb(color.rgb());
    }

    pub fn set_rgb(&self, color: Rgb) {
        let mut device = self.inner.device.lock();
        if let Err(e) = device.set_rgb(color) {
            tracing::warn!("light write failed: {:#}", e);
        }
    }

    pub fn off(&self) {
        let mut device = self.inner.device.lock();
        if let Err(e) = device.off() {
            tracing::warn!("light off failed: {:#}", e);
        }
    }

    /// blink `times` times, leaving the light off
    pub async fn blink(&self, color: LightColor, on: Duration, off: Duration, times: u32) {
        for _ in 0..times {
            self.set_color(color);
            tokio::time::sleep(on).await;
            self.off();
            tokio::time::sleep(off).await;
        }
    }

    /// start (or restart) the idle animation for this node's slot
    pub async fn start_idle(&self, epoch: IdleEpoch, slot: u8) {
        let mut idle = self.inner.idle.lock().await;
        if let Some(task) = idle.take() {
            task.cancel.cancel();
            let _ = task.handle.await;
        }

        let cancel = CancellationToken::new();
        let port = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            tracing::info!(epoch = epoch.0, slot, "idle animation started");
            loop {
                port.show_idle_frame(now_ms(), epoch, slot);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(port.inner.frame) => {}
                }
            }
            port.off();
            tracing::info!("idle animation stopped");
        });
        *idle = Some(IdleTask { cancel, handle });
    }

    /// stop the idle animation; the light is off when this returns
    pub async fn stop_idle(&self) {
        let task = self.inner.idle.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
        self.off();
    }

    pub async fn idle_running(&self) -> bool {
        self.inner.idle.lock().await.is_some()
    }

    fn show_idle_frame(&self, now: u64, epoch: IdleEpoch, slot: u8) {
        match self.inner.timing.frame(now, epoch, slot) {
            IdleFrame::Breathe(level) => self.set_rgb(IDLE_COLOR.rgb().scaled(level)),
            IdleFrame::Lit => self.set_color(IDLE_COLOR),
            IdleFrame::Off => self.off(),
        }
    }
}
