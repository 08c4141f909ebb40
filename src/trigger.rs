//! physical start button: edge detection on a polled digital input
//!
//! one `Pressed` per inactive -> active transition. the poll interval is the
//! only debounce; the button is pressed by hand in a controlled setting.

use crate::hal::DigitalInput;
use crate::session::HubSession;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonEvent {
    Pressed,
    /// diagnostics only
    Released,
}

pub struct StartTrigger {
    active_level: bool,
    last_level: Option<bool>,
}

impl StartTrigger {
    pub fn new(active_level: bool) -> Self {
        Self { active_level, last_level: None }
    }

    /// feed one sampled level; the first sample only primes the detector
    pub fn observe(&mut self, level: bool) -> Option<ButtonEvent> {
        let previous = self.last_level.replace(level)?;
        if previous == level {
            return None;
        }
        if level == self.active_level {
            Some(ButtonEvent::Pressed)
        } else {
            Some(ButtonEvent::Released)
        }
    }
}

/// poll the button until cancelled; each press starts a round in its own task
pub fn spawn_trigger_loop(
    mut input: Box<dyn DigitalInput>,
    active_level: bool,
    interval: Duration,
    session: HubSession,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut trigger = StartTrigger::new(active_level);
        tracing::info!(?interval, "start button polling started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let level = match input.read() {
                Ok(level) => level,
                Err(e) => {
                    tracing::warn!("button read failed: {:#}", e);
                    continue;
                }
            };
            match trigger.observe(level) {
                Some(ButtonEvent::Pressed) => {
                    tracing::info!("start button pressed");
                    session.note_button_pressed();
                    // the start fan-out may wait on slow satellites; keep sampling
                    let session = session.clone();
                    tokio::spawn(async move { session.start_round().await });
                }
                Some(ButtonEvent::Released) => tracing::debug!("start button released"),
                None => {}
            }
        }
        tracing::info!("start button polling stopped");
    })
}
