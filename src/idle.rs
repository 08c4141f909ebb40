//! ==============================================================================
//! idle.rs - attract-mode phase computation
//! ==============================================================================
//!
//! purpose:
//!     every node runs the idle animation on its own. they stay in step because
//!     they all derive the phase from the same broadcast epoch and their own
//!     wall clock:
//!
//! ```text
//!         t = (now - epoch) mod (swing + pause + runner + pause)
//!
//!     ┌──────────────┬───────┬──────────────────────────┬───────┐
//!     │ swing        │ pause │ runner                   │ pause │
//!     │ (breathing)  │ (off) │ (one light sweeps 0..4..0)│ (off) │
//!     └──────────────┴───────┴──────────────────────────┴───────┘
//!
//!     clock skew between nodes is the only source of drift.
//! ```
//!
//! ==============================================================================

use crate::domain::IdleEpoch;
use std::time::Duration;

/// length of one full up-and-back sweep, in ticks
const SWEEP_TICKS: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IdleTiming {
    pub swing: Duration,
    pub pause: Duration,
    pub runner: Duration,
    /// runner step size
    pub tick: Duration,
    /// angular speed of the breathing oscillator (rad/s)
    pub breath_rate: f64,
}

impl Default for IdleTiming {
    fn default() -> Self {
        Self {
            swing: Duration::from_secs(30),
            pause: Duration::from_secs(5),
            runner: Duration::from_secs(60),
            tick: Duration::from_secs(1),
            breath_rate: 4.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdlePhase {
    Swing,
    Pause1,
    /// runner with the slot index the sweep currently points at
    Runner { sweep_index: u8 },
    Pause2,
}

/// what one node's light should show right now
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IdleFrame {
    /// idle hue scaled by a level in [0, 1]
    Breathe(f32),
    Lit,
    Off,
}

impl IdleTiming {
    pub fn cycle_ms(&self) -> u64 {
        (self.swing + self.pause + self.runner + self.pause).as_millis() as u64
    }

    /// position inside the cycle; tolerates a local clock behind the epoch
    pub fn elapsed_in_cycle(&self, now_ms: u64, epoch: IdleEpoch) -> u64 {
        let cycle = self.cycle_ms().max(1) as i128;
        (now_ms as i128 - epoch.0 as i128).rem_euclid(cycle) as u64
    }

    pub fn phase_at(&self, t_ms: u64) -> IdlePhase {
        let swing = self.swing.as_millis() as u64;
        let pause = self.pause.as_millis() as u64;
        let runner = self.runner.as_millis() as u64;
        let tick = (self.tick.as_millis() as u64).max(1);

        if t_ms < swing {
            IdlePhase::Swing
        } else if t_ms < swing + pause {
            IdlePhase::Pause1
        } else if t_ms < swing + pause + runner {
            let step = ((t_ms - swing - pause) / tick) % SWEEP_TICKS;
            IdlePhase::Runner { sweep_index: sweep_index(step) }
        } else {
            IdlePhase::Pause2
        }
    }

    pub fn phase(&self, now_ms: u64, epoch: IdleEpoch) -> IdlePhase {
        self.phase_at(self.elapsed_in_cycle(now_ms, epoch))
    }

    /// breathing follows wall-clock time, not the cycle position
    pub fn breath_level(&self, now_ms: u64) -> f32 {
        let secs = now_ms as f64 / 1000.0;
        ((1.0 + (secs * self.breath_rate).sin()) / 2.0) as f32
    }

    pub fn frame(&self, now_ms: u64, epoch: IdleEpoch, slot: u8) -> IdleFrame {
        match self.phase(now_ms, epoch) {
            IdlePhase::Swing => IdleFrame::Breathe(self.breath_level(now_ms)),
            IdlePhase::Runner { sweep_index } if sweep_index == slot => IdleFrame::Lit,
            _ => IdleFrame::Off,
        }
    }
}

/// triangular sweep: 0 1 2 3 4 4 3 2 1 0
fn sweep_index(step: u64) -> u8 {
    let step = step % SWEEP_TICKS;
    if step < SWEEP_TICKS / 2 {
        step as u8
    } else {
        (SWEEP_TICKS - 1 - step) as u8
    }
}
