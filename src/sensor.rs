//! latest tag reading of a node, and the loop that keeps it current
//!
//! the polling loop never looks at game state: the moment a round unlocks,
//! the reading is already fresh.

use crate::domain::{now_ms, TagReading};
use crate::hal::TagSensor;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// thread-safe holder of the most recent reading
#[derive(Clone, Default)]
pub struct SensorState {
    /// this reading's lock
    reading: Arc<Mutex<TagReading>>,
}

impl SensorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// replaces the stored reading, stamping the capture time if missing
    pub fn update(&self, mut reading: TagReading) {
        if reading.captured_at.is_none() {
            reading.captured_at = Some(now_ms());
        }
        *self.reading.lock() = reading;
    }

    pub fn get_reading(&self) -> TagReading {
        self.reading.lock().clone()
    }

    /// forget whatever was seen before (used when a round unlocks)
    pub fn clear(&self) {
        *self.reading.lock() = TagReading::empty();
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SensorLoopTiming {
    pub interval: Duration,
    pub error_backoff: Duration,
}

/// poll the reader on a blocking thread until cancelled
pub fn spawn_sensor_loop(
    mut sensor: Box<dyn TagSensor>,
    state: SensorState,
    timing: SensorLoopTiming,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        tracing::info!(interval = ?timing.interval, "tag sensor loop started");
        while !cancel.is_cancelled() {
            let polled = panic::catch_unwind(AssertUnwindSafe(|| sensor.poll_once()))
                .unwrap_or_else(|_| Err(anyhow::anyhow!("tag sensor panicked")));
            match polled {
                Ok(reading) => {
                    if let Some(id) = &reading.tag_id {
                        tracing::trace!(tag = %id, "tag read");
                    }
                    state.update(reading);
                    std::thread::sleep(timing.interval);
                }
                Err(e) => {
                    tracing::warn!("tag read failed: {:#}", e);
                    std::thread::sleep(timing.error_backoff);
                }
            }
        }
        tracing::info!("tag sensor loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockTagSensor;

    #[test]
    fn update_replaces_and_stamps() {
        let state = SensorState::new();
        assert_eq!(state.get_reading(), TagReading::empty());

        state.update(TagReading::tag("A"));
        let reading = state.get_reading();
        assert_eq!(reading.tag_id.as_deref(), Some("A"));
        assert!(reading.captured_at.is_some());

        state.update(TagReading { tag_id: None, captured_at: Some(42) });
        assert_eq!(state.get_reading(), TagReading { tag_id: None, captured_at: Some(42) });
    }

    #[test]
    fn clear_drops_stale_reading() {
        let state = SensorState::new();
        state.update(TagReading::tag("B"));
        state.clear();
        assert_eq!(state.get_reading().tag_id, None);
    }

    #[tokio::test]
    async fn loop_tracks_sensor_until_cancelled() {
        let sensor = MockTagSensor::new();
        let state = SensorState::new();
        let cancel = CancellationToken::new();
        let timing = SensorLoopTiming {
            interval: Duration::from_millis(2),
            error_backoff: Duration::from_millis(2),
        };
        let handle = spawn_sensor_loop(Box::new(sensor.clone()), state.clone(), timing, cancel.clone());

        sensor.present("A");
        let mut seen = false;
        for _ in 0..200 {
            if state.get_reading().tag_id.as_deref() == Some("A") {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(seen, "sensor loop never published the tag");

        cancel.cancel();
        handle.await.unwrap();
    }

    /// panics once, then behaves like a reader holding "A"
    struct FlakySensor {
        calls: usize,
    }

    impl TagSensor for FlakySensor {
        fn poll_once(&mut self) -> anyhow::Result<TagReading> {
            self.calls += 1;
            if self.calls == 1 {
                panic!("spi bus gone");
            }
            Ok(TagReading::tag("A"))
        }
    }

    #[tokio::test]
    async fn loop_survives_a_panicking_reader() {
        let state = SensorState::new();
        let cancel = CancellationToken::new();
        let timing = SensorLoopTiming {
            interval: Duration::from_millis(2),
            error_backoff: Duration::from_millis(2),
        };
        let handle = spawn_sensor_loop(Box::new(FlakySensor { calls: 0 }), state.clone(), timing, cancel.clone());

        let mut seen = false;
        for _ in 0..200 {
            if state.get_reading().tag_id.as_deref() == Some("A") {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(seen, "loop stopped after the reader panicked");

        cancel.cancel();
        handle.await.unwrap();
    }
}
