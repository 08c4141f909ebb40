//! ==============================================================================
//! agent.rs - per-node scan loop (SatelliteAgent)
//! ==============================================================================
//!
//! purpose:
//!     turns the raw sensor reading into status reports:
//!
//! ```text
//!         Locked ──unlock()──▶ Active ──lock()──▶ Locked
//!
//!     while Active, every tick compares the current tag against the last
//!     REPORTED tag (not the last seen one). a tag held on the reader is
//!     reported once; lifting it produces a distinct "cleared" report.
//!     right after unlock a short grace window swallows leftovers from
//!     before the round.
//! ```
//!
//! relationships:
//!     - reads: sensor.rs (SensorState)
//!     - writes: feedback.rs (own light, satellites only)
//!     - reports to: rpc.rs (StatusSink: HubClient, or the HubSession itself)
//!     - controlled by: server.rs (/unlock /lock /reset), session.rs (hub's own reader)
//!
//! ==============================================================================

use crate::classifier::Classifier;
use crate::domain::{NodeId, StatusReport};
use crate::feedback::FeedbackPort;
use crate::rpc::StatusSink;
use crate::sensor::SensorState;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Locked,
    Active,
}

#[derive(Clone, Copy, Debug)]
pub struct AgentTiming {
    pub poll_interval: Duration,
    pub grace: Duration,
    /// bound on a single status report
    pub report_timeout: Duration,
}

impl Default for AgentTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            grace: Duration::from_millis(500),
            report_timeout: Duration::from_secs(2),
        }
    }
}

struct Gate {
    state: AgentState,
    activated_at: Option<Instant>,
    last_reported: Option<String>,
}

pub struct ScanAgent {
    node_id: NodeId,
    classifier: Classifier,
    sensor: SensorState,
    /// `None` for the hub's own reader: its light follows the evaluation instead
    feedback: Option<FeedbackPort>,
    timing: AgentTiming,
    /// gating state's lock
    gate: Mutex<Gate>,
}

impl ScanAgent {
    pub fn new(
        node_id: NodeId,
        classifier: Classifier,
        sensor: SensorState,
        feedback: Option<FeedbackPort>,
        timing: AgentTiming,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            classifier,
            sensor,
            feedback,
            timing,
            gate: Mutex::new(Gate { state: AgentState::Locked, activated_at: None, last_reported: None }),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn state(&self) -> AgentState {
        self.gate.lock().state
    }

    /// start honoring the reader; drops stale readings and clears the light
    pub async fn unlock(&self) {
        {
            let mut gate = self.gate.lock();
            gate.state = AgentState::Active;
            gate.activated_at = Some(Instant::now());
        }
        self.sensor.clear();
        if let Some(feedback) = &self.feedback {
            feedback.stop_idle().await;
        }
        tracing::info!(node = %self.node_id, "unlocked");
    }

    pub fn lock(&self) {
        {
            let mut gate = self.gate.lock();
            gate.state = AgentState::Locked;
            gate.activated_at = None;
        }
        if let Some(feedback) = &self.feedback {
            feedback.off();
        }
        tracing::info!(node = %self.node_id, "locked");
    }

    /// forget the last reported tag so it is reported again after the next unlock
    pub fn reset(&self) {
        self.gate.lock().last_reported = None;
        if let Some(feedback) = &self.feedback {
            feedback.off();
        }
        tracing::info!(node = %self.node_id, "reset");
    }

    /// decide whether the current reading must be reported
    fn next_report(&self) -> Option<StatusReport> {
        let reading = self.sensor.get_reading();
        let mut gate = self.gate.lock();

        if gate.state != AgentState::Active {
            return None;
        }
        match gate.activated_at {
            Some(at) if at.elapsed() < self.timing.grace => return None,
            _ => {}
        }
        if reading.tag_id == gate.last_reported {
            return None;
        }

        gate.last_reported = reading.tag_id.clone();
        let verdict = self.classifier.classify(reading.tag_id.as_deref());
        Some(StatusReport { satellite_id: self.node_id.clone(), tag_id: reading.tag_id, verdict })
    }

    /// one pass of the loop; returns the report that was attempted, if any
    pub async fn tick(&self, sink: &dyn StatusSink) -> Option<StatusReport> {
        let report = self.next_report()?;

        if let Some(feedback) = &self.feedback {
            match report.verdict {
                Some(verdict) => feedback.set_color(verdict.color()),
                None => feedback.off(),
            }
        }

        match &report.tag_id {
            Some(tag) => tracing::info!(node = %self.node_id, tag = %tag, verdict = ?report.verdict, "tag detected"),
            None => tracing::info!(node = %self.node_id, "tag removed"),
        }

        match tokio::time::timeout(self.timing.report_timeout, sink.report(&report)).await {
            Ok(Ok(())) => tracing::debug!(node = %self.node_id, "status reported"),
            Ok(Err(e)) => tracing::warn!(node = %self.node_id, "status report failed: {}", e),
            Err(_) => tracing::warn!(node = %self.node_id, "status report timed out after {:?}", self.timing.report_timeout),
        }
        Some(report)
    }

    pub fn spawn_loop(self: Arc<Self>, sink: Arc<dyn StatusSink>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(node = %self.node_id, "scan loop started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.timing.poll_interval) => {}
                }
                self.tick(sink.as_ref()).await;
            }
            tracing::info!(node = %self.node_id, "scan loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LightColor, TagReading, Verdict};
    use crate::error::Result;
    use crate::hal::MockLight;
    use crate::idle::IdleTiming;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<StatusReport>>,
    }

    impl RecordingSink {
        fn reports(&self) -> Vec<StatusReport> {
            self.reports.lock().clone()
        }
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn report(&self, report: &StatusReport) -> Result<()> {
            self.reports.lock().push(report.clone());
            Ok(())
        }
    }

    struct Rig {
        agent: Arc<ScanAgent>,
        sensor: SensorState,
        light: MockLight,
        sink: RecordingSink,
    }

    fn rig() -> Rig {
        let sensor = SensorState::new();
        let light = MockLight::new();
        let feedback = FeedbackPort::new(Box::new(light.clone()), IdleTiming::default(), Duration::from_millis(50));
        let agent = ScanAgent::new(
            NodeId::new("sat1"),
            Classifier::new("A", ["A", "B"]),
            sensor.clone(),
            Some(feedback),
            AgentTiming::default(),
        );
        Rig { agent, sensor, light, sink: RecordingSink::default() }
    }

    async fn ticks(rig: &Rig, n: usize) {
        for _ in 0..n {
            rig.agent.tick(&rig.sink).await;
            tokio::time::advance(Duration::from_millis(100)).await;
        }
    }

    async fn unlock_past_grace(rig: &Rig) {
        rig.agent.unlock().await;
        tokio::time::advance(Duration::from_millis(600)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn locked_agent_never_reports() {
        let rig = rig();
        rig.sensor.update(TagReading::tag("A"));
        ticks(&rig, 10).await;
        assert!(rig.sink.reports().is_empty());
        assert_eq!(rig.agent.state(), AgentState::Locked);
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_drops_stale_reading_and_waits_out_grace() {
        let rig = rig();
        rig.sensor.update(TagReading::tag("B"));
        rig.agent.unlock().await;
        assert_eq!(rig.sensor.get_reading().tag_id, None);

        rig.sensor.update(TagReading::tag("A"));
        rig.agent.tick(&rig.sink).await;
        assert!(rig.sink.reports().is_empty(), "reported inside grace window");

        tokio::time::advance(Duration::from_millis(500)).await;
        rig.agent.tick(&rig.sink).await;
        assert_eq!(rig.sink.reports().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn held_tag_is_reported_once() {
        let rig = rig();
        unlock_past_grace(&rig).await;
        rig.sensor.update(TagReading::tag("A"));
        ticks(&rig, 20).await;

        let reports = rig.sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].satellite_id, NodeId::new("sat1"));
        assert_eq!(reports[0].tag_id.as_deref(), Some("A"));
        assert_eq!(reports[0].verdict, Some(Verdict::Correct));
        assert_eq!(rig.light.current(), Some(LightColor::Green.rgb()));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_and_represent_gives_clear_then_redetect() {
        let rig = rig();
        unlock_past_grace(&rig).await;
        rig.sensor.update(TagReading::tag("B"));
        ticks(&rig, 3).await;
        assert_eq!(rig.light.current(), Some(LightColor::Red.rgb()));

        rig.sensor.update(TagReading::empty());
        ticks(&rig, 3).await;
        assert_eq!(rig.light.current(), None);

        rig.sensor.update(TagReading::tag("B"));
        ticks(&rig, 3).await;

        let verdicts: Vec<_> = rig.sink.reports().iter().map(|r| (r.tag_id.clone(), r.verdict)).collect();
        assert_eq!(
            verdicts,
            vec![
                (Some("B".to_string()), Some(Verdict::Wrong)),
                (None, None),
                (Some("B".to_string()), Some(Verdict::Wrong)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_tag_gets_third_color() {
        let rig = rig();
        unlock_past_grace(&rig).await;
        rig.sensor.update(TagReading::tag("ZZZ"));
        ticks(&rig, 1).await;
        assert_eq!(rig.sink.reports()[0].verdict, Some(Verdict::Unknown));
        assert_eq!(rig.light.current(), Some(LightColor::Cyan.rgb()));
    }

    #[tokio::test(start_paused = true)]
    async fn lock_and_reset_are_idempotent() {
        let rig = rig();
        unlock_past_grace(&rig).await;
        rig.sensor.update(TagReading::tag("A"));
        ticks(&rig, 1).await;

        rig.agent.lock();
        rig.agent.lock();
        assert_eq!(rig.agent.state(), AgentState::Locked);
        assert_eq!(rig.light.current(), None);

        rig.agent.reset();
        rig.agent.reset();
        assert_eq!(rig.agent.state(), AgentState::Locked);

        // same tag is reported again in the next round
        unlock_past_grace(&rig).await;
        rig.sensor.update(TagReading::tag("A"));
        ticks(&rig, 3).await;
        assert_eq!(rig.sink.reports().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn without_reset_a_held_tag_is_not_reported_again() {
        let rig = rig();
        unlock_past_grace(&rig).await;
        rig.sensor.update(TagReading::tag("A"));
        ticks(&rig, 1).await;

        rig.agent.lock();
        unlock_past_grace(&rig).await;
        rig.sensor.update(TagReading::tag("A"));
        ticks(&rig, 3).await;
        assert_eq!(rig.sink.reports().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_reports_through_sink_until_cancelled() {
        let rig = rig();
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let handle = rig.agent.clone().spawn_loop(sink.clone(), cancel.clone());

        unlock_past_grace(&rig).await;
        rig.sensor.update(TagReading::tag("A"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.reports().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
