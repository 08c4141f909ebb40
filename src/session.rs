//! ==============================================================================
//! session.rs - hub aggregation state machine (HubSession)
//! ==============================================================================
//!
//! purpose:
//!     holds one verdict slot per configured node, evaluates the round every
//!     time a fully-populated table changes, drives every light, and resets
//!     the round a fixed delay after a group victory.
//!
//! ```text
//!         Idle ──start_round()──▶ Active ──update (table full)──▶ Evaluating
//!                                   ▲                                  │
//!                                   └────────── not all correct ───────┘
//!                                                                      │ all correct
//!         Idle ◀──────────── delay elapsed, lock + reset ◀── Resetting ◀┘
//! ```
//!
//! concurrency:
//!     inbound satellite reports (http handlers) and the hub's own scan loop
//!     both write the table through the same mutex. evaluation, including the
//!     rpc fan-out, runs as its own task so a slow satellite never stalls
//!     ingestion of further reports.
//!
//! ==============================================================================

use crate::agent::ScanAgent;
use crate::domain::{LightColor, NodeId, StatusReport, Verdict};
use crate::error::{Error, Result};
use crate::feedback::FeedbackPort;
use crate::rpc::{SatelliteCommand, SatelliteEndpoint, SatelliteRpc, StatusSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// NodeId -> verdict; `None` = not reported / cleared
pub type StatusTable = BTreeMap<NodeId, Option<Verdict>>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundState {
    pub active: bool,
    pub all_reported_once: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Idle,
    Active,
    Evaluating,
    Resetting,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    pub phase: RoundPhase,
    pub active: bool,
    pub all_reported_once: bool,
}

/// outcome of one accepted status update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    /// no slot is `None` after this update
    pub table_full: bool,
    pub evaluation_started: bool,
}

struct SessionState {
    table: StatusTable,
    round: RoundState,
    /// bumped by every start_round
    generation: u64,
    /// generation a victory reset is scheduled for
    pending_reset: Option<u64>,
}

#[derive(Clone)]
pub struct HubSession {
    inner: Arc<Inner>,
}

struct Inner {
    /// the session's lock: status table, round flags, reset bookkeeping
    state: Mutex<SessionState>,
    satellites: Vec<SatelliteEndpoint>,
    rpc: SatelliteRpc,
    feedback: FeedbackPort,
    local_agent: Option<Arc<ScanAgent>>,
    reset_delay: Duration,
    evaluations_in_flight: AtomicUsize,
    button_pressed: AtomicBool,
}

fn empty_table(satellites: &[SatelliteEndpoint]) -> StatusTable {
    std::iter::once(NodeId::local())
        .chain(satellites.iter().map(|s| s.id.clone()))
        .map(|id| (id, None))
        .collect()
}

fn clear_table(table: &mut StatusTable) {
    for slot in table.values_mut() {
        *slot = None;
    }
}

impl HubSession {
    pub fn new(
        satellites: Vec<SatelliteEndpoint>,
        rpc: SatelliteRpc,
        feedback: FeedbackPort,
        local_agent: Option<Arc<ScanAgent>>,
        reset_delay: Duration,
    ) -> Self {
        let table = empty_table(&satellites);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState {
                    table,
                    round: RoundState::default(),
                    generation: 0,
                    pending_reset: None,
                }),
                satellites,
                rpc,
                feedback,
                local_agent,
                reset_delay,
                evaluations_in_flight: AtomicUsize::new(0),
                button_pressed: AtomicBool::new(false),
            }),
        }
    }

    pub fn satellites(&self) -> &[SatelliteEndpoint] {
        &self.inner.satellites
    }

    pub fn feedback(&self) -> &FeedbackPort {
        &self.inner.feedback
    }

    pub fn rpc(&self) -> &SatelliteRpc {
        &self.inner.rpc
    }

    pub fn statuses(&self) -> StatusTable {
        self.inner.state.lock().table.clone()
    }

    pub fn round(&self) -> RoundState {
        self.inner.state.lock().round
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        let state = self.inner.state.lock();
        let phase = if state.pending_reset == Some(state.generation) {
            RoundPhase::Resetting
        } else if self.inner.evaluations_in_flight.load(Ordering::SeqCst) > 0 {
            RoundPhase::Evaluating
        } else if state.round.active {
            RoundPhase::Active
        } else {
            RoundPhase::Idle
        };
        RoundSnapshot {
            phase,
            active: state.round.active,
            all_reported_once: state.round.all_reported_once,
        }
    }

    // ==========================================================================
    // start button flag (read by the kiosk frontend)
    // ==========================================================================

    pub fn note_button_pressed(&self) {
        self.inner.button_pressed.store(true, Ordering::SeqCst);
    }

    /// reading clears the flag
    pub fn take_button_pressed(&self) -> bool {
        self.inner.button_pressed.swap(false, Ordering::SeqCst)
    }

    // ==========================================================================
    // round lifecycle
    // ==========================================================================

    pub async fn start_round(&self) {
        let generation = {
            let mut state = self.inner.state.lock();
            clear_table(&mut state.table);
            state.round = RoundState { active: true, all_reported_once: false };
            state.generation += 1;
            state.generation
        };
        tracing::info!(round = generation, satellites = self.inner.satellites.len(), "round started");

        self.inner.feedback.stop_idle().await;
        // a tag still held from the previous round must be reported again
        if let Some(agent) = &self.inner.local_agent {
            agent.reset();
            agent.unlock().await;
        }

        let summary = self
            .inner
            .rpc
            .broadcast_in_order(&self.inner.satellites, &[SatelliteCommand::Reset, SatelliteCommand::Unlock])
            .await;
        if summary.failed > 0 {
            tracing::warn!(failed = summary.failed, "some satellites did not reset / unlock");
        }
    }

    /// write one node's verdict; evaluates whenever the table is full
    pub fn update_status(&self, node: &str, verdict: Option<Verdict>) -> Result<StatusUpdate> {
        let table_full = {
            let mut state = self.inner.state.lock();
            let slot = state
                .table
                .get_mut(node)
                .ok_or_else(|| Error::UnknownNode(node.to_string()))?;
            *slot = verdict;
            let full = state.table.values().all(Option::is_some);
            if full {
                state.round.all_reported_once = true;
            }
            full
        };
        tracing::info!(node, verdict = ?verdict, table_full, "status updated");

        if table_full {
            self.inner.evaluations_in_flight.fetch_add(1, Ordering::SeqCst);
            let session = self.clone();
            tokio::spawn(async move {
                session.evaluate().await;
                session.inner.evaluations_in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        Ok(StatusUpdate { table_full, evaluation_started: table_full })
    }

    /// drive every light from the table; schedule the victory reset on all-correct
    pub async fn evaluate(&self) {
        let table = self.statuses();

        match table.get(NodeId::LOCAL).copied().flatten() {
            Some(Verdict::Correct) => self.inner.feedback.set_color(LightColor::Green),
            Some(Verdict::Wrong) => self.inner.feedback.set_color(LightColor::Red),
            _ => self.inner.feedback.off(),
        }

        // unknown / empty satellites keep whatever their own agent shows
        let orders: Vec<_> = self
            .inner
            .satellites
            .iter()
            .filter_map(|sat| match table.get(&sat.id).copied().flatten() {
                Some(Verdict::Correct) => Some((sat.clone(), SatelliteCommand::Feedback(LightColor::Green))),
                Some(Verdict::Wrong) => Some((sat.clone(), SatelliteCommand::Feedback(LightColor::Red))),
                _ => None,
            })
            .collect();
        let summary = self.inner.rpc.fan_out(orders).await;
        tracing::debug!(delivered = summary.delivered, failed = summary.failed, "feedback fan-out done");

        self.schedule_victory_reset();
    }

    fn schedule_victory_reset(&self) {
        let generation = {
            let mut state = self.inner.state.lock();
            let victory = state.table.values().all(|v| *v == Some(Verdict::Correct));
            if !victory || state.pending_reset == Some(state.generation) {
                return;
            }
            state.pending_reset = Some(state.generation);
            state.generation
        };
        tracing::info!(round = generation, delay = ?self.inner.reset_delay, "all correct: victory, reset scheduled");

        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(session.inner.reset_delay).await;
            session.victory_reset(generation).await;
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.state.lock().generation == generation
    }

    /// a newer round owns the table; drop this reset
    fn abandon_reset(&self, generation: u64) {
        let mut state = self.inner.state.lock();
        if state.pending_reset == Some(generation) {
            state.pending_reset = None;
        }
        tracing::info!(round = generation, "round restarted before victory reset, skipping");
    }

    /// every step re-checks the generation: a start_round may land while a
    /// fan-out is waiting on a slow satellite
    async fn victory_reset(&self, generation: u64) {
        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                drop(state);
                self.abandon_reset(generation);
                return;
            }
            state.round.active = false;
            if let Some(agent) = &self.inner.local_agent {
                agent.lock();
                agent.reset();
            }
        }

        for command in [SatelliteCommand::Lock, SatelliteCommand::Reset] {
            if !self.is_current(generation) {
                self.abandon_reset(generation);
                return;
            }
            self.inner.rpc.broadcast(&self.inner.satellites, command).await;
        }

        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                drop(state);
                self.abandon_reset(generation);
                return;
            }
            clear_table(&mut state.table);
            state.round.all_reported_once = false;
            state.pending_reset = None;
            // a new round cannot start between the check and this write
            self.inner.feedback.off();
        }
        tracing::info!(round = generation, "round reset after victory");
    }
}

/// the hub's own reader reports straight into the session
#[async_trait]
impl StatusSink for HubSession {
    async fn report(&self, report: &StatusReport) -> Result<()> {
        self.update_status(report.satellite_id.as_str(), report.verdict).map(|_| ())
    }
}
