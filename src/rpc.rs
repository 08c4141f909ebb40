//! ==============================================================================
//! rpc.rs - outbound calls between nodes
//! ==============================================================================
//!
//! purpose:
//!     every call one node makes to another goes through here, so they all
//!     share one policy: a bounded timeout, a log line on failure, no retry,
//!     no state change on failure. the next event (next tag change, next
//!     evaluation, next round) is what heals a missed call.
//!
//! seams:
//!     - SatelliteLink: hub -> satellite commands (HTTP in production)
//!     - StatusSink:    agent -> hub status reports (HTTP from a satellite,
//!                      direct call for the hub's own reader)
//!
//! ==============================================================================

use crate::domain::{Ack, IdleEpoch, IdleStartRequest, LightColor, NodeId, StatusReport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// a satellite as the hub knows it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SatelliteEndpoint {
    pub id: NodeId,
    pub url: String,
}

impl SatelliteEndpoint {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self { id: NodeId::new(id), url: url.into() }
    }
}

/// hub -> satellite command
#[derive(Clone, Debug, PartialEq)]
pub enum SatelliteCommand {
    Unlock,
    Lock,
    Reset,
    Feedback(LightColor),
    IdleStart(IdleEpoch),
    IdleStop,
}

impl SatelliteCommand {
    pub fn path(&self) -> String {
        match self {
            SatelliteCommand::Unlock => "/unlock".to_string(),
            SatelliteCommand::Lock => "/lock".to_string(),
            SatelliteCommand::Reset => "/reset".to_string(),
            SatelliteCommand::Feedback(color) => format!("/led/{}", color.as_str()),
            SatelliteCommand::IdleStart(_) => "/idle-start".to_string(),
            SatelliteCommand::IdleStop => "/idle-stop".to_string(),
        }
    }
}

#[async_trait]
pub trait SatelliteLink: Send + Sync {
    async fn send(&self, target: &SatelliteEndpoint, command: &SatelliteCommand) -> Result<()>;
}

#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn report(&self, report: &StatusReport) -> Result<()>;
}

// ==============================================================================
// http implementations
// ==============================================================================

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn check_status(target: &str, response: &reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::RpcStatus { target: target.to_string(), status: status.as_u16() })
    }
}

pub struct HttpSatelliteLink {
    client: reqwest::Client,
}

impl HttpSatelliteLink {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self { client: http_client(timeout)? })
    }
}

#[async_trait]
impl SatelliteLink for HttpSatelliteLink {
    async fn send(&self, target: &SatelliteEndpoint, command: &SatelliteCommand) -> Result<()> {
        let url = format!("{}{}", target.url.trim_end_matches('/'), command.path());
        let request = self.client.post(&url);
        let request = match command {
            SatelliteCommand::IdleStart(epoch) => {
                request.json(&IdleStartRequest { reference_timestamp: Some(*epoch) })
            }
            _ => request,
        };
        let response = request.send().await?;
        check_status(target.id.as_str(), &response)
    }
}

/// satellite -> hub status reports over HTTP
pub struct HubClient {
    client: reqwest::Client,
    remote_url: String,
}

impl HubClient {
    pub fn new(hub_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            remote_url: format!("{}/api/remote", hub_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl StatusSink for HubClient {
    async fn report(&self, report: &StatusReport) -> Result<()> {
        let response = self.client.post(&self.remote_url).json(report).send().await?;
        check_status("hub", &response)?;
        let ack: Ack = response.json().await?;
        tracing::debug!(message = %ack.message, "hub acknowledged report");
        Ok(())
    }
}

// ==============================================================================
// dispatch policy
// ==============================================================================

/// result of a fan-out; failures have already been logged
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: usize,
}

/// best-effort, time-bounded dispatch of satellite commands
#[derive(Clone)]
pub struct SatelliteRpc {
    link: Arc<dyn SatelliteLink>,
    timeout: Duration,
}

impl SatelliteRpc {
    pub fn new(link: Arc<dyn SatelliteLink>, timeout: Duration) -> Self {
        Self { link, timeout }
    }

    /// one call; `false` when it failed (already logged)
    pub async fn send(&self, target: &SatelliteEndpoint, command: &SatelliteCommand) -> bool {
        let outcome = match tokio::time::timeout(self.timeout, self.link.send(target, command)).await {
            Ok(result) => result,
            Err(_) => Err(Error::RpcTimeout { target: target.id.to_string(), after: self.timeout }),
        };
        match outcome {
            Ok(()) => {
                tracing::debug!(satellite = %target.id, command = ?command, "rpc delivered");
                true
            }
            Err(e) => {
                tracing::warn!(satellite = %target.id, command = ?command, "rpc failed: {}", e);
                false
            }
        }
    }

    /// send every order concurrently; one failure never blocks the others
    pub async fn fan_out(&self, orders: Vec<(SatelliteEndpoint, SatelliteCommand)>) -> FanOut {
        let mut tasks = JoinSet::new();
        for (target, command) in orders {
            let rpc = self.clone();
            tasks.spawn(async move { rpc.send(&target, &command).await });
        }

        let mut summary = FanOut::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => summary.delivered += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    tracing::error!("rpc task panicked: {}", e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    pub async fn broadcast(&self, targets: &[SatelliteEndpoint], command: SatelliteCommand) -> FanOut {
        let orders = targets.iter().map(|t| (t.clone(), command.clone())).collect();
        self.fan_out(orders).await
    }

    /// every target gets `commands` in order; targets run concurrently
    pub async fn broadcast_in_order(&self, targets: &[SatelliteEndpoint], commands: &[SatelliteCommand]) -> FanOut {
        let mut tasks = JoinSet::new();
        for target in targets {
            let rpc = self.clone();
            let target = target.clone();
            let commands = commands.to_vec();
            tasks.spawn(async move {
                let mut summary = FanOut::default();
                for command in &commands {
                    if rpc.send(&target, command).await {
                        summary.delivered += 1;
                    } else {
                        summary.failed += 1;
                    }
                }
                summary
            });
        }

        let mut summary = FanOut::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(part) => {
                    summary.delivered += part.delivered;
                    summary.failed += part.failed;
                }
                Err(e) => {
                    tracing::error!("rpc task panicked: {}", e);
                    summary.failed += commands.len();
                }
            }
        }
        summary
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingLink;
    use super::*;

    fn targets() -> Vec<SatelliteEndpoint> {
        vec![
            SatelliteEndpoint::new("sat1", "http://sat1"),
            SatelliteEndpoint::new("sat2", "http://sat2"),
            SatelliteEndpoint::new("sat3", "http://sat3"),
        ]
    }

    #[test]
    fn command_paths() {
        assert_eq!(SatelliteCommand::Feedback(LightColor::Green).path(), "/led/green");
        assert_eq!(SatelliteCommand::IdleStart(IdleEpoch(1)).path(), "/idle-start");
        assert_eq!(SatelliteCommand::Reset.path(), "/reset");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_satellite() {
        let link = Arc::new(RecordingLink::default());
        let rpc = SatelliteRpc::new(link.clone(), Duration::from_secs(2));
        let summary = rpc.broadcast(&targets(), SatelliteCommand::Unlock).await;
        assert_eq!(summary, FanOut { delivered: 3, failed: 0 });
        assert_eq!(link.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_and_timeouts_are_isolated() {
        let link = Arc::new(RecordingLink::default());
        link.unreachable.lock().insert("sat1".into());
        link.hanging.lock().insert("sat2".into());
        let rpc = SatelliteRpc::new(link.clone(), Duration::from_secs(2));

        let summary = rpc.broadcast(&targets(), SatelliteCommand::Lock).await;
        assert_eq!(summary, FanOut { delivered: 1, failed: 2 });
        assert_eq!(link.sent_to("sat3"), vec![SatelliteCommand::Lock]);
    }

    #[tokio::test(start_paused = true)]
    async fn ordered_broadcast_keeps_per_target_order() {
        let link = Arc::new(RecordingLink::default());
        link.unreachable.lock().insert("sat2".into());
        let rpc = SatelliteRpc::new(link.clone(), Duration::from_secs(2));

        let commands = [SatelliteCommand::Reset, SatelliteCommand::Unlock];
        let summary = rpc.broadcast_in_order(&targets(), &commands).await;
        assert_eq!(summary, FanOut { delivered: 4, failed: 2 });
        for id in ["sat1", "sat2", "sat3"] {
            assert_eq!(link.sent_to(id), commands.to_vec());
        }
    }
}
