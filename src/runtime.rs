//! ==============================================================================
//! runtime.rs - role wiring for one node (hub or satellite)
//! ==============================================================================
//!
//! purpose:
//!     turns a HostConfig plus a set of opened devices into a running node:
//!     background loops, the shared light, and the http router for the role.
//!
//! relationships:
//!     - used by: main.rs (start, serve)
//!     - uses: hal.rs (devices), sensor.rs, agent.rs, session.rs, trigger.rs,
//!             rpc.rs (http links), server.rs (routers)
//!
//! architecture:
//!
//! ```text
//!     ┌──────────────────────────── hub ─────────────────────────────┐
//!     │  sensor loop ─▶ SensorState ─▶ ScanAgent("local") ──┐        │
//!     │  button loop ─▶ StartTrigger ───────────────────────┤        │
//!     │  http /api/* ───────────────────────────────────────┴▶ HubSession
//!     │                                                    │  rpc fan-out
//!     └────────────────────────────────────────────────────┼─────────┘
//!                                                          ▼
//!     ┌───────────────────────── satellite ──────────────────────────┐
//!     │  sensor loop ─▶ SensorState ─▶ ScanAgent("satN") ─▶ HubClient │
//!     │  http /unlock /lock /reset /led /idle-* ─▶ agent, light       │
//!     └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! shutdown:
//!     every loop holds a child of one root CancellationToken. cancelling it
//!     stops the loops, they are awaited, then the light is switched off.
//!
//! ==============================================================================

use crate::agent::{AgentTiming, ScanAgent};
use crate::classifier::Classifier;
use crate::config::{HostConfig, Role};
use crate::feedback::FeedbackPort;
use crate::hal::{self, DigitalInput, Light, TagSensor};
use crate::rpc::{HttpSatelliteLink, HubClient, SatelliteEndpoint, SatelliteRpc, StatusSink};
use crate::sensor::{spawn_sensor_loop, SensorLoopTiming, SensorState};
use crate::server::{self, HubApi, SatelliteApi};
use crate::session::HubSession;
use crate::trigger::spawn_trigger_loop;

use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// the physical side of a node
pub struct Devices {
    pub light: Box<dyn Light>,
    pub sensor: Box<dyn TagSensor>,
    /// only polled on the hub
    pub button: Box<dyn DigitalInput>,
}

impl Devices {
    /// open every device the config names; missing hardware degrades to disabled devices
    pub fn open(config: &HostConfig) -> Self {
        let button: Box<dyn DigitalInput> = match config.cluster.role {
            Role::Hub => hal::open_button(config),
            Role::Satellite => Box::new(hal::DisabledInput),
        };
        Self { light: hal::open_light(config), sensor: hal::open_tag_sensor(config), button }
    }
}

/// a started node: loops running, router ready to be served
pub struct NodeRuntime {
    role: Role,
    router: Router,
    feedback: FeedbackPort,
    session: Option<HubSession>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeRuntime {
    /// spawn the loops for the configured role; must be called inside a tokio runtime
    pub fn start(config: &HostConfig, devices: Devices) -> Result<Self> {
        let cancel = CancellationToken::new();
        let node_id = config.node_id();
        let idle_slot = config.idle_slot();
        let polling = &config.polling;

        let feedback = FeedbackPort::new(
            devices.light,
            config.idle_timing(),
            Duration::from_millis(config.idle.frame_ms),
        );

        let sensor = SensorState::new();
        let mut tasks = vec![spawn_sensor_loop(
            devices.sensor,
            sensor.clone(),
            SensorLoopTiming {
                interval: Duration::from_millis(polling.sensor_interval_ms),
                error_backoff: Duration::from_millis(polling.error_backoff_ms),
            },
            cancel.child_token(),
        )];

        let classifier = Classifier::new(config.game.correct_id.clone(), config.game.known_ids.iter().cloned());
        let agent_timing = AgentTiming {
            poll_interval: Duration::from_millis(polling.agent_interval_ms),
            grace: Duration::from_millis(polling.grace_ms),
            report_timeout: config.rpc_timeout(),
        };

        let (router, session) = match config.cluster.role {
            Role::Hub => {
                let satellites: Vec<SatelliteEndpoint> = config
                    .cluster
                    .satellites
                    .iter()
                    .map(|s| SatelliteEndpoint::new(s.id.clone(), s.url.clone()))
                    .collect();
                let link = HttpSatelliteLink::new(config.rpc_timeout()).context("building satellite http client")?;
                let rpc = SatelliteRpc::new(Arc::new(link), config.rpc_timeout());

                // the hub's own light follows the evaluation, not its reader
                let agent = ScanAgent::new(node_id, classifier, sensor, None, agent_timing);
                let session = HubSession::new(
                    satellites,
                    rpc,
                    feedback.clone(),
                    Some(agent.clone()),
                    Duration::from_millis(config.game.victory_reset_ms),
                );

                let sink: Arc<dyn StatusSink> = Arc::new(session.clone());
                tasks.push(agent.spawn_loop(sink, cancel.child_token()));
                tasks.push(spawn_trigger_loop(
                    devices.button,
                    config.buzzer.active_high,
                    Duration::from_millis(polling.button_interval_ms),
                    session.clone(),
                    cancel.child_token(),
                ));

                let router = server::hub_router(HubApi { session: session.clone(), idle_slot });
                (router, Some(session))
            }
            Role::Satellite => {
                let hub = HubClient::new(&config.cluster.hub_url, config.rpc_timeout())
                    .context("building hub http client")?;
                let agent = ScanAgent::new(node_id, classifier, sensor, Some(feedback.clone()), agent_timing);
                tasks.push(agent.clone().spawn_loop(Arc::new(hub), cancel.child_token()));

                let router = server::satellite_router(SatelliteApi { agent, feedback: feedback.clone(), idle_slot });
                (router, None)
            }
        };

        tracing::info!(role = ?config.cluster.role, node = %config.node_id(), idle_slot, "node started");
        Ok(Self { role: config.cluster.role, router, feedback, session, cancel, tasks })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// the hub's session; `None` on a satellite
    pub fn session(&self) -> Option<&HubSession> {
        self.session.as_ref()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// serve the role's router until `signal` resolves, then shut down
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "rpc server listening");

        let cancel = self.cancel.clone();
        let served = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = signal => {}
                    _ = cancel.cancelled() => {}
                }
            })
            .await;

        self.shutdown().await;
        served.context("rpc server failed")
    }

    /// stop every loop, wait for them, switch the light off
    pub async fn shutdown(self) {
        tracing::info!("shutting down");
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("background task failed: {}", e);
            }
        }
        self.feedback.stop_idle().await;
        self.feedback.off();
        tracing::info!("shutdown complete");
    }
}

/// bind the configured address and run until ctrl-c
pub async fn run(config: HostConfig) -> Result<()> {
    let listener = TcpListener::bind(&config.cluster.bind)
        .await
        .with_context(|| format!("binding {}", config.cluster.bind))?;

    let node = NodeRuntime::start(&config, Devices::open(&config))?;
    node.serve(listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("ctrl-c received");
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SatelliteEntry;
    use crate::domain::{NodeId, Verdict};
    use crate::hal::{MockInput, MockLight, MockTagSensor};
    use crate::session::StatusTable;

    struct MockRig {
        sensor: MockTagSensor,
        light: MockLight,
        button: MockInput,
    }

    fn mock_devices() -> (Devices, MockRig) {
        let rig = MockRig { sensor: MockTagSensor::new(), light: MockLight::new(), button: MockInput::new() };
        let devices = Devices {
            light: Box::new(rig.light.clone()),
            sensor: Box::new(rig.sensor.clone()),
            button: Box::new(rig.button.clone()),
        };
        (devices, rig)
    }

    fn fast(config: &mut HostConfig) {
        config.game.correct_id = "A".into();
        config.game.known_ids = vec!["A".into(), "B".into()];
        config.game.victory_reset_ms = 300;
        config.polling.sensor_interval_ms = 10;
        config.polling.agent_interval_ms = 10;
        config.polling.grace_ms = 50;
        config.polling.button_interval_ms = 10;
        config.rpc.timeout_ms = 1000;
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
        for _ in 0..300 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    async fn fetch_statuses(client: &reqwest::Client, hub: &str) -> StatusTable {
        client.get(format!("{}/api/statuses", hub)).send().await.unwrap().json().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hub_and_satellite_play_a_round_over_http() {
        let hub_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let sat_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hub_url = format!("http://{}", hub_listener.local_addr().unwrap());
        let sat_url = format!("http://{}", sat_listener.local_addr().unwrap());

        let mut hub_config = HostConfig::default();
        fast(&mut hub_config);
        hub_config.cluster.satellites = vec![SatelliteEntry { id: "sat1".into(), url: sat_url }];

        let mut sat_config = HostConfig::default();
        fast(&mut sat_config);
        sat_config.cluster.role = Role::Satellite;
        sat_config.cluster.node_id = "sat1".into();
        sat_config.cluster.hub_url = hub_url.clone();

        let (hub_devices, hub_rig) = mock_devices();
        let (sat_devices, sat_rig) = mock_devices();
        let hub = NodeRuntime::start(&hub_config, hub_devices).unwrap();
        let sat = NodeRuntime::start(&sat_config, sat_devices).unwrap();
        let session = hub.session().cloned().unwrap();
        assert!(sat.session().is_none());

        let stop = CancellationToken::new();
        let hub_task = tokio::spawn(hub.serve(hub_listener, stop.clone().cancelled_owned()));
        let sat_task = tokio::spawn(sat.serve(sat_listener, stop.clone().cancelled_owned()));

        // physical button starts the round
        hub_rig.button.set(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        hub_rig.button.set(true);
        wait_for("round start", || session.round().active).await;

        let client = reqwest::Client::new();
        let pressed: serde_json::Value =
            client.get(format!("{}/api/buzzer", hub_url)).send().await.unwrap().json().await.unwrap();
        assert_eq!(pressed["pressed"], true);

        // satellite shows a wrong tag, hub reader the correct one
        sat_rig.sensor.present("B");
        hub_rig.sensor.present("A");
        wait_for("full table", || session.statuses().values().all(Option::is_some)).await;
        let table = fetch_statuses(&client, &hub_url).await;
        assert_eq!(table[&NodeId::new("sat1")], Some(Verdict::Wrong));
        assert_eq!(table[&NodeId::local()], Some(Verdict::Correct));
        wait_for("hub light", || hub_rig.light.current() == Some(crate::domain::LightColor::Green.rgb())).await;

        // swap to the correct tag: victory, then reset
        sat_rig.sensor.present("A");
        wait_for("victory reset", || !session.round().active).await;
        assert!(fetch_statuses(&client, &hub_url).await.values().all(Option::is_none));
        wait_for("satellite light off", || sat_rig.light.current().is_none()).await;

        stop.cancel();
        hub_task.await.unwrap().unwrap();
        sat_task.await.unwrap().unwrap();
        assert_eq!(hub_rig.light.current(), None);
    }

    #[tokio::test]
    async fn shutdown_stops_loops_and_turns_light_off() {
        let mut config = HostConfig::default();
        fast(&mut config);
        let (devices, rig) = mock_devices();
        let node = NodeRuntime::start(&config, devices).unwrap();
        assert_eq!(node.role(), Role::Hub);

        let cancel = node.cancel_token();
        node.shutdown().await;
        assert!(cancel.is_cancelled());
        assert_eq!(rig.light.current(), None);
    }
}
