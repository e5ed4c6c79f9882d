//! Live session controller
//!
//! The façade the application talks to. Every action returns a `Result`;
//! nothing panics or blocks past this boundary.
//!
//! Start order: registry → lifecycle lease → transport → pipeline/bus →
//! `Active`. Stop runs the same steps in reverse.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::bus::{Event, EventBus, PublishReport};
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleGuard, LifecycleLease, NoopPlatform, Platform};
use crate::pipeline::{CaptureSource, FrameDispatcher, FrameSink, NullCapture, StreamForwarder, StreamFrame};
use crate::protocol::Announcement;
use crate::registry::{SessionRegistry, StopOutcome};
use crate::session::{MatchInfo, Role, SessionHandle, SessionPhase};
use crate::stats::{SessionCounters, SessionStats};
use crate::transport::{discover, DiscoveryResponder, HostListener, ViewerConnection, ViewerSinks};

use super::command::{Command, Response};
use super::config::ControllerConfig;
use super::notice::{ControlEvent, NOTICE_CAPACITY};

/// How long a stop waits for each session task before aborting it
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Resources owned by the running session
struct ActiveSession {
    handle: SessionHandle,
    tasks: Vec<JoinHandle<()>>,
    lease: LifecycleLease,
    sink: Option<FrameSink>,
}

struct ControllerInner {
    config: ControllerConfig,
    registry: Arc<SessionRegistry>,
    counters: Arc<SessionCounters>,
    bus: EventBus,
    frames: FrameDispatcher,
    guard: LifecycleGuard,
    capture: Mutex<Box<dyn CaptureSource>>,
    active: Mutex<Option<ActiveSession>>,
    manual_lease: Mutex<Option<LifecycleLease>>,
    notices: broadcast::Sender<ControlEvent>,
}

/// Coordinates the registry, transport, bus, pipeline and lifecycle guard
#[derive(Clone)]
pub struct LiveController {
    inner: Arc<ControllerInner>,
}

impl LiveController {
    /// Controller with no platform integration and no capture source
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_parts(config, Arc::new(NoopPlatform), Box::new(NullCapture))
    }

    pub fn with_parts(
        config: ControllerConfig,
        platform: Arc<dyn Platform>,
        capture: Box<dyn CaptureSource>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let counters = Arc::new(SessionCounters::new());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Self {
            inner: Arc::new(ControllerInner {
                bus: EventBus::new(Arc::clone(&registry), Arc::clone(&counters)),
                frames: FrameDispatcher::new(Arc::clone(&counters)),
                guard: LifecycleGuard::new(platform),
                capture: Mutex::new(capture),
                active: Mutex::new(None),
                manual_lease: Mutex::new(None),
                config,
                registry,
                counters,
                notices,
            }),
        }
    }

    /// Start hosting `live_match_id`
    ///
    /// Fails with `AlreadyActive` if any session is registered. On any
    /// failure the registry is left idle.
    pub async fn start_host(
        &self,
        league_id: impl Into<String>,
        match_id: impl Into<String>,
        live_match_id: impl Into<String>,
    ) -> Result<()> {
        let inner = &self.inner;
        let info = MatchInfo::new(league_id, match_id, live_match_id);
        let handle = inner.registry.begin(Role::Host, info.clone())?;

        inner.reclaim().await;
        inner.counters.reset();
        let lease = inner.engage();

        match inner.launch_host(&handle).await {
            Ok((tasks, sink)) => inner.commit(handle, info, tasks, lease, Some(sink)).await,
            Err(e) => Err(inner.abandon(&handle, e)),
        }
    }

    /// Stop hosting; a no-op unless a host session for `live_match_id` runs
    pub async fn stop_host(&self, live_match_id: &str) -> Result<()> {
        self.inner.stop(Role::Host, live_match_id).await
    }

    /// Discover and join the host serving `live_match_id`
    ///
    /// Fails with `DiscoveryTimeout` or `ConnectionRefused`; the registry is
    /// left idle on failure.
    pub async fn join_viewer(&self, live_match_id: impl Into<String>) -> Result<()> {
        let inner = &self.inner;
        let handle = inner
            .registry
            .begin(Role::Viewer, MatchInfo::viewer(live_match_id))?;

        inner.reclaim().await;
        inner.counters.reset();
        let lease = inner.engage();

        match inner.launch_viewer(&handle).await {
            Ok((tasks, info)) => inner.commit(handle, info, tasks, lease, None).await,
            Err(e) => Err(inner.abandon(&handle, e)),
        }
    }

    /// Leave the viewer session; a no-op unless joined to `live_match_id`
    pub async fn leave_viewer(&self, live_match_id: &str) -> Result<()> {
        self.inner.stop(Role::Viewer, live_match_id).await
    }

    /// Broadcast an event to every viewer of the host session
    ///
    /// Succeeds as a no-op when no host session for `live_match_id` runs.
    pub fn send_event(&self, live_match_id: impl Into<String>, payload: Map<String, Value>) -> Result<()> {
        self.publish(Event::with_payload(live_match_id, payload));
        Ok(())
    }

    /// Broadcast `event` and report how many viewers it reached
    pub fn publish(&self, event: Event) -> PublishReport {
        self.inner.bus.publish(event)
    }

    /// Hand a captured frame to the host session's viewers
    ///
    /// Never blocks. Returns false when no host session is running.
    pub fn push_frame(&self, frame: StreamFrame) -> bool {
        let sink = self
            .inner
            .active
            .lock()
            .as_ref()
            .and_then(|s| s.sink.clone());
        sink.map(|s| s.push(frame)).unwrap_or(false)
    }

    /// Register the viewer-side event consumer
    pub fn on_event<F>(&self, consumer: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.inner.bus.set_consumer(consumer);
    }

    /// Register the viewer-side frame consumer
    pub fn on_frame<F>(&self, consumer: F)
    where
        F: Fn(StreamFrame) + Send + Sync + 'static,
    {
        self.inner.frames.set_consumer(consumer);
    }

    /// Tear down both consumers; later events and frames are discarded
    pub fn clear_consumers(&self) {
        self.inner.bus.clear_consumer();
        self.inner.frames.clear_consumer();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.inner.notices.subscribe()
    }

    /// Counters of the current (or last) session
    pub fn stats(&self) -> SessionStats {
        self.inner.counters.snapshot()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.registry.phase()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub fn guard(&self) -> &LifecycleGuard {
        &self.inner.guard
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Stop whatever session runs and release every keep-alive resource
    pub async fn shutdown(&self) {
        if let Some(current) = self.inner.registry.current() {
            let _ = self
                .inner
                .stop(current.role, &current.info.live_match_id)
                .await;
        }
        drop(self.inner.manual_lease.lock().take());
        self.inner.guard.release();
    }

    /// Execute a typed command
    pub async fn dispatch(&self, command: Command) -> Result<Response> {
        let platform = self.inner.guard.platform();

        match command {
            Command::StartForegroundService { notice } => {
                let mut manual = self.inner.manual_lease.lock();
                if manual.is_none() {
                    *manual = Some(self.inner.guard.engage(&notice));
                }
            }
            Command::StopForegroundService => {
                drop(self.inner.manual_lease.lock().take());
            }
            Command::OpenBatteryOptimizationSettings => platform.open_battery_optimization_settings()?,
            Command::RequestIgnoreBatteryOptimizations => {
                platform.request_ignore_battery_optimizations()?
            }
            Command::OpenAppDetailsSettings => platform.open_app_details_settings()?,
            Command::GetDeviceInfo => return Ok(Response::DeviceInfo(platform.device_info())),
            Command::StartHost {
                league_id,
                match_id,
                live_match_id,
            } => self.start_host(league_id, match_id, live_match_id).await?,
            Command::StopHost { live_match_id } => self.stop_host(&live_match_id).await?,
            Command::JoinViewer { live_match_id } => self.join_viewer(live_match_id).await?,
            Command::LeaveViewer { live_match_id } => self.leave_viewer(&live_match_id).await?,
            Command::SendEvent {
                live_match_id,
                payload,
            } => self.send_event(live_match_id, payload)?,
        }

        Ok(Response::Done)
    }

    /// Parse and execute a method-channel call
    pub async fn handle_call(&self, method: &str, args: &Value) -> Result<Response> {
        let result = match Command::parse(method, args) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => Err(e),
        };

        if let Err(ref e) = result {
            tracing::debug!(method = method, code = e.code(), error = %e, "Call failed");
        }
        result
    }
}

impl ControllerInner {
    fn engage(&self) -> LifecycleLease {
        let lease = self.guard.engage(&self.config.notice);
        if lease.is_degraded() {
            tracing::warn!("Session running without full keep-alive");
        }
        lease
    }

    async fn launch_host(&self, handle: &SessionHandle) -> Result<(Vec<JoinHandle<()>>, FrameSink)> {
        let transport = &self.config.transport;

        let listener = HostListener::bind(
            transport.clone(),
            Arc::clone(&self.registry),
            handle.clone(),
            Arc::clone(&self.counters),
            self.notices.clone(),
        )
        .await?;
        let announcement = Announcement::new(handle.info(), listener.local_addr().port());
        let responder = DiscoveryResponder::bind(transport.discovery_bind_addr, announcement).await?;

        if handle.is_cancelled() {
            return Err(Error::SessionCancelled);
        }

        let tasks = vec![listener.spawn(), responder.spawn(handle.cancel_token().clone())];

        let forwarder = Arc::new(
            StreamForwarder::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.counters),
                handle.live_match_id(),
            )
            .max_packet_size(transport.max_packet_size),
        );
        let sink = FrameSink::new(forwarder);

        {
            let mut capture = self.capture.lock();
            capture.start(sink.clone())?;
            tracing::debug!(source = capture.name(), "Capture started");
        }

        Ok((tasks, sink))
    }

    async fn launch_viewer(&self, handle: &SessionHandle) -> Result<(Vec<JoinHandle<()>>, MatchInfo)> {
        let transport = &self.config.transport;
        let cancel = handle.cancel_token();
        let live_match_id = handle.live_match_id();

        let host = discover(live_match_id, transport, cancel).await?;

        let connection = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::SessionCancelled),
            connection = ViewerConnection::connect(host, live_match_id, transport) => connection?,
        };

        let info = connection.info().clone();
        self.registry.set_match_info(handle, info.clone())?;
        let (host_peer, _) = self.registry.add_peer(handle, host, None, 0)?;

        let (events, event_task) = self
            .bus
            .spawn_inbound(transport.event_queue_depth, cancel.clone());
        let (frames, frame_task) = self
            .frames
            .spawn_inbound(transport.frame_queue_depth, cancel.clone());

        let sinks = ViewerSinks {
            registry: Arc::clone(&self.registry),
            handle: handle.clone(),
            host_peer,
            events,
            frames,
            notices: self.notices.clone(),
        };
        let connection_task = connection.spawn(sinks, transport);

        Ok((vec![connection_task, event_task, frame_task], info))
    }

    /// Park the session's resources and move it to `Active`
    async fn commit(
        self: &Arc<Self>,
        handle: SessionHandle,
        info: MatchInfo,
        tasks: Vec<JoinHandle<()>>,
        lease: LifecycleLease,
        sink: Option<FrameSink>,
    ) -> Result<()> {
        // Parked before activation so a concurrent stop always finds it
        *self.active.lock() = Some(ActiveSession {
            handle: handle.clone(),
            tasks,
            lease,
            sink,
        });

        if let Err(e) = self.registry.activate(&handle) {
            if let Some(session) = self.take_active(&handle) {
                self.teardown(session).await;
            }
            // Retired before activation: by a stop, or by its own link
            return Err(match self.registry.failure(&handle) {
                Some(reason) => Error::ConnectionLost(reason),
                None => e.into(),
            });
        }

        let _ = self.notices.send(ControlEvent::SessionStarted {
            role: handle.role(),
            info,
        });
        self.supervise(handle);
        Ok(())
    }

    /// Undo a failed start, leaving the registry idle
    fn abandon(&self, handle: &SessionHandle, error: Error) -> Error {
        // Already retired when a stop cancelled the start
        if self.registry.fail(handle, &error.to_string()) {
            if handle.role() == Role::Host {
                self.capture.lock().stop();
            }
            tracing::info!(
                live_match_id = %handle.live_match_id(),
                code = error.code(),
                error = %error,
                "Session start failed"
            );
        }
        error
    }

    async fn stop(&self, role: Role, live_match_id: &str) -> Result<()> {
        match self.registry.begin_stop(role, live_match_id) {
            StopOutcome::NotRunning => {
                tracing::debug!(role = %role, live_match_id = live_match_id, "No matching session to stop");
            }
            StopOutcome::Cancelled(handle) => {
                if let Some(session) = self.take_active(&handle) {
                    self.teardown(session).await;
                }
            }
            StopOutcome::Stopping { handle, peers } => {
                if let Some(session) = self.take_active(&handle) {
                    self.teardown(session).await;
                }
                self.registry.finish_stop(&handle);

                tracing::info!(
                    role = %role,
                    live_match_id = live_match_id,
                    peers = peers.len(),
                    "Session ended"
                );
                let _ = self.notices.send(ControlEvent::SessionStopped {
                    role,
                    live_match_id: live_match_id.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Tear down whatever a retired session left parked
    ///
    /// Only called once `begin` has succeeded, so anything in the slot
    /// belongs to a session the registry no longer holds.
    async fn reclaim(&self) {
        let stale = self.active.lock().take();
        if let Some(session) = stale {
            tracing::debug!(session_id = session.handle.id(), "Reclaiming retired session");
            self.teardown(session).await;
        }
    }

    fn take_active(&self, handle: &SessionHandle) -> Option<ActiveSession> {
        let mut active = self.active.lock();
        let owned = active.as_ref().is_some_and(|s| s.handle == *handle);
        if owned {
            active.take()
        } else {
            None
        }
    }

    /// Stop capture, wait for the session tasks and release the lease
    async fn teardown(&self, session: ActiveSession) {
        let ActiveSession {
            handle,
            tasks,
            lease,
            ..
        } = session;

        if handle.role() == Role::Host {
            self.capture.lock().stop();
        }

        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await.is_err() {
                tracing::warn!(session_id = handle.id(), "Session task did not stop in time, aborting");
                abort.abort();
            }
        }

        lease.release();
    }

    /// Reclaim resources of a session that fails while active
    fn supervise(self: &Arc<Self>, handle: SessionHandle) {
        let inner: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            handle.cancel_token().cancelled().await;

            let Some(inner) = inner.upgrade() else {
                return;
            };
            // Still registered means an orderly stop is running
            if inner.registry.is_current(&handle) {
                return;
            }
            if let Some(session) = inner.take_active(&handle) {
                tracing::debug!(session_id = handle.id(), "Reclaiming failed session");
                inner.teardown(session).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::transport::TransportConfig;

    fn local_config(discovery_port: u16) -> ControllerConfig {
        ControllerConfig::with_transport(
            TransportConfig::default()
                .bind("127.0.0.1:0".parse().unwrap())
                .discovery_port(discovery_port)
                .discovery_target(SocketAddr::from(([127, 0, 0, 1], discovery_port)))
                .discovery_timeout(Duration::from_millis(400)),
        )
    }

    #[tokio::test]
    async fn test_stop_without_session_is_noop() {
        let controller = LiveController::new(local_config(47601));

        assert!(controller.stop_host("LM1").await.is_ok());
        assert!(controller.leave_viewer("LM1").await.is_ok());
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_host_lifecycle_and_lease() {
        let controller = LiveController::new(local_config(47602));
        let mut notices = controller.subscribe();

        controller.start_host("L1", "M1", "LM1").await.unwrap();
        assert_eq!(controller.phase(), SessionPhase::Active);
        assert!(controller.guard().is_engaged());
        assert!(matches!(
            notices.recv().await.unwrap(),
            ControlEvent::SessionStarted { role: Role::Host, .. }
        ));

        // Second start of either role is refused, session untouched
        assert!(matches!(
            controller.start_host("L1", "M1", "LM1").await,
            Err(Error::AlreadyActive)
        ));
        assert!(matches!(
            controller.join_viewer("LM1").await,
            Err(Error::AlreadyActive)
        ));
        assert_eq!(controller.phase(), SessionPhase::Active);

        // Wrong id is ignored
        controller.stop_host("LM9").await.unwrap();
        assert_eq!(controller.phase(), SessionPhase::Active);

        controller.stop_host("LM1").await.unwrap();
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(!controller.guard().is_engaged());
        controller.stop_host("LM1").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_event_without_session() {
        let controller = LiveController::new(local_config(47603));
        let mut payload = Map::new();
        payload.insert("type".into(), json!("goal"));

        assert!(controller.send_event("LM1", payload).is_ok());
        assert_eq!(controller.stats().events_published, 0);
        assert!(!controller.push_frame(StreamFrame::audio(0, bytes::Bytes::new())));
    }

    #[tokio::test]
    async fn test_failed_join_leaves_registry_idle() {
        let controller = LiveController::new(local_config(47604));

        let err = controller.join_viewer("LM2").await.unwrap_err();
        assert_eq!(err.code(), "DISCOVERY_TIMEOUT");
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(!controller.guard().is_engaged());
    }

    #[tokio::test]
    async fn test_leave_while_discovering_cancels_join() {
        let mut config = local_config(47605);
        config.transport.discovery_timeout = Duration::from_secs(30);
        let controller = LiveController::new(config);

        let joining = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.join_viewer("LM3").await })
        };

        while controller.phase() != SessionPhase::Starting {
            tokio::task::yield_now().await;
        }
        controller.leave_viewer("LM3").await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), joining)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::SessionCancelled)));
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_link_lost_before_activation_reports_connection_lost() {
        let controller = LiveController::new(local_config(47607));
        let inner = &controller.inner;

        let handle = inner
            .registry
            .begin(Role::Viewer, MatchInfo::viewer("LM1"))
            .unwrap();
        let lease = inner.engage();
        // Connection task gave up between spawn and activation
        assert!(inner.registry.fail(&handle, "connection reset by host"));

        let err = inner
            .commit(handle, MatchInfo::viewer("LM1"), Vec::new(), lease, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONNECTION_LOST");
        assert!(inner.active.lock().is_none());
        assert!(!controller.guard().is_engaged());
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_stop_before_activation_reports_cancelled() {
        let controller = LiveController::new(local_config(47608));
        let inner = &controller.inner;

        let handle = inner
            .registry
            .begin(Role::Viewer, MatchInfo::viewer("LM1"))
            .unwrap();
        let lease = inner.engage();
        controller.leave_viewer("LM1").await.unwrap();

        let err = inner
            .commit(handle, MatchInfo::viewer("LM1"), Vec::new(), lease, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionCancelled));
        assert!(!controller.guard().is_engaged());
    }

    #[tokio::test]
    async fn test_restart_reclaims_unsupervised_session() {
        let controller = LiveController::new(local_config(47609));
        let inner = &controller.inner;

        // A viewer session failed and its supervisor has not run yet
        let old = inner
            .registry
            .begin(Role::Viewer, MatchInfo::viewer("LM0"))
            .unwrap();
        let lease = inner.engage();
        *inner.active.lock() = Some(ActiveSession {
            handle: old.clone(),
            tasks: vec![tokio::spawn(async {})],
            lease,
            sink: None,
        });
        assert!(inner.registry.fail(&old, "link lost"));
        assert_eq!(controller.guard().holders(), 1);

        controller.start_host("L1", "M1", "LM1").await.unwrap();
        let current = inner.registry.current_handle().unwrap();
        assert_eq!(
            inner.active.lock().as_ref().map(|s| s.handle.id()),
            Some(current.id())
        );
        assert_eq!(controller.guard().holders(), 1);

        controller.stop_host("LM1").await.unwrap();
        assert_eq!(controller.guard().holders(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_platform_commands() {
        let controller = LiveController::new(local_config(47606));

        let response = controller
            .handle_call("getDeviceInfo", &Value::Null)
            .await
            .unwrap();
        assert!(matches!(response, Response::DeviceInfo(_)));

        controller
            .handle_call("startForegroundStreamingService", &json!({"title": "Final"}))
            .await
            .unwrap();
        assert!(controller.guard().is_engaged());
        controller
            .handle_call("stopForegroundStreamingService", &Value::Null)
            .await
            .unwrap();
        assert!(!controller.guard().is_engaged());

        let err = controller
            .handle_call("openAppDetailsSettings", &Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_IMPLEMENTED");

        let err = controller.handle_call("launchRocket", &Value::Null).await.unwrap_err();
        assert_eq!(err.code(), "NOT_IMPLEMENTED");
    }
}
