//! Translates client events into debugger-adapter calls and emits the
//! response events.
//!
//! Snapshots for one session can never interleave on the wire: the
//! adapter call happens under the session's own mutex, and every outgoing
//! event funnels through one mpsc writer.

use std::sync::Arc;

use gdbox_core::error::GdboxErr;
use gdbox_core::gdb::GdbAdapter;
use gdbox_core::gdb::InitOutcome;
use gdbox_core::protocol::INVALID_AUTHORIZATION_STATUS;
use gdbox_core::protocol::STATUS_OK;
use gdbox_core::protocol::Snapshot;
use gdbox_core::session::DebugSession;
use serde_json::Value;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;
use uuid::Uuid;

use crate::AppState;
use crate::events::AuthorizedPayload;
use crate::events::EventFrame;
use crate::events::MotionPayload;
use crate::events::OutgoingEvent;
use crate::events::StartDebuggingPayload;
use crate::events::parse_breakpoints;

const BAD_BREAKPOINTS_STATUS: &str = "breakpoints must be integer line numbers";

#[derive(Debug, Clone, Copy)]
enum Motion {
    Run,
    Continue,
    Step,
    Finish,
}

#[derive(Clone)]
pub struct MessageProcessor {
    state: Arc<AppState>,
    outgoing: mpsc::Sender<OutgoingEvent>,
}

impl MessageProcessor {
    pub fn new(state: Arc<AppState>, outgoing: mpsc::Sender<OutgoingEvent>) -> Self {
        Self { state, outgoing }
    }

    pub async fn process(&self, frame: EventFrame) {
        trace!("client event: {}", frame.event);
        match frame.event.as_str() {
            "start_debugging" => self.handle_start_debugging(frame.data).await,
            "ping" => self.handle_ping(frame.data).await,
            "run" => self.handle_motion(Motion::Run, frame.data).await,
            "continue" => self.handle_motion(Motion::Continue, frame.data).await,
            "step" => self.handle_motion(Motion::Step, frame.data).await,
            "finish" => self.handle_motion(Motion::Finish, frame.data).await,
            "stop" => self.handle_stop(frame.data).await,
            other => warn!("unknown client event: {other}"),
        }
    }

    async fn handle_start_debugging(&self, data: Value) {
        debug!("client requested debugging");
        let Ok(payload) = serde_json::from_value::<StartDebuggingPayload>(data) else {
            warn!("start_debugging without code/input fields");
            return;
        };

        let token = Uuid::new_v4().to_string();
        let source_path = self.state.config.received_dir.join(format!("{token}.cpp"));
        if let Err(err) = tokio::fs::write(&source_path, &payload.code).await {
            error!("could not store submitted source: {err}");
            self.send("stopped_debugging", json!({})).await;
            return;
        }

        let adapter = GdbAdapter::new(&self.state.config, &token);
        let session = Arc::new(DebugSession::new(token.clone(), adapter));
        // Registered before init so the janitor keeps refreshing the session
        // while the build is still in flight.
        self.state.sessions.register(&token, session.clone());

        let mut adapter = session.adapter.lock().await;
        match adapter.init(&payload.input).await {
            Ok(InitOutcome::Started) => {
                session.mark_initialized();
                self.send(
                    "started_debugging",
                    json!({
                        "authorization": token,
                        "compilation_error": false,
                        "compilation_error_details": "",
                    }),
                )
                .await;
            }
            Ok(InitOutcome::CompileFailed(stderr)) => {
                self.send(
                    "started_debugging",
                    json!({
                        "authorization": "",
                        "compilation_error": true,
                        "compilation_error_details": stderr,
                    }),
                )
                .await;
                adapter.stop().await;
                drop(adapter);
                self.state.sessions.remove(&token);
            }
            Ok(InitOutcome::BuildFailed(transcript)) => {
                warn!("sandbox build failed: {transcript}");
                self.send("stopped_debugging", json!({})).await;
                adapter.stop().await;
                drop(adapter);
                self.state.sessions.remove(&token);
            }
            Err(err) => {
                error!("debug session init failed: {err}");
                self.send("stopped_debugging", json!({})).await;
                adapter.stop().await;
                drop(adapter);
                self.state.sessions.remove(&token);
            }
        }
    }

    async fn handle_ping(&self, data: Value) {
        let Ok(payload) = serde_json::from_value::<AuthorizedPayload>(data) else {
            return;
        };
        if let Some(session) = self.state.sessions.get(&payload.authorization) {
            session.ping();
            self.send("pong", json!({"status": STATUS_OK})).await;
        }
    }

    async fn handle_motion(&self, motion: Motion, data: Value) {
        let Ok(payload) = serde_json::from_value::<MotionPayload>(data) else {
            self.send_status(INVALID_AUTHORIZATION_STATUS).await;
            return;
        };
        let (Some(adds), Some(removes)) = (
            parse_breakpoints(&payload.add_breakpoints),
            parse_breakpoints(&payload.remove_breakpoints),
        ) else {
            self.send_status(BAD_BREAKPOINTS_STATUS).await;
            return;
        };

        let Some(session) = self.state.sessions.get(&payload.authorization) else {
            self.send_status(INVALID_AUTHORIZATION_STATUS).await;
            return;
        };

        let mut adapter = session.adapter.lock().await;
        let result = match motion {
            Motion::Run => adapter.run(&adds, &removes).await,
            Motion::Continue => adapter.continue_(&adds, &removes).await,
            Motion::Step => adapter.step(&adds, &removes).await,
            Motion::Finish => adapter.finish(&adds, &removes).await,
        };
        drop(adapter);

        match result {
            Ok(snapshot) => {
                // A snapshot that ends the program also ends the session.
                if !snapshot.is_running || snapshot.timeout {
                    self.state.sessions.remove(&payload.authorization);
                }
                self.send("debug_data", snapshot_payload(&snapshot)).await;
            }
            Err(GdboxErr::InvalidAuthorization) => {
                self.send_status(INVALID_AUTHORIZATION_STATUS).await;
            }
            Err(err) => {
                error!("motion command failed: {err}");
                self.send_status(&err.to_string()).await;
            }
        }
    }

    async fn handle_stop(&self, data: Value) {
        let Ok(payload) = serde_json::from_value::<AuthorizedPayload>(data) else {
            self.send_status(INVALID_AUTHORIZATION_STATUS).await;
            return;
        };
        match self.state.sessions.remove(&payload.authorization) {
            Some(session) => {
                session.adapter.lock().await.stop().await;
                self.send("stopped_debugging", json!({})).await;
            }
            None => self.send_status(INVALID_AUTHORIZATION_STATUS).await,
        }
    }

    async fn send_status(&self, status: &str) {
        self.send("debug_data", json!({"status": status})).await;
    }

    async fn send(&self, event: &str, data: Value) {
        if self
            .outgoing
            .send(OutgoingEvent::new(event, data))
            .await
            .is_err()
        {
            warn!("client is gone, dropping {event}");
        }
    }
}

/// Snapshot merged with `status: "ok"`.
fn snapshot_payload(snapshot: &Snapshot) -> Value {
    let mut value = serde_json::to_value(snapshot).unwrap_or_else(|_| json!({}));
    if let Some(map) = value.as_object_mut() {
        map.insert("status".to_string(), json!(STATUS_OK));
    }
    value
}
