use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use weft_core::errors::GatewayError;
use weft_core::events::{StreamEvent, WorkerFrame};
use weft_core::ids::{ConversationId, TabId};

use crate::bridge::RequestTable;
use crate::registry::WorkerRegistry;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Outbound channels to connected workers, keyed by tab id.
#[derive(Default)]
pub struct WorkerLinks {
    senders: DashMap<TabId, mpsc::Sender<String>>,
}

impl WorkerLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tab_id: TabId, tx: mpsc::Sender<String>) {
        self.senders.insert(tab_id, tx);
    }

    pub fn remove(&self, tab_id: &TabId) {
        self.senders.remove(tab_id);
    }

    pub fn contains(&self, tab_id: &TabId) -> bool {
        self.senders.contains_key(tab_id)
    }

    /// Send one frame to a worker. Drops the frame (and reports failure)
    /// when the worker is unknown or its queue is full.
    pub fn send(&self, tab_id: &TabId, frame: &WorkerFrame) -> bool {
        let Some(tx) = self.senders.get(tab_id) else {
            return false;
        };
        let Ok(json) = serde_json::to_string(frame) else {
            return false;
        };
        match tx.try_send(json) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(tab_id = %tab_id, "worker send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Drive one worker connection: writer task drains the outbound queue and
/// pings on a heartbeat interval; the reader runs here so events from one
/// worker stay strictly in arrival order.
pub async fn handle_worker_socket(
    socket: WebSocket,
    registry: Arc<WorkerRegistry>,
    links: Arc<WorkerLinks>,
    table: Arc<RequestTable>,
    max_send_queue: usize,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(max_send_queue);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut tab: Option<TabId> = None;
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            WsMessage::Text(text) => {
                let event: StreamEvent = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(err) => {
                        // Transport-parse error: log it, keep the connection.
                        let parse = GatewayError::TransportParse(err.to_string());
                        tracing::warn!(error = %parse, "dropping malformed worker frame");
                        continue;
                    }
                };
                route_event(event, &mut tab, &outbound_tx, &registry, &links, &table);
            }
            WsMessage::Pong(_) => {
                if let Some(tab) = &tab {
                    registry.touch(tab);
                }
            }
            WsMessage::Close(_) => break,
            WsMessage::Ping(_) => {} // axum answers pongs automatically
            _ => {}
        }
    }

    writer.abort();
    if let Some(tab) = tab {
        links.remove(&tab);
        registry.remove(&tab);
        table.fail(&tab, GatewayError::WorkerEvicted(tab.to_string()));
        tracing::info!(tab_id = %tab, "worker disconnected");
    }
}

/// Dispatch one decoded frame: housekeeping mutates the registry, stream
/// events go to the request bound to this worker.
fn route_event(
    event: StreamEvent,
    tab: &mut Option<TabId>,
    outbound: &mpsc::Sender<String>,
    registry: &WorkerRegistry,
    links: &WorkerLinks,
    table: &RequestTable,
) {
    if let Some(tab_id) = tab.as_ref() {
        registry.touch(tab_id);
    }

    match event {
        StreamEvent::WorkerRegister {
            tab_id, is_worker, ..
        } => {
            if !is_worker {
                tracing::debug!(tab_id = %tab_id, "non-worker tab ignored");
                return;
            }
            let tab_id = TabId::from_raw(tab_id);
            registry.register(tab_id.clone());
            links.insert(tab_id.clone(), outbound.clone());
            tracing::info!(tab_id = %tab_id, "worker registered");
            *tab = Some(tab_id);
        }

        StreamEvent::WorkerUpdateActiveConversation {
            tab_id,
            conversation_id,
            ..
        } => {
            let tab_id = TabId::from_raw(tab_id);
            let conversation = ConversationId::from_raw(conversation_id);
            if !registry.set_active(&tab_id, conversation) {
                tracing::debug!(tab_id = %tab_id, "active conversation for unknown worker");
            }
        }

        StreamEvent::Ping => {
            if let Ok(json) = serde_json::to_string(&WorkerFrame::Ping) {
                let _ = outbound.try_send(json);
            }
        }

        StreamEvent::TabFocus { .. } => {} // liveness touch only

        stream_event => match tab.as_ref() {
            Some(tab_id) => table.handle_event(tab_id, &stream_event),
            None => {
                tracing::debug!(
                    event = stream_event.event_type(),
                    "stream event before registration dropped"
                );
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{RequestContext, ResponseSink};
    use std::time::Duration;
    use weft_core::ids::RequestId;

    fn event(json: &str) -> StreamEvent {
        serde_json::from_str(json).unwrap()
    }

    fn parts() -> (Arc<WorkerRegistry>, Arc<WorkerLinks>, Arc<RequestTable>) {
        (
            Arc::new(WorkerRegistry::new(Duration::from_secs(90))),
            Arc::new(WorkerLinks::new()),
            Arc::new(RequestTable::new()),
        )
    }

    #[tokio::test]
    async fn register_frame_creates_session_and_link() {
        let (registry, links, table) = parts();
        let (outbound, _rx) = mpsc::channel(8);
        let mut tab = None;

        route_event(
            event(r#"{"type":"worker_register","clientId":"c1","tabId":"tab-1","isWorker":true,"pathname":"/new"}"#),
            &mut tab,
            &outbound,
            &registry,
            &links,
            &table,
        );

        let tab_id = TabId::from_raw("tab-1");
        assert_eq!(tab, Some(tab_id.clone()));
        assert!(registry.is_live(&tab_id));
        assert!(links.contains(&tab_id));
    }

    #[tokio::test]
    async fn non_worker_tabs_are_ignored() {
        let (registry, links, table) = parts();
        let (outbound, _rx) = mpsc::channel(8);
        let mut tab = None;

        route_event(
            event(r#"{"type":"worker_register","clientId":"c1","tabId":"tab-1","isWorker":false}"#),
            &mut tab,
            &outbound,
            &registry,
            &links,
            &table,
        );

        assert!(tab.is_none());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn active_conversation_updates_registry() {
        let (registry, links, table) = parts();
        let (outbound, _rx) = mpsc::channel(8);
        let mut tab = None;

        route_event(
            event(r#"{"type":"worker_register","clientId":"c1","tabId":"tab-1","isWorker":true}"#),
            &mut tab,
            &outbound,
            &registry,
            &links,
            &table,
        );
        route_event(
            event(r#"{"type":"worker_update_active_conversation","clientId":"c1","tabId":"tab-1","conversationId":"conv-9"}"#),
            &mut tab,
            &outbound,
            &registry,
            &links,
            &table,
        );

        let selected = registry.select(Some(&ConversationId::from_raw("conv-9")));
        assert_eq!(selected, Some(TabId::from_raw("tab-1")));
    }

    #[tokio::test]
    async fn ping_is_echoed() {
        let (registry, links, table) = parts();
        let (outbound, mut rx) = mpsc::channel(8);
        let mut tab = None;

        route_event(event(r#"{"type":"ping"}"#), &mut tab, &outbound, &registry, &links, &table);

        let echoed = rx.try_recv().unwrap();
        assert_eq!(echoed, r#"{"type":"ping"}"#);
    }

    #[tokio::test]
    async fn stream_events_reach_the_bound_request() {
        let (registry, links, table) = parts();
        let (outbound, _rx) = mpsc::channel(8);
        let mut tab = None;

        route_event(
            event(r#"{"type":"worker_register","clientId":"c1","tabId":"tab-1","isWorker":true}"#),
            &mut tab,
            &outbound,
            &registry,
            &links,
            &table,
        );

        let tab_id = TabId::from_raw("tab-1");
        let (tx, rx) = tokio::sync::oneshot::channel();
        table
            .bind(RequestContext::new(
                RequestId::new(),
                tab_id.clone(),
                "claude-web".into(),
                0,
                ResponseSink::Aggregate(tx),
            ))
            .unwrap();

        for json in [
            r#"{"type":"message_start","message":{}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":"ok"}}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#,
            r#"{"type":"message_stop"}"#,
        ] {
            route_event(event(json), &mut tab, &outbound, &registry, &links, &table);
        }

        let completion = rx.await.unwrap().unwrap();
        assert_eq!(completion.choices[0].message.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn stream_events_before_registration_are_dropped() {
        let (registry, links, table) = parts();
        let (outbound, _rx) = mpsc::channel(8);
        let mut tab = None;

        // Must not panic; nothing to route to yet.
        route_event(
            event(r#"{"type":"message_start","message":{}}"#),
            &mut tab,
            &outbound,
            &registry,
            &links,
            &table,
        );
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn links_send_reports_unknown_and_full() {
        let links = WorkerLinks::new();
        let tab_id = TabId::from_raw("tab-1");
        assert!(!links.send(&tab_id, &WorkerFrame::Ping));

        let (tx, mut rx) = mpsc::channel(1);
        links.insert(tab_id.clone(), tx);
        assert!(links.send(&tab_id, &WorkerFrame::Ping));
        // Queue of one is now full.
        assert!(!links.send(&tab_id, &WorkerFrame::Ping));
        assert!(rx.try_recv().is_ok());

        links.remove(&tab_id);
        assert!(!links.contains(&tab_id));
    }
}
