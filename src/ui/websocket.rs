//! WebSocket push of session events

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::session::SessionEvent;
use crate::ui::server::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.sessions.subscribe();

    // Sessions seen before the client connected
    let mut announced = AnnouncedSessions::default();
    for info in state.sessions.sessions() {
        let event = SessionEvent::NewSession { session_id: info.id };
        announced.first_time(&event);
        if !send_event(&mut sender, &event).await {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if !announced.first_time(&event) {
                        continue;
                    }
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("WebSocket client lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!("WebSocket client disconnected");
}

/// Sessions already sent to one client.
///
/// A session created between subscribing and taking the snapshot shows up
/// in both; it is announced once.
#[derive(Debug, Default)]
struct AnnouncedSessions {
    ids: HashSet<u64>,
}

impl AnnouncedSessions {
    fn first_time(&mut self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::NewSession { session_id } => self.ids.insert(*session_id),
        }
    }
}

/// Returns false once the client is gone
async fn send_event<S>(sender: &mut S, event: &SessionEvent) -> bool
where
    S: Sink<Message> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            tracing::warn!("Failed to serialize event: {}", e);
            true
        }
    }
}
