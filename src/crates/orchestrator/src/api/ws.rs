//! WebSocket chat endpoint.
//!
//! Client → server frames:
//! `{type: "message", turn_id, message, exam_id, participant_id, spec_id}`
//! and `{type: "cancel", turn_id}`. Server → client frames mirror
//! [`StreamEvent`]: `delta`, `done`, `cancelled`, `error`.
//!
//! The handler selects between incoming socket frames and the active
//! stream's channel, so a `cancel` frame takes effect at the next delta
//! boundary.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::routes::AppState;
use crate::service::StreamEvent;

/// Client-originated frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message {
        turn_id: String,
        message: String,
        exam_id: i64,
        participant_id: i64,
        spec_id: i64,
    },
    Cancel {
        turn_id: String,
    },
}

/// Upgrade handler for `GET /chat/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_event(socket: &mut WebSocket, event: &StreamEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(payload) => socket.send(Message::Text(payload)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "stream event serialization failed");
            false
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // At most one stream is active per socket; a new `message` frame while
    // one is running is answered with an error frame.
    let mut active: Option<mpsc::Receiver<StreamEvent>> = None;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else {
                    break;
                };
                let Message::Text(text) = message else {
                    continue;
                };
                match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Message { turn_id, message, exam_id, participant_id, spec_id }) => {
                        if active.is_some() {
                            let event = StreamEvent::Error {
                                turn_id,
                                error: "a stream is already in progress".to_string(),
                            };
                            if !send_event(&mut socket, &event).await {
                                break;
                            }
                            continue;
                        }
                        match state
                            .service
                            .stream_message(exam_id, participant_id, spec_id, &message, &turn_id)
                            .await
                        {
                            Ok(rx) => active = Some(rx),
                            Err(e) => {
                                let event = StreamEvent::Error {
                                    turn_id,
                                    error: e.to_string(),
                                };
                                if !send_event(&mut socket, &event).await {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(ClientFrame::Cancel { turn_id }) => {
                        debug!(turn_id = %turn_id, "cancel frame received");
                        state.service.cancel_stream(&turn_id);
                    }
                    Err(e) => {
                        warn!(error = %e, "unparseable client frame");
                    }
                }
            }
            event = recv_active(&mut active), if active.is_some() => {
                match event {
                    Some(event) => {
                        let terminal = matches!(
                            event,
                            StreamEvent::Done { .. }
                                | StreamEvent::Cancelled { .. }
                                | StreamEvent::Error { .. }
                        );
                        if !send_event(&mut socket, &event).await {
                            break;
                        }
                        if terminal {
                            active = None;
                        }
                    }
                    None => active = None,
                }
            }
        }
    }
}

async fn recv_active(active: &mut Option<mpsc::Receiver<StreamEvent>>) -> Option<StreamEvent> {
    match active {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type": "message", "turn_id": "t1", "message": "hi",
                "exam_id": 1, "participant_id": 2, "spec_id": 10}"#,
        )
        .unwrap();
        assert!(matches!(frame, ClientFrame::Message { .. }));

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type": "cancel", "turn_id": "t1"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Cancel { .. }));
    }

    #[test]
    fn server_events_serialize_with_type_tag() {
        let delta = StreamEvent::Delta {
            content: "hel".into(),
            turn_id: "t1".into(),
        };
        let value = serde_json::to_value(&delta).unwrap();
        assert_eq!(value["type"], "delta");
        assert_eq!(value["turn_id"], "t1");

        let cancelled = StreamEvent::Cancelled { turn_id: "t1".into() };
        assert_eq!(serde_json::to_value(&cancelled).unwrap()["type"], "cancelled");
    }
}
