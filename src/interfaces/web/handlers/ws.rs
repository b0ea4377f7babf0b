use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::bus::Envelope;
use crate::core::router::InboundEvent;
use crate::interfaces::web::AppState;

/// GET /ws. One socket is one session: it gets its own bus subscription and
/// its own conversation scrollback, both torn down on disconnect.
pub async fn ws_endpoint(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (handle, mut bus_rx) = state.bus.subscribe().await;
    let session = handle.id;
    let (mut sink, mut stream) = socket.split();

    // Direct replies and broadcast notifications share one writer, so each
    // client sees a single ordered stream.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Envelope>();
    let writer = tokio::spawn(async move {
        loop {
            let envelope = tokio::select! {
                Some(envelope) = bus_rx.recv() => envelope,
                Some(envelope) = reply_rx.recv() => envelope,
                else => break,
            };
            let Ok(text) = serde_json::to_string(&envelope) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(envelope) = serde_json::from_str::<Envelope>(&text) else {
            let _ = reply_tx.send(Envelope::new(
                "error",
                json!({ "message": "malformed envelope" }),
            ));
            continue;
        };
        match parse_inbound(session, &envelope) {
            Some(event) => {
                let reply = state.events.handle(event).await;
                let _ = reply_tx.send(Envelope::new(
                    "thread:append",
                    json!({
                        "text": reply.text,
                        "intent": reply.intent,
                        "actions": reply.actions,
                    }),
                ));
            }
            None => {
                debug!("Dropping unknown ws event '{}'", envelope.event);
                let _ = reply_tx.send(Envelope::new(
                    "error",
                    json!({ "message": format!("unknown event '{}'", envelope.event) }),
                ));
            }
        }
    }

    writer.abort();
    state.bus.unsubscribe(handle).await;
    state.events.drop_session(session).await;
    info!("Session {} disconnected", session);
}

fn parse_inbound(session: Uuid, envelope: &Envelope) -> Option<InboundEvent> {
    match envelope.event.as_str() {
        "thread:send" => {
            let text = envelope.data.get("text")?.as_str()?;
            Some(InboundEvent::Text {
                session,
                text: text.to_string(),
            })
        }
        "interview:answer" => {
            let id = parse_id(envelope)?;
            let answer = envelope.data.get("answer")?.as_str()?;
            Some(InboundEvent::InterviewAnswer {
                id,
                answer: answer.to_string(),
            })
        }
        "interview:dismiss" => Some(InboundEvent::InterviewDismiss {
            id: parse_id(envelope)?,
        }),
        _ => None,
    }
}

fn parse_id(envelope: &Envelope) -> Option<Uuid> {
    envelope
        .data
        .get("id")
        .and_then(|v| v.as_str())
        .and_then(|raw| Uuid::parse_str(raw).ok())
}
