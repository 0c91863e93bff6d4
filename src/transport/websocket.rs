//! Live event stream for one run over a WebSocket

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, Instrument};
use warp::ws::{Message, WebSocket};

use crate::pipeline::run::RunId;
use crate::progress::{EventRecord, EventType, ProgressBroadcaster};

/// Last message on a socket, sent after the run's terminal event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalMessage {
    TaskComplete { run_id: RunId, result: String },
    TaskError { run_id: RunId, error: String },
}

impl TerminalMessage {
    pub fn from_event(event: &EventRecord) -> Option<Self> {
        match event.event_type {
            EventType::RunCompleted => Some(Self::TaskComplete {
                run_id: event.run_id,
                result: event.payload.clone(),
            }),
            EventType::RunFailed => Some(Self::TaskError {
                run_id: event.run_id,
                error: event.payload.clone(),
            }),
            _ => None,
        }
    }
}

fn to_message<T: Serialize>(value: &T) -> Option<Message> {
    serde_json::to_string(value).ok().map(Message::text)
}

/// Replay the run's log, forward live events, then close after the terminal message
pub async fn stream_run(socket: WebSocket, broadcaster: Arc<ProgressBroadcaster>, run_id: RunId) {
    let span = crate::request_span!(route = "ws", run_id = %run_id);
    async move {
        let (mut sink, mut incoming) = socket.split();
        let mut subscription = match broadcaster.subscribe(run_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                // Evicted between the route's lookup and the upgrade
                debug!(error = %e, "Run is gone, closing socket");
                let terminal = TerminalMessage::TaskError {
                    run_id,
                    error: e.to_string(),
                };
                if let Some(message) = to_message(&terminal) {
                    let _ = sink.send(message).await;
                }
                let _ = sink.send(Message::close()).await;
                return;
            }
        };
        let mut forwarded = 0usize;

        loop {
            tokio::select! {
                event = subscription.receiver.recv() => {
                    let Some(event) = event else {
                        debug!("Event stream ended before a terminal event");
                        break;
                    };

                    if let Some(message) = to_message(&event) {
                        if sink.send(message).await.is_err() {
                            debug!("Client went away");
                            break;
                        }
                        forwarded += 1;
                    }

                    if let Some(terminal) = TerminalMessage::from_event(&event) {
                        if let Some(message) = to_message(&terminal) {
                            let _ = sink.send(message).await;
                        }
                        let _ = sink.send(Message::close()).await;
                        break;
                    }
                }
                incoming_message = incoming.next() => {
                    match incoming_message {
                        Some(Ok(message)) if message.is_close() => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(error = %e, "WebSocket receive error");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        broadcaster.detach(run_id, subscription.id).await;
        debug!(forwarded, "WebSocket closed");
    }
    .instrument(span)
    .await
}
