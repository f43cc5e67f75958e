//! WebSocket upgrades binding sessions to socket halves.
//!
//! Each socket gets one writer task draining a bounded queue, so every
//! outbound frame for a connection goes through a single ordered path.

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dashboard::DashboardSession;
use crate::hub::Hub;
use crate::session::{AgentSession, SessionError};

/// How long a finished session waits for its writer to flush.
const WRITER_GRACE: Duration = Duration::from_secs(2);

pub async fn agent_ws(State(hub): State<Hub>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| agent_socket(hub, socket))
}

pub async fn dashboard_ws(State(hub): State<Hub>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| dashboard_socket(hub, socket))
}

async fn agent_socket(hub: Hub, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(hub.config().server.outbound_queue);
    let writer = tokio::spawn(write_frames(sink, out_rx));

    let inbound = std::pin::pin!(text_frames(stream));
    AgentSession::new(hub, out_tx).run(inbound).await;
    finish_writer(writer).await;
}

async fn dashboard_socket(hub: Hub, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(hub.config().server.outbound_queue);
    let writer = tokio::spawn(write_frames(sink, out_rx));

    let inbound = std::pin::pin!(text_frames(stream));
    DashboardSession::new(hub, out_tx).run(inbound).await;
    finish_writer(writer).await;
}

/// Inbound text frames. Binary frames are decoded lossily and control
/// frames are skipped.
fn text_frames<S>(stream: S) -> impl Stream<Item = Result<String, SessionError>>
where
    S: Stream<Item = Result<Message, axum::Error>>,
{
    stream.filter_map(|msg| async move {
        match msg {
            Ok(Message::Text(text)) => Some(Ok(text.to_string())),
            Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
            Ok(_) => None,
            Err(e) => Some(Err(SessionError::Transport(e.to_string()))),
        }
    })
}

/// Serialize queued frames onto the socket until every sender is gone.
async fn write_frames<T: Serialize>(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<T>,
) {
    while let Some(frame) = rx.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode outbound frame");
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            debug!("Socket closed while writing");
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn finish_writer(mut writer: JoinHandle<()>) {
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        debug!("Writer did not drain in time, aborting");
        writer.abort();
    }
}
