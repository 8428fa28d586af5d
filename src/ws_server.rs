// WebSocket fan-out: one accept loop, one task per client.
//
// Each client gets the full auction snapshot on connect, then a merged
// stream of broadcast events and replies to its own commands. Clients never
// touch engine state directly; everything goes through the EngineHandle.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::engine::EngineHandle;
use crate::protocol::{Command, Reply};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind websocket port {port}"))
}

/// Accept clients forever, spawning one task per connection.
pub async fn run(listener: TcpListener, handle: EngineHandle) -> Result<()> {
    let addr = listener.local_addr().context("listener has no address")?;
    info!(%addr, "websocket server listening");

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("failed to accept connection")?;
        let handle = handle.clone();
        tokio::spawn(async move {
            debug!(%peer, "client connected");
            if let Err(err) = serve_client(stream, peer, handle).await {
                debug!(%peer, error = %err, "client connection ended");
            } else {
                debug!(%peer, "client disconnected");
            }
        });
    }
}

async fn serve_client(stream: TcpStream, peer: SocketAddr, handle: EngineHandle) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("websocket handshake failed")?;
    let (mut sink, mut source) = ws.split();

    // Subscribe before the snapshot request so no event falls in the gap.
    let mut events = handle.subscribe();
    let snapshot = handle.request(Command::GetState).await;
    send_json(&mut sink, &snapshot).await?;

    loop {
        tokio::select! {
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<Command>(&text) {
                        Ok(command) => handle.request(command).await,
                        Err(err) => Reply::Error {
                            code: "ValidationError".to_string(),
                            message: format!("invalid command: {err}"),
                        },
                    };
                    send_json(&mut sink, &reply).await?;
                }
                Some(Ok(Message::Ping(data))) => {
                    sink.send(Message::Pong(data))
                        .await
                        .context("failed to answer ping")?;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // binary frames and pongs are ignored
                Some(Err(err)) => return Err(err).context("websocket read failed"),
            },
            event = events.recv() => match event {
                Ok(event) => send_json(&mut sink, &event).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // The client fell behind the fan-out; resync with a
                    // fresh snapshot instead of replaying the backlog.
                    warn!(%peer, skipped, "client lagged, resyncing");
                    let snapshot = handle.request(Command::GetState).await;
                    send_json(&mut sink, &snapshot).await?;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

async fn send_json<T: Serialize>(sink: &mut WsSink, value: &T) -> Result<()> {
    let text = serde_json::to_string(value).context("failed to encode outbound message")?;
    sink.send(Message::Text(text.into()))
        .await
        .context("failed to send message")?;
    Ok(())
}
