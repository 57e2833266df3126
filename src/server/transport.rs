//! WebSocket transport pump
//!
//! Bridges one upgraded socket and its [`Connection`]: inbound text frames
//! go to the connection, queued outbound text goes to the socket. Any close,
//! error or EOF tears the connection down, and so does a peer that lets its
//! bounded send queue overflow.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::Result;
use crate::registry::Registry;
use crate::session::{Connection, SessionContext};

/// Drive a connection until either side goes away
///
/// The connection is always closed (and deregistered) before this returns,
/// whether the session ended cleanly or with an error.
pub async fn run_session<S>(
    ws: WebSocketStream<S>,
    context: SessionContext,
    registry: Arc<Registry>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (tx, rx) = mpsc::channel::<String>(context.send_queue_capacity.max(1));
    let connection = Connection::open(registry, context, tx);

    let result = pump(ws, &connection, rx).await;
    connection.close();
    result
}

async fn pump<S>(
    ws: WebSocketStream<S>,
    connection: &Arc<Connection>,
    mut outbound: mpsc::Receiver<String>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let session_id = connection.id();

    loop {
        tokio::select! {
            Some(text) = outbound.recv() => {
                sink.send(Message::Text(text.into())).await?;
            }
            _ = connection.lagged() => {
                tracing::warn!(session_id = %session_id, "Disconnecting lagging peer");
                return Ok(());
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        // Malformed frames are logged and dropped inside
                        let _ = connection.on_message(text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::warn!(
                            session_id = %session_id,
                            len = data.len(),
                            "Ignoring binary frame"
                        );
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(session_id = %session_id, frame = ?frame, "Peer sent close");
                        return Ok(());
                    }
                    // Pings are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                }
            }
        }
    }
}
