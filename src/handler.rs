//! WebSocket connection handler
//!
//! Bridges one upgraded socket to its room actor with two pumps:
//! - the read pump decodes frames, stamps the connection's identity and
//!   forwards events to the room
//! - the write pump drains the connection's outbound channels onto the socket
//!   in the order the room accepted the events
//!
//! The room owns the outbound senders, so closing them (unregister or
//! eviction) is what stops the write pump once it has drained them.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, Inbox, Outgoing};
use crate::error::AppError;
use crate::message;
use crate::room::RoomHandle;
use crate::types::{ConnectionId, UserId};

/// Run a connection until either pump stops
///
/// Order: write pump starts, the connection is registered with the room
/// (history replay goes through the running write pump), then the read pump
/// starts. Once both pumps are done the connection is unregistered.
pub async fn handle_connection<S>(
    ws_stream: WebSocketStream<S>,
    room: RoomHandle,
    user: UserId,
    outbound_capacity: usize,
) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ws_sender, ws_receiver) = ws_stream.split();

    let (connection, inbox) = Connection::new(user.clone(), outbound_capacity);
    let connection_id = connection.id;
    info!(
        room_id = %room.room_id(),
        connection = %connection_id,
        user = %user,
        "connection opened"
    );

    let mut write_task = tokio::spawn(write_pump(ws_sender, inbox, connection_id));

    // On failure the connection is dropped with the event, which closes its
    // channels and ends the write pump
    room.register(connection).await?;

    let mut read_task = tokio::spawn(read_pump(ws_receiver, room.clone(), user, connection_id));

    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", connection_id);
            let _ = (&mut write_task).await;
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", connection_id);
            // socket is closed, nothing left to read
            read_task.abort();
            let _ = read_task.await;
        }
    }

    if let Err(e) = room.unregister(connection_id).await {
        warn!("Failed to unregister {}: {}", connection_id, e);
    }

    info!(room_id = %room.room_id(), connection = %connection_id, "connection closed");
    Ok(())
}

/// Socket -> room
async fn read_pump<S>(
    mut ws_receiver: SplitStream<WebSocketStream<S>>,
    room: RoomHandle,
    user: UserId,
    connection_id: ConnectionId,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match message::decode(&text) {
                Ok(event) => {
                    debug!("Received {:?} from {}", event, connection_id);
                    if room.submit(event.authored_by(user.clone())).await.is_err() {
                        debug!("Room closed, ending read task for {}", connection_id);
                        break;
                    }
                }
                Err(e) => {
                    // drop the frame, keep the connection
                    warn!("Invalid frame from {}: {}", connection_id, e);
                }
            },
            Ok(WsMessage::Close(_)) => {
                debug!("Connection {} sent close frame", connection_id);
                break;
            }
            Ok(WsMessage::Binary(_)) => {
                debug!("Ignoring binary frame from {}", connection_id);
            }
            Ok(_) => {
                // Ping/Pong are answered by tungstenite
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", connection_id, e);
                break;
            }
        }
    }

    // Closes the outbound channels, which stops the write pump
    let _ = room.unregister(connection_id).await;
    debug!("Read task ended for {}", connection_id);
}

/// Outbound channels -> socket
///
/// Writes the history handed over at registration, then live events in room
/// order until the room closes the channels and they are drained.
async fn write_pump<S>(
    mut ws_sender: SplitSink<WebSocketStream<S>, WsMessage>,
    mut inbox: Inbox,
    connection_id: ConnectionId,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let history = inbox.history().await;
    let mut open = true;
    for message in history {
        if !write_frame(&mut ws_sender, &Outgoing::Message(message), connection_id).await {
            open = false;
            break;
        }
    }

    while open {
        let Some(event) = inbox.next().await else {
            break;
        };
        open = write_frame(&mut ws_sender, &event, connection_id).await;
    }
    debug!("Write task ended for {}", connection_id);

    // Send close frame when done
    let _ = ws_sender.close().await;
}

/// Returns false once the socket can no longer be written
async fn write_frame<S>(
    ws_sender: &mut SplitSink<WebSocketStream<S>, WsMessage>,
    event: &Outgoing,
    connection_id: ConnectionId,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match event.encode() {
        Ok(json) => {
            if let Err(e) = ws_sender.send(WsMessage::Text(json.into())).await {
                debug!("WebSocket send failed for {}: {}", connection_id, e);
                return false;
            }
        }
        Err(e) => {
            // Continue - don't break on serialization errors
            error!("Failed to serialize message: {}", e);
        }
    }
    true
}

/// Close a freshly upgraded socket that will not be connected to a room
pub async fn reject<S>(mut ws_stream: WebSocketStream<S>, code: CloseCode, reason: &'static str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = ws_stream.close(Some(frame)).await {
        debug!("Failed to send close frame: {}", e);
    }
}
