//! WebSocket listener
//!
//! Accepts TCP connections and upgrades `GET /room/{roomId}/connect`. The
//! caller's identity comes from the `X-User-Id` header, which the gateway in
//! front of this service sets after authenticating the request.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::handler::reject;
use crate::hub::ChatHub;
use crate::types::{RoomId, UserId};

/// Header carrying the authenticated user id
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Connection accept loop
///
/// Runs until the listener fails to produce connections forever; each
/// connection is served on its own task.
pub async fn serve(listener: TcpListener, hub: Arc<ChatHub>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                let hub = hub.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = accept_connection(stream, hub).await {
                        warn!("Connection from {} ended with error: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handshake, authorize and run a single connection
pub async fn accept_connection(stream: TcpStream, hub: Arc<ChatHub>) -> Result<(), AppError> {
    let mut target = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        target = Some(upgrade_target(req)?);
        Ok(resp)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;

    let Some((room_id, user)) = target else {
        return Ok(());
    };

    if let Err(e) = hub.validate_connection(&room_id, &user).await {
        info!(room_id = %room_id, user = %user, "connection refused: {}", e);
        let reason = match e {
            AppError::Forbidden { .. } => "not a member of this room",
            _ => "room not available",
        };
        reject(ws_stream, CloseCode::Policy, reason).await;
        return Err(e);
    }

    hub.connect(room_id, user, ws_stream).await
}

/// Extract room and user from the upgrade request, or refuse the handshake
fn upgrade_target(req: &Request) -> Result<(RoomId, UserId), ErrorResponse> {
    let room_id = parse_room_path(req.uri().path())
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Room not found"))?;

    let user = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "Unauthorized"))?;

    Ok((RoomId::new(room_id), UserId::new(user)))
}

/// `/room/{roomId}/connect` -> `roomId`
pub fn parse_room_path(path: &str) -> Option<&str> {
    let id = path.strip_prefix("/room/")?.strip_suffix("/connect")?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}

fn error_response(status: StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str, user: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(path);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_parse_room_path() {
        assert_eq!(parse_room_path("/room/R1/connect"), Some("R1"));
        assert_eq!(parse_room_path("/room//connect"), None);
        assert_eq!(parse_room_path("/room/a/b/connect"), None);
        assert_eq!(parse_room_path("/rooms/R1/connect"), None);
        assert_eq!(parse_room_path("/room/R1"), None);
    }

    #[test]
    fn test_upgrade_target() {
        let (room, user) = upgrade_target(&request("/room/R1/connect", Some("alice"))).unwrap();
        assert_eq!(room, RoomId::new("R1"));
        assert_eq!(user, UserId::new("alice"));
    }

    #[test]
    fn test_upgrade_target_rejections() {
        let err = upgrade_target(&request("/elsewhere", Some("alice"))).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = upgrade_target(&request("/room/R1/connect", None)).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = upgrade_target(&request("/room/R1/connect", Some("  "))).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
