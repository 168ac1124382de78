//! WebSocket transport
//!
//! Responsibilities:
//! - Accept TCP/WebSocket connections that offer the `stockings` subprotocol
//!   and pass the optional request filter
//! - Attach a `Connection` for every accepted socket
//! - Pump inbound text frames into the connection and outbound frames from
//!   its queue to the socket
//! - Report the socket gone so the connection's close event fires

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, error, info};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tungstenite::http::{HeaderValue, StatusCode};
use tungstenite::protocol::Message as WsMessage;

use crate::server::{RequestFilter, SessionServer};
use crate::utils::error::Result;

pub const STOCKINGS_PROTOCOL: &str = "stockings";

/// Whether the client listed `stockings` among its offered subprotocols.
pub fn has_stockings_protocol(request: &Request) -> bool {
    request
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|protocol| protocol.trim().eq_ignore_ascii_case(STOCKINGS_PROTOCOL))
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Handshake callback: admits the request and selects the subprotocol, or
/// rejects it.
pub fn negotiate(
    request: &Request,
    mut response: Response,
    filter: Option<&RequestFilter>,
) -> std::result::Result<Response, ErrorResponse> {
    if !has_stockings_protocol(request) {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "the stockings subprotocol is required",
        ));
    }
    if let Some(filter) = filter {
        if !filter(request) {
            return Err(reject(StatusCode::FORBIDDEN, "request refused"));
        }
    }
    response.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(STOCKINGS_PROTOCOL),
    );
    Ok(response)
}

pub async fn start_websocket_server(addr: &str, server: Arc<SessionServer>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    serve(listener, server).await
}

pub async fn serve(listener: TcpListener, server: Arc<SessionServer>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                spawn(handle_socket(stream, peer, server.clone()));
            }
            Err(e) => {
                error!("Failed to accept connection: {e}");
                return Err(e.into());
            }
        }
    }
}

pub async fn handle_socket(stream: TcpStream, peer: SocketAddr, server: Arc<SessionServer>) {
    let filter = server.request_filter();
    let ws_stream = match accept_hdr_async(stream, |request: &Request, response: Response| {
        negotiate(request, response, filter.as_ref())
    })
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            debug!(address = %peer, "WebSocket handshake rejected: {e}");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let connection = server.attach(peer.ip().to_string(), tx);

    let writer = {
        let connection_id = connection.id().to_string();
        spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = msg.is_close();
                if let Err(e) = ws_sender.send(msg).await {
                    debug!(connection_id = %connection_id, "Failed to send message: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!(connection_id = %connection_id, "Send loop closed");
        })
    };

    loop {
        tokio::select! {
            _ = connection.shutdown_requested() => break,
            frame = ws_receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    connection.receive(text.as_str());
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %connection.id(), "Read error: {e}");
                    break;
                }
            },
        }
    }

    connection.mark_closed();
    let _ = writer.await;
    info!(connection_id = %connection.id(), "{} disconnected", peer);
}
