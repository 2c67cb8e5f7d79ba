use std::time::Duration;

use async_trait::async_trait;
use bss_types::{
    protocol::{InboundMessage, OutboundMessage},
    BssError, Result,
};
use futures::{stream::BoxStream, Sink, SinkExt, Stream, StreamExt};
use tokio::{sync::mpsc, time::timeout};
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::{header::AUTHORIZATION, HeaderValue},
    Error as WsError, Message,
};
use tracing::{debug, info, warn};

use crate::socketio::{self, Handshake, Packet};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// An open bidirectional link to the backend.
///
/// Dropping `outbound` closes the write half; `inbound` ends when the peer goes away.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<OutboundMessage>,
    pub inbound: BoxStream<'static, InboundMessage>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, token: &str) -> Result<Link>;
}

/// Socket.IO client over the Engine.IO WebSocket transport.
pub struct SocketIoConnector {
    url: String,
}

impl SocketIoConnector {
    /// `url` may be the server base (`ws://host:5000`) or a full `/socket.io/` endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: socketio::endpoint(&url.into()),
        }
    }
}

#[async_trait]
impl Connector for SocketIoConnector {
    async fn open(&self, token: &str) -> Result<Link> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| BssError::Connection(format!("invalid endpoint {}: {err}", self.url)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| BssError::Connection(format!("unusable auth token: {err}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (mut stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|err| BssError::Transport(format!("connect to {} failed: {err}", self.url)))?;
        let session = timeout(HANDSHAKE_TIMEOUT, handshake(&mut stream, token))
            .await
            .map_err(|_| BssError::Transport("Socket.IO handshake timed out".into()))??;
        info!(sid = %session.sid, "Socket.IO session open at {}", self.url);

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let (control_tx, mut control_rx) = mpsc::unbounded_channel::<&'static str>();

        tokio::spawn(async move {
            loop {
                let text = tokio::select! {
                    biased;
                    Some(control) = control_rx.recv() => control.to_string(),
                    message = rx.recv() => match message {
                        Some(message) => match socketio::encode(&message) {
                            Ok(text) => text,
                            Err(err) => {
                                warn!(%err, "dropping unencodable outbound message");
                                continue;
                            }
                        },
                        None => break,
                    },
                };
                if let Err(err) = sink.send(Message::Text(text)).await {
                    warn!(%err, "Socket.IO write failed");
                    break;
                }
            }
            let _ = sink.send(Message::Text(socketio::DISCONNECT.into())).await;
            let _ = sink.close().await;
            debug!("Socket.IO writer finished");
        });

        let window = session.liveness_window();
        let inbound = async_stream::stream! {
            loop {
                let frame = match timeout(window, source.next()).await {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(_) => {
                        warn!(?window, "no ping from the server; dropping the link");
                        break;
                    }
                };
                match frame {
                    Ok(Message::Text(text)) => match socketio::decode(&text) {
                        Ok(Packet::Ping) => {
                            let _ = control_tx.send(socketio::PONG);
                        }
                        Ok(Packet::Event { name, data }) => match InboundMessage::from_event(&name, data) {
                            Ok(message) => yield message,
                            Err(err) => debug!(%err, "ignoring inbound event"),
                        },
                        Ok(Packet::Close | Packet::Disconnect) => {
                            info!("Socket.IO session ended by server");
                            break;
                        }
                        Ok(packet) => debug!(?packet, "ignoring control packet"),
                        Err(err) => debug!(%err, "ignoring undecodable packet"),
                    },
                    Ok(Message::Close(reason)) => {
                        info!(?reason, "WebSocket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "WebSocket read failed");
                        break;
                    }
                }
            }
        };

        Ok(Link {
            outbound: tx,
            inbound: inbound.boxed(),
        })
    }
}

/// Engine.IO `open`, then the Socket.IO namespace connect.
async fn handshake<S>(stream: &mut S, token: &str) -> Result<Handshake>
where
    S: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin,
{
    let session = match next_packet(stream).await? {
        Packet::Open(session) => session,
        other => {
            return Err(BssError::Protocol(format!(
                "expected Engine.IO open packet, got {other:?}"
            )))
        }
    };
    send_text(stream, socketio::connect_packet(token)).await?;

    loop {
        match next_packet(stream).await? {
            Packet::Connect(_) => return Ok(session),
            Packet::ConnectError(reason) => {
                return Err(BssError::Connection(format!(
                    "Socket.IO connect refused: {reason}"
                )))
            }
            Packet::Ping => send_text(stream, socketio::PONG.to_string()).await?,
            Packet::Close | Packet::Disconnect => {
                return Err(BssError::Transport(
                    "server closed the session during the handshake".into(),
                ))
            }
            other => debug!(?other, "ignoring packet before namespace connect"),
        }
    }
}

async fn next_packet<S>(stream: &mut S) -> Result<Packet>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return socketio::decode(&text),
            Some(Ok(Message::Close(_))) | None => {
                return Err(BssError::Transport(
                    "connection closed during the Socket.IO handshake".into(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(BssError::Transport(format!("WebSocket read failed: {err}"))),
        }
    }
}

async fn send_text<S>(stream: &mut S, text: String) -> Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    stream
        .send(Message::Text(text))
        .await
        .map_err(|err| BssError::Transport(format!("WebSocket write failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bss_types::{
        camera::CameraId,
        protocol::{ServerMessage, StopStream},
    };
    use tokio::net::TcpListener;

    const OPEN: &str = r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;

    async fn next_text<S>(ws: &mut S) -> String
    where
        S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        loop {
            match ws.next().await.expect("socket open").expect("frame") {
                Message::Text(text) => return text,
                _ => continue,
            }
        }
    }

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}", listener.local_addr().expect("addr"));
        (listener, url)
    }

    #[tokio::test]
    async fn exchanges_socket_io_events_with_the_backend() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("upgrade");
            ws.send(Message::Text(OPEN.into())).await.expect("open");
            let connect = next_text(&mut ws).await;
            ws.send(Message::Text(r#"40{"sid":"n1"}"#.into())).await.expect("ack");
            ws.send(Message::Text("2".into())).await.expect("ping");
            ws.send(Message::Text(r#"42["response",{"message":"hello"}]"#.into()))
                .await
                .expect("event");
            let pong = next_text(&mut ws).await;
            let command = next_text(&mut ws).await;
            (connect, pong, command)
        });

        let link = SocketIoConnector::new(url).open("secret").await.expect("open");
        let mut inbound = link.inbound;
        let message = timeout(Duration::from_secs(2), inbound.next())
            .await
            .expect("inbound event")
            .expect("stream open");
        assert_eq!(
            message,
            InboundMessage::Response(ServerMessage {
                message: "hello".into()
            })
        );

        link.outbound
            .send(OutboundMessage::StopStream(StopStream {
                camera_id: CameraId(1),
            }))
            .expect("queue command");
        let (connect, pong, command) = timeout(Duration::from_secs(2), server)
            .await
            .expect("server finished")
            .expect("server task");
        assert_eq!(connect, r#"40{"token":"secret"}"#);
        assert_eq!(pong, "3");
        assert_eq!(command, r#"42["stop_stream",{"camera_id":1}]"#);
    }

    #[tokio::test]
    async fn refused_namespace_connect_is_a_connection_error() {
        let (listener, url) = listen().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("upgrade");
            ws.send(Message::Text(OPEN.into())).await.expect("open");
            let _ = next_text(&mut ws).await;
            ws.send(Message::Text(r#"44{"message":"unauthorized"}"#.into()))
                .await
                .expect("refuse");
            let _ = ws.next().await;
        });

        let err = SocketIoConnector::new(url)
            .open("stale")
            .await
            .err()
            .expect("open must fail");
        assert!(matches!(err, BssError::Connection(reason) if reason.contains("unauthorized")));
    }
}
