//! Session channel: one WebSocket per conversation.
//!
//! Frames are forwarded untouched to the caller through an unbounded
//! channel; parsing belongs to the reconciler. Outbound messages go through
//! a queue drained by the same task that reads, so sends never block the UI.
//! Dropping the transport closes the channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::protocol::ClientMessage;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out connecting to {0}")]
    Timeout(String),
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    #[error("session channel is closed")]
    Closed,
}

/// Anything the reconciler can hand client messages to.
pub trait MessageSink {
    fn send(&self, message: &ClientMessage) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame, as received.
    Frame(String),
    /// Orderly close, from either side.
    Closed { reason: Option<String> },
    /// Read or write failure; the channel is unusable.
    Failed { reason: String },
}

enum Outbound {
    Text(String),
    Close,
}

pub struct SessionTransport {
    url: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

pub fn session_url(ws_base: &str, conversation_id: &str) -> String {
    format!(
        "{}/ws/chat/{}",
        ws_base.trim_end_matches('/'),
        urlencoding::encode(conversation_id)
    )
}

impl SessionTransport {
    /// Open the session channel for `conversation_id`.
    pub async fn connect(
        ws_base: &str,
        conversation_id: &str,
        timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let url = session_url(ws_base, conversation_id);
        info!("Opening session channel: {}", url);

        let (ws_stream, _) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(url.clone()))?
            .map_err(|e| TransportError::Connect {
                url: url.clone(),
                source: Box::new(e),
            })?;

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (events, events_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let task_open = open.clone();
        let task_url = url.clone();
        tokio::spawn(async move {
            let end = loop {
                tokio::select! {
                    out = outbound_rx.recv() => match out {
                        Some(Outbound::Text(text)) => {
                            if let Err(e) = write.send(WsMessage::Text(text)).await {
                                break TransportEvent::Failed { reason: e.to_string() };
                            }
                        }
                        Some(Outbound::Close) | None => {
                            let _ = write.send(WsMessage::Close(None)).await;
                            break TransportEvent::Closed { reason: Some("closed by client".to_string()) };
                        }
                    },
                    msg = read.next() => match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            if events.send(TransportEvent::Frame(text)).is_err() {
                                // Receiver gone: nobody is listening any more.
                                break TransportEvent::Closed { reason: None };
                            }
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            let _ = write.send(WsMessage::Pong(data)).await;
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            break TransportEvent::Closed {
                                reason: frame
                                    .map(|f| f.reason.to_string())
                                    .filter(|r| !r.is_empty()),
                            };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break TransportEvent::Failed { reason: e.to_string() },
                        None => break TransportEvent::Closed { reason: None },
                    },
                }
            };
            task_open.store(false, Ordering::SeqCst);
            match &end {
                TransportEvent::Failed { reason } => {
                    warn!("Session channel {} failed: {}", task_url, reason)
                }
                _ => info!("Session channel {} closed", task_url),
            }
            let _ = events.send(end);
        });

        Ok((
            Self {
                url,
                outbound,
                open,
            },
            events_rx,
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Ask the peer to close. The receiver still gets the final `Closed`.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(Outbound::Close);
        }
    }
}

impl MessageSink for SessionTransport {
    fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let text = message.to_json();
        debug!("-> {}", text);
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn local_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("ws://{}", listener.local_addr().unwrap());
        (listener, base)
    }

    #[test]
    fn test_session_url() {
        assert_eq!(
            session_url("ws://localhost:8000/", "conv_1a2b3c4d"),
            "ws://localhost:8000/ws/chat/conv_1a2b3c4d"
        );
        assert_eq!(
            session_url("wss://agent.example", "a b"),
            "wss://agent.example/ws/chat/a%20b"
        );
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (listener, base) = local_server().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(WsMessage::Text(r#"{"type":"connected"}"#.to_string()))
                .await
                .unwrap();
            let received = loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(t))) => break t,
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected {other:?}"),
                }
            };
            ws.send(WsMessage::Text(received)).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let (transport, mut events) = SessionTransport::connect(&base, "conv_1", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(transport.is_open());
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Frame(r#"{"type":"connected"}"#.to_string()))
        );

        transport.send(&ClientMessage::user("list files")).unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Frame(r#"{"message":"list files"}"#.to_string()))
        );
        assert!(matches!(events.recv().await, Some(TransportEvent::Closed { .. })));
        assert!(!transport.is_open());
        assert!(matches!(
            transport.send(&ClientMessage::approval(true)),
            Err(TransportError::Closed)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_close_reports_closed() {
        let (listener, base) = local_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (transport, mut events) = SessionTransport::connect(&base, "conv_1", Duration::from_secs(5))
            .await
            .unwrap();
        transport.close();
        assert!(!transport.is_open());
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Closed {
                reason: Some("closed by client".to_string())
            })
        );
    }

    #[tokio::test]
    async fn test_connect_times_out_without_handshake() {
        // Accepts TCP via the backlog but never answers the upgrade.
        let (_listener, base) = local_server().await;
        let err = SessionTransport::connect(&base, "conv_1", Duration::from_millis(200))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Timeout(url) if url.ends_with("/ws/chat/conv_1")));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, base) = local_server().await;
        drop(listener);
        let err = SessionTransport::connect(&base, "conv_1", Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
