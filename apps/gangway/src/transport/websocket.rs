use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace};
use url::Url;

use super::{ChannelEvent, ChannelHandle, TransportError, WireMessage};

/// Open one WebSocket channel. The first event on the receiver is always
/// `Opened`; callers gate their first send on it. A dropped or errored
/// socket emits a terminal `Closed`/`Errored` event and is never reopened
/// by this layer.
pub async fn connect(
    url: &Url,
) -> Result<(ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>), TransportError> {
    let (stream, _) = connect_async(url.as_str())
        .await
        .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
    debug!(target: "transport::websocket", url = %url, "connected");

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<WireMessage>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ChannelEvent>();
    let open = Arc::new(AtomicBool::new(true));

    let _ = event_tx.send(ChannelEvent::Opened);

    let pump = tokio::spawn(pump(stream, outbound_rx, event_tx, open.clone()));
    let handle = ChannelHandle::new(outbound_tx, open, Some(pump));
    Ok((handle, event_rx))
}

async fn pump(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut outbound_rx: mpsc::UnboundedReceiver<WireMessage>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    open: Arc<AtomicBool>,
) {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let message = match outbound {
                    Some(WireMessage::Binary(bytes)) => Message::Binary(bytes),
                    Some(WireMessage::Text(text)) => Message::Text(text),
                    // All handles dropped; tear the socket down.
                    None => break,
                };
                if sink.send(message).await.is_err() {
                    open.store(false, Ordering::SeqCst);
                    let _ = event_tx.send(ChannelEvent::Closed);
                    break;
                }
            }
            inbound = source.next() => {
                match inbound {
                    Some(Ok(Message::Binary(bytes))) => {
                        trace!(target: "transport::websocket", bytes = bytes.len(), "binary frame");
                        if event_tx.send(ChannelEvent::Message(WireMessage::Binary(bytes))).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if event_tx.send(ChannelEvent::Message(WireMessage::Text(text))).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        open.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(ChannelEvent::Closed);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        open.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(ChannelEvent::Errored(
                            TransportError::Setup(err.to_string()),
                        ));
                        break;
                    }
                }
            }
        }
    }
    open.store(false, Ordering::SeqCst);
}
