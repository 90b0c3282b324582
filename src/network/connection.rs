//! One connected socket.
//!
//! Each connection runs one task moving bytes in both directions: inbound
//! lines go to the engine's event queue, outbound lines arrive
//! pre-serialized on the bounded sendq channel. The task owns no protocol
//! state; the engine decides everything, including when to pause reads
//! (the throttle watch) and when the connection dies (dropping the sendq
//! sender).

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, trace};

use crate::engine::{Event, EngineHandle};

/// Drive one socket until either side closes it.
pub async fn run<S>(
    stream: S,
    uid: String,
    mut outgoing: mpsc::Receiver<String>,
    mut throttle: watch::Receiver<bool>,
    engine: EngineHandle,
    recvq: usize,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = FramedRead::new(read_half, LinesCodec::new_with_max_length(recvq));

    let close_reason: Option<String> = loop {
        // Flood control: while throttled, keep writing but stop reading.
        if *throttle.borrow() {
            tokio::select! {
                changed = throttle.changed() => {
                    if changed.is_err() {
                        break Some("Connection closed".to_string());
                    }
                    continue;
                }
                maybe = outgoing.recv() => match maybe {
                    Some(line) => {
                        if write_half.write_all(line.as_bytes()).await.is_err() {
                            break Some("Write error".to_string());
                        }
                        continue;
                    }
                    None => break None, // engine dropped us; already culled
                },
            }
        }

        tokio::select! {
            maybe = outgoing.recv() => match maybe {
                Some(line) => {
                    trace!(uid = %uid, line = %line.trim_end(), "Send");
                    if write_half.write_all(line.as_bytes()).await.is_err() {
                        break Some("Write error".to_string());
                    }
                }
                None => break None,
            },
            result = reader.next() => match result {
                Some(Ok(line)) => {
                    trace!(uid = %uid, line = %line, "Recv");
                    if engine
                        .events
                        .send(Event::Line { uid: uid.clone(), line })
                        .await
                        .is_err()
                    {
                        break Some("Server shutting down".to_string());
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    break Some("RecvQ exceeded".to_string());
                }
                Some(Err(_)) => break Some("Read error".to_string()),
                None => break Some("Connection closed".to_string()),
            },
            changed = throttle.changed() => {
                if changed.is_err() {
                    break Some("Connection closed".to_string());
                }
            }
        }
    };

    // Flush anything the engine already queued (the ERROR line, usually).
    while let Ok(line) = outgoing.try_recv() {
        let _ = write_half.write_all(line.as_bytes()).await;
    }
    let _ = write_half.shutdown().await;

    if let Some(reason) = close_reason {
        debug!(uid = %uid, reason = %reason, "Connection closed");
        let _ = engine
            .events
            .send(Event::Closed {
                uid,
                reason: Some(reason),
            })
            .await;
    }
}
