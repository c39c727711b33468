//! Helpers for gRPC stream handling.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tonic::{Status, Streaming};
use tracing::debug;

/// Receive the next inbound frame within a deadline.
///
/// Used for the stream-open handshake, where a client must present its
/// parameters promptly or be rejected.
pub async fn bounded_receive<T>(stream: &mut Streaming<T>, timeout: Duration) -> Result<T, Status> {
    match tokio::time::timeout(timeout, stream.message()).await {
        Ok(Ok(Some(frame))) => Ok(frame),
        Ok(Ok(None)) => Err(Status::aborted("stream closed before first message")),
        Ok(Err(status)) => Err(status),
        Err(_) => Err(Status::deadline_exceeded("timed out receiving message")),
    }
}

/// Watch inbound frames for liveness.
///
/// Frames matching `is_pong` reset the deadline; other frames are ignored.
/// A missed deadline or any inbound read error signals unhealthy on the
/// returned channel, after which the monitor exits.
pub fn monitor_stream_health<T, F>(
    mut stream: Streaming<T>,
    tolerance: Duration,
    is_pong: F,
) -> mpsc::Receiver<()>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut deadline = Instant::now() + tolerance;
        loop {
            if tx.is_closed() {
                return;
            }

            match tokio::time::timeout_at(deadline, stream.message()).await {
                Ok(Ok(Some(frame))) => {
                    if is_pong(&frame) {
                        deadline = Instant::now() + tolerance;
                    }
                }
                Ok(Ok(None)) => {
                    debug!("Inbound stream closed by peer");
                    let _ = tx.send(()).await;
                    return;
                }
                Ok(Err(status)) => {
                    debug!(error = %status, "Inbound stream read failure");
                    let _ = tx.send(()).await;
                    return;
                }
                Err(_) => {
                    debug!("Missed pong deadline");
                    let _ = tx.send(()).await;
                    return;
                }
            }
        }
    });

    rx
}
