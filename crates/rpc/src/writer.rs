//! Dedicated writer task owning the write half of a connection.
//!
//! ```text
//! Handler 1 ─┐
//! Handler 2 ─┼─► mpsc::UnboundedSender<Frame> ─► writer task ─► socket
//! Session   ─┘
//! ```
//!
//! Frames queued before the close signal are still written, then the sink is
//! flushed and shut down.

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameCodec};

/// Maximum frames fed before a flush.
const MAX_BATCH_SIZE: usize = 64;

/// Spawn the writer task for `io`.
pub(crate) fn spawn_writer<W>(
    io: W,
    codec: FrameCodec,
    rx: mpsc::UnboundedReceiver<Frame>,
    close: CancellationToken,
) -> JoinHandle<()>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(write_frames(FramedWrite::new(io, codec), rx, close))
}

async fn write_frames<W>(
    mut sink: FramedWrite<W, FrameCodec>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    close: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            frame = rx.recv() => frame,
            () = close.cancelled() => break,
        };
        let Some(frame) = frame else { break };

        if let Err(e) = write_batch(&mut sink, frame, &mut rx).await {
            debug!("writer stopped: {e}");
            return;
        }
    }

    // Drain whatever was queued before the close signal
    while let Ok(frame) = rx.try_recv() {
        if let Err(e) = feed(&mut sink, frame).await {
            debug!("failed to write queued frame: {e}");
            break;
        }
    }
    if let Err(e) = sink.close().await {
        debug!("failed to close connection: {e}");
    }
}

async fn write_batch<W>(
    sink: &mut FramedWrite<W, FrameCodec>,
    first: Frame,
    rx: &mut mpsc::UnboundedReceiver<Frame>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    feed(sink, first).await?;
    let mut batched = 1;
    while batched < MAX_BATCH_SIZE {
        let Ok(frame) = rx.try_recv() else { break };
        feed(sink, frame).await?;
        batched += 1;
    }
    trace!(frames = batched, "flushing");
    sink.flush().await
}

// Payload sizes are checked before frames are queued. A frame the codec
// still refuses is dropped and the connection stays usable.
async fn feed<W>(sink: &mut FramedWrite<W, FrameCodec>, frame: Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let request_id = frame.request_id;
    match sink.feed(frame).await {
        Err(Error::Protocol(e)) => {
            warn!(?request_id, "dropping outbound frame: {e}");
            Ok(())
        }
        other => other,
    }
}
