use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::upstream::transport::BodyStream;
use super::background::BackgroundTasks;

type Chunk = Result<Bytes, io::Error>;

/// One reader of a split body. Chunks are shared `Bytes`, never copied.
pub struct EgressBranch {
    rx: mpsc::UnboundedReceiver<Chunk>,
}

impl Stream for EgressBranch {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

fn clone_error(err: &io::Error) -> io::Error {
    io::Error::new(err.kind(), err.to_string())
}

/// Fans `body` out to a client branch and a meter branch.
///
/// The branches are fed by a tracked pump task through unbounded queues, so a
/// slow or vanished client never stalls metering and vice versa.
pub fn split_body(mut body: BodyStream, tasks: &BackgroundTasks) -> (EgressBranch, EgressBranch) {
    let (client_tx, client_rx) = mpsc::unbounded_channel::<Chunk>();
    let (meter_tx, meter_rx) = mpsc::unbounded_channel::<Chunk>();
    tasks.spawn(async move {
        let mut client_open = true;
        let mut meter_open = true;
        while let Some(item) = body.next().await {
            match item {
                Ok(chunk) => {
                    if client_open && client_tx.send(Ok(chunk.clone())).is_err() {
                        client_open = false;
                        log::debug!("event=egress_client_detached");
                    }
                    if meter_open && meter_tx.send(Ok(chunk)).is_err() {
                        meter_open = false;
                    }
                    if !client_open && !meter_open {
                        break;
                    }
                }
                Err(err) => {
                    let _ = client_tx.send(Err(clone_error(&err)));
                    let _ = meter_tx.send(Err(err));
                    break;
                }
            }
        }
    });
    (
        EgressBranch { rx: client_rx },
        EgressBranch { rx: meter_rx },
    )
}

/// Drains the meter branch and returns the number of bytes that went by.
/// A stream error ends the count early; the bytes seen so far are reported.
pub async fn measure_streamed_egress(mut meter: EgressBranch) -> u64 {
    let mut total: u64 = 0;
    while let Some(item) = meter.next().await {
        match item {
            Ok(chunk) => total += chunk.len() as u64,
            Err(err) => {
                log::warn!(
                    "event=egress_meter_error bytes_so_far={} err={}",
                    total,
                    err
                );
                break;
            }
        }
    }
    total
}
