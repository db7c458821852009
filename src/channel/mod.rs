// src/channel/mod.rs

//! Duplex message link between a controller and its worker.
//!
//! A channel has exactly two [`Endpoint`]s. Each endpoint has one reader (its
//! owner) and delivers in FIFO order. Two transports exist:
//!
//! - [`pair`]: both endpoints in the same process (task-backed workers).
//! - [`Endpoint::over_io`]: one endpoint bridged onto a byte stream, used on
//!   both sides of a child process's stdin/stdout. The framing lives in
//!   [`codec`].

pub mod codec;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::{ProcworkerError, Result};
use codec::Frame;

/// A message exchanged over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Opaque application payload.
    Data(Vec<u8>),
    /// Cooperative shutdown request from the controller.
    Stop,
}

impl Message {
    pub fn data(payload: impl Into<Vec<u8>>) -> Self {
        Message::Data(payload.into())
    }
}

/// One side of a duplex channel.
#[derive(Debug)]
pub struct Endpoint {
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
    /// Largest `Data` payload the transport can carry, if bounded.
    max_payload: Option<usize>,
}

/// Create a connected pair of in-process endpoints.
pub fn pair() -> (Endpoint, Endpoint) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        Endpoint {
            tx: a_tx,
            rx: b_rx,
            max_payload: None,
        },
        Endpoint {
            tx: b_tx,
            rx: a_rx,
            max_payload: None,
        },
    )
}

impl Endpoint {
    /// Enqueue `message` for the peer.
    ///
    /// Fails with `ChannelClosed` once the peer side has terminated, and with
    /// `ParameterError` for a payload the underlying stream cannot frame.
    pub fn send(&self, message: Message) -> Result<()> {
        if let (Some(limit), Message::Data(payload)) = (self.max_payload, &message) {
            if payload.len() > limit {
                return Err(ProcworkerError::ParameterError(format!(
                    "payload of {} bytes exceeds the channel limit of {limit}",
                    payload.len()
                )));
            }
        }
        self.tx
            .send(message)
            .map_err(|_| ProcworkerError::ChannelClosed)
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` means the timeout elapsed. Messages the peer sent before
    /// terminating are still delivered; `ChannelClosed` is only reported once
    /// the queue is drained.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(ProcworkerError::ChannelClosed),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Wait without a deadline for the next message.
    pub async fn recv(&mut self) -> Result<Message> {
        self.rx.recv().await.ok_or(ProcworkerError::ChannelClosed)
    }

    /// Non-blocking receive.
    pub fn try_receive(&mut self) -> Result<Option<Message>> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(ProcworkerError::ChannelClosed),
        }
    }

    /// Whether sends to the peer can no longer succeed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Bridge a new endpoint onto a byte stream.
    ///
    /// Two pump tasks are spawned:
    /// - the writer encodes every message sent on the returned endpoint into
    ///   `writer`, and shuts `writer` down once the endpoint is dropped;
    /// - the reader decodes frames from `reader` and delivers them to the
    ///   returned endpoint until EOF.
    ///
    /// When the reader hits EOF (the peer process closed its side) the writer
    /// stops too, so later sends fail with `ChannelClosed` instead of
    /// disappearing into a dead pipe.
    pub fn over_io<R, W>(reader: R, writer: W, label: impl Into<String>) -> (Endpoint, PumpHandle)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let label = label.into();
        let (mut local, remote) = pair();
        local.max_payload = Some(codec::MAX_CHUNK_LEN);
        let Endpoint {
            tx: inbound_tx,
            rx: mut outbound_rx,
            ..
        } = remote;
        let (eof_tx, mut eof_rx) = oneshot::channel::<()>();

        let writer_label = label.clone();
        let writer_task = tokio::spawn(async move {
            let mut writer = BufWriter::new(writer);
            loop {
                let message = tokio::select! {
                    biased;
                    message = outbound_rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                    _ = &mut eof_rx => {
                        debug!(channel = %writer_label, "peer closed its stream; writer stopping");
                        break;
                    }
                };
                match codec::write_frame(&mut writer, &Frame::Message(message)).await {
                    Ok(()) => {}
                    // Rejected before anything reached the stream.
                    Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                        warn!(channel = %writer_label, error = %e, "dropping unframeable message");
                    }
                    Err(e) => {
                        debug!(channel = %writer_label, error = %e, "write failed; writer stopping");
                        break;
                    }
                }
            }
            let _ = writer.shutdown().await;
        });

        let reader_task = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            loop {
                match codec::read_frame(&mut reader).await {
                    Ok(Some(Frame::Message(message))) => {
                        if inbound_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(Some(other)) => {
                        warn!(channel = %label, frame = ?other, "ignoring unexpected frame");
                    }
                    Ok(None) => {
                        debug!(channel = %label, "stream reached EOF");
                        break;
                    }
                    Err(e) => {
                        warn!(channel = %label, error = %e, "failed to decode frame; closing channel");
                        break;
                    }
                }
            }
            let _ = eof_tx.send(());
        });

        (
            local,
            PumpHandle {
                writer: writer_task,
                reader: reader_task,
            },
        )
    }
}

/// Background tasks that move frames between an endpoint and a byte stream.
///
/// Dropping the handle aborts both pumps.
#[derive(Debug)]
pub struct PumpHandle {
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl PumpHandle {
    /// Wait until every message queued on the (already dropped) endpoint has
    /// been written, then stop the reader.
    pub async fn finish(mut self) {
        if let Err(e) = (&mut self.writer).await {
            debug!(error = %e, "channel writer task ended abnormally");
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn messages_arrive_in_send_order() {
        let (controller, mut worker) = pair();

        controller.send(Message::data("m1")).unwrap();
        controller.send(Message::data("m2")).unwrap();
        controller.send(Message::Stop).unwrap();

        assert_eq!(worker.receive(WAIT).await.unwrap(), Some(Message::data("m1")));
        assert_eq!(worker.receive(WAIT).await.unwrap(), Some(Message::data("m2")));
        assert_eq!(worker.receive(WAIT).await.unwrap(), Some(Message::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn receive_times_out_with_none() {
        let (_controller, mut worker) = pair();
        assert_eq!(worker.receive(Duration::from_millis(50)).await.unwrap(), None);
        assert_eq!(worker.try_receive().unwrap(), None);
    }

    #[tokio::test]
    async fn dropped_peer_closes_after_queue_drains() {
        let (controller, mut worker) = pair();
        worker.send(Message::data("last words")).unwrap();
        drop(worker);

        let mut controller = controller;
        assert!(controller.is_closed());
        assert!(matches!(
            controller.send(Message::Stop),
            Err(ProcworkerError::ChannelClosed)
        ));
        assert_eq!(
            controller.receive(WAIT).await.unwrap(),
            Some(Message::data("last words"))
        );
        assert!(matches!(
            controller.receive(WAIT).await,
            Err(ProcworkerError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn io_bridge_preserves_order_in_both_directions() {
        let (a_stream, b_stream) = tokio::io::duplex(64);
        let (a_read, a_write) = tokio::io::split(a_stream);
        let (b_read, b_write) = tokio::io::split(b_stream);

        let (mut a, _a_pumps) = Endpoint::over_io(a_read, a_write, "a");
        let (mut b, _b_pumps) = Endpoint::over_io(b_read, b_write, "b");

        for i in 0..20 {
            a.send(Message::data(format!("a{i}"))).unwrap();
        }
        b.send(Message::Stop).unwrap();

        for i in 0..20 {
            assert_eq!(b.recv().await.unwrap(), Message::data(format!("a{i}")));
        }
        assert_eq!(a.recv().await.unwrap(), Message::Stop);
    }

    #[tokio::test]
    async fn io_bridge_reports_closed_after_peer_eof() {
        let (a_stream, b_stream) = tokio::io::duplex(64);
        let (a_read, a_write) = tokio::io::split(a_stream);
        let (mut a, _pumps) = Endpoint::over_io(a_read, a_write, "a");

        drop(b_stream);

        assert!(matches!(a.recv().await, Err(ProcworkerError::ChannelClosed)));
        // The writer stops once the reader sees EOF.
        tokio::time::timeout(WAIT, async {
            while !a.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("writer should stop after peer EOF");
        assert!(matches!(
            a.send(Message::data("late")),
            Err(ProcworkerError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn oversized_send_fails_and_stream_stays_usable() {
        let (a_stream, b_stream) = tokio::io::duplex(1024);
        let (a_read, a_write) = tokio::io::split(a_stream);
        let (b_read, b_write) = tokio::io::split(b_stream);

        let (a, _a_pumps) = Endpoint::over_io(a_read, a_write, "a");
        let (mut b, _b_pumps) = Endpoint::over_io(b_read, b_write, "b");

        let err = a
            .send(Message::Data(vec![0u8; codec::MAX_CHUNK_LEN + 1]))
            .unwrap_err();
        assert!(matches!(err, ProcworkerError::ParameterError(_)));

        a.send(Message::data("after")).unwrap();
        a.send(Message::Stop).unwrap();
        assert_eq!(b.recv().await.unwrap(), Message::data("after"));
        assert_eq!(b.recv().await.unwrap(), Message::Stop);
    }

    #[test]
    fn in_memory_pair_has_no_payload_limit() {
        let (a, mut b) = pair();
        a.send(Message::Data(vec![0u8; codec::MAX_CHUNK_LEN + 1])).unwrap();
        assert!(matches!(b.try_receive(), Ok(Some(Message::Data(p))) if p.len() > codec::MAX_CHUNK_LEN));
    }

    #[tokio::test]
    async fn finish_flushes_queued_messages() {
        let (a_stream, b_stream) = tokio::io::duplex(1024);
        let (a_read, a_write) = tokio::io::split(a_stream);
        let (b_read, b_write) = tokio::io::split(b_stream);

        let (a, pumps) = Endpoint::over_io(a_read, a_write, "a");
        let (mut b, _b_pumps) = Endpoint::over_io(b_read, b_write, "b");

        a.send(Message::data("one")).unwrap();
        a.send(Message::data("two")).unwrap();
        drop(a);
        pumps.finish().await;

        assert_eq!(b.recv().await.unwrap(), Message::data("one"));
        assert_eq!(b.recv().await.unwrap(), Message::data("two"));
        assert!(matches!(b.recv().await, Err(ProcworkerError::ChannelClosed)));
    }
}
