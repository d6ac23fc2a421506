//! One engine socket, one actor task.
//!
//! DBGp allows a single outstanding command per connection. The actor owns
//! the socket halves and serializes everything: commands queue FIFO, the
//! next one is written only once the previous response (or its timeout) has
//! been delivered, and responses are correlated back to waiting callers by
//! transaction id.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::dbgp::framing::{encode_command, FrameDecoder, FrameEvent};
use crate::dbgp::parse;
use crate::dbgp::types::{Init, Response, StreamRecord};
use crate::dbgp::xml;
use crate::{Error, Result};

/// Consecutive framing errors tolerated before the connection is dropped.
const MAX_FRAMING_ERRORS: u32 = 8;

#[derive(Debug)]
pub enum ConnectionEvent {
    Init(Init),
    Response(Response),
    Stream(StreamRecord),
    ProtocolError(String),
    Closed,
}

struct PendingRequest {
    command: String,
    args: Vec<(&'static str, String)>,
    data: Option<Vec<u8>>,
    reply: oneshot::Sender<Result<Response>>,
}

enum Op {
    Request(PendingRequest),
    Close,
}

/// Handle to a connection actor. Cheap to clone; the actor shuts down when
/// the socket closes, `close` is called, or every handle is dropped.
#[derive(Clone)]
pub struct Connection {
    op_tx: mpsc::UnboundedSender<Op>,
}

impl Connection {
    /// Spawn the actor for a freshly accepted engine stream. Events (init,
    /// uncorrelated responses, stream output, close) arrive on the returned
    /// receiver in socket order.
    pub fn spawn<S>(
        stream: S,
        command_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            Actor::new(stream, command_timeout, op_rx, event_tx).run().await;
        });
        (Self { op_tx }, event_rx)
    }

    /// Send a command and wait for its response.
    ///
    /// The command is queued if another one is in flight. Fails with
    /// [`Error::Timeout`] when the engine stays silent past the configured
    /// window and with [`Error::ConnectionClosed`] once the socket is gone.
    pub async fn request(
        &self,
        command: &str,
        args: Vec<(&'static str, String)>,
        data: Option<Vec<u8>>,
    ) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let req = PendingRequest {
            command: command.to_string(),
            args,
            data,
            reply: reply_tx,
        };
        self.op_tx
            .send(Op::Request(req))
            .map_err(|_| Error::ConnectionClosed)?;
        reply_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Ask the actor to tear the connection down. Idempotent.
    pub fn close(&self) {
        let _ = self.op_tx.send(Op::Close);
    }
}

struct Waiter {
    transaction_id: u32,
    command: String,
    reply: oneshot::Sender<Result<Response>>,
    deadline: Instant,
}

struct Actor<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    timeout: Duration,
    op_rx: mpsc::UnboundedReceiver<Op>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    decoder: FrameDecoder,
    queue: VecDeque<PendingRequest>,
    outstanding: Option<Waiter>,
    tx_counter: u32,
    framing_errors: u32,
}

impl<S> Actor<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn new(
        stream: S,
        timeout: Duration,
        op_rx: mpsc::UnboundedReceiver<Op>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer,
            timeout,
            op_rx,
            event_tx,
            decoder: FrameDecoder::new(),
            queue: VecDeque::new(),
            outstanding: None,
            tx_counter: 0,
            framing_errors: 0,
        }
    }

    async fn run(mut self) {
        let mut read_buf = [0u8; 8192];

        loop {
            let deadline = self.outstanding.as_ref().map(|w| w.deadline);
            let timer = tokio::time::sleep_until(
                deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)),
            );

            tokio::select! {
                op = self.op_rx.recv() => match op {
                    Some(Op::Request(req)) => {
                        if self.outstanding.is_some() {
                            self.queue.push_back(req);
                        } else if self.dispatch(req).await.is_err() {
                            break;
                        }
                    }
                    Some(Op::Close) | None => break,
                },
                read = self.reader.read(&mut read_buf) => match read {
                    Ok(0) => {
                        tracing::debug!("engine closed the connection");
                        break;
                    }
                    Ok(n) => {
                        if self.handle_bytes(&read_buf[..n]).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("engine read error: {}", e);
                        break;
                    }
                },
                _ = timer, if deadline.is_some() => {
                    self.expire_outstanding().await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Write a command to the wire and arm its timeout. `Err` means the
    /// socket is unusable and the actor must stop.
    async fn dispatch(&mut self, req: PendingRequest) -> std::result::Result<(), ()> {
        self.tx_counter += 1;
        let tx_id = self.tx_counter;
        let bytes = encode_command(&req.command, tx_id, &req.args, req.data.as_deref());
        tracing::trace!(command = %req.command, tx_id, "sending command");

        match self.writer.write_all(&bytes).await {
            Ok(()) => {
                self.outstanding = Some(Waiter {
                    transaction_id: tx_id,
                    command: req.command,
                    reply: req.reply,
                    deadline: Instant::now() + self.timeout,
                });
                Ok(())
            }
            Err(e) => {
                tracing::debug!(command = %req.command, "engine write error: {}", e);
                let _ = req.reply.send(Err(Error::ConnectionClosed));
                Err(())
            }
        }
    }

    async fn dispatch_next(&mut self) -> std::result::Result<(), ()> {
        while self.outstanding.is_none() {
            let Some(req) = self.queue.pop_front() else {
                return Ok(());
            };
            self.dispatch(req).await?;
        }
        Ok(())
    }

    async fn handle_bytes(&mut self, data: &[u8]) -> std::result::Result<(), ()> {
        for event in self.decoder.feed(data) {
            match event {
                FrameEvent::Payload(payload) => {
                    self.framing_errors = 0;
                    self.handle_frame(&payload).await?;
                }
                FrameEvent::Malformed(reason) => {
                    self.framing_errors += 1;
                    tracing::warn!("framing error: {}", reason);
                    let _ = self.event_tx.send(ConnectionEvent::ProtocolError(reason));
                    if self.framing_errors >= MAX_FRAMING_ERRORS {
                        tracing::warn!("too many framing errors, dropping connection");
                        return Err(());
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_frame(&mut self, payload: &str) -> std::result::Result<(), ()> {
        let root = match xml::parse_document(payload) {
            Ok(root) => root,
            Err(e) => {
                // Undecodable payload counts as a framing error: recoverable.
                self.framing_errors += 1;
                let _ = self
                    .event_tx
                    .send(ConnectionEvent::ProtocolError(e.to_string()));
                if self.framing_errors >= MAX_FRAMING_ERRORS {
                    return Err(());
                }
                return Ok(());
            }
        };

        match root.local_name() {
            "init" => {
                let init = parse::parse_init(&root);
                tracing::debug!(ide_key = %init.ide_key, file = %init.file_uri, "engine init");
                let _ = self.event_tx.send(ConnectionEvent::Init(init));
            }
            "response" => {
                let response = parse::parse_response(&root);
                self.complete_waiter(&response);
                let _ = self.event_tx.send(ConnectionEvent::Response(response));
                self.dispatch_next().await?;
            }
            "stream" => {
                let _ = self
                    .event_tx
                    .send(ConnectionEvent::Stream(parse::parse_stream(&root)));
            }
            other => {
                let _ = self.event_tx.send(ConnectionEvent::ProtocolError(format!(
                    "unexpected element <{}>",
                    other
                )));
            }
        }
        Ok(())
    }

    fn complete_waiter(&mut self, response: &Response) {
        let Some(tx_id) = response.transaction_id else {
            tracing::warn!(command = %response.command, "response without transaction id");
            return;
        };
        match self.outstanding.take() {
            Some(waiter) if waiter.transaction_id == tx_id => {
                let _ = waiter.reply.send(Ok(response.clone()));
            }
            other => {
                // Late reply to a command that already timed out, or an id
                // we never issued. Nobody is waiting; observers still get
                // the response event.
                self.outstanding = other;
                tracing::warn!(tx_id, "response matches no outstanding command");
            }
        }
    }

    async fn expire_outstanding(&mut self) {
        if let Some(waiter) = self.outstanding.take() {
            tracing::warn!(
                command = %waiter.command,
                tx_id = waiter.transaction_id,
                "command timed out after {} ms",
                self.timeout.as_millis()
            );
            let _ = waiter
                .reply
                .send(Err(Error::Timeout(self.timeout.as_millis() as u64)));
            // The timeout fails only its own waiter; queued commands proceed.
            let _ = self.dispatch_next().await;
        }
    }

    async fn shutdown(&mut self) {
        if let Some(waiter) = self.outstanding.take() {
            let _ = waiter.reply.send(Err(Error::ConnectionClosed));
        }
        while let Some(req) = self.queue.pop_front() {
            let _ = req.reply.send(Err(Error::ConnectionClosed));
        }
        // Fail requests that raced onto the channel as well.
        self.op_rx.close();
        while let Ok(op) = self.op_rx.try_recv() {
            if let Op::Request(req) = op {
                let _ = req.reply.send(Err(Error::ConnectionClosed));
            }
        }
        let _ = self.writer.shutdown().await;
        let _ = self.event_tx.send(ConnectionEvent::Closed);
    }
}
