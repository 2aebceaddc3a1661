use tokio::sync::{mpsc, oneshot};
use vfs_proto::{Errno, VfsResult};

/// Inline reply to one request: a status word plus up to three argument words.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply {
    pub status: u32,
    pub args: [u64; 3],
}

impl Reply {
    pub fn ok(args: [u64; 3]) -> Self {
        Reply { status: 0, args }
    }

    pub fn err(errno: Errno) -> Self {
        Reply {
            status: errno.code(),
            args: [0; 3],
        }
    }

    pub fn from_result(result: VfsResult<[u64; 3]>) -> Self {
        match result {
            Ok(args) => Reply::ok(args),
            Err(errno) => Reply::err(errno),
        }
    }

    /// Interpret the status word; unknown nonzero codes surface as I/O.
    pub fn result(&self) -> VfsResult<[u64; 3]> {
        if self.status == 0 {
            Ok(self.args)
        } else {
            Err(Errno::from_code(self.status).unwrap_or(Errno::Io))
        }
    }
}

enum Frame {
    Call {
        method: u32,
        args: [u64; 4],
        cloned: Option<Endpoint>,
        reply: oneshot::Sender<Reply>,
    },
    DataWrite {
        data: Vec<u8>,
        ack: oneshot::Sender<u32>,
    },
    DataRead {
        max: usize,
        fulfil: oneshot::Sender<(u32, Vec<u8>)>,
    },
}

/// Create one connection. Frames flow ordered from the endpoint to the
/// listener; the channel is bounded so senders suspend under backpressure.
pub fn channel(depth: usize) -> (Endpoint, Listener) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (Endpoint { tx }, Listener { rx })
}

/// Sending half of a connection.
#[derive(Clone)]
pub struct Endpoint {
    tx: mpsc::Sender<Frame>,
}

/// A sent request whose reply has not been awaited yet.
pub struct PendingReply {
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    /// Wait for the peer's reply. A torn-down peer surfaces as I/O.
    pub async fn wait(self) -> VfsResult<Reply> {
        self.rx.await.map_err(|_| Errno::Io)
    }
}

impl Endpoint {
    async fn push(&self, frame: Frame) -> VfsResult<()> {
        self.tx.send(frame).await.map_err(|_| Errno::Io)
    }

    /// Send a request without waiting for the reply.
    pub async fn send(&self, method: u32, args: [u64; 4]) -> VfsResult<PendingReply> {
        self.send_with_clone(method, args, None).await
    }

    /// Send a request carrying a cloned connection to a third party.
    pub async fn send_with_clone(
        &self,
        method: u32,
        args: [u64; 4],
        cloned: Option<Endpoint>,
    ) -> VfsResult<PendingReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.push(Frame::Call {
            method,
            args,
            cloned,
            reply: reply_tx,
        })
        .await?;
        Ok(PendingReply { rx: reply_rx })
    }

    /// Request/reply round trip with no data phase.
    pub async fn call(&self, method: u32, args: [u64; 4]) -> VfsResult<Reply> {
        self.send(method, args).await?.wait().await
    }

    /// One outgoing bulk-data phase. Resolves once the peer accepted it.
    pub async fn data_write(&self, data: Vec<u8>) -> VfsResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.push(Frame::DataWrite { data, ack: ack_tx }).await?;
        match ack_rx.await.map_err(|_| Errno::Io)? {
            0 => Ok(()),
            code => Err(Errno::from_code(code).unwrap_or(Errno::Io)),
        }
    }

    /// One incoming bulk-data phase of at most `max` bytes.
    pub async fn data_read(&self, max: usize) -> VfsResult<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.push(Frame::DataRead { max, fulfil: tx }).await?;
        let (status, data) = rx.await.map_err(|_| Errno::Io)?;
        match status {
            0 => Ok(data),
            code => Err(Errno::from_code(code).unwrap_or(Errno::Io)),
        }
    }

    /// Request followed by one data-write phase; the reply is awaited last.
    ///
    /// If the peer aborts the conversation before accepting the payload, the
    /// reply's status wins over the data-phase failure so callers see the
    /// peer's actual verdict.
    pub async fn call_with_data(
        &self,
        method: u32,
        args: [u64; 4],
        data: Vec<u8>,
    ) -> VfsResult<Reply> {
        let pending = self.send(method, args).await?;
        match self.data_write(data).await {
            Ok(()) => pending.wait().await,
            Err(errno) => match pending.wait().await {
                Ok(reply) if reply.status != 0 => Ok(reply),
                _ => Err(errno),
            },
        }
    }

    /// Request followed by one data-read phase; the reply is awaited last.
    pub async fn call_read(
        &self,
        method: u32,
        args: [u64; 4],
        max: usize,
    ) -> VfsResult<(Reply, Vec<u8>)> {
        let pending = self.send(method, args).await?;
        match self.data_read(max).await {
            Ok(data) => Ok((pending.wait().await?, data)),
            Err(errno) => match pending.wait().await {
                Ok(reply) if reply.status != 0 => Ok((reply, Vec::new())),
                _ => Err(errno),
            },
        }
    }
}

/// An incoming request with its reply slot.
pub struct Call {
    method: u32,
    args: [u64; 4],
    cloned: Option<Endpoint>,
    reply: oneshot::Sender<Reply>,
}

impl Call {
    pub fn method(&self) -> u32 {
        self.method
    }

    pub fn args(&self) -> [u64; 4] {
        self.args
    }

    pub fn take_cloned(&mut self) -> Option<Endpoint> {
        self.cloned.take()
    }

    pub fn answer(self, reply: Reply) {
        // A vanished caller is not an error for the answering side.
        let _ = self.reply.send(reply);
    }

    pub fn answer_ok(self, args: [u64; 3]) {
        self.answer(Reply::ok(args));
    }

    pub fn answer_err(self, errno: Errno) {
        self.answer(Reply::err(errno));
    }
}

/// An incoming data-read phase: the peer wants at most `max` bytes.
pub struct ReadRequest {
    max: usize,
    fulfil: oneshot::Sender<(u32, Vec<u8>)>,
}

impl ReadRequest {
    pub fn max(&self) -> usize {
        self.max
    }

    pub fn fulfil(self, mut data: Vec<u8>) {
        data.truncate(self.max);
        let _ = self.fulfil.send((0, data));
    }

    pub fn deny(self, errno: Errno) {
        let _ = self.fulfil.send((errno.code(), Vec::new()));
    }
}

/// Receiving half of a connection.
pub struct Listener {
    rx: mpsc::Receiver<Frame>,
}

impl Listener {
    /// Next request on the connection, or `None` once every endpoint is gone.
    ///
    /// Stray data phases left over from an aborted conversation are drained
    /// and refused here, so a new request always starts clean.
    pub async fn accept(&mut self) -> Option<Call> {
        loop {
            match self.rx.recv().await? {
                Frame::Call {
                    method,
                    args,
                    cloned,
                    reply,
                } => {
                    return Some(Call {
                        method,
                        args,
                        cloned,
                        reply,
                    })
                }
                Frame::DataWrite { ack, .. } => {
                    let _ = ack.send(Errno::Invalid.code());
                }
                Frame::DataRead { fulfil, .. } => {
                    let _ = fulfil.send((Errno::Invalid.code(), Vec::new()));
                }
            }
        }
    }

    /// Like [`accept`](Self::accept) but inside a conversation, where the
    /// peer hanging up is a protocol error.
    pub async fn next_call(&mut self) -> VfsResult<Call> {
        self.accept().await.ok_or(Errno::Io)
    }

    /// Accept one data-write phase, refusing payloads longer than `max`
    /// (`max == 0` means unbounded).
    pub async fn accept_data_write(&mut self, max: usize) -> VfsResult<Vec<u8>> {
        match self.rx.recv().await.ok_or(Errno::Io)? {
            Frame::DataWrite { data, ack } => {
                if max != 0 && data.len() > max {
                    let _ = ack.send(Errno::Overflow.code());
                    return Err(Errno::Overflow);
                }
                let _ = ack.send(0);
                Ok(data)
            }
            Frame::Call { reply, .. } => {
                let _ = reply.send(Reply::err(Errno::Invalid));
                Err(Errno::Invalid)
            }
            Frame::DataRead { fulfil, .. } => {
                let _ = fulfil.send((Errno::Invalid.code(), Vec::new()));
                Err(Errno::Invalid)
            }
        }
    }

    /// Accept one data-read phase.
    pub async fn accept_data_read(&mut self) -> VfsResult<ReadRequest> {
        match self.rx.recv().await.ok_or(Errno::Io)? {
            Frame::DataRead { max, fulfil } => Ok(ReadRequest { max, fulfil }),
            Frame::Call { reply, .. } => {
                let _ = reply.send(Reply::err(Errno::Invalid));
                Err(Errno::Invalid)
            }
            Frame::DataWrite { ack, .. } => {
                let _ = ack.send(Errno::Invalid.code());
                Err(Errno::Invalid)
            }
        }
    }
}
