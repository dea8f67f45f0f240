use super::{MessageResult, WorkerMessage, WorkerReply, WorkerRequest};
use crate::{
    authority::{AuthorityError, StateAuthority},
    utils::create_id,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{mpsc, oneshot, watch},
};

type PendingReplies = Arc<DashMap<String, oneshot::Sender<MessageResult>>>;

/// Worker-side handle to the authority in the supervising process.
pub struct IpcClient {
    outbound: mpsc::UnboundedSender<WorkerMessage>,
    pending: PendingReplies,
    timeout: Duration,
    closed: watch::Receiver<bool>,
}

/// Drops the reply slot of a call that gave up waiting.
struct ReplyGuard<'a> {
    pending: &'a PendingReplies,
    id: String,
}

impl Drop for ReplyGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl IpcClient {
    /// How long a worker waits for the supervisor before failing the call locally.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Talks to the supervisor over this process's stdin and stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::connect(tokio::io::stdin(), tokio::io::stdout(), Self::DEFAULT_TIMEOUT)
    }

    /// Runs the protocol over an arbitrary byte pipe.
    pub fn connect<R, W>(reader: R, writer: W, timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: PendingReplies = Arc::new(DashMap::new());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed) = watch::channel(false);

        tokio::spawn(write_loop(writer, outbound_rx));
        tokio::spawn(read_loop(reader, Arc::clone(&pending), closed_tx));

        Self { outbound, pending, timeout, closed }
    }

    /// Resolves when the supervisor side of the pipe has gone away.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|done| *done).await;
    }

    /// Replies still outstanding.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Sends one request and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Timeout`] when no reply arrives in time and
    /// [`AuthorityError::ChannelClosed`] when the pipe is gone.
    pub async fn call(&self, request: WorkerRequest) -> Result<MessageResult, AuthorityError> {
        if *self.closed.borrow() {
            return Err(AuthorityError::ChannelClosed);
        }

        let id = create_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(id.clone(), reply_tx);
        let _guard = ReplyGuard { pending: &self.pending, id: id.clone() };

        self.outbound
            .send(WorkerMessage { id, request })
            .map_err(|_| AuthorityError::ChannelClosed)?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(AuthorityError::ChannelClosed),
            Err(_) => Err(AuthorityError::Timeout(self.timeout)),
        }
    }

    async fn call_flag(&self, request: WorkerRequest) -> Result<bool, AuthorityError> {
        match self.call(request).await? {
            MessageResult::Flag(flag) => Ok(flag),
            other => Err(AuthorityError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}

async fn write_loop<W>(writer: W, mut outbound: mpsc::UnboundedReceiver<WorkerMessage>)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer;
    while let Some(message) = outbound.recv().await {
        let mut line = match serde_json::to_vec(&message) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode worker message");
                continue;
            }
        };
        line.push(b'\n');
        if writer.write_all(&line).await.is_err() || writer.flush().await.is_err() {
            tracing::warn!("supervisor pipe closed for writing");
            break;
        }
    }
}

async fn read_loop<R>(reader: R, pending: PendingReplies, closed: watch::Sender<bool>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if line.trim_ascii().is_empty() {
                    continue;
                }
                match serde_json::from_slice::<WorkerReply>(&line) {
                    Ok(reply) => match pending.remove(&reply.id) {
                        Some((_, slot)) => {
                            let _ = slot.send(reply.result);
                        }
                        None => tracing::trace!(id = %reply.id, "reply for unknown message"),
                    },
                    Err(e) => tracing::warn!(error = %e, "malformed supervisor reply"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "supervisor pipe read failed");
                break;
            }
        }
    }

    pending.clear();
    closed.send_replace(true);
}

#[async_trait]
impl StateAuthority for IpcClient {
    async fn add_count(&self, key: &str, score: u64) -> Result<bool, AuthorityError> {
        self.call_flag(WorkerRequest::AddCount { key: key.to_string(), score }).await
    }

    async fn add_session(&self, key: &str, session: &str) -> Result<bool, AuthorityError> {
        self.call_flag(WorkerRequest::AddSession {
            key: key.to_string(),
            session: session.to_string(),
        })
        .await
    }

    async fn remove_session(&self, key: &str, session: &str) -> Result<bool, AuthorityError> {
        self.call_flag(WorkerRequest::RemoveSession {
            key: key.to_string(),
            session: session.to_string(),
        })
        .await
    }

    async fn block_number(&self, chain: &str) -> Result<Option<u64>, AuthorityError> {
        match self.call(WorkerRequest::GetBlockNumber { chain: chain.to_string() }).await? {
            MessageResult::BlockNumber(block) => Ok(block),
            other => Err(AuthorityError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}
