use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Reference read buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 4000;

/// Result of a single read performed by a [`ReaderPump`].
///
/// The pump's buffer travels inside the outcome and must be handed back with
/// [`ReaderPump::resume`] before the pump reads again, so the bytes returned by
/// [`ReadOutcome::data`] stay valid for exactly as long as the consumer holds
/// the outcome.
#[derive(Debug)]
pub struct ReadOutcome {
    n: usize,
    error: Option<io::Error>,
    buf: Vec<u8>,
}

impl ReadOutcome {
    fn from_read(read: io::Result<usize>, buf: Vec<u8>) -> Self {
        match read {
            Ok(0) => Self {
                n: 0,
                error: Some(io::Error::new(io::ErrorKind::UnexpectedEof, "EOF")),
                buf,
            },
            Ok(n) => Self { n, error: None, buf },
            Err(e) => Self { n: 0, error: Some(e), buf },
        }
    }

    /// Number of valid bytes at the front of the buffer
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// The valid slice; anything past it is stale
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.n]
    }

    pub fn error(&self) -> Option<&io::Error> {
        self.error.as_ref()
    }

    /// Take the read error out, leaving the outcome error-free
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }
}

enum Continuation {
    Read(Vec<u8>),
    Stop,
}

/// Request/response wrapper around one direction of a byte stream.
///
/// The pump task performs one read, publishes a [`ReadOutcome`] and then parks
/// until the consumer either resumes it with the buffer or stops it. There is
/// never more than one outstanding read per pump.
pub struct ReaderPump<R> {
    outcomes: mpsc::Receiver<ReadOutcome>,
    next: mpsc::Sender<Continuation>,
    task: Option<JoinHandle<R>>,
}

impl<R> ReaderPump<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn start(reader: R) -> Self {
        Self::with_capacity(reader, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(reader: R, buffer_size: usize) -> Self {
        let (outcome_tx, outcomes) = mpsc::channel(1);
        let (next, next_rx) = mpsc::channel(1);
        let task = tokio::spawn(pump(reader, vec![0u8; buffer_size.max(1)], outcome_tx, next_rx));

        Self {
            outcomes,
            next,
            task: Some(task),
        }
    }

    /// Wait for the next outcome. `None` once the pump task has ended.
    ///
    /// Cancel-safe, so it can sit in a `tokio::select!` arm.
    pub async fn outcome(&mut self) -> Option<ReadOutcome> {
        self.outcomes.recv().await
    }

    /// Hand the buffer back and let the pump issue its next read
    pub async fn resume(&self, outcome: ReadOutcome) -> bool {
        self.next.send(Continuation::Read(outcome.buf)).await.is_ok()
    }

    /// Stop the pump permanently; no further outcomes will be published.
    /// A read that is still in flight is abandoned.
    pub async fn stop(&self) {
        let _ = self.next.send(Continuation::Stop).await;
    }

    /// Stop the pump and take the reader back
    pub async fn finish(mut self) -> io::Result<R> {
        self.stop().await;
        let task = match self.task.take() {
            Some(task) => task,
            None => return Err(io::Error::new(io::ErrorKind::Other, "reader pump already finished")),
        };
        task.await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("reader pump failed: {e}")))
    }
}

impl<R> Drop for ReaderPump<R> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn pump<R>(
    mut reader: R,
    mut buf: Vec<u8>,
    outcomes: mpsc::Sender<ReadOutcome>,
    mut next: mpsc::Receiver<Continuation>,
) -> R
where
    R: AsyncRead + Unpin,
{
    loop {
        let read = tokio::select! {
            biased;
            // Only a stop (or a vanished consumer) can arrive while a read is pending
            _ = next.recv() => return reader,
            read = reader.read(&mut buf) => read,
        };

        if outcomes.send(ReadOutcome::from_read(read, buf)).await.is_err() {
            return reader;
        }

        match next.recv().await {
            Some(Continuation::Read(returned)) => buf = returned,
            Some(Continuation::Stop) | None => return reader,
        }
    }
}
