use std::borrow::Cow;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::config::{contains, ProxyConfig};
use crate::error::{Peer, RelayError};
use crate::pump::ReaderPump;
use crate::stats::RelayStats;
use crate::transcript::{Event, Transcript};

/// Client asks to upgrade the stream
pub const CLIENT_TLS_MARKER: &[u8] = b"<starttls";
/// Server agrees to the upgrade
pub const SERVER_TLS_MARKER: &[u8] = b"<proceed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Raw relay, watching for the STARTTLS exchange
    Plaintext,
    /// Relay over locally terminated TLS; markers are ignored
    Intercepted,
}

/// Per-session state shared by both relay phases
#[derive(Clone)]
pub struct RelayContext {
    pub id: u64,
    pub config: Arc<ProxyConfig>,
    pub transcript: Transcript,
    pub stats: Arc<RelayStats>,
}

impl RelayContext {
    pub fn new(id: u64, config: Arc<ProxyConfig>, transcript: Transcript, stats: Arc<RelayStats>) -> Self {
        Self { id, config, transcript, stats }
    }
}

async fn forward<W>(writer: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(data).await?;
    writer.flush().await
}

/// Relay between `client` and `server` until an I/O error, or in the plaintext
/// phase until the server agrees to STARTTLS.
///
/// On that agreement both streams are handed back intact so they can be
/// wrapped in TLS. Bytes the client sent after its own STARTTLS request stay
/// unread in the client stream.
pub async fn relay<C, S>(client: C, server: S, ctx: &RelayContext, phase: Phase) -> Result<(C, S), RelayError>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (client_read, mut client_write) = tokio::io::split(client);
    let (server_read, mut server_write) = tokio::io::split(server);
    let mut client_pump = ReaderPump::with_capacity(client_read, ctx.config.buffer_size);
    let mut server_pump = ReaderPump::with_capacity(server_read, ctx.config.buffer_size);

    let detect = phase == Phase::Plaintext;
    let substitution = ctx.config.substitution.as_ref();
    let mut client_open = true;

    loop {
        tokio::select! {
            outcome = client_pump.outcome(), if client_open => {
                let mut outcome = outcome.ok_or(RelayError::PumpGone(Peer::Client))?;
                if let Some(e) = outcome.take_error() {
                    return Err(RelayError::Read(Peer::Client, e));
                }

                let upgrade = {
                    let data = match substitution {
                        Some(sub) => Cow::Owned(sub.to_server(outcome.data())),
                        None => Cow::Borrowed(outcome.data()),
                    };
                    ctx.transcript.record(ctx.id, Event::Payload { from: Peer::Client, data: &data });

                    forward(&mut server_write, &data)
                        .await
                        .map_err(|e| RelayError::Write(Peer::Server, e))?;
                    ctx.stats.relayed(Peer::Server, data.len());
                    detect && contains(&data, CLIENT_TLS_MARKER)
                };

                if upgrade {
                    ctx.transcript.record(ctx.id, Event::ClientGoesTls);
                    tracing::debug!(session = ctx.id, "client requested STARTTLS, pausing client reads");
                    client_pump.stop().await;
                    client_open = false;
                    continue;
                }

                if !client_pump.resume(outcome).await {
                    return Err(RelayError::PumpGone(Peer::Client));
                }
            }

            outcome = server_pump.outcome() => {
                let mut outcome = outcome.ok_or(RelayError::PumpGone(Peer::Server))?;
                if let Some(e) = outcome.take_error() {
                    return Err(RelayError::Read(Peer::Server, e));
                }

                // Server output is logged as it came off the wire
                ctx.transcript.record(ctx.id, Event::Payload { from: Peer::Server, data: outcome.data() });
                let agreed = detect && contains(outcome.data(), SERVER_TLS_MARKER);

                {
                    let data = match substitution {
                        Some(sub) => Cow::Owned(sub.to_client(outcome.data())),
                        None => Cow::Borrowed(outcome.data()),
                    };
                    forward(&mut client_write, &data)
                        .await
                        .map_err(|e| RelayError::Write(Peer::Client, e))?;
                    ctx.stats.relayed(Peer::Client, data.len());
                }

                if agreed {
                    ctx.transcript.record(ctx.id, Event::ServerGoesTls);
                    if client_open {
                        tracing::debug!(session = ctx.id, "server proceeded before client asked for STARTTLS");
                    }
                    let server_read = server_pump
                        .finish()
                        .await
                        .map_err(|e| RelayError::Read(Peer::Server, e))?;
                    let client_read = client_pump
                        .finish()
                        .await
                        .map_err(|e| RelayError::Read(Peer::Client, e))?;
                    return Ok((client_read.unsplit(client_write), server_read.unsplit(server_write)));
                }

                if !server_pump.resume(outcome).await {
                    return Err(RelayError::PumpGone(Peer::Server));
                }
            }
        }
    }
}
