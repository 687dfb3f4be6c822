use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{Peer, SessionError};
use crate::relay::{relay, Phase, RelayContext};
use crate::tls::Interceptor;
use crate::transcript::Event;

/// Supervises one accepted client connection through both relay phases
pub struct Session {
    ctx: RelayContext,
    interceptor: Interceptor,
}

impl Session {
    pub fn new(ctx: RelayContext, interceptor: Interceptor) -> Self {
        Self { ctx, interceptor }
    }

    pub fn id(&self) -> u64 {
        self.ctx.id
    }

    /// Dial the upstream and relay until the session ends
    pub async fn run<C>(&self, client: C) -> Result<(), SessionError>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let server = TcpStream::connect(self.ctx.config.upstream.as_str())
            .await
            .map_err(|e| {
                tracing::warn!(session = self.ctx.id, upstream = %self.ctx.config.upstream, error = %e, "upstream dial failed");
                SessionError::Connect(e)
            })?;
        if let Err(e) = server.set_nodelay(true) {
            tracing::debug!(session = self.ctx.id, error = %e, "could not disable Nagle on upstream");
        }
        self.intercept(client, server).await
    }

    /// Both phases over already-open streams: plaintext until the server
    /// agrees to STARTTLS, then cleartext over locally terminated TLS.
    pub async fn intercept<C, S>(&self, client: C, server: S) -> Result<(), SessionError>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ctx = &self.ctx;
        let (client, server) = relay(client, server, ctx, Phase::Plaintext)
            .await
            .map_err(SessionError::Plaintext)?;

        ctx.transcript.record(ctx.id, Event::Eavesdropping);
        ctx.stats.session_intercepted();

        let host = ctx.config.upstream_host();
        // The first failed handshake ends the session without waiting on the other leg
        let (client, server) = tokio::try_join!(
            async {
                self.interceptor
                    .accept_client(client)
                    .await
                    .map_err(|e| SessionError::Handshake(Peer::Client, e))
            },
            async {
                self.interceptor
                    .connect_server(host, server)
                    .await
                    .map_err(|e| SessionError::Handshake(Peer::Server, e))
            },
        )?;
        tracing::debug!(session = ctx.id, sni = host, "TLS established on both legs");

        relay(client, server, ctx, Phase::Intercepted)
            .await
            .map_err(SessionError::Intercepted)?;
        Ok(())
    }
}
