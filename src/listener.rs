use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;

use crate::config::ProxyConfig;
use crate::relay::RelayContext;
use crate::session::Session;
use crate::stats::RelayStats;
use crate::tls::Interceptor;
use crate::transcript::{Event, Transcript};

const LISTEN_BACKLOG: i32 = 1024;

/// Accepts client connections and runs one [`Session`] task per connection
pub struct Listener {
    listener: TcpListener,
    config: Arc<ProxyConfig>,
    interceptor: Interceptor,
    transcript: Transcript,
    stats: Arc<RelayStats>,
}

impl Listener {
    /// Bind the listen socket; must be called from within a tokio runtime
    pub fn bind(
        addr: SocketAddr,
        config: Arc<ProxyConfig>,
        interceptor: Interceptor,
        transcript: Transcript,
    ) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        let listener = TcpListener::from_std(socket.into())?;

        Ok(Self {
            listener,
            config,
            interceptor,
            transcript,
            stats: RelayStats::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Accept forever. Only an accept failure ends this; session failures are
    /// logged and contained in their own task.
    pub async fn serve(self) -> io::Result<()> {
        tracing::info!(listen = %self.local_addr()?, upstream = %self.config.upstream, "relay listening");
        let mut next_id: u64 = 1;

        loop {
            let (client, peer) = self.listener.accept().await?;
            let id = next_id;
            next_id += 1;
            tracing::info!(session = id, %peer, "accepted client");
            if let Err(e) = client.set_nodelay(true) {
                tracing::debug!(session = id, error = %e, "could not disable Nagle on client");
            }

            let ctx = RelayContext::new(id, Arc::clone(&self.config), self.transcript.clone(), self.stats());
            let session = Session::new(ctx, self.interceptor.clone());
            let transcript = self.transcript.clone();
            let stats = self.stats();
            stats.session_started();

            tokio::spawn(async move {
                let _closed = scopeguard::guard(stats, |stats| {
                    stats.session_closed();
                    stats.log_stats();
                });
                match session.run(client).await {
                    Ok(()) => transcript.record(session.id(), Event::Closed),
                    Err(e) => {
                        tracing::debug!(session = session.id(), error = %e, "session ended");
                        transcript.record(session.id(), Event::Terminated(&e));
                    }
                }
            });
        }
    }
}
