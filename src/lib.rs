//! Transparent TCP relay that follows an in-band STARTTLS upgrade and
//! re-terminates both legs of the upgraded session, so the traffic after the
//! upgrade is logged in cleartext.

pub mod cli;
pub mod config;
pub mod error;
pub mod listener;
pub mod pump;
pub mod relay;
pub mod session;
pub mod stats;
pub mod tls;
pub mod transcript;

#[cfg(test)]
mod session_tests;

pub use config::{ProxyConfig, Substitution};
pub use error::{Peer, RelayError, SessionError, TlsSetupError};
pub use listener::Listener;
pub use relay::{relay, Phase, RelayContext};
pub use session::Session;
pub use tls::{Interceptor, TlsIdentity};
pub use transcript::Transcript;
