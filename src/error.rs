use std::io;

/// Which end of a session a handshake or I/O step was talking to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    Client,
    Server,
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Peer::Client => write!(f, "client"),
            Peer::Server => write!(f, "server"),
        }
    }
}

/// Terminal error of one relay loop invocation
#[derive(Debug)]
pub enum RelayError {
    Read(Peer, io::Error),
    Write(Peer, io::Error),
    /// The pump task for this peer went away without publishing an outcome
    PumpGone(Peer),
}

impl RelayError {
    pub fn peer(&self) -> Peer {
        match self {
            RelayError::Read(peer, _) | RelayError::Write(peer, _) | RelayError::PumpGone(peer) => *peer,
        }
    }

    /// True when the peer simply closed its side of the stream
    pub fn is_eof(&self) -> bool {
        matches!(self, RelayError::Read(_, e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::Read(peer, e) => write!(f, "failed to read from {peer}: {e}"),
            RelayError::Write(peer, e) => write!(f, "failed to write to {peer}: {e}"),
            RelayError::PumpGone(peer) => write!(f, "failed to read from {peer}: reader stopped"),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Read(_, e) | RelayError::Write(_, e) => Some(e),
            RelayError::PumpGone(_) => None,
        }
    }
}

/// Why a session ended
#[derive(Debug)]
pub enum SessionError {
    Connect(io::Error),
    Plaintext(RelayError),
    Handshake(Peer, io::Error),
    Intercepted(RelayError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Connect(e) => write!(f, "failed to connect to server: {e}"),
            SessionError::Plaintext(e) => write!(f, "session terminated: {e}"),
            SessionError::Handshake(peer, e) => {
                write!(f, "TLS session terminated: TLS handshake with {peer} failed: {e}")
            }
            SessionError::Intercepted(e) => write!(f, "TLS session terminated: {e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Connect(e) | SessionError::Handshake(_, e) => Some(e),
            SessionError::Plaintext(e) | SessionError::Intercepted(e) => Some(e),
        }
    }
}

/// Failure while preparing certificate material at startup
#[derive(Debug)]
pub enum TlsSetupError {
    Io(std::path::PathBuf, io::Error),
    NoCertificates(std::path::PathBuf),
    NoPrivateKey(std::path::PathBuf),
    /// Only one of certificate and key paths was given
    IncompletePair,
    Generate(rcgen::RcgenError),
    Rustls(rustls::Error),
}

impl std::fmt::Display for TlsSetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsSetupError::Io(path, e) => write!(f, "can not read {}: {e}", path.display()),
            TlsSetupError::NoCertificates(path) => {
                write!(f, "no PEM certificates found in {}", path.display())
            }
            TlsSetupError::NoPrivateKey(path) => {
                write!(f, "no PEM private key found in {}", path.display())
            }
            TlsSetupError::IncompletePair => {
                write!(f, "certificate and key paths must be given together")
            }
            TlsSetupError::Generate(e) => write!(f, "can not generate self-signed certificate: {e}"),
            TlsSetupError::Rustls(e) => write!(f, "can not load TLS key pair: {e}"),
        }
    }
}

impl std::error::Error for TlsSetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TlsSetupError::Io(_, e) => Some(e),
            TlsSetupError::Generate(e) => Some(e),
            TlsSetupError::Rustls(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rcgen::RcgenError> for TlsSetupError {
    fn from(e: rcgen::RcgenError) -> Self {
        TlsSetupError::Generate(e)
    }
}

impl From<rustls::Error> for TlsSetupError {
    fn from(e: rustls::Error) -> Self {
        TlsSetupError::Rustls(e)
    }
}
