use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, PrivateKey, ServerConfig, ServerName};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};

use crate::error::TlsSetupError;

/// Certificate chain and key presented to intercepted clients
#[derive(Clone)]
pub struct TlsIdentity {
    certs: Vec<Certificate>,
    key: PrivateKey,
}

impl TlsIdentity {
    /// Load the pair from PEM files, or generate a localhost certificate when
    /// neither path is given
    pub fn from_paths(cert_path: Option<&Path>, key_path: Option<&Path>) -> Result<Self, TlsSetupError> {
        match (cert_path, key_path) {
            (Some(cert), Some(key)) => Self::load(cert, key),
            (None, None) => Self::self_signed(),
            _ => Err(TlsSetupError::IncompletePair),
        }
    }

    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, TlsSetupError> {
        let certs = read_certs(cert_path)?;
        let key = read_key(key_path)?;
        Ok(Self { certs, key })
    }

    /// Fresh self-signed certificate for `localhost`
    pub fn self_signed() -> Result<Self, TlsSetupError> {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
        Ok(Self {
            certs: vec![Certificate(generated.serialize_der()?)],
            key: PrivateKey(generated.serialize_private_key_der()),
        })
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certs
    }
}

fn open(path: &Path) -> Result<BufReader<File>, TlsSetupError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| TlsSetupError::Io(path.to_path_buf(), e))
}

fn read_certs(path: &Path) -> Result<Vec<Certificate>, TlsSetupError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader).map_err(|e| TlsSetupError::Io(path.to_path_buf(), e))?;
    if certs.is_empty() {
        return Err(TlsSetupError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn read_key(path: &Path) -> Result<PrivateKey, TlsSetupError> {
    let mut reader = open(path)?;
    loop {
        let item = rustls_pemfile::read_one(&mut reader).map_err(|e| TlsSetupError::Io(path.to_path_buf(), e))?;
        match item {
            Some(rustls_pemfile::Item::PKCS8Key(key))
            | Some(rustls_pemfile::Item::RSAKey(key))
            | Some(rustls_pemfile::Item::ECKey(key)) => return Ok(PrivateKey(key)),
            Some(_) => continue,
            None => return Err(TlsSetupError::NoPrivateKey(path.to_path_buf())),
        }
    }
}

/// Trusts whatever certificate the upstream presents. The proxy is the one
/// vouching for the session toward the real client, so the upstream identity
/// is not checked.
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Both halves of a TLS re-termination: server toward the client, client
/// toward the upstream
#[derive(Clone)]
pub struct Interceptor {
    acceptor: TlsAcceptor,
    connector: TlsConnector,
}

impl Interceptor {
    pub fn new(identity: &TlsIdentity) -> Result<Self, TlsSetupError> {
        let server_config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(identity.certs.clone(), identity.key.clone())?;

        let client_config = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth();

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(server_config)),
            connector: TlsConnector::from(Arc::new(client_config)),
        })
    }

    /// Terminate the client's TLS on an already-open stream
    pub async fn accept_client<IO>(&self, stream: IO) -> io::Result<server::TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        self.acceptor.accept(stream).await
    }

    /// Start TLS toward the upstream on an already-open stream
    pub async fn connect_server<IO>(&self, host: &str, stream: IO) -> io::Result<client::TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        self.connector.connect(server_name(host)?, stream).await
    }
}

/// SNI for the upstream; anything rustls can't use becomes `localhost`
pub fn server_name(host: &str) -> io::Result<ServerName> {
    ServerName::try_from(host)
        .or_else(|_| ServerName::try_from("localhost"))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}
