//! TLS termination for the webhook listener
//!
//! [`TlsListener`] wraps a TCP listener with a rustls acceptor and implements
//! [`axum::serve::Listener`], so the TLS listener is served exactly like the
//! plaintext one.

use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;
use crate::error::{Error, Result};

/// Time a peer gets to complete the TLS handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type Handshake = Option<(TlsStream<TcpStream>, SocketAddr)>;

/// TCP listener performing a TLS handshake on every accepted connection
///
/// Handshakes run in their own tasks, so a peer that stalls mid-handshake
/// never holds up the connections behind it.
pub struct TlsListener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    handshakes: JoinSet<Handshake>,
}

impl TlsListener {
    /// Wrap a bound TCP listener
    pub fn new(tcp: TcpListener, server_config: Arc<ServerConfig>) -> Self {
        Self {
            tcp,
            acceptor: TlsAcceptor::from(server_config),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            handshakes: JoinSet::new(),
        }
    }

    /// Override the handshake deadline
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

async fn handshake(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    addr: SocketAddr,
    deadline: Duration,
) -> Handshake {
    match tokio::time::timeout(deadline, acceptor.accept(stream)).await {
        Ok(Ok(tls_stream)) => Some((tls_stream, addr)),
        Ok(Err(e)) => {
            tracing::warn!(peer = %addr, error = %e, "TLS handshake failed");
            None
        }
        Err(_) => {
            tracing::warn!(peer = %addr, timeout = ?deadline, "TLS handshake timed out");
            None
        }
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    fn accept(&mut self) -> impl std::future::Future<Output = (Self::Io, Self::Addr)> + Send {
        async move {
            loop {
                tokio::select! {
                    // Inherent accept: the Listener impl of TcpListener swallows errors.
                    accepted = TcpListener::accept(&self.tcp) => match accepted {
                        Ok((stream, addr)) => {
                            self.handshakes.spawn(handshake(
                                self.acceptor.clone(),
                                stream,
                                addr,
                                self.handshake_timeout,
                            ));
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "TCP accept error");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    },
                    Some(joined) = self.handshakes.join_next() => match joined {
                        Ok(Some(connection)) => return connection,
                        Ok(None) => {}
                        Err(e) => tracing::error!(error = %e, "TLS handshake task failed"),
                    },
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.tcp.local_addr()
    }
}

/// Build a rustls [`ServerConfig`] from the configured PEM files
///
/// No client authentication; the API server authenticates the proxy, not
/// the other way around.
pub fn load_server_config(tls_config: &TlsConfig) -> Result<Arc<ServerConfig>> {
    let cert_chain = read_cert_chain(&tls_config.cert_file)?;
    let key = read_private_key(&tls_config.key_file)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(format!("unsupported protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::Tls(format!("failed to build server config: {}", e)))?;

    Ok(Arc::new(config))
}

fn open(path: &Path, what: &str) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::Tls(format!("failed to open {} '{}': {}", what, path.display(), e)))
}

fn read_cert_chain(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let mut reader = open(path, "certificate file")?;
    let chain = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("failed to parse certificates: {}", e)))?;

    if chain.is_empty() {
        return Err(Error::Tls(format!(
            "'{}' contains no certificates",
            path.display()
        )));
    }
    Ok(chain)
}

fn read_private_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let mut reader = open(path, "key file")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Tls(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| Error::Tls(format!("'{}' contains no private key", path.display())))
}
