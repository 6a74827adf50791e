//! TLS listener and per-connection line loop.
//!
//! Connections are fully independent: each gets its own task and its own
//! read loop over the shared dispatcher. Requests on one connection are
//! answered strictly in order; a failed handshake or read only ends that
//! connection.

use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::protocol::Dispatcher;

/// Load the PEM certificate chain and private key into a TLS acceptor.
pub fn build_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let mut cert_reader = StdBufReader::new(
        File::open(cert_path)
            .with_context(|| format!("failed to open certificate {}", cert_path.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::io::Result<Vec<_>>>()
        .context("failed to parse certificate chain")?;

    let mut key_reader = StdBufReader::new(
        File::open(key_path)
            .with_context(|| format!("failed to open private key {}", key_path.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut key_reader)
        .context("failed to parse private key")?
        .ok_or_else(|| anyhow!("no private key found in {}", key_path.display()))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid certificate/key pair")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Accept loop. Binding failures are fatal; everything after that is
/// per-connection and only logged.
pub async fn run(listen: &str, acceptor: TlsAcceptor, dispatcher: Arc<Dispatcher>) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    log::info!("[SERVER] listening on {}", listen);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                log::warn!("[SERVER] accept failed: {}", err);
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            log::debug!("[SERVER] connection from {}", peer);
            let tls_stream = match acceptor.accept(stream).await {
                Ok(tls_stream) => tls_stream,
                Err(err) => {
                    log::warn!("[SERVER] handshake with {} failed: {}", peer, err);
                    return;
                }
            };
            if let Err(err) = handle_connection(tls_stream, dispatcher).await {
                log::warn!("[SERVER] connection {} ended: {}", peer, err);
            }
            log::debug!("[SERVER] connection {} closed", peer);
        });
    }
}

/// Read newline-framed messages and answer each before reading the next.
async fn handle_connection<S>(stream: S, dispatcher: Arc<Dispatcher>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .context("failed to read request line")?;
        if read == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let mut reply = dispatcher.handle_message(line.trim()).await;
        reply.push('\n');
        write_half
            .write_all(reply.as_bytes())
            .await
            .context("failed to write response")?;
    }
}
