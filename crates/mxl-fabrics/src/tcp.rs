//! The TCP provider: reliable, in-order emulation of one-sided remote
//! writes over a plain stream.
//!
//! The target binds a passive endpoint and applies write-grain frames to its
//! registered region; completions flow back on the same connection, which
//! preserves per-region ordering by construction.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use mxl_core::{Error, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::endpoint::EndpointAddress;
use crate::target::TargetShared;
use crate::wire::{self, Frame};

/// Bind the target's passive endpoint and spawn its accept loop.
pub(crate) async fn bind_target(
    endpoint: &EndpointAddress,
    shared: Arc<TargetShared>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let addr = endpoint.tcp_bind_addr()?;
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(%addr, error = %e, "failed to bind fabric endpoint");
        Error::Fabric(format!("bind {addr}: {e}"))
    })?;
    let local = listener.local_addr().map_err(Error::Io)?;
    let task = tokio::spawn(accept_loop(listener, shared));
    Ok((local, task))
}

async fn accept_loop(listener: TcpListener, shared: Arc<TargetShared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "fabric initiator connected");
                let _ = stream.set_nodelay(true);
                tokio::spawn(serve_initiator(stream, Arc::clone(&shared)));
            }
            Err(e) => {
                tracing::warn!(error = %e, "fabric accept failed");
                break;
            }
        }
    }
}

/// Apply frames from one initiator connection until it closes or errors.
async fn serve_initiator(mut stream: TcpStream, shared: Arc<TargetShared>) {
    loop {
        match wire::read_frame(&mut stream).await {
            Ok(Frame::WriteGrain {
                key,
                slot,
                header,
                payload,
            }) => match shared.apply_remote_write(key, slot, &header, &payload) {
                Ok(Some(index)) => {
                    if let Err(e) = wire::write_completion(&mut stream, slot, index).await {
                        tracing::warn!(error = %e, "failed to send completion");
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, slot, "remote write rejected");
                    break;
                }
            },
            Ok(Frame::Completion { .. }) => {
                tracing::warn!("unexpected completion frame from initiator");
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::debug!("fabric initiator disconnected");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "fabric connection error");
                break;
            }
        }
    }
}

/// Connect an initiator to a remote target endpoint.
pub(crate) async fn connect(endpoint: &EndpointAddress) -> Result<TcpStream> {
    let addr = endpoint.tcp_connect_addr()?;
    let stream = TcpStream::connect(&addr).await.map_err(|e| {
        tracing::error!(%addr, error = %e, "failed to connect to fabric target");
        Error::Fabric(format!("connect {addr}: {e}"))
    })?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}
