//! Rendezvous server for grading containers.
//!
//! Every grading container runs at a static address and dials back to a
//! single TCP listener. The scheduler registers interest in an address
//! before launching the container; the first connection from that address
//! is handed to the waiter. Connections from unregistered addresses are
//! closed.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rendezvous server already started")]
    AlreadyStarted,

    #[error("Another job registered address {0}")]
    Superseded(IpAddr),

    #[error("Connection closed before a message arrived")]
    Closed,

    #[error("Container sent invalid UTF-8")]
    InvalidUtf8,

    #[error("Message exceeds {0} bytes")]
    TooLarge(usize),

    #[error("Failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("Failed to decode message: {0}")]
    Decode(serde_json::Error),
}

/// Upper bound on a single message read from a container.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

type Waiter = oneshot::Sender<Result<ContainerChannel, RendezvousError>>;
type Waiters = Arc<Mutex<HashMap<IpAddr, Waiter>>>;

/// A connection from a grading container carrying one JSON document each way.
#[derive(Debug)]
pub struct ContainerChannel {
    stream: BufReader<TcpStream>,
    peer: SocketAddr,
}

impl ContainerChannel {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write one JSON document followed by a newline.
    pub async fn send_json<T: Serialize>(&mut self, value: &T) -> Result<(), RendezvousError> {
        let mut bytes = serde_json::to_vec(value).map_err(RendezvousError::Encode)?;
        bytes.push(b'\n');
        let stream = self.stream.get_mut();
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Read one JSON document. The document may span several lines; reading
    /// stops once it is complete or the peer closes its side.
    pub async fn recv_json<T: DeserializeOwned>(&mut self) -> Result<T, RendezvousError> {
        let mut buf = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];

        loop {
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                if buf.iter().all(u8::is_ascii_whitespace) {
                    return Err(RendezvousError::Closed);
                }
                return serde_json::from_slice(&buf).map_err(RendezvousError::Decode);
            }
            buf.extend_from_slice(&chunk[..n]);

            // A truncated multi-byte sequence at the end may still complete.
            if let Err(e) = std::str::from_utf8(&buf) {
                if e.error_len().is_some() {
                    return Err(RendezvousError::InvalidUtf8);
                }
            }

            match serde_json::Deserializer::from_slice(&buf)
                .into_iter::<T>()
                .next()
            {
                Some(Ok(value)) => return Ok(value),
                Some(Err(e)) if !e.is_eof() => return Err(RendezvousError::Decode(e)),
                _ => {}
            }

            if buf.len() > MAX_MESSAGE_BYTES {
                return Err(RendezvousError::TooLarge(MAX_MESSAGE_BYTES));
            }
        }
    }
}

/// Resolves to the first connection from a registered address.
///
/// Resolves to `Closed` if the registration is forgotten or the server stops.
pub struct PendingSocket {
    address: IpAddr,
    rx: oneshot::Receiver<Result<ContainerChannel, RendezvousError>>,
}

impl PendingSocket {
    pub fn address(&self) -> IpAddr {
        self.address
    }
}

impl Future for PendingSocket {
    type Output = Result<ContainerChannel, RendezvousError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RendezvousError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct RendezvousServer {
    bind: SocketAddr,
    waiters: Waiters,
    local_addr: Mutex<Option<SocketAddr>>,
    cancel: CancellationToken,
}

impl RendezvousServer {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            waiters: Arc::new(Mutex::new(HashMap::new())),
            local_addr: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Bind the listener and start accepting in the background.
    /// Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, RendezvousError> {
        if self.local_addr().is_some() {
            return Err(RendezvousError::AlreadyStarted);
        }

        let listener = TcpListener::bind(self.bind).await?;
        let local = listener.local_addr()?;
        {
            let mut slot = self
                .local_addr
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if slot.is_some() {
                return Err(RendezvousError::AlreadyStarted);
            }
            *slot = Some(local);
        }

        info!(address = %local, "Rendezvous server listening");
        tokio::spawn(accept_loop(
            listener,
            self.waiters.clone(),
            self.cancel.clone(),
        ));
        Ok(local)
    }

    /// Stop accepting. Pending registrations resolve to `Closed`.
    pub fn stop(&self) {
        self.cancel.cancel();
        lock(&self.waiters).clear();
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .local_addr
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register interest in the next connection from `address`.
    ///
    /// Must be called before the container is launched. A second
    /// registration for the same address supersedes the first.
    pub fn get_socket(&self, address: IpAddr) -> PendingSocket {
        let address = address.to_canonical();
        let (tx, rx) = oneshot::channel();
        if let Some(previous) = lock(&self.waiters).insert(address, tx) {
            warn!(address = %address, "Address registered twice; superseding earlier waiter");
            let _ = previous.send(Err(RendezvousError::Superseded(address)));
        }
        PendingSocket { address, rx }
    }

    /// Drop the registration for `address`, if any.
    pub fn forget(&self, address: IpAddr) {
        lock(&self.waiters).remove(&address.to_canonical());
    }

    /// Addresses currently awaiting a connection.
    pub fn waiting(&self) -> Vec<IpAddr> {
        let mut addresses: Vec<IpAddr> = lock(&self.waiters).keys().copied().collect();
        addresses.sort();
        addresses
    }
}

impl Drop for RendezvousServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock(waiters: &Waiters) -> std::sync::MutexGuard<'_, HashMap<IpAddr, Waiter>> {
    waiters
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn accept_loop(listener: TcpListener, waiters: Waiters, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Rendezvous server stopped");
                return;
            }
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Rendezvous accept failed");
                continue;
            }
        };

        let address = peer.ip().to_canonical();
        let waiter = lock(&waiters).remove(&address);
        match waiter {
            Some(tx) => {
                debug!(peer = %peer, "Container connected");
                if tx.send(Ok(ContainerChannel::new(stream, peer))).is_err() {
                    debug!(peer = %peer, "Waiter gone; dropping connection");
                }
            }
            None => {
                warn!(peer = %peer, "Connection from unregistered address; closing");
                drop(stream);
            }
        }
    }
}
