//! Per-role connection handle with best-effort send.
//!
//! Each role holds at most one active peer. The write half of the
//! current connection lives here; the read half is owned exclusively
//! by that connection's worker task. Liveness is derived from whether
//! a write half is present, never tracked separately.

use log::{debug, warn};
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// The four peers the relay bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Robot,
    Console,
    Vision,
    Video,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Robot => "robot",
            Role::Console => "console",
            Role::Vision => "vision",
            Role::Video => "video",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    generation: u64,
    writer: Option<OwnedWriteHalf>,
}

/// Shared handle to one role's active connection.
#[derive(Clone)]
pub struct Channel {
    role: Role,
    inner: Arc<Mutex<Inner>>,
}

impl Channel {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                writer: None,
            })),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Install a new connection's write half, superseding any previous
    /// one (last writer wins; dropping the old half closes our write
    /// direction). Returns a generation token the worker hands back on
    /// exit so a stale worker cannot detach its successor.
    pub async fn attach(&self, writer: OwnedWriteHalf) -> u64 {
        let mut inner = self.inner.lock().await;
        if inner.writer.is_some() {
            warn!("{}: previous connection exists, superseding it", self.role);
        }
        inner.generation += 1;
        inner.writer = Some(writer);
        inner.generation
    }

    /// Clear the handle, but only if it still belongs to the caller's
    /// connection.
    pub async fn detach(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.generation == generation {
            inner.writer = None;
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.writer.is_some()
    }

    /// Best-effort newline-delimited send. Absent peer: silently
    /// dropped. Write failure: logged, handle cleared, never raised —
    /// callers are publishers, not guaranteed-delivery producers.
    pub async fn send_line(&self, line: &str) {
        let mut inner = self.inner.lock().await;
        let Some(writer) = inner.writer.as_mut() else {
            debug!("{}: no peer connected, dropping message", self.role);
            return;
        };

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        if let Err(e) = writer.write_all(&buf).await {
            warn!("{}: send failed: {}", self.role, e);
            inner.writer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_send_without_peer_is_noop() {
        let channel = Channel::new(Role::Console);
        assert!(!channel.is_connected().await);
        // Must not panic or error
        channel.send_line("{\"type\":\"SENSOR\"}").await;
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (server, mut client) = tcp_pair().await;
        let channel = Channel::new(Role::Console);
        let (_read, write) = server.into_split();
        channel.attach(write).await;
        assert!(channel.is_connected().await);

        channel.send_line("hello").await;

        let mut buf = vec![0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello\n");
    }

    #[tokio::test]
    async fn test_stale_worker_cannot_detach_successor() {
        let (server1, _client1) = tcp_pair().await;
        let (server2, mut client2) = tcp_pair().await;
        let channel = Channel::new(Role::Robot);

        let gen1 = channel.attach(server1.into_split().1).await;
        let gen2 = channel.attach(server2.into_split().1).await;
        assert_ne!(gen1, gen2);

        // The superseded worker exits late and tries to detach
        channel.detach(gen1).await;
        assert!(channel.is_connected().await);

        channel.send_line("still here").await;
        let mut buf = vec![0u8; 16];
        let n = client2.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"still here\n");

        // The owning worker's detach does clear it
        channel.detach(gen2).await;
        assert!(!channel.is_connected().await);
    }

    #[tokio::test]
    async fn test_attach_closes_previous_write_direction() {
        let (server1, mut client1) = tcp_pair().await;
        let (server2, _client2) = tcp_pair().await;
        let channel = Channel::new(Role::Video);

        channel.attach(server1.into_split().1).await;
        channel.attach(server2.into_split().1).await;

        // Dropping the first write half shuts it down; the first client
        // observes EOF.
        let n = client1.read(&mut [0u8; 8]).await.unwrap();
        assert_eq!(n, 0);
    }
}
