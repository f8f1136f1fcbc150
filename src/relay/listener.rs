//! Per-role TCP accept loop.
//!
//! Each role cycles LISTENING → ACCEPTED → ACTIVE → CLOSED → LISTENING.
//! A new accept while a prior connection is still active force-closes
//! the old one first: the deployment guarantees at most one legitimate
//! physical peer per role, so the newest connection always wins.

use crate::error::{RelayError, Result};
use crate::relay::channel::{Channel, Role};
use log::{error, info, warn};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedReadHalf;
use tokio::task::JoinHandle;

/// Bind a role's listener. This is the only startup-fatal operation in
/// the relay, so the error names the role and port.
pub async fn bind(addr: &str, role: Role, port: u16) -> Result<TcpListener> {
    TcpListener::bind((addr, port))
        .await
        .map_err(|source| RelayError::Bind { role, port, source })
}

/// Run the accept loop for one role. `spawn_worker` is handed the read
/// half and the channel generation of each accepted connection; the
/// write half goes into the channel before the worker starts.
pub fn spawn_accept_loop<F>(listener: TcpListener, channel: Channel, spawn_worker: F) -> JoinHandle<()>
where
    F: Fn(OwnedReadHalf, u64) -> JoinHandle<()> + Send + 'static,
{
    tokio::spawn(async move {
        let role = channel.role();
        let mut active: Option<JoinHandle<()>> = None;

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("{}: failed to set TCP_NODELAY: {}", role, e);
                    }

                    // Force-close the superseded worker before the new
                    // connection goes active.
                    if let Some(prev) = active.take()
                        && !prev.is_finished()
                    {
                        warn!("{}: closing superseded connection", role);
                        prev.abort();
                    }

                    let (read, write) = stream.into_split();
                    let generation = channel.attach(write).await;
                    info!("{} connected: {}", role, addr);

                    active = Some(spawn_worker(read, generation));
                }
                Err(e) => {
                    // Transient accept failures (fd exhaustion and the
                    // like) recover by waiting, never by exiting.
                    error!("{} accept failed: {}", role, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}
