//! Line-oriented connection worker for the text roles (robot, console).
//!
//! Every line goes through the message router; whatever the router does
//! not consume into the sensor store is forwarded verbatim to the
//! paired peer (robot lines to the console and vice versa).

use crate::router::{self, Verdict};
use crate::state::SensorStore;
use log::info;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::task::JoinHandle;

use super::channel::Channel;

pub fn spawn_text_worker(
    read: OwnedReadHalf,
    generation: u64,
    own: Channel,
    peer: Channel,
    state: Arc<SensorStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(read).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match router::route(line, &state) {
                        Verdict::Consumed => {}
                        Verdict::Forward => peer.send_line(line).await,
                    }
                }
                Ok(None) => {
                    info!("{} disconnected", own.role());
                    break;
                }
                Err(e) => {
                    info!("{} read error: {}", own.role(), e);
                    break;
                }
            }
        }

        own.detach(generation).await;
    })
}
