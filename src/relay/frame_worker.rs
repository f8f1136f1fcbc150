//! Binary connection workers for the image roles (vision, video).
//!
//! Wire format: repeating `[4-byte big-endian length][payload]` frames.
//! A header outside [1, max_frame_bytes] is corruption and fatal to
//! that connection only; so is a truncated payload or a read that sits
//! idle past the timeout. The peer is expected to reconnect.

use crate::error::{RelayError, Result};
use crate::follow::FollowSupervisor;
use crate::protocol;
use crate::router;
use crate::state::SensorStore;
use crate::vision::{self, VisionClient};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{info, warn};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::channel::Channel;

/// Framing limits shared by both binary roles.
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    pub max_frame_bytes: usize,
    pub read_timeout: Duration,
}

/// Read one length-prefixed frame. `Ok(None)` is a clean EOF before a
/// header; everything else that goes wrong kills the connection.
async fn read_frame(
    reader: &mut BufReader<OwnedReadHalf>,
    limits: FrameLimits,
) -> Result<Option<Vec<u8>>> {
    let len = match timeout(limits.read_timeout, reader.read_u32()).await {
        Err(_) => return Err(RelayError::ReadTimeout(limits.read_timeout.as_millis() as u64)),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Ok(Err(e)) => return Err(e.into()),
        Ok(Ok(len)) => len,
    };

    if len == 0 || len as usize > limits.max_frame_bytes {
        return Err(RelayError::InvalidFrameLength(len, limits.max_frame_bytes));
    }

    let mut payload = vec![0u8; len as usize];
    match timeout(limits.read_timeout, reader.read_exact(&mut payload)).await {
        Err(_) => Err(RelayError::ReadTimeout(limits.read_timeout.as_millis() as u64)),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(RelayError::TruncatedFrame {
            expected: len as usize,
        }),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(_)) => Ok(Some(payload)),
    }
}

/// Everything one inference cycle touches, wired once by the
/// orchestrator and shared across vision reconnects so the follow
/// supervisor's warm-up state survives a dropped camera link.
pub struct VisionPipeline {
    pub robot: Channel,
    pub console: Channel,
    pub state: Arc<SensorStore>,
    pub client: VisionClient,
    pub supervisor: Mutex<FollowSupervisor>,
    pub image_dir: PathBuf,
}

impl VisionPipeline {
    async fn process_frame(&self, jpg: &[u8]) {
        // Frame storage is best-effort, but inference needs the path.
        let path = match vision::save_frame(&self.image_dir, jpg).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to save frame: {}", e);
                return;
            }
        };
        let path_str = path.to_string_lossy().to_string();

        // Decisions computed against a stale resolution steer the robot
        // into a wall; adopt the frame's true size before deciding.
        let dims = vision::jpeg_dimensions(jpg);

        let mut yolo = match self.client.infer(&path_str).await {
            Ok(yolo) => yolo,
            Err(e) => {
                warn!("Inference failed: {}", e);
                // The operator must know sensing degraded; a silent
                // dropped cycle looks identical to "nobody there".
                self.console
                    .send_line(&protocol::vision_failure_line("infer_failed", &path_str))
                    .await;
                return;
            }
        };

        let frame_w = dims
            .map(|(w, _)| w)
            .unwrap_or_else(|| self.supervisor.lock().frame_size().0);
        vision::rewrite_best_to_center_most(&mut yolo, frame_w);

        let ts_ms = chrono::Utc::now().timestamp_millis();
        let event = protocol::vision_event_line(&path_str, ts_ms, &yolo);
        router::route(&event, &self.state);

        let detection = vision::detection_from_yolo(&yolo);
        let cmd = self.supervisor.lock().observe(&detection, dims);
        if let Some(cmd) = cmd {
            info!("Follow cmd -> {}", cmd.as_str());
            self.robot.send_line(&protocol::cmd_line(cmd.as_str())).await;
        }

        if detection.person {
            self.console.send_line(&event).await;
        }
    }
}

/// Worker for the vision-image role: frames in, inference, state
/// update, steering out.
pub fn spawn_vision_worker(
    read: OwnedReadHalf,
    generation: u64,
    own: Channel,
    pipeline: Arc<VisionPipeline>,
    limits: FrameLimits,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(read);

        loop {
            match read_frame(&mut reader, limits).await {
                Ok(Some(jpg)) => pipeline.process_frame(&jpg).await,
                Ok(None) => {
                    info!("{} disconnected", own.role());
                    break;
                }
                Err(e) => {
                    warn!("{} connection error: {}", own.role(), e);
                    break;
                }
            }
        }

        own.detach(generation).await;
    })
}

/// Worker for the video role: frames are relayed to the console as
/// base64 JSON lines, no state mutation, no inference.
pub fn spawn_video_worker(
    read: OwnedReadHalf,
    generation: u64,
    own: Channel,
    console: Channel,
    limits: FrameLimits,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(read);

        loop {
            match read_frame(&mut reader, limits).await {
                Ok(Some(jpg)) => {
                    if console.is_connected().await {
                        let b64 = BASE64.encode(&jpg);
                        console.send_line(&protocol::image_line(&b64)).await;
                    }
                }
                Ok(None) => {
                    info!("{} disconnected", own.role());
                    break;
                }
                Err(e) => {
                    warn!("{} connection error: {}", own.role(), e);
                    break;
                }
            }
        }

        own.detach(generation).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::channel::Role;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    const LIMITS: FrameLimits = FrameLimits {
        max_frame_bytes: 5_000_000,
        read_timeout: Duration::from_millis(500),
    };

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    async fn read_side(server: TcpStream) -> BufReader<OwnedReadHalf> {
        BufReader::new(server.into_split().0)
    }

    #[tokio::test]
    async fn test_read_frame_roundtrip() {
        let (server, mut client) = tcp_pair().await;
        let mut reader = read_side(server).await;

        let payload = vec![0xAB; 1024];
        client.write_u32(1024).await.unwrap();
        client.write_all(&payload).await.unwrap();

        let frame = read_frame(&mut reader, LIMITS).await.unwrap().unwrap();
        assert_eq!(frame, payload);
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof() {
        let (server, client) = tcp_pair().await;
        let mut reader = read_side(server).await;
        drop(client);

        assert!(read_frame(&mut reader, LIMITS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_header_is_corruption() {
        let (server, mut client) = tcp_pair().await;
        let mut reader = read_side(server).await;

        client.write_u32(6_000_000).await.unwrap();

        match read_frame(&mut reader, LIMITS).await {
            Err(RelayError::InvalidFrameLength(6_000_000, _)) => {}
            other => panic!("expected InvalidFrameLength, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_zero_header_is_corruption() {
        let (server, mut client) = tcp_pair().await;
        let mut reader = read_side(server).await;

        client.write_u32(0).await.unwrap();

        assert!(matches!(
            read_frame(&mut reader, LIMITS).await,
            Err(RelayError::InvalidFrameLength(0, _))
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_fatal() {
        let (server, mut client) = tcp_pair().await;
        let mut reader = read_side(server).await;

        client.write_u32(1024).await.unwrap();
        client.write_all(&[0u8; 100]).await.unwrap();
        drop(client);

        assert!(matches!(
            read_frame(&mut reader, LIMITS).await,
            Err(RelayError::TruncatedFrame { expected: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_idle_connection_times_out() {
        let (server, _client) = tcp_pair().await;
        let mut reader = read_side(server).await;

        assert!(matches!(
            read_frame(&mut reader, LIMITS).await,
            Err(RelayError::ReadTimeout(500))
        ));
    }

    #[tokio::test]
    async fn test_video_frames_relayed_as_base64() {
        use tokio::io::AsyncReadExt;

        let video = Channel::new(Role::Video);
        let console = Channel::new(Role::Console);

        let (video_server, mut video_client) = tcp_pair().await;
        let (console_server, mut console_client) = tcp_pair().await;

        let (video_read, video_write) = video_server.into_split();
        let generation = video.attach(video_write).await;
        console.attach(console_server.into_split().1).await;

        spawn_video_worker(video_read, generation, video.clone(), console, LIMITS);

        let jpg = vec![0xFF, 0xD8, 0xFF, 0xE0];
        video_client.write_u32(jpg.len() as u32).await.unwrap();
        video_client.write_all(&jpg).await.unwrap();

        let mut buf = vec![0u8; 256];
        let n = tokio::time::timeout(Duration::from_secs(2), console_client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let line = String::from_utf8_lossy(&buf[..n]);
        let v: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(v["type"], "IMAGE");
        assert_eq!(v["data"], BASE64.encode(&jpg));
    }
}
