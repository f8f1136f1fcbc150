//! Relay orchestrator: wires the four channel listeners together and
//! owns their lifecycles.
//!
//! Pairings: robot↔console bridge each other's text lines, the vision
//! image stream drives the follow controller toward the robot, and the
//! video stream is relayed to the console. All four listeners are bound
//! up front so a port conflict aborts startup before anything runs.

pub mod broadcast;
pub mod channel;
pub mod frame_worker;
pub mod listener;
pub mod text_worker;

use crate::config::Config;
use crate::decision;
use crate::error::Result;
use crate::follow::{FollowController, FollowSupervisor};
use crate::persist::SnapshotSink;
use crate::state::SensorStore;
use crate::vision::VisionClient;
use channel::{Channel, Role};
use frame_worker::{FrameLimits, VisionPipeline};
use log::info;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Initial frame geometry until a real frame tells us otherwise.
const DEFAULT_FRAME_W: u32 = 640;
const DEFAULT_FRAME_H: u32 = 480;

pub struct Relay {
    state: Arc<SensorStore>,
    robot: Channel,
    console: Channel,
    tasks: Vec<JoinHandle<()>>,
}

impl Relay {
    /// Bind all listeners and spawn every task. Fails only if a port
    /// cannot be bound or the vision HTTP client cannot be built.
    pub async fn start(
        config: Config,
        state: Arc<SensorStore>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Result<Relay> {
        let net = &config.net;

        let robot_listener = listener::bind(&net.bind_addr, Role::Robot, net.robot_port).await?;
        let console_listener =
            listener::bind(&net.bind_addr, Role::Console, net.console_port).await?;
        let vision_listener =
            listener::bind(&net.bind_addr, Role::Vision, net.vision_port).await?;
        let video_listener = listener::bind(&net.bind_addr, Role::Video, net.video_port).await?;

        let robot = Channel::new(Role::Robot);
        let console = Channel::new(Role::Console);
        let vision = Channel::new(Role::Vision);
        let video = Channel::new(Role::Video);

        let limits = FrameLimits {
            max_frame_bytes: net.max_frame_bytes,
            read_timeout: Duration::from_millis(net.frame_read_timeout_ms),
        };

        let controller = FollowController::new(DEFAULT_FRAME_W, DEFAULT_FRAME_H, &config.follow);
        let supervisor = FollowSupervisor::new(controller, config.follow.warmup_ms);
        let pipeline = Arc::new(VisionPipeline {
            robot: robot.clone(),
            console: console.clone(),
            state: state.clone(),
            client: VisionClient::new(&config.vision)?,
            supervisor: Mutex::new(supervisor),
            image_dir: PathBuf::from(&config.vision.image_dir),
        });

        let mut tasks = Vec::new();

        // Robot lines route into state, the rest bridges to the console.
        {
            let (own, peer, state) = (robot.clone(), console.clone(), state.clone());
            tasks.push(listener::spawn_accept_loop(
                robot_listener,
                robot.clone(),
                move |read, generation| {
                    text_worker::spawn_text_worker(
                        read,
                        generation,
                        own.clone(),
                        peer.clone(),
                        state.clone(),
                    )
                },
            ));
        }

        // Console lines (KEY, PAD, anything else) pass through to the robot.
        {
            let (own, peer, state) = (console.clone(), robot.clone(), state.clone());
            tasks.push(listener::spawn_accept_loop(
                console_listener,
                console.clone(),
                move |read, generation| {
                    text_worker::spawn_text_worker(
                        read,
                        generation,
                        own.clone(),
                        peer.clone(),
                        state.clone(),
                    )
                },
            ));
        }

        // Vision frames feed inference and the follow controller.
        {
            let own = vision.clone();
            tasks.push(listener::spawn_accept_loop(
                vision_listener,
                vision.clone(),
                move |read, generation| {
                    frame_worker::spawn_vision_worker(
                        read,
                        generation,
                        own.clone(),
                        pipeline.clone(),
                        limits,
                    )
                },
            ));
        }

        // Video frames are relayed to the console untouched.
        {
            let (own, peer) = (video.clone(), console.clone());
            tasks.push(listener::spawn_accept_loop(
                video_listener,
                video.clone(),
                move |read, generation| {
                    frame_worker::spawn_video_worker(
                        read,
                        generation,
                        own.clone(),
                        peer.clone(),
                        limits,
                    )
                },
            ));
        }

        tasks.push(broadcast::spawn_broadcaster(
            state.clone(),
            robot.clone(),
            console.clone(),
            config.snapshot.clone(),
            sink,
        ));

        info!("Listening: robot={} console={} vision={} video={}",
            net.robot_port, net.console_port, net.vision_port, net.video_port);

        Ok(Relay {
            state,
            robot,
            console,
            tasks,
        })
    }

    /// Entry point for the decision collaborator: apply one payload.
    pub async fn apply_decision(&self, raw: &str) {
        decision::dispatch(raw, &self.state, &self.robot, &self.console).await;
    }

    pub fn state(&self) -> &Arc<SensorStore> {
        &self.state
    }

    pub async fn robot_connected(&self) -> bool {
        self.robot.is_connected().await
    }

    pub async fn console_connected(&self) -> bool {
        self.console.is_connected().await
    }

    /// Abort every task. Connections drop with them.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Relay stopped");
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
