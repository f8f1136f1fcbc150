use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            // Remove surrounding quotes if present
            if (value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\''))
            {
                value = &value[1..value.len() - 1];
            }

            // Only set if not already set (env vars take precedence)
            if std::env::var(key).is_err() {
                // SAFETY: We're single-threaded at this point (called before any async runtime)
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub net: NetConfig,
    pub follow: FollowConfig,
    pub snapshot: SnapshotConfig,
    pub vision: VisionConfig,
}

/// Listener ports and binary framing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    pub bind_addr: String,
    pub robot_port: u16,
    pub console_port: u16,
    pub vision_port: u16,
    pub video_port: u16,
    /// Length headers outside [1, max_frame_bytes] are treated as corruption.
    pub max_frame_bytes: usize,
    /// Binary channels with no bytes within this window are considered dead.
    pub frame_read_timeout_ms: u64,
}

/// Steering tuning for the follow controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowConfig {
    /// Normalized horizontal offset inside which the robot drives straight.
    pub center_deadband: f64,
    /// Bounding box area / frame area at which the robot stops (too close).
    pub stop_area_ratio: f64,
    /// Minimum interval between repeats of the same command.
    pub cmd_cooldown_ms: u64,
    /// STOP is forced for this long after a person first appears.
    pub warmup_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub interval_ms: u64,
    pub dust_stale_ms: u64,
    pub pir_stale_ms: u64,
    pub vision_stale_ms: u64,
    /// Reported when CO2 was never received.
    pub co2_default: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    pub base_url: String,
    pub conf_threshold: f64,
    pub image_dir: String,
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            net: NetConfig {
                bind_addr: "0.0.0.0".to_string(),
                robot_port: 6000,
                console_port: 6001,
                vision_port: 6002,
                video_port: 6003,
                max_frame_bytes: 5_000_000,
                frame_read_timeout_ms: 5_000,
            },
            follow: FollowConfig {
                center_deadband: 0.12,
                stop_area_ratio: 0.20,
                cmd_cooldown_ms: 250,
                warmup_ms: 800,
            },
            snapshot: SnapshotConfig {
                interval_ms: 500,
                dust_stale_ms: 3_000,
                pir_stale_ms: 3_000,
                vision_stale_ms: 3_000,
                co2_default: 450.0,
            },
            vision: VisionConfig {
                base_url: "http://127.0.0.1:8008".to_string(),
                conf_threshold: 0.35,
                image_dir: "./data/images".to_string(),
                request_timeout_ms: 5_000,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            config.net.bind_addr = addr;
        }
        if let Ok(port) = std::env::var("ROBOT_PORT")
            && let Ok(p) = port.parse()
        {
            config.net.robot_port = p;
        }
        if let Ok(port) = std::env::var("CONSOLE_PORT")
            && let Ok(p) = port.parse()
        {
            config.net.console_port = p;
        }
        if let Ok(port) = std::env::var("VISION_PORT")
            && let Ok(p) = port.parse()
        {
            config.net.vision_port = p;
        }
        if let Ok(port) = std::env::var("VIDEO_PORT")
            && let Ok(p) = port.parse()
        {
            config.net.video_port = p;
        }
        if let Ok(max) = std::env::var("MAX_FRAME_BYTES")
            && let Ok(m) = max.parse()
        {
            config.net.max_frame_bytes = m;
        }

        // Vision inference collaborator
        if let Ok(url) = std::env::var("VISION_URL") {
            config.vision.base_url = url;
        }
        if let Ok(conf) = std::env::var("VISION_CONF")
            && let Ok(c) = conf.parse()
        {
            config.vision.conf_threshold = c;
        }
        if let Ok(dir) = std::env::var("IMAGE_DIR") {
            config.vision.image_dir = dir;
        }

        config
    }
}
