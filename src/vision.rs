//! Vision inference collaborator client and detection post-processing.
//!
//! The inference service is an external HTTP collaborator: we hand it a
//! saved frame path plus a confidence threshold and get back a detection
//! payload with at least a `person` boolean and, when true, a `best`
//! bounding box. Its own choice of `best` is unstable under multi-person
//! scenes, so when a candidate list is present we re-select the box
//! closest to the horizontal frame center before acting on it.

use crate::config::VisionConfig;
use crate::error::{RelayError, Result};
use crate::follow::{BoundingBox, Detection};
use chrono::Local;
use log::{debug, warn};
use serde_json::{Value, json};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct VisionClient {
    http: reqwest::Client,
    base_url: String,
    conf_threshold: f64,
}

impl VisionClient {
    pub fn new(config: &VisionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            conf_threshold: config.conf_threshold,
        })
    }

    /// Run inference on a saved frame. Returns the raw detection payload.
    pub async fn infer(&self, image_path: &str) -> Result<Value> {
        let url = format!("{}/infer", self.base_url);
        let body = json!({ "path": image_path, "conf": self.conf_threshold });

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::VisionInference(format!(
                "HTTP {} body={}",
                status, body
            )));
        }

        let yolo: Value = resp.json().await?;
        debug!("Inference response: {}", yolo);
        Ok(yolo)
    }
}

/// Re-point `best` at the candidate whose center is closest to the
/// horizontal frame center. Only effective when the collaborator sends
/// a candidate array (`all`, `boxes` or `dets`); without one the
/// collaborator's own choice is kept.
pub fn rewrite_best_to_center_most(yolo: &mut Value, frame_w: u32) {
    let person = yolo
        .get("person")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !person {
        return;
    }

    let candidates = ["all", "boxes", "dets"]
        .iter()
        .find_map(|key| yolo.get(*key).and_then(Value::as_array))
        .cloned();
    let candidates = match candidates {
        Some(c) if !c.is_empty() => c,
        _ => return,
    };

    let half_w = f64::from(frame_w) / 2.0;
    let mut best_dist = f64::MAX;
    let mut picked: Option<Value> = None;

    for det in candidates {
        let Some(xyxy) = det.get("xyxy").and_then(Value::as_array) else {
            continue;
        };
        if xyxy.len() < 4 {
            continue;
        }
        let (Some(x1), Some(x2)) = (xyxy[0].as_f64(), xyxy[2].as_f64()) else {
            continue;
        };
        if x2 <= x1 {
            continue;
        }

        let cx = (x1 + x2) / 2.0;
        let dist = (cx - half_w).abs();
        if dist < best_dist {
            best_dist = dist;
            picked = Some(det.clone());
        }
    }

    if let (Some(picked), Some(obj)) = (picked, yolo.as_object_mut()) {
        obj.insert("best".to_string(), picked);
    }
}

/// Extract the geometry the follow controller needs from a detection payload.
pub fn detection_from_yolo(yolo: &Value) -> Detection {
    let person = yolo
        .get("person")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !person {
        return Detection::none();
    }

    let bbox = yolo
        .get("best")
        .and_then(|best| best.get("xyxy"))
        .and_then(Value::as_array)
        .and_then(|xyxy| {
            if xyxy.len() < 4 {
                return None;
            }
            Some(BoundingBox {
                x1: xyxy[0].as_f64()?,
                y1: xyxy[1].as_f64()?,
                x2: xyxy[2].as_f64()?,
                y2: xyxy[3].as_f64()?,
            })
        });

    Detection { person, bbox }
}

/// Probe the true resolution of a JPEG frame without decoding it.
pub fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    match reader.into_dimensions() {
        Ok(dims) => Some(dims),
        Err(e) => {
            warn!("Failed to read frame dimensions: {}", e);
            None
        }
    }
}

/// Persist a frame under `<base_dir>/<YYYYMMDD>/<HHMMSS_mmm>.jpg` and
/// return its absolute path for the inference collaborator.
pub async fn save_frame(base_dir: &Path, jpg: &[u8]) -> Result<PathBuf> {
    let now = Local::now();
    let dir = base_dir.join(now.format("%Y%m%d").to_string());
    tokio::fs::create_dir_all(&dir).await?;

    let name = format!("{}.jpg", now.format("%H%M%S_%3f"));
    let file = dir.join(name);
    tokio::fs::write(&file, jpg).await?;

    Ok(std::path::absolute(&file)?)
}
