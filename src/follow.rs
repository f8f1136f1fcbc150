//! Reactive person-following controller.
//!
//! Maps a vision detection onto a discrete steering command from the
//! bounding box geometry alone. The controller itself is pure decision
//! logic plus rate limiting; the warm-up window and loss-of-track edge
//! live in [`FollowSupervisor`], which wraps it in the vision pipeline.

use crate::config::FollowConfig;
use log::debug;
use std::time::{Duration, Instant};

/// Discrete steering command sent to the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Forward,
    Left,
    Right,
    Stop,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Forward => "FORWARD",
            Command::Left => "LEFT",
            Command::Right => "RIGHT",
            Command::Stop => "STOP",
        }
    }
}

/// Pixel-space bounding box, (x1, y1) top-left, (x2, y2) bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    /// Degenerate boxes come out of the detector occasionally; treat
    /// them as "no box" rather than steering on garbage.
    pub fn is_degenerate(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn center_x(&self) -> f64 {
        (self.x1 + self.x2) / 2.0
    }

    pub fn area(&self) -> f64 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }
}

/// One detection cycle's input to the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub person: bool,
    pub bbox: Option<BoundingBox>,
}

impl Detection {
    pub fn none() -> Self {
        Self {
            person: false,
            bbox: None,
        }
    }
}

pub struct FollowController {
    img_w: u32,
    img_h: u32,

    center_deadband: f64,
    stop_area_ratio: f64,
    cmd_cooldown: Duration,

    last_cmd: Command,
    last_cmd_at: Option<Instant>,
    last_dbg_at: Option<Instant>,
}

const DBG_EVERY: Duration = Duration::from_millis(500);

impl FollowController {
    pub fn new(img_w: u32, img_h: u32, config: &FollowConfig) -> Self {
        Self {
            img_w,
            img_h,
            center_deadband: config.center_deadband,
            stop_area_ratio: config.stop_area_ratio,
            cmd_cooldown: Duration::from_millis(config.cmd_cooldown_ms),
            last_cmd: Command::Stop,
            last_cmd_at: None,
            last_dbg_at: None,
        }
    }

    /// Adopt the true resolution of the incoming frames. Deciding
    /// against a stale resolution pins the output to one side, so this
    /// must run before the next decision whenever the size changed.
    pub fn update_frame_size(&mut self, w: u32, h: u32) {
        if w > 0 && h > 0 && (self.img_w != w || self.img_h != h) {
            self.img_w = w;
            self.img_h = h;
            debug!("Follow frame size updated => {}x{}", w, h);
        }
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.img_w, self.img_h)
    }

    /// Map a detection to a steering command.
    pub fn decide(&mut self, detection: &Detection) -> Command {
        if !detection.person {
            return Command::Stop;
        }
        let bbox = match detection.bbox {
            Some(b) if !b.is_degenerate() => b,
            _ => return Command::Stop,
        };
        if self.img_w == 0 || self.img_h == 0 {
            return Command::Stop;
        }

        let frame_area = f64::from(self.img_w) * f64::from(self.img_h);
        let area_ratio = bbox.area() / frame_area;

        // Too close: stop regardless of horizontal offset.
        if area_ratio >= self.stop_area_ratio {
            self.dbg(&bbox, area_ratio, 0.0, Command::Stop);
            return Command::Stop;
        }

        // Normalized offset of the box center from frame center, -1..1.
        let half_w = f64::from(self.img_w) / 2.0;
        let center_norm = (bbox.center_x() - half_w) / half_w;

        let cmd = if center_norm < -self.center_deadband {
            Command::Left
        } else if center_norm > self.center_deadband {
            Command::Right
        } else {
            Command::Forward
        };

        self.dbg(&bbox, area_ratio, center_norm, cmd);
        cmd
    }

    /// Like [`decide`](Self::decide), but suppresses repeating the same
    /// command within the cooldown. Returns `None` for "send nothing",
    /// which is distinct from an actual STOP.
    pub fn decide_throttled(&mut self, detection: &Detection) -> Option<Command> {
        let now = Instant::now();
        let cmd = self.decide(detection);

        if cmd == self.last_cmd
            && let Some(at) = self.last_cmd_at
            && now.duration_since(at) < self.cmd_cooldown
        {
            return None;
        }

        self.last_cmd = cmd;
        self.last_cmd_at = Some(now);
        Some(cmd)
    }

    fn dbg(&mut self, bbox: &BoundingBox, area_ratio: f64, center_norm: f64, cmd: Command) {
        let now = Instant::now();
        if let Some(at) = self.last_dbg_at
            && now.duration_since(at) < DBG_EVERY
        {
            return;
        }
        self.last_dbg_at = Some(now);
        debug!(
            "Follow frame={}x{} bbox=[{:.1},{:.1},{:.1},{:.1}] areaRatio={:.3} centerNorm={:.3} -> {}",
            self.img_w,
            self.img_h,
            bbox.x1,
            bbox.y1,
            bbox.x2,
            bbox.y2,
            area_ratio,
            center_norm,
            cmd.as_str()
        );
    }
}

/// Wraps the controller with the stateful edges the relay must honor:
/// a warm-up window after a person first appears (the first frames'
/// geometry is noisy) and exactly one STOP when the person is lost.
pub struct FollowSupervisor {
    controller: FollowController,
    warmup: Duration,
    person_since: Option<Instant>,
    last_person: bool,
}

impl FollowSupervisor {
    pub fn new(controller: FollowController, warmup_ms: u64) -> Self {
        Self {
            controller,
            warmup: Duration::from_millis(warmup_ms),
            person_since: None,
            last_person: false,
        }
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.controller.frame_size()
    }

    /// Feed one detection cycle; returns the command to send, if any.
    /// `frame_size` is the observed true resolution of the frame the
    /// detection was computed on, when known.
    pub fn observe(&mut self, detection: &Detection, frame_size: Option<(u32, u32)>) -> Option<Command> {
        if let Some((w, h)) = frame_size {
            self.controller.update_frame_size(w, h);
        }

        let now = Instant::now();

        // Rising edge: person just appeared, start the warm-up clock.
        if detection.person && !self.last_person {
            self.person_since = Some(now);
        }

        let out = if detection.person {
            match self.person_since {
                Some(since) if now.duration_since(since) < self.warmup => {
                    debug!(
                        "Follow warmup -> STOP ({} ms)",
                        now.duration_since(since).as_millis()
                    );
                    Some(Command::Stop)
                }
                _ => self.controller.decide_throttled(detection),
            }
        } else if self.last_person {
            // Falling edge: one STOP, then silence until the person
            // reappears. A repeating STOP stream just floods the robot.
            debug!("Follow person lost -> STOP");
            Some(Command::Stop)
        } else {
            None
        };

        self.last_person = detection.person;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(cooldown_ms: u64) -> FollowConfig {
        FollowConfig {
            center_deadband: 0.12,
            stop_area_ratio: 0.20,
            cmd_cooldown_ms: cooldown_ms,
            warmup_ms: 800,
        }
    }

    fn detection(x1: f64, y1: f64, x2: f64, y2: f64) -> Detection {
        Detection {
            person: true,
            bbox: Some(BoundingBox { x1, y1, x2, y2 }),
        }
    }

    #[test]
    fn test_left_of_center_turns_left() {
        let mut c = FollowController::new(640, 480, &test_config(250));
        // Center x = 150, offset ≈ -0.53, area ratio ≈ 0.065
        assert_eq!(c.decide(&detection(100.0, 100.0, 200.0, 300.0)), Command::Left);
    }

    #[test]
    fn test_right_of_center_turns_right() {
        let mut c = FollowController::new(640, 480, &test_config(250));
        assert_eq!(c.decide(&detection(440.0, 100.0, 540.0, 300.0)), Command::Right);
    }

    #[test]
    fn test_centered_goes_forward() {
        let mut c = FollowController::new(640, 480, &test_config(250));
        assert_eq!(c.decide(&detection(290.0, 100.0, 350.0, 300.0)), Command::Forward);
    }

    #[test]
    fn test_large_box_stops_regardless_of_offset() {
        let mut c = FollowController::new(640, 480, &test_config(250));
        // 400x200 = 80000 px on a 307200 px frame, ratio ≈ 0.26, far left
        assert_eq!(c.decide(&detection(0.0, 100.0, 400.0, 300.0)), Command::Stop);
    }

    #[test]
    fn test_no_person_stops() {
        let mut c = FollowController::new(640, 480, &test_config(250));
        assert_eq!(c.decide(&Detection::none()), Command::Stop);
    }

    #[test]
    fn test_degenerate_bbox_stops() {
        let mut c = FollowController::new(640, 480, &test_config(250));
        assert_eq!(c.decide(&detection(200.0, 100.0, 200.0, 300.0)), Command::Stop);
        assert_eq!(c.decide(&detection(100.0, 300.0, 200.0, 100.0)), Command::Stop);
    }

    #[test]
    fn test_throttle_suppresses_repeat_within_cooldown() {
        let mut c = FollowController::new(640, 480, &test_config(250));
        let det = detection(100.0, 100.0, 200.0, 300.0);
        assert_eq!(c.decide_throttled(&det), Some(Command::Left));
        // Same command, immediately again
        assert_eq!(c.decide_throttled(&det), None);
    }

    #[test]
    fn test_throttle_passes_changed_command() {
        let mut c = FollowController::new(640, 480, &test_config(250));
        assert_eq!(
            c.decide_throttled(&detection(100.0, 100.0, 200.0, 300.0)),
            Some(Command::Left)
        );
        // A different command is a genuine state change, never masked
        assert_eq!(
            c.decide_throttled(&detection(440.0, 100.0, 540.0, 300.0)),
            Some(Command::Right)
        );
    }

    #[test]
    fn test_throttle_allows_repeat_after_cooldown() {
        let mut c = FollowController::new(640, 480, &test_config(0));
        let det = detection(100.0, 100.0, 200.0, 300.0);
        assert_eq!(c.decide_throttled(&det), Some(Command::Left));
        assert_eq!(c.decide_throttled(&det), Some(Command::Left));
    }

    #[test]
    fn test_frame_size_update_changes_decision() {
        let mut c = FollowController::new(640, 480, &test_config(250));
        // On a 640-wide frame this box is right of center
        let det = detection(440.0, 100.0, 540.0, 300.0);
        assert_eq!(c.decide(&det), Command::Right);

        // On a 1280-wide frame the same box sits left of center
        c.update_frame_size(1280, 720);
        assert_eq!(c.decide(&det), Command::Left);
    }

    #[test]
    fn test_warmup_forces_stop() {
        let controller = FollowController::new(640, 480, &test_config(0));
        let mut sup = FollowSupervisor::new(controller, 800);

        // Geometry that would yield FORWARD on its own
        let det = detection(290.0, 100.0, 350.0, 300.0);
        assert_eq!(sup.observe(&det, None), Some(Command::Stop));
        assert_eq!(sup.observe(&det, None), Some(Command::Stop));
    }

    #[test]
    fn test_warmup_expires() {
        let controller = FollowController::new(640, 480, &test_config(0));
        let mut sup = FollowSupervisor::new(controller, 0);

        let det = detection(290.0, 100.0, 350.0, 300.0);
        assert_eq!(sup.observe(&det, None), Some(Command::Forward));
    }

    #[test]
    fn test_single_stop_on_person_lost() {
        let controller = FollowController::new(640, 480, &test_config(0));
        let mut sup = FollowSupervisor::new(controller, 0);

        sup.observe(&detection(290.0, 100.0, 350.0, 300.0), None);
        assert_eq!(sup.observe(&Detection::none(), None), Some(Command::Stop));
        // Then silence, not a STOP stream
        assert_eq!(sup.observe(&Detection::none(), None), None);
        assert_eq!(sup.observe(&Detection::none(), None), None);
    }

    #[test]
    fn test_reappearance_restarts_warmup() {
        let controller = FollowController::new(640, 480, &test_config(0));
        let mut sup = FollowSupervisor::new(controller, 800);

        let det = detection(290.0, 100.0, 350.0, 300.0);
        sup.observe(&det, None);
        sup.observe(&Detection::none(), None);
        // Person back: warm-up applies again
        assert_eq!(sup.observe(&det, None), Some(Command::Stop));
    }
}
