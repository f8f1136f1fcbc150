//! Shared sensor state store.
//!
//! One instance per process, concurrently read and written by every
//! connection worker. Each field pairs its last-known value with the
//! instant it was written, under a single per-field lock, so a reader
//! never observes a fresh value with a stale timestamp. Fields are
//! independent; no cross-field invariant exists beyond that.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Provenance of the current PM2.5/PM10 values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DustSource {
    /// Real telemetry from the robot.
    Robot,
    /// Synthesized replacement for a stale field.
    Demo,
    /// Replayed from persistence.
    Cache,
}

impl DustSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DustSource::Robot => "ROBOT",
            DustSource::Demo => "DEMO",
            DustSource::Cache => "CACHE",
        }
    }
}

/// PM2.5/PM10 pair, updated as one unit since the robot sends dust
/// readings as a single packet.
#[derive(Debug, Clone, Copy)]
pub struct DustReading {
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub source: DustSource,
}

/// A value together with the instant it was last written.
struct Timed<T> {
    value: T,
    at: Instant,
}

/// One lockable field: value + timestamp swapped atomically.
struct Slot<T>(Mutex<Option<Timed<T>>>);

impl<T: Clone> Slot<T> {
    fn new() -> Self {
        Self(Mutex::new(None))
    }

    fn set(&self, value: T) {
        *self.0.lock() = Some(Timed {
            value,
            at: Instant::now(),
        });
    }

    /// Returns the value and its age, or None if never set.
    fn get(&self) -> Option<(T, Duration)> {
        self.0
            .lock()
            .as_ref()
            .map(|t| (t.value.clone(), t.at.elapsed()))
    }

    /// True if never set or older than the threshold.
    fn is_stale(&self, threshold: Duration) -> bool {
        match self.0.lock().as_ref() {
            Some(t) => t.at.elapsed() > threshold,
            None => true,
        }
    }

    #[cfg(test)]
    fn backdate(&self, age: Duration) {
        if let Some(t) = self.0.lock().as_mut() {
            t.at = Instant::now() - age;
        }
    }
}

/// The single shared record of last-known sensed reality.
///
/// Constructed once and handed to every worker and task; there is no
/// ambient/static instance.
pub struct SensorStore {
    flame: Slot<f64>,
    co2: Slot<f64>,
    dust: Slot<DustReading>,
    pir: Slot<bool>,
    ultrasonic: Slot<f64>,
    vision_person: Slot<bool>,
    vision_conf: Mutex<Option<f64>>,
    last_stt: Slot<String>,
    /// Raw decision payload echo, kept for replay/debug only.
    last_decision: Slot<String>,
    last_any_update: Mutex<Option<Instant>>,
}

impl SensorStore {
    pub fn new() -> Self {
        Self {
            flame: Slot::new(),
            co2: Slot::new(),
            dust: Slot::new(),
            pir: Slot::new(),
            ultrasonic: Slot::new(),
            vision_person: Slot::new(),
            vision_conf: Mutex::new(None),
            last_stt: Slot::new(),
            last_decision: Slot::new(),
            last_any_update: Mutex::new(None),
        }
    }

    fn mark_any_update(&self) {
        *self.last_any_update.lock() = Some(Instant::now());
    }

    /// Age of the most recent update to any field, if any.
    pub fn age_of_last_update(&self) -> Option<Duration> {
        self.last_any_update.lock().map(|at| at.elapsed())
    }

    // ===== flame =====

    pub fn set_flame(&self, level: f64) {
        self.flame.set(level);
        self.mark_any_update();
    }

    pub fn flame(&self) -> Option<(f64, Duration)> {
        self.flame.get()
    }

    // ===== co2 =====

    pub fn set_co2(&self, ppm: f64) {
        self.co2.set(ppm);
        self.mark_any_update();
    }

    pub fn co2(&self) -> Option<(f64, Duration)> {
        self.co2.get()
    }

    // ===== dust =====

    /// Set both PM values and their provenance as one unit.
    pub fn set_dust(&self, pm25: Option<f64>, pm10: Option<f64>, source: DustSource) {
        self.dust.set(DustReading { pm25, pm10, source });
        self.mark_any_update();
    }

    /// Update PM2.5 alone, preserving the last-known PM10 and source.
    pub fn set_pm25(&self, pm25: f64) {
        let prev = self.dust.get().map(|(d, _)| d);
        self.set_dust(
            Some(pm25),
            prev.and_then(|d| d.pm10),
            prev.map(|d| d.source).unwrap_or(DustSource::Robot),
        );
    }

    /// Update PM10 alone, preserving the last-known PM2.5 and source.
    pub fn set_pm10(&self, pm10: f64) {
        let prev = self.dust.get().map(|(d, _)| d);
        self.set_dust(
            prev.and_then(|d| d.pm25),
            Some(pm10),
            prev.map(|d| d.source).unwrap_or(DustSource::Robot),
        );
    }

    pub fn dust(&self) -> Option<(DustReading, Duration)> {
        self.dust.get()
    }

    pub fn is_dust_stale(&self, threshold: Duration) -> bool {
        self.dust.is_stale(threshold)
    }

    // ===== PIR =====

    pub fn set_pir(&self, detected: bool) {
        self.pir.set(detected);
        self.mark_any_update();
    }

    pub fn pir(&self) -> Option<(bool, Duration)> {
        self.pir.get()
    }

    pub fn is_pir_stale(&self, threshold: Duration) -> bool {
        self.pir.is_stale(threshold)
    }

    // ===== ultrasonic =====

    pub fn set_ultrasonic(&self, distance_cm: f64) {
        self.ultrasonic.set(distance_cm);
        self.mark_any_update();
    }

    pub fn ultrasonic(&self) -> Option<(f64, Duration)> {
        self.ultrasonic.get()
    }

    // ===== vision =====

    pub fn set_vision_person(&self, person: bool) {
        self.vision_person.set(person);
        self.mark_any_update();
    }

    pub fn vision_person(&self) -> Option<(bool, Duration)> {
        self.vision_person.get()
    }

    pub fn is_vision_stale(&self, threshold: Duration) -> bool {
        self.vision_person.is_stale(threshold)
    }

    pub fn set_vision_conf(&self, conf: f64) {
        *self.vision_conf.lock() = Some(conf);
        self.mark_any_update();
    }

    pub fn vision_conf(&self) -> Option<f64> {
        *self.vision_conf.lock()
    }

    // ===== STT =====

    pub fn set_last_stt(&self, text: String) {
        self.last_stt.set(text);
        self.mark_any_update();
    }

    pub fn last_stt(&self) -> Option<(String, Duration)> {
        self.last_stt.get()
    }

    // ===== decision echo =====

    pub fn set_last_decision(&self, raw: String) {
        self.last_decision.set(raw);
    }

    pub fn last_decision(&self) -> Option<(String, Duration)> {
        self.last_decision.get()
    }

    // ===== test helpers =====

    #[cfg(test)]
    pub(crate) fn backdate_pir(&self, age: Duration) {
        self.pir.backdate(age);
    }

    #[cfg(test)]
    pub(crate) fn backdate_dust(&self, age: Duration) {
        self.dust.backdate(age);
    }

    #[cfg(test)]
    pub(crate) fn backdate_vision(&self, age: Duration) {
        self.vision_person.backdate(age);
    }
}

impl Default for SensorStore {
    fn default() -> Self {
        Self::new()
    }
}
