//! Periodic snapshot broadcaster.
//!
//! Once per tick this composes the single normalized, staleness-
//! resolved sensor payload the console consumes, so the console never
//! has to reason about message dialects or field ages itself. Stale
//! motion/person flags are reported as false: a consumer must never act
//! on a detection older than the hazard-relevant window, and silence
//! means "not detected", not "last known state persists".

use crate::config::SnapshotConfig;
use crate::persist::{SnapshotRecord, SnapshotSink};
use crate::state::{DustSource, SensorStore};
use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::channel::Channel;

const PM25_MIN: f64 = 12.0;
const PM25_MAX: f64 = 35.0;
const PM10_MIN: f64 = 18.0;
const PM10_MAX: f64 = 50.0;

/// Slowly-drifting synthetic dust values, substituted when the real
/// sensor goes quiet. A bounded random walk keeps the numbers plausible
/// and avoids the abrupt null/value flips downstream consumers choke on.
pub struct DemoDust {
    pm25: f64,
    pm10: f64,
    tick: u32,
}

impl Default for DemoDust {
    fn default() -> Self {
        Self {
            pm25: 18.0,
            pm10: 28.0,
            tick: 0,
        }
    }
}

impl DemoDust {
    /// Advance the walk one tick. The values only move every fifth tick
    /// so the drift stays slow at the 500 ms broadcast period.
    pub fn advance(&mut self, rng: &mut impl Rng) -> (f64, f64) {
        self.tick = self.tick.wrapping_add(1);
        if self.tick % 5 == 0 {
            self.pm25 = (self.pm25 + rng.gen_range(-0.25..=0.35)).clamp(PM25_MIN, PM25_MAX);
            self.pm10 = (self.pm10 + rng.gen_range(-0.30..=0.40)).clamp(PM10_MIN, PM10_MAX);
        }
        (self.pm25, self.pm10)
    }

    pub fn values(&self) -> (f64, f64) {
        (self.pm25, self.pm10)
    }
}

/// Compose the canonical console snapshot and its persistence record.
pub fn compose_snapshot(
    state: &SensorStore,
    demo: &DemoDust,
    config: &SnapshotConfig,
) -> (Value, SnapshotRecord) {
    let pir_stale_after = Duration::from_millis(config.pir_stale_ms);
    let vision_stale_after = Duration::from_millis(config.vision_stale_ms);

    // fire is derived from the flame level, never reported raw
    let fire = state.flame().map(|(level, _)| level > 0.5).unwrap_or(false);

    let co2 = state.co2().map(|(ppm, _)| ppm).unwrap_or(config.co2_default);

    let (demo_pm25, demo_pm10) = demo.values();
    let dust = state.dust().map(|(d, _)| d);
    let pm25 = dust.and_then(|d| d.pm25).unwrap_or(demo_pm25);
    let pm10 = dust.and_then(|d| d.pm10).unwrap_or(demo_pm10);
    let dust_source = dust.map(|d| d.source);

    let (pir, pir_stale) = match state.pir() {
        Some((detected, age)) if age <= pir_stale_after => (detected, false),
        _ => (false, true),
    };

    let (vision_person, vision_stale) = match state.vision_person() {
        Some((person, age)) if age <= vision_stale_after => (person, false),
        _ => (false, true),
    };
    let vision_conf = state.vision_conf();

    let mut snap = json!({
        "type": "SENSOR",
        "fire": fire,
        "co2": co2,
        "dust": { "pm25": pm25, "pm10": pm10 },
        "pir": pir,
        "pirStale": pir_stale,
        "visionPerson": vision_person,
        "visionStale": vision_stale,
    });
    if let Some(source) = dust_source {
        snap["dustSource"] = json!(source.as_str());
    }
    if let Some(conf) = vision_conf {
        snap["visionConf"] = json!(conf);
    }

    let record = SnapshotRecord {
        ts_ms: chrono::Utc::now().timestamp_millis(),
        fire,
        co2,
        pm25,
        pm10,
        person_detected: vision_person && vision_conf.is_none_or(|c| c >= 0.5),
        source: dust_source
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "REAL".to_string()),
    };

    (snap, record)
}

/// Spawn the broadcaster task. No snapshot is sent unless both the
/// robot and the console are live; synthetic data must never be
/// presented as if a robot were reporting it.
pub fn spawn_broadcaster(
    state: Arc<SensorStore>,
    robot: Channel,
    console: Channel,
    config: SnapshotConfig,
    sink: Arc<dyn SnapshotSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(config.interval_ms));
        let mut demo = DemoDust::default();
        let mut rng = StdRng::from_entropy();
        let dust_stale_after = Duration::from_millis(config.dust_stale_ms);

        loop {
            interval.tick().await;

            if !console.is_connected().await || !robot.is_connected().await {
                continue;
            }

            // Stale dust recovery: synthesize, tag DEMO, write back.
            if state.is_dust_stale(dust_stale_after) {
                let (pm25, pm10) = demo.advance(&mut rng);
                state.set_dust(Some(pm25), Some(pm10), DustSource::Demo);
            }

            let (snap, record) = compose_snapshot(&state, &demo, &config);

            // Fire-and-forget; the sink owns its failures.
            sink.record(&record);

            match serde_json::to_string(&snap) {
                Ok(line) => console.send_line(&line).await,
                Err(e) => warn!("Failed to serialize snapshot: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SnapshotConfig {
        SnapshotConfig {
            interval_ms: 500,
            dust_stale_ms: 3_000,
            pir_stale_ms: 3_000,
            vision_stale_ms: 3_000,
            co2_default: 450.0,
        }
    }

    #[test]
    fn test_stale_pir_forced_false() {
        let state = SensorStore::new();
        state.set_pir(true);
        state.backdate_pir(Duration::from_millis(4_000));

        let (snap, _) = compose_snapshot(&state, &DemoDust::default(), &test_config());
        assert_eq!(snap["pir"], false);
        assert_eq!(snap["pirStale"], true);
    }

    #[test]
    fn test_fresh_pir_reported_as_is() {
        let state = SensorStore::new();
        state.set_pir(true);

        let (snap, _) = compose_snapshot(&state, &DemoDust::default(), &test_config());
        assert_eq!(snap["pir"], true);
        assert_eq!(snap["pirStale"], false);
    }

    #[test]
    fn test_stale_vision_forced_false() {
        let state = SensorStore::new();
        state.set_vision_person(true);
        state.set_vision_conf(0.9);
        state.backdate_vision(Duration::from_millis(4_000));

        let (snap, record) = compose_snapshot(&state, &DemoDust::default(), &test_config());
        assert_eq!(snap["visionPerson"], false);
        assert_eq!(snap["visionStale"], true);
        assert!(!record.person_detected);
    }

    #[test]
    fn test_fire_derived_from_flame_level() {
        let state = SensorStore::new();
        let config = test_config();

        state.set_flame(0.4);
        let (snap, _) = compose_snapshot(&state, &DemoDust::default(), &config);
        assert_eq!(snap["fire"], false);

        state.set_flame(0.9);
        let (snap, _) = compose_snapshot(&state, &DemoDust::default(), &config);
        assert_eq!(snap["fire"], true);
    }

    #[test]
    fn test_co2_default_when_never_set() {
        let state = SensorStore::new();
        let (snap, _) = compose_snapshot(&state, &DemoDust::default(), &test_config());
        assert_eq!(snap["co2"], 450.0);
    }

    #[test]
    fn test_demo_dust_tagged_in_snapshot() {
        let state = SensorStore::new();
        state.set_dust(Some(20.0), Some(30.0), DustSource::Demo);

        let (snap, record) = compose_snapshot(&state, &DemoDust::default(), &test_config());
        assert_eq!(snap["dustSource"], "DEMO");
        assert_eq!(record.source, "DEMO");
        assert_eq!(snap["dust"]["pm25"], 20.0);
    }

    #[test]
    fn test_demo_walk_stays_in_bounds() {
        let mut demo = DemoDust::default();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..10_000 {
            let (pm25, pm10) = demo.advance(&mut rng);
            assert!((PM25_MIN..=PM25_MAX).contains(&pm25));
            assert!((PM10_MIN..=PM10_MAX).contains(&pm10));
        }
    }

    #[test]
    fn test_demo_walk_moves_every_fifth_tick() {
        let mut demo = DemoDust::default();
        let mut rng = StdRng::seed_from_u64(7);

        let start = demo.values();
        for _ in 0..4 {
            demo.advance(&mut rng);
        }
        assert_eq!(demo.values(), start);
        demo.advance(&mut rng);
        assert_ne!(demo.values(), start);
    }

    #[test]
    fn test_person_detected_respects_confidence() {
        let state = SensorStore::new();
        state.set_vision_person(true);
        state.set_vision_conf(0.3);

        let (_, record) = compose_snapshot(&state, &DemoDust::default(), &test_config());
        assert!(!record.person_detected);

        state.set_vision_conf(0.7);
        let (_, record) = compose_snapshot(&state, &DemoDust::default(), &test_config());
        assert!(record.person_detected);
    }
}
