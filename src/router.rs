//! Message router: one inbound line in, state mutation + forwarding verdict out.
//!
//! SENSOR messages are consumed into the store and never raw-forwarded;
//! the snapshot broadcaster is the single source of normalized sensor
//! truth sent onward. Every other line, parsed or not, is handed back
//! to the caller for verbatim forwarding to the paired peer.

use crate::protocol::{Inbound, SensorReading};
use crate::state::{DustSource, SensorStore};
use log::{debug, trace};

/// What the caller should do with the original line after routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Consumed into state; do not forward.
    Consumed,
    /// Forward the original line unchanged to the paired peer.
    Forward,
}

/// Apply one line to the store and decide its forwarding fate.
pub fn route(line: &str, state: &SensorStore) -> Verdict {
    match Inbound::parse(line) {
        Inbound::Sensor(reading) => {
            apply_sensor(reading, state);
            Verdict::Consumed
        }
        Inbound::Stt { text } => {
            state.set_last_stt(text);
            Verdict::Forward
        }
        Inbound::Vision(update) => {
            if let Some(person) = update.person {
                state.set_vision_person(person);
            }
            if let Some(conf) = update.conf {
                state.set_vision_conf(conf);
            }
            Verdict::Forward
        }
        Inbound::Unrecognized { type_name } => {
            // SENSOR lines that failed to parse are still sensor truth;
            // they are never raw-forwarded to the console, only the
            // broadcaster's normalized snapshot is.
            if type_name.as_deref() == Some("SENSOR") {
                debug!("Malformed SENSOR message, ignoring");
                return Verdict::Consumed;
            }
            // Fail-open: transport hiccups and unknown types must never
            // silently drop telemetry.
            match type_name {
                Some(t) => trace!("Passing through message type {}", t),
                None => debug!("Unparsable line, forwarding raw"),
            }
            Verdict::Forward
        }
    }
}

fn apply_sensor(reading: SensorReading, state: &SensorStore) {
    match reading {
        SensorReading::Flame(level) => state.set_flame(level),
        SensorReading::Co2(ppm) => state.set_co2(ppm),
        SensorReading::Dust { pm25, pm10 } => {
            // Never overwrite last-known dust with nulls.
            if pm25.is_none() && pm10.is_none() {
                return;
            }
            match (pm25, pm10) {
                (Some(p25), Some(p10)) => state.set_dust(Some(p25), Some(p10), DustSource::Robot),
                (Some(p25), None) => state.set_pm25(p25),
                (None, Some(p10)) => state.set_pm10(p10),
                (None, None) => unreachable!(),
            }
        }
        SensorReading::Pir(detected) => state.set_pir(detected),
        SensorReading::Ultrasonic(distance) => state.set_ultrasonic(distance),
        SensorReading::Composite {
            fire,
            co2,
            pm25,
            pm10,
        } => {
            if let Some(fire) = fire {
                // The combined packet reports fire as a boolean; the
                // store keeps flame as a 0..1 level.
                state.set_flame(if fire { 1.0 } else { 0.0 });
            }
            if let Some(co2) = co2 {
                state.set_co2(co2);
            }
            if pm25.is_some() || pm10.is_some() {
                match (pm25, pm10) {
                    (Some(p25), Some(p10)) => {
                        state.set_dust(Some(p25), Some(p10), DustSource::Robot)
                    }
                    (Some(p25), None) => state.set_pm25(p25),
                    (None, Some(p10)) => state.set_pm10(p10),
                    (None, None) => {}
                }
            }
        }
    }
}
