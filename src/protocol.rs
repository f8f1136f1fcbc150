//! Wire message model.
//!
//! Every inbound text line is decoded exactly once, at the router
//! boundary, into a closed set of known shapes plus an explicit
//! unrecognized variant. Two sensor dialects are accepted on purpose:
//! the per-sensor named shape (`{"type":"SENSOR","name":"CO2",...}`)
//! and the robot's combined shape (`{"type":"SENSOR","fire":...,
//! "gas":...,"dust":{...}}`). Both are live in the field.

use serde_json::{Value, json};

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Sensor(SensorReading),
    Stt { text: String },
    Vision(VisionUpdate),
    /// Unparsable line, or a recognized-but-passthrough type (KEY, PAD, ...).
    /// The router forwards the original line verbatim.
    Unrecognized { type_name: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorReading {
    Flame(f64),
    Co2(f64),
    /// Either sub-field may be absent; both absent is a no-op upstream.
    Dust { pm25: Option<f64>, pm10: Option<f64> },
    Pir(bool),
    Ultrasonic(f64),
    /// The robot's combined packet. Absent fields mean "not reported".
    Composite {
        fire: Option<bool>,
        co2: Option<f64>,
        pm25: Option<f64>,
        pm10: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionUpdate {
    pub person: Option<bool>,
    pub conf: Option<f64>,
}

impl Inbound {
    /// Decode one newline-delimited line. Never fails: anything that is
    /// not valid JSON with a known `type` comes back as `Unrecognized`
    /// so the caller can forward it unchanged (fail-open).
    pub fn parse(line: &str) -> Inbound {
        let obj = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => map,
            _ => return Inbound::Unrecognized { type_name: None },
        };

        let type_name = obj.get("type").and_then(Value::as_str).map(str::to_string);

        match type_name.as_deref() {
            Some("SENSOR") => parse_sensor(&obj)
                .map(Inbound::Sensor)
                .unwrap_or(Inbound::Unrecognized { type_name }),
            Some("STT") => match obj.get("text").and_then(Value::as_str) {
                Some(text) => Inbound::Stt {
                    text: text.to_string(),
                },
                None => Inbound::Unrecognized { type_name },
            },
            Some("VISION") => Inbound::Vision(parse_vision(&obj)),
            _ => Inbound::Unrecognized { type_name },
        }
    }
}

fn parse_sensor(obj: &serde_json::Map<String, Value>) -> Option<SensorReading> {
    // Named dialect: {type:SENSOR, name:CO2, value:...}
    if let Some(name) = obj.get("name").and_then(Value::as_str) {
        return match name {
            "FLAME" => Some(SensorReading::Flame(obj.get("value")?.as_f64()?)),
            "CO2" => Some(SensorReading::Co2(obj.get("value")?.as_f64()?)),
            "DUST" => Some(SensorReading::Dust {
                pm25: obj.get("pm25").and_then(Value::as_f64),
                pm10: obj.get("pm10").and_then(Value::as_f64),
            }),
            "PIR" => Some(SensorReading::Pir(obj.get("detected")?.as_bool()?)),
            "ULTRASONIC" => Some(SensorReading::Ultrasonic(obj.get("distance")?.as_f64()?)),
            _ => None,
        };
    }

    // Combined dialect: {type:SENSOR, fire:bool, co2_ppm|gas:number, dust:{pm25,pm10}}
    let fire = obj.get("fire").and_then(Value::as_bool);
    // co2_ppm is the proper key; older robots still send it as "gas"
    let co2 = obj
        .get("co2_ppm")
        .and_then(Value::as_f64)
        .or_else(|| obj.get("gas").and_then(Value::as_f64));
    let (pm25, pm10) = match obj.get("dust") {
        Some(Value::Object(dust)) => (
            dust.get("pm25").and_then(Value::as_f64),
            dust.get("pm10").and_then(Value::as_f64),
        ),
        _ => (None, None),
    };

    if fire.is_none() && co2.is_none() && pm25.is_none() && pm10.is_none() {
        return None;
    }
    Some(SensorReading::Composite {
        fire,
        co2,
        pm25,
        pm10,
    })
}

fn parse_vision(obj: &serde_json::Map<String, Value>) -> VisionUpdate {
    let yolo = match obj.get("yolo") {
        Some(Value::Object(yolo)) => yolo,
        _ => {
            return VisionUpdate {
                person: None,
                conf: None,
            };
        }
    };

    let person = yolo.get("person").and_then(Value::as_bool);
    let conf = match yolo.get("best") {
        Some(Value::Object(best)) => best.get("conf").and_then(Value::as_f64),
        _ => None,
    };

    VisionUpdate { person, conf }
}

// ===== outbound builders =====

/// Steering command for the robot, e.g. `{"type":"CMD","cmd":"LEFT"}`.
pub fn cmd_line(cmd: &str) -> String {
    json!({ "type": "CMD", "cmd": cmd }).to_string()
}

/// Speech for the robot's TTS output.
pub fn tts_line(text: &str) -> String {
    json!({ "type": "TTS", "text": text }).to_string()
}

/// Operator-facing message for the console.
pub fn gui_message_line(text: &str) -> String {
    json!({ "type": "GUI_MESSAGE", "text": text }).to_string()
}

/// A relayed video frame, base64-encoded for the console's JSON stream.
pub fn image_line(b64: &str) -> String {
    json!({ "type": "IMAGE", "data": b64 }).to_string()
}

/// Vision event carrying the (possibly rewritten) detection payload.
pub fn vision_event_line(path: &str, ts_ms: i64, yolo: &Value) -> String {
    json!({ "type": "VISION", "path": path, "ts": ts_ms, "yolo": yolo }).to_string()
}

/// Structured notice to the console that an inference cycle failed.
pub fn vision_failure_line(error: &str, path: &str) -> String {
    json!({ "type": "VISION", "ok": false, "error": error, "path": path }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_sensor() {
        let msg = Inbound::parse(r#"{"type":"SENSOR","name":"CO2","value":612.5}"#);
        assert_eq!(msg, Inbound::Sensor(SensorReading::Co2(612.5)));

        let msg = Inbound::parse(r#"{"type":"SENSOR","name":"PIR","detected":true}"#);
        assert_eq!(msg, Inbound::Sensor(SensorReading::Pir(true)));

        let msg = Inbound::parse(r#"{"type":"SENSOR","name":"ULTRASONIC","distance":42.0}"#);
        assert_eq!(msg, Inbound::Sensor(SensorReading::Ultrasonic(42.0)));
    }

    #[test]
    fn test_parse_dust_with_missing_subfields() {
        let msg = Inbound::parse(r#"{"type":"SENSOR","name":"DUST","pm25":18.2}"#);
        assert_eq!(
            msg,
            Inbound::Sensor(SensorReading::Dust {
                pm25: Some(18.2),
                pm10: None
            })
        );

        // Both absent still parses; the router turns it into a no-op.
        let msg = Inbound::parse(r#"{"type":"SENSOR","name":"DUST"}"#);
        assert_eq!(
            msg,
            Inbound::Sensor(SensorReading::Dust {
                pm25: None,
                pm10: None
            })
        );
    }

    #[test]
    fn test_parse_combined_sensor() {
        let msg = Inbound::parse(
            r#"{"type":"SENSOR","fire":true,"gas":700.0,"dust":{"pm25":11.0,"pm10":21.0}}"#,
        );
        assert_eq!(
            msg,
            Inbound::Sensor(SensorReading::Composite {
                fire: Some(true),
                co2: Some(700.0),
                pm25: Some(11.0),
                pm10: Some(21.0),
            })
        );
    }

    #[test]
    fn test_co2_ppm_preferred_over_gas() {
        let msg = Inbound::parse(r#"{"type":"SENSOR","co2_ppm":500.0,"gas":900.0}"#);
        assert_eq!(
            msg,
            Inbound::Sensor(SensorReading::Composite {
                fire: None,
                co2: Some(500.0),
                pm25: None,
                pm10: None,
            })
        );
    }

    #[test]
    fn test_parse_stt() {
        let msg = Inbound::parse(r#"{"type":"STT","text":"help me"}"#);
        assert_eq!(
            msg,
            Inbound::Stt {
                text: "help me".to_string()
            }
        );
    }

    #[test]
    fn test_parse_vision() {
        let msg = Inbound::parse(
            r#"{"type":"VISION","ts":123,"yolo":{"person":true,"best":{"conf":0.87,"xyxy":[1,2,3,4]}}}"#,
        );
        assert_eq!(
            msg,
            Inbound::Vision(VisionUpdate {
                person: Some(true),
                conf: Some(0.87)
            })
        );
    }

    #[test]
    fn test_unknown_and_garbage_are_unrecognized() {
        let msg = Inbound::parse(r#"{"type":"PAD","lx":0.1,"ly":0.2,"rx":0.0}"#);
        assert_eq!(
            msg,
            Inbound::Unrecognized {
                type_name: Some("PAD".to_string())
            }
        );

        let msg = Inbound::parse("not json at all");
        assert_eq!(msg, Inbound::Unrecognized { type_name: None });
    }

    #[test]
    fn test_cmd_line_shape() {
        let line = cmd_line("LEFT");
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["type"], "CMD");
        assert_eq!(v["cmd"], "LEFT");
    }
}
