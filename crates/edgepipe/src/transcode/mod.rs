// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stanza to JSON transcoding.
//!
//! Dispatch, first match wins:
//!
//! 1. more than two commas and field 1 names a known sentence, either as a
//!    talker prefix plus type code (`$GPGGA`) or as the bare code (`GGA`):
//!    that sentence template. A talker prefix with an unknown code is
//!    reported as [`TranscodeError::UnknownSentence`];
//! 2. exactly four commas and field 1 is the accelerometer sensor id:
//!    accelerometer template;
//! 3. exactly two commas: `time_delta,pid,value` template;
//! 4. anything else is not telemetry, `Ok(None)`.
//!
//! Empty record values produce no key at all. Documents are rendered as
//! `{ "key": value, ... }` into a buffer sized for the worst case.

pub mod template;

pub use template::{FieldKind, FieldSpec, RecordShape};

use crate::framer::Stanza;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Worst-case growth of one input byte once escaped (`\u00XX`).
const MAX_ESCAPE: usize = 6;

/// Per-field framing bytes: `", "`, key quotes, `": "`, value quotes.
const FIELD_OVERHEAD: usize = 8;

/// Transcoding errors. None of them is fatal to the pipeline.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("unknown sentence type {0:?}")]
    UnknownSentence(String),

    #[error("{shape}: expected {expected} values, found {found}")]
    FieldCount {
        shape: String,
        expected: usize,
        found: usize,
    },

    #[error("document needs {needed} bytes, budget is {budget}")]
    Overflow { needed: usize, budget: usize },

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Record shapes and dispatch literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Satellite talker prefixes preceding the three-letter sentence code.
    #[serde(default = "default_talker_prefixes")]
    pub talker_prefixes: Vec<String>,

    /// Sentence templates, matched case-insensitively by name.
    #[serde(default = "default_sentences")]
    pub sentences: Vec<RecordShape>,

    /// Sensor id selecting the accelerometer template.
    #[serde(default = "default_accelerometer_id")]
    pub accelerometer_id: String,

    #[serde(default = "template::accelerometer")]
    pub accelerometer: RecordShape,

    #[serde(default = "template::pid")]
    pub pid: RecordShape,
}

fn default_talker_prefixes() -> Vec<String> {
    vec!["$GP".to_string(), "$GN".to_string(), "$GL".to_string()]
}

fn default_sentences() -> Vec<RecordShape> {
    vec![template::gga(), template::rmc(), template::vtg()]
}

fn default_accelerometer_id() -> String {
    "20".to_string()
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            talker_prefixes: default_talker_prefixes(),
            sentences: default_sentences(),
            accelerometer_id: default_accelerometer_id(),
            accelerometer: template::accelerometer(),
            pid: template::pid(),
        }
    }
}

impl TranscoderConfig {
    /// Check every template and dispatch literal.
    pub fn validate(&self) -> Result<(), String> {
        if self.talker_prefixes.iter().any(|p| p.is_empty()) {
            return Err("talker prefixes must not be empty".to_string());
        }
        if self.accelerometer_id.is_empty() {
            return Err("accelerometer_id must not be empty".to_string());
        }
        for shape in &self.sentences {
            shape.validate()?;
            if shape.name.len() != 3 {
                return Err(format!(
                    "sentence '{}': name must be a three-letter type code",
                    shape.name
                ));
            }
        }
        self.accelerometer.validate()?;
        self.pid.validate()?;
        if self.accelerometer.value_count() != 5 {
            return Err("accelerometer template must consume 5 values".to_string());
        }
        if self.pid.value_count() != 3 {
            return Err("pid template must consume 3 values".to_string());
        }
        Ok(())
    }
}

/// A template with its precomputed fixed overhead.
#[derive(Debug)]
struct Plan {
    shape: RecordShape,
    values: usize,
    overhead: usize,
}

impl Plan {
    fn new(shape: RecordShape) -> Self {
        let overhead = shape
            .fields
            .iter()
            .map(|f| {
                let constant = match &f.kind {
                    FieldKind::Constant { value } => value.len() * MAX_ESCAPE,
                    _ => 0,
                };
                f.name.len() * MAX_ESCAPE + FIELD_OVERHEAD + constant
            })
            .sum::<usize>()
            + 4;
        Self {
            values: shape.value_count(),
            shape,
            overhead,
        }
    }
}

/// Which record fields feed the template.
#[derive(Debug, Clone, Copy)]
enum Layout {
    /// Every field except the sentence type at index 1.
    Sentence,
    /// Every field.
    Flat,
}

/// Converts stanzas into JSON documents.
#[derive(Debug)]
pub struct Transcoder {
    talker_prefixes: Vec<String>,
    sentences: Vec<Plan>,
    accelerometer_id: String,
    accelerometer: Plan,
    pid: Plan,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new(TranscoderConfig::default())
    }
}

impl Transcoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self {
            talker_prefixes: config.talker_prefixes,
            sentences: config.sentences.into_iter().map(Plan::new).collect(),
            accelerometer_id: config.accelerometer_id,
            accelerometer: Plan::new(config.accelerometer),
            pid: Plan::new(config.pid),
        }
    }

    /// Transcode one stanza.
    ///
    /// Returns `Ok(None)` for lines that are not telemetry.
    pub fn transcode(&self, stanza: &Stanza<'_>) -> Result<Option<Vec<u8>>, TranscodeError> {
        let commas = stanza.comma_count();

        if commas > 2 {
            if let Some(plan) = self.sentence_plan(stanza)? {
                return self.render(plan, stanza, Layout::Sentence).map(Some);
            }
        }

        if commas == 4 {
            let is_accel = stanza
                .field(1)
                .is_some_and(|id| id.eq_ignore_ascii_case(self.accelerometer_id.as_bytes()));
            if is_accel {
                return self.render(&self.accelerometer, stanza, Layout::Flat).map(Some);
            }
        }

        if commas == 2 {
            return self.render(&self.pid, stanza, Layout::Flat).map(Some);
        }

        Ok(None)
    }

    fn sentence_plan(&self, stanza: &Stanza<'_>) -> Result<Option<&Plan>, TranscodeError> {
        let Some(kind) = stanza.field(1) else {
            return Ok(None);
        };

        for prefix in &self.talker_prefixes {
            let prefix = prefix.as_bytes();
            if kind.len() == prefix.len() + 3 && kind[..prefix.len()].eq_ignore_ascii_case(prefix) {
                let code = &kind[prefix.len()..];
                return match self.find_sentence(code) {
                    Some(plan) => Ok(Some(plan)),
                    None => Err(TranscodeError::UnknownSentence(
                        String::from_utf8_lossy(code).into_owned(),
                    )),
                };
            }
        }

        if kind.len() == 3 {
            return Ok(self.find_sentence(kind));
        }
        Ok(None)
    }

    fn find_sentence(&self, code: &[u8]) -> Option<&Plan> {
        self.sentences
            .iter()
            .find(|plan| plan.shape.name.as_bytes().eq_ignore_ascii_case(code))
    }

    fn render(
        &self,
        plan: &Plan,
        stanza: &Stanza<'_>,
        layout: Layout,
    ) -> Result<Vec<u8>, TranscodeError> {
        let mut values: Vec<&[u8]> = match layout {
            Layout::Sentence => stanza
                .fields()
                .enumerate()
                .filter(|(i, _)| *i != 1)
                .map(|(_, f)| f)
                .collect(),
            Layout::Flat => stanza.fields().collect(),
        };

        if values.len() != plan.values {
            return Err(TranscodeError::FieldCount {
                shape: plan.shape.name.clone(),
                expected: plan.values,
                found: values.len(),
            });
        }

        let mut checksum: &[u8] = &[];
        if plan.shape.has_checksum() {
            if let Some(&last) = values.last() {
                if let Some(star) = last.iter().rposition(|&b| b == b'*') {
                    checksum = &last[star + 1..];
                    let end = values.len() - 1;
                    values[end] = &last[..star];
                }
            }
        }

        let budget = plan.overhead + stanza.len() * MAX_ESCAPE;
        let mut out = Vec::with_capacity(budget);
        let mut values = values.into_iter();
        let mut first = true;

        out.push(b'{');
        for field in &plan.shape.fields {
            let value = match &field.kind {
                FieldKind::Number | FieldKind::Text => values.next().unwrap_or_default(),
                FieldKind::Constant { value } => value.as_bytes(),
                FieldKind::Checksum => checksum,
            };
            if value.is_empty() {
                continue;
            }

            out.extend_from_slice(if first { &b" "[..] } else { &b", "[..] });
            first = false;
            serde_json::to_writer(&mut out, &field.name)?;
            out.extend_from_slice(b": ");

            match (&field.kind, as_json_number(value)) {
                (FieldKind::Number, Some(number)) => out.extend_from_slice(number.as_bytes()),
                _ => serde_json::to_writer(&mut out, &*String::from_utf8_lossy(value))?,
            }
        }
        out.extend_from_slice(if first { &b"}"[..] } else { &b" }"[..] });

        if out.len() > budget {
            return Err(TranscodeError::Overflow {
                needed: out.len(),
                budget,
            });
        }
        Ok(out)
    }
}

/// The value as text, if it is a valid JSON number literal.
fn as_json_number(value: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(value).ok()?;
    text.parse::<serde_json::Number>().ok().map(|_| text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::stanza::comma_offsets;
    use serde_json::{json, Value};

    fn run(transcoder: &Transcoder, line: &str) -> Result<Option<Value>, TranscodeError> {
        let commas = comma_offsets(line.as_bytes());
        let stanza = Stanza::new(line.as_bytes(), &commas);
        Ok(transcoder
            .transcode(&stanza)?
            .map(|doc| serde_json::from_slice(&doc).expect("valid JSON")))
    }

    fn text(transcoder: &Transcoder, line: &str) -> String {
        let commas = comma_offsets(line.as_bytes());
        let stanza = Stanza::new(line.as_bytes(), &commas);
        let doc = transcoder.transcode(&stanza).expect("transcode").expect("document");
        String::from_utf8(doc).expect("utf8")
    }

    #[test]
    fn test_pid_record() {
        let t = Transcoder::default();
        assert_eq!(
            text(&t, "100,42,3.5"),
            r#"{ "time_delta": 100, "pid": "42", "value": 3.5 }"#
        );
    }

    #[test]
    fn test_accelerometer_record() {
        let t = Transcoder::default();
        let doc = run(&t, "100,20,1.1,2.2,3.3").expect("transcode").expect("document");
        assert_eq!(
            doc,
            json!({"time_delta": 100, "pid": "20", "x_accel": 1.1, "y_accel": 2.2, "z_accel": 3.3})
        );
    }

    #[test]
    fn test_four_commas_other_sensor_dropped() {
        let t = Transcoder::default();
        assert!(run(&t, "100,21,1.1,2.2,3.3").expect("transcode").is_none());
    }

    #[test]
    fn test_gga_sentence() {
        let t = Transcoder::default();
        let line = "123.4,$GPGGA,092750.000,5321.6802,N,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,*1A";
        let doc = run(&t, line).expect("transcode").expect("document");

        assert_eq!(doc["type"], "gga");
        assert_eq!(doc["time_delta"], json!(123.4));
        assert_eq!(doc["time"], "092750.000");
        assert_eq!(doc["latitude"], json!(5321.6802));
        assert_eq!(doc["latitude_ns"], "N");
        assert_eq!(doc["longitude_ew"], "W");
        assert_eq!(doc["satellites"], json!(8));
        assert_eq!(doc["checksum"], "1A");
        assert!(doc.get("delta_last_dgps").is_none());
        assert!(doc.get("dgps_station_id").is_none());
    }

    #[test]
    fn test_bare_sentence_code() {
        let t = Transcoder::default();
        let line = "123.4,GGA,1,2,N,3,W,1,8,1.0,61.7,M,55.2,M,,*1A";
        let doc = run(&t, line).expect("transcode").expect("document");
        assert_eq!(doc["type"], "gga");
        assert_eq!(doc["checksum"], "1A");
    }

    #[test]
    fn test_lowercase_sentence_code() {
        let t = Transcoder::default();
        let doc = run(&t, "5,$gpvtg,054.7,T,034.4,M,005.5,N,010.2,K,A*25")
            .expect("transcode")
            .expect("document");
        assert_eq!(doc["type"], "vtg");
        assert_eq!(doc["ground_speed_kmh_units"], "K");
        assert_eq!(doc["mode"], "A");
        assert_eq!(doc["checksum"], "25");
    }

    #[test]
    fn test_unknown_sentence_reported() {
        let t = Transcoder::default();
        let err = run(&t, "1,$GPXYZ,a,b,c").expect_err("unknown sentence");
        assert!(matches!(err, TranscodeError::UnknownSentence(code) if code == "XYZ"));
    }

    #[test]
    fn test_sentence_field_count_mismatch() {
        let t = Transcoder::default();
        let err = run(&t, "1,$GPRMC,a,b,c").expect_err("short sentence");
        assert!(matches!(
            err,
            TranscodeError::FieldCount { expected: 13, found: 4, .. }
        ));
    }

    #[test]
    fn test_unrecognized_lines_dropped() {
        let t = Transcoder::default();
        assert!(run(&t, "hello world").expect("transcode").is_none());
        assert!(run(&t, "a,b,c,d,e,f").expect("transcode").is_none());
        assert!(run(&t, "1,2").expect("transcode").is_none());
    }

    #[test]
    fn test_empty_values_omitted() {
        let t = Transcoder::default();
        assert_eq!(text(&t, "100,42,"), r#"{ "time_delta": 100, "pid": "42" }"#);
        assert_eq!(text(&t, ",,"), "{}");
    }

    #[test]
    fn test_sparse_fields_match_source() {
        let t = Transcoder::default();
        let line = "7,$GPRMC,092750.000,A,,N,,W,0.02,,,,,A*43";
        let doc = run(&t, line).expect("transcode").expect("document");
        let keys: Vec<&str> = doc
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        let mut expected = vec![
            "time_delta", "type", "time", "status", "latitude_ns", "longitude_ew", "speed",
            "mode", "checksum",
        ];
        let mut keys = keys;
        keys.sort_unstable();
        expected.sort_unstable();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_transcoding_is_deterministic() {
        let t = Transcoder::default();
        let line = "7,$GPRMC,092750.000,A,5321.6802,N,00630.3372,W,0.02,31.66,280511,,,A*43";
        assert_eq!(text(&t, line), text(&t, line));
    }

    #[test]
    fn test_non_numeric_number_is_quoted() {
        let t = Transcoder::default();
        let doc = run(&t, "abc,42,1e3").expect("transcode").expect("document");
        assert_eq!(doc["time_delta"], "abc");
        assert_eq!(doc["value"], json!(1000.0));
    }

    #[test]
    fn test_text_is_escaped() {
        let t = Transcoder::default();
        let doc = run(&t, "1,\"quoted\\\",2").expect("transcode").expect("document");
        assert_eq!(doc["pid"], "\"quoted\\\"");
    }

    #[test]
    fn test_custom_sentence_table() {
        let mut config = TranscoderConfig::default();
        config.sentences.push(RecordShape::new(
            "GSA",
            vec![
                FieldSpec::number("time_delta"),
                FieldSpec::constant("type", "gsa"),
                FieldSpec::text("mode"),
                FieldSpec::number("fix"),
                FieldSpec::checksum("checksum"),
            ],
        ));
        config.validate().expect("valid config");

        let t = Transcoder::new(config);
        let doc = run(&t, "3,$GNGSA,A,3*2E").expect("transcode").expect("document");
        assert_eq!(doc, json!({"time_delta": 3, "type": "gsa", "mode": "A", "fix": 3, "checksum": "2E"}));
    }

    #[test]
    fn test_config_rejects_long_sentence_code() {
        let mut config = TranscoderConfig::default();
        config.sentences[0].name = "GGAX".to_string();
        assert!(config.validate().is_err());
    }
}
