// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record shapes and the built-in field templates.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How a template field gets its value and how it is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Next record value, emitted unquoted when it is a valid JSON number.
    Number,
    /// Next record value, emitted as a JSON string.
    Text,
    /// Fixed string, consumes no record value.
    Constant { value: String },
    /// Checksum trailer split off the last record value.
    Checksum,
}

/// One output key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn number(name: &str) -> Self {
        Self::with_kind(name, FieldKind::Number)
    }

    pub fn text(name: &str) -> Self {
        Self::with_kind(name, FieldKind::Text)
    }

    pub fn constant(name: &str, value: &str) -> Self {
        Self::with_kind(
            name,
            FieldKind::Constant {
                value: value.to_string(),
            },
        )
    }

    pub fn checksum(name: &str) -> Self {
        Self::with_kind(name, FieldKind::Checksum)
    }

    fn with_kind(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    /// True if the field takes its value from the record.
    pub fn consumes_value(&self) -> bool {
        matches!(self.kind, FieldKind::Number | FieldKind::Text)
    }
}

/// Field template of one record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordShape {
    /// Sentence type code (`GGA`) or a descriptive name.
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl RecordShape {
    pub fn new(name: &str, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.to_string(),
            fields,
        }
    }

    /// Number of record values the template consumes.
    pub fn value_count(&self) -> usize {
        self.fields.iter().filter(|f| f.consumes_value()).count()
    }

    /// True if the template carries a checksum field.
    pub fn has_checksum(&self) -> bool {
        self.fields
            .iter()
            .any(|f| matches!(f.kind, FieldKind::Checksum))
    }

    /// Check the template is usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("record shape has an empty name".to_string());
        }
        if self.value_count() == 0 {
            return Err(format!("{}: template consumes no record value", self.name));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(format!("{}: field with empty name", self.name));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(format!("{}: duplicate field '{}'", self.name, field.name));
            }
        }

        let checksums = self
            .fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Checksum))
            .count();
        if checksums > 1 {
            return Err(format!("{}: more than one checksum field", self.name));
        }
        Ok(())
    }
}

/// GPS fix data.
pub fn gga() -> RecordShape {
    RecordShape::new(
        "GGA",
        vec![
            FieldSpec::number("time_delta"),
            FieldSpec::constant("type", "gga"),
            FieldSpec::number("time"),
            FieldSpec::number("latitude"),
            FieldSpec::text("latitude_ns"),
            FieldSpec::number("longitude"),
            FieldSpec::text("longitude_ew"),
            FieldSpec::number("fix_quality"),
            FieldSpec::number("satellites"),
            FieldSpec::number("horizontal_dilution"),
            FieldSpec::number("altitude"),
            FieldSpec::text("altitude_units"),
            FieldSpec::number("geoid_height"),
            FieldSpec::text("geoid_height_units"),
            FieldSpec::number("delta_last_dgps"),
            FieldSpec::number("dgps_station_id"),
            FieldSpec::checksum("checksum"),
        ],
    )
}

/// Recommended minimum navigation data.
pub fn rmc() -> RecordShape {
    RecordShape::new(
        "RMC",
        vec![
            FieldSpec::number("time_delta"),
            FieldSpec::constant("type", "rmc"),
            FieldSpec::number("time"),
            FieldSpec::text("status"),
            FieldSpec::number("latitude"),
            FieldSpec::text("latitude_ns"),
            FieldSpec::number("longitude"),
            FieldSpec::text("longitude_ew"),
            FieldSpec::number("speed"),
            FieldSpec::number("track_angle"),
            FieldSpec::number("date"),
            FieldSpec::number("magnetic_variation"),
            FieldSpec::text("magnetic_variation_dir"),
            FieldSpec::text("mode"),
            FieldSpec::checksum("checksum"),
        ],
    )
}

/// Track made good and ground speed.
pub fn vtg() -> RecordShape {
    RecordShape::new(
        "VTG",
        vec![
            FieldSpec::number("time_delta"),
            FieldSpec::constant("type", "vtg"),
            FieldSpec::number("true_track"),
            FieldSpec::text("true_track_fixed"),
            FieldSpec::number("magnetic_track"),
            FieldSpec::text("magnetic_track_fixed"),
            FieldSpec::number("ground_speed_knots"),
            FieldSpec::text("ground_speed_knots_units"),
            FieldSpec::number("ground_speed_kmh"),
            FieldSpec::text("ground_speed_kmh_units"),
            FieldSpec::text("mode"),
            FieldSpec::checksum("checksum"),
        ],
    )
}

/// Generic `time_delta,pid,value` reading.
pub fn pid() -> RecordShape {
    RecordShape::new(
        "pid",
        vec![
            FieldSpec::number("time_delta"),
            FieldSpec::text("pid"),
            FieldSpec::number("value"),
        ],
    )
}

/// Three-axis accelerometer sample.
pub fn accelerometer() -> RecordShape {
    RecordShape::new(
        "accelerometer",
        vec![
            FieldSpec::number("time_delta"),
            FieldSpec::text("pid"),
            FieldSpec::number("x_accel"),
            FieldSpec::number("y_accel"),
            FieldSpec::number("z_accel"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_shapes_are_valid() {
        for shape in [gga(), rmc(), vtg(), pid(), accelerometer()] {
            shape.validate().expect("valid shape");
        }
    }

    #[test]
    fn test_value_counts_match_sentence_layout() {
        // time_delta plus the fields after the sentence type
        assert_eq!(gga().value_count(), 15);
        assert_eq!(rmc().value_count(), 13);
        assert_eq!(vtg().value_count(), 10);
        assert_eq!(pid().value_count(), 3);
        assert_eq!(accelerometer().value_count(), 5);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let shape = RecordShape::new(
            "dup",
            vec![FieldSpec::number("a"), FieldSpec::text("a")],
        );
        assert!(shape.validate().is_err());
    }

    #[test]
    fn test_field_spec_serde() {
        let json = serde_json::to_string(&FieldSpec::constant("type", "gga")).expect("serialize");
        assert_eq!(json, r#"{"name":"type","kind":"constant","value":"gga"}"#);

        let parsed: FieldSpec =
            serde_json::from_str(r#"{"name":"speed","kind":"number"}"#).expect("deserialize");
        assert_eq!(parsed, FieldSpec::number("speed"));
    }
}
