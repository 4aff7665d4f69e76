// ── Snapshot normalizer ──
//
// Pure mapping from a raw vendor payload plus a schema to a canonical
// snapshot. Vendor keys often contain dots themselves, so every lookup
// tries the literal key before walking a dotted path.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use bindery_api::RawPayload;

use crate::model::{DeviceIdentity, FieldValue, Snapshot};
use crate::schema::{FieldKind, FieldSpec, Schema, WHOLE_PAYLOAD};

/// The payload does not match the schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("root '{root}' not found in payload")]
    MissingRoot { root: String },

    #[error("required field '{channel}' missing (looked for {paths:?})")]
    MissingField { channel: String, paths: Vec<String> },

    #[error("field '{channel}' at '{path}': expected {expected}, got {found}")]
    InvalidValue {
        channel: String,
        path: String,
        expected: FieldKind,
        found: String,
    },
}

/// Normalize `payload` for `device` according to `schema`.
///
/// Identical inputs always produce identical snapshots; the capture
/// time is supplied by the caller.
pub fn normalize(
    payload: &RawPayload,
    schema: &Schema,
    device: &DeviceIdentity,
    captured_at: DateTime<Utc>,
) -> Result<Snapshot, NormalizeError> {
    let (fields, online) = match payload {
        RawPayload::Json(value) => normalize_json(value, schema)?,
        RawPayload::KeyValue(map) => (normalize_key_value(map, schema)?, true),
        RawPayload::Binary { media_type, data } => {
            (normalize_binary(media_type, data, schema)?, true)
        }
    };

    Ok(Snapshot {
        device: device.device.clone(),
        device_type: device.device_type.clone(),
        captured_at,
        fields,
        online,
    })
}

// ── JSON ────────────────────────────────────────────────────────────

fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    if key == WHOLE_PAYLOAD {
        return Some(value);
    }
    if let Some(found) = value.get(key) {
        return Some(found);
    }
    if !key.contains('.') {
        return None;
    }
    key.split('.').try_fold(value, |v, part| v.get(part))
}

fn normalize_json(
    value: &Value,
    schema: &Schema,
) -> Result<(BTreeMap<String, FieldValue>, bool), NormalizeError> {
    let node = match &schema.root {
        Some(root) => lookup(value, root)
            .filter(|v| !v.is_null())
            .ok_or_else(|| NormalizeError::MissingRoot { root: root.clone() })?,
        None => value,
    };

    let online = match &schema.online_field {
        Some(path) => match lookup(node, path) {
            None | Some(Value::Null) => true,
            Some(flag) => json_bool(flag).ok_or_else(|| NormalizeError::InvalidValue {
                channel: "online".into(),
                path: path.clone(),
                expected: FieldKind::Boolean,
                found: describe(flag),
            })?,
        },
        None => true,
    };

    let mut fields = BTreeMap::new();
    for spec in &schema.fields {
        let found = spec
            .paths
            .iter()
            .find_map(|p| lookup(node, p).filter(|v| !v.is_null()).map(|v| (p, v)));
        let field = match found {
            Some((path, raw)) => convert_json(spec, path, raw)?,
            None => absent(spec)?,
        };
        fields.insert(spec.channel.clone(), field);
    }
    Ok((fields, online))
}

fn convert_json(spec: &FieldSpec, path: &str, raw: &Value) -> Result<FieldValue, NormalizeError> {
    let converted = match (spec.kind, raw) {
        (FieldKind::Integer, Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(integral))
            .map(FieldValue::Integer),
        (FieldKind::Decimal, Value::Number(n)) => n.as_f64().map(FieldValue::Decimal),
        (FieldKind::Boolean, v) => json_bool(v).map(FieldValue::Boolean),
        (FieldKind::Text, Value::String(s)) => Some(FieldValue::Text(s.clone())),
        (FieldKind::Text, Value::Number(n)) => Some(FieldValue::Text(n.to_string())),
        (FieldKind::Text, Value::Bool(b)) => Some(FieldValue::Text(b.to_string())),
        (FieldKind::Binary, Value::String(s)) => {
            BASE64.decode(s).ok().map(|data| FieldValue::Binary {
                media_type: "application/octet-stream".into(),
                data: Bytes::from(data),
            })
        }
        (kind, Value::String(s)) => parse_text(kind, s),
        _ => None,
    };
    converted.ok_or_else(|| invalid(spec, path, describe(raw)))
}

fn json_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => parse_bool(s),
        _ => None,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string '{s}'"),
        Value::Array(_) => "array".into(),
        Value::Object(_) => "object".into(),
    }
}

// ── key=value ───────────────────────────────────────────────────────

fn normalize_key_value(
    map: &BTreeMap<String, String>,
    schema: &Schema,
) -> Result<BTreeMap<String, FieldValue>, NormalizeError> {
    let key_for = |path: &str| match &schema.root {
        Some(root) => format!("{root}.{path}"),
        None => path.to_owned(),
    };

    let mut fields = BTreeMap::new();
    for spec in &schema.fields {
        let found = spec.paths.iter().find_map(|p| {
            let key = key_for(p);
            map.get(&key).map(|v| (key, v))
        });
        let field = match found {
            Some((key, raw)) => {
                parse_text(spec.kind, raw).ok_or_else(|| invalid(spec, &key, format!("'{raw}'")))?
            }
            None => absent(spec)?,
        };
        fields.insert(spec.channel.clone(), field);
    }
    Ok(fields)
}

// ── Binary ──────────────────────────────────────────────────────────

fn normalize_binary(
    media_type: &str,
    data: &Bytes,
    schema: &Schema,
) -> Result<BTreeMap<String, FieldValue>, NormalizeError> {
    let mut fields = BTreeMap::new();
    for spec in &schema.fields {
        let claims_body =
            spec.kind == FieldKind::Binary && spec.paths.iter().any(|p| p == WHOLE_PAYLOAD);
        let field = if claims_body {
            FieldValue::Binary {
                media_type: media_type.to_owned(),
                data: data.clone(),
            }
        } else {
            absent(spec)?
        };
        fields.insert(spec.channel.clone(), field);
    }
    Ok(fields)
}

// ── Shared helpers ──────────────────────────────────────────────────

fn absent(spec: &FieldSpec) -> Result<FieldValue, NormalizeError> {
    if spec.required {
        Err(NormalizeError::MissingField {
            channel: spec.channel.clone(),
            paths: spec.paths.clone(),
        })
    } else {
        Ok(FieldValue::Undefined)
    }
}

fn invalid(spec: &FieldSpec, path: &str, found: String) -> NormalizeError {
    NormalizeError::InvalidValue {
        channel: spec.channel.clone(),
        path: path.to_owned(),
        expected: spec.kind,
        found,
    }
}

fn parse_text(kind: FieldKind, raw: &str) -> Option<FieldValue> {
    let s = raw.trim();
    match kind {
        FieldKind::Integer => s
            .parse::<i64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().and_then(integral))
            .map(FieldValue::Integer),
        FieldKind::Decimal => s
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(FieldValue::Decimal),
        FieldKind::Boolean => parse_bool(s).map(FieldValue::Boolean),
        FieldKind::Text => Some(FieldValue::Text(raw.to_owned())),
        FieldKind::Binary => BASE64.decode(s).ok().map(|data| FieldValue::Binary {
            media_type: "application/octet-stream".into(),
            data: Bytes::from(data),
        }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Some(true),
        "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// `21.0` is an integer, `21.5` is not.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn integral(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 {
        Some(v as i64)
    } else {
        None
    }
}
