// ── Normalization schemas ──
//
// A schema tells the normalizer where each channel lives in a vendor
// payload and what type it has. Schemas are looked up by device type;
// built-ins cover the appliance families we ship with and configuration
// can add more.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::model::DeviceType;

/// Declared type of a channel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Decimal,
    Text,
    Boolean,
    Binary,
}

/// Path used by a field to claim the whole payload (binary bodies).
pub const WHOLE_PAYLOAD: &str = ".";

/// One channel of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub channel: String,
    /// Primary key followed by aliases, tried in order. Accepts a single
    /// string as `path` in configuration.
    #[serde(alias = "path", deserialize_with = "one_or_many")]
    pub paths: Vec<String>,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    pub fn optional(channel: &str, paths: &[&str], kind: FieldKind) -> Self {
        Self {
            channel: channel.to_owned(),
            paths: paths.iter().map(|p| (*p).to_owned()).collect(),
            kind,
            required: false,
        }
    }

    pub fn required(channel: &str, paths: &[&str], kind: FieldKind) -> Self {
        Self {
            required: true,
            ..Self::optional(channel, paths, kind)
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(p) => vec![p],
        OneOrMany::Many(ps) => ps,
    })
}

/// Shape description for one device type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    /// Sub-tree holding the fields (exact key, then dotted path).
    #[serde(default)]
    pub root: Option<String>,
    /// Boolean flag inside the root reporting vendor-side reachability.
    #[serde(default)]
    pub online_field: Option<String>,
    pub fields: Vec<FieldSpec>,
}

// ── Built-ins ───────────────────────────────────────────────────────

fn lg_snapshot(fields: Vec<FieldSpec>) -> Schema {
    Schema {
        root: Some("result.snapshot".into()),
        online_field: Some("online".into()),
        fields,
    }
}

fn air_conditioner() -> Schema {
    use FieldKind::{Decimal, Integer};
    lg_snapshot(vec![
        FieldSpec::required("power", &["airState.operation", "Operation"], FieldKind::Boolean),
        FieldSpec::optional("op-mode", &["airState.opMode", "OpMode"], Integer),
        FieldSpec::optional("fan-speed", &["airState.windStrength", "WindStrength"], Integer),
        FieldSpec::optional(
            "target-temperature",
            &["airState.tempState.target", "TempCfg"],
            Decimal,
        ),
        FieldSpec::optional(
            "current-temperature",
            &["airState.tempState.current", "TempCur"],
            Decimal,
        ),
        FieldSpec::optional("remaining-filter", &["airState.filterMngStates.useTime"], Integer),
        FieldSpec::optional("current-energy", &["airState.energy.onCurrent"], Decimal),
    ])
}

fn heat_pump() -> Schema {
    use FieldKind::{Decimal, Integer};
    lg_snapshot(vec![
        FieldSpec::required("power", &["airState.operation", "Operation"], FieldKind::Boolean),
        FieldSpec::optional("op-mode", &["airState.opMode", "OpMode"], Integer),
        FieldSpec::optional(
            "target-temperature",
            &["airState.tempState.target", "TempCfg"],
            Decimal,
        ),
        FieldSpec::optional(
            "current-temperature",
            &["airState.tempState.current", "TempCur"],
            Decimal,
        ),
        FieldSpec::optional("min-temperature", &["airState.tempState.min"], Decimal),
        FieldSpec::optional("max-temperature", &["airState.tempState.max"], Decimal),
    ])
}

fn washer() -> Schema {
    use FieldKind::{Integer, Text};
    lg_snapshot(vec![
        FieldSpec::required("state", &["washerDryer.state", "State"], Text),
        FieldSpec::optional("process-state", &["washerDryer.processState", "ProcessState"], Text),
        FieldSpec::optional("course", &["washerDryer.courseFL24inchBaseTitan", "Course"], Text),
        FieldSpec::optional("spin", &["washerDryer.spin", "SpinSpeed"], Text),
        FieldSpec::optional("rinse", &["washerDryer.rinse", "RinseOption"], Text),
        FieldSpec::optional(
            "remain-time",
            &["washerDryer.remainTimeMinute", "Remain_Time_M"],
            Integer,
        ),
        FieldSpec::optional(
            "door-lock",
            &["washerDryer.doorLock", "DoorLock"],
            FieldKind::Boolean,
        ),
        FieldSpec::optional(
            "remote-start-flag",
            &["washerDryer.remoteStart", "RemoteStart"],
            FieldKind::Boolean,
        ),
    ])
}

fn fridge() -> Schema {
    use FieldKind::{Boolean, Decimal, Text};
    lg_snapshot(vec![
        FieldSpec::required(
            "fridge-temperature",
            &["refState.fridgeTemp", "TempRefrigerator"],
            Decimal,
        ),
        FieldSpec::required(
            "freezer-temperature",
            &["refState.freezerTemp", "TempFreezer"],
            Decimal,
        ),
        FieldSpec::optional("temp-unit", &["refState.tempUnit", "TempUnit"], Text),
        FieldSpec::optional(
            "some-door-open",
            &["refState.atLeastOneDoorOpen", "DoorOpenState"],
            Boolean,
        ),
        FieldSpec::optional(
            "fr-express-mode",
            &["refState.expressMode", "IcePlus"],
            Text,
        ),
        FieldSpec::optional(
            "fr-eco-friendly-mode",
            &["refState.ecoFriendly", "EcoFriendly"],
            Boolean,
        ),
        FieldSpec::optional(
            "fr-water-filter",
            &["refState.waterFilterUsedMonth", "WaterFilterUsedMonth"],
            Text,
        ),
    ])
}

/// DVR channel snapshot: the JPEG body is the only field.
fn dvr_channel() -> Schema {
    Schema {
        root: None,
        online_field: None,
        fields: vec![FieldSpec::required(
            "snapshot",
            &[WHOLE_PAYLOAD],
            FieldKind::Binary,
        )],
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// Device type to schema lookup.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<DeviceType, Arc<Schema>>,
}

impl SchemaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with every built-in device type.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("air_conditioner", air_conditioner());
        registry.register("heat_pump", heat_pump());
        registry.register("washer", washer());
        registry.register("fridge", fridge());
        registry.register("dvr_channel", dvr_channel());
        registry
    }

    /// Add or replace a schema. Custom types may shadow built-ins.
    pub fn register(&mut self, device_type: impl Into<DeviceType>, schema: Schema) {
        self.schemas.insert(device_type.into(), Arc::new(schema));
    }

    pub fn get(&self, device_type: &DeviceType) -> Option<Arc<Schema>> {
        self.schemas.get(device_type).cloned()
    }

    pub fn contains(&self, device_type: &DeviceType) -> bool {
        self.schemas.contains_key(device_type)
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<&DeviceType> {
        let mut types: Vec<_> = self.schemas.keys().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builtins_registered() {
        let registry = SchemaRegistry::with_builtins();
        let names: Vec<&str> = registry.types().iter().map(|t| t.as_str()).collect();
        assert_eq!(
            names,
            vec!["air_conditioner", "dvr_channel", "fridge", "heat_pump", "washer"]
        );
        let ac = registry.get(&"air_conditioner".into()).unwrap();
        assert_eq!(ac.root.as_deref(), Some("result.snapshot"));
        assert!(ac.fields.iter().any(|f| f.channel == "target-temperature"));
    }

    #[test]
    fn field_spec_accepts_single_path() {
        let spec: FieldSpec = serde_json::from_value(serde_json::json!({
            "channel": "temperature",
            "path": "temp",
            "kind": "decimal",
            "required": true
        }))
        .unwrap();
        assert_eq!(spec.paths, vec!["temp".to_owned()]);
        assert_eq!(spec.kind, FieldKind::Decimal);
        assert!(spec.required);

        let spec: FieldSpec = serde_json::from_value(serde_json::json!({
            "channel": "mode",
            "paths": ["a.mode", "Mode"],
            "kind": "integer"
        }))
        .unwrap();
        assert_eq!(spec.paths.len(), 2);
        assert!(!spec.required);
    }

    #[test]
    fn custom_schema_shadows_builtin() {
        let mut registry = SchemaRegistry::with_builtins();
        registry.register(
            "washer",
            Schema {
                fields: vec![FieldSpec::optional("state", &["s"], FieldKind::Text)],
                ..Schema::default()
            },
        );
        assert_eq!(registry.get(&"washer".into()).unwrap().fields.len(), 1);
    }
}
