//! Schema types shared by training and serving.
//!
//! Feature order is load-bearing: it must match the column order the model
//! was fitted on, so descriptors are kept exactly as declared.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::common::error::{ServeError, ServeResult};

/// Whether a feature is fed to the model as a number or a category label.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Numeric,
    Categorical,
}

/// One declared input column.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeatureDescriptor {
    pub name: String,
    pub kind: FeatureKind,
    /// Position in declaration order.
    pub index: usize,
}

/// A single coerced feature value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Numeric(f64),
    Categorical(String),
}

impl FeatureValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Numeric(v) => Some(*v),
            FeatureValue::Categorical(_) => None,
        }
    }

    pub fn as_category(&self) -> Option<&str> {
        match self {
            FeatureValue::Categorical(s) => Some(s),
            FeatureValue::Numeric(_) => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Numeric(v) => write!(f, "{v}"),
            FeatureValue::Categorical(s) => f.write_str(s),
        }
    }
}

/// A typed record produced by schema validation, keyed by feature name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<String, FeatureValue>,
}

impl Record {
    pub(crate) fn insert(&mut self, name: &str, value: FeatureValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Single-field prediction payload, serialised as `{"<target>": value}`.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionResult {
    target: String,
    value: f64,
}

impl PredictionResult {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Serialize for PredictionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.target, &self.value)?;
        map.end()
    }
}

/// Shipped feature table for the property valuation model.
const PROPERTY_FEATURES: &[(&str, FeatureKind)] = &[
    ("type", FeatureKind::Categorical),
    ("sector", FeatureKind::Categorical),
    ("net_usable_area", FeatureKind::Numeric),
    ("net_area", FeatureKind::Numeric),
    ("n_rooms", FeatureKind::Numeric),
    ("n_bathroom", FeatureKind::Numeric),
    ("latitude", FeatureKind::Numeric),
    ("longitude", FeatureKind::Numeric),
];

const PROPERTY_OUTPUTS: &[&str] = &["price"];

/// Ordered input features plus exactly one target field.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureSchema {
    features: Vec<FeatureDescriptor>,
    target: String,
}

impl FeatureSchema {
    /// Build a schema from a feature table and the declared output fields.
    ///
    /// Fails with `SchemaDefinition` unless `outputs` has exactly one entry,
    /// feature names are non-empty and unique, and the target is not also a feature.
    pub fn new(features: &[(&str, FeatureKind)], outputs: &[&str]) -> ServeResult<Self> {
        let target = match outputs {
            [single] => single.to_string(),
            _ => {
                return Err(ServeError::SchemaDefinition(format!(
                    "output schema must declare exactly one field, found {}",
                    outputs.len()
                )))
            }
        };
        if features.is_empty() {
            return Err(ServeError::SchemaDefinition(
                "input schema declares no features".into(),
            ));
        }

        let mut seen = HashSet::new();
        for (name, _) in features {
            if name.is_empty() {
                return Err(ServeError::SchemaDefinition("empty feature name".into()));
            }
            if !seen.insert(*name) {
                return Err(ServeError::SchemaDefinition(format!(
                    "duplicate feature '{name}'"
                )));
            }
        }
        if seen.contains(target.as_str()) {
            return Err(ServeError::SchemaDefinition(format!(
                "target '{target}' is also declared as a feature"
            )));
        }

        let features = features
            .iter()
            .enumerate()
            .map(|(index, (name, kind))| FeatureDescriptor {
                name: name.to_string(),
                kind: *kind,
                index,
            })
            .collect();

        Ok(Self { features, target })
    }

    /// The property valuation contract: two categorical and six numeric inputs, target `price`.
    pub fn property_valuation() -> ServeResult<Self> {
        Self::new(PROPERTY_FEATURES, PROPERTY_OUTPUTS)
    }

    pub fn features(&self) -> &[FeatureDescriptor] {
        &self.features
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.name.as_str()).collect()
    }

    /// Names of the categorical features, in declaration order.
    pub fn categorical_features(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|f| f.kind == FeatureKind::Categorical)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn target_field(&self) -> &str {
        &self.target
    }

    /// Project a record into schema order, ready to be fed to a pipeline.
    pub fn to_vector(&self, record: &Record) -> ServeResult<Vec<FeatureValue>> {
        self.features
            .iter()
            .map(|f| {
                record
                    .get(&f.name)
                    .cloned()
                    .ok_or_else(|| ServeError::invalid_field(0, &f.name, "is required"))
            })
            .collect()
    }

    /// Wrap a raw model output as the single-field result.
    pub fn wrap_output(&self, value: f64) -> PredictionResult {
        PredictionResult {
            target: self.target.clone(),
            value,
        }
    }
}
