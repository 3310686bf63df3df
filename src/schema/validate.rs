//! Coercion of raw JSON records into typed records.
//!
//! Numbers and numeric strings become `f64`; categorical values must already
//! be strings. Unknown keys are ignored. The first bad record fails the batch.

use serde_json::Value;

use crate::common::error::{ServeError, ServeResult};

use super::domain::{FeatureKind, FeatureSchema, FeatureValue, Record};

/// Field name reported when a record is not an object at all.
const ROOT_FIELD: &str = "$";

fn coerce_numeric(index: usize, field: &str, raw: &Value) -> ServeResult<f64> {
    let value = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(_) => Err(ServeError::invalid_field(index, field, "must be a finite number")),
        None => Err(ServeError::invalid_field(index, field, "is not a valid number")),
    }
}

fn coerce_categorical(index: usize, field: &str, raw: &Value) -> ServeResult<String> {
    match raw {
        Value::String(s) => Ok(s.clone()),
        _ => Err(ServeError::invalid_field(index, field, "must be a string")),
    }
}

impl FeatureSchema {
    fn validate_at(&self, index: usize, raw: &Value) -> ServeResult<Record> {
        let object = raw.as_object().ok_or_else(|| {
            ServeError::invalid_field(index, ROOT_FIELD, "record must be a JSON object")
        })?;

        let mut record = Record::default();
        for feature in self.features() {
            let value = object
                .get(&feature.name)
                .ok_or_else(|| ServeError::invalid_field(index, &feature.name, "is required"))?;
            let typed = match feature.kind {
                FeatureKind::Numeric => {
                    FeatureValue::Numeric(coerce_numeric(index, &feature.name, value)?)
                }
                FeatureKind::Categorical => {
                    FeatureValue::Categorical(coerce_categorical(index, &feature.name, value)?)
                }
            };
            record.insert(&feature.name, typed);
        }
        Ok(record)
    }

    /// Validate a single prediction request.
    pub fn validate_one(&self, raw: &Value) -> ServeResult<Record> {
        self.validate_at(0, raw)
    }

    /// Validate a batch; the error names the offending record index and field.
    pub fn validate_many(&self, raw: &[Value]) -> ServeResult<Vec<Record>> {
        raw.iter()
            .enumerate()
            .map(|(index, value)| self.validate_at(index, value))
            .collect()
    }

    /// Validate training rows carrying both the features and the target column.
    pub fn validate_training_rows(&self, rows: &[Value]) -> ServeResult<(Vec<Record>, Vec<f64>)> {
        let target = self.target_field();
        let mut records = Vec::with_capacity(rows.len());
        let mut targets = Vec::with_capacity(rows.len());

        for (index, row) in rows.iter().enumerate() {
            records.push(self.validate_at(index, row)?);
            let raw_target = row
                .get(target)
                .ok_or_else(|| ServeError::invalid_field(index, target, "is required"))?;
            targets.push(coerce_numeric(index, target, raw_target)?);
        }

        tracing::debug!(rows = records.len(), "validated training rows");
        Ok((records, targets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> FeatureSchema {
        FeatureSchema::property_valuation().unwrap()
    }

    fn house() -> Value {
        json!({
            "type": "house",
            "sector": "A",
            "net_usable_area": 120.0,
            "net_area": 150.0,
            "n_rooms": 4,
            "n_bathroom": 2,
            "latitude": -33.4,
            "longitude": -70.6
        })
    }

    #[test]
    fn coerces_integers_and_numeric_strings() {
        let mut raw = house();
        raw["n_rooms"] = json!("4");
        let record = schema().validate_one(&raw).unwrap();
        assert_eq!(record.get("n_rooms"), Some(&FeatureValue::Numeric(4.0)));
        assert_eq!(record.get("n_bathroom"), Some(&FeatureValue::Numeric(2.0)));
        assert_eq!(
            record.get("type"),
            Some(&FeatureValue::Categorical("house".into()))
        );
    }

    #[test]
    fn ignores_unknown_fields() {
        let mut raw = house();
        raw["colour"] = json!("blue");
        let record = schema().validate_one(&raw).unwrap();
        assert_eq!(record.len(), 8);
        assert!(record.get("colour").is_none());
    }

    #[test]
    fn batch_error_names_record_and_field() {
        let mut bad = house();
        bad["latitude"] = json!("north");
        let err = schema().validate_many(&[house(), house(), bad]).unwrap_err();
        match err {
            ServeError::SchemaValidation { index, field, .. } => {
                assert_eq!(index, 2);
                assert_eq!(field, "latitude");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_feature_is_reported() {
        let mut raw = house();
        raw.as_object_mut().unwrap().remove("sector");
        let err = schema().validate_one(&raw).unwrap_err();
        assert_eq!(err.to_string(), "record 0: field 'sector' is required");
    }

    #[test]
    fn categorical_must_be_a_string() {
        let mut raw = house();
        raw["sector"] = json!(7);
        assert!(schema().validate_one(&raw).is_err());
    }

    #[test]
    fn non_object_record_is_rejected() {
        let err = schema().validate_one(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, ServeError::SchemaValidation { ref field, .. } if field == "$"));
    }

    #[test]
    fn to_vector_follows_feature_order_and_is_deterministic() {
        let schema = schema();
        let record = schema.validate_one(&house()).unwrap();
        let first = schema.to_vector(&record).unwrap();
        let second = schema.to_vector(&record).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0], FeatureValue::Categorical("house".into()));
        assert_eq!(first[2], FeatureValue::Numeric(120.0));
        assert_eq!(first[7], FeatureValue::Numeric(-70.6));
    }

    #[test]
    fn training_rows_split_features_and_target() {
        let mut row = house();
        row["price"] = json!("5000.5");
        let (records, targets) = schema().validate_training_rows(&[row]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(targets, vec![5000.5]);
    }

    #[test]
    fn training_rows_require_the_target() {
        let err = schema().validate_training_rows(&[house()]).unwrap_err();
        assert!(err.to_string().contains("'price'"));
    }
}
