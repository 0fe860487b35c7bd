//! In-memory typed configuration with guarded safety-critical
//! parameters.
//!
//! Plain parameters are free-form typed key/value pairs.  Parameters
//! registered as safety-critical carry numeric bounds and an optional
//! custom validator; writes outside those rules are rejected and the
//! stored value stays unchanged.

use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Errors from configuration writes and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("value for {key} out of bounds: {value} not in [{min}, {max}]")]
    OutOfBounds {
        key: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("value for {0} rejected by validator")]
    ValidatorRejected(String),

    #[error("safety-critical parameter {0} is not numeric")]
    NotNumeric(String),
}

/// A stored configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    Duration(Duration),
}

impl ConfigValue {
    fn as_numeric(&self) -> Option<f64> {
        match self {
            ConfigValue::Int(v) => Some(*v as f64),
            ConfigValue::Double(v) => Some(*v),
            ConfigValue::Duration(d) => Some(d.as_secs_f64()),
            _ => None,
        }
    }
}

/// Custom check for a safety-critical parameter, applied after bounds.
pub type Validator = Box<dyn Fn(&ConfigValue) -> bool + Send + Sync>;

struct SafetyParam {
    min: f64,
    max: f64,
    validator: Option<Validator>,
}

/// Typed key/value configuration store.
#[derive(Default)]
pub struct ConfigStore {
    values: Mutex<BTreeMap<String, ConfigValue>>,
    safety: Mutex<BTreeMap<String, SafetyParam>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as safety-critical with numeric bounds and an
    /// optional custom validator.  Writes to the key are checked from
    /// then on.
    pub fn register_safety_param(
        &self,
        key: impl Into<String>,
        min: f64,
        max: f64,
        validator: Option<Validator>,
    ) {
        let key = key.into();
        info!("registered safety-critical parameter: {key} in [{min}, {max}]");
        self.safety
            .lock()
            .unwrap()
            .insert(key, SafetyParam { min, max, validator });
    }

    pub fn set(&self, key: impl Into<String>, value: ConfigValue) -> Result<(), ConfigError> {
        let key = key.into();
        self.check_safety(&key, &value)?;
        self.values.lock().unwrap().insert(key, value);
        Ok(())
    }

    pub fn set_string(&self, key: impl Into<String>, v: impl Into<String>) -> Result<(), ConfigError> {
        self.set(key, ConfigValue::String(v.into()))
    }

    pub fn set_int(&self, key: impl Into<String>, v: i64) -> Result<(), ConfigError> {
        self.set(key, ConfigValue::Int(v))
    }

    pub fn set_double(&self, key: impl Into<String>, v: f64) -> Result<(), ConfigError> {
        self.set(key, ConfigValue::Double(v))
    }

    pub fn set_bool(&self, key: impl Into<String>, v: bool) -> Result<(), ConfigError> {
        self.set(key, ConfigValue::Bool(v))
    }

    pub fn set_duration(&self, key: impl Into<String>, v: Duration) -> Result<(), ConfigError> {
        self.set(key, ConfigValue::Duration(v))
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.values.lock().unwrap().get(key) {
            Some(ConfigValue::String(v)) => v.clone(),
            Some(_) => self.type_mismatch(key, default.to_string()),
            None => default.to_string(),
        }
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.values.lock().unwrap().get(key) {
            Some(ConfigValue::Int(v)) => *v,
            Some(_) => self.type_mismatch(key, default),
            None => default,
        }
    }

    pub fn get_double(&self, key: &str, default: f64) -> f64 {
        match self.values.lock().unwrap().get(key) {
            Some(ConfigValue::Double(v)) => *v,
            Some(ConfigValue::Int(v)) => *v as f64,
            Some(_) => self.type_mismatch(key, default),
            None => default,
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.lock().unwrap().get(key) {
            Some(ConfigValue::Bool(v)) => *v,
            Some(_) => self.type_mismatch(key, default),
            None => default,
        }
    }

    pub fn get_duration(&self, key: &str, default: Duration) -> Duration {
        match self.values.lock().unwrap().get(key) {
            Some(ConfigValue::Duration(v)) => *v,
            Some(_) => self.type_mismatch(key, default),
            None => default,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().unwrap().contains_key(key)
    }

    /// Re-check every safety-critical parameter that currently has a
    /// value.  Returns the list of violations.
    pub fn validate_all(&self) -> Vec<ConfigError> {
        let values = self.values.lock().unwrap();
        let safety = self.safety.lock().unwrap();

        let mut errors = Vec::new();
        for (key, param) in safety.iter() {
            let Some(value) = values.get(key) else {
                continue;
            };
            if let Err(e) = check_param(key, param, value) {
                errors.push(e);
            }
        }
        errors
    }

    /// True when no safety-critical parameter is in violation.
    pub fn is_safety_compliant(&self) -> bool {
        self.validate_all().is_empty()
    }

    fn check_safety(&self, key: &str, value: &ConfigValue) -> Result<(), ConfigError> {
        let safety = self.safety.lock().unwrap();
        match safety.get(key) {
            Some(param) => check_param(key, param, value),
            None => Ok(()),
        }
    }

    fn type_mismatch<T>(&self, key: &str, default: T) -> T {
        warn!("config key {key} holds a different type, returning default");
        default
    }
}

fn check_param(key: &str, param: &SafetyParam, value: &ConfigValue) -> Result<(), ConfigError> {
    let numeric = value
        .as_numeric()
        .ok_or_else(|| ConfigError::NotNumeric(key.to_string()))?;

    if numeric < param.min || numeric > param.max {
        return Err(ConfigError::OutOfBounds {
            key: key.to_string(),
            value: numeric,
            min: param.min,
            max: param.max,
        });
    }

    if let Some(validator) = &param.validator {
        if !validator(value) {
            return Err(ConfigError::ValidatorRejected(key.to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_fall_back_to_defaults() {
        let store = ConfigStore::new();
        assert_eq!(store.get_string("missing", "fallback"), "fallback");
        assert_eq!(store.get_int("missing", 7), 7);
        assert!(store.get_bool("missing", true));

        store.set_int("sample_rate", 30_000).unwrap();
        assert_eq!(store.get_int("sample_rate", 0), 30_000);
        // Wrong-typed read returns the default.
        assert_eq!(store.get_string("sample_rate", "none"), "none");
    }

    #[test]
    fn int_reads_as_double() {
        let store = ConfigStore::new();
        store.set_int("channels", 64).unwrap();
        assert_eq!(store.get_double("channels", 0.0), 64.0);
    }

    #[test]
    fn safety_bounds_reject_out_of_range_writes() {
        let store = ConfigStore::new();
        store.register_safety_param("stim_amplitude_ma", 0.0, 5.0, None);

        assert!(store.set_double("stim_amplitude_ma", 2.5).is_ok());
        let err = store.set_double("stim_amplitude_ma", 9.0).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfBounds { .. }));
        // Rejected write leaves the previous value intact.
        assert_eq!(store.get_double("stim_amplitude_ma", 0.0), 2.5);
    }

    #[test]
    fn safety_param_requires_numeric_value() {
        let store = ConfigStore::new();
        store.register_safety_param("stim_amplitude_ma", 0.0, 5.0, None);
        let err = store.set_string("stim_amplitude_ma", "high").unwrap_err();
        assert!(matches!(err, ConfigError::NotNumeric(_)));
    }

    #[test]
    fn custom_validator_applies_after_bounds() {
        let store = ConfigStore::new();
        store.register_safety_param(
            "pulse_width_us",
            0.0,
            1000.0,
            Some(Box::new(|v| matches!(v, ConfigValue::Int(i) if i % 10 == 0))),
        );

        assert!(store.set_int("pulse_width_us", 200).is_ok());
        let err = store.set_int("pulse_width_us", 205).unwrap_err();
        assert!(matches!(err, ConfigError::ValidatorRejected(_)));
    }

    #[test]
    fn compliance_reflects_late_registration() {
        let store = ConfigStore::new();
        store.set_double("gain", 50.0).unwrap();
        assert!(store.is_safety_compliant());

        // Registering bounds after the fact flags the existing value.
        store.register_safety_param("gain", 0.0, 10.0, None);
        assert!(!store.is_safety_compliant());
        assert_eq!(store.validate_all().len(), 1);
    }

    #[test]
    fn duration_values_round_trip() {
        let store = ConfigStore::new();
        store
            .set_duration("check_interval", Duration::from_millis(100))
            .unwrap();
        assert_eq!(
            store.get_duration("check_interval", Duration::ZERO),
            Duration::from_millis(100)
        );
    }
}
