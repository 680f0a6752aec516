use crate::domain::mesh::MAX_POLYNOMIAL_ORDER;
use crate::selection::{CandList, Strategy};

use json::{object, JsonValue};
use std::fs::read_to_string;
use std::path::Path;

/// Tunables of an adaptive run
///
/// The defaults are those of the L-shape benchmark.
#[derive(Clone, Debug, PartialEq)]
pub struct AdaptConfig {
    /// Number of uniform isotropic refinements applied to the base mesh
    pub init_ref_num: usize,
    /// Initial polynomial order of every element
    pub p_init: u8,
    /// Marking threshold (interpretation depends on `strategy`)
    pub threshold: f64,
    pub strategy: Strategy,
    pub cand_list: CandList,
    /// Maximum hanging node depth (`None` is unbounded)
    pub mesh_regularity: Option<u8>,
    /// Exponent of the candidate cost in the score `benefit / cost^conv_exp`
    pub conv_exp: f64,
    /// Stop once the estimated relative error (in percent) drops below this value
    pub err_stop: f64,
    /// Stop once the coarse space has at least this many DOFs
    pub ndof_stop: usize,
    /// Solve on the coarse space instead of projecting the fine solution onto it
    pub solve_on_coarse_mesh: bool,
}

impl Default for AdaptConfig {
    fn default() -> Self {
        Self {
            init_ref_num: 1,
            p_init: 4,
            threshold: 0.3,
            strategy: Strategy::Cumulative,
            cand_list: CandList::HpAnisoH,
            mesh_regularity: None,
            conv_exp: 1.0,
            err_stop: 0.01,
            ndof_stop: 60000,
            solve_on_coarse_mesh: false,
        }
    }
}

impl AdaptConfig {
    /// Check that every tunable is in range
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &'static str, reason: String| Err(ConfigError::Invalid { key, reason });

        if self.p_init < 1 || self.p_init >= MAX_POLYNOMIAL_ORDER {
            return invalid(
                "P_INIT",
                format!("{} is outside of 1..={}", self.p_init, MAX_POLYNOMIAL_ORDER - 1),
            );
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return invalid("THRESHOLD", format!("{} is not a non-negative number", self.threshold));
        }
        if self.strategy != Strategy::Absolute && self.threshold > 1.0 {
            return invalid(
                "THRESHOLD",
                format!("{} exceeds 1 for strategy {}", self.threshold, self.strategy.index()),
            );
        }
        if self.mesh_regularity == Some(0) {
            return invalid("MESH_REGULARITY", String::from("must be -1 (unbounded) or at least 1"));
        }
        if !self.conv_exp.is_finite() || self.conv_exp <= 0.0 {
            return invalid("CONV_EXP", format!("{} is not positive", self.conv_exp));
        }
        if !self.err_stop.is_finite() || self.err_stop < 0.0 {
            return invalid("ERR_STOP", format!("{} is not a non-negative number", self.err_stop));
        }
        if self.ndof_stop < 1 {
            return invalid("NDOF_STOP", String::from("must be at least 1"));
        }
        Ok(())
    }

    /// Read a configuration from a JSON file. Keys which are not present keep their default values.
    ///
    /// ```text
    /// {
    ///     "INIT_REF_NUM": 1,
    ///     "P_INIT": 4,
    ///     "THRESHOLD": 0.3,
    ///     "STRATEGY": 0,
    ///     "CAND_LIST": "HP_ANISO_H",
    ///     "MESH_REGULARITY": -1,
    ///     "CONV_EXP": 1.0,
    ///     "ERR_STOP": 0.01,
    ///     "NDOF_STOP": 60000,
    ///     "SOLVE_ON_COARSE_MESH": false
    /// }
    /// ```
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = read_to_string(path.as_ref()).map_err(|err| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: err,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config_json = json::parse(contents).map_err(|err| ConfigError::Json(err.to_string()))?;
        if !config_json.is_object() {
            return Err(ConfigError::Json(String::from("expected a JSON object")));
        }

        let mut config = Self::default();

        if let Some(n) = integer_key(&config_json, "INIT_REF_NUM")? {
            config.init_ref_num = non_negative("INIT_REF_NUM", n)?;
        }
        if let Some(p) = integer_key(&config_json, "P_INIT")? {
            config.p_init = u8::try_from(p).map_err(|_| out_of_range("P_INIT", p))?;
        }
        if let Some(t) = float_key(&config_json, "THRESHOLD")? {
            config.threshold = t;
        }
        if let Some(s) = integer_key(&config_json, "STRATEGY")? {
            config.strategy = Strategy::from_index(s).ok_or_else(|| out_of_range("STRATEGY", s))?;
        }
        if !config_json["CAND_LIST"].is_null() {
            let name = config_json["CAND_LIST"].as_str().ok_or(ConfigError::Invalid {
                key: "CAND_LIST",
                reason: String::from("expected a string"),
            })?;
            config.cand_list = name.parse().map_err(|reason| ConfigError::Invalid {
                key: "CAND_LIST",
                reason,
            })?;
        }
        if let Some(r) = integer_key(&config_json, "MESH_REGULARITY")? {
            config.mesh_regularity = match r {
                -1 => None,
                r => Some(u8::try_from(r).map_err(|_| out_of_range("MESH_REGULARITY", r))?),
            };
        }
        if let Some(c) = float_key(&config_json, "CONV_EXP")? {
            config.conv_exp = c;
        }
        if let Some(e) = float_key(&config_json, "ERR_STOP")? {
            config.err_stop = e;
        }
        if let Some(n) = integer_key(&config_json, "NDOF_STOP")? {
            config.ndof_stop = non_negative("NDOF_STOP", n)?;
        }
        if !config_json["SOLVE_ON_COARSE_MESH"].is_null() {
            config.solve_on_coarse_mesh =
                config_json["SOLVE_ON_COARSE_MESH"]
                    .as_bool()
                    .ok_or(ConfigError::Invalid {
                        key: "SOLVE_ON_COARSE_MESH",
                        reason: String::from("expected a boolean"),
                    })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// The configuration in the same layout read by [AdaptConfig::from_json_file]
    pub fn to_json(&self) -> JsonValue {
        let mesh_regularity: i64 = self.mesh_regularity.map(i64::from).unwrap_or(-1);
        object! {
            "INIT_REF_NUM": self.init_ref_num,
            "P_INIT": self.p_init,
            "THRESHOLD": self.threshold,
            "STRATEGY": self.strategy.index(),
            "CAND_LIST": self.cand_list.name(),
            "MESH_REGULARITY": mesh_regularity,
            "CONV_EXP": self.conv_exp,
            "ERR_STOP": self.err_stop,
            "NDOF_STOP": self.ndof_stop,
            "SOLVE_ON_COARSE_MESH": self.solve_on_coarse_mesh,
        }
    }
}

fn integer_key(config_json: &JsonValue, key: &'static str) -> Result<Option<i64>, ConfigError> {
    let value = &config_json[key];
    if value.is_null() {
        Ok(None)
    } else {
        value.as_i64().map(Some).ok_or(ConfigError::Invalid {
            key,
            reason: format!("expected an integer, found {}", value),
        })
    }
}

fn float_key(config_json: &JsonValue, key: &'static str) -> Result<Option<f64>, ConfigError> {
    let value = &config_json[key];
    if value.is_null() {
        Ok(None)
    } else {
        value.as_f64().map(Some).ok_or(ConfigError::Invalid {
            key,
            reason: format!("expected a number, found {}", value),
        })
    }
}

fn non_negative(key: &'static str, value: i64) -> Result<usize, ConfigError> {
    usize::try_from(value).map_err(|_| out_of_range(key, value))
}

fn out_of_range(key: &'static str, value: i64) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: format!("{} is out of range", value),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse config file: {0}")]
    Json(String),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AdaptConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.p_init, 4);
        assert_eq!(config.cand_list, CandList::HpAnisoH);
        assert_eq!(config.mesh_regularity, None);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = AdaptConfig::from_json_str(
            r#"{ "P_INIT": 2, "STRATEGY": 2, "THRESHOLD": 0.05, "CAND_LIST": "H_ANISO", "MESH_REGULARITY": 1 }"#,
        )
        .unwrap();

        assert_eq!(config.p_init, 2);
        assert_eq!(config.strategy, Strategy::Absolute);
        assert_eq!(config.threshold, 0.05);
        assert_eq!(config.cand_list, CandList::HAniso);
        assert_eq!(config.mesh_regularity, Some(1));
        assert_eq!(config.ndof_stop, 60000);
        assert!(!config.solve_on_coarse_mesh);
    }

    #[test]
    fn written_config_reads_back() {
        let config = AdaptConfig {
            mesh_regularity: Some(2),
            solve_on_coarse_mesh: true,
            err_stop: 0.5,
            ..Default::default()
        };
        let read = AdaptConfig::from_json_str(&config.to_json().dump()).unwrap();
        assert_eq!(read, config);
    }

    #[test]
    fn bad_values_are_rejected() {
        let rejected = |contents: &str, bad_key: &str| match AdaptConfig::from_json_str(contents) {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, bad_key),
            other => panic!("expected {} to be rejected, got {:?}", bad_key, other),
        };

        rejected(r#"{ "P_INIT": 0 }"#, "P_INIT");
        rejected(r#"{ "P_INIT": 10 }"#, "P_INIT");
        rejected(r#"{ "STRATEGY": 3 }"#, "STRATEGY");
        rejected(r#"{ "THRESHOLD": 1.5 }"#, "THRESHOLD");
        rejected(r#"{ "MESH_REGULARITY": 0 }"#, "MESH_REGULARITY");
        rejected(r#"{ "CONV_EXP": 0.0 }"#, "CONV_EXP");
        rejected(r#"{ "CAND_LIST": "HP_SOMETHING" }"#, "CAND_LIST");
        rejected(r#"{ "NDOF_STOP": -4 }"#, "NDOF_STOP");
        rejected(r#"{ "SOLVE_ON_COARSE_MESH": 1 }"#, "SOLVE_ON_COARSE_MESH");

        // absolute thresholds may exceed one
        assert!(AdaptConfig::from_json_str(r#"{ "STRATEGY": 2, "THRESHOLD": 1e9 }"#).is_ok());
        assert!(matches!(AdaptConfig::from_json_str("[1, 2]"), Err(ConfigError::Json(_))));
    }
}
