//! Options of the extension.
//!
//! Options are read from a structured source with serde, or changed one at a time from text
//! with [`ExtStatConfig::set_option`]. Malformed values are rejected, never replaced by
//! defaults.

use std::str::FromStr;

use enumset::EnumSet;
use serde::{Deserialize, Deserializer};
use strum_macros::{AsRefStr, EnumString};

use crate::error::{ExtStatError, ExtStatResult};
use crate::stat::{format_kinds, StatKind, StatKinds};

/// What to create when an index is created.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum GenerationMode {
    Disabled,
    /// Multivariate statistics and the row statistic.
    All,
    /// A single expression statistic over the row of the index keys.
    Univariate,
    Multivariate,
}

impl GenerationMode {
    pub fn creates_multivariate(self) -> bool {
        matches!(self, GenerationMode::All | GenerationMode::Multivariate)
    }

    pub fn creates_univariate(self) -> bool {
        matches!(self, GenerationMode::All | GenerationMode::Univariate)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtStatConfig {
    pub mode: GenerationMode,
    /// Leading index keys considered. Zero disables generation on index creation.
    pub columns_limit: usize,
    #[serde(deserialize_with = "deserialize_stat_kinds")]
    pub stat_kinds: StatKinds,
    /// Compare new definitions with existing ones before creating them.
    pub compactify: bool,
    /// Negative disables the check for badly estimated nodes.
    pub estimation_error_threshold: f64,
    pub enable_candidate_collection: bool,
}

impl Default for ExtStatConfig {
    fn default() -> Self {
        Self {
            mode: GenerationMode::Multivariate,
            columns_limit: 5,
            stat_kinds: StatKind::generated(),
            compactify: true,
            estimation_error_threshold: 2.0,
            enable_candidate_collection: true,
        }
    }
}

impl ExtStatConfig {
    pub fn validate(&self) -> ExtStatResult<()> {
        if self.stat_kinds.is_empty() {
            return Err(ExtStatError::configuration("stat_kinds", "at least one kind is required"));
        }
        if !self.stat_kinds.is_subset(StatKind::generated()) {
            return Err(ExtStatError::configuration(
                "stat_kinds",
                format!(
                    "unsupported kinds [{}]",
                    format_kinds(self.stat_kinds - StatKind::generated())
                ),
            ));
        }
        if self.estimation_error_threshold.is_nan() {
            return Err(ExtStatError::configuration(
                "estimation_error_threshold",
                "NaN is not a threshold",
            ));
        }
        Ok(())
    }

    /// Changes one option from its textual value. The configuration is untouched on error.
    pub fn set_option(&mut self, name: &str, value: &str) -> ExtStatResult<()> {
        let value = value.trim();
        match name {
            "mode" => {
                self.mode = GenerationMode::from_str(value).map_err(|_| {
                    ExtStatError::configuration(
                        name,
                        format!(
                            "\"{}\" is not one of disabled, all, univariate, multivariate",
                            value
                        ),
                    )
                })?;
            }
            "columns_limit" => {
                let limit = value
                    .parse::<i64>()
                    .map_err(|e| ExtStatError::configuration(name, e.to_string()))?;
                self.columns_limit = usize::try_from(limit)
                    .map_err(|_| ExtStatError::configuration(name, "must not be negative"))?;
            }
            "stat_kinds" => self.stat_kinds = parse_stat_kinds(value)?,
            "compactify" => self.compactify = parse_bool(name, value)?,
            "estimation_error_threshold" => {
                let threshold = value
                    .parse::<f64>()
                    .map_err(|e| ExtStatError::configuration(name, e.to_string()))?;
                if threshold.is_nan() {
                    return Err(ExtStatError::configuration(name, "NaN is not a threshold"));
                }
                self.estimation_error_threshold = threshold;
            }
            "enable_candidate_collection" => {
                self.enable_candidate_collection = parse_bool(name, value)?
            }
            _ => return Err(ExtStatError::configuration(name, "unrecognized option")),
        }

        Ok(())
    }
}

/// Parses a comma separated list of `ndistinct`, `mcv`, `dependencies` and `all`.
pub fn parse_stat_kinds(value: &str) -> ExtStatResult<StatKinds> {
    let mut kinds = EnumSet::empty();

    for item in value.split(',').map(str::trim) {
        if item.is_empty() {
            return Err(ExtStatError::configuration(
                "stat_kinds",
                format!("empty item in \"{}\"", value),
            ));
        }
        if item.eq_ignore_ascii_case("all") {
            kinds |= StatKind::generated();
            continue;
        }

        match StatKind::from_str(item) {
            Ok(kind) if StatKind::generated().contains(kind) => kinds |= kind,
            _ => {
                return Err(ExtStatError::configuration(
                    "stat_kinds",
                    format!("unrecognized statistics kind \"{}\"", item),
                ))
            }
        }
    }

    Ok(kinds)
}

fn parse_bool(name: &str, value: &str) -> ExtStatResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(ExtStatError::configuration(
            name,
            format!("\"{}\" is not a boolean", value),
        )),
    }
}

fn deserialize_stat_kinds<'de, D>(deserializer: D) -> Result<StatKinds, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_stat_kinds(&value).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use crate::config::{parse_stat_kinds, ExtStatConfig, GenerationMode};
    use crate::error::ExtStatError;
    use crate::stat::StatKind;

    #[test]
    fn test_defaults() {
        let config = ExtStatConfig::default();
        assert_eq!(GenerationMode::Multivariate, config.mode);
        assert_eq!(5, config.columns_limit);
        assert_eq!(StatKind::generated(), config.stat_kinds);
        assert!(config.compactify);
        assert_eq!(2.0, config.estimation_error_threshold);
        assert!(config.enable_candidate_collection);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_stat_kinds() {
        assert_eq!(
            StatKind::Ndistinct | StatKind::Mcv,
            parse_stat_kinds("ndistinct, MCV").unwrap()
        );
        assert_eq!(StatKind::generated(), parse_stat_kinds("mcv,all").unwrap());

        for bad in ["", "mcv,,ndistinct", "histogram", "expressions"] {
            assert!(
                matches!(parse_stat_kinds(bad), Err(ExtStatError::Configuration { .. })),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_set_option() {
        let mut config = ExtStatConfig::default();

        config.set_option("mode", "ALL").unwrap();
        config.set_option("columns_limit", "0").unwrap();
        config.set_option("stat_kinds", "dependencies").unwrap();
        config.set_option("compactify", "off").unwrap();
        config.set_option("estimation_error_threshold", "-1").unwrap();
        config.set_option("enable_candidate_collection", "false").unwrap();

        assert_eq!(
            ExtStatConfig {
                mode: GenerationMode::All,
                columns_limit: 0,
                stat_kinds: StatKind::Dependencies.into(),
                compactify: false,
                estimation_error_threshold: -1.0,
                enable_candidate_collection: false,
            },
            config
        );
    }

    #[test]
    fn test_set_option_rejects_malformed_values() {
        let mut config = ExtStatConfig::default();

        assert!(config.set_option("columns_limit", "-3").is_err());
        assert!(config.set_option("columns_limit", "many").is_err());
        assert!(config.set_option("mode", "sometimes").is_err());
        assert!(config.set_option("stat_kinds", "").is_err());
        assert!(config.set_option("compactify", "maybe").is_err());
        assert!(config.set_option("estimation_error_threshold", "NaN").is_err());
        assert!(config.set_option("no_such_option", "1").is_err());

        assert_eq!(ExtStatConfig::default(), config);
    }

    #[test]
    fn test_deserialize() {
        let config: ExtStatConfig = serde_yaml::from_str(
            "
mode: univariate
stat_kinds: mcv, ndistinct
estimation_error_threshold: 4.5
",
        )
        .unwrap();

        assert_eq!(GenerationMode::Univariate, config.mode);
        assert_eq!(StatKind::Mcv | StatKind::Ndistinct, config.stat_kinds);
        assert_eq!(4.5, config.estimation_error_threshold);
        assert_eq!(5, config.columns_limit);

        let json: Result<ExtStatConfig, _> = serde_json::from_str(r#"{"stat_kinds": "mvc"}"#);
        assert!(json.is_err());
    }
}
