//! 翻译器配置
//!
//! 所有字段都有默认值，JSON 配置文件只需给出需要覆盖的字段。

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Multi-source FROM lists longer than this are wrapped in nested derived tables
    pub join_nesting_threshold: usize,
    /// Expression nesting limit; each chained operator or member access counts one level
    pub max_nesting_depth: usize,
    /// Missing `@name` values become deferred parameters instead of errors
    pub allow_deferred_parameters: bool,
    /// Prefix for named parameters in the generated statement
    pub parameter_prefix: String,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            join_nesting_threshold: 4,
            max_nesting_depth: 128,
            allow_deferred_parameters: false,
            parameter_prefix: ":".to_string(),
        }
    }
}

impl TranslatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_join_nesting_threshold(mut self, threshold: usize) -> Self {
        self.join_nesting_threshold = threshold;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    pub fn with_deferred_parameters(mut self, allow: bool) -> Self {
        self.allow_deferred_parameters = allow;
        self
    }

    pub fn with_parameter_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.parameter_prefix = prefix.into();
        self
    }

    /// 从 JSON 文件加载并校验
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: TranslatorConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.join_nesting_threshold < 2 {
            return Err(Error::Config(format!(
                "join_nesting_threshold must be at least 2, got {}",
                self.join_nesting_threshold
            )));
        }
        if self.max_nesting_depth == 0 {
            return Err(Error::Config(
                "max_nesting_depth must be at least 1".to_string(),
            ));
        }
        let prefix_ok = matches!(self.parameter_prefix.as_str(), ":" | "$" | "@");
        if !prefix_ok {
            return Err(Error::Config(format!(
                "parameter_prefix must be one of `:`, `$` or `@`, got `{}`",
                self.parameter_prefix
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = TranslatorConfig::default();
        assert_eq!(config.join_nesting_threshold, 4);
        assert_eq!(config.max_nesting_depth, 128);
        assert!(!config.allow_deferred_parameters);
        assert_eq!(config.parameter_prefix, ":");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"join_nesting_threshold": 3, "allow_deferred_parameters": true}}"#)
            .unwrap();
        let config = TranslatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.join_nesting_threshold, 3);
        assert!(config.allow_deferred_parameters);
        assert_eq!(config.max_nesting_depth, 128);
    }

    #[test]
    fn test_validation() {
        let err = TranslatorConfig::new()
            .with_join_nesting_threshold(1)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(TranslatorConfig::new()
            .with_parameter_prefix("#")
            .validate()
            .is_err());
    }

    #[test]
    fn test_invalid_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = TranslatorConfig::from_file(file.path()).unwrap_err();
        assert_eq!(err.stage(), "json");
    }
}
