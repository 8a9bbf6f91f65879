//! Hyperparameters shared by all attention implementations.
//!
//! A single [`Config`] drives every module; each constructor reads the
//! fields it needs. Configs can be built in code or loaded from TOML/JSON
//! files through [`Config::from_path`].

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use super::errors::{AttentionError, Result};

/// Configuration driving attention construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Model / hidden dimension of queries, keys and values.
    pub hidden_dim: usize,
    /// Number of attention heads for multi-head variants.
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,
    /// Dropout applied to attention weights during training.
    ///
    /// When `None`, dropout is disabled and the computation is deterministic.
    #[serde(default)]
    pub dropout_p: Option<f32>,
    /// Output channels of the location convolution in multi-head location variants.
    #[serde(default = "default_conv_out_channel")]
    pub conv_out_channel: usize,
    /// Sigmoid + row-normalisation instead of softmax in location-aware attention.
    #[serde(default = "default_smoothing")]
    pub smoothing: bool,
}

fn default_num_heads() -> usize {
    8
}

fn default_conv_out_channel() -> usize {
    10
}

fn default_smoothing() -> bool {
    true
}

impl Config {
    pub fn new(hidden_dim: usize) -> Self {
        Self {
            hidden_dim,
            num_heads: default_num_heads(),
            dropout_p: None,
            conv_out_channel: default_conv_out_channel(),
            smoothing: default_smoothing(),
        }
    }

    pub fn with_heads(mut self, num_heads: usize) -> Self {
        self.num_heads = num_heads;
        self
    }

    pub fn with_dropout(mut self, dropout_p: Option<f32>) -> Self {
        self.dropout_p = dropout_p;
        self
    }

    pub fn with_conv_out_channel(mut self, conv_out_channel: usize) -> Self {
        self.conv_out_channel = conv_out_channel;
        self
    }

    pub fn with_smoothing(mut self, smoothing: bool) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Validates dimensions and the dropout range.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.hidden_dim == 0 {
            errors.push("hidden_dim must be greater than zero".to_string());
        }
        if self.num_heads == 0 {
            errors.push("num_heads must be greater than zero".to_string());
        }
        if self.conv_out_channel == 0 {
            errors.push("conv_out_channel must be greater than zero".to_string());
        }
        if let Some(p) = self.dropout_p {
            if !(0.0..1.0).contains(&p) {
                errors.push(format!("dropout_p must be in [0, 1), got {p}"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AttentionError::config(errors.join("; ")))
        }
    }

    /// Per-head dimension; fails unless `hidden_dim` is divisible by `num_heads`.
    pub fn head_dim(&self) -> Result<usize> {
        self.validate()?;
        if self.hidden_dim % self.num_heads != 0 {
            return Err(AttentionError::config(format!(
                "hidden_dim ({}) must be divisible by num_heads ({})",
                self.hidden_dim, self.num_heads
            )));
        }
        Ok(self.hidden_dim / self.num_heads)
    }

    /// Loads a config from a `.toml` or `.json` file and validates it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: Config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)
                .map_err(|err| AttentionError::ConfigFormat(err.to_string()))?,
            Some("toml") | None => toml::from_str(&contents)
                .map_err(|err| AttentionError::ConfigFormat(err.to_string()))?,
            Some(other) => {
                return Err(AttentionError::ConfigFormat(format!(
                    "unsupported configuration extension '{other}'"
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn head_dim_requires_divisibility() {
        assert_eq!(Config::new(8).with_heads(2).head_dim().unwrap(), 4);
        let err = Config::new(10).with_heads(4).head_dim().unwrap_err();
        assert!(matches!(err, AttentionError::Configuration(_)));
    }

    #[test]
    fn validate_collects_every_violation() {
        let config = Config::new(0).with_heads(0).with_dropout(Some(1.5));
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("hidden_dim"));
        assert!(msg.contains("num_heads"));
        assert!(msg.contains("dropout_p"));
    }

    #[test]
    fn loads_toml_with_defaults() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "hidden_dim = 16\nnum_heads = 4\nsmoothing = false")?;
        let config = Config::from_path(file.path())?;
        assert_eq!(config.hidden_dim, 16);
        assert_eq!(config.num_heads, 4);
        assert!(!config.smoothing);
        assert_eq!(config.conv_out_channel, 10);
        assert_eq!(config.dropout_p, None);
        Ok(())
    }

    #[test]
    fn loads_json_and_rejects_unknown_extension() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile()?;
        write!(file, r#"{{"hidden_dim": 12, "num_heads": 3, "dropout_p": 0.1}}"#)?;
        let config = Config::from_path(file.path())?;
        assert_eq!(config.head_dim()?, 4);
        assert_eq!(config.dropout_p, Some(0.1));

        let other = tempfile::Builder::new().suffix(".yaml").tempfile()?;
        let err = Config::from_path(other.path()).unwrap_err();
        assert!(matches!(err, AttentionError::ConfigFormat(_)));
        Ok(())
    }
}
