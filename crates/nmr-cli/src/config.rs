//! Application configuration loading and validation.

use anyhow::{Context, Result};
use lib_instrument::InstrumentConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Hardware and run parameters.
    #[serde(default)]
    pub instrument: InstrumentConfig,

    /// Simulated receiver feeding the ADC.
    #[serde(default)]
    pub receiver: ReceiverConfig,

    /// Post-capture analysis.
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Spectral analysis settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Interpolate the spectral peak between bins.
    #[serde(default = "default_refine_peak")]
    pub refine_peak: bool,
}

fn default_refine_peak() -> bool { true }

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            refine_peak: default_refine_peak(),
        }
    }
}

/// Which synthetic signal the receiver produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverModel {
    /// FID for FID sequences, echo train for CPMG.
    #[default]
    Auto,
    Fid,
    Echo,
    /// Noise only.
    Quiet,
}

/// Simulated receiver parameters, in ADC counts and physical units.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiverConfig {
    #[serde(default)]
    pub model: ReceiverModel,

    /// Initial FID amplitude.
    #[serde(default = "default_fid_amplitude")]
    pub fid_amplitude: f64,

    /// FID envelope decay constant.
    #[serde(default = "default_t2_star_ms")]
    pub t2_star_ms: f64,

    /// Echo amplitude extrapolated to the first pulse.
    #[serde(default = "default_echo_amplitude")]
    pub echo_amplitude: f64,

    /// Transverse relaxation time of the sample.
    #[serde(default = "default_t2_ms")]
    pub t2_ms: f64,

    /// Gaussian width of a single echo.
    #[serde(default = "default_echo_width_us")]
    pub echo_width_us: f64,

    /// Receiver noise standard deviation.
    #[serde(default = "default_noise")]
    pub noise: f64,

    #[serde(default)]
    pub seed: u64,
}

fn default_fid_amplitude() -> f64 { 2000.0 }
fn default_t2_star_ms() -> f64 { 10.0 }
fn default_echo_amplitude() -> f64 { 1000.0 }
fn default_t2_ms() -> f64 { 50.0 }
fn default_echo_width_us() -> f64 { 100.0 }
fn default_noise() -> f64 { 10.0 }

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            model: ReceiverModel::default(),
            fid_amplitude: default_fid_amplitude(),
            t2_star_ms: default_t2_star_ms(),
            echo_amplitude: default_echo_amplitude(),
            t2_ms: default_t2_ms(),
            echo_width_us: default_echo_width_us(),
            noise: default_noise(),
            seed: 0,
        }
    }
}

/// Load configuration from a file, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            parse_config(&content, path.extension().is_some_and(|e| e == "json"))?
        }
        None => {
            tracing::debug!("No config file given, using defaults");
            AppConfig::default()
        }
    };

    validate_config(&config)?;
    Ok(config)
}

fn parse_config(content: &str, json: bool) -> Result<AppConfig> {
    if json {
        serde_json::from_str(content).context("Failed to parse config as JSON")
    } else {
        toml::from_str(content).context("Failed to parse config as TOML")
    }
}

/// Validate configuration.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    config
        .instrument
        .validate()
        .context("Invalid [instrument] section")?;

    let rx = &config.receiver;
    for (name, value) in [
        ("t2_star_ms", rx.t2_star_ms),
        ("t2_ms", rx.t2_ms),
        ("echo_width_us", rx.echo_width_us),
    ] {
        if !(value.is_finite() && value > 0.0) {
            anyhow::bail!("receiver.{} must be positive, got {}", name, value);
        }
    }
    if !(rx.noise.is_finite() && rx.noise >= 0.0) {
        anyhow::bail!("receiver.noise must be non-negative, got {}", rx.noise);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_sections_with_defaults() {
        let config = parse_config(
            r#"
            [instrument]
            polarization_s = 0.5

            [receiver]
            model = "echo"
            t2_ms = 150.0

            [analysis]
            refine_peak = false
            "#,
            false,
        )
        .unwrap();
        assert_eq!(config.instrument.polarization_s, 0.5);
        assert_eq!(config.instrument.sample_rate_hz, 500_000);
        assert_eq!(config.receiver.model, ReceiverModel::Echo);
        assert_eq!(config.receiver.t2_ms, 150.0);
        assert_eq!(config.receiver.noise, 10.0);
        assert!(!config.analysis.refine_peak);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_json_config() {
        let config = parse_config(r#"{ "receiver": { "model": "quiet", "noise": 0 } }"#, true).unwrap();
        assert_eq!(config.receiver.model, ReceiverModel::Quiet);
        assert_eq!(config.instrument, InstrumentConfig::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.receiver.t2_ms = 0.0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.instrument.sample_rate_hz = 300_000;
        assert!(validate_config(&config).is_err());

        let config = parse_config("[instrument]\nrun_timeout_s = 1e30\n", false).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = parse_config("", false).unwrap();
        assert_eq!(config.receiver.model, ReceiverModel::Auto);
        assert!(config.analysis.refine_peak);
        assert!(validate_config(&config).is_ok());
    }
}
