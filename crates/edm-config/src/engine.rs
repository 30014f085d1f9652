//! Engine configuration loading and validation.

use std::fs;
use std::path::Path;

use edm_model::EngineConfig;
use tracing::info;

use crate::error::ConfigError;

/// Longest snapshot retention accepted: one hundred years.
pub const MAX_RETENTION_HOURS: i64 = 24 * 365 * 100;

/// Longest delay between retry attempts: thirty days.
pub const MAX_RETRY_DELAY_SECS: u64 = 60 * 60 * 24 * 30;

/// Loads an engine configuration from TOML. Missing sections use defaults.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    let config: EngineConfig = toml::from_str(&text).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    validate_engine_config(&config)?;
    info!(path = %path.display(), "loaded engine configuration");
    Ok(config)
}

/// Loads `path` when given, otherwise the defaults.
pub fn load_engine_config_or_default(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    match path {
        Some(path) => load_engine_config(path),
        None => Ok(EngineConfig::default()),
    }
}

fn unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid_config(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid_config(format!(
            "{name} must be a non-negative number, got {value}"
        )))
    }
}

/// Checks ranges that serde cannot express.
pub fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    let profiler = &config.profiler;
    if profiler.sample_size == 0 {
        return Err(ConfigError::invalid_config("profiler.sample_size must be positive"));
    }
    unit_interval("profiler.pattern_floor", profiler.pattern_floor)?;

    let mapping = &config.mapping;
    non_negative("mapping.weights.name", mapping.weights.name)?;
    non_negative("mapping.weights.pattern", mapping.weights.pattern)?;
    unit_interval("mapping.weights.history", mapping.weights.history)?;
    if mapping.weights.name + mapping.weights.pattern <= 0.0 {
        return Err(ConfigError::invalid_config(
            "mapping.weights.name and mapping.weights.pattern cannot both be zero",
        ));
    }
    unit_interval("mapping.min_confidence", mapping.min_confidence)?;
    unit_interval(
        "mapping.history_similarity_threshold",
        mapping.history_similarity_threshold,
    )?;
    unit_interval(
        "mapping.auto_execute_min_accuracy",
        mapping.auto_execute_min_accuracy,
    )?;

    let dedup = &config.dedup;
    for (name, weight) in [
        ("dedup.weights.name", dedup.weights.name),
        ("dedup.weights.dob", dedup.weights.dob),
        ("dedup.weights.phone", dedup.weights.phone),
        ("dedup.weights.email", dedup.weights.email),
    ] {
        non_negative(name, weight)?;
    }
    unit_interval("dedup.review_threshold", dedup.review_threshold)?;
    if let Some(auto_merge) = dedup.auto_merge_threshold {
        unit_interval("dedup.auto_merge_threshold", auto_merge)?;
        if auto_merge < dedup.review_threshold {
            return Err(ConfigError::invalid_config(
                "dedup.auto_merge_threshold cannot be below dedup.review_threshold",
            ));
        }
    }

    let quality = &config.quality;
    let weights = quality.weights;
    for (name, weight) in [
        ("quality.weights.completeness", weights.completeness),
        ("quality.weights.accuracy", weights.accuracy),
        ("quality.weights.consistency", weights.consistency),
        ("quality.weights.uniqueness", weights.uniqueness),
    ] {
        non_negative(name, weight)?;
    }
    if weights.completeness + weights.accuracy + weights.consistency + weights.uniqueness <= 0.0 {
        return Err(ConfigError::invalid_config("quality weights cannot all be zero"));
    }
    if !(0.0..=100.0).contains(&quality.production_threshold) {
        return Err(ConfigError::invalid_config(
            "quality.production_threshold must be within [0, 100]",
        ));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::invalid_config("retry.max_attempts must be positive"));
    }
    if retry.multiplier == 0 {
        return Err(ConfigError::invalid_config("retry.multiplier must be positive"));
    }
    if retry.max_delay_secs > MAX_RETRY_DELAY_SECS {
        return Err(ConfigError::invalid_config(format!(
            "retry.max_delay_secs cannot exceed {MAX_RETRY_DELAY_SECS}"
        )));
    }
    if retry.max_delay_secs < retry.base_delay_secs {
        return Err(ConfigError::invalid_config(
            "retry.max_delay_secs cannot be below retry.base_delay_secs",
        ));
    }

    if config.executor.chunk_size == 0 {
        return Err(ConfigError::invalid_config("executor.chunk_size must be positive"));
    }
    if config
        .snapshot
        .retention_hours
        .is_some_and(|hours| !(1..=MAX_RETENTION_HOURS).contains(&hours))
    {
        return Err(ConfigError::invalid_config(format!(
            "snapshot.retention_hours must be within [1, {MAX_RETENTION_HOURS}] when set"
        )));
    }
    Ok(())
}
