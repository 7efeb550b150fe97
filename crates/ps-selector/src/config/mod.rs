//! Analysis configuration format support.
//!
//! Parses the user's analysis configuration (YAML or JSON) into
//! [`AnalysisConfig`]. Parsing only checks shape: unknown keys are rejected,
//! cross references and numeric constraints are checked when the
//! [`DescriptorRegistry`](crate::registry::DescriptorRegistry) is built.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ps_selector::config::parse_yaml;
//!
//! let yaml = std::fs::read_to_string("analysis.yaml").unwrap();
//! let config = parse_yaml(&yaml).unwrap();
//! println!("Histograms: {}", config.histograms.len());
//! println!("Groups: {}", config.uniqueness.len());
//! ```

pub mod schema;

pub use schema::*;

use std::path::Path;

use ps_core::Result;

/// Parse an analysis config from a YAML string.
pub fn parse_yaml(yaml: &str) -> Result<AnalysisConfig> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Parse an analysis config from a JSON string.
pub fn parse_json(json: &str) -> Result<AnalysisConfig> {
    Ok(serde_json::from_str(json)?)
}

/// Read an analysis config file. `.json` files are parsed as JSON, anything
/// else as YAML.
pub fn read_config(path: impl AsRef<Path>) -> Result<AnalysisConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config = if is_json { parse_json(&text)? } else { parse_yaml(&text)? };
    tracing::debug!(
        path = %path.display(),
        histograms = config.histograms.len(),
        groups = config.uniqueness.len(),
        "analysis config read"
    );
    Ok(config)
}
