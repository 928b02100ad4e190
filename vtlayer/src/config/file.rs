//! INI configuration file.
//!
//! ```ini
//! [tiles]
//! url = https://tiles.example.com/{z}/{x}/{y}.pbf
//!
//! [cache]
//! capacity = 128
//!
//! [store]
//! debug = false
//! max_in_flight = 16
//! timeout = 30
//!
//! [style.type]
//! park = {"color": "green", "weight": 1}
//! ```
//!
//! Every `[style.<property>]` section maps property values to a JSON style
//! object. Keys that read as `true`/`false` or as a number match boolean and
//! numeric property values; anything else matches a string value.

use std::path::{Path, PathBuf};

use ini::{Ini, ParseOption};
use thiserror::Error;

use super::{
    StoreConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_URL_TEMPLATE,
};
use crate::geometry::PropertyValue;
use crate::pipeline::DEFAULT_MAX_IN_FLIGHT;
use crate::style::{Style, StyleTable};

const STYLE_SECTION_PREFIX: &str = "style.";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or parse the file.
    #[error("Failed to read config file: {0}")]
    Read(#[from] ini::Error),

    /// A value could not be parsed.
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// A style entry is not a JSON object.
    #[error("Invalid style for {property} = {value}: {reason}")]
    InvalidStyle {
        property: String,
        value: String,
        reason: String,
    },
}

/// Settings read from a config file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub url_template: String,
    pub cache_capacity: usize,
    pub debug: bool,
    pub max_in_flight: usize,
    pub request_timeout_secs: u64,
    pub styles: StyleTable,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            debug: false,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            styles: StyleTable::new(),
        }
    }
}

impl ConfigFile {
    /// Load from the default path.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file_opt(path, parse_option())?;
        parse_ini(&ini)
    }

    /// Parse from INI text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str_opt(content, parse_option())
            .map_err(|e| ConfigError::Read(ini::Error::Parse(e)))?;
        parse_ini(&ini)
    }
}

impl From<ConfigFile> for StoreConfig {
    fn from(file: ConfigFile) -> Self {
        StoreConfig::new(file.url_template)
            .with_cache_capacity(file.cache_capacity)
            .with_debug(file.debug)
            .with_max_in_flight(file.max_in_flight)
            .with_request_timeout(file.request_timeout_secs)
            .with_initial_styles(file.styles)
    }
}

/// Directory holding the config file.
pub fn config_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vtlayer")
}

/// Path of the default config file.
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

/// Style values are raw JSON, so quotes and backslashes are kept verbatim.
fn parse_option() -> ParseOption {
    ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..Default::default()
    }
}

fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigError> {
    let mut config = ConfigFile::default();

    // [tiles] section
    if let Some(section) = ini.section(Some("tiles")) {
        if let Some(v) = section.get("url") {
            let v = v.trim();
            if !["{z}", "{x}", "{y}"].iter().all(|p| v.contains(p)) {
                return Err(invalid("tiles", "url", v, "must contain {z}, {x} and {y}"));
            }
            config.url_template = v.to_string();
        }
    }

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("capacity") {
            config.cache_capacity = v
                .trim()
                .parse()
                .map_err(|_| invalid("cache", "capacity", v, "expected a non-negative integer"))?;
        }
    }

    // [store] section
    if let Some(section) = ini.section(Some("store")) {
        if let Some(v) = section.get("debug") {
            config.debug = parse_bool(v)
                .ok_or_else(|| invalid("store", "debug", v, "expected true or false"))?;
        }
        if let Some(v) = section.get("max_in_flight") {
            config.max_in_flight = match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid("store", "max_in_flight", v, "expected a positive integer")),
            };
        }
        if let Some(v) = section.get("timeout") {
            config.request_timeout_secs = v
                .trim()
                .parse()
                .map_err(|_| invalid("store", "timeout", v, "expected seconds as an integer"))?;
        }
    }

    // [style.<property>] sections
    for (name, section) in ini.iter() {
        let Some(property) = name.and_then(|n| n.strip_prefix(STYLE_SECTION_PREFIX)) else {
            continue;
        };
        for (key, raw) in section.iter() {
            let style = parse_style(raw).map_err(|reason| ConfigError::InvalidStyle {
                property: property.to_string(),
                value: key.to_string(),
                reason,
            })?;
            config.styles.merge(property, parse_property_value(key), &style);
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn parse_property_value(key: &str) -> PropertyValue {
    let key = key.trim();
    match key {
        "true" => PropertyValue::Bool(true),
        "false" => PropertyValue::Bool(false),
        _ => key
            .parse::<f64>()
            .map(PropertyValue::Number)
            .unwrap_or_else(|_| PropertyValue::String(key.to_string())),
    }
}

fn parse_style(raw: &str) -> Result<Style, String> {
    let value: serde_json::Value = serde_json::from_str(raw.trim()).map_err(|e| e.to_string())?;
    Style::from_json(value).ok_or_else(|| "expected a JSON object".to_string())
}
