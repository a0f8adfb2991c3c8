//! Configuration loading and management

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Component type for remote effects ('aurx')
pub const REMOTE_EFFECT_TYPE: &str = "aurx";
pub const COMPONENT_SUBTYPE: &str = "chrs";
pub const COMPONENT_MANUFACTURER: &str = "Lofi";
pub const COMPONENT_NAME: &str = "Lofionic Mani";

/// Errors in configuration values
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("four-char code must be exactly 4 ASCII characters, got {0:?}")]
    InvalidFourCharCode(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Pack a four-character ASCII code into a big-endian u32
pub fn four_char_code(code: &str) -> Result<u32, ConfigError> {
    let bytes = code.as_bytes();
    if bytes.len() != 4 || !code.is_ascii() {
        return Err(ConfigError::InvalidFourCharCode(code.to_string()));
    }
    Ok(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
}

/// Identity under which the effect is published to hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentDescription {
    pub component_type: u32,
    pub subtype: u32,
    pub manufacturer: u32,
}

impl ComponentDescription {
    pub fn from_codes(component_type: &str, subtype: &str, manufacturer: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            component_type: four_char_code(component_type)?,
            subtype: four_char_code(subtype)?,
            manufacturer: four_char_code(manufacturer)?,
        })
    }
}

impl fmt::Display for ComponentDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = |v: u32| String::from_utf8_lossy(&v.to_be_bytes()).into_owned();
        write!(
            f,
            "{}/{}/{}",
            code(self.component_type),
            code(self.subtype),
            code(self.manufacturer)
        )
    }
}

/// Audio session settings applied on activation
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub preferred_sample_rate: f64,
    pub max_frames_per_slice: u32,
    /// Play-and-record alongside other apps' audio
    pub mix_with_others: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preferred_sample_rate: 44_100.0,
            max_frames_per_slice: 4096,
            mix_with_others: true,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    pub session: SessionConfig,

    pub component: ComponentDescription,

    pub component_name: String,

    /// Edge length requested for the host icon
    pub icon_size: u32,

    /// Whether the app starts in the foreground
    pub start_in_foreground: bool,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let mut config = Self::with_home(Path::new(&home))?;

        if let Ok(socket) = std::env::var("CHORUS_HOST_SOCKET") {
            config.socket_path = PathBuf::from(socket);
        }

        if let Ok(rate) = std::env::var("CHORUS_HOST_SAMPLE_RATE") {
            config.session.preferred_sample_rate = parse_sample_rate(&rate)?;
        }

        if let Ok(flag) = std::env::var("CHORUS_HOST_BACKGROUND") {
            config.start_in_foreground = !matches!(flag.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Defaults rooted at the given home directory
    pub fn with_home(home: &Path) -> Result<Self> {
        let data_dir = home.join(".local").join("share").join("chorus-host");
        let socket_path = data_dir.join("host.sock");

        let component = ComponentDescription::from_codes(
            REMOTE_EFFECT_TYPE,
            COMPONENT_SUBTYPE,
            COMPONENT_MANUFACTURER,
        )?;

        Ok(Self {
            socket_path,
            data_dir,
            session: SessionConfig::default(),
            component,
            component_name: COMPONENT_NAME.to_string(),
            icon_size: 100,
            start_in_foreground: true,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn parse_sample_rate(value: &str) -> Result<f64, ConfigError> {
    match value.parse::<f64>() {
        Ok(rate) if rate.is_finite() && rate > 0.0 => Ok(rate),
        _ => Err(ConfigError::InvalidValue {
            key: "CHORUS_HOST_SAMPLE_RATE",
            value: value.to_string(),
        }),
    }
}
