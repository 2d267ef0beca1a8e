//! Plugin configuration surface.
//!
//! Mirrors the options the host integration passes in (typically as JSON):
//! ad tag sources, scheduling, skip policy, companion and VPAID settings.

use crate::error::{AdCueError, Result};
use serde::{Deserialize, Deserializer};
use tracing::warn;

/// Recognized plugin options with their defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginOptions {
    /// Ad tag URL, or an ordered waterfall of URLs tried front-to-back
    pub url: Option<UrlWaterfall>,
    /// Pre-fetched VAST XML, alternative to `url`
    pub xml: Option<String>,
    /// Ad break schedule; when empty, a single preroll is synthesized from
    /// the top-level `url`/`xml`
    pub schedule: Vec<ScheduleItemConfig>,
    /// Seconds before the skip control becomes available; negative disables
    pub skip: i32,
    pub with_credentials: bool,
    pub wrapper_limit: u32,
    /// Leave scrubbing enabled while an ad break plays
    pub seek_enabled: bool,
    pub controls_enabled: bool,
    pub companion: CompanionOptions,
    pub vpaid: VpaidOptions,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            url: None,
            xml: None,
            schedule: Vec::new(),
            skip: 0,
            with_credentials: true,
            wrapper_limit: 10,
            seek_enabled: false,
            controls_enabled: false,
            companion: CompanionOptions::default(),
            vpaid: VpaidOptions::default(),
        }
    }
}

impl PluginOptions {
    /// Load options from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AdCueError::Config(e.to_string()))
    }
}

/// A single ad tag URL or an ordered list of fallback URLs
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UrlWaterfall {
    One(String),
    Many(Vec<String>),
}

impl UrlWaterfall {
    pub fn urls(&self) -> Vec<String> {
        match self {
            UrlWaterfall::One(url) => vec![url.clone()],
            UrlWaterfall::Many(urls) => urls.clone(),
        }
    }
}

/// One scheduled ad break: an offset plus exactly one ad source
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleItemConfig {
    /// "pre" | "post" | seconds | "HH:MM:SS" | "nn%"; missing means preroll
    pub offset: Option<OffsetConfig>,
    pub url: Option<UrlWaterfall>,
    pub xml: Option<String>,
}

/// Raw offset value as it appears in configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OffsetConfig {
    Seconds(f64),
    Text(String),
}

/// Where the ads for one break come from
#[derive(Debug, Clone)]
pub enum AdSource {
    Url(Vec<String>),
    Xml(String),
}

impl ScheduleItemConfig {
    /// Resolve the ad source, requiring exactly one of `url`/`xml`
    pub fn source(&self) -> Result<AdSource> {
        match (&self.url, &self.xml) {
            (Some(url), None) => Ok(AdSource::Url(url.urls())),
            (None, Some(xml)) => Ok(AdSource::Xml(xml.clone())),
            (None, None) => Err(AdCueError::Config(
                "xml or url option must be set".to_string(),
            )),
            (Some(_), Some(_)) => Err(AdCueError::Config(
                "xml and url options are mutually exclusive".to_string(),
            )),
        }
    }
}

/// Companion banner rendering constraints
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompanionOptions {
    /// Id of the external element the host renders companions into
    pub element_id: Option<String>,
    pub max_width: u32,
    pub max_height: u32,
    /// Clear the last companion when content resumes after the break
    pub clear_on_break_end: bool,
}

/// Interactive (VPAID) sandbox settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VpaidOptions {
    /// Class applied to the mounted sandbox container element
    pub container_class: String,
    pub video_instance: VideoInstance,
}

impl Default for VpaidOptions {
    fn default() -> Self {
        Self {
            container_class: "adcue-vpaid-container".to_string(),
            video_instance: VideoInstance::None,
        }
    }
}

/// Which video element the sandboxed ad unit is given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoInstance {
    /// No video element is passed to the sandbox
    #[default]
    None,
    /// Reuse the host player's own playback element
    Same,
    /// Create a separate detached element
    New,
}

impl VideoInstance {
    /// Parse a configured value; anything unrecognized falls back to `Same`
    pub fn from_config(value: &str) -> Self {
        match value {
            "none" => VideoInstance::None,
            "same" => VideoInstance::Same,
            "new" => VideoInstance::New,
            other => {
                warn!("{} is an invalid videoInstance value, defaulting to 'same'", other);
                VideoInstance::Same
            }
        }
    }
}

impl<'de> Deserialize<'de> for VideoInstance {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(VideoInstance::from_config(&value))
    }
}
