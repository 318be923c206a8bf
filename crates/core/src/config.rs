use serde::Deserialize;

/// Root SDK configuration. Loaded from environment variables with the
/// prefix `CAMPAIGN_SDK__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SdkConfig {
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub qa: QaConfig,
}

/// Defaults for campaign rules. A campaign's own `rules` block overrides
/// each value it carries.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    #[serde(default = "default_delay_first_message_secs")]
    pub delay_first_message_secs: i64,
    #[serde(default = "default_min_delay_between_messages_secs")]
    pub min_delay_between_messages_secs: i64,
    #[serde(default = "default_max_impressions")]
    pub max_impressions: u64,
    #[serde(default = "default_auto_show_trigger")]
    pub auto_show_trigger: String,
    #[serde(default = "default_priority")]
    pub default_priority: i32,
    #[serde(default)]
    pub random_seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_cdn_images")]
    pub cdn_images: String,
    #[serde(default = "default_cdn_fonts")]
    pub cdn_fonts: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Per-request timeout for the HTTP transport.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QaConfig {
    #[serde(default)]
    pub logging_enabled: bool,
}

// Default functions
fn default_delay_first_message_secs() -> i64 {
    180
}
fn default_min_delay_between_messages_secs() -> i64 {
    60
}
fn default_max_impressions() -> u64 {
    99_999
}
fn default_auto_show_trigger() -> String {
    "sdk.messages.show_at_session_start".to_string()
}
fn default_priority() -> i32 {
    9999
}
fn default_cdn_images() -> String {
    "https://content-cdn.campaignexpress.io/images/".to_string()
}
fn default_cdn_fonts() -> String {
    "https://content-cdn.campaignexpress.io/fonts/".to_string()
}
fn default_cache_dir() -> String {
    "campaign-assets".to_string()
}
fn default_download_timeout_secs() -> u64 {
    30
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            delay_first_message_secs: default_delay_first_message_secs(),
            min_delay_between_messages_secs: default_min_delay_between_messages_secs(),
            max_impressions: default_max_impressions(),
            auto_show_trigger: default_auto_show_trigger(),
            default_priority: default_priority(),
            random_seed: None,
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            cdn_images: default_cdn_images(),
            cdn_fonts: default_cdn_fonts(),
            cache_dir: default_cache_dir(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            messaging: MessagingConfig::default(),
            assets: AssetsConfig::default(),
            qa: QaConfig::default(),
        }
    }
}

impl SdkConfig {
    /// Load configuration from environment variables only.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from an optional TOML file, then environment
    /// variables. Environment values win.
    pub fn load_from(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("CAMPAIGN_SDK")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SdkConfig::default();
        assert_eq!(config.messaging.delay_first_message_secs, 180);
        assert_eq!(config.messaging.min_delay_between_messages_secs, 60);
        assert_eq!(config.messaging.max_impressions, 99_999);
        assert!(config.messaging.random_seed.is_none());
        assert!(!config.qa.logging_enabled);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[messaging]\nmin_delay_between_messages_secs = 5\nrandom_seed = 42\n\n[qa]\nlogging_enabled = true"
        )
        .unwrap();

        let config = SdkConfig::load_from(file.path().to_str()).unwrap();
        assert_eq!(config.messaging.min_delay_between_messages_secs, 5);
        assert_eq!(config.messaging.random_seed, Some(42));
        // Untouched keys keep their defaults.
        assert_eq!(config.messaging.delay_first_message_secs, 180);
        assert_eq!(config.assets.cache_dir, "campaign-assets");
        assert_eq!(config.assets.download_timeout_secs, 30);
        assert!(config.qa.logging_enabled);
    }
}
