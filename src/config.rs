use crate::defaults;
use crate::error::{HassistError, Result};
use crate::session::Stage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub assist: AssistConfig,
}

/// Home Assistant server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL; relative media paths are resolved against it.
    pub url: String,
}

/// Audio capture and playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub player: String,
    pub player_args: Vec<String>,
}

/// Assist pipeline selection and behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssistConfig {
    /// Pipeline id or name. Unset means the server's preferred pipeline.
    pub pipeline: Option<String>,
    /// End audio runs at text-to-speech and play the response.
    pub speak_responses: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: defaults::SERVER_URL.to_string(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            player: defaults::PLAYER_COMMAND.to_string(),
            player_args: defaults::PLAYER_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            pipeline: None,
            speak_responses: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults only if the file is missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(HassistError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - HASSIST_SERVER_URL → server.url
    /// - HASSIST_PIPELINE → assist.pipeline
    /// - HASSIST_AUDIO_DEVICE → audio.device
    /// - HASSIST_PLAYER → audio.player
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("HASSIST_SERVER_URL")
            && !url.is_empty()
        {
            self.server.url = url;
        }

        if let Ok(pipeline) = std::env::var("HASSIST_PIPELINE")
            && !pipeline.is_empty()
        {
            self.assist.pipeline = Some(pipeline);
        }

        if let Ok(device) = std::env::var("HASSIST_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(player) = std::env::var("HASSIST_PLAYER")
            && !player.is_empty()
        {
            self.audio.player = player;
        }

        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.server.url.starts_with("http://") || self.server.url.starts_with("https://")) {
            return Err(HassistError::ConfigInvalidValue {
                key: "server.url".to_string(),
                message: format!("expected an http(s) URL, got '{}'", self.server.url),
            });
        }
        if self.audio.sample_rate == 0 {
            return Err(HassistError::ConfigInvalidValue {
                key: "audio.sample_rate".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.audio.player.trim().is_empty() {
            return Err(HassistError::ConfigInvalidValue {
                key: "audio.player".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Last stage of audio runs.
    pub fn end_stage(&self) -> Stage {
        if self.assist.speak_responses {
            Stage::Tts
        } else {
            Stage::Intent
        }
    }

    /// Serialize back to TOML, e.g. for `config dump`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HassistError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/hassist/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hassist")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_hassist_env() {
        remove_env("HASSIST_SERVER_URL");
        remove_env("HASSIST_PIPELINE");
        remove_env("HASSIST_AUDIO_DEVICE");
        remove_env("HASSIST_PLAYER");
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.server.url, "http://homeassistant.local:8123");
        assert_eq!(config.audio.device, None);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.player, "mpv");
        assert_eq!(config.audio.player_args, vec!["--no-video", "--really-quiet"]);
        assert_eq!(config.assist.pipeline, None);
        assert!(config.assist.speak_responses);
        assert_eq!(config.end_stage(), Stage::Tts);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let file = write_config(
            r#"
            [server]
            url = "https://ha.example.org"

            [audio]
            device = "pipewire"
            sample_rate = 48000
            player = "ffplay"
            player_args = ["-nodisp", "-autoexit"]

            [assist]
            pipeline = "Home Assistant"
            speak_responses = false
            "#,
        );

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.url, "https://ha.example.org");
        assert_eq!(config.audio.device.as_deref(), Some("pipewire"));
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.player, "ffplay");
        assert_eq!(config.audio.player_args, vec!["-nodisp", "-autoexit"]);
        assert_eq!(config.assist.pipeline.as_deref(), Some("Home Assistant"));
        assert_eq!(config.end_stage(), Stage::Intent);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let file = write_config("[assist]\npipeline = \"01hfv\"\n");
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.assist.pipeline.as_deref(), Some("01hfv"));
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let file = write_config("[server\nurl = ");
        let result = Config::load(file.path());
        assert!(matches!(result, Err(HassistError::Config(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = write_config("[server]\nurl = \"homeassistant.local\"\n");
        match Config::load(file.path()) {
            Err(HassistError::ConfigInvalidValue { key, .. }) => assert_eq!(key, "server.url"),
            other => panic!("expected invalid server.url, got {other:?}"),
        }

        let file = write_config("[audio]\nsample_rate = 0\n");
        match Config::load(file.path()) {
            Err(HassistError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "audio.sample_rate")
            }
            other => panic!("expected invalid audio.sample_rate, got {other:?}"),
        }
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/hassist/config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_propagates_invalid_toml() {
        let file = write_config("not = [valid");
        assert!(Config::load_or_default(file.path()).is_err());
    }

    #[test]
    fn test_env_override_server_and_pipeline() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_hassist_env();
        set_env("HASSIST_SERVER_URL", "http://10.0.0.2:8123");
        set_env("HASSIST_PIPELINE", "kitchen");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.server.url, "http://10.0.0.2:8123");
        assert_eq!(config.assist.pipeline.as_deref(), Some("kitchen"));

        clear_hassist_env();
    }

    #[test]
    fn test_env_override_audio() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_hassist_env();
        set_env("HASSIST_AUDIO_DEVICE", "hw:1,0");
        set_env("HASSIST_PLAYER", "paplay");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.audio.device.as_deref(), Some("hw:1,0"));
        assert_eq!(config.audio.player, "paplay");

        clear_hassist_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_hassist_env();
        set_env("HASSIST_SERVER_URL", "");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.server.url, defaults::SERVER_URL);

        clear_hassist_env();
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path();
        assert!(path.ends_with("hassist/config.toml"));
    }

    #[test]
    fn test_dump_round_trips() {
        let config = Config::default();
        let dumped = config.to_toml().unwrap();
        assert!(dumped.contains("[server]"));
        let parsed: Config = toml::from_str(&dumped).unwrap();
        assert_eq!(parsed, config);
    }
}
