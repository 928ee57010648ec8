use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const HLS_MIME_TYPE: &str = "application/vnd.apple.mpegurl";

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Request timeout; unset leaves the transport defaults in place
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ApiConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub fragment_command: Option<Vec<String>>,
    #[serde(default)]
    pub native_command: Option<Vec<String>>,
    #[serde(default = "default_native_mime_types")]
    pub native_mime_types: Vec<String>,
    #[serde(default)]
    pub debug: bool,
}

fn default_native_mime_types() -> Vec<String> {
    vec![HLS_MIME_TYPE.to_string()]
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            fragment_command: None,
            native_command: None,
            native_mime_types: default_native_mime_types(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

impl AppConfig {
    pub fn load_default() -> anyhow::Result<Self> {
        let default = include_str!("../config/default.toml");
        let cfg: AppConfig = toml::from_str(default)?;
        Ok(cfg)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let p = path.into();
        let s = fs::read_to_string(&p)?;
        let cfg: AppConfig = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Explicit path wins; `CAMVIEW_API_URL` overrides the base URL either way
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load_default()?,
        };
        if let Ok(url) = std::env::var("CAMVIEW_API_URL") {
            tracing::debug!("api base url overridden from environment: {}", url);
            cfg.api.base_url = url;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_parses() {
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.api.base_url, "http://127.0.0.1:8000");
        assert!(cfg.api.timeout().is_none());
        assert!(cfg.player.native_mime_types.iter().any(|m| m == HLS_MIME_TYPE));
    }

    #[test]
    fn test_player_section_is_optional() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            "[api]\nbase_url = \"http://cams.local\"\ntimeout_secs = 5\n\n[session]\npath = \"s.json\""
        )?;

        let cfg = AppConfig::load_from(file.path())?;
        assert_eq!(cfg.api.timeout(), Some(Duration::from_secs(5)));
        assert!(cfg.player.fragment_command.is_none());
        assert_eq!(cfg.player.native_mime_types, vec![HLS_MIME_TYPE.to_string()]);
        Ok(())
    }
}
