//! Voice definitions on disk.
//!
//! A voice `key` lives in `<base_dir>/<key>/` and needs `<key>.pth` and
//! `<key>.index` next to each other. An optional `voice.toml` carries
//! per-voice defaults:
//!
//! ```toml
//! [voice]
//! edge_voice = "en-US-AriaNeural"
//! rvc_pitch = 2
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct VoiceConfig {
    #[serde(default)]
    voice: VoiceDefaults,
}

/// Parameters applied when a request leaves them unset.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VoiceDefaults {
    pub edge_voice: Option<String>,
    pub rvc_pitch: Option<i32>,
    pub tts_rate: Option<i32>,
}

/// Backing files for one voice.
#[derive(Debug, Clone)]
pub struct VoiceDefinition {
    pub key: String,
    pub model_path: PathBuf,
    pub index_path: PathBuf,
    pub defaults: VoiceDefaults,
}

/// Resolves voice keys against a models directory.
#[derive(Debug, Clone)]
pub struct VoiceLibrary {
    base_dir: PathBuf,
}

impl VoiceLibrary {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Look up the definition for `key`. Missing files are `NotFound`.
    pub async fn resolve(&self, key: &str) -> Result<VoiceDefinition> {
        validate_key(key)?;

        let dir = self.base_dir.join(key);
        let model_path = dir.join(format!("{key}.pth"));
        let index_path = dir.join(format!("{key}.index"));

        if !tokio::fs::try_exists(&model_path).await? {
            return Err(Error::NotFound(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }
        if !tokio::fs::try_exists(&index_path).await? {
            return Err(Error::NotFound(format!(
                "index file not found: {}",
                index_path.display()
            )));
        }

        let config_path = dir.join("voice.toml");
        let defaults = if tokio::fs::try_exists(&config_path).await? {
            let content = tokio::fs::read_to_string(&config_path).await?;
            let config: VoiceConfig = toml::from_str(&content).map_err(|e| {
                Error::Config(format!("bad voice config {}: {e}", config_path.display()))
            })?;
            config.voice
        } else {
            VoiceDefaults::default()
        };

        debug!(key, model = %model_path.display(), "voice definition resolved");

        Ok(VoiceDefinition {
            key: key.to_string(),
            model_path,
            index_path,
            defaults,
        })
    }
}

/// A key must name exactly one directory under the base dir.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(['/', '\\'])
        || key.contains('\0');
    if bad {
        return Err(Error::NotFound(format!("invalid voice key: {key:?}")));
    }
    Ok(())
}
