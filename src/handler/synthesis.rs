//! Voice synthesis through the model cache.

use super::{HandlerFuture, WorkHandler};
use crate::cache::{SynthesisJob, VoiceCache, VoiceLoader, VoiceModel};
use crate::error::{Error, Result};
use crate::model::{SynthesisRequest, WorkRequest};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Old renders kept in the output directory by default.
pub const DEFAULT_KEEP_LAST: usize = 10;

/// Renders synthesis requests to wav files in `output_dir`.
///
/// Before each render, all but the newest `keep_last` `.wav` files in the
/// directory are deleted.
pub struct SynthesisHandler<L: VoiceLoader> {
    cache: VoiceCache<L>,
    output_dir: PathBuf,
    url_prefix: String,
    keep_last: Option<usize>,
}

impl<L: VoiceLoader> SynthesisHandler<L> {
    pub fn new(cache: VoiceCache<L>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            output_dir: output_dir.into(),
            url_prefix: "/audio".to_string(),
            keep_last: Some(DEFAULT_KEEP_LAST),
        }
    }

    /// How many previous renders to keep. `0` keeps everything.
    pub fn keep_last(mut self, keep: usize) -> Self {
        self.keep_last = (keep > 0).then_some(keep);
        self
    }

    /// Public URL prefix for generated files (default `/audio`).
    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    /// Synthesize one request and return `{"audio_url": ...}`.
    pub async fn synthesize(&self, request: &SynthesisRequest) -> Result<serde_json::Value> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        if let Some(keep) = self.keep_last {
            prune_outputs(&self.output_dir, keep).await;
        }

        let filename = format!("response_{}.wav", Uuid::new_v4());
        let output = self.output_dir.join(&filename);

        {
            let mut voice = self
                .cache
                .acquire(&request.voice_id, request.edge_voice.as_deref())
                .await?;
            let defaults = voice.definition().defaults.clone();
            if let (None, Some(default_voice)) = (&request.edge_voice, &defaults.edge_voice) {
                voice.set_voice(default_voice);
            }

            let job = SynthesisJob {
                text: request.text.clone(),
                pitch: request.rvc_pitch.or(defaults.rvc_pitch).unwrap_or(0),
                rate: request.tts_rate.or(defaults.tts_rate).unwrap_or(0),
                output: output.clone(),
            };
            info!(voice = %request.voice_id, file = %filename, "generating audio");
            voice.synthesize(&job).await?;
        }

        if !tokio::fs::try_exists(&output).await? {
            return Err(Error::Handler("failed to generate audio file".to_string()));
        }

        Ok(json!({ "audio_url": format!("{}/{filename}", self.url_prefix) }))
    }
}

impl<L: VoiceLoader> WorkHandler for SynthesisHandler<L> {
    fn handle(&self, request: WorkRequest) -> HandlerFuture<'_> {
        Box::pin(async move {
            match request {
                WorkRequest::Synthesis(req) => self.synthesize(&req).await,
                other => Err(Error::InvalidRequest(format!(
                    "synthesis handler cannot run {} work",
                    other.kind()
                ))),
            }
        })
    }
}

/// Delete all but the `keep` newest `.wav` files in `dir`. Failures are
/// logged and never fail the render.
async fn prune_outputs(dir: &Path, keep: usize) {
    let files = match wav_files_newest_first(dir).await {
        Ok(files) => files,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "output cleanup failed");
            return;
        }
    };
    for path in files.into_iter().skip(keep) {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(file = %path.display(), "old output removed"),
            Err(e) => warn!(file = %path.display(), error = %e, "failed to remove old output"),
        }
    }
}

async fn wav_files_newest_first(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "wav") {
            continue;
        }
        // Gone or unreadable since the listing: skip it.
        let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
            continue;
        };
        files.push((modified, path));
    }
    files.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(files.into_iter().map(|(_, path)| path).collect())
}
