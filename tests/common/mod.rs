//! Shared fixtures: a temp voice library and an in-process fake loader.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voxq::cache::{SynthesisJob, VoiceDefinition, VoiceLoader, VoiceModel};
use voxq::error::{Error, Result};

/// A fresh models directory under the system temp dir.
pub fn temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("voxq-test")
        .join(format!("{label}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Create `<base>/<key>/<key>.pth` and `.index`.
pub fn add_voice(base: &Path, key: &str) {
    let dir = base.join(key);
    std::fs::create_dir_all(&dir).expect("create voice dir");
    std::fs::write(dir.join(format!("{key}.pth")), b"weights").expect("write pth");
    std::fs::write(dir.join(format!("{key}.index")), b"index").expect("write index");
}

pub fn add_voice_config(base: &Path, key: &str, toml: &str) {
    std::fs::write(base.join(key).join("voice.toml"), toml).expect("write voice.toml");
}

/// Counts builds and optionally fails or delays them.
#[derive(Clone, Default)]
pub struct FakeLoader {
    pub builds: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
    pub delay: Duration,
    /// When set, models "succeed" without writing the output file.
    pub skip_output: bool,
    pub jobs: Arc<Mutex<Vec<(Option<String>, SynthesisJob)>>>,
}

impl FakeLoader {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> Vec<(Option<String>, SynthesisJob)> {
        self.jobs.lock().unwrap().clone()
    }
}

pub struct FakeModel {
    pub serial: usize,
    pub key: String,
    pub voice: Option<String>,
    skip_output: bool,
    jobs: Arc<Mutex<Vec<(Option<String>, SynthesisJob)>>>,
}

impl VoiceModel for FakeModel {
    fn set_voice(&mut self, voice: &str) {
        self.voice = Some(voice.to_string());
    }

    async fn synthesize(&mut self, job: &SynthesisJob) -> Result<()> {
        self.jobs
            .lock()
            .unwrap()
            .push((self.voice.clone(), job.clone()));
        if !self.skip_output {
            tokio::fs::write(&job.output, b"RIFF").await?;
        }
        Ok(())
    }
}

impl VoiceLoader for FakeLoader {
    type Model = FakeModel;

    async fn load(&self, definition: &VoiceDefinition) -> Result<FakeModel> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Other("model load failed".to_string()));
        }
        let serial = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeModel {
            serial,
            key: definition.key.clone(),
            voice: definition.defaults.edge_voice.clone(),
            skip_output: self.skip_output,
            jobs: Arc::clone(&self.jobs),
        })
    }
}
