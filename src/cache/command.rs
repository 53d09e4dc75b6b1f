//! External-program voice backend.
//!
//! The voice conversion itself runs in a separate program. A
//! [`CommandVoice`] binds one voice definition to that program and invokes
//! it once per synthesis with everything it needs in the environment:
//!
//! | variable          | value                          |
//! |-------------------|--------------------------------|
//! | `VOXQ_MODEL_PATH` | `<key>.pth`                    |
//! | `VOXQ_INDEX_PATH` | `<key>.index`                  |
//! | `VOXQ_VOICE_KEY`  | voice key                      |
//! | `VOXQ_VOICE`      | base TTS voice, if set         |
//! | `VOXQ_TEXT`       | text to speak                  |
//! | `VOXQ_PITCH`      | pitch shift                    |
//! | `VOXQ_RATE`       | rate adjustment                |
//! | `VOXQ_OUTPUT`     | wav file the program must write |

use super::{SynthesisJob, VoiceDefinition, VoiceLoader, VoiceModel};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Loader that produces [`CommandVoice`] models.
#[derive(Debug, Clone)]
pub struct CommandVoiceLoader {
    program: PathBuf,
}

impl CommandVoiceLoader {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl VoiceLoader for CommandVoiceLoader {
    type Model = CommandVoice;

    async fn load(&self, definition: &VoiceDefinition) -> Result<CommandVoice> {
        let program = resolve_program(&self.program)?;
        if !tokio::fs::try_exists(&program).await? {
            return Err(Error::Config(format!(
                "voice program not found: {}",
                program.display()
            )));
        }
        Ok(CommandVoice {
            program,
            definition: definition.clone(),
            voice: definition.defaults.edge_voice.clone(),
        })
    }
}

/// One voice bound to the synthesis program.
#[derive(Debug, Clone)]
pub struct CommandVoice {
    program: PathBuf,
    definition: VoiceDefinition,
    voice: Option<String>,
}

impl CommandVoice {
    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }
}

impl VoiceModel for CommandVoice {
    fn set_voice(&mut self, voice: &str) {
        self.voice = Some(voice.to_string());
    }

    async fn synthesize(&mut self, job: &SynthesisJob) -> Result<()> {
        let start = Instant::now();
        debug!(
            key = %self.definition.key,
            program = %self.program.display(),
            output = %job.output.display(),
            "running voice program"
        );

        let mut command = Command::new(&self.program);
        command
            .env("VOXQ_MODEL_PATH", &self.definition.model_path)
            .env("VOXQ_INDEX_PATH", &self.definition.index_path)
            .env("VOXQ_VOICE_KEY", &self.definition.key)
            .env("VOXQ_TEXT", &job.text)
            .env("VOXQ_PITCH", job.pitch.to_string())
            .env("VOXQ_RATE", job.rate.to_string())
            .env("VOXQ_OUTPUT", &job.output)
            .kill_on_drop(true);
        if let Some(ref voice) = self.voice {
            command.env("VOXQ_VOICE", voice);
        }

        let status = command.status().await?;
        debug!(
            key = %self.definition.key,
            duration_ms = start.elapsed().as_millis() as u64,
            "voice program finished"
        );

        if status.success() {
            Ok(())
        } else {
            Err(Error::Handler(format!(
                "voice program exited with status {}",
                status.code().unwrap_or(-1)
            )))
        }
    }
}

/// Relative program paths resolve against the process CWD.
fn resolve_program(program: &Path) -> Result<PathBuf> {
    if program.is_relative() {
        Ok(std::env::current_dir()?.join(program))
    } else {
        Ok(program.to_path_buf())
    }
}
