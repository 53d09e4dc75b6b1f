//! End-to-end test of the external-program voice backend.
#![cfg(unix)]

mod common;

use common::{add_voice, temp_dir};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use voxq::cache::{CommandVoiceLoader, VoiceCache, VoiceLibrary};
use voxq::error::Error;
use voxq::handler::SynthesisHandler;
use voxq::model::SynthesisRequest;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn handler(program: PathBuf, models: &Path, output: &Path) -> SynthesisHandler<CommandVoiceLoader> {
    let cache = VoiceCache::new(
        CommandVoiceLoader::new(program),
        VoiceLibrary::new(models),
        Duration::from_secs(60),
    );
    SynthesisHandler::new(cache, output)
}

// Scenarios run sequentially in one test: writing a script while another
// thread forks can make exec fail with ETXTBSY.
#[tokio::test]
async fn voice_program_runs_with_job_environment() {
    let bin = temp_dir("bin");
    let models = temp_dir("models");
    add_voice(&models, "voiceA");

    // Success: the program sees the job in its environment.
    let speak = script(
        &bin,
        "speak.sh",
        r#"printf '%s|%s|%s|%s' "$VOXQ_VOICE_KEY" "$VOXQ_VOICE" "$VOXQ_PITCH" "$VOXQ_TEXT" > "$VOXQ_OUTPUT""#,
    );
    let output = temp_dir("out-ok");
    let result = handler(speak, &models, &output)
        .synthesize(
            &SynthesisRequest::new("voiceA", "hello there")
                .edge_voice("en-US-AriaNeural")
                .rvc_pitch(3),
        )
        .await
        .unwrap();
    let url = result["audio_url"].as_str().unwrap();
    let file = output.join(url.trim_start_matches("/audio/"));
    assert_eq!(
        std::fs::read_to_string(file).unwrap(),
        "voiceA|en-US-AriaNeural|3|hello there"
    );

    // Non-zero exit surfaces as a handler error.
    let failing = script(&bin, "fail.sh", "exit 3");
    let result = handler(failing, &models, &temp_dir("out-fail"))
        .synthesize(&SynthesisRequest::new("voiceA", "hi"))
        .await;
    match result {
        Err(Error::Handler(msg)) => assert!(msg.contains("status 3"), "got {msg}"),
        other => panic!("expected handler error, got {other:?}"),
    }

    // Missing program fails the model build.
    let result = handler(bin.join("absent.sh"), &models, &temp_dir("out-missing"))
        .synthesize(&SynthesisRequest::new("voiceA", "hi"))
        .await;
    assert!(matches!(result, Err(Error::Config(_))));
}
