//! Audio outputs - play one narration to completion
//!
//! An output only knows how to play a locator until the clip ends. Session
//! bookkeeping (which POI, which token, interruption) lives in the worker.

use crate::domain::types::AudioLocator;
use crate::infra::config::{Config, PlaybackMode};
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("audio not found: {0}")]
    NotFound(String),
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("player exited unsuccessfully: {0}")]
    Exited(String),
    #[error("playback rejected: {0}")]
    Rejected(String),
}

/// Something that can play a narration clip
///
/// `play` resolves when the clip ends. Dropping the future must stop the
/// audio; the worker interrupts sessions by aborting the task that owns it.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    fn name(&self) -> &'static str;

    async fn play(&self, audio: &AudioLocator) -> Result<(), PlaybackError>;
}

/// Plays through an external player process (mpv by default)
pub struct CommandOutput {
    program: String,
    args: Vec<String>,
}

impl CommandOutput {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

#[async_trait]
impl AudioOutput for CommandOutput {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn play(&self, audio: &AudioLocator) -> Result<(), PlaybackError> {
        if let Some(path) = audio.local_path() {
            if !path.exists() {
                return Err(PlaybackError::NotFound(path.display().to_string()));
            }
        }

        let start = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(audio.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PlaybackError::Spawn { program: self.program.clone(), source })?;

        debug!(program = %self.program, audio = %audio, pid = ?child.id(), "player_spawned");

        let status = child
            .wait()
            .await
            .map_err(|e| PlaybackError::Exited(format!("wait failed: {e}")))?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if status.success() {
            debug!(audio = %audio, elapsed_ms = %elapsed_ms, "player_exited");
            Ok(())
        } else {
            Err(PlaybackError::Exited(status.to_string()))
        }
    }
}

/// Stands in for a speaker: holds each clip for a fixed duration
///
/// Locators registered with `with_failing` fail immediately, which lets a
/// walk exercise the error path without a broken asset.
pub struct SimulatedOutput {
    clip: Duration,
    failing: FxHashSet<String>,
    history: Mutex<Vec<AudioLocator>>,
}

impl SimulatedOutput {
    pub fn new(clip: Duration) -> Self {
        Self { clip, failing: FxHashSet::default(), history: Mutex::new(Vec::new()) }
    }

    pub fn with_failing(mut self, locator: &AudioLocator) -> Self {
        self.failing.insert(locator.as_str().to_string());
        self
    }

    /// Every locator handed to `play`, in order
    pub fn history(&self) -> Vec<AudioLocator> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl AudioOutput for SimulatedOutput {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn play(&self, audio: &AudioLocator) -> Result<(), PlaybackError> {
        self.history.lock().push(audio.clone());

        if self.failing.contains(audio.as_str()) {
            return Err(PlaybackError::Rejected(format!("{audio} is marked as failing")));
        }
        if let Some(path) = audio.local_path() {
            if !path.exists() {
                return Err(PlaybackError::NotFound(path.display().to_string()));
            }
        }

        tokio::time::sleep(self.clip).await;
        Ok(())
    }
}

/// Build the output selected by `[playback] mode`
pub fn output_from_config(config: &Config) -> Arc<dyn AudioOutput> {
    let output: Arc<dyn AudioOutput> = match config.playback_mode() {
        PlaybackMode::Command => Arc::new(CommandOutput::new(
            config.player_command(),
            config.player_args().to_vec(),
        )),
        PlaybackMode::Simulated => {
            Arc::new(SimulatedOutput::new(Duration::from_secs(config.simulated_clip_secs())))
        }
    };

    info!(
        output = %output.name(),
        command = %config.player_command(),
        "audio_output_configured"
    );
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(raw: &str) -> AudioLocator {
        AudioLocator::parse(raw).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_output_holds_clip_length() {
        let output = SimulatedOutput::new(Duration::from_secs(30));
        let start = tokio::time::Instant::now();

        output.play(&locator("https://host/a.wav")).await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert_eq!(output.history(), vec![locator("https://host/a.wav")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_output_failing_locator() {
        let bad = locator("https://host/broken.wav");
        let output = SimulatedOutput::new(Duration::from_secs(30)).with_failing(&bad);

        let err = output.play(&bad).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Rejected(_)));
        assert!(output.play(&locator("https://host/ok.wav")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_output_checks_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.wav");
        std::fs::write(&clip, b"RIFF").unwrap();

        let output = SimulatedOutput::new(Duration::from_secs(1));
        assert!(output.play(&locator(&clip.display().to_string())).await.is_ok());

        let missing = dir.path().join("missing.wav");
        let err = output.play(&locator(&missing.display().to_string())).await.unwrap_err();
        assert!(matches!(err, PlaybackError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_command_output_missing_local_file() {
        let output = CommandOutput::new("true", Vec::new());
        let err = output.play(&locator("file:///nonexistent/clip.wav")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_command_output_spawn_failure() {
        let output = CommandOutput::new("definitely-not-a-player-binary", Vec::new());
        let err = output.play(&locator("https://host/a.wav")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_output_exit_status() {
        let ok = CommandOutput::new("true", Vec::new());
        assert!(ok.play(&locator("https://host/a.wav")).await.is_ok());

        let failing = CommandOutput::new("false", Vec::new());
        let err = failing.play(&locator("https://host/a.wav")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Exited(_)));
    }

    #[test]
    fn test_output_from_config() {
        let config = Config::default();
        assert_eq!(output_from_config(&config).name(), "command");

        let config = Config::default().with_simulated_playback();
        assert_eq!(output_from_config(&config).name(), "simulated");
    }
}
