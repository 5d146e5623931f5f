//! Response playback through an external media player.

use crate::audio::device::AudioPlayback;
use crate::defaults;
use crate::error::PlaybackError;
use std::process::{Child, Command, Stdio};

/// Plays media URLs by spawning a player process (mpv by default).
///
/// One child at a time: playing a new URL or stopping kills the previous one.
#[derive(Debug)]
pub struct CommandPlayer {
    command: String,
    args: Vec<String>,
    child: Option<Child>,
}

impl CommandPlayer {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            child: None,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                // Already exited.
                tracing::debug!(error = %e, "player kill failed");
            }
            let _ = child.wait();
        }
    }
}

impl Default for CommandPlayer {
    fn default() -> Self {
        Self::new(
            defaults::PLAYER_COMMAND,
            defaults::PLAYER_ARGS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl AudioPlayback for CommandPlayer {
    fn play(&mut self, url: &str) -> Result<(), PlaybackError> {
        self.kill_child();

        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PlaybackError::PlayerNotFound {
                        player: self.command.clone(),
                    }
                } else {
                    PlaybackError::Failed {
                        message: format!("Failed to execute {}: {}", self.command, e),
                    }
                }
            })?;

        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        self.kill_child();
    }

    fn is_playing(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(_))) | Some(Err(_)) => {
                self.child = None;
                false
            }
            None => false,
        }
    }
}

impl Drop for CommandPlayer {
    fn drop(&mut self) {
        self.kill_child();
    }
}
