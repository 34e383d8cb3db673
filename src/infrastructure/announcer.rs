use crate::infrastructure::config::{AnnouncementBackend, AppConfig};
use reqwest::Client;
use std::io::Write;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use url::Url;

const VOICE_TIMEOUT: Duration = Duration::from_secs(5);

/// Somewhere to send a spoken or audible message. Returning `false` means the
/// message could not be dispatched; callers log it and carry on.
pub trait AnnouncementSink: Send + Sync {
    fn announce(&self, message: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct VoiceAnnouncer {
    client: Client,
    api_url: Option<Url>,
}

impl VoiceAnnouncer {
    pub fn new(api_url: &str) -> Self {
        let api_url = Url::parse(api_url.trim()).ok();
        if api_url.is_none() {
            tracing::warn!("voice announcement url could not be parsed; announcements will be dropped");
        }
        Self {
            client: Client::new(),
            api_url,
        }
    }

    fn request_url(&self, message: &str) -> Option<Url> {
        let mut url = self.api_url.clone()?;
        url.query_pairs_mut().append_pair("text", message);
        Some(url)
    }
}

impl AnnouncementSink for VoiceAnnouncer {
    fn announce(&self, message: &str) -> bool {
        let Some(url) = self.request_url(message) else {
            return false;
        };
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("no async runtime available for voice announcement");
            return false;
        };

        let client = self.client.clone();
        let message = message.to_string();
        runtime.spawn(async move {
            match client.get(url).timeout(VOICE_TIMEOUT).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(%message, "voice announcement delivered");
                }
                Ok(response) => {
                    tracing::warn!(status = response.status().as_u16(), %message, "voice announcement rejected");
                }
                Err(error) => {
                    tracing::warn!(%error, %message, "voice announcement failed");
                }
            }
        });
        true
    }
}

/// Terminal bell plus the platform speech command, fire and forget.
#[derive(Debug, Clone)]
pub struct LocalChimeAnnouncer {
    speech_command: String,
}

impl Default for LocalChimeAnnouncer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl LocalChimeAnnouncer {
    pub fn new(speech_command: Option<&str>) -> Self {
        let speech_command = speech_command
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .unwrap_or(if cfg!(target_os = "macos") { "say" } else { "spd-say" })
            .to_string();
        Self { speech_command }
    }

    fn ring_bell() {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(b"\x07");
        let _ = stdout.flush();
    }

    /// Starts the speech command and a task that waits for it to exit, so
    /// finished speech processes are reaped.
    fn spawn_speech(
        &self,
        runtime: &Handle,
        message: &str,
    ) -> std::io::Result<JoinHandle<Option<ExitStatus>>> {
        let _entered = runtime.enter();
        let mut child = tokio::process::Command::new(&self.speech_command)
            .arg(sanitize_for_speech(message))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let command = self.speech_command.clone();
        Ok(runtime.spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    if !status.success() {
                        tracing::debug!(%command, %status, "speech command exited unsuccessfully");
                    }
                    Some(status)
                }
                Err(error) => {
                    tracing::warn!(%error, %command, "failed waiting for speech command");
                    None
                }
            }
        }))
    }
}

impl AnnouncementSink for LocalChimeAnnouncer {
    fn announce(&self, message: &str) -> bool {
        Self::ring_bell();
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("no async runtime available for speech command");
            return false;
        };
        match self.spawn_speech(&runtime, message) {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(%error, command = %self.speech_command, "speech command failed to start");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogAnnouncer;

impl AnnouncementSink for LogAnnouncer {
    fn announce(&self, message: &str) -> bool {
        tracing::info!(%message, "announcement");
        true
    }
}

pub fn build_announcer(config: &AppConfig) -> Arc<dyn AnnouncementSink> {
    if !config.timer.enable_announcements {
        return Arc::new(LogAnnouncer);
    }
    match config.announcements.backend {
        AnnouncementBackend::Voice => match config.voice_endpoint() {
            Some(url) => Arc::new(VoiceAnnouncer::new(url)),
            None => Arc::new(LogAnnouncer),
        },
        AnnouncementBackend::Local => Arc::new(LocalChimeAnnouncer::new(
            config.announcements.local_command.as_deref(),
        )),
        AnnouncementBackend::Log => Arc::new(LogAnnouncer),
    }
}

/// Keeps only characters a speech engine reads naturally.
pub fn sanitize_for_speech(message: &str) -> String {
    message
        .chars()
        .filter(|ch| ch.is_alphanumeric() || matches!(ch, ' ' | '.' | ',' | '!' | '?' | ':' | '\'' | '-'))
        .collect::<String>()
        .trim()
        .to_string()
}
