//! iMessage delivery through AppleScript (`osascript`).
//!
//! Messages has no public send API; the only supported route is scripting
//! the app. The reply text is embedded in a string literal, so it has to be
//! escaped for AppleScript first.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{error, info};

use crate::channels::ReplySender;
use crate::error::ChannelError;

/// Default time allowed for one `osascript` run.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

const CHANNEL_NAME: &str = "imessage";

/// Cap on captured stderr.
const MAX_STDERR: usize = 8 * 1024;

/// Escape text for use inside an AppleScript string literal.
pub fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Script that sends `text` to the chat with the given guid.
pub fn send_script(chat_guid: &str, text: &str) -> String {
    format!(
        "tell application \"Messages\"\n  set targetChat to a reference to chat id \"{}\"\n  send \"{}\" to targetChat\nend tell",
        escape_applescript(chat_guid),
        escape_applescript(text),
    )
}

/// Sends replies by running `osascript -e <script>`.
#[derive(Debug, Clone)]
pub struct AppleScriptSender {
    program: String,
    timeout: Duration,
}

impl AppleScriptSender {
    pub fn new() -> Self {
        Self {
            program: "osascript".to_string(),
            timeout: DELIVERY_TIMEOUT,
        }
    }

    /// Run a different interpreter with the same arguments.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_script(&self, script: &str) -> Result<(), ChannelError> {
        let mut child = Command::new(&self.program)
            .arg("-e")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ChannelError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let result = tokio::time::timeout(self.timeout, async {
            let status = child.wait().await?;

            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                let mut buf = vec![0u8; MAX_STDERR];
                let n = err.read(&mut buf).await.unwrap_or(0);
                stderr = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            }

            Ok::<_, std::io::Error>((status, stderr))
        })
        .await;

        match result {
            Ok(Ok((status, _))) if status.success() => Ok(()),
            Ok(Ok((status, stderr))) => Err(ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: if stderr.is_empty() {
                    format!("{} exited with {}", self.program, status)
                } else {
                    stderr
                },
            }),
            Ok(Err(e)) => Err(ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("{} failed: {}", self.program, e),
            }),
            Err(_) => {
                let _ = child.kill().await;
                Err(ChannelError::Timeout {
                    name: CHANNEL_NAME.into(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

impl Default for AppleScriptSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplySender for AppleScriptSender {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn deliver(&self, chat_guid: &str, text: &str) -> Result<(), ChannelError> {
        let script = send_script(chat_guid, text);
        match self.run_script(&script).await {
            Ok(()) => {
                info!(chat = %chat_guid, "Sent reply");
                Ok(())
            }
            Err(e) => {
                error!(chat = %chat_guid, error = %e, "AppleScript delivery failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_backslashes_before_quotes() {
        assert_eq!(escape_applescript(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_applescript(r"C:\path"), r"C:\\path");
        assert_eq!(escape_applescript(r#"\""#), r#"\\\""#);
    }

    #[test]
    fn plain_text_is_not_escaped() {
        assert_eq!(escape_applescript("it's fine • ok"), "it's fine • ok");
    }

    #[test]
    fn script_targets_chat_by_guid() {
        let script = send_script("iMessage;-;+15551234567", "He said \"hi\"");
        assert_eq!(
            script,
            "tell application \"Messages\"\n  set targetChat to a reference to chat id \"iMessage;-;+15551234567\"\n  send \"He said \\\"hi\\\"\" to targetChat\nend tell"
        );
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let sender = AppleScriptSender::new().with_program("/nonexistent/osascript");
        let err = sender.deliver("chat", "hi").await.unwrap_err();
        assert!(matches!(err, ChannelError::Spawn { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    mod scripted {
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};

        use super::*;

        /// Write an executable shell script standing in for `osascript`.
        fn fake_osascript(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("osascript");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn passes_script_as_second_argument() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("script.txt");
            let program = fake_osascript(
                dir.path(),
                &format!("[ \"$1\" = \"-e\" ] || exit 3\nprintf '%s' \"$2\" > '{}'", out.display()),
            );
            let sender = AppleScriptSender::new().with_program(program.display().to_string());

            sender.deliver("iMessage;-;chat42", "ok").await.unwrap();
            let script = std::fs::read_to_string(&out).unwrap();
            assert_eq!(script, send_script("iMessage;-;chat42", "ok"));
        }

        #[tokio::test]
        async fn non_zero_exit_reports_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let program = fake_osascript(dir.path(), "echo 'execution error: Messages got an error' >&2\nexit 1");
            let sender = AppleScriptSender::new().with_program(program.display().to_string());

            let err = sender.deliver("chat", "hi").await.unwrap_err();
            match err {
                ChannelError::SendFailed { name, reason } => {
                    assert_eq!(name, "imessage");
                    assert_eq!(reason, "execution error: Messages got an error");
                }
                other => panic!("expected SendFailed, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn slow_delivery_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let program = fake_osascript(dir.path(), "sleep 5");
            let sender = AppleScriptSender::new()
                .with_program(program.display().to_string())
                .with_timeout(Duration::from_millis(100));

            let started = std::time::Instant::now();
            let err = sender.deliver("chat", "hi").await.unwrap_err();
            assert!(matches!(err, ChannelError::Timeout { .. }), "got {err:?}");
            assert!(started.elapsed() < Duration::from_secs(4));
        }
    }
}
