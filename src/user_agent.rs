//! Launching a browser (or any URL handler) for the sign-in page

use crate::error::{Result, TinytokenError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;

/// Something that can present an authorization URL to the user
#[async_trait]
pub trait UserAgent: Send + Sync {
    /// Open `url`; return once the user agent has been started
    async fn open(&self, url: &str) -> Result<()>;
}

/// User agent backed by an external command, with the URL as its last argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandUserAgent {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandUserAgent {
    /// Build from a command line such as `firefox --new-window`
    ///
    /// The command line is split with POSIX shell quoting rules, so quoted
    /// paths containing spaces are kept whole.
    ///
    /// # Errors
    ///
    /// Returns `UserAgent` if the command line is empty or has unbalanced quotes.
    pub fn new(command: &str) -> Result<Self> {
        let words = shlex::split(command).ok_or_else(|| {
            TinytokenError::user_agent(format!("unbalanced quotes in user agent command {command:?}"))
        })?;
        let mut words = words.into_iter();
        let program = words
            .next()
            .ok_or_else(|| TinytokenError::user_agent("empty user agent command"))?;
        Ok(Self {
            program: PathBuf::from(program),
            args: words.collect(),
        })
    }

    /// Platform URL handler: `open` on macOS, `xdg-open` on Linux, `start` on Windows
    ///
    /// # Errors
    ///
    /// Returns `UserAgent` on unsupported platforms or when the handler is not installed.
    pub fn system_default() -> Result<Self> {
        #[cfg(target_os = "macos")]
        {
            Self::installed("open")
        }

        #[cfg(target_os = "linux")]
        {
            Self::installed("xdg-open")
        }

        #[cfg(target_os = "windows")]
        {
            Ok(Self {
                program: PathBuf::from("cmd"),
                args: vec!["/C".to_string(), "start".to_string(), String::new()],
            })
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            Err(TinytokenError::user_agent(format!(
                "unable to get default handler for {}. Specify --user-agent manually.",
                std::env::consts::OS
            )))
        }
    }

    #[cfg(any(target_os = "macos", target_os = "linux"))]
    fn installed(name: &str) -> Result<Self> {
        let program = which::which(name).map_err(|_| {
            TinytokenError::user_agent(format!(
                "{} OS detected but {name} not found. Specify --user-agent manually.",
                std::env::consts::OS
            ))
        })?;
        Ok(Self {
            program,
            args: Vec::new(),
        })
    }

    /// Program that will be run
    #[must_use]
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

#[async_trait]
impl UserAgent for CommandUserAgent {
    async fn open(&self, url: &str) -> Result<()> {
        tracing::debug!(program = %self.program.display(), "Launching user agent");

        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TinytokenError::user_agent(format!(
                    "user agent not found: {}",
                    self.program.display()
                )),
                _ => TinytokenError::user_agent(format!(
                    "attempt to start user agent failed: {e}"
                )),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!("User agent stderr: {}", stderr.trim());
            return Err(TinytokenError::user_agent(format!(
                "attempt to start user agent failed with {}",
                output.status
            )));
        }

        Ok(())
    }
}
