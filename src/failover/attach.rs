//! Network attachment collaborators.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::AttachmentConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttachError {
    /// This attacher cannot associate automatically.
    #[error("association is not supported")]
    Unsupported,

    #[error("failed to run association command: {0}")]
    Spawn(String),
}

/// Joins the host to a named network.
#[async_trait]
pub trait NetworkAttacher: Send + Sync {
    /// Whether [`NetworkAttacher::associate`] can do anything at all.
    fn supports_association(&self) -> bool;

    /// `Ok(false)` means the platform rejected the association.
    async fn associate(&self, name: &str, credential: Option<&str>) -> Result<bool, AttachError>;
}

/// Attacher that leaves association to an operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualAttacher;

#[async_trait]
impl NetworkAttacher for ManualAttacher {
    fn supports_association(&self) -> bool {
        false
    }

    async fn associate(&self, _name: &str, _credential: Option<&str>) -> Result<bool, AttachError> {
        Err(AttachError::Unsupported)
    }
}

/// Attacher that runs a configured command, e.g.
/// `nmcli device wifi connect {name} password {credential}`.
///
/// Exit status zero means associated.
#[derive(Debug, Clone)]
pub struct CommandAttacher {
    command: Vec<String>,
    open_command: Vec<String>,
}

impl CommandAttacher {
    pub fn new(command: Vec<String>, open_command: Vec<String>) -> Self {
        Self {
            command,
            open_command,
        }
    }

    /// `None` when neither template is configured.
    pub fn from_config(config: &AttachmentConfig) -> Option<Self> {
        if config.command.is_empty() && config.open_command.is_empty() {
            None
        } else {
            Some(Self::new(config.command.clone(), config.open_command.clone()))
        }
    }

    /// Open networks prefer `open_command` and fall back to `command`.
    fn template(&self, secure: bool) -> &[String] {
        if !secure && !self.open_command.is_empty() {
            &self.open_command
        } else {
            &self.command
        }
    }

    /// Substitute placeholders in one pass, so substituted text is never
    /// scanned again.
    fn render(template: &[String], name: &str, credential: Option<&str>) -> Vec<String> {
        template
            .iter()
            .map(|arg| {
                let mut out = String::with_capacity(arg.len());
                let mut rest = arg.as_str();
                while let Some(start) = rest.find('{') {
                    out.push_str(&rest[..start]);
                    rest = &rest[start..];
                    if let Some(tail) = rest.strip_prefix("{name}") {
                        out.push_str(name);
                        rest = tail;
                    } else if let Some(tail) = rest.strip_prefix("{credential}") {
                        out.push_str(credential.unwrap_or_default());
                        rest = tail;
                    } else {
                        out.push('{');
                        rest = &rest[1..];
                    }
                }
                out.push_str(rest);
                out
            })
            .collect()
    }
}

#[async_trait]
impl NetworkAttacher for CommandAttacher {
    fn supports_association(&self) -> bool {
        !self.command.is_empty() || !self.open_command.is_empty()
    }

    async fn associate(&self, name: &str, credential: Option<&str>) -> Result<bool, AttachError> {
        let argv = Self::render(self.template(credential.is_some()), name, credential);
        let Some((program, args)) = argv.split_first() else {
            return Err(AttachError::Unsupported);
        };

        // Arguments may carry the secret; only the program is logged.
        tracing::debug!(program = %program, network = name, "Running association command");

        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AttachError::Spawn(e.to_string()))?;

        if output.status.success() {
            Ok(true)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                network = name,
                code = ?output.status.code(),
                stderr = %stderr.trim(),
                "Association command failed"
            );
            Ok(false)
        }
    }
}
