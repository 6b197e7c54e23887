//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Shell-command driven platform adapter."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use r_chaos_common::config::PlatformConfig;
use tokio::process::Command;
use tracing::debug;

use super::{poll_for_state, Platform};
use crate::error::PlatformError;
use crate::model::{ResourceState, TargetId};

const TARGET_PLACEHOLDER: &str = "{target}";

/// Runs configured shell templates as the inject/revert/state helpers.
///
/// `{target}` in a template is replaced with the target identifier. Helpers are
/// black boxes: a zero exit status is success, anything else is a failure.
#[derive(Debug, Clone)]
pub struct CommandPlatform {
    kind: String,
    shell: String,
    inject: Option<String>,
    revert: Option<String>,
    state: Option<String>,
    faulted_output: String,
    nominal_output: String,
}

impl CommandPlatform {
    pub fn from_config(kind: impl Into<String>, config: &PlatformConfig) -> Self {
        Self {
            kind: kind.into(),
            shell: config.shell.clone(),
            inject: config.inject.clone(),
            revert: config.revert.clone(),
            state: config.state.clone(),
            faulted_output: config.faulted_output.trim().to_string(),
            nominal_output: config.nominal_output.trim().to_string(),
        }
    }

    async fn run(&self, template: &str, target: &TargetId) -> Result<String, PlatformError> {
        let script = template.replace(TARGET_PLACEHOLDER, &target.to_string());
        debug!(target: "r_chaos::platform::command", script = %script, "running helper");
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&script)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| PlatformError::Fatal(format!("failed to spawn '{}': {}", script, err)))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(PlatformError::Fatal(format!(
                "'{}' exited with {}: {}",
                script, output.status, stderr
            )))
        }
    }
}

#[async_trait]
impl Platform for CommandPlatform {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn inject(&self, target: &TargetId) -> Result<(), PlatformError> {
        let template = self
            .inject
            .as_deref()
            .ok_or_else(|| PlatformError::Fatal("no inject command configured".into()))?;
        self.run(template, target).await.map(|_| ())
    }

    async fn revert(&self, target: &TargetId) -> Result<(), PlatformError> {
        let template = self
            .revert
            .as_deref()
            .ok_or_else(|| PlatformError::Fatal("no revert command configured".into()))?;
        self.run(template, target).await.map(|_| ())
    }

    async fn current_state(&self, target: &TargetId) -> Result<ResourceState, PlatformError> {
        let template = self
            .state
            .as_deref()
            .ok_or_else(|| PlatformError::Fatal("no state command configured".into()))?;
        let output = self
            .run(template, target)
            .await
            .map_err(|err| PlatformError::Transient(err.to_string()))?;
        Ok(if output == self.faulted_output {
            ResourceState::Faulted
        } else if output == self.nominal_output {
            ResourceState::Nominal
        } else {
            ResourceState::Transitioning
        })
    }

    async fn wait_for_state(
        &self,
        target: &TargetId,
        desired: ResourceState,
        timeout: Duration,
        poll: Duration,
    ) -> Result<(), PlatformError> {
        if self.state.is_none() {
            // Without a state helper the action's exit status is the only signal.
            return Ok(());
        }
        poll_for_state(self, target, desired, timeout, poll).await
    }
}
