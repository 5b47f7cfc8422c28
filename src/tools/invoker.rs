use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::types::{ToolDefinition, ToolError};
use crate::streaming::accumulator::PendingToolCall;

/// Result text handed to the model when a script cannot run or exits non-zero.
pub const TOOL_FAILURE_FALLBACK: &str = "fail to call tool";

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Resolves `call` against `tools` and returns the text to feed back to
    /// the model. Only an unknown tool or unparseable arguments are errors;
    /// execution failures come back as [`TOOL_FAILURE_FALLBACK`].
    async fn invoke(
        &self,
        call: &PendingToolCall,
        tools: &[ToolDefinition],
    ) -> Result<String, ToolError>;
}

/// Runs each tool as an executable under `scripts_root`, passing every
/// argument as a `--key value` pair.
#[derive(Debug, Clone)]
pub struct ScriptInvoker {
    scripts_root: PathBuf,
    timeout: Option<Duration>,
}

impl ScriptInvoker {
    pub fn new(scripts_root: impl Into<PathBuf>) -> Self {
        Self {
            scripts_root: scripts_root.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Script references are relative paths that stay under `scripts_root`.
    fn script_path(&self, script: &str) -> Result<PathBuf, ToolError> {
        let relative = Path::new(script);
        let contained = !script.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !contained {
            return Err(ToolError::Execution(format!(
                "script {:?} is outside the scripts root",
                script
            )));
        }
        Ok(self.scripts_root.join(relative))
    }

    async fn run_script(&self, script: &str, flags: &[String]) -> Result<String, ToolError> {
        let path = self.script_path(script)?;

        let mut cmd = Command::new(&path);
        cmd.args(flags)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => timeout(limit, cmd.output())
                .await
                .map_err(|_| ToolError::Timeout(limit.as_secs()))?,
            None => cmd.output().await,
        }
        .map_err(|e| ToolError::Execution(format!("Failed to spawn {}: {}", path.display(), e)))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ToolError::Execution(format!(
                "{} exited with {}: {}",
                path.display(),
                output.status,
                combined
            )));
        }

        Ok(combined)
    }
}

#[async_trait]
impl ToolInvoker for ScriptInvoker {
    async fn invoke(
        &self,
        call: &PendingToolCall,
        tools: &[ToolDefinition],
    ) -> Result<String, ToolError> {
        let tool = tools
            .iter()
            .find(|tool| tool.name() == call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let arguments = parse_arguments(&call.arguments)?;
        let flags = to_flags(&arguments);

        debug!(tool = %call.name, script = %tool.script, flags = ?flags, "Invoking tool script");

        match self.run_script(&tool.script, &flags).await {
            Ok(output) => {
                info!(tool = %call.name, output_len = output.len(), "Tool script finished");
                Ok(output)
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool script failed");
                Ok(TOOL_FAILURE_FALLBACK.to_string())
            }
        }
    }
}

/// Arguments must be a flat JSON object of strings.
pub fn parse_arguments(raw: &str) -> Result<BTreeMap<String, String>, ToolError> {
    serde_json::from_str(raw).map_err(|e| {
        ToolError::InvalidArguments(format!("fail to parse arguments to map: {}", e))
    })
}

pub fn to_flags(arguments: &BTreeMap<String, String>) -> Vec<String> {
    arguments
        .iter()
        .flat_map(|(key, value)| [format!("--{}", key), value.clone()])
        .collect()
}
