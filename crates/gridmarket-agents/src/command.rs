use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use gridmarket_models::{AgentView, Decision, MarketConfig, MarketSnapshot};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::DecisionError;
use crate::parser::parse_decision;
use crate::prompts::instructions_for;
use crate::provider::DecisionProvider;

/// How to launch an external decision command.
#[derive(Debug, Clone)]
pub struct CommandConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

/// Payload written to the command's stdin.
#[derive(Debug, Serialize)]
pub struct DecisionRequest<'a> {
    pub instructions: String,
    pub agent: &'a AgentView,
    pub market: &'a MarketSnapshot,
}

/// Run `config.program`, feed it `input` on stdin and return its stdout.
///
/// The child is killed if the timeout fires first.
pub async fn run_command(input: &str, config: &CommandConfig) -> Result<String, DecisionError> {
    debug!(program = %config.program, "Invoking decision command");

    let output = tokio::time::timeout(config.timeout, async {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        // Feed stdin while draining stdout so a chatty child cannot stall on a full pipe.
        let stdin = child.stdin.take();
        let feed = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(input.as_bytes()).await,
                None => Ok(()),
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        match fed {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
            _ => Ok(output),
        }
    })
    .await
    .map_err(|_| DecisionError::Timeout(config.timeout.as_millis() as u64))?
    .map_err(|e| DecisionError::Command(format!("failed to run {}: {e}", config.program)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(program = %config.program, status = %output.status, stderr = %stderr, "Decision command failed");
        return Err(DecisionError::Command(format!(
            "{} exited {}: {}",
            config.program, output.status, stderr
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if stdout.trim().is_empty() {
        return Err(DecisionError::Command(format!(
            "{} returned empty output",
            config.program
        )));
    }
    Ok(stdout)
}

/// Delegates each decision to an external program speaking JSON over stdio.
pub struct CommandProvider {
    config: CommandConfig,
}

impl CommandProvider {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DecisionProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.config.program
    }

    async fn decide(
        &self,
        agent: &AgentView,
        market: &MarketSnapshot,
        _config: &MarketConfig,
    ) -> Result<Decision, DecisionError> {
        let instructions = instructions_for(agent.kind).ok_or_else(|| {
            DecisionError::Unavailable(format!("no instructions for {} agents", agent.kind))
        })?;
        let request = DecisionRequest {
            instructions,
            agent,
            market,
        };
        let input = serde_json::to_string(&request)?;
        let raw = run_command(&input, &self.config).await?;
        parse_decision(&raw)
    }
}
