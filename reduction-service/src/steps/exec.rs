// Exec Step
// Runs an external command against the extracted archive and captures stdout

use crate::cache::ArtifactValue;
use crate::definition::ExecStep;
use crate::error::ExecutionError;
use crate::execution::context::ArchiveContext;
use crate::template::Template;

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Longest stderr excerpt kept in an error message
const STDERR_EXCERPT: usize = 512;

/// Shell used to run exec commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shell {
    /// `sh` on Unix, `cmd` on Windows
    #[default]
    Default,
    Bash,
}

impl Shell {
    /// Shell executable and the arguments preceding the script
    fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Default => {
                if cfg!(target_os = "windows") {
                    ("cmd", &["/C"])
                } else {
                    ("sh", &["-c"])
                }
            }
            Shell::Bash => ("bash", &["-c"]),
        }
    }

    fn is_posix(&self) -> bool {
        !(cfg!(target_os = "windows") && *self == Shell::Default)
    }
}

/// Run an exec step; stdout becomes the artifact
pub async fn run(
    node: &str,
    step: &ExecStep,
    ctx: &ArchiveContext,
) -> Result<ArtifactValue, ExecutionError> {
    let command = render(&step.command, node, ctx)?;
    let params = step
        .params
        .iter()
        .map(|p| render(p, node, ctx))
        .collect::<Result<Vec<_>, _>>()?;

    tokio::fs::create_dir_all(&ctx.workdir).await.map_err(|e| {
        ExecutionError::exec_failed(format!(
            "failed to create work directory {}: {}",
            ctx.workdir.display(),
            e
        ))
    })?;

    let (shell_cmd, shell_args) = ctx.shell.get_command();
    let program = which::which(shell_cmd).map_err(|e| {
        ExecutionError::exec_failed(format!("shell '{}' not found: {}", shell_cmd, e))
    })?;

    let mut cmd = Command::new(program);
    cmd.args(shell_args);
    if ctx.shell.is_posix() {
        // Params reach the script as "$@", with the node name as $0
        let script = if params.is_empty() {
            command
        } else {
            with_params(&command).map_err(ExecutionError::exec_failed)?
        };
        cmd.arg(script);
        cmd.arg(node);
        cmd.args(&params);
    } else {
        let mut script = command;
        for param in &params {
            script.push(' ');
            script.push_str(&cmd_quote(param));
        }
        cmd.arg(script);
    }
    cmd.current_dir(&ctx.archive.files_dir);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| ExecutionError::exec_failed(format!("failed to launch command: {}", e)))?;

    let timeout = step.timeout.or(ctx.exec_timeout);

    // Dropping the wait future kills the child
    let output = tokio::select! {
        output = child.wait_with_output() => output
            .map_err(|e| ExecutionError::exec_failed(format!("failed to wait for command: {}", e)))?,
        _ = ctx.cancel.cancelled() => {
            return Err(ExecutionError::cancelled("run was cancelled"));
        }
        _ = sleep_for(timeout) => {
            return Err(ExecutionError::cancelled(format!(
                "command timed out after {:?}",
                timeout.unwrap_or_default()
            )));
        }
    };

    if !output.status.success() {
        let status = output
            .status
            .code()
            .map(|code| format!("exit status {}", code))
            .unwrap_or_else(|| "terminated by signal".to_string());
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();

        let message = if stderr.is_empty() {
            format!("command failed with {}", status)
        } else {
            format!("command failed with {}: {}", status, excerpt(stderr))
        };
        return Err(ExecutionError::exec_failed(message));
    }

    Ok(ArtifactValue::Bytes(output.stdout))
}

fn render(template: &str, node: &str, ctx: &ArchiveContext) -> Result<String, ExecutionError> {
    let parsed = Template::parse(template)
        .map_err(|e| ExecutionError::exec_failed(format!("invalid command template: {}", e)))?;
    Ok(ctx.render(&parsed, node))
}

/// Append `"$@"` to the last command of a POSIX script
///
/// Trailing whitespace and a trailing comment are dropped first. A script
/// whose last line ends in an operator has no command to extend.
pub(crate) fn with_params(command: &str) -> Result<String, String> {
    let body = strip_trailing_comment(command.trim_end()).trim_end();

    if body.is_empty() {
        return Err("command is empty".to_string());
    }
    if let Some(op) = [';', '&', '|', '\\'].iter().find(|op| body.ends_with(**op)) {
        return Err(format!(
            "params cannot follow a command ending in '{}'",
            op
        ));
    }

    Ok(format!("{} \"$@\"", body))
}

/// Remove a `#` comment from the last line, respecting quotes
fn strip_trailing_comment(script: &str) -> &str {
    let line_start = script.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line = &script[line_start..];

    let mut single = false;
    let mut double = false;
    let mut escaped = false;
    let mut prev_blank = true;

    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
        } else if single {
            single = c != '\'';
        } else if c == '\\' {
            escaped = true;
        } else if double {
            double = c != '"';
        } else if c == '\'' {
            single = true;
        } else if c == '"' {
            double = true;
        } else if c == '#' && prev_blank {
            return &script[..line_start + i];
        }
        prev_blank = c.is_whitespace();
    }

    script
}

/// Quote one argument for `cmd /C`
fn cmd_quote(param: &str) -> String {
    let plain = !param.is_empty()
        && !param
            .chars()
            .any(|c| c.is_whitespace() || "\"&|<>^(),;=".contains(c));
    if plain {
        param.to_string()
    } else {
        format!("\"{}\"", param.replace('"', "\"\""))
    }
}

async fn sleep_for(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

fn excerpt(text: &str) -> &str {
    if text.len() <= STDERR_EXCERPT {
        return text;
    }
    let mut end = STDERR_EXCERPT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
