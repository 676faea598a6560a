//! Spawning a chunk's command.

use super::ExecError;
use std::io::Write;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Macro in `args` replaced by the path of the file holding the chunk's code
pub const INPUT_FILE_MACRO: &str = "$input_file";

/// Everything needed to run one generic command
#[derive(Debug)]
pub(crate) struct CommandRun<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub code: &'a str,
    pub lang: &'a str,
    /// Pipe code to stdin instead of writing a temp file
    pub use_stdin: bool,
    pub cwd: &'a Path,
    pub timeout: Option<Duration>,
}

/// Captured output of a finished command
#[derive(Debug)]
pub(crate) struct CommandOutput {
    /// stdout followed by stderr
    pub raw: Vec<u8>,
    pub exit_code: Option<i32>,
}

pub(crate) async fn run_command(run: CommandRun<'_>) -> Result<CommandOutput, ExecError> {
    let input = if run.use_stdin {
        None
    } else {
        Some(write_input_file(run.code, run.lang)?)
    };

    let args = expand_args(run.args, input.as_ref().map(|f| f.path()));
    debug!(program = run.program, ?args, cwd = %run.cwd.display(), "spawning chunk command");

    let mut child = Command::new(run.program)
        .args(&args)
        .current_dir(run.cwd)
        .stdin(if run.use_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: run.program.to_string(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        let code = run.code.to_string();
        // Written from its own task so a chatty child can't deadlock on a full stdout pipe
        tokio::spawn(async move {
            if let Err(err) = stdin.write_all(code.as_bytes()).await {
                warn!(%err, "failed writing chunk code to stdin");
            }
        });
    }

    let output = match run.timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ExecError::Timeout(limit))?,
        None => child.wait_with_output().await,
    }
    .map_err(ExecError::Io)?;

    // The temp file must outlive the process
    drop(input);

    let Output {
        status,
        mut stdout,
        stderr,
    } = output;
    stdout.extend_from_slice(&stderr);

    if !status.success() {
        return Err(ExecError::Failed {
            exit_code: status.code(),
            output: String::from_utf8_lossy(&stdout).into_owned(),
        });
    }

    Ok(CommandOutput {
        raw: stdout,
        exit_code: status.code(),
    })
}

/// Substitute the input file into `args`, appending it when no macro is present
pub(crate) fn expand_args(args: &[String], input: Option<&Path>) -> Vec<String> {
    let Some(input) = input else {
        return args.to_vec();
    };
    let path = input.to_string_lossy();

    let mut substituted = false;
    let mut expanded: Vec<String> = args
        .iter()
        .map(|arg| {
            if arg.contains(INPUT_FILE_MACRO) {
                substituted = true;
                arg.replace(INPUT_FILE_MACRO, &path)
            } else {
                arg.clone()
            }
        })
        .collect();

    if !substituted {
        expanded.push(path.into_owned());
    }
    expanded
}

pub(crate) fn write_input_file(code: &str, lang: &str) -> Result<NamedTempFile, ExecError> {
    let mut file = tempfile::Builder::new()
        .prefix("livedoc_")
        .suffix(extension_for(lang))
        .tempfile()
        .map_err(ExecError::Io)?;
    file.write_all(code.as_bytes()).map_err(ExecError::Io)?;
    file.flush().map_err(ExecError::Io)?;
    Ok(file)
}

fn extension_for(lang: &str) -> &'static str {
    match lang.to_ascii_lowercase().as_str() {
        "python" | "py" => ".py",
        "javascript" | "js" | "node" => ".js",
        "typescript" | "ts" => ".ts",
        "sh" | "bash" | "zsh" | "shell" => ".sh",
        "ruby" | "rb" => ".rb",
        "r" => ".r",
        "rust" | "rs" => ".rs",
        "go" => ".go",
        "julia" => ".jl",
        "perl" => ".pl",
        "php" => ".php",
        "lua" => ".lua",
        "latex" | "tex" => ".tex",
        "ditaa" | "text" | "" => ".txt",
        _ => ".tmp",
    }
}
