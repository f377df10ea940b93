use std::path::Path;

use run_command::{CommandOutput, async_run_command};
use serde::{Deserialize, Serialize};

/// Record of a single shelled-out command: what ran, where, and what came back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Log {
  pub stage: String,
  pub command: String,
  pub stdout: String,
  pub stderr: String,
  pub success: bool,
  pub start_ts: i64,
  pub end_ts: i64,
}

/// Unix millis, matching the timestamp convention used throughout the stack's logs.
pub fn unix_timestamp_ms() -> i64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_millis() as i64)
    .unwrap_or_default()
}

pub async fn run_command(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl AsRef<str>,
) -> Log {
  let command = if let Some(path) = path.into() {
    format!("cd {} && {}", path.display(), command.as_ref())
  } else {
    command.as_ref().to_string()
  };
  let start_ts = unix_timestamp_ms();
  let output = async_run_command(&command).await;
  output_into_log(stage, command, start_ts, output)
}

/// Parses commands out of a multiline string and chains them together with
/// `&&`. Supports full-line and end-of-line `#` comments. Returns an empty
/// string if every line is blank or commented out.
pub fn parse_multiline_command(command: impl AsRef<str>) -> String {
  command
    .as_ref()
    .lines()
    .filter_map(|line| {
      let line = match line.split_once('#') {
        Some((before, _)) => before,
        None => line,
      };
      let line = line.trim();
      if line.is_empty() { None } else { Some(line.to_string()) }
    })
    .collect::<Vec<_>>()
    .join(" && ")
}

/// The result may be `None` if the command is empty after parsing,
/// i.e. if all the lines are commented out.
pub async fn run_multiline_command(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl AsRef<str>,
) -> Option<Log> {
  let command = parse_multiline_command(command);
  if command.is_empty() {
    return None;
  }
  Some(run_command(stage, path, command).await)
}

/// Executes the command, and sanitizes the output to avoid exposing secrets
/// (tokens, passwords) in the resulting log.
///
/// Checks to make sure the command is non-empty after being multiline-parsed.
///
/// If `parse_multiline: true`, parses commands out of a multiline string and
/// chains them together with `&&`, supporting `#` comments. See
/// [parse_multiline_command].
pub async fn run_command_with_sanitization(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl AsRef<str>,
  parse_multiline: bool,
  replacers: &[(String, String)],
) -> Option<Log> {
  let mut log = if parse_multiline {
    run_multiline_command(stage, path, command).await
  } else {
    Some(run_command(stage, path, command).await)
  }?;

  log.command = svi::replace_in_string(&log.command, replacers);
  log.stdout = svi::replace_in_string(&log.stdout, replacers);
  log.stderr = svi::replace_in_string(&log.stderr, replacers);

  Some(log)
}

pub fn output_into_log(
  stage: &str,
  command: String,
  start_ts: i64,
  output: CommandOutput,
) -> Log {
  let success = output.success();
  Log {
    stage: stage.to_string(),
    stdout: output.stdout,
    stderr: output.stderr,
    command,
    success,
    start_ts,
    end_ts: unix_timestamp_ms(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strips_full_line_and_trailing_comments() {
    let input = "# leading comment\necho one\necho two # trailing comment\n\n  # blank-ish\n";
    assert_eq!(parse_multiline_command(input), "echo one && echo two");
  }

  #[test]
  fn all_comments_yields_empty_string() {
    let input = "# only\n# comments\n";
    assert_eq!(parse_multiline_command(input), "");
  }
}
