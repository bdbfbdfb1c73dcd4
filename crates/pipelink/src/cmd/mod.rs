use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod connect;
pub mod send;
pub mod serve;
pub mod session;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a pipe, wait for peers and print what they send.
    Serve(ServeArgs),
    /// Attach to an existing pipe, retrying until it appears.
    Connect(ConnectArgs),
    /// Attach to a pipe, send one line and exit.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Connect(args) => connect::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Terminator appended to each line taken from stdin or `--data`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LineEnding {
    #[default]
    Lf,
    Crlf,
    None,
}

impl LineEnding {
    pub fn apply(self, line: &str) -> String {
        match self {
            LineEnding::Lf => format!("{line}\n"),
            LineEnding::Crlf => format!("{line}\r\n"),
            LineEnding::None => line.to_string(),
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Pipe name (short name, or a socket path on Unix).
    pub name: String,
    /// Exit after the first peer disconnects instead of listening again.
    #[arg(long)]
    pub once: bool,
    /// Exit after printing N data events.
    #[arg(long)]
    pub count: Option<usize>,
    /// Do not forward stdin lines to the peer.
    #[arg(long)]
    pub no_stdin: bool,
    /// Line terminator for forwarded stdin lines.
    #[arg(long, value_enum, default_value_t = LineEnding::Lf)]
    pub line_ending: LineEnding,
    /// Pipe buffer and maximum read size in bytes.
    #[arg(long, default_value_t = pipelink_transport::DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Pipe name (short name, or a socket path on Unix).
    pub name: String,
    /// Resume retrying after a disconnect instead of exiting.
    #[arg(long)]
    pub reconnect: bool,
    /// Exit after printing N data events.
    #[arg(long)]
    pub count: Option<usize>,
    /// Do not forward stdin lines to the peer.
    #[arg(long)]
    pub no_stdin: bool,
    /// Line terminator for forwarded stdin lines.
    #[arg(long, value_enum, default_value_t = LineEnding::Lf)]
    pub line_ending: LineEnding,
    /// Delay between attach attempts while the pipe does not exist (e.g. 500ms, 2s).
    #[arg(long, default_value = "500ms")]
    pub retry_interval: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Pipe name (short name, or a socket path on Unix).
    pub name: String,
    /// Text payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file (sent verbatim).
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Line terminator appended to `--data`.
    #[arg(long, value_enum, default_value_t = LineEnding::Lf)]
    pub line_ending: LineEnding,
    /// Give up if the pipe does not accept within this time (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    /// Delay between attach attempts.
    #[arg(long, default_value = "500ms")]
    pub retry_interval: String,
    /// Wait for one reply and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the write to finish and, with --wait, for a reply.
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn line_endings() {
        assert_eq!(LineEnding::Lf.apply("x"), "x\n");
        assert_eq!(LineEnding::Crlf.apply("x"), "x\r\n");
        assert_eq!(LineEnding::None.apply("x"), "x");
    }
}
