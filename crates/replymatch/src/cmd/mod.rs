use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod request;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer every request envelope with a reply echoing its body.
    Serve(ServeArgs),
    /// Send correlated requests and print their replies.
    Request(RequestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Request(args) => request::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Exit once this many connections have been served.
    #[arg(long, value_name = "N")]
    pub max_connections: Option<usize>,
    /// Wait this long before each reply (e.g. 50ms, 1s).
    #[arg(long, value_name = "DURATION")]
    pub delay: Option<String>,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// JSON request body.
    #[arg(long, conflicts_with = "data")]
    pub json: Option<String>,
    /// String request body.
    #[arg(long, conflicts_with = "json")]
    pub data: Option<String>,
    /// Number of requests issued concurrently on one connection.
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    pub count: u64,
    /// Reply timeout per request (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `5s`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<std::time::Duration> {
    use crate::exit::{CliError, USAGE};
    use std::time::Duration;

    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
