use std::sync::Arc;

use pipelink_channel::{Channel, ChannelConfig, ConnectionRole};

use crate::cmd::session::{drive, SessionOptions};
use crate::cmd::{parse_duration, ConnectArgs};
use crate::exit::CliResult;
use crate::output::OutputFormat;

pub fn run(args: ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    let config = ChannelConfig {
        retry_backoff: parse_duration(&args.retry_interval)?,
        ..ChannelConfig::default()
    };
    let channel = Arc::new(Channel::with_config(ConnectionRole::Client, config));

    drive(
        channel,
        &args.name,
        SessionOptions {
            reopen: args.reconnect,
            count: args.count,
            forward_stdin: !args.no_stdin,
            line_ending: args.line_ending,
        },
        format,
    )
}
