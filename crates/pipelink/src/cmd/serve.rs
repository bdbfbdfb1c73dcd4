use std::sync::Arc;

use pipelink_channel::{Channel, ChannelConfig, ConnectionRole};

use crate::cmd::session::{drive, SessionOptions};
use crate::cmd::ServeArgs;
use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    if args.buffer_size == 0 {
        return Err(CliError::new(USAGE, "--buffer-size must be greater than zero"));
    }

    let config = ChannelConfig {
        buffer_size: args.buffer_size,
        ..ChannelConfig::default()
    };
    let channel = Arc::new(Channel::with_config(ConnectionRole::Server, config));

    drive(
        channel,
        &args.name,
        SessionOptions {
            reopen: !args.once,
            count: args.count,
            forward_stdin: !args.no_stdin,
            line_ending: args.line_ending,
        },
        format,
    )
}
