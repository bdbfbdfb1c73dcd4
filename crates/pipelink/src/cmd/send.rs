use std::fs;
use std::time::{Duration, Instant};

use pipelink_channel::{Channel, ChannelConfig, ChannelEvent, ConnectionRole, Subscription};
use tracing::warn;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{channel_error, io_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_event, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let connect_timeout = parse_duration(&args.connect_timeout)?;
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let config = ChannelConfig {
        retry_backoff: parse_duration(&args.retry_interval)?,
        ..ChannelConfig::default()
    };
    let payload = resolve_payload(&args)?;

    let channel = Channel::with_config(ConnectionRole::Client, config);
    let events = channel.subscribe();
    channel
        .try_open(&args.name)
        .map_err(|err| channel_error("open failed", err))?;

    match wait_for(&events, connect_timeout, |e| {
        matches!(e, ChannelEvent::Connected)
    }) {
        Waited::Matched(_) => {}
        Waited::Failed(message) => return Err(CliError::new(FAILURE, message)),
        Waited::TimedOut => {
            channel.close();
            return Err(CliError::new(
                TIMEOUT,
                format!("pipe {} not available after {connect_timeout:?}", args.name),
            ));
        }
    }

    if channel.start_writer().is_none() {
        return Err(CliError::new(FAILURE, "failed to start writer"));
    }
    if args.wait && channel.start_pump().is_none() {
        return Err(CliError::new(FAILURE, "failed to start reader"));
    }

    channel.submit(payload);
    if !channel.flush(wait_timeout) {
        channel.close();
        return Err(CliError::new(
            TIMEOUT,
            format!("write not finished after {wait_timeout:?}"),
        ));
    }

    if args.wait {
        match wait_for(&events, wait_timeout, |e| {
            matches!(e, ChannelEvent::DataReceived(_))
        }) {
            Waited::Matched(event) => print_event(&event, channel.role(), &args.name, format),
            Waited::Failed(message) => return Err(CliError::new(FAILURE, message)),
            Waited::TimedOut => {
                channel.close();
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no reply after {wait_timeout:?}"),
                ));
            }
        }
    } else if let Some(ChannelEvent::Error(err)) = events.try_recv() {
        return Err(CliError::new(FAILURE, format!("send failed: {}", err.message)));
    }

    channel.close();
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<String> {
    if let Some(data) = &args.data {
        return Ok(args.line_ending.apply(data));
    }
    if let Some(path) = &args.file {
        return fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(args.line_ending.apply(""))
}

/// Where events come from while the command waits on them.
trait EventSource {
    fn next_event(&self, timeout: Duration) -> Option<ChannelEvent>;
}

impl EventSource for Subscription {
    fn next_event(&self, timeout: Duration) -> Option<ChannelEvent> {
        self.recv_timeout(timeout)
    }
}

#[derive(Debug)]
enum Waited {
    Matched(ChannelEvent),
    Failed(String),
    TimedOut,
}

/// Wait for the first event matching `want`.
///
/// A Disconnected event ends the wait as a failure. Error events are logged
/// and skipped, since a client keeps retrying after them.
fn wait_for<S: EventSource>(
    source: &S,
    timeout: Duration,
    want: impl Fn(&ChannelEvent) -> bool,
) -> Waited {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Waited::TimedOut;
        }
        let Some(event) = source.next_event(remaining) else {
            return Waited::TimedOut;
        };
        if want(&event) {
            return Waited::Matched(event);
        }
        match event {
            ChannelEvent::Disconnected => {
                return Waited::Failed("peer disconnected".to_string());
            }
            ChannelEvent::Error(err) => warn!(message = %err.message, "channel error"),
            _ => {}
        }
    }
}
