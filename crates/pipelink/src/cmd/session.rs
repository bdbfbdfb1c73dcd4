use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pipelink_channel::{Channel, ChannelEvent, ConnectionState, Subscription};
use tracing::{debug, info, warn};

use crate::cmd::LineEnding;
use crate::exit::{channel_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_event, OutputFormat};

const EVENT_POLL: Duration = Duration::from_millis(100);

/// How an interactive session reacts to its channel's events.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Call `open` again after a disconnect.
    pub reopen: bool,
    /// Stop after this many data events.
    pub count: Option<usize>,
    pub forward_stdin: bool,
    pub line_ending: LineEnding,
}

/// Open `channel` on `name` and run its event loop until Ctrl-C, the data
/// count is reached, or (without `reopen`) the peer disconnects.
pub fn drive(
    channel: Arc<Channel>,
    name: &str,
    options: SessionOptions,
    format: OutputFormat,
) -> CliResult<i32> {
    let events = channel.subscribe();
    channel
        .try_open(name)
        .map_err(|err| channel_error("open failed", err))?;
    info!(name, role = %channel.role(), "waiting for connection");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    if options.forward_stdin {
        spawn_stdin_forwarder(channel.clone(), options.line_ending)?;
    }

    let mut printed = 0usize;
    let mut in_session = false;
    while running.load(Ordering::SeqCst) {
        let event = match next_step(&events, &channel, in_session) {
            Next::Event(event) => event,
            Next::Idle => continue,
            Next::GaveUp if options.reopen => {
                warn!(name, role = %channel.role(), "connection attempt abandoned; reopening");
                channel
                    .try_open(name)
                    .map_err(|err| channel_error("reopen failed", err))?;
                continue;
            }
            Next::GaveUp => {
                return Err(CliError::new(
                    FAILURE,
                    format!("pipe {name} went away before a peer connected"),
                ));
            }
        };
        print_event(&event, channel.role(), name, format);

        match event {
            ChannelEvent::Connected => {
                in_session = true;
                if !channel.start_session() {
                    warn!(name, "failed to start session threads");
                }
            }
            ChannelEvent::DataReceived(_) => {
                printed = printed.saturating_add(1);
                if options.count.is_some_and(|count| printed >= count) {
                    channel.close();
                    return Ok(SUCCESS);
                }
            }
            ChannelEvent::Disconnected => {
                in_session = false;
                if !options.reopen {
                    return Ok(SUCCESS);
                }
                info!(name, role = %channel.role(), "peer disconnected; reopening");
                channel
                    .try_open(name)
                    .map_err(|err| channel_error("reopen failed", err))?;
            }
            ChannelEvent::Error(err) => {
                warn!(name, message = %err.message, "channel error");
            }
        }
    }

    debug!(name, "interrupted");
    channel.close();
    Ok(SUCCESS)
}

#[derive(Debug)]
enum Next {
    Event(ChannelEvent),
    Idle,
    /// The connection attempt ended without a session ever starting.
    GaveUp,
}

/// Wait one poll interval for an event.
///
/// A client that finds the pipe withdrawn, or a server whose accept fails,
/// drops back to Disconnected without a Disconnected event; that shows up
/// here as [`Next::GaveUp`].
fn next_step(events: &Subscription, channel: &Channel, in_session: bool) -> Next {
    if let Some(event) = events.recv_timeout(EVENT_POLL) {
        return Next::Event(event);
    }
    if in_session || channel.state() != ConnectionState::Disconnected {
        return Next::Idle;
    }
    // State changes are emitted under the same lock, so anything that raced
    // the state check is already queued.
    match events.try_recv() {
        Some(event) => Next::Event(event),
        None => Next::GaveUp,
    }
}

fn spawn_stdin_forwarder(channel: Arc<Channel>, ending: LineEnding) -> CliResult<()> {
    thread::Builder::new()
        .name("pipelink-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        channel.submit(ending.apply(&line));
                    }
                    Err(err) => {
                        warn!(error = %err, "stdin read failed");
                        break;
                    }
                }
            }
            debug!("stdin closed");
        })
        .map(|_| ())
        .map_err(|err| CliError::new(FAILURE, format!("stdin forwarder failed to start: {err}")))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;
    use std::time::Instant;

    use pipelink_channel::{ChannelConfig, ConnectionRole};

    use super::*;

    fn unique_dir(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/pipelink-session-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn step_until_settled(events: &Subscription, channel: &Channel) -> Next {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            match next_step(events, channel, false) {
                Next::Idle if Instant::now() < deadline => continue,
                other => return other,
            }
        }
    }

    #[test]
    fn abandoned_client_attempt_is_reported_as_gave_up() {
        let dir = unique_dir("gave-up");
        let file = dir.join("plain-file");
        std::fs::write(&file, b"x").unwrap();
        let name = file.join("pipe.sock").to_string_lossy().into_owned();

        let channel = Channel::with_config(
            ConnectionRole::Client,
            ChannelConfig {
                retry_backoff: Duration::from_millis(20),
                ..ChannelConfig::default()
            },
        );
        let events = channel.subscribe();
        channel.try_open(&name).unwrap();

        assert!(matches!(step_until_settled(&events, &channel), Next::GaveUp));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn pending_attempt_stays_idle() {
        let dir = unique_dir("idle");
        let name = dir.join("absent.sock").to_string_lossy().into_owned();

        let channel = Channel::with_config(
            ConnectionRole::Client,
            ChannelConfig {
                retry_backoff: Duration::from_millis(20),
                ..ChannelConfig::default()
            },
        );
        let events = channel.subscribe();
        channel.try_open(&name).unwrap();

        for _ in 0..3 {
            assert!(matches!(next_step(&events, &channel, false), Next::Idle));
        }
        channel.close();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
