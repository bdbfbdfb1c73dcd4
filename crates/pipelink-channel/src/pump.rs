use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use tracing::{debug, info};

use crate::channel::Shared;
use crate::error::{ChannelError, Result};
use crate::event::ReceivedData;

pub(crate) fn start(shared: &Arc<Shared>) -> Result<JoinHandle<()>> {
    let (generation, stream) = shared.claim_pump()?;
    let thread_shared = shared.clone();
    thread::Builder::new()
        .name("pipelink-pump".to_string())
        .spawn(move || {
            run(&thread_shared, generation, stream);
            thread_shared.release_pump(generation);
        })
        .map_err(|source| {
            shared.release_pump(generation);
            ChannelError::Spawn {
                unit: "pump",
                source,
            }
        })
}

/// Read from `source` until end-of-stream, a read fault, or the session
/// ending underneath us.
///
/// End-of-stream and read faults both end the session with a single
/// Disconnected event; a fault is reported as an Error first.
pub(crate) fn run<R: Read>(shared: &Shared, generation: u64, mut source: R) {
    let mut buf = vec![0u8; shared.config.buffer_size.max(1)];
    while shared.is_live(generation) {
        let read = match source.read(&mut buf) {
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                if shared.is_live(generation) {
                    shared.report(ChannelError::Read(err));
                    shared.end_session(generation);
                }
                break;
            }
        };

        if read == 0 {
            if shared.end_session(generation) {
                info!(role = %shared.role, "peer closed pipe");
            }
            break;
        }

        let data = ReceivedData::from_bytes(Bytes::copy_from_slice(&buf[..read]));
        if !shared.deliver(generation, data) {
            break;
        }
    }
    debug!(generation, "pump finished");
}
