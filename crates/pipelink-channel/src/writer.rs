use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use crate::channel::Shared;
use crate::error::{ChannelError, Result};

pub(crate) fn start(shared: &Arc<Shared>) -> Result<JoinHandle<()>> {
    let (generation, stream) = shared.claim_writer()?;
    let thread_shared = shared.clone();
    thread::Builder::new()
        .name("pipelink-writer".to_string())
        .spawn(move || {
            run(&thread_shared, generation, stream);
            thread_shared.release_writer(generation);
        })
        .map_err(|source| {
            shared.release_writer(generation);
            ChannelError::Spawn {
                unit: "writer",
                source,
            }
        })
}

/// Drain the queue onto `sink` until the session ends or a write fails.
pub(crate) fn run<W: Write>(shared: &Shared, generation: u64, mut sink: W) {
    while let Some(text) = shared.queue.next_blocking(|| shared.is_live(generation)) {
        let result = sink
            .write_all(text.as_bytes())
            .and_then(|()| sink.flush());
        shared.queue.complete();

        match result {
            Ok(()) => trace!(bytes = text.len(), "payload written"),
            Err(err) => {
                // A write torn down by close is not a fault.
                if shared.is_live(generation) {
                    shared.report(ChannelError::Write(err));
                }
                return;
            }
        }
    }
    debug!(generation, "writer finished");
}
