//! Minimal echo server: waits for one peer and echoes every line back.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send pipelink-echo --data hello --wait

use pipelink::{Channel, ChannelEvent, ConnectionRole};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let channel = Channel::new(ConnectionRole::Server);
    let events = channel.subscribe();

    channel.try_open("pipelink-echo")?;
    eprintln!("Listening on pipelink-echo");

    for event in events.iter() {
        match event {
            ChannelEvent::Connected => {
                eprintln!("Peer connected");
                channel.start_session();
            }
            ChannelEvent::DataReceived(data) => {
                eprintln!("Received {} bytes", data.raw.len());
                channel.submit(data.text);
            }
            ChannelEvent::Error(err) => eprintln!("Channel error: {}", err.message),
            ChannelEvent::Disconnected => {
                eprintln!("Peer disconnected");
                break;
            }
        }
    }

    channel.close();
    Ok(())
}
