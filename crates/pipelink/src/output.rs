use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pipelink_channel::{ChannelEvent, ConnectionRole};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    event: &'static str,
    role: String,
    pipe: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    timestamp: String,
}

impl<'a> EventOutput<'a> {
    fn new(event: &'a ChannelEvent, role: ConnectionRole, pipe: &'a str) -> Self {
        let (size, payload, message) = match event {
            ChannelEvent::DataReceived(data) => {
                (Some(data.raw.len()), Some(data.text.as_str()), None)
            }
            ChannelEvent::Error(err) => (None, None, Some(err.message.as_str())),
            ChannelEvent::Connected | ChannelEvent::Disconnected => (None, None, None),
        };
        Self {
            event: event.kind(),
            role: role.to_string(),
            pipe,
            size,
            payload,
            message,
            timestamp: now_unix_seconds(),
        }
    }
}

/// Print one channel event to stdout.
///
/// `raw` prints only received bytes, unmodified, so the output can be piped.
pub fn print_event(event: &ChannelEvent, role: ConnectionRole, pipe: &str, format: OutputFormat) {
    let out = EventOutput::new(event, role, pipe);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let detail = out.payload.or(out.message).map(escape).unwrap_or_default();
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "ROLE", "PIPE", "SIZE", "DETAIL"])
                .add_row(vec![
                    out.event.to_string(),
                    out.role.clone(),
                    out.pipe.to_string(),
                    out.size.map(|s| s.to_string()).unwrap_or_default(),
                    detail,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let mut line = format!("event={} role={} pipe={}", out.event, out.role, out.pipe);
            if let Some(size) = out.size {
                line.push_str(&format!(" size={size}"));
            }
            if let Some(payload) = out.payload {
                line.push_str(&format!(" payload={}", escape(payload)));
            }
            if let Some(message) = out.message {
                line.push_str(&format!(" message={message}"));
            }
            println!("{line}");
        }
        OutputFormat::Raw => {
            if let ChannelEvent::DataReceived(data) = event {
                print_raw(data.raw.as_ref());
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Make control characters visible in one-line output.
fn escape(text: &str) -> String {
    text.escape_debug().to_string()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
