//! JSONL raw-record reader
//!
//! Collectors hand the pipeline newline-delimited JSON envelopes, one raw
//! record per line. The reader tags each record with its arrival time at
//! parse, so normalization fallback times do not drift while records sit in
//! the channel.

use crate::event::schema::Source;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One line of collector input.
#[derive(Debug, Deserialize)]
pub struct RawEnvelope {
    pub source: Source,
    #[serde(default)]
    pub raw: Option<Value>,
    /// Collector-supplied fallback time, used when the raw record has none
    #[serde(default)]
    pub alt_time: Option<DateTime<Utc>>,
    /// Marks the end of one full observation cycle for this source
    #[serde(default)]
    pub end_of_feed: bool,
}

/// What the ingestion loop receives per envelope.
#[derive(Debug)]
pub enum InboundMessage {
    Record {
        source: Source,
        raw: Value,
        arrival_time: DateTime<Utc>,
        alt_time: Option<DateTime<Utc>>,
    },
    EndOfFeed {
        source: Source,
    },
}

/// Read JSONL envelopes and feed them into the pipeline channel.
///
/// With `input` unset the reader consumes stdin to EOF. With a path it reads
/// the file, and in `follow` mode keeps polling for appended lines the way a
/// `tail -f` would, until the receiving side goes away.
pub async fn run_reader(
    input: Option<PathBuf>,
    follow: bool,
    tx: mpsc::Sender<InboundMessage>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match input {
        None => {
            info!("Reading raw records from stdin");
            let reader = BufReader::new(tokio::io::stdin());
            consume_to_eof(reader, &tx).await
        }
        Some(path) => {
            info!("Reading raw records from {}", path.display());
            let file = File::open(&path).await?;
            let mut reader = BufReader::new(file);
            if !follow {
                return consume_to_eof(reader, &tx).await;
            }
            let mut line = String::new();
            loop {
                line.clear();
                let n = reader.read_line(&mut line).await?;
                if n == 0 {
                    if tx.is_closed() {
                        return Ok(());
                    }
                    tokio::time::sleep(TAIL_POLL_INTERVAL).await;
                    continue;
                }
                if dispatch_line(&line, &tx).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

async fn consume_to_eof<R: AsyncBufRead + Unpin>(
    reader: R,
    tx: &mpsc::Sender<InboundMessage>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if dispatch_line(&line, tx).await.is_err() {
            break;
        }
    }
    Ok(())
}

/// Parse one envelope line and forward it. `Err` means the receiver is gone.
async fn dispatch_line(line: &str, tx: &mpsc::Sender<InboundMessage>) -> Result<(), ()> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    let envelope: RawEnvelope = match serde_json::from_str(trimmed) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Skipping malformed envelope line: {}", e);
            return Ok(());
        }
    };
    let message = if envelope.end_of_feed {
        InboundMessage::EndOfFeed {
            source: envelope.source,
        }
    } else {
        match envelope.raw {
            Some(raw) => InboundMessage::Record {
                source: envelope.source,
                raw,
                arrival_time: Utc::now(),
                alt_time: envelope.alt_time,
            },
            None => {
                warn!("Skipping envelope without raw payload");
                return Ok(());
            }
        }
    };
    tx.send(message).await.map_err(|_| ())
}
