//! Newline-delimited JSON event feed.
//!
//! Each non-blank line is one [`SyncEvent`]. Lines that fail to decode are
//! logged and skipped; the feed carries on with the next line.

use std::path::Path;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use gatesync_ingest::SyncEvent;

/// Forward every decodable line of `reader` into `events`.
/// Returns the number of events forwarded.
pub async fn forward_lines<R>(reader: R, events: &mpsc::Sender<SyncEvent>) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    let mut forwarded = 0;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<SyncEvent>(line) {
            Ok(event) => {
                if events.send(event).await.is_err() {
                    debug!("ingestor gone, feed stopping");
                    break;
                }
                forwarded += 1;
            }
            Err(e) => warn!(line = line_no, error = %e, "skipping undecodable event"),
        }
    }
    Ok(forwarded)
}

/// Feed events from a file, or from stdin when `source` is `-`.
pub async fn forward_source(source: &Path, events: mpsc::Sender<SyncEvent>) -> anyhow::Result<usize> {
    let forwarded = if source == Path::new("-") {
        forward_lines(BufReader::new(tokio::io::stdin()), &events).await?
    } else {
        let file = tokio::fs::File::open(source).await?;
        forward_lines(BufReader::new(file), &events).await?
    };
    info!(source = %source.display(), forwarded, "event feed finished");
    Ok(forwarded)
}
