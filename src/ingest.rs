//! Feeding line-oriented input into a [`FlushEngine`]

use crate::engine::FlushEngine;
use crate::line_parser::LineParser;
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, info, warn};

/// Parse lines from `reader` and submit them until end of input or `shutdown`
///
/// Lines that are not valid UTF-8 are decoded lossily rather than rejected.
/// A read error ends the loop and is returned; records submitted before it
/// stay in the engine, so callers must still [`FlushEngine::stop`] it.
pub async fn ship_lines<R, F>(
    mut reader: R,
    parser: &dyn LineParser,
    engine: &FlushEngine,
    shutdown: F,
) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let mut buf = Vec::new();
    let mut submitted: u64 = 0;
    tokio::pin!(shutdown);

    loop {
        buf.clear();
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => {
                    info!("End of input reached");
                    break;
                }
                Ok(_) => {
                    let line = decode_line(&buf);
                    if let Some(record) = parser.parse_line(&line) {
                        engine.submit(record);
                        submitted += 1;
                    }
                }
                Err(e) => {
                    error!("Reading input failed after {} records: {}", submitted, e);
                    return Err(e);
                }
            },
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    Ok(submitted)
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

    match std::str::from_utf8(raw) {
        Ok(line) => line.to_string(),
        Err(_) => {
            warn!("Input line is not valid UTF-8, replacing invalid bytes");
            String::from_utf8_lossy(raw).into_owned()
        }
    }
}
