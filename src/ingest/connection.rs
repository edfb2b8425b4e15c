// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Per-connection ingestion
//!
//! Newline-framed reads with a hard per-frame byte cap, decode,
//! identity binding, handoff. A parse error increments the location's
//! error counter and the connection keeps serving; a disconnect
//! releases only this context, never the location's fusion state or
//! its devices.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::protocol::{DecodedRecord, Decoder};

use super::handoff::LocationRouter;

/// Hard cap on one newline-framed packet; the largest legal frame, an
/// embedded thermal line, is well under 4 KiB
const MAX_LINE_BYTES: usize = 16 * 1024;

/// Per-socket state; lives exactly as long as the connection
#[derive(Debug)]
pub struct ConnectionContext {
    /// Connection id for logs
    pub id: Uuid,
    /// Peer address
    pub peer: SocketAddr,
    /// Bound location identity; immutable once first established
    pub loc_id: Option<String>,
    /// Unit serial from the last identity record
    pub serial: Option<String>,
    /// Valid packets on this connection
    pub packets: u64,
    /// Malformed packets on this connection
    pub errors: u64,
}

impl ConnectionContext {
    /// Fresh context for a newly accepted socket
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            loc_id: None,
            serial: None,
            packets: 0,
            errors: 0,
        }
    }

    /// Bind the location identity; the first binding wins
    pub fn bind_location(&mut self, loc_id: &str) {
        match &self.loc_id {
            None => self.loc_id = Some(loc_id.to_string()),
            Some(bound) if bound != loc_id => {
                debug!(
                    "Connection {} already bound to {}, ignoring rebind to {}",
                    self.id, bound, loc_id
                );
            }
            Some(_) => {}
        }
    }

    /// The identity key for this connection, falling back to the peer
    /// address when nothing explicit was ever sent (no_loc variant)
    pub fn effective_location(&mut self) -> &str {
        if self.loc_id.is_none() {
            self.loc_id = Some(self.peer.ip().to_string());
        }
        self.loc_id.as_deref().unwrap_or_default()
    }

    /// Identity label for error accounting. Never establishes a
    /// binding, so a malformed first line cannot preempt a later
    /// explicit Identity record.
    pub fn current_location(&self) -> String {
        self.loc_id
            .clone()
            .unwrap_or_else(|| self.peer.ip().to_string())
    }
}

/// One framed read result
#[derive(Debug)]
enum Frame {
    /// A complete line, terminator stripped
    Line(Vec<u8>),
    /// A line exceeding the byte cap, consumed through its newline
    Overlong,
    /// Clean end of stream
    Eof,
}

/// Read one newline-terminated frame without unbounded buffering
///
/// An over-long frame is discarded up to its terminating newline so
/// the connection can keep serving subsequent packets.
async fn read_frame<R>(reader: &mut R, max: usize) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut discarding = false;
    loop {
        let (consumed, terminated) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(if discarding {
                    Frame::Overlong
                } else if line.is_empty() {
                    Frame::Eof
                } else {
                    Frame::Line(line)
                });
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    if !discarding {
                        line.extend_from_slice(&available[..pos]);
                    }
                    (pos + 1, true)
                }
                None => {
                    if !discarding {
                        line.extend_from_slice(available);
                    }
                    (available.len(), false)
                }
            }
        };
        reader.consume(consumed);
        if !discarding && line.len() > max {
            line.clear();
            discarding = true;
        }
        if terminated {
            return Ok(if discarding {
                Frame::Overlong
            } else {
                Frame::Line(line)
            });
        }
    }
}

/// Serve one field-unit connection until disconnect or shutdown
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    decoder: Decoder,
    router: Arc<LocationRouter>,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ctx = ConnectionContext::new(peer);
    info!("Field unit connected from {} (conn {})", peer, ctx.id);

    let mut reader = BufReader::new(stream);

    loop {
        tokio::select! {
            frame = read_frame(&mut reader, MAX_LINE_BYTES) => {
                match frame {
                    Ok(Frame::Eof) => {
                        info!("Field unit {} disconnected", peer);
                        break;
                    }
                    Ok(Frame::Line(line)) => {
                        process_line(&line, &mut ctx, &decoder, &router, &metrics)
                    }
                    Ok(Frame::Overlong) => {
                        ctx.errors += 1;
                        let loc = ctx.current_location();
                        metrics.parse_errors.with_label_values(&[&loc]).inc();
                        debug!("Oversized frame from {} ({}), discarded", peer, loc);
                    }
                    Err(e) => {
                        warn!("Read error from {}: {}", peer, e);
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                // In-flight partial packet is discarded
                info!("Closing connection to {} on shutdown", peer);
                break;
            }
        }
    }

    info!(
        "Connection {} closed: {} packets, {} errors, location {:?}",
        ctx.id, ctx.packets, ctx.errors, ctx.loc_id
    );
}

fn process_line(
    line: &[u8],
    ctx: &mut ConnectionContext,
    decoder: &Decoder,
    router: &LocationRouter,
    metrics: &Metrics,
) {
    // Blank keepalive lines between packets are not packets
    if line.iter().all(|&b| b == b'\r' || b == b'\n') {
        return;
    }

    match decoder.decode(line) {
        Ok(decoded) => {
            if let Some(loc_id) = &decoded.loc_id {
                ctx.bind_location(loc_id);
            }

            if let DecodedRecord::Identity { serial, loc_id } = &decoded.record {
                ctx.serial = Some(serial.clone());
                ctx.bind_location(loc_id);
                ctx.packets += 1;
                let loc = ctx.effective_location().to_string();
                metrics.packets_received.with_label_values(&[&loc]).inc();
                return;
            }

            ctx.packets += 1;
            let loc = ctx.effective_location().to_string();
            metrics.packets_received.with_label_values(&[&loc]).inc();
            router.forward(&loc, decoded.record);
        }
        Err(e) => {
            ctx.errors += 1;
            let loc = ctx.current_location();
            metrics.parse_errors.with_label_values(&[&loc]).inc();
            debug!("Parse error from {} ({}): {}", ctx.peer, loc, e);
        }
    }
}
