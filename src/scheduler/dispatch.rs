// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Command dispatch to PFDS devices
//!
//! Commands are plaintext strings over a short-lived TCP connection;
//! the device answers a single acknowledgement line. Every exchange is
//! bounded by an explicit timeout. The transport is a trait so the
//! scheduler can be exercised against a mock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Device command types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// On-demand status request
    Request1,
    /// Enable continuous reporting
    PeriodOn,
}

impl CommandKind {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Request1 => "REQUEST1",
            CommandKind::PeriodOn => "PERIOD_ON",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one successful dispatch attempt
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Target device id
    pub device_id: String,
    /// Command sent
    pub command: CommandKind,
    /// When the command went out
    pub sent_at: DateTime<Utc>,
    /// Round trip to acknowledgement
    pub latency: Duration,
}

/// Dispatch failure; never fatal, the device stays on its schedule
#[derive(Debug, Error)]
pub enum DispatchError {
    /// TCP connect failed
    #[error("connect to {addr} failed: {source}")]
    Connect {
        /// Target address
        addr: SocketAddr,
        /// Underlying error
        source: std::io::Error,
    },
    /// No acknowledgement within the timeout
    #[error("no acknowledgement from {addr} within {timeout:?}")]
    Timeout {
        /// Target address
        addr: SocketAddr,
        /// Configured timeout
        timeout: Duration,
    },
    /// Socket error mid-exchange
    #[error("io error during dispatch: {0}")]
    Io(#[from] std::io::Error),
    /// Device answered something other than an acknowledgement
    #[error("device rejected command: {reply:?}")]
    Rejected {
        /// The device's reply line
        reply: String,
    },
}

/// Pluggable command transport
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Send one command and await acknowledgement; returns the latency
    async fn send(
        &self,
        addr: SocketAddr,
        command: CommandKind,
        timeout: Duration,
    ) -> Result<Duration, DispatchError>;
}

/// Real transport: one short-lived TCP connection per command
pub struct TcpTransport;

#[async_trait]
impl CommandTransport for TcpTransport {
    async fn send(
        &self,
        addr: SocketAddr,
        command: CommandKind,
        timeout: Duration,
    ) -> Result<Duration, DispatchError> {
        let started = Instant::now();
        let exchange = async {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|source| DispatchError::Connect { addr, source })?;
            let mut stream = BufReader::new(stream);

            stream
                .get_mut()
                .write_all(format!("{}\n", command.as_str()).as_bytes())
                .await?;

            let mut reply = String::new();
            let n = stream.read_line(&mut reply).await?;
            if n == 0 {
                return Err(DispatchError::Rejected {
                    reply: "<closed>".to_string(),
                });
            }
            let reply = reply.trim();
            if reply.starts_with("OK") {
                Ok(started.elapsed())
            } else {
                Err(DispatchError::Rejected {
                    reply: reply.to_string(),
                })
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout { addr, timeout }),
        }
    }
}
