// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Packet ingestion server
//!
//! One tokio task per accepted connection; a slow or faulty client only
//! ever stalls its own task. Failing to bind the listener is the one
//! fatal error in this module.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::core::Context;
use crate::fusion::FusionEngine;
use crate::protocol::Decoder;

use super::connection::handle_connection;
use super::handoff::LocationRouter;

/// Concurrent TCP intake for field units
pub struct IngestServer {
    ctx: Context,
    decoder: Decoder,
    router: Arc<LocationRouter>,
    active: Arc<AtomicUsize>,
}

impl IngestServer {
    /// Server feeding the given fusion engine
    pub fn new(ctx: &Context, engine: Arc<FusionEngine>) -> Self {
        Self {
            decoder: Decoder::new(ctx.config.calibration),
            router: Arc::new(LocationRouter::new(ctx, engine)),
            active: Arc::new(AtomicUsize::new(0)),
            ctx: ctx.clone(),
        }
    }

    /// Bind the listener and start accepting; returns the bound address
    ///
    /// A bind failure propagates - it is the only unrecoverable error
    /// in ingestion.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.ctx.config.server.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Ingestion server listening on {}", local_addr);

        let ctx = self.ctx.clone();
        let decoder = self.decoder.clone();
        let router = self.router.clone();
        let active = self.active.clone();
        let max_connections = ctx.config.server.max_connections;
        let mut shutdown = ctx.subscribe_shutdown();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, peer)) => {
                                if active.load(Ordering::Acquire) >= max_connections {
                                    warn!("Connection cap reached, rejecting {}", peer);
                                    continue;
                                }
                                active.fetch_add(1, Ordering::AcqRel);

                                let decoder = decoder.clone();
                                let router = router.clone();
                                let metrics = ctx.metrics.clone();
                                let conn_shutdown = ctx.subscribe_shutdown();
                                let active = active.clone();
                                tokio::spawn(async move {
                                    handle_connection(
                                        stream,
                                        peer,
                                        decoder,
                                        router,
                                        metrics,
                                        conn_shutdown,
                                    )
                                    .await;
                                    active.fetch_sub(1, Ordering::AcqRel);
                                });
                            }
                            Err(e) => {
                                error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Ingestion server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::{SensorSample, ThermalFrame, THERMAL_CELLS};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn test_context() -> Context {
        let mut config = Config::default();
        config.server.bind_addr = "127.0.0.1:0".to_string();
        Context::new(config).unwrap()
    }

    fn started(ctx: &Context) -> (IngestServer, Arc<FusionEngine>) {
        let engine = Arc::new(FusionEngine::new(
            &ctx.config,
            ctx.metrics.clone(),
            ctx.bus.clone(),
        ));
        (IngestServer::new(ctx, engine.clone()), engine)
    }

    fn warm_frame() -> ThermalFrame {
        let raw = vec![2200u16; THERMAL_CELLS]; // 22.00 C everywhere
        ThermalFrame {
            celsius: raw.iter().map(|&r| r as i16 as f64 * 0.01).collect(),
            raw,
        }
    }

    #[tokio::test]
    async fn test_single_client_end_to_end() {
        let ctx = test_context();
        let (server, engine) = started(&ctx);
        let addr = server.start().await.unwrap();

        let mut records = ctx.bus.subscribe_records();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let sample = SensorSample {
            adc1: 1734,
            adc2: 2293,
            flame: true,
            timestamp: Utc::now(),
        };
        let payload = format!(
            "{}\n{}\n{}\n",
            Decoder::encode_identity("SIM001", "RoomA"),
            Decoder::encode_thermal(&warm_frame()),
            Decoder::encode_sample(&sample),
        );
        client.write_all(payload.as_bytes()).await.unwrap();
        client.flush().await.unwrap();

        // Identity is not forwarded; expect the frame then the sample
        let first = records.recv().await.unwrap();
        assert_eq!(first.loc_id, "RoomA");
        let second = records.recv().await.unwrap();
        assert_eq!(second.loc_id, "RoomA");

        let snap = engine.snapshot("RoomA").unwrap();
        assert!(snap.flame);

        assert_eq!(
            ctx.metrics
                .packets_received
                .with_label_values(&["RoomA"])
                .get(),
            3
        );
        assert_eq!(
            ctx.metrics.parse_errors.with_label_values(&["RoomA"]).get(),
            0
        );

        ctx.trigger_shutdown();
    }

    #[tokio::test]
    async fn test_parse_error_keeps_connection_serving() {
        let ctx = test_context();
        let (server, _engine) = started(&ctx);
        let addr = server.start().await.unwrap();

        let mut records = ctx.bus.subscribe_records();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"ID,SIM002,RoomB\nSN,not,a,number\nSN,100,200,1\n")
            .await
            .unwrap();

        // The malformed line is counted and the valid one still lands
        let event = records.recv().await.unwrap();
        assert_eq!(event.loc_id, "RoomB");
        assert_eq!(
            ctx.metrics.parse_errors.with_label_values(&["RoomB"]).get(),
            1
        );
        assert_eq!(
            ctx.metrics
                .packets_received
                .with_label_values(&["RoomB"])
                .get(),
            2
        );

        ctx.trigger_shutdown();
    }

    #[tokio::test]
    async fn test_peer_fallback_when_no_identity() {
        let ctx = test_context();
        let (server, engine) = started(&ctx);
        let addr = server.start().await.unwrap();

        let mut records = ctx.bus.subscribe_records();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"SN,50,60,0\n").await.unwrap();

        let event = records.recv().await.unwrap();
        assert_eq!(event.loc_id, "127.0.0.1");
        assert!(engine.snapshot("127.0.0.1").is_some());

        ctx.trigger_shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_clients_distinct_locations() {
        let ctx = test_context();
        let (server, _engine) = started(&ctx);
        let addr = server.start().await.unwrap();

        const CLIENTS: usize = 10;
        const PACKETS: usize = 100;

        let mut tasks = Vec::new();
        for c in 0..CLIENTS {
            tasks.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                let loc = format!("loc{}", c);
                for i in 0..PACKETS {
                    let line = Decoder::encode_embedded(
                        &loc,
                        &format!("SN,{},{},0", i, i * 2),
                    );
                    client.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
                }
                client.flush().await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Wait for every packet to be counted
        let total = |ctx: &Context| -> u64 {
            (0..CLIENTS)
                .map(|c| {
                    ctx.metrics
                        .packets_received
                        .with_label_values(&[&format!("loc{}", c)])
                        .get()
                })
                .sum()
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while total(&ctx) < (CLIENTS * PACKETS) as u64 {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(total(&ctx), (CLIENTS * PACKETS) as u64);
        for c in 0..CLIENTS {
            assert_eq!(
                ctx.metrics
                    .parse_errors
                    .with_label_values(&[&format!("loc{}", c)])
                    .get(),
                0
            );
        }

        ctx.trigger_shutdown();
    }
}
