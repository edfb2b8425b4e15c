//! Core module - process context and event fan-out

mod event_bus;

pub use event_bus::{AlarmEvent, EventBus, RecordEvent};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::metrics::Metrics;

/// Process-wide context, constructed once in `main` and passed into
/// every component's constructor
///
/// This is the only shared surface; nothing reads ambient global state.
#[derive(Clone)]
pub struct Context {
    /// Validated configuration
    pub config: Arc<Config>,
    /// Shared metrics collector
    pub metrics: Arc<Metrics>,
    /// Alarm/record fan-out to collaborators
    pub bus: Arc<EventBus>,
    shutdown: broadcast::Sender<()>,
}

impl Context {
    /// Build the context from a validated configuration
    pub fn new(config: Config) -> Result<Self, prometheus::Error> {
        let (shutdown, _) = broadcast::channel(4);
        Ok(Self {
            config: Arc::new(config),
            metrics: Arc::new(Metrics::new()?),
            bus: Arc::new(EventBus::new(256)),
            shutdown,
        })
    }

    /// Receiver that fires once on process shutdown
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Signal every component to stop
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}
