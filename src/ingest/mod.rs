//! Ingestion module - concurrent TCP intake from field units

mod connection;
mod handoff;
mod server;

pub use connection::ConnectionContext;
pub use handoff::LocationRouter;
pub use server::IngestServer;
