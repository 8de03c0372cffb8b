pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod supervisor;
#[cfg(test)]
mod testutil;
pub mod writer;

pub use config::TickdConfig;
pub use connection::ConnectionManager;
pub use error::EngineError;
pub use supervisor::Supervisor;
pub use writer::BatchWriter;
