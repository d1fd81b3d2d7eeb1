//! Log Shipper Library
//!
//! This library batches structured log records into size-bounded payloads and
//! ships them asynchronously to a remote ingestion pipeline, flushing partial
//! batches on a timer.

pub mod batch;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod ingest;
pub mod layer;
pub mod line_parser;
pub mod point;
pub mod provision;
pub mod record;
pub mod transport;

pub use batch::Batch;
pub use config::Config;
pub use dispatcher::{DispatchStats, Dispatcher};
pub use engine::FlushEngine;
pub use errors::{ConfigError, EncodingError, ProvisioningError, Result, ShipperError, TransportError};
pub use layer::ShipperLayer;
pub use point::{record_to_point, FieldValue, Point};
pub use provision::{HttpProvisioner, NoopProvisioner, Provisioner, WorkflowSpec};
pub use record::{LogLevel, LogRecord};
pub use transport::{Ack, Credentials, HttpTransport, Transport};
