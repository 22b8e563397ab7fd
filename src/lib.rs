pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod stream;
pub mod transform;

pub use crate::config::Config;
pub use error::{Error, Result};
pub use stream::{ChangeStream, OutboundEnvelope, StreamSupplier};
