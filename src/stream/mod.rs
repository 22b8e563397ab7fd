pub mod bridge;
pub mod envelope;
pub mod supplier;

pub use bridge::{bridge, BackpressurePolicy, BridgeSender, BridgeStream};
pub use envelope::{HeaderValue, Headers, OutboundEnvelope, Payload, CDC_KEY, CDC_OFFSET, CDC_TOPIC};
pub use supplier::{ChangeStream, StreamSupplier};
