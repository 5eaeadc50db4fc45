//! Immutable configuration value objects produced by a descriptor reader.
//!
//! Parsing the descriptor itself happens elsewhere; this module only maps
//! element names onto closed tag enums and holds the resulting values.

pub mod outbound;
pub mod timeout;

pub use outbound::{
    AuthenticationMechanism, ConnectionDefinition, OutboundAttribute, OutboundResourceAdapter,
    OutboundTag, TransactionSupport,
};
pub use timeout::{TimeoutSettings, TimeoutTag};
