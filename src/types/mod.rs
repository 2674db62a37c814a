//! Core metering types

pub mod field;
pub mod metadata;
pub mod payload;

pub use field::Field;
pub use metadata::{Subscriber, SubscriberCredential, UsageMetadata};
pub use payload::{MeteringPayload, OperationType, StopReason};
