//! Streaming accumulator
//!
//! [`MeteredStream`] observes a streamed call chunk by chunk and guarantees
//! exactly one terminal metering payload, whether the stream completes,
//! fails, or is dropped by the consumer.

pub mod accumulator;
pub mod chunk;

pub use accumulator::{MeteredStream, StreamMeter, StreamState};
pub use chunk::StreamChunk;
