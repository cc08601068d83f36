//! Encoder module - pattern & event encoding
//!
//! Transforms raw input events into `(Pattern, Context)` pairs that the
//! memory store can index and the router can score against.

mod encode;
mod event;

pub use encode::{stable_hash, Encoder, PatternStats};
pub use event::{
    Context, ContextState, EncodedEvent, EventType, IntensityLevel, Pattern, RawEvent,
    RawEventSummary,
};
