// Lifecycle Event Module
//
// This module provides the per-execution event stream:
// - Closed event variant (start / step / finish / error)
// - Ordered, non-blocking fan-out to subscribers
// - Event sinks attached as channel subscribers

mod sink;
mod stream;
mod types;

pub use sink::*;
pub use stream::*;
pub use types::*;
