//! Background tasks.
//!
//! - `hanging_transports` - periodically closes transports past their age
//!   threshold

pub mod hanging_transports;

pub use hanging_transports::start_hanging_transport_reaper;
