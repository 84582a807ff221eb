//! Firmware tasks.
//!
//! Each task owns one queue or notifier and runs on the Tokio runtime:
//!
//! - [`radar`]: frame acquisition and the zero-frame fail-safe
//! - [`hostcom`]: host framing with backpressure, one instance per link
//! - [`app`]: host command routing
//! - [`monitor`]: software watchdog
//!
//! [`housekeeping`] and [`certification`] are services the tasks call into.

pub mod app;
pub mod certification;
pub mod hostcom;
pub mod housekeeping;
pub mod monitor;
pub mod radar;
