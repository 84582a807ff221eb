//! # xep
//!
//! Host-side core of the XEP radar module firmware.
//!
//! A [`boot::Firmware`] run wires an X4 radar chip, a flash-backed file
//! store and one or two host links together over a pooled publish/subscribe
//! bus:
//!
//! ```text
//!   X4 chip ──> radar ──RADAR_DATA──> app ──HOSTCOM_SEND──> hostcom ──> host
//!                                      ^                                  |
//!                                      └───────────HOSTCOM_RX─────────────┘
//! ```
//!
//! The member crates carry the building blocks:
//!
//! - [`xep_pool`]: fixed-size block pools
//! - [`xep_dispatch`]: topics, queues and the dispatcher
//! - [`xep_proto`]: MCP framing and command decoding
//! - [`xep_storage`]: flash file store and file handles
//! - [`xep_hardware`]: X4 driver trait and the simulated chip
//!
//! This crate adds configuration, logging, the tasks and the boot sequence.

pub mod boot;
pub mod config;
pub mod error;
pub mod logging;
pub mod system;
pub mod tasks;
pub mod transport;

pub use boot::{Board, BootState, Firmware};
pub use config::XepConfig;
pub use error::{XepError, XepResult};
