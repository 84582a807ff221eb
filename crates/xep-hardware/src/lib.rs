//! Radar front-end seam.
//!
//! [`X4Driver`] is the register-level surface the radar task and the command
//! processor drive: enable/init, sweep pacing, the frame window, DAC and
//! transmitter settings, raw register access, and frame readback. It is
//! synchronous because every call is a short bus transaction.
//!
//! [`MockX4`] implements it for host builds and tests. It can pace itself
//! like the chip's frame timer, produce zero frames on demand to exercise the
//! radar task's fail-safe, and inject faults.
//!
//! # Example
//!
//! ```
//! use xep_hardware::{FramePattern, MockX4, X4Driver};
//!
//! let mut chip = MockX4::manual(1, FramePattern::Zeros);
//! chip.set_enable(1).unwrap();
//! chip.init().unwrap();
//!
//! chip.start_sweep().unwrap();
//! let mut frame = vec![1.0f32; chip.frame_bin_count().unwrap() as usize];
//! let counter = chip.read_frame_normalized(&mut frame).unwrap();
//! assert_eq!(counter, 1);
//! assert!(frame.iter().all(|v| *v == 0.0));
//! ```

mod driver;
mod error;
pub mod mock;
pub mod settings;

pub use driver::{DataReadyHandler, X4Driver};
pub use error::{X4Error, X4Result};
pub use mock::{FaultScenario, FramePattern, MockX4, MockX4Config};
pub use settings::{FrameArea, SweepTriggerMode, TxCenterFrequency, TxPower};
