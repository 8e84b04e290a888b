//! # mirage-inception-layer
//!
//! User-mode inception layer that makes a sandboxed guest observe a
//! policy-defined view of its environment:
//!
//! - scaled clocks and sleeps (`UseChangeSpeed`)
//! - a fixed default locale (`CustomLCID`)
//! - extra switches on a Chromium browser's command line (`CustomChromiumFlags`)
//! - refused execution-state requests (`BlockInterferePower`)
//! - stable virtual volume serial numbers (`HideDiskSerialNumber`)
//!
//! The crate builds as a `cdylib` for injection: an external hook engine
//! captures the real entry points, hands them to `mirage_init`, and redirects
//! every symbol `mirage_is_hooked` reports. As an `rlib` the same layer runs
//! over [`platform::host::HostPlatform`] for diagnostics and tests.
//!
//! ## Threading
//! Initialisation runs once. After that the layer is read-only apart from the
//! volume identity cache, which is internally synchronised.

// Exported substitutes keep Win32 signatures; their safety contract is the caller's API contract
#![allow(clippy::missing_safety_doc)]

pub mod error;
pub mod ffi;
pub mod interpose;
pub mod platform;
pub mod reals;
pub mod state;
pub mod syscalls;
pub mod testing;

pub use error::LayerError;
pub use interpose::{Capability, HookTable, Registry};
pub use platform::host::HostPlatform;
pub use platform::{Platform, Real};
pub use reals::Symbol;
pub use state::{InceptionLayer, LayerStatus};
