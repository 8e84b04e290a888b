//! Capability interfaces over the OS queries the layer can substitute.
//!
//! Each query family is a trait. [`Platform`] bundles all of them together
//! with symbol resolution and is implemented by whatever provides the *real*
//! entry points (the host, a foreign hook engine, or a test fake). The
//! substitutes in [`crate::syscalls`] implement the same traits, so the
//! registry can hand either one to the layer.

pub mod host;

use crate::error::LayerError;
use crate::reals::Symbol;
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;

/// Opaque OS handle value (a `HANDLE` on Windows, a file descriptor elsewhere).
pub type RawHandle = usize;

/// Longest object name the volume substitute accepts.
pub const MAX_PATH: usize = 260;

/// Outputs of a volume-information query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VolumeInformation {
    pub volume_name: String,
    pub serial_number: u32,
    pub max_component_length: u32,
    pub file_system_flags: u32,
    pub file_system_name: String,
}

pub trait CommandLineApi: Send + Sync {
    /// Process command line in UTF-16, without terminator.
    fn command_line_wide(&self) -> Cow<'_, [u16]>;

    /// Process command line in the narrow encoding, without terminator.
    fn command_line_narrow(&self) -> Cow<'_, [u8]>;
}

pub trait PowerApi: Send + Sync {
    /// Returns the previous execution state.
    fn set_thread_execution_state(&self, flags: u32) -> Result<u32, LayerError>;
}

pub trait ClockApi: Send + Sync {
    /// Milliseconds since boot, wrapping every ~49.7 days.
    fn tick_count(&self) -> u32;

    fn tick_count64(&self) -> u64;

    /// Interrupt time in 100ns units, excluding suspend. `None` when the call fails.
    fn unbiased_interrupt_time(&self) -> Option<u64>;

    /// `None` when the call fails.
    fn performance_counter(&self) -> Option<i64>;
}

pub trait SleepApi: Send + Sync {
    /// Blocks for `millis`. Returns 0, or the alertable-wakeup code.
    fn sleep_ex(&self, millis: u32, alertable: bool) -> u32;
}

pub trait LocaleApi: Send + Sync {
    fn user_default_ui_language(&self) -> u16;
    fn user_default_locale_name(&self) -> Option<String>;
    fn user_default_lcid(&self) -> u32;
    fn user_default_lang_id(&self) -> u16;
    fn user_default_geo_name(&self) -> Option<String>;
    fn system_default_ui_language(&self) -> u16;
    fn system_default_locale_name(&self) -> Option<String>;
    fn system_default_lcid(&self) -> u32;
    fn system_default_lang_id(&self) -> u16;
}

pub trait VolumeApi: Send + Sync {
    fn volume_information(&self, handle: RawHandle) -> Result<VolumeInformation, LayerError>;
}

/// Provider of the real entry points.
pub trait Platform:
    CommandLineApi + PowerApi + ClockApi + SleepApi + LocaleApi + VolumeApi
{
    /// Whether `symbol` exists on the running system.
    fn resolve(&self, symbol: Symbol) -> bool;

    /// Real conversion-by-identifier (`LCIDToLocaleName`).
    fn lcid_to_locale_name(&self, lcid: u32) -> Option<String>;

    /// Kernel object name behind `handle`.
    fn object_name(&self, handle: RawHandle) -> Result<String, LayerError>;

    /// Transcode a wide string to the process's narrow encoding.
    fn encode_narrow(&self, wide: &[u16]) -> Vec<u8> {
        String::from_utf16_lossy(wide).into_bytes()
    }
}

/// The unmodified platform behaviour, used for every capability the policy
/// leaves disabled.
#[derive(Clone)]
pub struct Real(pub Arc<dyn Platform>);

impl CommandLineApi for Real {
    fn command_line_wide(&self) -> Cow<'_, [u16]> {
        self.0.command_line_wide()
    }

    fn command_line_narrow(&self) -> Cow<'_, [u8]> {
        self.0.command_line_narrow()
    }
}

impl PowerApi for Real {
    fn set_thread_execution_state(&self, flags: u32) -> Result<u32, LayerError> {
        self.0.set_thread_execution_state(flags)
    }
}

impl ClockApi for Real {
    fn tick_count(&self) -> u32 {
        self.0.tick_count()
    }

    fn tick_count64(&self) -> u64 {
        self.0.tick_count64()
    }

    fn unbiased_interrupt_time(&self) -> Option<u64> {
        self.0.unbiased_interrupt_time()
    }

    fn performance_counter(&self) -> Option<i64> {
        self.0.performance_counter()
    }
}

impl SleepApi for Real {
    fn sleep_ex(&self, millis: u32, alertable: bool) -> u32 {
        self.0.sleep_ex(millis, alertable)
    }
}

impl LocaleApi for Real {
    fn user_default_ui_language(&self) -> u16 {
        self.0.user_default_ui_language()
    }

    fn user_default_locale_name(&self) -> Option<String> {
        self.0.user_default_locale_name()
    }

    fn user_default_lcid(&self) -> u32 {
        self.0.user_default_lcid()
    }

    fn user_default_lang_id(&self) -> u16 {
        self.0.user_default_lang_id()
    }

    fn user_default_geo_name(&self) -> Option<String> {
        self.0.user_default_geo_name()
    }

    fn system_default_ui_language(&self) -> u16 {
        self.0.system_default_ui_language()
    }

    fn system_default_locale_name(&self) -> Option<String> {
        self.0.system_default_locale_name()
    }

    fn system_default_lcid(&self) -> u32 {
        self.0.system_default_lcid()
    }

    fn system_default_lang_id(&self) -> u16 {
        self.0.system_default_lang_id()
    }
}

impl VolumeApi for Real {
    fn volume_information(&self, handle: RawHandle) -> Result<VolumeInformation, LayerError> {
        self.0.volume_information(handle)
    }
}
