//! In-memory platform for tests.
//!
//! `FakePlatform` answers every real query from fixed values set through its
//! builder, records sleeps instead of blocking, and can pretend individual
//! optional symbols are missing.
//!
//! # Usage
//!
//! ```ignore
//! use mirage_inception_layer::testing::FakePlatform;
//!
//! let platform = FakePlatform::new()
//!     .with_ticks(1000)
//!     .with_volume(3, 0x1234_5678, r"\Device\HarddiskVolume3");
//! ```

use crate::error::LayerError;
use crate::platform::{
    ClockApi, CommandLineApi, LocaleApi, Platform, PowerApi, RawHandle, SleepApi, VolumeApi,
    VolumeInformation,
};
use crate::reals::Symbol;
use crate::syscalls::locale::{lang_id, lcid_to_name, region_subtag};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

/// Win32 `ERROR_INVALID_HANDLE`.
const ERROR_INVALID_HANDLE: u32 = 6;

/// Interrupt-time units (100ns) per fake millisecond tick.
pub const INTERRUPT_UNITS_PER_TICK: u64 = 10_000;
/// Performance-counter counts per fake millisecond tick.
pub const COUNTS_PER_TICK: i64 = 1_000;

#[derive(Debug, Clone)]
struct FakeVolume {
    serial: u32,
    object_name: String,
}

#[derive(Debug)]
pub struct FakePlatform {
    command_line: Vec<u16>,
    ticks: u64,
    counters_fail: bool,
    lcid: u32,
    missing: HashSet<Symbol>,
    volumes: HashMap<RawHandle, FakeVolume>,
    sleeps: Mutex<Vec<(u32, bool)>>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            command_line: r#""C:\app.exe""#.encode_utf16().collect(),
            ticks: 0,
            counters_fail: false,
            lcid: 0x0409,
            missing: HashSet::new(),
            volumes: HashMap::new(),
            sleeps: Mutex::new(Vec::new()),
        }
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command_line(mut self, cmdline: &str) -> Self {
        self.command_line = cmdline.encode_utf16().collect();
        self
    }

    /// Every clock reports `ticks` milliseconds since boot.
    pub fn with_ticks(mut self, ticks: u64) -> Self {
        self.ticks = ticks;
        self
    }

    /// Interrupt time and performance counter report failure.
    pub fn with_failing_counters(mut self) -> Self {
        self.counters_fail = true;
        self
    }

    pub fn with_lcid(mut self, lcid: u32) -> Self {
        self.lcid = lcid;
        self
    }

    /// Pretend `symbol` cannot be resolved.
    pub fn without(mut self, symbol: Symbol) -> Self {
        self.missing.insert(symbol);
        self
    }

    pub fn with_volume(mut self, handle: RawHandle, serial: u32, object_name: &str) -> Self {
        self.volumes.insert(
            handle,
            FakeVolume {
                serial,
                object_name: object_name.to_string(),
            },
        );
        self
    }

    /// Sleeps requested so far, as `(millis, alertable)`.
    pub fn sleeps(&self) -> Vec<(u32, bool)> {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn volume(&self, handle: RawHandle) -> Result<&FakeVolume, LayerError> {
        self.volumes.get(&handle).ok_or(LayerError::Os {
            symbol: Symbol::GetVolumeInformationByHandleW,
            code: ERROR_INVALID_HANDLE,
        })
    }

    fn locale_name(&self) -> Option<String> {
        lcid_to_name(self.lcid).map(str::to_string)
    }
}

impl CommandLineApi for FakePlatform {
    fn command_line_wide(&self) -> Cow<'_, [u16]> {
        Cow::Borrowed(&self.command_line)
    }

    fn command_line_narrow(&self) -> Cow<'_, [u8]> {
        Cow::Owned(self.encode_narrow(&self.command_line))
    }
}

impl PowerApi for FakePlatform {
    fn set_thread_execution_state(&self, _flags: u32) -> Result<u32, LayerError> {
        Ok(0)
    }
}

impl ClockApi for FakePlatform {
    fn tick_count(&self) -> u32 {
        self.ticks as u32
    }

    fn tick_count64(&self) -> u64 {
        self.ticks
    }

    fn unbiased_interrupt_time(&self) -> Option<u64> {
        (!self.counters_fail).then(|| self.ticks * INTERRUPT_UNITS_PER_TICK)
    }

    fn performance_counter(&self) -> Option<i64> {
        (!self.counters_fail).then(|| self.ticks as i64 * COUNTS_PER_TICK)
    }
}

impl SleepApi for FakePlatform {
    fn sleep_ex(&self, millis: u32, alertable: bool) -> u32 {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((millis, alertable));
        0
    }
}

impl LocaleApi for FakePlatform {
    fn user_default_ui_language(&self) -> u16 {
        lang_id(self.lcid)
    }

    fn user_default_locale_name(&self) -> Option<String> {
        self.locale_name()
    }

    fn user_default_lcid(&self) -> u32 {
        self.lcid
    }

    fn user_default_lang_id(&self) -> u16 {
        lang_id(self.lcid)
    }

    fn user_default_geo_name(&self) -> Option<String> {
        self.locale_name()
            .as_deref()
            .and_then(region_subtag)
            .map(str::to_string)
    }

    fn system_default_ui_language(&self) -> u16 {
        lang_id(self.lcid)
    }

    fn system_default_locale_name(&self) -> Option<String> {
        self.locale_name()
    }

    fn system_default_lcid(&self) -> u32 {
        self.lcid
    }

    fn system_default_lang_id(&self) -> u16 {
        lang_id(self.lcid)
    }
}

impl VolumeApi for FakePlatform {
    fn volume_information(&self, handle: RawHandle) -> Result<VolumeInformation, LayerError> {
        let volume = self.volume(handle)?;
        Ok(VolumeInformation {
            volume_name: "System".to_string(),
            serial_number: volume.serial,
            max_component_length: 255,
            file_system_flags: 0,
            file_system_name: "NTFS".to_string(),
        })
    }
}

impl Platform for FakePlatform {
    fn resolve(&self, symbol: Symbol) -> bool {
        !self.missing.contains(&symbol)
    }

    fn lcid_to_locale_name(&self, lcid: u32) -> Option<String> {
        lcid_to_name(lcid).map(str::to_string)
    }

    fn object_name(&self, handle: RawHandle) -> Result<String, LayerError> {
        Ok(self.volume(handle)?.object_name.clone())
    }
}
