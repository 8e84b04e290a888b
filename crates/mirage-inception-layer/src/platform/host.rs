//! Real entry points of the machine the layer is running on.
//!
//! Used when the layer is exercised outside a hook engine (the CLI and the
//! integration tests). Clocks come from `clock_gettime`, the locale from the
//! POSIX environment, volume identity from `fstatvfs`.

use super::{
    ClockApi, CommandLineApi, LocaleApi, Platform, PowerApi, RawHandle, SleepApi, VolumeApi,
    VolumeInformation,
};
use crate::error::LayerError;
use crate::reals::Symbol;
use crate::syscalls::locale::{lang_id, lcid_to_name, name_to_lcid, region_subtag};
use std::borrow::Cow;
use std::time::Duration;

/// `en-US`, reported when the environment names no known locale.
const DEFAULT_LCID: u32 = 0x0409;

/// Environment variables consulted for the locale, in priority order.
const LOCALE_VARS: &[&str] = &["LC_ALL", "LC_MESSAGES", "LANG"];

#[derive(Debug, Clone)]
pub struct HostPlatform {
    command_line: Vec<u16>,
    lcid: u32,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self {
            command_line: current_command_line(),
            lcid: environment_lcid(),
        }
    }

    fn locale_name(&self) -> Option<String> {
        lcid_to_name(self.lcid).map(str::to_string)
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn quote_argument(arg: &str) -> Cow<'_, str> {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return Cow::Borrowed(arg);
    }
    Cow::Owned(format!("\"{}\"", arg.replace('"', "\\\"")))
}

fn current_command_line() -> Vec<u16> {
    let line = std::env::args_os()
        .map(|arg| quote_argument(&arg.to_string_lossy()).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    line.encode_utf16().collect()
}

fn environment_lcid() -> u32 {
    LOCALE_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty())
        .and_then(|value| name_to_lcid(&value))
        .unwrap_or(DEFAULT_LCID)
}

#[cfg(target_os = "linux")]
const TICK_CLOCK: libc::clockid_t = libc::CLOCK_BOOTTIME;
#[cfg(all(unix, not(target_os = "linux")))]
const TICK_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;

/// Nanoseconds on `clock`, or `None` if the clock cannot be read.
#[cfg(unix)]
fn clock_nanos(clock: libc::clockid_t) -> Option<u64> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid, writable timespec
    let rc = unsafe { libc::clock_gettime(clock, &mut ts) };
    if rc != 0 {
        return None;
    }
    Some((ts.tv_sec as u64).wrapping_mul(1_000_000_000) + ts.tv_nsec as u64)
}

#[cfg(unix)]
fn tick_nanos() -> Option<u64> {
    clock_nanos(TICK_CLOCK)
}

#[cfg(unix)]
fn unbiased_nanos() -> Option<u64> {
    clock_nanos(libc::CLOCK_MONOTONIC)
}

#[cfg(not(unix))]
fn elapsed_nanos() -> Option<u64> {
    use once_cell::sync::Lazy;
    use std::time::Instant;
    static START: Lazy<Instant> = Lazy::new(Instant::now);
    u64::try_from(START.elapsed().as_nanos()).ok()
}

#[cfg(not(unix))]
fn tick_nanos() -> Option<u64> {
    elapsed_nanos()
}

#[cfg(not(unix))]
fn unbiased_nanos() -> Option<u64> {
    elapsed_nanos()
}

#[cfg(target_os = "linux")]
fn file_system_name(fd: libc::c_int) -> String {
    // SAFETY: statfs is plain C data; all-zero is a valid value
    let mut st: libc::statfs = unsafe { std::mem::zeroed() };
    // SAFETY: st is a valid, writable statfs
    if unsafe { libc::fstatfs(fd, &mut st) } != 0 {
        return String::new();
    }
    let name = match st.f_type as i64 {
        0xEF53 => "ext4",
        0x0102_1994 => "tmpfs",
        0x9123_683E => "btrfs",
        0x5846_5342 => "xfs",
        0x794C_7630 => "overlay",
        0x9FA0 => "proc",
        0x6969 => "nfs",
        0x4D44 => "vfat",
        0x5346_544E => "ntfs",
        _ => "unknown",
    };
    name.to_string()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn file_system_name(_fd: libc::c_int) -> String {
    "unknown".to_string()
}

impl CommandLineApi for HostPlatform {
    fn command_line_wide(&self) -> Cow<'_, [u16]> {
        Cow::Borrowed(&self.command_line)
    }

    fn command_line_narrow(&self) -> Cow<'_, [u8]> {
        Cow::Owned(self.encode_narrow(&self.command_line))
    }
}

impl PowerApi for HostPlatform {
    fn set_thread_execution_state(&self, _flags: u32) -> Result<u32, LayerError> {
        Err(LayerError::Unsupported(Symbol::SetThreadExecutionState))
    }
}

impl ClockApi for HostPlatform {
    fn tick_count(&self) -> u32 {
        self.tick_count64() as u32
    }

    fn tick_count64(&self) -> u64 {
        tick_nanos().map_or(0, |ns| ns / 1_000_000)
    }

    fn unbiased_interrupt_time(&self) -> Option<u64> {
        unbiased_nanos().map(|ns| ns / 100)
    }

    /// Counter frequency is 1 GHz.
    fn performance_counter(&self) -> Option<i64> {
        unbiased_nanos().and_then(|ns| i64::try_from(ns).ok())
    }
}

impl SleepApi for HostPlatform {
    fn sleep_ex(&self, millis: u32, _alertable: bool) -> u32 {
        std::thread::sleep(Duration::from_millis(u64::from(millis)));
        0
    }
}

impl LocaleApi for HostPlatform {
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

impl VolumeApi for HostPlatform {
    #[cfg(unix)]
    fn volume_information(&self, handle: RawHandle) -> Result<VolumeInformation, LayerError> {
        let fd = libc::c_int::try_from(handle).map_err(|_| LayerError::Os {
            symbol: Symbol::GetVolumeInformationByHandleW,
            code: libc::EBADF as u32,
        })?;
        // SAFETY: statvfs is plain C data; all-zero is a valid value
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: st is a valid, writable statvfs
        if unsafe { libc::fstatvfs(fd, &mut st) } != 0 {
            let code = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(libc::EIO);
            return Err(LayerError::Os {
                symbol: Symbol::GetVolumeInformationByHandleW,
                code: code as u32,
            });
        }
        Ok(VolumeInformation {
            volume_name: String::new(),
            serial_number: st.f_fsid as u32,
            max_component_length: st.f_namemax as u32,
            file_system_flags: st.f_flag as u32,
            file_system_name: file_system_name(fd),
        })
    }

    #[cfg(not(unix))]
    fn volume_information(&self, _handle: RawHandle) -> Result<VolumeInformation, LayerError> {
        Err(LayerError::Unsupported(Symbol::GetVolumeInformationByHandleW))
    }
}

impl Platform for HostPlatform {
    fn resolve(&self, symbol: Symbol) -> bool {
        match symbol {
            Symbol::SetThreadExecutionState => false,
            Symbol::GetVolumeInformationByHandleW => cfg!(unix),
            _ => true,
        }
    }

    fn lcid_to_locale_name(&self, lcid: u32) -> Option<String> {
        lcid_to_name(lcid).map(str::to_string)
    }

    #[cfg(target_os = "linux")]
    fn object_name(&self, handle: RawHandle) -> Result<String, LayerError> {
        std::fs::read_link(format!("/proc/self/fd/{handle}"))
            .map(|path| path.to_string_lossy().into_owned())
            .map_err(|e| LayerError::Os {
                symbol: Symbol::GetVolumeInformationByHandleW,
                code: e.raw_os_error().unwrap_or(libc::EBADF) as u32,
            })
    }

    #[cfg(not(target_os = "linux"))]
    fn object_name(&self, _handle: RawHandle) -> Result<String, LayerError> {
        Err(LayerError::Unsupported(Symbol::GetVolumeInformationByHandleW))
    }
}
