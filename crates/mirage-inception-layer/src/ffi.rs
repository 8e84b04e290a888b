// =============================================================================
// ffi.rs — C ABI surface for the external hook engine
// =============================================================================
//
// Sequence expected from the engine:
//   1. resolve every Symbol by name (kernelbase first, then kernel32)
//   2. mirage_init(&reals) with the captured originals (null = not found)
//   3. for each symbol: if mirage_is_hooked(name), redirect it to
//      mirage_substitute(name)
//
// Substitutes keep Win32 calling conventions and error reporting: failures
// return 0/FALSE and set the thread's last-error through the engine's
// SetLastError.
// =============================================================================

use crate::error::LayerError;
use crate::platform::{
    ClockApi, CommandLineApi, LocaleApi, Platform, PowerApi, RawHandle, SleepApi, VolumeApi,
    VolumeInformation, MAX_PATH,
};
use crate::reals::Symbol;
use crate::state::{InceptionLayer, LayerStatus};
use libc::{c_char, c_int, c_void};
use mirage_config::logging::{init_logging, LogLevel};
use mirage_config::GlobalPolicy;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::borrow::Cow;
use std::ffi::CStr;
use std::sync::Arc;

/// `LOCALE_NAME_MAX_LENGTH`
pub const LOCALE_NAME_MAX_LENGTH: usize = 85;
/// Win32 `ERROR_INSUFFICIENT_BUFFER`.
pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
/// Win32 `ERROR_BAD_LENGTH`.
pub const ERROR_BAD_LENGTH: u32 = 24;

/// First guess for object-name buffers; retried with the reported size.
const OBJECT_NAME_CAPACITY: usize = 512;

pub type Bool = c_int;
pub type Handle = *mut c_void;

/// Original entry points captured by the hook engine before redirection.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct RealEntryPoints {
    pub get_command_line_w: Option<unsafe extern "system" fn() -> *const u16>,
    pub get_command_line_a: Option<unsafe extern "system" fn() -> *const c_char>,
    pub set_thread_execution_state: Option<unsafe extern "system" fn(u32) -> u32>,
    pub get_tick_count: Option<unsafe extern "system" fn() -> u32>,
    pub get_tick_count64: Option<unsafe extern "system" fn() -> u64>,
    pub query_unbiased_interrupt_time: Option<unsafe extern "system" fn(*mut u64) -> Bool>,
    pub query_performance_counter: Option<unsafe extern "system" fn(*mut i64) -> Bool>,
    pub sleep_ex: Option<unsafe extern "system" fn(u32, Bool) -> u32>,
    pub get_user_default_ui_language: Option<unsafe extern "system" fn() -> u16>,
    pub get_user_default_locale_name: Option<unsafe extern "system" fn(*mut u16, c_int) -> c_int>,
    pub get_user_default_lcid: Option<unsafe extern "system" fn() -> u32>,
    pub get_user_default_lang_id: Option<unsafe extern "system" fn() -> u16>,
    pub get_user_default_geo_name: Option<unsafe extern "system" fn(*mut u16, c_int) -> c_int>,
    pub get_system_default_ui_language: Option<unsafe extern "system" fn() -> u16>,
    pub get_system_default_locale_name: Option<unsafe extern "system" fn(*mut u16, c_int) -> c_int>,
    pub get_system_default_lcid: Option<unsafe extern "system" fn() -> u32>,
    pub get_system_default_lang_id: Option<unsafe extern "system" fn() -> u16>,
    pub get_volume_information_by_handle_w: Option<
        unsafe extern "system" fn(
            Handle,
            *mut u16,
            u32,
            *mut u32,
            *mut u32,
            *mut u32,
            *mut u16,
            u32,
        ) -> Bool,
    >,
    pub lcid_to_locale_name: Option<unsafe extern "system" fn(u32, *mut u16, c_int, u32) -> c_int>,
    /// Writes the kernel object name of a handle, returns its length in
    /// characters (larger than the buffer when truncated), 0 on failure.
    pub query_object_name: Option<unsafe extern "system" fn(Handle, *mut u16, u32) -> u32>,
    pub get_last_error: Option<unsafe extern "system" fn() -> u32>,
    pub set_last_error: Option<unsafe extern "system" fn(u32)>,
}

static REALS: OnceCell<RealEntryPoints> = OnceCell::new();
static WIDE_COMMAND_LINE: OnceCell<Vec<u16>> = OnceCell::new();
static NARROW_COMMAND_LINE: OnceCell<Vec<u8>> = OnceCell::new();

// ============================================================================
// Buffer helpers
// ============================================================================

/// Copy `src` plus a terminator into `dst`. Returns the characters written
/// including the terminator, or `None` when `dst` is too small.
pub fn fill_wide(src: &str, dst: &mut [u16]) -> Option<usize> {
    let wide: Vec<u16> = src.encode_utf16().collect();
    if wide.len() >= dst.len() {
        return None;
    }
    dst[..wide.len()].copy_from_slice(&wide);
    dst[wide.len()] = 0;
    Some(wide.len() + 1)
}

/// Contents of a NUL-terminated or full `buf`, as text.
pub fn wide_to_string(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}

/// `src` with one trailing NUL.
pub fn nul_terminated<T: Copy + Default>(src: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(src.len() + 1);
    out.extend_from_slice(src);
    out.push(T::default());
    out
}

unsafe fn wide_slice<'a>(ptr: *mut u16, len: usize) -> Option<&'a mut [u16]> {
    if ptr.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts_mut(ptr, len))
    }
}

unsafe fn read_wide_cstr(ptr: *const u16) -> Vec<u16> {
    if ptr.is_null() {
        return Vec::new();
    }
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    std::slice::from_raw_parts(ptr, len).to_vec()
}

fn set_last_error(code: u32) {
    if let Some(set) = REALS.get().and_then(|r| r.set_last_error) {
        // SAFETY: captured by the engine from the system
        unsafe { set(code) };
    }
}

// ============================================================================
// ForeignPlatform: real behaviour through the captured entry points
// ============================================================================

pub struct ForeignPlatform {
    reals: RealEntryPoints,
}

impl ForeignPlatform {
    pub fn new(reals: RealEntryPoints) -> Self {
        Self { reals }
    }

    fn last_error(&self) -> u32 {
        match self.reals.get_last_error {
            // SAFETY: captured by the engine from the system
            Some(get) => unsafe { get() },
            None => 0,
        }
    }

    fn os_error(&self, symbol: Symbol) -> LayerError {
        LayerError::Os {
            symbol,
            code: self.last_error(),
        }
    }

    fn locale_name_from(
        &self,
        call: Option<unsafe extern "system" fn(*mut u16, c_int) -> c_int>,
    ) -> Option<String> {
        let call = call?;
        let mut buf = [0u16; LOCALE_NAME_MAX_LENGTH];
        // SAFETY: buf is writable for its full length
        let written = unsafe { call(buf.as_mut_ptr(), buf.len() as c_int) };
        (written > 0).then(|| wide_to_string(&buf))
    }
}

impl CommandLineApi for ForeignPlatform {
    fn command_line_wide(&self) -> Cow<'_, [u16]> {
        let wide = match self.reals.get_command_line_w {
            // SAFETY: returns a process-lifetime, NUL-terminated buffer
            Some(get) => unsafe { read_wide_cstr(get()) },
            None => Vec::new(),
        };
        Cow::Owned(wide)
    }

    fn command_line_narrow(&self) -> Cow<'_, [u8]> {
        let narrow = match self.reals.get_command_line_a {
            Some(get) => {
                // SAFETY: returns a process-lifetime, NUL-terminated buffer
                let ptr = unsafe { get() };
                if ptr.is_null() {
                    Vec::new()
                } else {
                    unsafe { CStr::from_ptr(ptr) }.to_bytes().to_vec()
                }
            }
            None => Vec::new(),
        };
        Cow::Owned(narrow)
    }
}

impl PowerApi for ForeignPlatform {
    fn set_thread_execution_state(&self, flags: u32) -> Result<u32, LayerError> {
        let set = self
            .reals
            .set_thread_execution_state
            .ok_or(LayerError::Unsupported(Symbol::SetThreadExecutionState))?;
        // SAFETY: captured by the engine from the system
        match unsafe { set(flags) } {
            0 => Err(self.os_error(Symbol::SetThreadExecutionState)),
            previous => Ok(previous),
        }
    }
}

impl ClockApi for ForeignPlatform {
    fn tick_count(&self) -> u32 {
        // SAFETY: captured by the engine from the system
        self.reals.get_tick_count.map_or(0, |f| unsafe { f() })
    }

    fn tick_count64(&self) -> u64 {
        match self.reals.get_tick_count64 {
            // SAFETY: captured by the engine from the system
            Some(f) => unsafe { f() },
            None => u64::from(self.tick_count()),
        }
    }

    fn unbiased_interrupt_time(&self) -> Option<u64> {
        let query = self.reals.query_unbiased_interrupt_time?;
        let mut value = 0u64;
        // SAFETY: value is a valid out pointer
        (unsafe { query(&mut value) } != 0).then_some(value)
    }

    fn performance_counter(&self) -> Option<i64> {
        let query = self.reals.query_performance_counter?;
        let mut value = 0i64;
        // SAFETY: value is a valid out pointer
        (unsafe { query(&mut value) } != 0).then_some(value)
    }
}

impl SleepApi for ForeignPlatform {
    fn sleep_ex(&self, millis: u32, alertable: bool) -> u32 {
        match self.reals.sleep_ex {
            // SAFETY: captured by the engine from the system
            Some(f) => unsafe { f(millis, Bool::from(alertable)) },
            None => {
                std::thread::sleep(std::time::Duration::from_millis(u64::from(millis)));
                0
            }
        }
    }
}

impl LocaleApi for ForeignPlatform {
    fn user_default_ui_language(&self) -> u16 {
        // SAFETY: captured by the engine from the system
        self.reals.get_user_default_ui_language.map_or(0, |f| unsafe { f() })
    }

    fn user_default_locale_name(&self) -> Option<String> {
        self.locale_name_from(self.reals.get_user_default_locale_name)
    }

    fn user_default_lcid(&self) -> u32 {
        // SAFETY: captured by the engine from the system
        self.reals.get_user_default_lcid.map_or(0, |f| unsafe { f() })
    }

    fn user_default_lang_id(&self) -> u16 {
        // SAFETY: captured by the engine from the system
        self.reals.get_user_default_lang_id.map_or(0, |f| unsafe { f() })
    }

    fn user_default_geo_name(&self) -> Option<String> {
        self.locale_name_from(self.reals.get_user_default_geo_name)
    }

    fn system_default_ui_language(&self) -> u16 {
        // SAFETY: captured by the engine from the system
        self.reals.get_system_default_ui_language.map_or(0, |f| unsafe { f() })
    }

    fn system_default_locale_name(&self) -> Option<String> {
        self.locale_name_from(self.reals.get_system_default_locale_name)
    }

    fn system_default_lcid(&self) -> u32 {
        // SAFETY: captured by the engine from the system
        self.reals.get_system_default_lcid.map_or(0, |f| unsafe { f() })
    }

    fn system_default_lang_id(&self) -> u16 {
        // SAFETY: captured by the engine from the system
        self.reals.get_system_default_lang_id.map_or(0, |f| unsafe { f() })
    }
}

impl VolumeApi for ForeignPlatform {
    fn volume_information(&self, handle: RawHandle) -> Result<VolumeInformation, LayerError> {
        let query = self
            .reals
            .get_volume_information_by_handle_w
            .ok_or(LayerError::Unsupported(Symbol::GetVolumeInformationByHandleW))?;

        let mut volume_name = [0u16; MAX_PATH + 1];
        let mut fs_name = [0u16; MAX_PATH + 1];
        let mut info = VolumeInformation::default();
        // SAFETY: every out pointer is valid for the length passed with it
        let ok = unsafe {
            query(
                handle as Handle,
                volume_name.as_mut_ptr(),
                volume_name.len() as u32,
                &mut info.serial_number,
                &mut info.max_component_length,
                &mut info.file_system_flags,
                fs_name.as_mut_ptr(),
                fs_name.len() as u32,
            )
        };
        if ok == 0 {
            return Err(self.os_error(Symbol::GetVolumeInformationByHandleW));
        }
        info.volume_name = wide_to_string(&volume_name);
        info.file_system_name = wide_to_string(&fs_name);
        Ok(info)
    }
}

impl Platform for ForeignPlatform {
    fn resolve(&self, symbol: Symbol) -> bool {
        let r = &self.reals;
        match symbol {
            Symbol::GetCommandLineW => r.get_command_line_w.is_some(),
            Symbol::GetCommandLineA => r.get_command_line_a.is_some(),
            Symbol::SetThreadExecutionState => r.set_thread_execution_state.is_some(),
            Symbol::GetTickCount => r.get_tick_count.is_some(),
            Symbol::GetTickCount64 => r.get_tick_count64.is_some(),
            Symbol::QueryUnbiasedInterruptTime => r.query_unbiased_interrupt_time.is_some(),
            Symbol::QueryPerformanceCounter => r.query_performance_counter.is_some(),
            Symbol::SleepEx => r.sleep_ex.is_some(),
            Symbol::GetUserDefaultUILanguage => r.get_user_default_ui_language.is_some(),
            Symbol::GetUserDefaultLocaleName => r.get_user_default_locale_name.is_some(),
            Symbol::GetUserDefaultLCID => r.get_user_default_lcid.is_some(),
            Symbol::GetUserDefaultLangID => r.get_user_default_lang_id.is_some(),
            Symbol::GetUserDefaultGeoName => r.get_user_default_geo_name.is_some(),
            Symbol::GetSystemDefaultUILanguage => r.get_system_default_ui_language.is_some(),
            Symbol::GetSystemDefaultLocaleName => r.get_system_default_locale_name.is_some(),
            Symbol::GetSystemDefaultLCID => r.get_system_default_lcid.is_some(),
            Symbol::GetSystemDefaultLangID => r.get_system_default_lang_id.is_some(),
            Symbol::GetVolumeInformationByHandleW => {
                r.get_volume_information_by_handle_w.is_some() && r.query_object_name.is_some()
            }
            Symbol::LcidToLocaleName => r.lcid_to_locale_name.is_some(),
        }
    }

    fn lcid_to_locale_name(&self, lcid: u32) -> Option<String> {
        let convert = self.reals.lcid_to_locale_name?;
        let mut buf = [0u16; LOCALE_NAME_MAX_LENGTH];
        // SAFETY: buf is writable for its full length
        let written = unsafe { convert(lcid, buf.as_mut_ptr(), buf.len() as c_int, 0) };
        (written > 0).then(|| wide_to_string(&buf))
    }

    fn object_name(&self, handle: RawHandle) -> Result<String, LayerError> {
        let query = self
            .reals
            .query_object_name
            .ok_or(LayerError::Unsupported(Symbol::GetVolumeInformationByHandleW))?;

        let mut buf = vec![0u16; OBJECT_NAME_CAPACITY];
        loop {
            // SAFETY: buf is writable for its full length
            let len = unsafe { query(handle as Handle, buf.as_mut_ptr(), buf.len() as u32) } as usize;
            if len == 0 {
                return Err(self.os_error(Symbol::GetVolumeInformationByHandleW));
            }
            if len <= buf.len() {
                return Ok(String::from_utf16_lossy(&buf[..len]));
            }
            buf.resize(len, 0);
        }
    }
}

// ============================================================================
// Engine entry points
// ============================================================================

/// Build and install the process-wide layer. Returns 1 on success, 0 when
/// `reals` is null or a layer is already installed.
///
/// # Safety
/// `reals` must be null or point to a valid `RealEntryPoints`.
#[no_mangle]
pub unsafe extern "C" fn mirage_init(reals: *const RealEntryPoints) -> c_int {
    if reals.is_null() {
        return 0;
    }
    if let Some(level) = std::env::var("MIRAGE_LOG")
        .ok()
        .and_then(|v| LogLevel::parse(&v))
    {
        init_logging(level);
    }

    let reals = *reals;
    if REALS.set(reals).is_err() {
        mirage_config::log_layer_warn!("mirage_init called twice, ignored");
        return 0;
    }
    let platform: Arc<dyn Platform> = Arc::new(ForeignPlatform::new(reals));
    let layer = InceptionLayer::init(platform, Arc::new(GlobalPolicy));
    c_int::from(InceptionLayer::install_global(layer).is_ok())
}

unsafe fn symbol_from_ptr(name: *const c_char) -> Option<Symbol> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok().and_then(Symbol::from_name)
}

/// 1 when calls to `name` must be redirected to the layer's substitute.
///
/// # Safety
/// `name` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn mirage_is_hooked(name: *const c_char) -> c_int {
    let hooked = symbol_from_ptr(name)
        .zip(InceptionLayer::get())
        .is_some_and(|(symbol, layer)| layer.is_hooked(symbol));
    c_int::from(hooked)
}

/// Address of the substitute for `name`, or null when `name` is not hooked.
///
/// # Safety
/// `name` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn mirage_substitute(name: *const c_char) -> *const c_void {
    match symbol_from_ptr(name) {
        Some(symbol) if mirage_is_hooked(name) != 0 => substitute_address(symbol),
        _ => std::ptr::null(),
    }
}

pub fn substitute_address(symbol: Symbol) -> *const c_void {
    match symbol {
        Symbol::GetCommandLineW => get_command_line_w_inception as *const c_void,
        Symbol::GetCommandLineA => get_command_line_a_inception as *const c_void,
        Symbol::SetThreadExecutionState => set_thread_execution_state_inception as *const c_void,
        Symbol::GetTickCount => get_tick_count_inception as *const c_void,
        Symbol::GetTickCount64 => get_tick_count64_inception as *const c_void,
        Symbol::QueryUnbiasedInterruptTime => {
            query_unbiased_interrupt_time_inception as *const c_void
        }
        Symbol::QueryPerformanceCounter => query_performance_counter_inception as *const c_void,
        Symbol::SleepEx => sleep_ex_inception as *const c_void,
        Symbol::GetUserDefaultUILanguage => get_user_default_ui_language_inception as *const c_void,
        Symbol::GetUserDefaultLocaleName => get_user_default_locale_name_inception as *const c_void,
        Symbol::GetUserDefaultLCID => get_user_default_lcid_inception as *const c_void,
        Symbol::GetUserDefaultLangID => get_user_default_lang_id_inception as *const c_void,
        Symbol::GetUserDefaultGeoName => get_user_default_geo_name_inception as *const c_void,
        Symbol::GetSystemDefaultUILanguage => {
            get_system_default_ui_language_inception as *const c_void
        }
        Symbol::GetSystemDefaultLocaleName => {
            get_system_default_locale_name_inception as *const c_void
        }
        Symbol::GetSystemDefaultLCID => get_system_default_lcid_inception as *const c_void,
        Symbol::GetSystemDefaultLangID => get_system_default_lang_id_inception as *const c_void,
        Symbol::GetVolumeInformationByHandleW => {
            get_volume_information_by_handle_w_inception as *const c_void
        }
        // Only consulted, never replaced.
        Symbol::LcidToLocaleName => std::ptr::null(),
    }
}

#[derive(Serialize)]
struct Telemetry {
    initialized: bool,
    #[serde(flatten)]
    status: Option<LayerStatus>,
}

/// Write a JSON status summary into `buf`. Returns the JSON length in bytes;
/// the buffer is filled (NUL-terminated) only when `size` exceeds it.
///
/// # Safety
/// `buf` must be null or writable for `size` bytes.
#[no_mangle]
pub unsafe extern "C" fn mirage_get_telemetry(buf: *mut c_char, size: usize) -> usize {
    let layer = InceptionLayer::get();
    let telemetry = Telemetry {
        initialized: layer.is_some(),
        status: layer.map(InceptionLayer::status),
    };
    let json = match serde_json::to_vec(&telemetry) {
        Ok(json) => json,
        Err(_) => return 0,
    };
    if !buf.is_null() && size > json.len() {
        std::ptr::copy_nonoverlapping(json.as_ptr(), buf.cast::<u8>(), json.len());
        *buf.add(json.len()) = 0;
    }
    json.len()
}

// ============================================================================
// Substitutes
// ============================================================================

fn layer() -> Option<&'static InceptionLayer> {
    InceptionLayer::get()
}

#[no_mangle]
pub extern "system" fn get_command_line_w_inception() -> *const u16 {
    let Some(layer) = layer() else {
        return std::ptr::null();
    };
    WIDE_COMMAND_LINE
        .get_or_init(|| nul_terminated(&layer.command_line_wide()))
        .as_ptr()
}

#[no_mangle]
pub extern "system" fn get_command_line_a_inception() -> *const c_char {
    let Some(layer) = layer() else {
        return std::ptr::null();
    };
    NARROW_COMMAND_LINE
        .get_or_init(|| nul_terminated(&layer.command_line_narrow()))
        .as_ptr()
        .cast()
}

#[no_mangle]
pub extern "system" fn set_thread_execution_state_inception(flags: u32) -> u32 {
    let result = match layer() {
        Some(layer) => layer.set_thread_execution_state(flags),
        None => Err(LayerError::AccessDenied(Symbol::SetThreadExecutionState)),
    };
    result.unwrap_or_else(|e| {
        set_last_error(e.os_code());
        0
    })
}

#[no_mangle]
pub extern "system" fn get_tick_count_inception() -> u32 {
    layer().map_or(0, |l| l.tick_count())
}

#[no_mangle]
pub extern "system" fn get_tick_count64_inception() -> u64 {
    layer().map_or(0, |l| l.tick_count64())
}

/// # Safety
/// `out` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "system" fn query_unbiased_interrupt_time_inception(out: *mut u64) -> Bool {
    match layer().and_then(|l| l.unbiased_interrupt_time()) {
        Some(value) if !out.is_null() => {
            *out = value;
            1
        }
        _ => 0,
    }
}

/// # Safety
/// `out` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "system" fn query_performance_counter_inception(out: *mut i64) -> Bool {
    match layer().and_then(|l| l.performance_counter()) {
        Some(value) if !out.is_null() => {
            *out = value;
            1
        }
        _ => 0,
    }
}

#[no_mangle]
pub extern "system" fn sleep_ex_inception(millis: u32, alertable: Bool) -> u32 {
    layer().map_or(0, |l| l.sleep_ex(millis, alertable != 0))
}

#[no_mangle]
pub extern "system" fn get_user_default_ui_language_inception() -> u16 {
    layer().map_or(0, |l| l.user_default_ui_language())
}

#[no_mangle]
pub extern "system" fn get_user_default_lcid_inception() -> u32 {
    layer().map_or(0, |l| l.user_default_lcid())
}

#[no_mangle]
pub extern "system" fn get_user_default_lang_id_inception() -> u16 {
    layer().map_or(0, |l| l.user_default_lang_id())
}

#[no_mangle]
pub extern "system" fn get_system_default_ui_language_inception() -> u16 {
    layer().map_or(0, |l| l.system_default_ui_language())
}

#[no_mangle]
pub extern "system" fn get_system_default_lcid_inception() -> u32 {
    layer().map_or(0, |l| l.system_default_lcid())
}

#[no_mangle]
pub extern "system" fn get_system_default_lang_id_inception() -> u16 {
    layer().map_or(0, |l| l.system_default_lang_id())
}

/// Locale-name convention: characters written including the terminator, or
/// 0 with `ERROR_INSUFFICIENT_BUFFER` when `buf` is too small.
unsafe fn write_locale_name(name: Option<String>, buf: *mut u16, size: c_int) -> c_int {
    let Some(name) = name else {
        return 0;
    };
    let len = usize::try_from(size).unwrap_or(0);
    match wide_slice(buf, len).and_then(|dst| fill_wide(&name, dst)) {
        Some(written) => written as c_int,
        None => {
            set_last_error(ERROR_INSUFFICIENT_BUFFER);
            0
        }
    }
}

/// # Safety
/// `buf` must be null or writable for `size` characters.
#[no_mangle]
pub unsafe extern "system" fn get_user_default_locale_name_inception(
    buf: *mut u16,
    size: c_int,
) -> c_int {
    write_locale_name(layer().and_then(|l| l.user_default_locale_name()), buf, size)
}

/// # Safety
/// `buf` must be null or writable for `size` characters.
#[no_mangle]
pub unsafe extern "system" fn get_system_default_locale_name_inception(
    buf: *mut u16,
    size: c_int,
) -> c_int {
    write_locale_name(layer().and_then(|l| l.system_default_locale_name()), buf, size)
}

/// Returns the region length; the region is copied only when it fits with
/// its terminator.
///
/// # Safety
/// `buf` must be null or writable for `size` characters.
#[no_mangle]
pub unsafe extern "system" fn get_user_default_geo_name_inception(
    buf: *mut u16,
    size: c_int,
) -> c_int {
    let Some(region) = layer().and_then(|l| l.user_default_geo_name()) else {
        return 0;
    };
    let len = usize::try_from(size).unwrap_or(0);
    if let Some(dst) = wide_slice(buf, len) {
        let _ = fill_wide(&region, dst);
    }
    region.encode_utf16().count() as c_int
}

unsafe fn write_volume_text(text: &str, buf: *mut u16, size: u32) -> bool {
    match wide_slice(buf, size as usize) {
        Some(dst) => fill_wide(text, dst).is_some(),
        None => true,
    }
}

/// # Safety
/// Every non-null pointer must be writable for the size passed with it.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "system" fn get_volume_information_by_handle_w_inception(
    handle: Handle,
    volume_name: *mut u16,
    volume_name_size: u32,
    serial_number: *mut u32,
    max_component_length: *mut u32,
    file_system_flags: *mut u32,
    file_system_name: *mut u16,
    file_system_name_size: u32,
) -> Bool {
    let Some(layer) = layer() else {
        set_last_error(LayerError::Unsupported(Symbol::GetVolumeInformationByHandleW).os_code());
        return 0;
    };
    // Masking only applies when the caller asks for the serial.
    let api: &dyn VolumeApi = if serial_number.is_null() {
        layer.real()
    } else {
        layer
    };
    let info = match api.volume_information(handle as RawHandle) {
        Ok(info) => info,
        Err(LayerError::ObjectNameTooLong { len, max }) => {
            mirage_config::log_layer_warn!("object name overflow, aborting", len = len, max = max);
            std::process::abort();
        }
        Err(e) => {
            set_last_error(e.os_code());
            return 0;
        }
    };

    if !write_volume_text(&info.volume_name, volume_name, volume_name_size)
        || !write_volume_text(&info.file_system_name, file_system_name, file_system_name_size)
    {
        set_last_error(ERROR_BAD_LENGTH);
        return 0;
    }
    if !serial_number.is_null() {
        *serial_number = info.serial_number;
    }
    if !max_component_length.is_null() {
        *max_component_length = info.max_component_length;
    }
    if !file_system_flags.is_null() {
        *file_system_flags = info.file_system_flags;
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_wide_fits() {
        let mut buf = [0xFFFFu16; 6];
        assert_eq!(fill_wide("de-DE", &mut buf), Some(6));
        assert_eq!(wide_to_string(&buf), "de-DE");
        assert_eq!(buf[5], 0);
    }

    #[test]
    fn test_fill_wide_too_small_leaves_buffer() {
        let mut buf = [0xFFFFu16; 5];
        assert_eq!(fill_wide("de-DE", &mut buf), None);
        assert!(buf.iter().all(|&c| c == 0xFFFF));
    }

    #[test]
    fn test_nul_terminated() {
        assert_eq!(nul_terminated(&[1u16, 2]), vec![1, 2, 0]);
        assert_eq!(nul_terminated::<u8>(&[]), vec![0]);
    }

    #[test]
    fn test_empty_table_resolves_nothing() {
        let foreign = ForeignPlatform::new(RealEntryPoints::default());
        for &symbol in Symbol::ALL {
            assert!(!foreign.resolve(symbol));
        }
        assert_eq!(foreign.tick_count64(), 0);
        assert_eq!(foreign.performance_counter(), None);
        assert!(foreign.command_line_wide().is_empty());
        assert_eq!(
            foreign.volume_information(1),
            Err(LayerError::Unsupported(Symbol::GetVolumeInformationByHandleW))
        );
    }

    #[test]
    fn test_every_replaceable_symbol_has_a_substitute() {
        for &symbol in Symbol::ALL {
            let address = substitute_address(symbol);
            assert_eq!(address.is_null(), symbol == Symbol::LcidToLocaleName, "{symbol}");
        }
    }

    unsafe extern "system" fn fake_tick64() -> u64 {
        42
    }

    unsafe extern "system" fn fake_object_name(_h: Handle, buf: *mut u16, size: u32) -> u32 {
        let name: Vec<u16> = "x".repeat(600).encode_utf16().collect();
        if (size as usize) >= name.len() {
            std::ptr::copy_nonoverlapping(name.as_ptr(), buf, name.len());
        }
        name.len() as u32
    }

    #[test]
    fn test_foreign_calls_through_table() {
        let reals = RealEntryPoints {
            get_tick_count64: Some(fake_tick64),
            query_object_name: Some(fake_object_name),
            ..Default::default()
        };
        let foreign = ForeignPlatform::new(reals);
        assert!(foreign.resolve(Symbol::GetTickCount64));
        assert_eq!(foreign.tick_count64(), 42);
        // buffer grows to the reported length
        assert_eq!(foreign.object_name(1).unwrap().len(), 600);
    }
}
