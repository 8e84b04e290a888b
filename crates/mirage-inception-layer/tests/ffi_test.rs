//! The C ABI as a hook engine drives it: capture reals, init, read back the
//! hook table, call substitutes.
//!
//! The global layer can be installed once per process, so every check lives
//! in a single test.

use mirage_config::testing::TestPolicy;
use mirage_config::keys;
use mirage_inception_layer::ffi::{
    get_command_line_w_inception, get_tick_count_inception, get_user_default_geo_name_inception,
    get_user_default_locale_name_inception, get_volume_information_by_handle_w_inception,
    mirage_get_telemetry, mirage_init, mirage_is_hooked, mirage_substitute,
    set_thread_execution_state_inception, sleep_ex_inception, Bool, Handle, RealEntryPoints,
};
use std::ffi::{c_char, c_int, CStr, CString};
use std::sync::atomic::{AtomicU32, Ordering};

static LAST_ERROR: AtomicU32 = AtomicU32::new(0);
static LAST_SLEEP: AtomicU32 = AtomicU32::new(u32::MAX);

static COMMAND_LINE: &[u16] = &[
    b'c' as u16, b'h' as u16, b'r' as u16, b'o' as u16, b'm' as u16, b'e' as u16, b' ' as u16,
    b'-' as u16, b'x' as u16, 0,
];

unsafe extern "system" fn real_command_line_w() -> *const u16 {
    COMMAND_LINE.as_ptr()
}

unsafe extern "system" fn real_tick_count() -> u32 {
    500
}

unsafe extern "system" fn real_sleep_ex(millis: u32, _alertable: Bool) -> u32 {
    LAST_SLEEP.store(millis, Ordering::SeqCst);
    0
}

unsafe extern "system" fn real_set_execution_state(_flags: u32) -> u32 {
    panic!("the real entry point must not be reached");
}

unsafe extern "system" fn real_lcid_to_locale_name(
    lcid: u32,
    buf: *mut u16,
    size: c_int,
    _flags: u32,
) -> c_int {
    let name: &[u16] = match lcid {
        0x0407 => &[b'd' as u16, b'e' as u16, b'-' as u16, b'D' as u16, b'E' as u16, 0],
        _ => return 0,
    };
    if (size as usize) < name.len() {
        return 0;
    }
    std::ptr::copy_nonoverlapping(name.as_ptr(), buf, name.len());
    name.len() as c_int
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn real_volume_information(
    _handle: Handle,
    _volume_name: *mut u16,
    _volume_name_size: u32,
    serial: *mut u32,
    max_component: *mut u32,
    flags: *mut u32,
    _fs_name: *mut u16,
    _fs_name_size: u32,
) -> Bool {
    *serial = 0x1111_2222;
    *max_component = 255;
    *flags = 0;
    1
}

unsafe extern "system" fn real_object_name(_handle: Handle, buf: *mut u16, size: u32) -> u32 {
    let name: Vec<u16> = r"\Device\HarddiskVolume3\file".encode_utf16().collect();
    if size as usize >= name.len() {
        std::ptr::copy_nonoverlapping(name.as_ptr(), buf, name.len());
    }
    name.len() as u32
}

unsafe extern "system" fn real_locale_name(buf: *mut u16, size: c_int) -> c_int {
    let name: Vec<u16> = "en-US\0".encode_utf16().collect();
    if (size as usize) < name.len() {
        return 0;
    }
    std::ptr::copy_nonoverlapping(name.as_ptr(), buf, name.len());
    name.len() as c_int
}

unsafe extern "system" fn real_set_last_error(code: u32) {
    LAST_ERROR.store(code, Ordering::SeqCst);
}

fn hooked(name: &str) -> bool {
    let name = CString::new(name).unwrap();
    unsafe { mirage_is_hooked(name.as_ptr()) != 0 }
}

#[test]
fn test_engine_lifecycle() {
    mirage_config::install(
        TestPolicy::new()
            .flag(keys::BLOCK_INTERFERE_POWER)
            .flag(keys::USE_CHANGE_SPEED)
            .number(keys::ADD_TICK_SPEED, 3)
            .number(keys::ADD_SLEEP_SPEED, 1)
            .number(keys::LOW_SLEEP_SPEED, 4)
            .number(keys::CUSTOM_LCID, 0x0407)
            .flag(keys::HIDE_DISK_SERIAL_NUMBER)
            .list(keys::DISK_SERIAL_NUMBER, &[r"\Device\HarddiskVolume3,CAFE-F00D"])
            .text(keys::CUSTOM_CHROMIUM_FLAGS, "--extra")
            .build(),
    );

    let reals = RealEntryPoints {
        get_command_line_w: Some(real_command_line_w),
        get_tick_count: Some(real_tick_count),
        sleep_ex: Some(real_sleep_ex),
        set_thread_execution_state: Some(real_set_execution_state),
        get_user_default_locale_name: Some(real_locale_name),
        get_user_default_geo_name: Some(real_locale_name),
        lcid_to_locale_name: Some(real_lcid_to_locale_name),
        get_volume_information_by_handle_w: Some(real_volume_information),
        query_object_name: Some(real_object_name),
        set_last_error: Some(real_set_last_error),
        ..Default::default()
    };

    assert_eq!(unsafe { mirage_init(std::ptr::null()) }, 0);
    assert_eq!(unsafe { mirage_init(&reals) }, 1);
    assert_eq!(unsafe { mirage_init(&reals) }, 0);

    // hook table read-back
    assert!(hooked("GetTickCount"));
    assert!(hooked("SleepEx"));
    assert!(hooked("SetThreadExecutionState"));
    assert!(hooked("GetUserDefaultLCID"));
    assert!(hooked("GetVolumeInformationByHandleW"));
    assert!(hooked("GetCommandLineW"));
    assert!(!hooked("GetTickCount64"), "optional symbol without a real entry point");
    assert!(!hooked("NotAnExport"));
    let name = CString::new("GetTickCount").unwrap();
    assert!(!unsafe { mirage_substitute(name.as_ptr()) }.is_null());

    // clocks and sleep
    assert_eq!(get_tick_count_inception(), 1500);
    sleep_ex_inception(400, 0);
    assert_eq!(LAST_SLEEP.load(Ordering::SeqCst), 100);

    // execution state
    assert_eq!(set_thread_execution_state_inception(0x8000_0001), 0);
    assert_eq!(LAST_ERROR.load(Ordering::SeqCst), 5);

    // locale buffers
    let mut buf = [0u16; 16];
    let written = unsafe { get_user_default_locale_name_inception(buf.as_mut_ptr(), 16) };
    assert_eq!(written, 6);
    assert_eq!(String::from_utf16_lossy(&buf[..5]), "de-DE");
    assert_eq!(unsafe { get_user_default_locale_name_inception(buf.as_mut_ptr(), 3) }, 0);
    assert_eq!(LAST_ERROR.load(Ordering::SeqCst), 122);

    let mut geo = [0u16; 8];
    assert_eq!(unsafe { get_user_default_geo_name_inception(geo.as_mut_ptr(), 8) }, 2);
    assert_eq!(String::from_utf16_lossy(&geo[..2]), "DE");

    // volume query without a serial pointer bypasses the identity cache
    let mut max_component = 0u32;
    let ok = unsafe {
        get_volume_information_by_handle_w_inception(
            3usize as Handle,
            std::ptr::null_mut(),
            0,
            std::ptr::null_mut(),
            &mut max_component,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        )
    };
    assert_eq!(ok, 1);
    assert_eq!(max_component, 255);
    assert_eq!(mirage_inception_layer::InceptionLayer::get().unwrap().status().cached_serials, 0);

    // volume serial
    let mut serial = 0u32;
    let ok = unsafe {
        get_volume_information_by_handle_w_inception(
            3usize as Handle,
            std::ptr::null_mut(),
            0,
            &mut serial,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        )
    };
    assert_eq!(ok, 1);
    assert_eq!(serial, 0xCAFE_F00D);

    // command line
    let line = get_command_line_w_inception();
    let mut len = 0;
    while unsafe { *line.add(len) } != 0 {
        len += 1;
    }
    let text = String::from_utf16_lossy(unsafe { std::slice::from_raw_parts(line, len) });
    assert_eq!(text, "chrome --extra -x");

    // telemetry
    let mut json = vec![0 as c_char; 1024];
    let len = unsafe { mirage_get_telemetry(json.as_mut_ptr(), json.len()) };
    assert!(len > 0 && len < json.len());
    let text = unsafe { CStr::from_ptr(json.as_ptr()) }.to_str().unwrap();
    let value: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(value["initialized"], true);
    assert_eq!(value["lcid"], 0x0407);
    assert_eq!(value["cached_serials"], 1);
    assert_eq!(value["command_line_rewritten"], true);
}
