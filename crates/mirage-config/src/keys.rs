//! Setting names understood by the inception layer.
//!
//! Names are matched case-insensitively by [`crate::Policy`], so these are the
//! canonical spellings used in templates and logs.

/// Extra arguments spliced into a Chromium top-level command line.
pub const CUSTOM_CHROMIUM_FLAGS: &str = "CustomChromiumFlags";

/// Deny `SetThreadExecutionState` so the guest cannot keep the machine awake.
pub const BLOCK_INTERFERE_POWER: &str = "BlockInterferePower";

/// Master switch for clock and sleep scaling.
pub const USE_CHANGE_SPEED: &str = "UseChangeSpeed";
pub const ADD_TICK_SPEED: &str = "AddTickSpeed";
pub const LOW_TICK_SPEED: &str = "LowTickSpeed";
pub const ADD_SLEEP_SPEED: &str = "AddSleepSpeed";
pub const LOW_SLEEP_SPEED: &str = "LowSleepSpeed";

/// Locale identifier reported for every default-locale query. 0 disables.
pub const CUSTOM_LCID: &str = "CustomLCID";

/// Master switch for volume serial masking.
pub const HIDE_DISK_SERIAL_NUMBER: &str = "HideDiskSerialNumber";

/// Per-volume `name,HHHH-HHHH` overrides for the masked serial.
pub const DISK_SERIAL_NUMBER: &str = "DiskSerialNumber";

/// Longest text value a single setting may carry.
pub const CONF_LINE_LEN: usize = 2000;

/// Every key, in template order.
pub const ALL: &[&str] = &[
    CUSTOM_CHROMIUM_FLAGS,
    BLOCK_INTERFERE_POWER,
    USE_CHANGE_SPEED,
    ADD_TICK_SPEED,
    LOW_TICK_SPEED,
    ADD_SLEEP_SPEED,
    LOW_SLEEP_SPEED,
    CUSTOM_LCID,
    HIDE_DISK_SERIAL_NUMBER,
    DISK_SERIAL_NUMBER,
];
