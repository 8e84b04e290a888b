//! Volume serial masking.
//!
//! The real serial number is never shown to the guest. Each distinct real
//! serial maps to one virtual serial for the lifetime of the layer, chosen
//! from a per-volume policy override or at random.

use crate::error::LayerError;
use crate::platform::{Platform, RawHandle, VolumeApi, VolumeInformation, MAX_PATH};
use mirage_config::{keys, PolicyStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Characters of the object name used as the policy lookup key
/// (`\Device\HarddiskVolumeN` fits).
pub const SERIAL_KEY_LEN: usize = 23;

/// Override value meaning "no override".
pub const DEFAULT_SERIAL_TEXT: &str = "0000-0000";

/// Strict `HHHH-HHHH` check, case-insensitive.
pub fn is_valid_serial_text(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() == 9
        && bytes[4] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || b.is_ascii_hexdigit())
}

/// Parse a valid, non-zero `HHHH-HHHH` override.
pub fn parse_serial_text(text: &str) -> Option<u32> {
    if !is_valid_serial_text(text) {
        return None;
    }
    let digits: String = text.chars().filter(|&c| c != '-').collect();
    u32::from_str_radix(&digits, 16).ok().filter(|&v| v != 0)
}

/// Render a serial the way the policy spells it.
pub fn format_serial(serial: u32) -> String {
    format!("{:04X}-{:04X}", serial >> 16, serial & 0xFFFF)
}

/// A random serial; zero is re-rolled.
pub fn random_serial() -> u32 {
    loop {
        let serial = rand::random::<u32>();
        if serial != 0 {
            return serial;
        }
    }
}

/// Real serial → virtual serial, stable once chosen.
#[derive(Debug, Default)]
pub struct VolumeIdentityCache {
    serials: Mutex<HashMap<u32, u32>>,
}

impl VolumeIdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached virtual serial for `real`, or derive, store and
    /// return a new one. The lock is held across the whole sequence so only
    /// one thread ever derives a value for a given key.
    pub fn get_or_derive<F>(&self, real: u32, derive: F) -> Result<u32, LayerError>
    where
        F: FnOnce() -> Result<u32, LayerError>,
    {
        let mut serials = self.serials.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&cached) = serials.get(&real) {
            return Ok(cached);
        }
        let chosen = derive()?;
        serials.insert(real, chosen);
        Ok(chosen)
    }

    pub fn get(&self, real: u32) -> Option<u32> {
        self.serials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&real)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.serials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Substitute for the volume-information query.
pub struct MaskedVolumes {
    platform: Arc<dyn Platform>,
    policy: Arc<dyn PolicyStore>,
    cache: VolumeIdentityCache,
}

impl MaskedVolumes {
    pub fn new(platform: Arc<dyn Platform>, policy: Arc<dyn PolicyStore>) -> Self {
        Self {
            platform,
            policy,
            cache: VolumeIdentityCache::new(),
        }
    }

    pub fn cache(&self) -> &VolumeIdentityCache {
        &self.cache
    }

    /// Virtual serial for the volume behind `handle` whose real serial is `real_serial`.
    pub fn get_virtual_serial(&self, real_serial: u32, handle: RawHandle) -> Result<u32, LayerError> {
        self.cache
            .get_or_derive(real_serial, || self.derive_serial(handle))
    }

    fn derive_serial(&self, handle: RawHandle) -> Result<u32, LayerError> {
        let name = self.platform.object_name(handle)?;
        let len = name.encode_utf16().count();
        if len > MAX_PATH {
            return Err(LayerError::ObjectNameTooLong { len, max: MAX_PATH });
        }

        let key: String = name.chars().take(SERIAL_KEY_LEN).collect();
        let text = self
            .policy
            .query_named_text(&key, keys::DISK_SERIAL_NUMBER, DEFAULT_SERIAL_TEXT);

        let configured = parse_serial_text(&text);
        mirage_config::log_layer_debug!(
            "volume serial derived",
            volume = key.as_str(),
            from_policy = configured.is_some(),
        );
        Ok(configured.unwrap_or_else(random_serial))
    }
}

impl VolumeApi for MaskedVolumes {
    fn volume_information(&self, handle: RawHandle) -> Result<VolumeInformation, LayerError> {
        let mut info = self.platform.volume_information(handle)?;
        info.serial_number = self.get_virtual_serial(info.serial_number, handle)?;
        Ok(info)
    }
}
