//! Locale override.
//!
//! Every default-locale query answers with one configured LCID. The locale
//! name goes through the real `LCIDToLocaleName` when the process can reach
//! it and falls back to a fixed name otherwise; the geographic name is the
//! region subtag of that locale name.

use crate::platform::{LocaleApi, Platform};
use crate::reals::Symbol;
use std::sync::Arc;

/// Reported when the real converter is missing or yields nothing.
pub const FALLBACK_LOCALE_NAME: &str = "en_US";

/// Common LCIDs and their BCP-47 names.
static LCID_TABLE: &[(u32, &str)] = &[
    (0x0401, "ar-SA"),
    (0x0404, "zh-TW"),
    (0x0405, "cs-CZ"),
    (0x0406, "da-DK"),
    (0x0407, "de-DE"),
    (0x0408, "el-GR"),
    (0x0409, "en-US"),
    (0x040B, "fi-FI"),
    (0x040C, "fr-FR"),
    (0x040D, "he-IL"),
    (0x040E, "hu-HU"),
    (0x0410, "it-IT"),
    (0x0411, "ja-JP"),
    (0x0412, "ko-KR"),
    (0x0413, "nl-NL"),
    (0x0414, "nb-NO"),
    (0x0415, "pl-PL"),
    (0x0416, "pt-BR"),
    (0x0418, "ro-RO"),
    (0x0419, "ru-RU"),
    (0x041D, "sv-SE"),
    (0x041E, "th-TH"),
    (0x041F, "tr-TR"),
    (0x0422, "uk-UA"),
    (0x042A, "vi-VN"),
    (0x0804, "zh-CN"),
    (0x0807, "de-CH"),
    (0x0809, "en-GB"),
    (0x080A, "es-MX"),
    (0x0816, "pt-PT"),
    (0x0C07, "de-AT"),
    (0x0C09, "en-AU"),
    (0x0C0A, "es-ES"),
    (0x0C0C, "fr-CA"),
    (0x1009, "en-CA"),
];

pub fn lcid_to_name(lcid: u32) -> Option<&'static str> {
    LCID_TABLE
        .iter()
        .find(|(id, _)| *id == lcid)
        .map(|(_, name)| *name)
}

/// Accepts `de-DE`, `de_DE` and POSIX forms such as `de_DE.UTF-8`.
pub fn name_to_lcid(name: &str) -> Option<u32> {
    let tag = name.split(['.', '@']).next().unwrap_or(name).replace('_', "-");
    LCID_TABLE
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(&tag))
        .map(|(id, _)| *id)
}

/// Text after the last `-`, if any.
pub fn region_subtag(locale_name: &str) -> Option<&str> {
    locale_name
        .rsplit_once('-')
        .map(|(_, region)| region)
        .filter(|region| !region.is_empty())
}

/// `LANGIDFROMLCID`
pub const fn lang_id(lcid: u32) -> u16 {
    (lcid & 0xFFFF) as u16
}

/// Substitute for all default-locale queries.
pub struct LocaleOverride {
    lcid: u32,
    platform: Arc<dyn Platform>,
    has_converter: bool,
}

impl LocaleOverride {
    pub fn new(lcid: u32, platform: Arc<dyn Platform>) -> Self {
        let has_converter = platform.resolve(Symbol::LcidToLocaleName);
        Self {
            lcid,
            platform,
            has_converter,
        }
    }

    pub fn lcid(&self) -> u32 {
        self.lcid
    }

    pub fn locale_name(&self) -> String {
        if self.has_converter {
            if let Some(name) = self
                .platform
                .lcid_to_locale_name(self.lcid)
                .filter(|name| !name.is_empty())
            {
                return name;
            }
        }
        FALLBACK_LOCALE_NAME.to_string()
    }

    pub fn geo_name(&self) -> Option<String> {
        region_subtag(&self.locale_name()).map(str::to_string)
    }
}

impl LocaleApi for LocaleOverride {
    fn user_default_ui_language(&self) -> u16 {
        lang_id(self.lcid)
    }

    fn user_default_locale_name(&self) -> Option<String> {
        Some(self.locale_name())
    }

    fn user_default_lcid(&self) -> u32 {
        self.lcid
    }

    fn user_default_lang_id(&self) -> u16 {
        lang_id(self.lcid)
    }

    fn user_default_geo_name(&self) -> Option<String> {
        self.geo_name()
    }

    fn system_default_ui_language(&self) -> u16 {
        lang_id(self.lcid)
    }

    fn system_default_locale_name(&self) -> Option<String> {
        Some(self.locale_name())
    }

    fn system_default_lcid(&self) -> u32 {
        self.lcid
    }

    fn system_default_lang_id(&self) -> u16 {
        lang_id(self.lcid)
    }
}
