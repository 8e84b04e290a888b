//! Real Symbol Catalogue
//!
//! Every OS entry point the layer knows how to substitute, with the module it
//! is exported from. The external hook engine resolves these by name; entry
//! points marked optional may be missing on older systems.

use serde::Serialize;
use std::fmt;

/// System module exporting an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Module {
    /// `kernelbase.dll`, preferred when present
    KernelBase,
    /// `kernel32.dll`, fallback on systems without kernelbase
    Kernel32,
}

impl Module {
    pub const fn file_name(self) -> &'static str {
        match self {
            Module::KernelBase => "kernelbase.dll",
            Module::Kernel32 => "kernel32.dll",
        }
    }
}

macro_rules! symbols {
    ($($variant:ident => $name:literal, optional = $optional:literal;)*) => {
        /// An interceptable OS entry point.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        pub enum Symbol {
            $($variant,)*
        }

        impl Symbol {
            pub const ALL: &'static [Symbol] = &[$(Symbol::$variant,)*];

            /// Exported name, as passed to the resolver.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Symbol::$variant => $name,)*
                }
            }

            /// Newer APIs that older systems lack; skipped when unresolved.
            pub const fn is_optional(self) -> bool {
                match self {
                    $(Symbol::$variant => $optional,)*
                }
            }
        }
    };
}

symbols! {
    GetCommandLineW => "GetCommandLineW", optional = false;
    GetCommandLineA => "GetCommandLineA", optional = false;
    SetThreadExecutionState => "SetThreadExecutionState", optional = false;
    GetTickCount => "GetTickCount", optional = false;
    GetTickCount64 => "GetTickCount64", optional = true;
    QueryUnbiasedInterruptTime => "QueryUnbiasedInterruptTime", optional = true;
    QueryPerformanceCounter => "QueryPerformanceCounter", optional = false;
    SleepEx => "SleepEx", optional = false;
    GetUserDefaultUILanguage => "GetUserDefaultUILanguage", optional = false;
    GetUserDefaultLocaleName => "GetUserDefaultLocaleName", optional = true;
    GetUserDefaultLCID => "GetUserDefaultLCID", optional = false;
    GetUserDefaultLangID => "GetUserDefaultLangID", optional = false;
    GetUserDefaultGeoName => "GetUserDefaultGeoName", optional = true;
    GetSystemDefaultUILanguage => "GetSystemDefaultUILanguage", optional = false;
    GetSystemDefaultLocaleName => "GetSystemDefaultLocaleName", optional = true;
    GetSystemDefaultLCID => "GetSystemDefaultLCID", optional = false;
    GetSystemDefaultLangID => "GetSystemDefaultLangID", optional = false;
    GetVolumeInformationByHandleW => "GetVolumeInformationByHandleW", optional = true;
    LcidToLocaleName => "LCIDToLocaleName", optional = true;
}

impl Symbol {
    /// Modules searched for this entry point, in order.
    pub const fn search_order(self) -> [Module; 2] {
        [Module::KernelBase, Module::Kernel32]
    }

    /// Case-sensitive lookup by exported name.
    pub fn from_name(name: &str) -> Option<Symbol> {
        Symbol::ALL.iter().copied().find(|s| s.name() == name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
