//! Interception registry.
//!
//! One pass at start-up: each capability consults its policy flag, resolves
//! the real entry points it needs and records the symbols it takes over. A
//! capability that stays off leaves its symbols on the real implementation.
//! Optional symbols missing from the running system are skipped quietly.

use crate::platform::{Platform, Real};
use crate::reals::Symbol;
use crate::state::InceptionLayer;
use crate::syscalls::{
    CommandLineOverride, ExecutionStateBlocker, LocaleOverride, MaskedVolumes, ScaledClock,
    ScaledSleep,
};
use mirage_config::{keys, PolicyStore};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A policy-gated group of substitutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Capability {
    CommandLine,
    BlockExecutionState,
    ChangeSpeed,
    CustomLocale,
    HideDiskSerial,
}

impl Capability {
    pub const ALL: &'static [Capability] = &[
        Capability::CommandLine,
        Capability::BlockExecutionState,
        Capability::ChangeSpeed,
        Capability::CustomLocale,
        Capability::HideDiskSerial,
    ];

    /// Policy key gating this capability.
    pub const fn policy_key(self) -> &'static str {
        match self {
            Capability::CommandLine => keys::CUSTOM_CHROMIUM_FLAGS,
            Capability::BlockExecutionState => keys::BLOCK_INTERFERE_POWER,
            Capability::ChangeSpeed => keys::USE_CHANGE_SPEED,
            Capability::CustomLocale => keys::CUSTOM_LCID,
            Capability::HideDiskSerial => keys::HIDE_DISK_SERIAL_NUMBER,
        }
    }

    /// Symbols taken over when the capability is active.
    pub const fn symbols(self) -> &'static [Symbol] {
        match self {
            Capability::CommandLine => &[Symbol::GetCommandLineW, Symbol::GetCommandLineA],
            Capability::BlockExecutionState => &[Symbol::SetThreadExecutionState],
            Capability::ChangeSpeed => &[
                Symbol::GetTickCount,
                Symbol::GetTickCount64,
                Symbol::QueryUnbiasedInterruptTime,
                Symbol::QueryPerformanceCounter,
                Symbol::SleepEx,
            ],
            Capability::CustomLocale => &[
                Symbol::GetUserDefaultUILanguage,
                Symbol::GetUserDefaultLocaleName,
                Symbol::GetUserDefaultLCID,
                Symbol::GetUserDefaultLangID,
                Symbol::GetUserDefaultGeoName,
                Symbol::GetSystemDefaultUILanguage,
                Symbol::GetSystemDefaultLocaleName,
                Symbol::GetSystemDefaultLCID,
                Symbol::GetSystemDefaultLangID,
            ],
            Capability::HideDiskSerial => &[Symbol::GetVolumeInformationByHandleW],
        }
    }
}

/// Symbols whose calls are routed to a substitute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookTable {
    installed: BTreeSet<Symbol>,
}

impl HookTable {
    pub fn is_hooked(&self, symbol: Symbol) -> bool {
        self.installed.contains(&symbol)
    }

    pub fn installed(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.installed.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }

    fn insert(&mut self, symbol: Symbol) {
        self.installed.insert(symbol);
    }
}

/// Builds an [`InceptionLayer`] by activating capabilities against a policy.
pub struct Registry {
    platform: Arc<dyn Platform>,
    policy: Arc<dyn PolicyStore>,
    hooks: HookTable,
    active: BTreeSet<Capability>,
    command_line: Option<CommandLineOverride>,
    power: Option<ExecutionStateBlocker>,
    clock: Option<ScaledClock>,
    sleep: Option<ScaledSleep>,
    locale: Option<LocaleOverride>,
    volumes: Option<MaskedVolumes>,
}

impl Registry {
    pub fn new(platform: Arc<dyn Platform>, policy: Arc<dyn PolicyStore>) -> Self {
        Self {
            platform,
            policy,
            hooks: HookTable::default(),
            active: BTreeSet::new(),
            command_line: None,
            power: None,
            clock: None,
            sleep: None,
            locale: None,
            volumes: None,
        }
    }

    /// Activate `capability` if its policy enables it. Returns whether any
    /// of its symbols are now substituted. Activation is permanent.
    pub fn activate(&mut self, capability: Capability) -> bool {
        if self.active.contains(&capability) {
            return true;
        }

        let enabled = match capability {
            Capability::CommandLine => {
                self.command_line =
                    CommandLineOverride::build(self.platform.as_ref(), self.policy.as_ref());
                self.command_line.is_some()
            }
            Capability::BlockExecutionState => {
                let on = self.policy.query_bool(keys::BLOCK_INTERFERE_POWER, false);
                if on {
                    self.power = Some(ExecutionStateBlocker);
                }
                on
            }
            Capability::ChangeSpeed => {
                let on = self.policy.query_bool(keys::USE_CHANGE_SPEED, false);
                if on {
                    self.clock = Some(ScaledClock::new(self.platform.clone(), self.policy.clone()));
                    self.sleep = Some(ScaledSleep::new(self.platform.clone(), self.policy.clone()));
                }
                on
            }
            Capability::CustomLocale => {
                let lcid = self.policy.query_number(keys::CUSTOM_LCID, 0);
                if lcid != 0 {
                    self.locale = Some(LocaleOverride::new(lcid, self.platform.clone()));
                }
                lcid != 0
            }
            Capability::HideDiskSerial => {
                let on = self.policy.query_bool(keys::HIDE_DISK_SERIAL_NUMBER, false);
                if on {
                    self.volumes = Some(MaskedVolumes::new(self.platform.clone(), self.policy.clone()));
                }
                on
            }
        };

        if !enabled {
            return false;
        }

        let mut installed = 0;
        for &symbol in capability.symbols() {
            if self.install(symbol) {
                installed += 1;
            }
        }
        mirage_config::log_layer_info!(
            "capability activated",
            capability = tracing::field::debug(capability),
            symbols = installed,
        );
        self.active.insert(capability);
        installed > 0
    }

    /// Activate every capability in order.
    pub fn activate_all(mut self) -> Self {
        for &capability in Capability::ALL {
            self.activate(capability);
        }
        self
    }

    fn install(&mut self, symbol: Symbol) -> bool {
        if symbol.is_optional() && !self.platform.resolve(symbol) {
            mirage_config::log_layer_debug!("symbol unavailable, skipped", symbol = symbol.name());
            return false;
        }
        self.hooks.insert(symbol);
        true
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn is_active(&self, capability: Capability) -> bool {
        self.active.contains(&capability)
    }

    pub fn build(self) -> InceptionLayer {
        InceptionLayer {
            real: Real(self.platform),
            hooks: self.hooks,
            active: self.active,
            command_line: self.command_line,
            power: self.power,
            clock: self.clock,
            sleep: self.sleep,
            locale: self.locale,
            volumes: self.volumes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;
    use mirage_config::testing::TestPolicy;

    fn registry(platform: FakePlatform, policy: mirage_config::Policy) -> Registry {
        Registry::new(Arc::new(platform), Arc::new(policy))
    }

    #[test]
    fn test_nothing_enabled_installs_nothing() {
        let mut r = registry(FakePlatform::new(), TestPolicy::new().build());
        for &cap in Capability::ALL {
            assert!(!r.activate(cap));
        }
        assert!(r.hooks().is_empty());
    }

    #[test]
    fn test_speed_installs_clock_symbols() {
        let mut r = registry(
            FakePlatform::new(),
            TestPolicy::new().flag(keys::USE_CHANGE_SPEED).build(),
        );
        assert!(r.activate(Capability::ChangeSpeed));
        for &symbol in Capability::ChangeSpeed.symbols() {
            assert!(r.hooks().is_hooked(symbol), "{symbol} not hooked");
        }
        assert!(r.is_active(Capability::ChangeSpeed));
        assert!(!r.hooks().is_hooked(Symbol::SetThreadExecutionState));
    }

    #[test]
    fn test_missing_optional_symbols_are_skipped() {
        let platform = FakePlatform::new()
            .without(Symbol::GetTickCount64)
            .without(Symbol::QueryUnbiasedInterruptTime);
        let mut r = registry(platform, TestPolicy::new().flag(keys::USE_CHANGE_SPEED).build());
        assert!(r.activate(Capability::ChangeSpeed));
        assert!(r.hooks().is_hooked(Symbol::GetTickCount));
        assert!(r.hooks().is_hooked(Symbol::SleepEx));
        assert!(!r.hooks().is_hooked(Symbol::GetTickCount64));
        assert!(!r.hooks().is_hooked(Symbol::QueryUnbiasedInterruptTime));
    }

    #[test]
    fn test_volume_capability_without_api_installs_nothing() {
        let platform = FakePlatform::new().without(Symbol::GetVolumeInformationByHandleW);
        let mut r = registry(
            platform,
            TestPolicy::new().flag(keys::HIDE_DISK_SERIAL_NUMBER).build(),
        );
        assert!(!r.activate(Capability::HideDiskSerial));
        assert!(r.hooks().is_empty());
    }

    #[test]
    fn test_zero_lcid_disables_locale() {
        let mut r = registry(
            FakePlatform::new(),
            TestPolicy::new().number(keys::CUSTOM_LCID, 0).build(),
        );
        assert!(!r.activate(Capability::CustomLocale));
        assert!(!r.hooks().is_hooked(Symbol::GetUserDefaultLCID));
    }

    #[test]
    fn test_activation_is_idempotent() {
        let mut r = registry(
            FakePlatform::new(),
            TestPolicy::new().flag(keys::BLOCK_INTERFERE_POWER).build(),
        );
        assert!(r.activate(Capability::BlockExecutionState));
        assert!(r.activate(Capability::BlockExecutionState));
        assert_eq!(r.hooks().len(), 1);
    }
}
