// =============================================================================
// state.rs — The assembled interception layer
// =============================================================================
//
// InceptionLayer is what the guest sees: every query family routed either to
// its substitute or to the real platform, decided once by the Registry.
// Symbol granularity is kept: a capability whose optional symbol could not be
// resolved still answers that symbol from the real platform.
//
// One process-wide instance lives in LAYER, installed by mirage_init().
// =============================================================================

use crate::error::LayerError;
use crate::interpose::{Capability, HookTable, Registry};
use crate::platform::{
    ClockApi, CommandLineApi, LocaleApi, Platform, PowerApi, RawHandle, Real, SleepApi, VolumeApi,
    VolumeInformation,
};
use crate::reals::Symbol;
use crate::syscalls::{
    CommandLineOverride, ExecutionStateBlocker, LocaleOverride, MaskedVolumes, ScaledClock,
    ScaledSleep,
};
use mirage_config::PolicyStore;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Arc;

static LAYER: OnceCell<InceptionLayer> = OnceCell::new();

pub struct InceptionLayer {
    pub(crate) real: Real,
    pub(crate) hooks: HookTable,
    pub(crate) active: BTreeSet<Capability>,
    pub(crate) command_line: Option<CommandLineOverride>,
    pub(crate) power: Option<ExecutionStateBlocker>,
    pub(crate) clock: Option<ScaledClock>,
    pub(crate) sleep: Option<ScaledSleep>,
    pub(crate) locale: Option<LocaleOverride>,
    pub(crate) volumes: Option<MaskedVolumes>,
}

/// Snapshot reported by `mirage_get_telemetry` and `mirage probe`.
#[derive(Debug, Clone, Serialize)]
pub struct LayerStatus {
    pub pid: u32,
    pub capabilities: Vec<Capability>,
    pub hooked: Vec<&'static str>,
    pub command_line_rewritten: bool,
    pub lcid: Option<u32>,
    pub cached_serials: usize,
}

impl InceptionLayer {
    /// Run every capability against `policy` and assemble the layer.
    pub fn init(platform: Arc<dyn Platform>, policy: Arc<dyn PolicyStore>) -> Self {
        let layer = Registry::new(platform, policy).activate_all().build();
        mirage_config::log_layer_info!("inception layer ready", hooked = layer.hooks.len());
        layer
    }

    /// Install `layer` as the process-wide instance. The first install wins;
    /// a later one is handed back.
    pub fn install_global(layer: InceptionLayer) -> Result<&'static InceptionLayer, InceptionLayer> {
        LAYER.try_insert(layer).map_err(|(_, rejected)| rejected)
    }

    pub fn get() -> Option<&'static InceptionLayer> {
        LAYER.get()
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn is_hooked(&self, symbol: Symbol) -> bool {
        self.hooks.is_hooked(symbol)
    }

    pub fn is_active(&self, capability: Capability) -> bool {
        self.active.contains(&capability)
    }

    pub fn command_line_override(&self) -> Option<&CommandLineOverride> {
        self.command_line.as_ref()
    }

    pub fn locale_override(&self) -> Option<&LocaleOverride> {
        self.locale.as_ref()
    }

    pub fn masked_volumes(&self) -> Option<&MaskedVolumes> {
        self.volumes.as_ref()
    }

    pub fn real(&self) -> &Real {
        &self.real
    }

    pub fn status(&self) -> LayerStatus {
        LayerStatus {
            pid: std::process::id(),
            capabilities: self.active.iter().copied().collect(),
            hooked: self.hooks.installed().map(Symbol::name).collect(),
            command_line_rewritten: self.command_line.is_some(),
            lcid: self.locale.as_ref().map(LocaleOverride::lcid),
            cached_serials: self.volumes.as_ref().map_or(0, |v| v.cache().len()),
        }
    }

    fn command_line_for(&self, symbol: Symbol) -> &dyn CommandLineApi {
        match &self.command_line {
            Some(cmd) if self.hooks.is_hooked(symbol) => cmd,
            _ => &self.real,
        }
    }

    fn power(&self) -> &dyn PowerApi {
        match &self.power {
            Some(blocker) if self.hooks.is_hooked(Symbol::SetThreadExecutionState) => blocker,
            _ => &self.real,
        }
    }

    fn clock_for(&self, symbol: Symbol) -> &dyn ClockApi {
        match &self.clock {
            Some(clock) if self.hooks.is_hooked(symbol) => clock,
            _ => &self.real,
        }
    }

    fn sleeper(&self) -> &dyn SleepApi {
        match &self.sleep {
            Some(sleep) if self.hooks.is_hooked(Symbol::SleepEx) => sleep,
            _ => &self.real,
        }
    }

    fn locale_for(&self, symbol: Symbol) -> &dyn LocaleApi {
        match &self.locale {
            Some(locale) if self.hooks.is_hooked(symbol) => locale,
            _ => &self.real,
        }
    }

    fn volumes(&self) -> &dyn VolumeApi {
        match &self.volumes {
            Some(volumes) if self.hooks.is_hooked(Symbol::GetVolumeInformationByHandleW) => volumes,
            _ => &self.real,
        }
    }
}

impl CommandLineApi for InceptionLayer {
    fn command_line_wide(&self) -> Cow<'_, [u16]> {
        self.command_line_for(Symbol::GetCommandLineW).command_line_wide()
    }

    fn command_line_narrow(&self) -> Cow<'_, [u8]> {
        self.command_line_for(Symbol::GetCommandLineA).command_line_narrow()
    }
}

impl PowerApi for InceptionLayer {
    fn set_thread_execution_state(&self, flags: u32) -> Result<u32, LayerError> {
        self.power().set_thread_execution_state(flags)
    }
}

impl ClockApi for InceptionLayer {
    fn tick_count(&self) -> u32 {
        self.clock_for(Symbol::GetTickCount).tick_count()
    }

    fn tick_count64(&self) -> u64 {
        self.clock_for(Symbol::GetTickCount64).tick_count64()
    }

    fn unbiased_interrupt_time(&self) -> Option<u64> {
        self.clock_for(Symbol::QueryUnbiasedInterruptTime)
            .unbiased_interrupt_time()
    }

    fn performance_counter(&self) -> Option<i64> {
        self.clock_for(Symbol::QueryPerformanceCounter)
            .performance_counter()
    }
}

impl SleepApi for InceptionLayer {
    fn sleep_ex(&self, millis: u32, alertable: bool) -> u32 {
        self.sleeper().sleep_ex(millis, alertable)
    }
}

impl LocaleApi for InceptionLayer {
    fn user_default_ui_language(&self) -> u16 {
        self.locale_for(Symbol::GetUserDefaultUILanguage)
            .user_default_ui_language()
    }

    fn user_default_locale_name(&self) -> Option<String> {
        self.locale_for(Symbol::GetUserDefaultLocaleName)
            .user_default_locale_name()
    }

    fn user_default_lcid(&self) -> u32 {
        self.locale_for(Symbol::GetUserDefaultLCID).user_default_lcid()
    }

    fn user_default_lang_id(&self) -> u16 {
        self.locale_for(Symbol::GetUserDefaultLangID)
            .user_default_lang_id()
    }

    fn user_default_geo_name(&self) -> Option<String> {
        self.locale_for(Symbol::GetUserDefaultGeoName)
            .user_default_geo_name()
    }

    fn system_default_ui_language(&self) -> u16 {
        self.locale_for(Symbol::GetSystemDefaultUILanguage)
            .system_default_ui_language()
    }

    fn system_default_locale_name(&self) -> Option<String> {
        self.locale_for(Symbol::GetSystemDefaultLocaleName)
            .system_default_locale_name()
    }

    fn system_default_lcid(&self) -> u32 {
        self.locale_for(Symbol::GetSystemDefaultLCID)
            .system_default_lcid()
    }

    fn system_default_lang_id(&self) -> u16 {
        self.locale_for(Symbol::GetSystemDefaultLangID)
            .system_default_lang_id()
    }
}

impl VolumeApi for InceptionLayer {
    fn volume_information(&self, handle: RawHandle) -> Result<VolumeInformation, LayerError> {
        self.volumes().volume_information(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;
    use mirage_config::keys;
    use mirage_config::testing::TestPolicy;

    #[test]
    fn test_disabled_layer_is_transparent() {
        let platform = Arc::new(
            FakePlatform::new()
                .with_ticks(1000)
                .with_lcid(0x0411)
                .with_volume(3, 0x1234_5678, r"\Device\HarddiskVolume3"),
        );
        let layer = InceptionLayer::init(platform.clone(), Arc::new(TestPolicy::new().build()));

        assert!(layer.hooks().is_empty());
        assert_eq!(layer.tick_count(), 1000);
        assert_eq!(layer.user_default_lcid(), 0x0411);
        assert_eq!(layer.volume_information(3).unwrap().serial_number, 0x1234_5678);
        assert_eq!(layer.set_thread_execution_state(1), Ok(0));
        assert_eq!(layer.command_line_wide(), platform.command_line_wide());
    }

    #[test]
    fn test_unresolved_optional_symbol_reads_real_value() {
        let platform = Arc::new(
            FakePlatform::new()
                .with_ticks(1000)
                .without(Symbol::GetTickCount64),
        );
        let policy = TestPolicy::new()
            .flag(keys::USE_CHANGE_SPEED)
            .number(keys::ADD_TICK_SPEED, 3)
            .build();
        let layer = InceptionLayer::init(platform, Arc::new(policy));

        assert_eq!(layer.tick_count(), 3000);
        assert_eq!(layer.tick_count64(), 1000);
    }

    #[test]
    fn test_status_reports_active_state() {
        let platform = Arc::new(FakePlatform::new().with_volume(3, 9, r"\Device\HarddiskVolume3"));
        let policy = TestPolicy::new()
            .number(keys::CUSTOM_LCID, 0x0407)
            .flag(keys::HIDE_DISK_SERIAL_NUMBER)
            .build();
        let layer = InceptionLayer::init(platform, Arc::new(policy));
        layer.volume_information(3).unwrap();

        let status = layer.status();
        assert_eq!(status.lcid, Some(0x0407));
        assert_eq!(status.cached_serials, 1);
        assert!(!status.command_line_rewritten);
        assert!(status.hooked.contains(&"GetUserDefaultLCID"));
        assert!(status.capabilities.contains(&Capability::HideDiskSerial));
    }
}
