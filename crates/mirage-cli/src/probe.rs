//! # mirage probe
//!
//! Builds a layer over the host platform with the loaded policy and reports,
//! per query, what the machine answers and what a guest would observe.

use anyhow::{Context, Result};
use clap::Args;
use console::{style, Emoji};
use mirage_config::Policy;
use mirage_inception_layer::platform::{
    ClockApi, CommandLineApi, LocaleApi, PowerApi, RawHandle, VolumeApi,
};
use mirage_inception_layer::syscalls::volume::format_serial;
use mirage_inception_layer::{Capability, HostPlatform, InceptionLayer, LayerStatus, Symbol};
use serde::Serialize;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

static CHECK: Emoji<'_, '_> = Emoji("✔ ", "[on] ");
static DOT: Emoji<'_, '_> = Emoji("● ", "[-] ");

#[derive(Args)]
pub struct ProbeArgs {
    /// File or directory whose volume serial is queried
    #[arg(long, default_value = ".")]
    volume: PathBuf,

    /// Emit a JSON report on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Reading {
    symbol: &'static str,
    hooked: bool,
    real: String,
    observed: String,
}

#[derive(Serialize)]
struct Report {
    status: LayerStatus,
    readings: Vec<Reading>,
}

fn show<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn reading(layer: &InceptionLayer, symbol: Symbol, real: String, observed: String) -> Reading {
    Reading {
        symbol: symbol.name(),
        hooked: layer.is_hooked(symbol),
        real,
        observed,
    }
}

#[cfg(unix)]
fn raw_handle(file: &File) -> Option<RawHandle> {
    use std::os::unix::io::AsRawFd;
    RawHandle::try_from(file.as_raw_fd()).ok()
}

#[cfg(not(unix))]
fn raw_handle(_file: &File) -> Option<RawHandle> {
    None
}

fn collect(layer: &InceptionLayer, volume: Option<RawHandle>) -> Vec<Reading> {
    let real = layer.real();
    let mut readings = vec![
        reading(
            layer,
            Symbol::GetTickCount64,
            real.tick_count64().to_string(),
            layer.tick_count64().to_string(),
        ),
        reading(
            layer,
            Symbol::QueryPerformanceCounter,
            show(real.performance_counter()),
            show(layer.performance_counter()),
        ),
        reading(
            layer,
            Symbol::GetUserDefaultLCID,
            format!("0x{:04X}", real.user_default_lcid()),
            format!("0x{:04X}", layer.user_default_lcid()),
        ),
        reading(
            layer,
            Symbol::GetUserDefaultLocaleName,
            show(real.user_default_locale_name()),
            show(layer.user_default_locale_name()),
        ),
        reading(
            layer,
            Symbol::GetUserDefaultGeoName,
            show(real.user_default_geo_name()),
            show(layer.user_default_geo_name()),
        ),
        reading(
            layer,
            Symbol::GetCommandLineW,
            String::from_utf16_lossy(&real.command_line_wide()),
            String::from_utf16_lossy(&layer.command_line_wide()),
        ),
        reading(
            layer,
            Symbol::SetThreadExecutionState,
            describe(real.set_thread_execution_state(0)),
            describe(layer.set_thread_execution_state(0)),
        ),
    ];

    if let Some(handle) = volume {
        let serial = |api: &dyn VolumeApi| {
            api.volume_information(handle)
                .map(|info| format_serial(info.serial_number))
                .unwrap_or_else(|e| e.to_string())
        };
        readings.push(reading(
            layer,
            Symbol::GetVolumeInformationByHandleW,
            serial(real as &dyn VolumeApi),
            serial(layer as &dyn VolumeApi),
        ));
    }
    readings
}

fn describe<E: std::fmt::Display>(result: Result<u32, E>) -> String {
    match result {
        Ok(previous) => format!("ok (0x{previous:08X})"),
        Err(e) => e.to_string(),
    }
}

pub fn cmd_probe(policy: Policy, args: &ProbeArgs) -> Result<()> {
    let layer = InceptionLayer::init(Arc::new(HostPlatform::new()), Arc::new(policy));
    let file = File::open(&args.volume)
        .with_context(|| format!("failed to open {}", args.volume.display()))?;
    let readings = collect(&layer, raw_handle(&file));

    if args.json {
        let report = Report {
            status: layer.status(),
            readings,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("{}", style("Mirage Probe").bold().cyan());
    println!("{}", style("─".repeat(40)).dim());

    println!();
    println!("{}", style("Capabilities").bold());
    for &capability in Capability::ALL {
        let name = format!("{capability:?} ({})", capability.policy_key());
        if layer.is_active(capability) {
            println!("  {} {}", CHECK, style(name).green());
        } else {
            println!("  {} {}", DOT, style(name).dim());
        }
    }

    println!();
    println!("{}", style("Readings").bold());
    for r in &readings {
        let marker = if r.hooked {
            style("hooked").green().to_string()
        } else {
            style("real").dim().to_string()
        };
        println!("  {} [{}]", style(format!("{:<30}", r.symbol)).cyan(), marker);
        println!("      real:     {}", r.real);
        println!("      observed: {}", r.observed);
    }
    println!();
    Ok(())
}
