//! # mirage CLI
//!
//! Diagnostics for the Mirage inception layer: run the layer against the
//! local machine, preview command-line rewrites, check serial overrides and
//! scaffold a policy file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use mirage_config::{keys, Policy, PolicyStore};
use mirage_inception_layer::syscalls::cmdline::{
    argument0, contains_marker, ImageFamily, CHILD_PROCESS_MARKER,
};
use mirage_inception_layer::syscalls::volume::{format_serial, parse_serial_text, random_serial};
use mirage_inception_layer::syscalls::CommandLineOverride;

mod probe;

/// Mirage - policy-driven view of clocks, locale, command line and volume identity
#[derive(Parser)]
#[command(name = "mirage")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Policy file (replaces the ~/.mirage and .mirage search)
    #[arg(long, global = true, env = "MIRAGE_POLICY", value_name = "FILE")]
    policy: Option<PathBuf>,

    /// Box whose settings shadow [global]
    #[arg(long = "box", global = true, env = "MIRAGE_BOX", value_name = "NAME")]
    box_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialise the layer on this machine and compare real and observed values
    Probe(probe::ProbeArgs),

    /// Preview the Chromium command-line rewrite for a command line
    Cmdline {
        /// Full command line, program first
        #[arg(value_name = "COMMAND_LINE")]
        line: String,

        /// Flags to splice in (defaults to the policy's CustomChromiumFlags)
        #[arg(long, allow_hyphen_values = true)]
        flags: Option<String>,
    },

    /// Check a DiskSerialNumber override value
    Serial {
        /// Override in HHHH-HHHH form
        #[arg(value_name = "SERIAL", required_unless_present = "random")]
        text: Option<String>,

        /// Print a freshly generated serial instead
        #[arg(long)]
        random: bool,
    },

    /// Write a commented policy template
    Init {
        /// Destination file
        #[arg(short, long, default_value = ".mirage/policy.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,

        /// Print the template instead of writing it
        #[arg(long)]
        stdout: bool,
    },
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("MIRAGE_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Probe(args) => {
            let policy = load_policy(cli.policy.as_deref(), cli.box_name)?;
            probe::cmd_probe(policy, &args)
        }
        Commands::Cmdline { line, flags } => {
            let flags = match flags {
                Some(flags) => flags,
                None => load_policy(cli.policy.as_deref(), cli.box_name)?
                    .query_text(keys::CUSTOM_CHROMIUM_FLAGS, keys::CONF_LINE_LEN)
                    .unwrap_or_default(),
            };
            cmd_cmdline(&line, &flags);
            Ok(())
        }
        Commands::Serial { text, random } => {
            cmd_serial(text.as_deref(), random);
            Ok(())
        }
        Commands::Init {
            output,
            force,
            stdout,
        } => cmd_init(&output, force, stdout),
    }
}

fn load_policy(path: Option<&Path>, box_name: Option<String>) -> Result<Policy> {
    let mut policy = match path {
        Some(path) => Policy::from_file(path)
            .with_context(|| format!("failed to load policy from {}", path.display()))?,
        None => Policy::load().context("failed to load policy")?,
    };
    if let Some(name) = box_name.filter(|n| !n.is_empty()) {
        policy.active_box = Some(name);
    }
    mirage_config::log_cli_debug!("policy loaded", active_box = policy.active_box.as_deref());
    Ok(policy)
}

fn cmd_cmdline(line: &str, flags: &str) {
    if let Some(rewritten) = CommandLineOverride::for_command_line(line, flags) {
        println!("{}", rewritten.to_string_lossy());
        return;
    }

    let wide: Vec<u16> = line.encode_utf16().collect();
    let reason = if ImageFamily::detect(&argument0(&wide)) != ImageFamily::Chromium {
        "not a Chromium browser"
    } else if contains_marker(&wide, CHILD_PROCESS_MARKER) {
        "browser child process"
    } else {
        "no flags configured"
    };
    println!("{line}");
    eprintln!("{} {}", style("unchanged:").yellow(), style(reason).dim());
}

fn cmd_serial(text: Option<&str>, random: bool) {
    if random {
        println!("{}", format_serial(random_serial()));
        return;
    }
    let text = text.unwrap_or_default();
    match parse_serial_text(text) {
        Some(serial) => println!("{} (0x{serial:08X})", format_serial(serial)),
        None => {
            println!("{} {}", style("invalid:").red().bold(), text);
            eprintln!(
                "{} {}",
                style("volumes matching this entry get a random serial, e.g.").dim(),
                format_serial(random_serial())
            );
        }
    }
}

fn cmd_init(output: &Path, force: bool, stdout: bool) -> Result<()> {
    let template = Policy::default_toml();
    if stdout {
        print!("{template}");
        return Ok(());
    }
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(output, template)
        .with_context(|| format!("failed to write {}", output.display()))?;
    mirage_config::log_cli_info!("policy template written", path = tracing::field::display(output.display()));
    eprintln!(
        "{} {}",
        style("Wrote").green().bold(),
        style(output.display()).cyan()
    );
    Ok(())
}
