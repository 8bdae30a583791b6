use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::Parser;
use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;
use indicatif::{ProgressBar, ProgressStyle};
use rnboot_core::protocol::SUPPORTED_BAUD_RATES;
use rnboot_core::{
    ByteStream, HexFile, SerialTransport, SessionConfig, TracingObserver, UpdateEvent, UpdateObserver,
    UpdateSession, UpdateState,
};
use tracing::{error, info, warn};

const RECOVER_HINT: &str = "Module may be stuck in bootloader. To try and complete the update \
process you can use this tool with the --recover option.\nYou may need to power cycle the module.";

#[derive(Parser, Debug)]
#[command(author, version, about = "RN2483 firmware updater", long_about = None)]
struct Args {
    /// Serial port the module is attached to (e.g. /dev/ttyUSB0)
    port: String,

    /// Intel HEX firmware image
    firmware: PathBuf,

    /// Serial baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Skip the firmware handshake for a module already in its bootloader
    #[arg(long)]
    recover: bool,

    /// Do not ask for confirmation before erasing
    #[arg(short, long)]
    yes: bool,

    /// Bootloader response timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// TOML session configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Draws a progress bar per phase and forwards everything else to tracing.
struct CliObserver {
    style: ProgressStyle,
    bar: Mutex<Option<ProgressBar>>,
}

impl CliObserver {
    fn new() -> Result<Self> {
        let style = ProgressStyle::with_template("{msg:>10} [{wide_bar}] {pos}/{len} ({percent:>3}%)")?
            .progress_chars("=> ");
        Ok(Self {
            style,
            bar: Mutex::new(None),
        })
    }

    fn update_bar(&self, label: &str, position: usize, total: usize) {
        let Ok(mut slot) = self.bar.lock() else {
            return;
        };
        let bar = slot.get_or_insert_with(|| {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(self.style.clone());
            bar.set_message(label.to_string());
            bar
        });
        bar.set_position(position as u64);
    }

    fn finish_bar(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                bar.finish();
            }
        }
    }
}

impl UpdateObserver for CliObserver {
    fn on_event(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::EraseChunk { index, total, .. } => {
                self.update_bar("Erasing", index + 1, *total);
            }
            UpdateEvent::Progress {
                phase,
                completed,
                total,
            } => {
                let label = match phase {
                    UpdateState::Verifying => "Verifying",
                    _ => "Writing",
                };
                self.update_bar(label, *completed, *total);
            }
            UpdateEvent::PhaseChanged { .. } | UpdateEvent::Failed { .. } => {
                self.finish_bar();
                TracingObserver.on_event(event);
            }
            _ => match self.bar.lock() {
                Ok(slot) => match slot.as_ref() {
                    Some(bar) => bar.suspend(|| TracingObserver.on_event(event)),
                    None => TracingObserver.on_event(event),
                },
                Err(_) => TracingObserver.on_event(event),
            },
        }
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {}", e);
    }

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if args.timeout_ms.is_some() {
        config.response_timeout_ms = args.timeout_ms;
    }
    if !SUPPORTED_BAUD_RATES.contains(&config.baud_rate) {
        bail!(
            "Unsupported baud rate {} (expected one of {:?})",
            config.baud_rate,
            SUPPORTED_BAUD_RATES
        );
    }
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    let hex = HexFile::load(&args.firmware)
        .with_context(|| format!("Failed to load {}", args.firmware.display()))?;
    let (first, last) = hex.address_range().unwrap_or((0, 0));
    info!(
        records = hex.num_records(),
        bytes = hex.total_bytes(),
        range = %format!("0x{:06X}..0x{:06X}", first, last),
        "Loaded firmware image"
    );

    let port = SerialTransport::open(&args.port, config.baud_rate)
        .with_context(|| format!("Failed to open {}", args.port))?;
    info!(port = %args.port, baud = config.baud_rate, "Serial port open");

    let observer = Arc::new(CliObserver::new()?);
    let mut session = UpdateSession::with_observer(port, config, observer);

    if !args.recover {
        let current = session
            .query_app_version()
            .context("Module did not answer the version query")?;
        println!("Current version: {}", current);
        println!("New firmware:    {}", args.firmware.display());

        if !args.yes {
            let proceed = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt("Are you sure that you would like to continue?")
                .default(false)
                .interact()
                .context("Failed to read input")?;
            if !proceed {
                println!("Update cancelled");
                return Ok(());
            }
        }

        session.erase_and_enter_bootloader()?;
    }

    session.wait_for_reset();

    if let Err(e) = session.run_update(&hex) {
        eprintln!("{}", RECOVER_HINT);
        return Err(e.into());
    }

    if let Some(reason) = session.reset_error() {
        warn!("Reset command failed ({}); power cycle the module", reason);
    }

    let version = confirm_new_version(&mut session)?;
    println!("New version: {}", version);
    println!("Update successful");
    Ok(())
}

/// Wait for the module to boot the new firmware and read its version.
fn confirm_new_version<T: ByteStream, O: UpdateObserver>(
    session: &mut UpdateSession<T, O>,
) -> Result<String> {
    session.wait_for_reset();
    session
        .query_app_version()
        .context("Could not get new firmware version")
}
