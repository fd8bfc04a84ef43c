//! Types and functions for the command-line interface
//!
//! No stability guaranties apply

use std::{fs::read_to_string, path::PathBuf};

use clap::Args;
use comfy_table::{modifiers, presets::UTF8_FULL, Attribute, Cell, Color, Table};
use log::{info, warn};
use miette::{IntoDiagnostic, Result, WrapErr};
use serialport::{available_ports, SerialPortType};

use self::config::{Config, StrapMode};
use crate::{
    error::{Error, StorageError},
    image::{Chip, FlashImage, FlashJob, JobRequest},
    port::{LoaderPort, SerialLoaderPort},
    storage::{DirStore, ImageStore},
};

pub mod config;

/// Serial port and strap line options
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct PortArgs {
    /// Serial port connected to the target
    #[arg(short = 'p', long, env = "FLASH_STATION_PORT")]
    pub port: Option<String>,
    /// Baud rate the port is opened at
    #[arg(short = 'b', long)]
    pub baud: Option<u32>,
    /// How the target's reset and boot lines are driven
    #[arg(long, value_enum)]
    pub strap: Option<StrapMode>,
}

/// Image storage options
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct StorageArgs {
    /// Directory the images are stored in
    #[arg(short = 'r', long)]
    pub root: Option<PathBuf>,
}

/// Validate a flash job against image storage without flashing it
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct CheckArgs {
    /// TOML job description, with `target` and a list of `images`
    #[arg(
        short = 'j',
        long,
        conflicts_with_all = ["chip", "images"],
        required_unless_present = "chip"
    )]
    pub job: Option<PathBuf>,
    /// Chip the job is meant for
    #[arg(short = 'c', long, value_enum, requires = "images")]
    pub chip: Option<Chip>,
    /// Images as NAME@ADDRESS, e.g. `firmware.bin@0x10000`
    pub images: Vec<FlashImage>,

    #[command(flatten)]
    pub storage: StorageArgs,
}

/// Open the configured port with the configured strap lines
pub fn open_port(args: &PortArgs, config: &Config) -> Result<Box<dyn LoaderPort + Send>> {
    let port = args
        .port
        .as_deref()
        .or(config.serial.port.as_deref())
        .ok_or_else(|| miette::miette!("No serial port given"))
        .wrap_err("Pass `--port` or set `port` in the [serial] config section")?;
    let baud = args.baud.unwrap_or(config.serial.baud);
    let hold = config.strap.hold();

    match args.strap.unwrap_or(config.strap.mode) {
        StrapMode::Modem => {
            let port = SerialLoaderPort::open_with_modem_lines(port, baud, hold)?;
            Ok(Box::new(port))
        }
        #[cfg(all(feature = "gpio", target_os = "linux"))]
        StrapMode::Gpio => {
            use crate::port::{GpioLines, Strapping};

            let lines = GpioLines::open(&config.strap.chip, config.strap.reset, config.strap.boot)?;
            let port = SerialLoaderPort::open(port, baud, Strapping::new(lines, hold))?;
            Ok(Box::new(port))
        }
        #[cfg(not(all(feature = "gpio", target_os = "linux")))]
        StrapMode::Gpio => Err(miette::miette!(
            help = "Rebuild with the `gpio` feature on Linux",
            "GPIO strapping is not available in this build"
        )),
    }
}

pub fn open_store(args: &StorageArgs, config: &Config) -> DirStore {
    let root = args.root.as_ref().unwrap_or(&config.storage.root);
    DirStore::new(root.clone())
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| {
            Cell::new(name)
                .fg(Color::Green)
                .add_attribute(Attribute::Bold)
        })
        .collect()
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table
}

/// Print the images available in storage
pub fn list_images(args: &StorageArgs, config: &Config) -> Result<()> {
    let store = open_store(args, config);
    let images = store.list()?;

    if images.is_empty() {
        info!("No images found in {}", store.root().display());
        return Ok(());
    }

    let mut table = table();
    table.set_header(header(&["Name", "Size"]));
    for image in images {
        table.add_row(vec![
            Cell::new(&image.name).fg(Color::Cyan),
            Cell::new(format!("{} ({}KiB)", image.size, image.size.div_ceil(1024))),
        ]);
    }
    println!("{table}");

    Ok(())
}

/// Print the serial ports found on this host
pub fn list_ports() -> Result<()> {
    let ports = available_ports().into_diagnostic()?;

    if ports.is_empty() {
        warn!("No serial ports found");
        return Ok(());
    }

    let mut table = table();
    table.set_header(header(&["Port", "Type"]));
    for port in ports {
        let kind = match &port.port_type {
            SerialPortType::UsbPort(usb) => format!(
                "USB {:04x}:{:04x} {}",
                usb.vid,
                usb.pid,
                usb.product.as_deref().unwrap_or_default()
            ),
            SerialPortType::PciPort => "PCI".into(),
            SerialPortType::BluetoothPort => "Bluetooth".into(),
            SerialPortType::Unknown => "Unknown".into(),
        };
        table.add_row(vec![
            Cell::new(&port.port_name).fg(Color::Cyan),
            Cell::new(kind),
        ]);
    }
    println!("{table}");

    Ok(())
}

/// Print the default image layout of a chip
pub fn print_slots(chip: Chip) {
    let mut table = table();
    table.set_header(header(&["Slot", "Address"]));
    for slot in chip.image_slots() {
        table.add_row(vec![
            Cell::new(slot.label).fg(Color::Cyan),
            Cell::new(format!("{:#x}", slot.address)),
        ]);
    }
    println!("{table}");
}

/// Pulse the target's reset line
pub fn reset(args: &PortArgs, config: &Config) -> Result<()> {
    let mut port = open_port(args, config)?;
    port.reset_target();
    info!("Target reset");

    Ok(())
}

/// Strap the target into its serial bootloader and leave it there
pub fn enter_bootloader(args: &PortArgs, config: &Config) -> Result<()> {
    let mut port = open_port(args, config)?;
    port.enter_bootloader();
    info!("Target is waiting in its bootloader");

    Ok(())
}

/// Build the job described by `args`
pub fn load_job(args: &CheckArgs) -> Result<FlashJob> {
    let request = match (&args.job, args.chip) {
        (Some(path), _) => {
            let raw = read_to_string(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
            JobRequest::from_toml(&raw)?
        }
        (None, Some(chip)) => return Ok(FlashJob::new(chip.to_string(), args.images.clone())?),
        (None, None) => return Err(Error::EmptyJob.into()),
    };

    Ok(FlashJob::try_from(request)?)
}

/// Check that every image of a job is present, and that none overlap
pub fn check_job(args: &CheckArgs, config: &Config) -> Result<()> {
    let job = load_job(args)?;
    let store = open_store(&args.storage, config);

    if job.chip().is_none() {
        warn!("Unknown target chip tag `{}`", job.target());
    }

    let mut table = table();
    table.set_header(header(&["Image", "Address", "Size"]));

    let mut spans = Vec::with_capacity(job.images().len());
    let mut missing = None;
    for image in job.images() {
        let size = match store.open(&image.name) {
            Ok(stream) => {
                let end = u64::from(image.address) + stream.size();
                spans.push((image.address, end, &image.name));
                Cell::new(stream.size()).fg(Color::Green)
            }
            Err(StorageError::NotFound(_)) => {
                if missing.is_none() {
                    missing = Some(image.name.clone());
                }
                Cell::new("missing").fg(Color::Red)
            }
            Err(e) => return Err(e.into()),
        };

        table.add_row(vec![
            Cell::new(&image.name).fg(Color::Cyan),
            Cell::new(format!("{:#x}", image.address)),
            size,
        ]);
    }
    println!("{table}");

    spans.sort_by_key(|(start, ..)| *start);
    for pair in spans.windows(2) {
        let (_, end, first) = pair[0];
        let (start, _, second) = pair[1];
        if end > u64::from(start) {
            warn!("{first} overlaps {second} at {start:#x}");
        }
    }

    match missing {
        Some(name) => Err(Error::MissingImage(name).into()),
        None => {
            info!("Job for {} is ready to flash", job.target());
            Ok(())
        }
    }
}
