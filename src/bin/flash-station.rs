use clap::{Args, Parser, Subcommand};
use flash_station::{
    cli::{
        check_job, config::Config, enter_bootloader, list_images, list_ports, print_slots, reset,
        CheckArgs, PortArgs, StorageArgs,
    },
    logging::initialize_logger,
    Chip,
};
use log::{debug, LevelFilter};
use miette::Result;

#[derive(Debug, Parser)]
#[command(about, max_term_width = 100, propagate_version = true, version)]
struct Cli {
    /// Show debug output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    subcommand: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the images available in storage
    List(StorageArgs),
    /// List the serial ports found on this host
    Ports,
    /// Reset the target, booting whatever is in its flash
    Reset(PortArgs),
    /// Reset the target into its serial bootloader and leave it there
    Bootloader(PortArgs),
    Check(CheckArgs),
    /// Show the default image layout of a chip
    Slots(SlotsArgs),
}

#[derive(Debug, Args)]
struct SlotsArgs {
    /// Chip to show the layout of
    #[arg(value_enum)]
    chip: Chip,
}

fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();
    initialize_logger(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    debug!("{:#?}", cli.subcommand);

    // Load any user configuration, if present.
    let config = Config::load()?;

    match cli.subcommand {
        Commands::List(args) => list_images(&args, &config),
        Commands::Ports => list_ports(),
        Commands::Reset(args) => reset(&args, &config),
        Commands::Bootloader(args) => enter_bootloader(&args, &config),
        Commands::Check(args) => check_job(&args, &config),
        Commands::Slots(args) => {
            print_slots(args.chip);
            Ok(())
        }
    }
}
