use crate::utils::constants::DEFAULT_CHECK_INTERVAL_SECS;
use crate::utils::urls::BulletinVariant;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mosmix-processor")]
#[command(about = "Streaming processor for DWD MOSMIX point-forecast bulletins")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Suppress progress output")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a bulletin and ingest it as a new dataset generation
    Process {
        #[arg(short, long, help = "SQLite database file")]
        database: PathBuf,

        #[arg(
            short,
            long,
            help = "Bulletin URL or local .kmz/.kml path [default: latest run of the chosen variant]"
        )]
        source: Option<String>,

        #[arg(long, value_enum, default_value = "mosmix-s")]
        variant: BulletinVariant,

        #[arg(
            long,
            help = "Variable definition catalog URL or local path [default: DWD catalog feed]"
        )]
        catalog: Option<String>,

        #[arg(long, default_value = "false", help = "Skip the variable definition catalog")]
        skip_catalog: bool,

        #[arg(
            long,
            default_value = "false",
            help = "Truncate value strings that disagree with the timestep calendar instead of failing"
        )]
        lenient_values: bool,
    },

    /// Poll until the current run's bulletin is published
    Check {
        #[arg(long, value_enum, default_value = "mosmix-s")]
        variant: BulletinVariant,

        #[arg(
            long,
            default_value_t = DEFAULT_CHECK_INTERVAL_SECS,
            help = "Seconds between probes"
        )]
        interval_secs: u64,

        #[arg(long, default_value = "false", help = "Probe once and exit")]
        once: bool,
    },

    /// Display the active generation of a dataset
    Info {
        #[arg(short, long, help = "SQLite database file")]
        database: PathBuf,
    },
}
