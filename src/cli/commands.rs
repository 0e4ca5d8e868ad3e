use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pcsc::Scope;
use std::time::Duration;

use crate::core::{
    driver::PcscDriver,
    handler::{HandlerConfig, ReaderEventHandler, DEFAULT_BASE_URL},
    monitor::ReaderMonitor,
    opener::{BrowserOpener, LogOpener, UrlOpener},
    reader::{list_readers, READER_CLASS_MARKER},
    utils::format_hex_spaced,
};

/// Default wait between reader list checks, in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Parser)]
#[command(name = "pcsc-uid-launcher")]
#[command(about = "Opens a browser on a URL built from the UID of each card presented to a PCSC reader")]
#[command(version)]
pub struct Cli {
    /// Defaults to `watch` when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch readers and open a URL for every card presented
    Watch(WatchArgs),

    /// List available PCSC readers
    List {
        /// Show detailed information about readers
        #[arg(short = 'l', long)]
        detailed: bool,

        /// Print the reader list as JSON
        #[arg(long)]
        json: bool,

        /// Name substring marking the readers `watch` would use
        #[arg(long, default_value = READER_CLASS_MARKER)]
        reader_filter: String,
    },

    /// Read the UID of the card in one reader and open its URL
    Scan {
        /// Reader name or index (use 'list' to see available readers)
        reader: String,

        #[command(flatten)]
        target: TargetArgs,

        /// Print the scan result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// URL prefix the card UID is appended to
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Log the URL instead of opening a browser
    #[arg(long)]
    pub no_open: bool,
}

impl Default for TargetArgs {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            no_open: false,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Only readers whose name contains this text are watched
    #[arg(long, default_value = READER_CLASS_MARKER)]
    pub reader_filter: String,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Maximum wait for reader events before rescanning the reader list
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,
}

impl Default for WatchArgs {
    fn default() -> Self {
        Self {
            reader_filter: READER_CLASS_MARKER.to_string(),
            target: TargetArgs::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl WatchArgs {
    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            reader_filter: self.reader_filter.clone(),
            base_url: self.target.base_url.clone(),
        }
    }
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.quiet {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command.unwrap_or_else(|| Commands::Watch(WatchArgs::default())) {
        Commands::Watch(args) => cmd_watch(&args),
        Commands::List {
            detailed,
            json,
            reader_filter,
        } => cmd_list(detailed, json, &reader_filter),
        Commands::Scan {
            reader,
            target,
            json,
        } => cmd_scan(&reader, &target, json),
    }
}

fn make_opener(target: &TargetArgs) -> Box<dyn UrlOpener> {
    if target.no_open {
        Box::new(LogOpener)
    } else {
        Box::new(BrowserOpener)
    }
}

fn establish_context() -> Result<pcsc::Context> {
    pcsc::Context::establish(Scope::User).context("Failed to establish PCSC context")
}

fn cmd_watch(args: &WatchArgs) -> Result<()> {
    let context = establish_context()?;

    let mut handler = ReaderEventHandler::new(
        PcscDriver::new(context.clone()),
        make_opener(&args.target),
        args.handler_config(),
    );
    let mut monitor = ReaderMonitor::new(context);

    log::info!(
        "Watching readers matching '{}', opening {}<UID>",
        args.reader_filter,
        args.target.base_url
    );

    monitor
        .run(&mut handler, Duration::from_millis(args.poll_interval_ms))
        .context("Reader monitor stopped")
}

fn cmd_list(detailed: bool, json: bool, reader_filter: &str) -> Result<()> {
    let context = establish_context()?;
    let readers = list_readers(&context).context("Failed to list readers")?;

    if json {
        let out = serde_json::to_string_pretty(&readers).context("Failed to serialize readers")?;
        println!("{out}");
        return Ok(());
    }

    if readers.is_empty() {
        println!("No PCSC readers found.");
        return Ok(());
    }

    println!("Available PCSC readers:");
    for (i, reader_info) in readers.iter().enumerate() {
        let watched = if reader_info.matches(reader_filter) {
            " (watched)"
        } else {
            ""
        };

        if detailed {
            println!("  [{}] {}{}", i, reader_info.name, watched);
            println!(
                "      Status: {}",
                if reader_info.card_present {
                    "Card present"
                } else {
                    "No card"
                }
            );
            if let Some(ref atr) = reader_info.atr {
                println!("      ATR: {}", format_hex_spaced(atr));
            }
        } else if reader_info.card_present {
            println!("  [{}] {}{} [CARD]", i, reader_info.name, watched);
        } else {
            println!("  [{}] {}{}", i, reader_info.name, watched);
        }
    }

    Ok(())
}

fn cmd_scan(reader_name: &str, target: &TargetArgs, json: bool) -> Result<()> {
    let context = establish_context()?;
    let reader_name = resolve_reader_name(&context, reader_name)?;

    let config = HandlerConfig {
        reader_filter: String::new(),
        base_url: target.base_url.clone(),
    };
    let mut handler =
        ReaderEventHandler::new(PcscDriver::new(context), make_opener(target), config);

    let scan = handler
        .scan(&reader_name)
        .with_context(|| format!("Failed to read card UID on reader: {reader_name}"))?;

    if json {
        let out = serde_json::to_string_pretty(&scan).context("Failed to serialize scan")?;
        println!("{out}");
    } else {
        println!("Reader: {}", scan.reader);
        println!("UID: {}", scan.uid);
        println!("URL: {}", scan.url);
        if !scan.opened {
            println!("Browser could not be opened");
        }
    }

    Ok(())
}

fn resolve_reader_name(context: &pcsc::Context, name_or_index: &str) -> Result<String> {
    // Try to parse as index first
    if let Ok(index) = name_or_index.parse::<usize>() {
        let readers = list_readers(context)?;
        if readers.is_empty() {
            bail!("No PCSC readers found");
        }
        return match readers.get(index) {
            Some(info) => Ok(info.name.clone()),
            None => bail!(
                "Reader index {} out of range (0-{})",
                index,
                readers.len() - 1
            ),
        };
    }

    // Use as reader name directly
    Ok(name_or_index.to_string())
}
