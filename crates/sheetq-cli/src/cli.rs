use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sheetq_engine::{EngineConfig, LoadController, LoadError, LoadEvent, LoadStatus};
use sheetq_xlsx::XlsxWorkbook;

use crate::render;

#[derive(Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "sheetq", about = "Load a worksheet in batches and search its rows.")]
pub struct Args {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the worksheets of a workbook.
    Sheets {
        /// Workbook to read (.xlsx).
        file: PathBuf,
    },
    /// Load a worksheet and print the rows matching a query.
    Query(QueryArgs),
}

#[derive(clap::Args)]
struct QueryArgs {
    /// Workbook to read (.xlsx).
    file: PathBuf,

    /// Worksheet name (default: the first sheet).
    #[arg(long)]
    sheet: Option<String>,

    /// Search query: space or `+` for AND, `,`/`;` for OR, `!term` for NOT.
    #[arg(long, short, default_value = "")]
    query: String,

    /// Read picture columns as text instead of decoding pictures.
    #[arg(long)]
    no_images: bool,

    /// Print at most this many rows.
    #[arg(long)]
    limit: Option<usize>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Engine settings as JSON; flags below override it.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Rows per batch.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Decoded pictures kept in the image cache.
    #[arg(long)]
    cache_capacity: Option<usize>,
}

pub fn run() -> Result<()> {
    run_with_args(Args::parse())
}

pub fn run_with_args(args: Args) -> Result<()> {
    init_logging(args.verbose);
    match args.command {
        Command::Sheets { file } => list_sheets(file),
        Command::Query(query) => run_query(query),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // A second init (e.g. in-process tests) is harmless.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .try_init();
}

fn open(file: &Path) -> Result<XlsxWorkbook> {
    XlsxWorkbook::open(file).with_context(|| format!("open workbook {}", file.display()))
}

fn list_sheets(file: PathBuf) -> Result<()> {
    let book = open(&file)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for name in book.sheet_names() {
        if let Err(err) = writeln!(out, "{name}") {
            return tolerate_broken_pipe(err);
        }
    }
    Ok(())
}

fn engine_config(args: &QueryArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("read config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if args.no_images {
        config.show_images = false;
    }
    if let Some(batch_size) = args.batch_size {
        config.base_batch_size = batch_size;
    }
    if let Some(capacity) = args.cache_capacity {
        config.image_cache_capacity = capacity;
    }
    config.validate()?;
    Ok(config)
}

fn run_query(args: QueryArgs) -> Result<()> {
    let config = engine_config(&args)?;
    let book = open(&args.file)?;
    let sheet = match &args.sheet {
        Some(sheet) => sheet.clone(),
        None => book
            .sheet_names()
            .into_iter()
            .next()
            .with_context(|| format!("{} has no worksheets", args.file.display()))?,
    };

    let (tx, rx) = mpsc::channel::<LoadEvent>();
    let printer = std::thread::Builder::new()
        .name("sheetq-status".to_string())
        .spawn(move || {
            for event in rx {
                eprintln!("{event}");
            }
        })
        .context("start status thread")?;

    let mut controller = LoadController::new(config);
    controller.set_event_sender(tx);
    controller.open_workbook(Arc::new(book));
    let handle = controller.start_sheet(&sheet, &args.query)?;
    let outcome = handle.join();
    // Dropping the controller closes the event channel.
    drop(controller);
    if printer.join().is_err() {
        log::warn!("status thread panicked");
    }

    match &outcome.result.status {
        LoadStatus::Completed => {}
        LoadStatus::Failed(LoadError::OutOfMemory { rows_committed }) => {
            log::warn!("printing the {rows_committed} rows loaded before memory ran out");
        }
        LoadStatus::Canceled => anyhow::bail!("load of {sheet:?} was canceled"),
        LoadStatus::Failed(err) => {
            return Err(err.clone()).with_context(|| format!("load {sheet:?}"));
        }
    }

    let view = outcome.session.view();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let written = match args.format {
        OutputFormat::Text => render::write_text(&mut out, view, args.limit),
        OutputFormat::Json => render::write_json(&mut out, &sheet, &args.query, view, args.limit),
    };
    match written.and_then(|()| out.flush()) {
        Ok(()) => Ok(()),
        Err(err) => tolerate_broken_pipe(err),
    }
}

/// A closed stdout (e.g. `sheetq query ... | head`) is not an error.
fn tolerate_broken_pipe(err: io::Error) -> Result<()> {
    if err.kind() == io::ErrorKind::BrokenPipe {
        return Ok(());
    }
    Err(err.into())
}
