use clap::{Parser, Subcommand};
use invoice_ledger::config::Config;
use invoice_ledger::documents::discover_documents;
use invoice_ledger::llm_extract::build_extractor;
use invoice_ledger::ocr::{CommandOcr, CommandRasterizer, FallbackOcr, OcrEngine, PdfTextLayer};
use invoice_ledger::pipeline::{BatchDriver, DriverOptions};
use invoice_ledger::store::{INVOICES, InvoiceStore, Record};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "invoice-ledger", version, about = "OCR invoices into a schema-evolving SQLite ledger")]
struct Cli {
    /// TOML config file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "invoice_ledger.toml")]
    config: PathBuf,

    /// Override `db_path` from the config.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every document in the input folder.
    Run {
        /// Override `input_dir` from the config.
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// List stored invoices.
    Invoices {
        /// Only vendors whose name contains this text.
        #[arg(long, conflicts_with = "from")]
        vendor: Option<String>,
        /// Start of an invoice-date range (YYYY-MM-DD).
        #[arg(long, requires = "to")]
        from: Option<String>,
        /// End of an invoice-date range (YYYY-MM-DD).
        #[arg(long, requires = "from")]
        to: Option<String>,
    },
    /// List stored line items.
    Items {
        #[arg(long)]
        invoice: Option<String>,
    },
    /// Row counts.
    Stats,
}

fn print_rows(rows: &[Record]) -> Result<(), Box<dyn std::error::Error>> {
    let json: Vec<_> = rows.iter().map(Record::to_json).collect();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn print_stats(db: &InvoiceStore) -> Result<(), Box<dyn std::error::Error>> {
    let (invoices, line_items) = db.get_counts()?;
    info!(invoices, line_items, "Database statistics");
    println!("{}", serde_json::json!({ "invoices": invoices, "line_items": line_items }));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing; stdout is reserved for query output
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::load_or_default(&cli.config)?;
    if let Some(db) = cli.db {
        cfg.db_path = db;
    }
    let db = InvoiceStore::new(&cfg.db_path)?;

    match cli.command {
        Command::Run { input } => {
            let input = input.unwrap_or_else(|| PathBuf::from(&cfg.input_dir));
            let docs = discover_documents(&input)?;

            let fallback = CommandOcr::from_command(&cfg.ocr.fallback_command).map(|ocr| {
                let ocr = match CommandRasterizer::from_command(&cfg.ocr.rasterize_command) {
                    Some(rasterizer) => ocr.with_rasterizer(Box::new(rasterizer)),
                    None => ocr,
                };
                Box::new(ocr) as Box<dyn OcrEngine>
            });
            let ocr = FallbackOcr::new(Box::new(PdfTextLayer), fallback, cfg.ocr.min_text_chars);
            let extractor = build_extractor(&cfg.llm).await?;

            let mut driver = BatchDriver::new(ocr, extractor, db, DriverOptions::from(&cfg.pipeline));
            let summary = driver.run(&docs).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            print_stats(driver.store())?;
        }
        Command::Invoices { vendor, from, to } => {
            let rows = match (vendor, from, to) {
                (Some(vendor), _, _) => db.invoices_by_vendor(&vendor)?,
                (None, Some(from), Some(to)) => db.invoices_between(&from, &to)?,
                _ => db.all_rows(INVOICES)?,
            };
            print_rows(&rows)?;
        }
        Command::Items { invoice } => {
            print_rows(&db.line_items(invoice.as_deref())?)?;
        }
        Command::Stats => print_stats(&db)?,
    }

    Ok(())
}
