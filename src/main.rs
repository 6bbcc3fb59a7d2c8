use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use image_triage::catalog::export::write_export_csv;
use image_triage::catalog::import::read_import_csv;
use image_triage::{ingest, Error, Library, Result};

/// Command-line front end for the image-triage catalog.
///
/// The database location comes from `IMAGE_TRIAGE_DB_PATH`, defaulting to
/// `image_triage.sqlite` in the working directory.
#[derive(Parser)]
#[command(name = "image-triage", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest an image metadata CSV into the catalog
    Ingest {
        /// Dataset name (unique; re-ingesting updates the root directory)
        #[arg(long)]
        dataset: String,
        /// Root directory containing the image files
        #[arg(long)]
        root: String,
        /// Path to the metadata CSV
        #[arg(long)]
        csv: String,
    },
    /// List registered datasets, newest first
    Datasets,
    /// Export a dataset's decisions to CSV
    Export {
        #[arg(long)]
        dataset: String,
        /// Output CSV path
        #[arg(long)]
        out: String,
        /// Include images that have no decision yet
        #[arg(long)]
        include_unmarked: bool,
    },
    /// Import decisions from a CSV, newest timestamp winning
    Import {
        #[arg(long)]
        dataset: String,
        /// CSV with image_path or abs_path plus decision/note/updated_at
        #[arg(long)]
        csv: String,
        /// Overwrite stored decisions even when they are newer
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("[ERR] {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let library = Library::open_default()?;

    match cli.command {
        Command::Ingest { dataset, root, csv } => {
            let report = ingest::ingest(&library, &dataset, &root, &csv)?;
            println!(
                "[OK] Dataset '{dataset}' (id={}). Inserted {} of {} images.",
                report.dataset_id, report.inserted, report.total_rows
            );
        }
        Command::Datasets => {
            for ds in library.list_datasets()? {
                println!("{}\t{}\t{}\t{}", ds.id, ds.name, ds.root_dir, ds.created_at);
            }
        }
        Command::Export {
            dataset,
            out,
            include_unmarked,
        } => {
            let ds = library
                .find_dataset(&dataset)?
                .ok_or(Error::DatasetNotFound(dataset))?;
            let rows = library.export_rows(ds.id, include_unmarked)?;
            write_export_csv(&out, &rows)?;
            println!("[OK] Exported {} rows to {out}.", rows.len());
        }
        Command::Import {
            dataset,
            csv,
            force,
        } => {
            let ds = library
                .find_dataset(&dataset)?
                .ok_or(Error::DatasetNotFound(dataset))?;
            let rows = read_import_csv(&csv)?;
            let stats = library.import_decision_rows(ds.id, &rows, &ds.root_dir, !force)?;
            println!("[OK] Import finished: {stats}.");
        }
    }
    Ok(())
}
