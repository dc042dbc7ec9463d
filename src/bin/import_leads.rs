use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use lead_import::import::preprocess::preview;
use lead_import::import::{
    Actor, CLI_EVENT_SOURCE, ColumnOverrides, ImportConfig, ImportError, ImportReport,
    ImportRequest, LeadImporter, LogEventRecorder, RowFailure, error_report_csv,
    parse_leads_csv_with,
};

#[derive(Parser, Debug)]
#[command(
    name = "import_leads",
    about = "Import a CSV file of leads through the normalization backend"
)]
struct Args {
    /// CSV file with a header row (Email, First Name, Last Name, ...).
    #[arg(long)]
    file: PathBuf,

    /// Label of the list the leads came from.
    #[arg(long)]
    source: String,

    /// Override NORMALIZER_URL.
    #[arg(long)]
    backend_url: Option<String>,

    /// Operator id recorded on the import event.
    #[arg(long, default_value = "cli")]
    actor: String,

    /// Operator email recorded on the import event.
    #[arg(long)]
    actor_email: Option<String>,

    /// Validate the file and print a preview without importing.
    #[arg(long)]
    dry_run: bool,

    /// Write rejected rows to this CSV file.
    #[arg(long)]
    error_report: Option<PathBuf>,

    /// Print the full report as JSON.
    #[arg(long)]
    json: bool,

    /// Header of the email column, when not detected automatically.
    #[arg(long)]
    email_col: Option<String>,

    /// Header of the first name column.
    #[arg(long)]
    first_name_col: Option<String>,

    /// Header of the last name column.
    #[arg(long)]
    last_name_col: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    let content = std::fs::read_to_string(&args.file)?;
    let overrides = ColumnOverrides {
        email: args.email_col.clone(),
        first_name: args.first_name_col.clone(),
        last_name: args.last_name_col.clone(),
        ..ColumnOverrides::default()
    };
    let leads = match parse_leads_csv_with(&content, &overrides) {
        Ok(leads) => leads,
        Err(err) => {
            writeln!(io::stderr(), "error: {}: {err}", args.file.display())?;
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut config = ImportConfig::from_env();
    if let Some(url) = args.backend_url.clone() {
        config.normalizer_url = url;
    }

    if args.dry_run {
        return match preview(&leads, config.max_batch_size) {
            Ok(preview) => {
                println!("{}", serde_json::to_string_pretty(&preview)?);
                Ok(if preview.invalid.is_empty() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                })
            }
            Err(err) => {
                writeln!(io::stderr(), "error: {}", err.user_message())?;
                Ok(ExitCode::FAILURE)
            }
        };
    }

    let importer = Arc::new(LeadImporter::from_config(
        &config,
        Arc::new(LogEventRecorder),
        CLI_EVENT_SOURCE,
    )?);

    let interrupt = importer.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, cancelling import");
            interrupt.shutdown();
        }
    });

    let actor = Actor::new(args.actor.clone(), args.actor_email.clone());
    let request = ImportRequest {
        source_name: args.source.clone(),
        leads,
    };

    match importer.import_leads(request, &actor).await {
        Ok(report) => {
            print_report(&report, args.json)?;
            write_error_report(args.error_report.as_ref(), &report.errors)?;
            Ok(if report.success_count > 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Err(ImportError::ValidationFailed { report }) => {
            print_report(&report, args.json)?;
            write_error_report(args.error_report.as_ref(), &report.errors)?;
            Ok(ExitCode::FAILURE)
        }
        Err(ImportError::Dispatch(err)) => {
            writeln!(io::stderr(), "error: {}", err.user_message())?;
            writeln!(io::stderr(), "detail: {err}")?;
            Ok(ExitCode::from(2))
        }
        Err(err) => {
            writeln!(io::stderr(), "error: {}", err.user_message())?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_report(report: &ImportReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}", report.summary_message);
    for duplicate in &report.duplicates {
        match &duplicate.existing_id {
            Some(id) => println!("  duplicate: {} (existing record {id})", duplicate.email),
            None => println!("  duplicate: {}", duplicate.email),
        }
    }
    for failure in &report.errors {
        println!("  row {}: {}", failure.row_index, failure.reason);
    }
    Ok(())
}

fn write_error_report(
    path: Option<&PathBuf>,
    failures: &[RowFailure],
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(());
    };
    if failures.is_empty() {
        return Ok(());
    }

    std::fs::write(path, error_report_csv(failures)?)?;
    println!("wrote {} rejected row(s) to {}", failures.len(), path.display());
    Ok(())
}
