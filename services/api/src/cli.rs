use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use hiring_pipeline::error::AppError;
use hiring_pipeline::workflows::screening::{export_csv, read_events};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Hiring Pipeline",
    about = "Run and demonstrate the candidate screening and job approval pipeline",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run a scripted screening, moderation, and approval session in memory
    Demo(DemoArgs),
    /// Work with a persisted audit trail
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AuditCommand {
    /// Convert a JSON-lines audit log to CSV
    Export(AuditExportArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug)]
pub(crate) struct AuditExportArgs {
    /// JSON-lines audit log written by the service
    #[arg(long)]
    pub(crate) path: PathBuf,
    /// Destination CSV file (defaults to stdout)
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Audit {
            command: AuditCommand::Export(args),
        } => run_audit_export(args),
    }
}

fn run_audit_export(args: AuditExportArgs) -> Result<(), AppError> {
    let events = read_events(&args.path)?;
    match args.output {
        Some(output) => {
            let mut writer = BufWriter::new(File::create(&output)?);
            export_csv(&events, &mut writer)?;
            writer.flush()?;
            eprintln!("exported {} audit events to {}", events.len(), output.display());
        }
        None => {
            let stdout = io::stdout();
            export_csv(&events, stdout.lock())?;
        }
    }
    Ok(())
}
