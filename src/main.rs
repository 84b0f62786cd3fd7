//! CodeOps CLI
//!
//! Runs one generate/execute/verify task and prints the result as JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use codeops::audit::{record_run, AuditSink, JsonlAuditSink, NullAuditSink};
use codeops::{assemble, attachments, Config, Controller, Mode, TaskRequest, Validate};

#[derive(Parser, Debug)]
#[command(name = "codeops", version, about = "Generate code, run it in a sandbox, retry on failure")]
struct Cli {
    /// What the generated program should do.
    #[arg(required = true)]
    task: Vec<String>,

    /// Provider strategy: local or cloud.
    #[arg(long, short, default_value = "cloud", env = "CODEOPS_MODE")]
    mode: Mode,

    /// TOML configuration file.
    #[arg(long, short, env = "CODEOPS_CONFIG")]
    config: Option<PathBuf>,

    /// Files to attach as context (text or PDF) or inline images. Unreadable files are skipped.
    #[arg(long = "file", short = 'f')]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("codeops failed: {}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> codeops::Result<bool> {
    let config = Config::load_or_default(cli.config.as_deref())?;
    let warnings = config.validate().into_result()?;
    for warning in warnings {
        tracing::warn!("{}", warning);
    }

    let (context, images) = assemble(attachments::collect(&cli.files));

    let task = cli.task.join(" ");
    let request = TaskRequest::new(task.clone())?
        .with_context(context)
        .with_images(images)?
        .with_mode(cli.mode);

    let controller = Controller::from_config(&config)?;
    let result = controller.run(request).await;

    let sink: Box<dyn AuditSink> = match &config.audit.path {
        Some(path) => Box::new(JsonlAuditSink::new(path.clone())),
        None => Box::new(NullAuditSink),
    };
    record_run(sink.as_ref(), &task, &result).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.is_success())
}
