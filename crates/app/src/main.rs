use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_memory_core::config::AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT;
use pdf_memory_core::stores::azure_search::DEFAULT_INDEX_NAME;
use pdf_memory_core::{
    load_config, setup_document_analysis_client, setup_memory_store,
    setup_memory_store_with_index, setup_search_index, DefaultAzureCredential, RagWorkflow,
    TokenCredential,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-memory", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Env-style file with the Azure endpoints and deployment names.
    #[arg(long, global = true, env = "PDF_MEMORY_CONFIG", default_value = ".env")]
    config: PathBuf,

    /// Keep the memory in this Azure AI Search index instead of in process.
    /// Needs AZURE_AI_SEARCH_ENDPOINT.
    #[arg(
        long,
        global = true,
        num_args = 0..=1,
        default_missing_value = DEFAULT_INDEX_NAME
    )]
    search_index: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// OCR the folder, import every Markdown file, then answer the questions.
    Run {
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: PathBuf,
        /// Question to ask once the folder is imported. Repeatable.
        #[arg(long = "question")]
        questions: Vec<String>,
    },
    /// OCR the folder and import the Markdown files without asking anything.
    Ingest {
        #[arg(long)]
        folder: PathBuf,
        /// Only write the Markdown sidecars.
        #[arg(long, default_value_t = false)]
        ocr_only: bool,
    },
    /// Ask a question against an already populated memory.
    Ask {
        question: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-memory boot"
    );

    let settings = load_config(&cli.config)?;
    settings.validate().context("configuration is incomplete")?;

    let credential: Arc<dyn TokenCredential> = Arc::new(DefaultAzureCredential::new());
    let analyzer = setup_document_analysis_client(
        settings.require(AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT)?,
        credential.clone(),
    )
    .context("failed to set up document analysis client")?;
    let memory = match cli.search_index.as_deref() {
        Some(index_name) => {
            let index = setup_search_index(&settings, index_name, credential.clone())
                .context("failed to set up search index")?;
            setup_memory_store_with_index(&settings, credential, Arc::new(index))
        }
        None => setup_memory_store(&settings, credential),
    }
    .context("failed to set up memory store")?;

    let workflow = RagWorkflow::new(analyzer, memory);

    match cli.command {
        Command::Run { folder, questions } => {
            let report = workflow.run(&folder).await?;
            report_ocr_failures(&report.ocr);
            info!(
                folder = %folder.display(),
                created = report.ocr.created.len(),
                imported = report.imported.len(),
                "workflow finished"
            );

            for question in questions {
                workflow.ask_question(&question).await?;
            }
        }
        Command::Ingest { folder, ocr_only } => {
            if ocr_only {
                let report = workflow.ocr_pdf_files(&folder).await;
                report_ocr_failures(&report);
                println!(
                    "{} sidecars created, {} skipped, {} failed",
                    report.created.len(),
                    report.skipped.len(),
                    report.failed.len()
                );
            } else {
                let report = workflow.run(&folder).await?;
                report_ocr_failures(&report.ocr);
                println!(
                    "{} sidecars created, {} documents imported at {}",
                    report.ocr.created.len(),
                    report.imported.len(),
                    Utc::now().to_rfc3339()
                );
            }
        }
        Command::Ask { question } => {
            workflow.ask_question(&question).await?;
        }
    }

    Ok(())
}

fn report_ocr_failures(report: &pdf_memory_core::OcrReport) {
    if !report.failed.is_empty() {
        warn!(
            failed = report.failed.len(),
            processed = report.processed(),
            "some pdf files could not be converted"
        );
    }
}
