use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use upshot::config::{Config, ConfigLoader};
use upshot::pipeline::{InterviewPipeline, PipelineOptions, RunRequest, standard_events};
use upshot::provider::{create_analysis_provider, create_transcription_provider};
use upshot::queue::TaskQueue;
use upshot::realtime::{RealtimeBatch, RealtimeExtractor};
use upshot::storage::{Database, SharedDatabase};
use upshot::types::{RecordScope, ResearchQuestion, TranscriptBundle};

#[derive(Parser)]
#[command(name = "upshot")]
#[command(
    version,
    about = "Asynchronous interview-processing pipeline: transcription, evidence, insights"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, help = "Load configuration from this file only")]
    config: Option<PathBuf>,

    #[arg(long)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full batch pipeline for a new interview
    Process {
        #[arg(long, help = "Account scope for the interview")]
        account: String,
        #[arg(long, help = "Project scope (enables planned answers)")]
        project: Option<String>,
        #[arg(long, help = "Interview title")]
        title: Option<String>,
        #[arg(long, help = "Media reference to transcribe")]
        media: Option<String>,
        #[arg(long, help = "Path to a transcript bundle JSON (skips transcription)")]
        transcript: Option<PathBuf>,
        #[arg(long, help = "Path to a research questions JSON array")]
        questions: Option<PathBuf>,
        #[arg(long, help = "User id recorded as run initiator")]
        initiator: Option<String>,
    },

    /// Extract evidence from one live-session batch
    Realtime {
        #[arg(help = "Path to a batch JSON ({utterances, language, batch_index})")]
        batch: PathBuf,
    },

    /// Show an interview's status and stage log
    Status {
        #[arg(help = "Interview id")]
        id: String,
    },

    /// Reset a ready/error interview for reprocessing
    Reset {
        #[arg(help = "Interview id")]
        id: String,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mUpshot encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }

        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    Ok(config)
}

fn open_store(config: &Config) -> anyhow::Result<SharedDatabase> {
    if let Some(parent) = std::path::Path::new(&config.store.path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(&config.store.path)?;
    db.initialize()?;
    Ok(Arc::new(db))
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Process {
            ref account,
            ref project,
            ref title,
            ref media,
            ref transcript,
            ref questions,
            ref initiator,
        } => {
            let config = load_config(&cli)?;
            let store = open_store(&config)?;

            let analysis = create_analysis_provider(&config.provider)?;
            let transcription = create_transcription_provider(&config.provider)?;
            if !runtime.block_on(analysis.health_check()).unwrap_or(false) {
                tracing::warn!(
                    provider = analysis.name(),
                    "Analysis provider health check failed, proceeding anyway"
                );
            }
            let queue = Arc::new(TaskQueue::new());
            let events = Arc::new(standard_events(store.clone(), queue.clone()));

            let pipeline = InterviewPipeline::new(
                store.clone(),
                analysis,
                Some(transcription),
                queue,
                events,
                PipelineOptions::from(&config),
            );

            let mut scope = RecordScope::account(account.clone());
            if let Some(project) = project {
                scope = scope.with_project(project.clone());
            }
            if let Some(initiator) = initiator {
                scope = scope.with_user(initiator.clone());
            }

            // The run initiator comes from the scope's user id
            let mut request = RunRequest::new(scope.clone());
            if let Some(path) = transcript {
                let bundle: TranscriptBundle =
                    serde_json::from_str(&std::fs::read_to_string(path)?)?;
                request = request.with_transcript(bundle);
            }
            if let Some(path) = questions {
                let parsed: Vec<ResearchQuestion> =
                    serde_json::from_str(&std::fs::read_to_string(path)?)?;
                request = request.with_questions(parsed);
            }

            let interview =
                store.create_interview(&scope, title.as_deref(), media.as_deref())?;
            println!("Created interview {}", interview.id);

            let summary = runtime.block_on(pipeline.run(&interview.id, request))?;
            println!(
                "Interview {} processed: {} evidence, {} people, {} insights{}",
                summary.interview_id,
                summary.evidence_ids.len(),
                summary.person_ids.len(),
                summary.insight_ids.len(),
                if summary.degraded {
                    " (insights degraded)"
                } else {
                    ""
                }
            );
        }

        Commands::Realtime { ref batch } => {
            let config = load_config(&cli)?;
            let analysis = create_analysis_provider(&config.provider)?;
            let extractor =
                RealtimeExtractor::new(analysis).with_timeout(config.batch_timeout());

            let parsed: RealtimeBatch = serde_json::from_str(&std::fs::read_to_string(batch)?)?;
            let result = runtime.block_on(extractor.extract_batch(&parsed))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Status { ref id } => {
            let config = load_config(&cli)?;
            let store = open_store(&config)?;
            let interview = store.interview(id)?;

            println!("Interview {}", interview.id);
            println!("  status: {}", interview.status);
            if let Some(title) = &interview.title {
                println!("  title: {}", title);
            }
            if interview.speaker_review_needed {
                println!("  speaker review needed");
            }
            for record in &interview.conversation_analysis.records {
                let outcome = match &record.outcome {
                    upshot::types::StageOutcome::Success => "ok".to_string(),
                    upshot::types::StageOutcome::Failure { error } => format!("failed: {}", error),
                };
                println!(
                    "  {} [{} attempt(s)] {}",
                    record.stage, record.attempts, outcome
                );
            }
        }

        Commands::Reset { ref id } => {
            let config = load_config(&cli)?;
            let store = open_store(&config)?;
            store.reset_for_reprocessing(id)?;
            println!("Interview {} reset to transcribing", id);
        }
    }

    Ok(())
}
