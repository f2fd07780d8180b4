use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use ist_class_report::analysis::{AnalyzeRequest, Analyzer, CannedClassifier, Persistence};
use ist_class_report::config::AppConfig;
use ist_class_report::import;
use ist_class_report::models::TimeRange;
use ist_class_report::report::{self, ReportOptions};
use ist_class_report::store::StoreProvider;

#[derive(Parser)]
#[command(name = "ist-report")]
#[command(about = "IST event recording and class reports for the AI tutor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the configured event store
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import events from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Analyze one student message and record it
    Analyze {
        #[arg(long)]
        thread: String,
        #[arg(long)]
        text: String,
        #[arg(long)]
        uid: Option<String>,
        #[arg(long)]
        message_id: Option<String>,
        #[arg(long)]
        course: Option<String>,
        /// Course material passed to the classifier
        #[arg(long)]
        context: Option<String>,
    },
    /// Generate a class report for one course
    Report {
        #[arg(long)]
        course: String,
        /// Only include events from the last N days
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        since_days: Option<i64>,
        #[arg(long, default_value_t = 10)]
        max_skills: usize,
        #[arg(long, default_value_t = 0.02, value_parser = parse_share)]
        gap_threshold: f64,
        #[arg(long, value_enum, default_value_t = ReportFormat::Markdown)]
        format: ReportFormat,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show chat history for a thread
    History {
        #[arg(long)]
        thread: String,
    },
}

fn parse_share(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("{raw} is not a number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{raw} must be between 0 and 1"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env().context("invalid IST configuration")?;
    let provider = StoreProvider::new(config.storage.clone());

    match cli.command {
        Commands::InitDb => {
            let store = provider.event_store().await?;
            let count = store.count_events().await?;
            println!("Event store ready: {} ({count} events).", provider.mode());
        }
        Commands::Seed => {
            let store = provider.event_store().await?;
            let written = import::seed(store.as_ref()).await?;
            println!("Seed data written ({written} events).");
        }
        Commands::Import { csv } => {
            let store = provider.event_store().await?;
            let imported = import::import_csv(store.as_ref(), &csv).await?;
            println!("Imported {imported} events from {}.", csv.display());
        }
        Commands::Analyze {
            thread,
            text,
            uid,
            message_id,
            course,
            context,
        } => {
            let store = provider.event_store().await?;
            let analyzer = Analyzer::new(Arc::new(CannedClassifier), store)
                .with_timeout(config.classifier_timeout)
                .with_model_version(config.model_version.clone());
            let request = AnalyzeRequest {
                thread_id: thread,
                message_text: text,
                message_id,
                course_id: course,
                course_context: context,
            };

            let outcome = analyzer.analyze(uid.as_deref(), request).await?;
            println!("{}", serde_json::to_string_pretty(&outcome.record)?);
            match outcome.persistence {
                Persistence::Stored => println!("Event stored."),
                Persistence::Skipped => println!("Fallback response; nothing stored."),
                Persistence::Failed(err) => println!("Analysis succeeded but was not stored: {err}"),
            }
        }
        Commands::Report {
            course,
            since_days,
            max_skills,
            gap_threshold,
            format,
            out,
        } => {
            let store = provider.event_store().await?;
            let range = since_days.map(TimeRange::last_days);
            let events = store
                .query_events(&course, range)
                .await
                .context("failed to load IST events")?;

            let options = ReportOptions {
                max_skills,
                gap_threshold,
            };
            let class_report = report::compute_report(&events, &course, options);

            if class_report.total_events == 0 {
                println!("No IST events recorded for course {course}.");
                return Ok(());
            }

            let rendered = match format {
                ReportFormat::Markdown => report::render_markdown(&class_report, options),
                ReportFormat::Json => serde_json::to_string_pretty(&class_report)?,
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Report written to {}.", path.display());
                }
                None => println!("{rendered}"),
            }
        }
        Commands::History { thread } => {
            let messages = provider.chat_history().get_history(&thread).await?;
            if messages.is_empty() {
                println!("No chat history for thread {thread}.");
            }
            for message in messages {
                println!("[{:?}] {}", message.role, message.content);
            }
        }
    }

    Ok(())
}
