use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use finresearch::app::{build_store, App};
use finresearch::cache::{cache_key, Cache};
use finresearch::config::{AppConfig, LoggingConfig};
use finresearch::{ResearchQuestion, ResearchReport};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "finresearch")]
#[command(about = "Financial research orchestration: decompose, research, synthesize, verify")]
#[command(version)]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full research pipeline for a question
    Research {
        /// Free-form research question
        question: String,

        /// Ticker hint (e.g. AAPL)
        #[arg(short, long)]
        ticker: Option<String>,

        /// Company name hint
        #[arg(short, long)]
        company: Option<String>,

        /// File with free-text web context for the synthesizer
        #[arg(long)]
        context_file: Option<PathBuf>,

        /// Whole-run deadline, overriding the configured one
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Skip the planned web searches
        #[arg(long)]
        no_web_search: bool,

        /// Print the full report as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },

    /// Only decompose a question into sub-tasks
    Decompose {
        question: String,

        #[arg(long)]
        json: bool,
    },

    /// Inspect a cached provider response
    CacheGet {
        /// Provider namespace (alpha_vantage, sec, news)
        namespace: String,

        /// Provider function / endpoint name
        function: String,

        /// Request parameters as KEY=VALUE
        params: Vec<String>,
    },
}

fn setup_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Cancel the token on Ctrl+C
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("⚠️  Received Ctrl+C, cancelling research run...");
            cancel.cancel();
        }
    });
}

fn parse_params(raw: &[String]) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .with_context(|| format!("invalid parameter '{}', expected KEY=VALUE", pair))
        })
        .collect()
}

fn print_report(report: &ResearchReport) {
    println!("{}", report.markdown_report);
    println!();
    println!("## Summary");
    println!();
    println!("{}", report.short_summary);
    println!();
    println!("## Follow-up Questions");
    println!();
    for question in &report.follow_up_questions {
        println!("- {}", question);
    }
    println!();
    println!(
        "Verification: {}{}",
        if report.verification.passed { "passed" } else { "not passed" },
        if report.verification.notes.is_empty() {
            String::new()
        } else {
            format!(" ({})", report.verification.notes)
        }
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config).context("failed to load configuration")?;
    setup_logging(&config.logging);

    match cli.command {
        Commands::Research {
            question,
            ticker,
            company,
            context_file,
            timeout_secs,
            no_web_search,
            json,
        } => {
            if no_web_search {
                config.research.web_search = false;
            }
            let mut research_question = ResearchQuestion::new(question);
            if let Some(ticker) = ticker {
                research_question = research_question.with_ticker(ticker);
            }
            if let Some(company) = company {
                research_question = research_question.with_company(company);
            }
            if let Some(path) = context_file {
                let context = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read context file {}", path.display()))?;
                research_question = research_question.with_context(context);
            }

            let deadline = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.research.deadline());
            let app = App::build(config).await?;

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let report = app
                .pipeline
                .run_with_deadline(&research_question, deadline, &cancel)
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }

        Commands::Decompose { question, json } => {
            let app = App::build(config).await?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let sub_tasks = app
                .pipeline
                .decompose(&ResearchQuestion::new(question), &cancel)
                .await;

            if json {
                println!("{}", serde_json::to_string_pretty(&sub_tasks)?);
            } else if sub_tasks.is_empty() {
                println!("No researchable sub-tasks found.");
            } else {
                for (i, task) in sub_tasks.iter().enumerate() {
                    println!(
                        "{}. {} [{}] {} ({}): {}",
                        i + 1,
                        task.company_name,
                        task.ticker().unwrap_or("?"),
                        task.metric,
                        task.time_period,
                        task.question
                    );
                }
            }
        }

        Commands::CacheGet {
            namespace,
            function,
            params,
        } => {
            let params = parse_params(&params)?;
            let store = build_store(&config.cache).await?;
            let cache = Cache::new(store, &namespace)?;

            match cache.get::<serde_json::Value>(&cache_key(&function, &params)).await {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => println!("No live cache entry for {} {} {:?}", namespace, function, params),
            }
        }
    }

    Ok(())
}
