// ABOUTME: Command-line front end for the Audily media processing service
// ABOUTME: Submits a file to one tool, follows the job and saves or prints the result

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audily_client::jobs::Artifact;
use audily_client::remote::AnalysisResult;
use audily_client::tools::{self, DEFAULT_ANALYSIS_PROMPT};
use audily_client::{
    ClientConfig, FailureKind, Job, JobController, JobError, JobInput, JobState, RemoteClient,
    ResultPayload, Session, StaticSession, Tool,
};

#[derive(Parser)]
#[command(name = "audily")]
#[command(about = "Convert, separate, analyze and subtitle media files with the Audily service", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML file with client settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Base URL of the processing service
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Signed-in user id; required by the subtitle, convert and history commands
    #[arg(long, global = true)]
    user_id: Option<String>,
    /// Directory downloaded files are written to
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
    /// Seconds between status checks
    #[arg(long, global = true)]
    poll_interval: Option<u64>,
    /// Status checks before giving up (0 = no limit)
    #[arg(long, global = true)]
    max_polls: Option<u32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a song with AI and print the result
    Analyze {
        file: PathBuf,
        /// What the analysis should focus on
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Burn generated subtitles into a video
    Subtitle { file: PathBuf },
    /// Split a song into separate stems
    Separate { file: PathBuf },
    /// Extract the MP3 audio track of an MP4 video
    Convert { file: PathBuf },
    /// List past operations of the signed-in user
    History,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audily_client=info,audily=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    if let Some(user_id) = cli.user_id {
        config.user_id = Some(user_id);
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    if let Some(secs) = cli.poll_interval {
        config.poll_interval = Duration::from_secs(secs);
    }
    if let Some(max) = cli.max_polls {
        config.max_poll_attempts = max;
    }
    config.validate()?;

    let client = Arc::new(RemoteClient::new(
        config.api_base_url.clone(),
        config.request_timeout,
    )?);

    match cli.command {
        Commands::Analyze { file, prompt } => {
            let prompt = prompt.unwrap_or_else(|| DEFAULT_ANALYSIS_PROMPT.to_string());
            let input = read_input(&file).await?.with_param("prompt", prompt);
            run_tool(&tools::ANALYSIS, input, client, &config).await
        }
        Commands::Subtitle { file } => {
            run_tool(&tools::SUBTITLING, read_input(&file).await?, client, &config).await
        }
        Commands::Separate { file } => {
            run_tool(&tools::SEPARATION, read_input(&file).await?, client, &config).await
        }
        Commands::Convert { file } => {
            run_tool(&tools::CONVERSION, read_input(&file).await?, client, &config).await
        }
        Commands::History => show_history(&client, &config).await,
    }
}

async fn read_input(path: &Path) -> Result<JobInput> {
    JobInput::from_path(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

async fn run_tool(
    tool: &'static Tool,
    input: JobInput,
    client: Arc<RemoteClient>,
    config: &ClientConfig,
) -> Result<()> {
    let session = Session::from_user_id(config.user_id.clone());
    let controller = JobController::new(
        tool,
        client,
        Arc::new(StaticSession::new(session)),
        config.controller_settings(),
    );

    controller.submit(input)?;

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(120));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut rx = controller.subscribe();
    let settled = loop {
        let state = rx.borrow_and_update().clone();
        spinner.set_message(describe(&state));
        if !state.is_busy() {
            break state;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break controller.state();
                }
            }
            _ = &mut ctrl_c => {
                controller.reset();
                spinner.finish_and_clear();
                anyhow::bail!("{} cancelled", tool.label);
            }
        }
    };
    spinner.finish_and_clear();

    match settled {
        JobState::Completed { result, .. } => present(result, config).await,
        JobState::Failed { error, job } => {
            anyhow::bail!("{}", failure_message(tool, job.as_ref(), &error))
        }
        _ => Ok(()),
    }
}

/// Tells a job the server rejected apart from one that never got an answer.
fn failure_message(tool: &Tool, job: Option<&Job>, error: &JobError) -> String {
    let subject = match job {
        Some(job) => format!("{} job {}", tool.label, job.id),
        None => tool.label.to_string(),
    };
    match error.kind() {
        FailureKind::Backend => format!("{} failed on the server: {}", subject, error),
        FailureKind::Transport => format!("{} could not be completed: {}", subject, error),
        FailureKind::Timeout => format!("Gave up waiting for {}: {}", subject, error),
    }
}

fn describe(state: &JobState) -> String {
    match state {
        JobState::Idle => "Idle".to_string(),
        JobState::Uploading { input, .. } => format!("Uploading {}...", input),
        JobState::Polling {
            job,
            polls,
            detail,
        } => match detail {
            Some(detail) => format!("Job {}: {} (check {})", job.id, detail, polls),
            None => format!("Job {} in progress (check {})", job.id, polls),
        },
        JobState::Retrieving { job } => format!("Job {} complete, downloading result...", job.id),
        JobState::Completed { .. } => "Done".to_string(),
        JobState::Failed { error, .. } => format!("Failed: {}", error),
    }
}

async fn present(result: ResultPayload, config: &ClientConfig) -> Result<()> {
    match result {
        ResultPayload::Inline(value) => {
            match serde_json::from_value::<AnalysisResult>(value.clone()) {
                Ok(analysis) => println!("{}", analysis.analysis),
                Err(_) => println!("{}", serde_json::to_string_pretty(&value)?),
            }
            Ok(())
        }
        ResultPayload::Artifact(artifact) => {
            let path = save_artifact(&config.output_dir, &artifact).await?;
            println!("Saved {}", path.display());
            Ok(())
        }
    }
}

async fn save_artifact(dir: &Path, artifact: &Artifact) -> Result<PathBuf> {
    let path = artifact
        .save_to(dir)
        .await
        .with_context(|| format!("Failed to write {} into {}", artifact.filename, dir.display()))?;
    info!("Wrote {} bytes to {}", artifact.bytes.len(), path.display());
    Ok(path)
}

async fn show_history(client: &RemoteClient, config: &ClientConfig) -> Result<()> {
    let user_id = config
        .user_id
        .as_deref()
        .context("You must be logged in to view history (pass --user-id or set AUDILY_USER_ID)")?;

    let entries = client.fetch_history(user_id).await?;
    if entries.is_empty() {
        println!("No history yet.");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{:<20} {:<14} {:<10} {}",
            entry.created_at,
            entry.operation_type,
            entry.status_label(),
            entry.source_filename
        );
    }
    Ok(())
}
