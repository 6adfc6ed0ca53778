use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linecount::Config;
use linecount::core::db::{JobDb, JobRecord};
use linecount::core::{
    JobConfig, JobName, JobRequest, LocalDirStorage, ModelChoice, Orchestrator, ProgressManager,
    RemoteStorage, VideoRef,
};
use linecount::counting::Orientation;
use linecount::pipeline::TrackReplayBackend;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "linecount")]
#[command(about = "Count tracked objects crossing a virtual line in a video")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a video and wait for the result
    Run {
        /// Track file of the video, or a path under the remote root with --remote
        #[arg(value_name = "VIDEO")]
        video: PathBuf,

        /// Line orientation code (N, S, E, W, NE, NW, SE, SW)
        #[arg(short, long)]
        orientation: Orientation,

        /// Line position as a fraction of the frame height or width
        #[arg(long, default_value_t = 0.5)]
        ratio: f64,

        /// Detector weights (n, m, l, p)
        #[arg(short, long, default_value = "l")]
        model: ModelChoice,

        /// Count only these classes (repeatable)
        #[arg(long = "class", value_name = "CLASS")]
        classes: Vec<String>,

        /// Skip writing annotated frames
        #[arg(long)]
        no_annotate: bool,

        /// Fetch VIDEO from remote storage
        #[arg(long)]
        remote: bool,

        /// Delete the remote source after a successful run
        #[arg(long, requires = "remote")]
        delete_source: bool,

        /// Job name (default: generated)
        #[arg(long)]
        name: Option<String>,
    },
    /// Print the status record of a job
    Status { name: String },
    /// Request cancellation of a running job
    Cancel { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linecount=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let db = Arc::new(JobDb::open(&config.database).await?);
    let manager = ProgressManager::new(db.clone());

    let outcome = match cli.command {
        Command::Status { name } => {
            print_record(&manager.status(&name).await?)?;
            Ok(())
        }
        Command::Cancel { name } => {
            if manager.cancel(&name).await? {
                println!("Cancellation requested for {}", name);
            } else {
                println!("Job {} is not running", name);
            }
            Ok(())
        }
        Command::Run {
            video,
            orientation,
            ratio,
            model,
            classes,
            no_annotate,
            remote,
            delete_source,
            name,
        } => {
            let video = if remote {
                VideoRef::Remote(video.to_string_lossy().into_owned())
            } else {
                VideoRef::Local(video)
            };
            let name = match name {
                Some(name) => JobName::new(name)?,
                None => JobName::generate(&video.file_name()),
            };
            let job_config = JobConfig {
                line_position_ratio: ratio,
                model,
                target_classes: (!classes.is_empty()).then_some(classes),
                annotate: !no_annotate,
                delete_remote_source: delete_source,
                ..JobConfig::new(orientation)
            };

            let storage = config
                .remote_root
                .as_ref()
                .map(|root| Arc::new(LocalDirStorage::new(root)) as Arc<dyn RemoteStorage>);
            let orchestrator = Orchestrator::new(
                manager,
                Arc::new(TrackReplayBackend),
                storage,
                config.orchestrator(),
            );
            run_job(&orchestrator, JobRequest { name, video, config: job_config }).await
        }
    };

    db.close().await;
    outcome
}

async fn run_job(
    orchestrator: &Orchestrator<JobDb, TrackReplayBackend>,
    request: JobRequest,
) -> anyhow::Result<()> {
    let name = request.name.to_string();
    let mut worker = orchestrator.submit(request).await?;
    tracing::info!(job = %name, "submitted");

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = &mut worker => break,
            _ = ticker.tick() => {
                let record = orchestrator.status(&name).await?;
                tracing::info!(
                    job = %name,
                    frame = record.frame_current,
                    of = record.frame_total_estimate,
                    remaining = %record.remaining_time_display,
                    "progress"
                );
            }
        }
    }

    let record = orchestrator.status(&name).await?;
    print_record(&record)?;
    match record.error {
        Some(error) => anyhow::bail!("Job {} did not complete: {}", name, error),
        None => Ok(()),
    }
}

fn print_record(record: &JobRecord) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}
