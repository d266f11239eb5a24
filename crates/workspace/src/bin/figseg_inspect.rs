use std::env;
use std::time::Duration;

use snafu::{OptionExt, ResultExt, Snafu, ensure};

use figseg_core::{
    AnnotationEngine, CoreError, JobId, SegmentationProgress, SegmentationTask, WireBox,
};
use figseg_service::{ServiceConfig, ServiceError, create_service};
use figseg_workspace::SettingsStore;

const WATCH_INTERVAL: Duration = Duration::from_secs(2);
const WATCH_LIMIT: usize = 900;
const LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq)]
enum InspectMode {
    Job { job_id: JobId, watch: bool, export: bool },
    List,
}

#[derive(Debug, Clone, PartialEq)]
struct InspectArgs {
    mode: InspectMode,
    base_url: Option<String>,
}

#[derive(Debug, Snafu)]
enum InspectError {
    #[snafu(display("missing required --job or --list argument"))]
    MissingJob { stage: &'static str },
    #[snafu(display("--list cannot be combined with job options"))]
    ConflictingMode { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("invalid job id: {source}"))]
    InvalidJob {
        stage: &'static str,
        source: CoreError,
    },
    #[snafu(display("job service call failed: {source}"))]
    Service {
        stage: &'static str,
        source: ServiceError,
    },
    #[snafu(display("failed to encode segmentations: {source}"))]
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
}

type InspectResult<T> = Result<T, InspectError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        println!("inspect_ok=false");
        eprintln!("inspect_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> InspectResult<()> {
    let args = parse_args(env::args().skip(1))?;

    let settings = SettingsStore::load().settings();
    let mut config = settings.service_config();
    if let Some(base_url) = args.base_url.as_deref() {
        config = ServiceConfig::new(base_url, config.request_timeout);
    }
    println!("base_url={}", config.base_url);

    let service = create_service(config).context(ServiceSnafu {
        stage: "create-service",
    })?;

    let (job_id, watch, export) = match args.mode {
        InspectMode::List => {
            let jobs = service
                .list_jobs(0, LIST_LIMIT)
                .await
                .context(ServiceSnafu { stage: "list-jobs" })?;
            for job in &jobs {
                println!("job={} status={} name={}", job.id, job.status, job.display_name());
            }
            println!("jobs={}", jobs.len());
            println!("inspect_ok=true");
            return Ok(());
        }
        InspectMode::Job {
            job_id,
            watch,
            export,
        } => (job_id, watch, export),
    };
    println!("job_id={job_id}");

    let mut job = service.get_job(job_id).await.context(ServiceSnafu {
        stage: "get-job",
    })?;
    println!("status={}", job.status);
    println!("name={}", job.display_name());

    if watch {
        let mut polls = 0;
        while job.status.is_processing() && polls < WATCH_LIMIT {
            tokio::time::sleep(WATCH_INTERVAL).await;
            polls += 1;
            let refreshed = service.get_job(job_id).await.context(ServiceSnafu {
                stage: "watch-job",
            })?;
            if refreshed.status != job.status {
                println!("status={}", refreshed.status);
            }
            job = refreshed;
        }
    }
    if let Some(message) = job.error_message.as_deref() {
        println!("error_message={message}");
    }

    let capabilities = job.status.capabilities();
    println!("can_segment={}", capabilities.can_segment);
    println!("can_compile={}", capabilities.can_compile);
    println!("can_view_tex={}", capabilities.can_view_tex);
    println!("can_download_pdf={}", capabilities.can_download_pdf);
    println!("can_download_tex={}", capabilities.can_download_tex);

    let pages = service.get_pages(job_id).await.context(ServiceSnafu {
        stage: "get-pages",
    })?;
    println!("pages={}", pages.len());

    let mut tasks = service
        .get_segmentation_tasks(job_id)
        .await
        .context(ServiceSnafu {
            stage: "get-segmentation-tasks",
        })?;
    if tasks.is_empty() {
        tasks = job.segmentation_tasks.clone();
    }

    let boxes = service
        .get_segmentations(job_id)
        .await
        .context(ServiceSnafu {
            stage: "get-segmentations",
        })?;
    report_progress(&tasks, &boxes);

    if export {
        let encoded = serde_json::to_string_pretty(&boxes).context(EncodeSnafu {
            stage: "export-segmentations",
        })?;
        println!("{encoded}");
    }

    println!("inspect_ok=true");
    Ok(())
}

fn report_progress(tasks: &[SegmentationTask], boxes: &[WireBox]) {
    let (valid, invalid): (Vec<WireBox>, Vec<WireBox>) =
        boxes.iter().cloned().partition(|row| row.validate().is_ok());
    let mut engine = AnnotationEngine::new();
    engine.overwrite(valid);

    for task in tasks {
        let state = if engine.is_label_complete(&task.placeholder) {
            "done"
        } else {
            "open"
        };
        let count = engine.boxes_for_label(&task.placeholder).count();
        println!("task={} state={state} boxes={count}", task.placeholder);
    }

    let progress = SegmentationProgress::compute(tasks, engine.completed_labels());
    println!("boxes={}", engine.len());
    println!("invalid_boxes={}", invalid.len());
    println!("completed_tasks={}/{}", progress.completed, progress.total);
    println!("all_tasks_complete={}", progress.all_tasks_complete());
}

fn parse_args(args: impl IntoIterator<Item = String>) -> InspectResult<InspectArgs> {
    let mut job_id = None;
    let mut base_url = None;
    let mut watch = false;
    let mut export = false;
    let mut list = false;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--job" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-job-value",
                    arg: "--job",
                })?;
                let parsed = JobId::parse(&value).context(InvalidJobSnafu {
                    stage: "parse-args-job",
                })?;
                job_id = Some(parsed);
            }
            "--base-url" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-base-url-value",
                    arg: "--base-url",
                })?;
                base_url = Some(value);
            }
            "--watch" => watch = true,
            "--export" => export = true,
            "--list" => list = true,
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    let mode = if list {
        ensure!(
            job_id.is_none() && !watch && !export,
            ConflictingModeSnafu {
                stage: "parse-args-list",
            }
        );
        InspectMode::List
    } else {
        InspectMode::Job {
            job_id: job_id.context(MissingJobSnafu {
                stage: "parse-args-job-required",
            })?,
            watch,
            export,
        }
    };

    Ok(InspectArgs { mode, base_url })
}
