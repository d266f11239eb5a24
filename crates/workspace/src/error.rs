use figseg_core::{BoxId, JobStatus};
use snafu::Snafu;

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Actions the workspace refused to start.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum WorkspaceError {
    #[snafu(display("no job is open on `{stage}`"))]
    NoJob { stage: &'static str },
    #[snafu(display("cannot {action} while the job is {status} on `{stage}`"))]
    NotAllowed {
        stage: &'static str,
        action: &'static str,
        status: JobStatus,
    },
    #[snafu(display("a submit of revision {revision} is still in flight on `{stage}`"))]
    SubmitInFlight { stage: &'static str, revision: u64 },
    #[snafu(display("a compile request is still in flight on `{stage}`"))]
    CompileInFlight { stage: &'static str },
    #[snafu(display("no region is marked for `{label}` on `{stage}`"))]
    NoRegion { stage: &'static str, label: String },
    #[snafu(display("box {box_id} does not exist on `{stage}`"))]
    UnknownBox { stage: &'static str, box_id: BoxId },
    #[snafu(display("no enhancement was requested for `{label}` on `{stage}`"))]
    UnknownLabel { stage: &'static str, label: String },
    #[snafu(display("no enhanced image is ready for `{label}` on `{stage}`"))]
    NoOffer { stage: &'static str, label: String },
}
