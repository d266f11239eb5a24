//! Interactive segmentation session on top of `figseg-core` and a
//! [`figseg_service::JobService`].

pub mod cache;
pub mod download;
pub mod enhancement;
pub mod error;
pub mod event;
pub mod notice;
pub mod preview;
pub mod session;
pub mod settings;

#[cfg(test)]
mod testing;

pub use cache::{CacheStats, LoadedPage, PageImageCache};
pub use download::{Download, DownloadKind};
pub use enhancement::{
    ChoiceRejection, EnhancementSelector, EnhancementSelectors, EnhancementState,
    EnhancementTicket, PendingChoice, Resolution,
};
pub use error::{WorkspaceError, WorkspaceResult};
pub use event::{LoadedJob, RequestContext, WorkspaceEvent};
pub use notice::{Notice, NoticeLevel};
pub use preview::{PreviewDebouncer, PreviewState};
pub use session::{LoadState, Workspace};
pub use settings::{SettingsError, SettingsStore, WorkspaceSettings};
