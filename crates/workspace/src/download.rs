use figseg_core::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    Pdf,
    Tex,
}

impl DownloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Tex => "tex",
        }
    }

    /// Attachment name, based on the uploaded file name when known.
    pub fn file_name(self, job: &Job) -> String {
        let base = job.display_name();
        match self {
            Self::Pdf => format!("{base}_final.pdf"),
            Self::Tex => format!("{base}_final_tex.tex"),
        }
    }
}

/// A finished artifact fetched for the open job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub kind: DownloadKind,
    pub file_name: String,
    pub bytes: Vec<u8>,
}
