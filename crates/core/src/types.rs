use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};

use super::ids::JobId;
use super::status::JobStatus;

/// Placeholder prefix the generator uses for figure regions.
pub const DIAGRAM_PLACEHOLDER_PREFIX: &str = "DIAGRAM";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(alias = "job_id")]
    pub id: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub input_pdf_filename: Option<String>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default, rename = "initial_tex_s3_path")]
    pub initial_tex_ref: Option<String>,
    #[serde(default, rename = "final_tex_s3_path")]
    pub final_tex_ref: Option<String>,
    #[serde(default, rename = "final_pdf_s3_path")]
    pub final_pdf_ref: Option<String>,
    #[serde(default, deserialize_with = "deserialize_task_mapping")]
    pub segmentation_tasks: Vec<SegmentationTask>,
}

impl Job {
    pub fn new(id: JobId, status: JobStatus) -> Self {
        Self {
            id,
            status,
            error_message: None,
            input_pdf_filename: None,
            model_used: None,
            created_at: None,
            updated_at: None,
            completed_at: None,
            initial_tex_ref: None,
            final_tex_ref: None,
            final_pdf_ref: None,
            segmentation_tasks: Vec::new(),
        }
    }

    /// Display name derived from the uploaded file, falling back to the id.
    pub fn display_name(&self) -> String {
        self.input_pdf_filename
            .as_deref()
            .map(|name| name.trim_end_matches(".pdf").trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// One rendered page of the uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    #[serde(alias = "pageNumber")]
    pub page_number: i64,
    #[serde(alias = "imageUrl")]
    pub image_url: String,
}

impl PageImage {
    pub fn new(page_number: i64, image_url: impl Into<String>) -> Self {
        Self {
            page_number,
            image_url: image_url.into(),
        }
    }
}

/// A placeholder the annotator has to locate on the pages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentationTask {
    pub placeholder: String,
    pub description: String,
}

impl SegmentationTask {
    pub fn new(placeholder: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            placeholder: placeholder.into(),
            description: description.into(),
        }
    }

    pub fn is_diagram(&self) -> bool {
        self.placeholder.starts_with(DIAGRAM_PLACEHOLDER_PREFIX)
    }
}

/// Builds the ordered task list from a raw placeholder -> description mapping.
///
/// Non-diagram placeholders sort first, then everything by placeholder.
pub fn tasks_from_mapping<I, K, V>(mapping: I) -> Vec<SegmentationTask>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut tasks = mapping
        .into_iter()
        .map(|(placeholder, description)| SegmentationTask::new(placeholder, description))
        .collect::<Vec<_>>();
    tasks.sort_by(task_order);
    tasks
}

fn task_order(a: &SegmentationTask, b: &SegmentationTask) -> Ordering {
    a.is_diagram()
        .cmp(&b.is_diagram())
        .then_with(|| a.placeholder.cmp(&b.placeholder))
}

/// How many tasks own at least one box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentationProgress {
    pub completed: usize,
    pub total: usize,
}

impl SegmentationProgress {
    pub fn compute(tasks: &[SegmentationTask], completed_labels: &BTreeSet<String>) -> Self {
        let completed = tasks
            .iter()
            .filter(|task| completed_labels.contains(&task.placeholder))
            .count();
        Self {
            completed,
            total: tasks.len(),
        }
    }

    pub fn all_tasks_complete(&self) -> bool {
        self.completed == self.total
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskMappingRepr {
    List(Vec<SegmentationTask>),
    Map(BTreeMap<String, String>),
}

fn deserialize_task_mapping<'de, D>(deserializer: D) -> Result<Vec<SegmentationTask>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<TaskMappingRepr>::deserialize(deserializer)?;
    Ok(match value {
        None => Vec::new(),
        Some(TaskMappingRepr::List(tasks)) => tasks,
        Some(TaskMappingRepr::Map(mapping)) => tasks_from_mapping(mapping),
    })
}
