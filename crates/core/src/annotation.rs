//! In-memory collection of annotated regions for one job.

use std::collections::BTreeSet;

use super::drawing::BoxDraft;
use super::geometry::NormalizedRect;
use super::ids::{BoxId, ServerBoxId};
use super::wire::WireBox;

#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub id: BoxId,
    pub server_id: Option<ServerBoxId>,
    pub label: String,
    pub page_number: i64,
    pub rect: NormalizedRect,
    pub enhanced_asset_ref: Option<String>,
    pub use_enhanced: bool,
}

impl BoundingBox {
    pub fn to_wire(&self) -> WireBox {
        WireBox {
            id: self.server_id,
            page_number: self.page_number,
            x: self.rect.x,
            y: self.rect.y,
            width: self.rect.width,
            height: self.rect.height,
            label: self.label.clone(),
            enhanced_asset_ref: self.enhanced_asset_ref.clone(),
            use_enhanced: self.use_enhanced,
        }
    }

    fn apply(&mut self, patch: &BoxPatch) {
        if let Some(enhanced_asset_ref) = &patch.enhanced_asset_ref {
            self.enhanced_asset_ref = enhanced_asset_ref.clone();
        }
        if let Some(use_enhanced) = patch.use_enhanced {
            self.use_enhanced = use_enhanced;
        }
        if let Some(server_id) = patch.server_id {
            self.server_id = Some(server_id);
        }
    }
}

/// Partial update for a box. `None` leaves a field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoxPatch {
    pub enhanced_asset_ref: Option<Option<String>>,
    pub use_enhanced: Option<bool>,
    pub server_id: Option<ServerBoxId>,
}

impl BoxPatch {
    pub fn enhancement_choice(use_enhanced: bool, enhanced_asset_ref: Option<String>) -> Self {
        Self {
            enhanced_asset_ref: Some(enhanced_asset_ref),
            use_enhanced: Some(use_enhanced),
            server_id: None,
        }
    }

    pub fn with_server_id(mut self, server_id: ServerBoxId) -> Self {
        self.server_id = Some(server_id);
        self
    }
}

/// Serialized view of the collection at one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationSnapshot {
    pub revision: u64,
    pub boxes: Vec<WireBox>,
}

/// Ordered boxes across every page plus the labels that own at least one.
#[derive(Debug, Clone, Default)]
pub struct AnnotationEngine {
    boxes: Vec<BoundingBox>,
    completed: BTreeSet<String>,
    next_box_id: u64,
    revision: u64,
}

impl AnnotationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Bumped on every mutation, including no-op patches that matched a box.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn completed_labels(&self) -> &BTreeSet<String> {
        &self.completed
    }

    pub fn is_label_complete(&self, label: &str) -> bool {
        self.completed.contains(label)
    }

    pub fn get(&self, id: BoxId) -> Option<&BoundingBox> {
        self.boxes.iter().find(|bounding_box| bounding_box.id == id)
    }

    pub fn position(&self, id: BoxId) -> Option<usize> {
        self.boxes.iter().position(|bounding_box| bounding_box.id == id)
    }

    pub fn boxes_for_page(&self, page_number: i64) -> impl Iterator<Item = &BoundingBox> + '_ {
        self.boxes
            .iter()
            .filter(move |bounding_box| bounding_box.page_number == page_number)
    }

    pub fn boxes_for_label<'a>(
        &'a self,
        label: &'a str,
    ) -> impl Iterator<Item = &'a BoundingBox> + 'a {
        self.boxes
            .iter()
            .filter(move |bounding_box| bounding_box.label == label)
    }

    pub fn add(&mut self, draft: BoxDraft) -> BoxId {
        let id = self.mint_id();
        self.completed.insert(draft.label.clone());
        self.boxes.push(BoundingBox {
            id,
            server_id: None,
            label: draft.label,
            page_number: draft.page_number,
            rect: draft.rect,
            enhanced_asset_ref: None,
            use_enhanced: false,
        });
        self.revision += 1;
        id
    }

    pub fn remove_at(&mut self, index: usize) -> Option<BoundingBox> {
        if index >= self.boxes.len() {
            return None;
        }
        let removed = self.boxes.remove(index);
        self.recompute_completed();
        self.revision += 1;
        Some(removed)
    }

    pub fn remove(&mut self, id: BoxId) -> Option<BoundingBox> {
        let index = self.position(id)?;
        self.remove_at(index)
    }

    /// Applies `patch` to one box. Returns false when the id is unknown.
    pub fn update_box(&mut self, id: BoxId, patch: &BoxPatch) -> bool {
        let Some(bounding_box) = self.boxes.iter_mut().find(|candidate| candidate.id == id) else {
            return false;
        };
        bounding_box.apply(patch);
        self.revision += 1;
        true
    }

    /// Applies `patch` to every box sharing `label`; returns how many matched.
    pub fn update_by_label(&mut self, label: &str, patch: &BoxPatch) -> usize {
        let mut touched = 0;
        for bounding_box in self.boxes.iter_mut().filter(|candidate| candidate.label == label) {
            bounding_box.apply(patch);
            touched += 1;
        }
        if touched > 0 {
            self.revision += 1;
        }
        touched
    }

    /// Replaces the whole collection with persisted rows.
    ///
    /// Rows get fresh local ids; server ids are preserved. Geometry is clipped
    /// to the page.
    pub fn overwrite(&mut self, boxes: impl IntoIterator<Item = WireBox>) {
        let mut replacement = Vec::new();
        for wire in boxes {
            let id = self.mint_id();
            replacement.push(BoundingBox {
                id,
                server_id: wire.id,
                rect: NormalizedRect::clamped(wire.x, wire.y, wire.width, wire.height),
                label: wire.label,
                page_number: wire.page_number,
                enhanced_asset_ref: wire.enhanced_asset_ref,
                use_enhanced: wire.use_enhanced,
            });
        }
        self.boxes = replacement;
        self.recompute_completed();
        self.revision += 1;
    }

    pub fn clear(&mut self) {
        self.overwrite(std::iter::empty());
    }

    pub fn snapshot(&self) -> AnnotationSnapshot {
        AnnotationSnapshot {
            revision: self.revision,
            boxes: self.boxes.iter().map(BoundingBox::to_wire).collect(),
        }
    }

    /// Copies server ids from the rows the backend returned for a submit.
    ///
    /// Only applies when nothing changed since `revision`, because rows are
    /// matched to boxes by position.
    pub fn reconcile_server_ids(&mut self, revision: u64, persisted: &[WireBox]) -> bool {
        if revision != self.revision || persisted.len() != self.boxes.len() {
            return false;
        }

        for (bounding_box, row) in self.boxes.iter_mut().zip(persisted) {
            if row.label == bounding_box.label
                && row.page_number == bounding_box.page_number
                && let Some(server_id) = row.id
            {
                bounding_box.server_id = Some(server_id);
            }
        }
        // Ids are bookkeeping, so the revision is left alone and a pending
        // snapshot at this revision stays current.
        true
    }

    fn mint_id(&mut self) -> BoxId {
        self.next_box_id += 1;
        BoxId::new(self.next_box_id)
    }

    fn recompute_completed(&mut self) {
        self.completed = self
            .boxes
            .iter()
            .map(|bounding_box| bounding_box.label.clone())
            .collect();
    }
}
