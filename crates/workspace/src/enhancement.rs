//! Per-label enhancement offers and the user's choice between them.
//!
//! Requests and choices take fresh tickets from one counter. Only the newest
//! request ticket for a label may install an offer, and only the newest
//! choice ticket for a box may settle, so a slow response can never undo a
//! choice the user made after it was sent.

use std::collections::HashMap;

use figseg_core::BoxId;
use figseg_service::EnhancementOffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnhancementTicket(u64);

impl EnhancementTicket {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnhancementState {
    Idle,
    Requesting { ticket: EnhancementTicket },
    Ready(EnhancementOffer),
    Failed { message: String },
}

/// A choice waiting for the backend to confirm it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChoice {
    pub ticket: EnhancementTicket,
    pub target: BoxId,
    pub use_enhanced: bool,
    pub asset_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancementSelector {
    label: String,
    target: BoxId,
    state: EnhancementState,
    latest_request: Option<EnhancementTicket>,
}

impl EnhancementSelector {
    fn new(label: &str, target: BoxId) -> Self {
        Self {
            label: label.to_string(),
            target,
            state: EnhancementState::Idle,
            latest_request: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Box the current offer was cropped from.
    pub fn target(&self) -> BoxId {
        self.target
    }

    pub fn state(&self) -> &EnhancementState {
        &self.state
    }

    pub fn offer(&self) -> Option<&EnhancementOffer> {
        match &self.state {
            EnhancementState::Ready(offer) => Some(offer),
            _ => None,
        }
    }
}

/// Why a choice could not be made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceRejection {
    UnknownLabel,
    NoOffer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    /// A newer request for the label, or a newer choice for the box, exists.
    Superseded,
}

#[derive(Debug, Default)]
pub struct EnhancementSelectors {
    selectors: HashMap<String, EnhancementSelector>,
    choices: HashMap<BoxId, PendingChoice>,
    next_ticket: u64,
}

impl EnhancementSelectors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: &str) -> Option<&EnhancementSelector> {
        self.selectors.get(label)
    }

    /// Choice for `target` still waiting on the backend.
    pub fn pending_choice(&self, target: BoxId) -> Option<&PendingChoice> {
        self.choices.get(&target)
    }

    pub fn clear(&mut self) {
        self.selectors.clear();
        self.choices.clear();
    }

    /// Starts a request for `label` against `target`. Replaces the label's
    /// offer; choices already sent for any box are left alone.
    pub fn begin_request(&mut self, label: &str, target: BoxId) -> EnhancementTicket {
        let ticket = self.mint();
        let selector = self
            .selectors
            .entry(label.to_string())
            .or_insert_with(|| EnhancementSelector::new(label, target));
        selector.target = target;
        selector.latest_request = Some(ticket);
        selector.state = EnhancementState::Requesting { ticket };
        ticket
    }

    pub fn resolve_request(
        &mut self,
        label: &str,
        ticket: EnhancementTicket,
        outcome: Result<EnhancementOffer, String>,
    ) -> Resolution {
        let Some(selector) = self.selectors.get_mut(label) else {
            return Resolution::Superseded;
        };
        if selector.latest_request != Some(ticket) {
            return Resolution::Superseded;
        }

        selector.state = match outcome {
            Ok(offer) => EnhancementState::Ready(offer),
            Err(message) => EnhancementState::Failed { message },
        };
        Resolution::Applied
    }

    /// Records the user's choice for the box behind `label`'s offer,
    /// superseding a request still in flight for the label.
    ///
    /// Choosing the enhanced image requires an offer. The returned choice
    /// carries the asset reference to store on the box.
    pub fn choose(
        &mut self,
        label: &str,
        use_enhanced: bool,
    ) -> Result<PendingChoice, ChoiceRejection> {
        let ticket = EnhancementTicket(self.next_ticket + 1);
        let selector = self
            .selectors
            .get_mut(label)
            .ok_or(ChoiceRejection::UnknownLabel)?;

        let asset_ref = match &selector.state {
            EnhancementState::Ready(offer) => offer.asset_ref.clone(),
            _ if use_enhanced => return Err(ChoiceRejection::NoOffer),
            _ => None,
        };
        self.next_ticket = ticket.0;

        if matches!(selector.state, EnhancementState::Requesting { .. }) {
            tracing::debug!(label, "choice supersedes pending enhancement request");
            selector.state = EnhancementState::Idle;
            selector.latest_request = None;
        }

        let choice = PendingChoice {
            ticket,
            target: selector.target,
            use_enhanced,
            asset_ref,
        };
        self.choices.insert(choice.target, choice.clone());
        Ok(choice)
    }

    /// Clears `choice` once the backend answered. Superseded when a newer
    /// choice for the same box was made in the meantime.
    pub fn settle_choice(&mut self, choice: &PendingChoice) -> Resolution {
        match self.choices.get(&choice.target) {
            Some(pending) if pending.ticket == choice.ticket => {
                self.choices.remove(&choice.target);
                Resolution::Applied
            }
            _ => Resolution::Superseded,
        }
    }

    fn mint(&mut self) -> EnhancementTicket {
        self.next_ticket += 1;
        EnhancementTicket(self.next_ticket)
    }
}
