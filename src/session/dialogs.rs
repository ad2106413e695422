//! Decisions waiting on the operator
//!
//! Each dialog owns the [`Responder`] of one blocked request. The prompter
//! receives it on the UI thread and resolves it whenever the operator acts.
//! Keeping a dialog without resolving it ("ask me later") leaves the
//! requester waiting; dropping it resolves the request as abandoned.

use crate::casualty::allocator::{check_casualty_count, CasualtyAllocator};
use crate::casualty::units::CasualtyDetails;
use crate::core::error::{CouncilError, Result};
use crate::core::types::Territory;
use crate::sync::rendezvous::{DecisionKind, Responder};

/// UI shell side of a battle session
///
/// Every method runs on the UI thread.
pub trait BattlePrompter: Send + Sync + 'static {
    /// Show a decision to the operator
    fn present(&self, decision: PendingDecision);

    /// Remove whatever the last decision left on screen
    fn clear(&self) {}

    fn battle_ended(&self, _message: &str) {}

    /// The session is closing; release display resources
    fn dispose(&self) {}
}

fn resolve<T: Send + 'static>(
    responder: &mut Option<Responder<T>>,
    kind: DecisionKind,
    value: T,
) -> Result<()> {
    let responder = responder.take().ok_or(CouncilError::AlreadyResolved(kind))?;
    if !responder.respond(value) {
        tracing::debug!("{:?} answered after the UI loop stopped", kind);
    }
    Ok(())
}

/// "Press space to continue"
#[derive(Debug)]
pub struct ConfirmationDialog {
    message: String,
    responder: Option<Responder<()>>,
}

impl ConfirmationDialog {
    pub(crate) fn new(message: String, responder: Responder<()>) -> Self {
        Self {
            message,
            responder: Some(responder),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn confirm(&mut self) -> Result<()> {
        resolve(&mut self.responder, DecisionKind::Confirmation, ())
    }

    pub fn is_resolved(&self) -> bool {
        self.responder.is_none()
    }
}

/// Retreat to one of the offered territories, or remain
#[derive(Debug)]
pub struct RetreatDialog {
    message: String,
    destinations: Vec<Territory>,
    responder: Option<Responder<Option<Territory>>>,
}

impl RetreatDialog {
    pub(crate) fn new(
        message: String,
        destinations: Vec<Territory>,
        responder: Responder<Option<Territory>>,
    ) -> Self {
        Self {
            message,
            destinations,
            responder: Some(responder),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn destinations(&self) -> &[Territory] {
        &self.destinations
    }

    /// Names the destination when there is only one to choose from
    pub fn retreat_label(&self) -> String {
        match self.destinations.as_slice() {
            [only] => format!("Retreat to {}", only.name),
            _ => "Retreat".to_string(),
        }
    }

    /// Whether choosing to retreat needs a second step picking the territory
    pub fn needs_chooser(&self) -> bool {
        self.destinations.len() > 1
    }

    pub fn retreat(&mut self, to: &Territory) -> Result<()> {
        let destination = self
            .destinations
            .iter()
            .find(|t| t.id == to.id)
            .cloned()
            .ok_or_else(|| CouncilError::UnknownDestination(to.name.clone()))?;
        resolve(&mut self.responder, DecisionKind::Retreat, Some(destination))
    }

    pub fn remain(&mut self) -> Result<()> {
        resolve(&mut self.responder, DecisionKind::Retreat, None)
    }

    pub fn is_resolved(&self) -> bool {
        self.responder.is_none()
    }
}

/// Submerge in place, or remain in the battle
#[derive(Debug)]
pub struct SubmergeDialog {
    message: String,
    location: Territory,
    responder: Option<Responder<Option<Territory>>>,
}

impl SubmergeDialog {
    pub(crate) fn new(
        message: String,
        location: Territory,
        responder: Responder<Option<Territory>>,
    ) -> Self {
        Self {
            message,
            location,
            responder: Some(responder),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn location(&self) -> &Territory {
        &self.location
    }

    pub fn submerge(&mut self) -> Result<()> {
        let location = self.location.clone();
        resolve(&mut self.responder, DecisionKind::Submerge, Some(location))
    }

    pub fn remain(&mut self) -> Result<()> {
        resolve(&mut self.responder, DecisionKind::Submerge, None)
    }

    pub fn is_resolved(&self) -> bool {
        self.responder.is_none()
    }
}

/// Pick which units take the hits
///
/// `required` is `None` in edit mode, where any selection is accepted.
#[derive(Debug)]
pub struct CasualtyDialog {
    hit_player: String,
    message: String,
    required: Option<u32>,
    allocator: CasualtyAllocator,
    responder: Option<Responder<CasualtyDetails>>,
}

impl CasualtyDialog {
    pub(crate) fn new(
        hit_player: String,
        message: String,
        required: Option<u32>,
        allocator: CasualtyAllocator,
        responder: Responder<CasualtyDetails>,
    ) -> Self {
        Self {
            hit_player,
            message,
            required,
            allocator,
            responder: Some(responder),
        }
    }

    pub fn hit_player(&self) -> &str {
        &self.hit_player
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn required(&self) -> Option<u32> {
        self.required
    }

    pub fn is_edit_mode(&self) -> bool {
        self.required.is_none()
    }

    pub fn allocator(&self) -> &CasualtyAllocator {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut CasualtyAllocator {
        &mut self.allocator
    }

    pub fn button_text(&self) -> String {
        match self.required {
            Some(1) => format!("{}, press space to select 1 casualty", self.hit_player),
            Some(count) => format!(
                "{}, press space to select {} casualties",
                self.hit_player, count
            ),
            None => format!("{}, press space to select casualties", self.hit_player),
        }
    }

    pub fn title(&self) -> String {
        format!("{} {}.", self.message, self.button_text())
    }

    /// Submit the current selection
    ///
    /// A wrong count returns the validation error and leaves the dialog open
    /// for another attempt.
    pub fn accept(&mut self) -> Result<()> {
        if self.responder.is_none() {
            return Err(CouncilError::AlreadyResolved(DecisionKind::CasualtySelection));
        }
        let details = self.allocator.details(false);
        if let Some(required) = self.required {
            check_casualty_count(required, details.hit_count() as u32)?;
        }
        resolve(&mut self.responder, DecisionKind::CasualtySelection, details)
    }

    pub fn is_resolved(&self) -> bool {
        self.responder.is_none()
    }
}

/// A decision handed to the [`BattlePrompter`]
#[derive(Debug)]
pub enum PendingDecision {
    Confirmation(ConfirmationDialog),
    Retreat(RetreatDialog),
    Submerge(SubmergeDialog),
    Casualties(CasualtyDialog),
}

impl PendingDecision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            PendingDecision::Confirmation(_) => DecisionKind::Confirmation,
            PendingDecision::Retreat(_) => DecisionKind::Retreat,
            PendingDecision::Submerge(_) => DecisionKind::Submerge,
            PendingDecision::Casualties(_) => DecisionKind::CasualtySelection,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PendingDecision::Confirmation(d) => d.message(),
            PendingDecision::Retreat(d) => d.message(),
            PendingDecision::Submerge(d) => d.message(),
            PendingDecision::Casualties(d) => d.message(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        match self {
            PendingDecision::Confirmation(d) => d.is_resolved(),
            PendingDecision::Retreat(d) => d.is_resolved(),
            PendingDecision::Submerge(d) => d.is_resolved(),
            PendingDecision::Casualties(d) => d.is_resolved(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::casualty::allocator::Cap;
    use crate::casualty::category::UnitSeparator;
    use crate::casualty::units::{CasualtyList, DependentsMap, Unit};
    use crate::core::types::{PlayerId, UnitTypeId};
    use crate::sync::rendezvous::{Decision, DecisionRendezvous, Wait};
    use crate::sync::shutdown::ShutdownRegistry;
    use crate::sync::ui_thread::UiThread;

    fn setup() -> (UiThread, DecisionRendezvous) {
        let ui = UiThread::spawn("dialogs-test-ui").expect("spawn ui");
        let rendezvous = DecisionRendezvous::new(ui.handle(), Arc::new(ShutdownRegistry::new()));
        (ui, rendezvous)
    }

    fn infantry(count: usize) -> Vec<Unit> {
        (0..count)
            .map(|_| Unit::new(PlayerId(1), UnitTypeId(1), 1))
            .collect()
    }

    #[test]
    fn test_retreat_label() {
        let (_ui, rendezvous) = setup();
        let decision = rendezvous
            .request(DecisionKind::Retreat, Wait::Unbounded, |responder| {
                let single = vec![Territory::new(3, "Karelia")];
                let mut dialog = RetreatDialog::new("Retreat?".into(), single.clone(), responder);
                assert_eq!(dialog.retreat_label(), "Retreat to Karelia");
                assert!(!dialog.needs_chooser());
                dialog.retreat(&single[0]).expect("retreat");
            })
            .expect("request");
        assert_eq!(decision, Decision::Made(Some(Territory::new(3, "Karelia"))));
    }

    #[test]
    fn test_unknown_destination_keeps_dialog_open() {
        let (_ui, rendezvous) = setup();
        let decision = rendezvous
            .request(DecisionKind::Retreat, Wait::Unbounded, |responder| {
                let options = vec![Territory::new(1, "Egypt"), Territory::new(2, "Libya")];
                let mut dialog = RetreatDialog::new("Retreat?".into(), options, responder);
                assert_eq!(dialog.retreat_label(), "Retreat");
                let result = dialog.retreat(&Territory::new(9, "Persia"));
                assert!(matches!(result, Err(CouncilError::UnknownDestination(_))));
                assert!(!dialog.is_resolved());
                dialog.remain().expect("remain");
                assert!(matches!(
                    dialog.remain(),
                    Err(CouncilError::AlreadyResolved(DecisionKind::Retreat))
                ));
            })
            .expect("request");
        assert_eq!(decision, Decision::Made(None));
    }

    #[test]
    fn test_submerge_returns_battle_location() {
        let (_ui, rendezvous) = setup();
        let decision = rendezvous
            .request(DecisionKind::Submerge, Wait::Unbounded, |responder| {
                let location = Territory::new(7, "Sea Zone 7");
                let mut dialog = SubmergeDialog::new("Submerge?".into(), location, responder);
                dialog.submerge().expect("submerge");
            })
            .expect("request");
        assert_eq!(decision.into_option().flatten().map(|t| t.id.0), Some(7));
    }

    #[test]
    fn test_casualty_dialog_rejects_wrong_count() {
        let (_ui, rendezvous) = setup();
        let decision = rendezvous
            .request(DecisionKind::CasualtySelection, Wait::Unbounded, |responder| {
                let allocator = CasualtyAllocator::new(
                    infantry(3),
                    &CasualtyList::new(),
                    DependentsMap::new(),
                    &UnitSeparator::default(),
                    false,
                    Cap::Limited(2),
                )
                .expect("allocator");
                let mut dialog = CasualtyDialog::new(
                    "Germans".into(),
                    "2 hits".into(),
                    Some(2),
                    allocator,
                    responder,
                );
                assert_eq!(dialog.button_text(), "Germans, press space to select 2 casualties");
                assert!(dialog.accept().is_err());
                assert!(!dialog.is_resolved());
                dialog.allocator_mut().auto_select();
                dialog.accept().expect("accept");
            })
            .expect("request");
        let details = decision.into_option().expect("details");
        assert_eq!(details.killed.len(), 2);
        assert!(!details.auto_calculated);
    }

    #[test]
    fn test_button_text_variants() {
        let (_ui, rendezvous) = setup();
        rendezvous
            .request(DecisionKind::CasualtySelection, Wait::Unbounded, |responder| {
                let allocator = CasualtyAllocator::new(
                    infantry(1),
                    &CasualtyList::new(),
                    DependentsMap::new(),
                    &UnitSeparator::default(),
                    false,
                    Cap::Unlimited,
                )
                .expect("allocator");
                let mut dialog = CasualtyDialog::new(
                    "Russians".into(),
                    "Edit".into(),
                    None,
                    allocator,
                    responder,
                );
                assert_eq!(dialog.button_text(), "Russians, press space to select casualties");
                assert!(dialog.is_edit_mode());
                dialog.accept().expect("any selection accepted in edit mode");
            })
            .expect("request");
    }
}
