//! Battle sessions and the dialogs they present

pub mod battle;
pub mod dialogs;

pub use battle::{snapshot_pool, BattleSession, CasualtyRequest, UnitRoster};
pub use dialogs::{
    BattlePrompter, CasualtyDialog, ConfirmationDialog, PendingDecision, RetreatDialog,
    SubmergeDialog,
};
