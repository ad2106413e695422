use thiserror::Error;

use crate::sync::rendezvous::DecisionKind;

#[derive(Error, Debug)]
pub enum CouncilError {
    #[error("{0:?} decision must not be requested from the UI thread")]
    CalledFromUiThread(DecisionKind),

    #[error("Cannot wait for {0} on the UI thread")]
    WaitOnUiThread(&'static str),

    #[error("Wrong number of casualties selected: required {required}, selected {selected}")]
    InvalidCasualtyCount { required: u32, selected: u32 },

    #[error("Hit slot {slot} out of range for allocation entry {entry}")]
    SlotOutOfRange { entry: usize, slot: usize },

    #[error("Not enough units: {wanted} hits wanted, pool absorbs {available}")]
    NotEnoughUnits { wanted: u32, available: usize },

    #[error("Unknown retreat destination: {0}")]
    UnknownDestination(String),

    #[error("{0:?} decision already resolved")]
    AlreadyResolved(DecisionKind),

    #[error("UI thread error: {0}")]
    UiThread(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, CouncilError>;
