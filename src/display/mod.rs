//! Battle progress display driven from the UI thread

pub mod steps;

pub use steps::{AnimatorState, StepAnimator, StepTarget};
