//! Battle Council - operator decisions for a running battle simulation

pub mod casualty;
pub mod core;
pub mod display;
pub mod session;
pub mod sync;
