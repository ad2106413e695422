//! Casualty selection: unit snapshots, categories and hit allocation

pub mod allocator;
pub mod category;
pub mod units;

pub use allocator::{check_casualty_count, AllocationEntry, CasualtyAllocator, Cap, SelectionRule};
pub use category::{
    CategoryKey, Categorizer, SeparatorCategories, UnitCategory, UnitOwner, UnitSeparator,
};
pub use units::{CasualtyDetails, CasualtyList, DependentsMap, Unit};
