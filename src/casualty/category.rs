//! Grouping units into interchangeable categories
//!
//! Casualty selection never asks "which infantry", only "how many infantry".
//! A categorizer decides which units count as interchangeable. The grouping
//! policy is pluggable: any `Fn(&[Unit], &DependentsMap) -> Vec<UnitCategory>`
//! is a [`Categorizer`], and [`UnitSeparator`] is the stock policy.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::casualty::units::{DependentsMap, Unit};
use crate::core::config::SessionConfig;
use crate::core::types::{PlayerId, UnitTypeId};

/// Owner and type of a dependent unit, used to tell loaded transports apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitOwner {
    pub owner: PlayerId,
    pub unit_type: UnitTypeId,
}

/// Everything that makes two units interchangeable
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryKey {
    pub owner: PlayerId,
    pub unit_type: UnitTypeId,
    pub hit_points: u32,
    pub damage: u32,
    pub disabled: bool,
    /// `None` when retreat eligibility is not a separating criterion
    pub can_retreat: Option<bool>,
    pub transport_cost: Option<u32>,
    /// Sorted; empty when dependents are not a separating criterion
    pub dependents: Vec<UnitOwner>,
}

impl CategoryKey {
    /// Key that separates on the unit's own attributes only
    pub fn of(unit: &Unit) -> Self {
        Self {
            owner: unit.owner,
            unit_type: unit.unit_type,
            hit_points: unit.hit_points,
            damage: unit.damage,
            disabled: unit.disabled,
            can_retreat: None,
            transport_cost: None,
            dependents: Vec::new(),
        }
    }
}

/// A group of interchangeable units, in stable order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCategory {
    key: CategoryKey,
    units: Vec<Unit>,
}

impl UnitCategory {
    pub fn new(key: CategoryKey, units: Vec<Unit>) -> Self {
        Self { key, units }
    }

    pub fn key(&self) -> &CategoryKey {
        &self.key
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn owner(&self) -> PlayerId {
        self.key.owner
    }

    pub fn unit_type(&self) -> UnitTypeId {
        self.key.unit_type
    }

    pub fn hit_points(&self) -> u32 {
        self.key.hit_points
    }

    pub fn damage(&self) -> u32 {
        self.key.damage
    }

    pub fn disabled(&self) -> bool {
        self.key.disabled
    }

    pub fn dependents(&self) -> &[UnitOwner] {
        &self.key.dependents
    }

    pub fn contains(&self, unit: &Unit) -> bool {
        self.units.iter().any(|u| u.id == unit.id)
    }

    /// Whether units of this category can be hit more than once in one selection
    ///
    /// A unit one hit away from removal only ever takes a single hit.
    pub fn takes_multiple_hits(&self, allow_multiple_hits: bool) -> bool {
        allow_multiple_hits
            && self.key.hit_points > 1
            && self.key.damage < self.key.hit_points - 1
    }

    /// Number of ordered hit slots (damaged, ..., destroyed)
    pub fn slot_count(&self, allow_multiple_hits: bool) -> usize {
        if self.takes_multiple_hits(allow_multiple_hits) {
            (self.key.hit_points - self.key.damage).max(1) as usize
        } else {
            1
        }
    }
}

/// Turns a raw unit pool into categories
pub trait Categorizer: Send + Sync {
    fn categorize(&self, units: &[Unit], dependents: &DependentsMap) -> Vec<UnitCategory>;
}

impl<F> Categorizer for F
where
    F: Fn(&[Unit], &DependentsMap) -> Vec<UnitCategory> + Send + Sync,
{
    fn categorize(&self, units: &[Unit], dependents: &DependentsMap) -> Vec<UnitCategory> {
        self(units, dependents)
    }
}

/// Which optional attributes split categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparatorCategories {
    pub dependents: bool,
    pub retreat_possibility: bool,
    pub transport_cost: bool,
}

impl Default for SeparatorCategories {
    fn default() -> Self {
        Self {
            dependents: true,
            retreat_possibility: false,
            transport_cost: false,
        }
    }
}

impl SeparatorCategories {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            dependents: true,
            retreat_possibility: config.separate_by_retreat_possibility,
            transport_cost: config.separate_by_transport_cost,
        }
    }
}

/// Stock categorizer: owner, type, hit points, damage and disabled state,
/// plus the optional criteria in [`SeparatorCategories`]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitSeparator {
    pub categories: SeparatorCategories,
}

impl UnitSeparator {
    pub fn new(categories: SeparatorCategories) -> Self {
        Self { categories }
    }

    fn key_for(&self, unit: &Unit, dependents: &DependentsMap) -> CategoryKey {
        let mut key = CategoryKey::of(unit);
        if self.categories.retreat_possibility {
            key.can_retreat = Some(unit.can_retreat);
        }
        if self.categories.transport_cost {
            key.transport_cost = unit.transport_cost;
        }
        if self.categories.dependents {
            if let Some(carried) = dependents.get(&unit.id) {
                key.dependents = carried
                    .iter()
                    .map(|d| UnitOwner {
                        owner: d.owner,
                        unit_type: d.unit_type,
                    })
                    .collect();
                key.dependents.sort();
            }
        }
        key
    }
}

impl Categorizer for UnitSeparator {
    /// Categories come out in order of first appearance in `units`
    fn categorize(&self, units: &[Unit], dependents: &DependentsMap) -> Vec<UnitCategory> {
        let mut index: AHashMap<CategoryKey, usize> = AHashMap::new();
        let mut categories: Vec<UnitCategory> = Vec::new();

        for unit in units {
            let key = self.key_for(unit, dependents);
            match index.get(&key) {
                Some(&i) => categories[i].units.push(unit.clone()),
                None => {
                    index.insert(key.clone(), categories.len());
                    categories.push(UnitCategory::new(key, vec![unit.clone()]));
                }
            }
        }

        categories
    }
}
