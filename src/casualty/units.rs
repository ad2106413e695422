//! Units as seen by casualty selection
//!
//! A unit here is a read-only snapshot: combat code owns the live state and
//! hands copies over before a selection starts.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::core::types::{PlayerId, UnitId, UnitTypeId};

/// Snapshot of a unit that can take hits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub owner: PlayerId,
    pub unit_type: UnitTypeId,
    /// Hits the unit absorbs before it is removed
    pub hit_points: u32,
    /// Hits already taken
    pub damage: u32,
    pub disabled: bool,
    pub can_retreat: bool,
    pub transport_cost: Option<u32>,
}

impl Unit {
    pub fn new(owner: PlayerId, unit_type: UnitTypeId, hit_points: u32) -> Self {
        Self {
            id: UnitId::new(),
            owner,
            unit_type,
            hit_points: hit_points.max(1),
            damage: 0,
            disabled: false,
            can_retreat: true,
            transport_cost: None,
        }
    }

    pub fn with_damage(mut self, damage: u32) -> Self {
        self.damage = damage.min(self.hit_points.saturating_sub(1));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn without_retreat(mut self) -> Self {
        self.can_retreat = false;
        self
    }

    pub fn with_transport_cost(mut self, cost: u32) -> Self {
        self.transport_cost = Some(cost);
        self
    }

    /// Hits still needed to remove the unit
    pub fn hits_left(&self) -> u32 {
        self.hit_points.saturating_sub(self.damage)
    }
}

/// Units carried by (and lost with) another unit
pub type DependentsMap = AHashMap<UnitId, Vec<Unit>>;

/// Suggested casualties, typically computed by combat code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasualtyList {
    pub killed: Vec<Unit>,
    pub damaged: Vec<Unit>,
}

impl CasualtyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&mut self, unit: Unit) {
        self.killed.push(unit);
    }

    pub fn damage(&mut self, unit: Unit) {
        self.damaged.push(unit);
    }

    /// Every suggested hit; a unit appears once per hit it takes
    pub fn hits(&self) -> impl Iterator<Item = &Unit> {
        self.damaged.iter().chain(self.killed.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.killed.is_empty() && self.damaged.is_empty()
    }
}

/// Casualties chosen by the operator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasualtyDetails {
    pub killed: Vec<Unit>,
    pub damaged: Vec<Unit>,
    pub auto_calculated: bool,
}

impl CasualtyDetails {
    /// Hits this selection accounts for
    pub fn hit_count(&self) -> usize {
        self.killed.len() + self.damaged.len()
    }
}
