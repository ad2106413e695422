//! Casualty allocation
//!
//! Distributes hits over unit categories. A category whose units can absorb
//! more than one hit gets several ordered slots: slot 0 counts units taking a
//! first hit, the last slot counts units destroyed. A slot never holds more
//! than the slot before it, since a unit has to be damaged before it can be
//! destroyed.
//!
//! Every edit recomputes the legal range of every slot. In capped mode the
//! shared budget is `cap - selected`; with a [`SelectionRule`] the range is
//! the largest extension of the current selection the rule still accepts.
//!
//! The allocator is owned by the UI thread and holds no locks.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use crate::casualty::category::{Categorizer, UnitCategory};
use crate::casualty::units::{CasualtyDetails, CasualtyList, DependentsMap, Unit};
use crate::core::error::{CouncilError, Result};
use crate::core::types::UnitId;

/// Acceptance rule over a tentative selection
///
/// A panicking rule is a bug in the rule and is not caught here.
pub type SelectionRule = Arc<dyn Fn(&[&Unit]) -> bool + Send + Sync>;

/// Maximum total hits selectable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cap {
    Limited(u32),
    Unlimited,
}

impl Cap {
    /// `None` means edit mode: no required count
    pub fn from_required(required: Option<u32>) -> Self {
        match required {
            Some(count) => Cap::Limited(count),
            None => Cap::Unlimited,
        }
    }

    pub fn limit(&self) -> Option<u32> {
        match self {
            Cap::Limited(count) => Some(*count),
            Cap::Unlimited => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct HitSlot {
    value: u32,
    max: u32,
}

/// Selection state for one category
#[derive(Debug, Clone)]
pub struct AllocationEntry {
    category: UnitCategory,
    slots: Vec<HitSlot>,
    left_to_select: u32,
    multiple_hits: bool,
}

impl AllocationEntry {
    fn new(category: UnitCategory, allow_multiple_hits: bool, default_hits: u32) -> Self {
        let multiple_hits = category.takes_multiple_hits(allow_multiple_hits);
        let slot_count = category.slot_count(allow_multiple_hits);
        let size = category.len() as u32;

        // Default hits fill the slots in order
        let mut used = 0;
        let slots = (0..slot_count)
            .map(|_| {
                let value = size.min(default_hits - used);
                used += value;
                HitSlot { value, max: size }
            })
            .collect();

        Self {
            category,
            slots,
            left_to_select: size,
            multiple_hits,
        }
    }

    pub fn category(&self) -> &UnitCategory {
        &self.category
    }

    pub fn units(&self) -> &[Unit] {
        self.category.units()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn has_multiple_hit_points(&self) -> bool {
        self.multiple_hits
    }

    /// Hits selected in slot `slot`, 0 for a slot the entry does not have
    pub fn hits(&self, slot: usize) -> u32 {
        self.slots.get(slot).map_or(0, |s| s.value)
    }

    /// Current upper bound of slot `slot`
    pub fn max(&self, slot: usize) -> u32 {
        self.slots.get(slot).map_or(0, |s| s.max)
    }

    /// Bound shown next to the slot: the category size for the first slot
    pub fn displayed_bound(&self, slot: usize) -> u32 {
        if slot == 0 {
            self.category.len() as u32
        } else {
            self.max(slot)
        }
    }

    pub fn total_hits(&self) -> u32 {
        self.slots.iter().map(|s| s.value).sum()
    }

    /// Units destroyed outright
    pub fn final_hits(&self) -> u32 {
        self.slots.last().map_or(0, |s| s.value)
    }

    pub fn left_to_select(&self) -> u32 {
        self.left_to_select
    }

    fn capacity(&self) -> u32 {
        self.category.len() as u32 * self.slots.len() as u32
    }

    fn set_left_to_select(&mut self, left: u32) {
        self.left_to_select = left;
        let mut previous_max = self.category.len() as u32;
        for slot in &mut self.slots {
            slot.max = left.saturating_add(slot.value).min(previous_max);
            slot.value = slot.value.min(slot.max);
            previous_max = slot.value;
        }
    }

    /// Remove up to `excess` hits, deepest slot first
    fn shed(&mut self, mut excess: u32) -> u32 {
        for slot in self.slots.iter_mut().rev() {
            let taken = slot.value.min(excess);
            slot.value -= taken;
            excess -= taken;
        }
        excess
    }

    fn first_units(&self, count: u32) -> &[Unit] {
        let units = self.category.units();
        &units[..(count as usize).min(units.len())]
    }
}

/// Hit distribution over the categories of a unit pool
pub struct CasualtyAllocator {
    entries: Vec<AllocationEntry>,
    dependents: DependentsMap,
    cap: Cap,
    rule: Option<SelectionRule>,
}

impl std::fmt::Debug for CasualtyAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CasualtyAllocator")
            .field("entries", &self.entries)
            .field("cap", &self.cap)
            .field("has_rule", &self.rule.is_some())
            .finish()
    }
}

impl CasualtyAllocator {
    /// Build one entry per category of `units`
    ///
    /// `defaults` are matched to categories by unit id. In capped mode,
    /// defaults beyond the cap are dropped in category order. Fails when the
    /// cap exceeds the hits the whole pool can absorb.
    pub fn new(
        units: Vec<Unit>,
        defaults: &CasualtyList,
        dependents: DependentsMap,
        categorizer: &dyn Categorizer,
        allow_multiple_hits: bool,
        cap: Cap,
    ) -> Result<Self> {
        let mut default_counts: AHashMap<UnitId, u32> = AHashMap::new();
        for unit in defaults.hits() {
            *default_counts.entry(unit.id).or_insert(0) += 1;
        }

        let mut budget = cap.limit();
        let entries: Vec<AllocationEntry> = categorizer
            .categorize(&units, &dependents)
            .into_iter()
            .map(|category| {
                let mut default_hits: u32 = category
                    .units()
                    .iter()
                    .filter_map(|u| default_counts.get(&u.id))
                    .sum();
                if let Some(left) = budget.as_mut() {
                    default_hits = default_hits.min(*left);
                }
                let entry = AllocationEntry::new(category, allow_multiple_hits, default_hits);
                if let Some(left) = budget.as_mut() {
                    *left -= entry.total_hits();
                }
                entry
            })
            .collect();

        if let Some(required) = cap.limit() {
            let capacity: u32 = entries.iter().map(AllocationEntry::capacity).sum();
            if required > capacity {
                return Err(CouncilError::NotEnoughUnits {
                    wanted: required,
                    available: capacity as usize,
                });
            }
        }

        let mut allocator = Self {
            entries,
            dependents,
            cap,
            rule: None,
        };
        allocator.refresh();
        Ok(allocator)
    }

    /// Constrain every bound with `rule`
    pub fn with_rule(mut self, rule: SelectionRule) -> Self {
        self.rule = Some(rule);
        self.refresh();
        self
    }

    pub fn entries(&self) -> &[AllocationEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&AllocationEntry> {
        self.entries.get(index)
    }

    pub fn cap(&self) -> Cap {
        self.cap
    }

    pub fn is_capped(&self) -> bool {
        self.cap.limit().is_some()
    }

    /// Sum of every slot of every entry
    pub fn selected_count(&self) -> u32 {
        self.entries.iter().map(AllocationEntry::total_hits).sum()
    }

    /// Hits still to assign; `None` when uncapped
    pub fn left_to_select(&self) -> Option<u32> {
        self.cap
            .limit()
            .map(|cap| cap.saturating_sub(self.selected_count()))
    }

    /// Set one slot, clamped to its current bound. Returns the stored value.
    pub fn set_hits(&mut self, entry: usize, slot: usize, value: u32) -> Result<u32> {
        let target = self
            .entries
            .get_mut(entry)
            .and_then(|e| e.slots.get_mut(slot))
            .ok_or(CouncilError::SlotOutOfRange { entry, slot })?;
        target.value = value.min(target.max);
        self.refresh();
        Ok(self.entries[entry].hits(slot))
    }

    /// Greedy "select max" over the first slot of each entry, in entry order
    pub fn auto_select(&mut self) {
        for index in 0..self.entries.len() {
            let room = match self.left_to_select() {
                Some(0) => break,
                Some(left) => left,
                None => u32::MAX,
            };
            let entry = &mut self.entries[index];
            let Some(first) = entry.slots.first_mut() else {
                continue;
            };
            first.value += first.max.saturating_sub(first.value).min(room);
            self.refresh();
        }
    }

    /// Clear every first slot; deeper slots follow through nesting
    pub fn select_none(&mut self) {
        for entry in &mut self.entries {
            if let Some(first) = entry.slots.first_mut() {
                first.value = 0;
            }
        }
        self.refresh();
    }

    /// Change the required count, shedding hits from the last entries if
    /// the selection no longer fits
    pub fn set_cap(&mut self, cap: u32) {
        self.cap = Cap::Limited(cap);
        let mut excess = self.selected_count().saturating_sub(cap);
        for entry in self.entries.iter_mut().rev() {
            if excess == 0 {
                break;
            }
            excess = entry.shed(excess);
        }
        self.refresh();
    }

    pub fn disable_cap(&mut self) {
        self.cap = Cap::Unlimited;
        self.refresh();
    }

    fn refresh(&mut self) {
        let budget = self.left_to_select();
        match self.rule.clone() {
            Some(rule) => {
                let lefts = self.rule_bounds(rule.as_ref());
                for (entry, left) in self.entries.iter_mut().zip(lefts) {
                    entry.set_left_to_select(budget.map_or(left, |b| b.min(left)));
                }
            }
            None => {
                for entry in &mut self.entries {
                    let left = budget.unwrap_or(entry.category.len() as u32);
                    entry.set_left_to_select(left);
                }
            }
        }
    }

    /// Per entry, how far the selection can grow before the rule rejects it
    fn rule_bounds(&self, rule: &(dyn Fn(&[&Unit]) -> bool + Send + Sync)) -> Vec<u32> {
        let selected: Vec<&Unit> = self
            .entries
            .iter()
            .flat_map(|e| e.first_units(e.total_hits()))
            .collect();

        self.entries
            .iter()
            .map(|entry| {
                let hits = entry.total_hits() as usize;
                let mut candidate = selected.clone();
                let mut left = 0;
                for (i, unit) in (1..).zip(entry.units()) {
                    if i > hits {
                        candidate.push(unit);
                    }
                    if i >= hits {
                        if rule(candidate.as_slice()) {
                            left = (i - hits) as u32;
                        } else {
                            break;
                        }
                    }
                }
                left
            })
            .collect()
    }

    /// Units in the final slot of each entry, optionally with their dependents
    ///
    /// Within a category the first units of its stable order are taken. Each
    /// unit appears at most once.
    pub fn get_selected(&self, include_dependents: bool) -> Vec<Unit> {
        let mut seen: AHashSet<UnitId> = AHashSet::new();
        let mut selected = Vec::new();
        for entry in &self.entries {
            for unit in entry.first_units(entry.final_hits()) {
                if seen.insert(unit.id) {
                    selected.push(unit.clone());
                }
                if !include_dependents {
                    continue;
                }
                for dependent in self.dependents.get(&unit.id).into_iter().flatten() {
                    if seen.insert(dependent.id) {
                        selected.push(dependent.clone());
                    }
                }
            }
        }
        selected
    }

    /// Units taking a hit without being destroyed by it
    ///
    /// A unit appears once per non-final slot it is counted in.
    pub fn selected_damaged_multiple_hit_point_units(&self) -> Vec<Unit> {
        let mut damaged = Vec::new();
        for entry in self.entries.iter().filter(|e| e.multiple_hits) {
            for slot in 0..entry.slot_count().saturating_sub(1) {
                damaged.extend_from_slice(entry.first_units(entry.hits(slot)));
            }
        }
        damaged
    }

    /// Killed and damaged units of the current selection
    pub fn details(&self, auto_calculated: bool) -> CasualtyDetails {
        CasualtyDetails {
            killed: self.get_selected(false),
            damaged: self.selected_damaged_multiple_hit_point_units(),
            auto_calculated,
        }
    }

    /// In capped mode the selection must account for exactly the cap
    pub fn validate(&self) -> Result<()> {
        match self.cap.limit() {
            Some(required) => {
                check_casualty_count(required, self.details(false).hit_count() as u32)
            }
            None => Ok(()),
        }
    }
}

pub fn check_casualty_count(required: u32, selected: u32) -> Result<()> {
    if required == selected {
        Ok(())
    } else {
        tracing::warn!(
            "Wrong number of casualties selected: required {}, selected {}",
            required,
            selected
        );
        Err(CouncilError::InvalidCasualtyCount { required, selected })
    }
}
