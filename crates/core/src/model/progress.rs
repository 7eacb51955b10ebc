use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("section max must be >= 1, got {0}")]
    InvalidSectionMax(u32),

    #[error("section indices are 1-based, got 0")]
    ZeroSection,
}

//
// ─── PROGRESS RECORD ───────────────────────────────────────────────────────────
//

/// Unlock threshold and completed sections for one (user, module).
///
/// Records form a join-semilattice: `merge` takes the maximum threshold and
/// the union of completed sections, so merging is commutative, associative
/// and idempotent. The only way to move a record down is [`ProgressRecord::reset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProgressWire", into = "ProgressWire")]
pub struct ProgressRecord {
    section_max: u32,
    completed_sections: BTreeSet<u32>,
}

impl ProgressRecord {
    pub const FIRST_SECTION: u32 = 1;

    /// Build a record, validating the 1-based invariants.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidSectionMax` if `section_max` is 0 and
    /// `ProgressError::ZeroSection` if a completed section is 0.
    pub fn new(
        section_max: u32,
        completed_sections: impl IntoIterator<Item = u32>,
    ) -> Result<Self, ProgressError> {
        if section_max < Self::FIRST_SECTION {
            return Err(ProgressError::InvalidSectionMax(section_max));
        }
        let completed_sections: BTreeSet<u32> = completed_sections.into_iter().collect();
        if completed_sections.contains(&0) {
            return Err(ProgressError::ZeroSection);
        }
        Ok(Self {
            section_max,
            completed_sections,
        })
    }

    /// A fresh record with nothing completed and `section` unlocked.
    ///
    /// Values below 1 are raised to 1.
    #[must_use]
    pub fn starting_at(section: u32) -> Self {
        Self {
            section_max: section.max(Self::FIRST_SECTION),
            completed_sections: BTreeSet::new(),
        }
    }

    /// The value a module holds right after an explicit reset.
    #[must_use]
    pub fn reset() -> Self {
        Self::starting_at(Self::FIRST_SECTION)
    }

    #[must_use]
    pub fn section_max(&self) -> u32 {
        self.section_max
    }

    #[must_use]
    pub fn completed_sections(&self) -> &BTreeSet<u32> {
        &self.completed_sections
    }

    #[must_use]
    pub fn is_section_completed(&self, section: u32) -> bool {
        self.completed_sections.contains(&section)
    }

    /// Least upper bound of two records.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.merge_in(other);
        merged
    }

    /// In-place merge. Returns true if `self` changed.
    pub fn merge_in(&mut self, other: &Self) -> bool {
        let before = (self.section_max, self.completed_sections.len());
        self.section_max = self.section_max.max(other.section_max);
        self.completed_sections
            .extend(other.completed_sections.iter().copied());
        before != (self.section_max, self.completed_sections.len())
    }

    /// Apply an incremental change. Never lowers the threshold.
    ///
    /// Returns true if `self` changed.
    pub fn apply(&mut self, delta: &ProgressDelta) -> bool {
        let before = (self.section_max, self.completed_sections.len());
        if let Some(max) = delta.section_max {
            self.section_max = self.section_max.max(max);
        }
        self.completed_sections
            .extend(delta.completed_sections.iter().copied().filter(|s| *s > 0));
        before != (self.section_max, self.completed_sections.len())
    }

    /// True if `self` already contains everything in `other`.
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        self.section_max >= other.section_max
            && other.completed_sections.is_subset(&self.completed_sections)
    }

    /// Drop completed sections outside `1..=sections_per_module`.
    #[must_use]
    pub fn within_module(&self, sections_per_module: u32) -> Self {
        Self {
            section_max: self.section_max,
            completed_sections: self
                .completed_sections
                .iter()
                .copied()
                .filter(|s| *s <= sections_per_module)
                .collect(),
        }
    }
}

impl Default for ProgressRecord {
    fn default() -> Self {
        Self::reset()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressWire {
    section_max: u32,
    #[serde(default)]
    completed_sections: Vec<u32>,
}

impl TryFrom<ProgressWire> for ProgressRecord {
    type Error = ProgressError;

    fn try_from(wire: ProgressWire) -> Result<Self, Self::Error> {
        ProgressRecord::new(wire.section_max, wire.completed_sections)
    }
}

impl From<ProgressRecord> for ProgressWire {
    fn from(record: ProgressRecord) -> Self {
        Self {
            section_max: record.section_max,
            completed_sections: record.completed_sections.into_iter().collect(),
        }
    }
}

//
// ─── PROGRESS DELTA ────────────────────────────────────────────────────────────
//

/// An optimistic change pushed by a client.
///
/// Deltas only ever add: a raised threshold and/or newly completed sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_max: Option<u32>,
    #[serde(default)]
    pub completed_sections: BTreeSet<u32>,
}

impl ProgressDelta {
    /// Unlock every section up to and including `section`.
    #[must_use]
    pub fn unlock_through(section: u32) -> Self {
        Self {
            section_max: Some(section),
            completed_sections: BTreeSet::new(),
        }
    }

    /// Mark `section` completed and unlock the one after it, without
    /// unlocking past the end of the module.
    #[must_use]
    pub fn complete_section(section: u32, sections_per_module: u32) -> Self {
        let next = section.saturating_add(1).min(sections_per_module.max(1));
        Self {
            section_max: Some(next.max(section)),
            completed_sections: BTreeSet::from([section]),
        }
    }

    #[must_use]
    pub fn with_completed(mut self, section: u32) -> Self {
        self.completed_sections.insert(section);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.section_max.is_none() && self.completed_sections.is_empty()
    }

    /// The record this delta would produce on top of an empty module.
    #[must_use]
    pub fn as_record(&self) -> ProgressRecord {
        let mut record = ProgressRecord::reset();
        record.apply(self);
        record
    }
}

impl From<&ProgressRecord> for ProgressDelta {
    fn from(record: &ProgressRecord) -> Self {
        Self {
            section_max: Some(record.section_max()),
            completed_sections: record.completed_sections().clone(),
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn record(max: u32, completed: &[u32]) -> ProgressRecord {
        ProgressRecord::new(max, completed.iter().copied()).unwrap()
    }

    #[test]
    fn merge_takes_max_and_union() {
        let local = record(2, &[1]);
        let remote = record(3, &[1, 2]);
        assert_eq!(local.merge(&remote), record(3, &[1, 2]));
        assert_eq!(remote.merge(&local), record(3, &[1, 2]));
    }

    #[test]
    fn merge_never_lowers_the_threshold() {
        let mut local = record(4, &[1, 2, 3]);
        let changed = local.merge_in(&record(2, &[1]));
        assert!(!changed);
        assert_eq!(local, record(4, &[1, 2, 3]));
    }

    #[test]
    fn merge_is_idempotent() {
        let a = record(3, &[2]);
        assert_eq!(a.merge(&a), a);
    }

    #[test]
    fn zero_section_max_is_rejected() {
        assert_eq!(
            ProgressRecord::new(0, []).unwrap_err(),
            ProgressError::InvalidSectionMax(0)
        );
        assert_eq!(
            ProgressRecord::new(2, [0]).unwrap_err(),
            ProgressError::ZeroSection
        );
    }

    #[test]
    fn starting_at_raises_zero_to_one() {
        assert_eq!(ProgressRecord::starting_at(0).section_max(), 1);
        assert_eq!(ProgressRecord::starting_at(3).section_max(), 3);
    }

    #[test]
    fn apply_delta_only_adds() {
        let mut rec = record(3, &[1]);
        assert!(!rec.apply(&ProgressDelta::unlock_through(2)));
        assert!(rec.apply(&ProgressDelta::default().with_completed(2)));
        assert_eq!(rec, record(3, &[1, 2]));
    }

    #[test]
    fn complete_section_unlocks_next_but_not_past_end() {
        let delta = ProgressDelta::complete_section(2, 3);
        assert_eq!(delta.section_max, Some(3));
        assert!(delta.completed_sections.contains(&2));

        let last = ProgressDelta::complete_section(3, 3);
        assert_eq!(last.section_max, Some(3));
    }

    #[test]
    fn covers_detects_dominance() {
        assert!(record(3, &[1, 2]).covers(&record(2, &[1])));
        assert!(!record(3, &[1]).covers(&record(2, &[2])));
    }

    #[test]
    fn wire_format_is_camel_case_and_validated() {
        let json = serde_json::to_string(&record(2, &[1])).unwrap();
        assert_eq!(json, r#"{"sectionMax":2,"completedSections":[1]}"#);

        let parsed: ProgressRecord =
            serde_json::from_str(r#"{"sectionMax":3}"#).unwrap();
        assert_eq!(parsed, record(3, &[]));

        assert!(serde_json::from_str::<ProgressRecord>(r#"{"sectionMax":0}"#).is_err());
    }

    #[test]
    fn within_module_drops_out_of_range_sections() {
        let rec = record(3, &[1, 2, 9]).within_module(3);
        assert_eq!(rec.completed_sections().len(), 2);
    }
}
