//! Section gating.
//!
//! Pure functions mapping a [`ProgressRecord`] to a per-section
//! [`GateDecision`]. Nothing here performs I/O.

use serde::Serialize;
use thiserror::Error;

use crate::model::ProgressRecord;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GateError {
    #[error("module has no sections")]
    EmptyModule,

    #[error("section {section} is outside 1..={sections_per_module}")]
    SectionOutOfRange {
        section: u32,
        sections_per_module: u32,
    },
}

/// How a section should be presented. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDecision {
    pub section: u32,
    pub locked: bool,
    pub is_next: bool,
    pub is_completed: bool,
}

/// The unlock threshold actually applied: the stored value, raised by a
/// forced unlock if given, clamped to `[1, sections_per_module]`.
///
/// The forced value never touches the stored record.
#[must_use]
pub fn effective_section_max(
    record: &ProgressRecord,
    sections_per_module: u32,
    forced_unlock: Option<u32>,
) -> u32 {
    let upper = sections_per_module.max(1);
    let stored = record.section_max().clamp(1, upper);
    match forced_unlock {
        Some(forced) => stored.max(forced).clamp(1, upper),
        None => stored,
    }
}

/// Classify section `section` (1-based).
///
/// # Errors
///
/// Returns `GateError::EmptyModule` if the module has no sections and
/// `GateError::SectionOutOfRange` if `section` is not in `1..=sections_per_module`.
pub fn evaluate(
    record: &ProgressRecord,
    section: u32,
    sections_per_module: u32,
    forced_unlock: Option<u32>,
) -> Result<GateDecision, GateError> {
    if sections_per_module == 0 {
        return Err(GateError::EmptyModule);
    }
    if section == 0 || section > sections_per_module {
        return Err(GateError::SectionOutOfRange {
            section,
            sections_per_module,
        });
    }

    let section_max = effective_section_max(record, sections_per_module, forced_unlock);
    Ok(decide(record, section, section_max))
}

/// Classify every section of a module, in order.
///
/// # Errors
///
/// Returns `GateError::EmptyModule` if the module has no sections.
pub fn evaluate_module(
    record: &ProgressRecord,
    sections_per_module: u32,
    forced_unlock: Option<u32>,
) -> Result<Vec<GateDecision>, GateError> {
    if sections_per_module == 0 {
        return Err(GateError::EmptyModule);
    }
    let section_max = effective_section_max(record, sections_per_module, forced_unlock);
    Ok((1..=sections_per_module)
        .map(|section| decide(record, section, section_max))
        .collect())
}

fn decide(record: &ProgressRecord, section: u32, section_max: u32) -> GateDecision {
    let locked = section > section_max;
    // Older progress may only be reflected in the threshold.
    let is_completed = record.is_section_completed(section) || section < section_max;
    let is_next = section == section_max && !locked && !is_completed;
    GateDecision {
        section,
        locked,
        is_next,
        is_completed,
    }
}
