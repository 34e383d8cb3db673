//! Which sentence is spoken for which timer transition.
//!
//! The wording is product copy; the choice of message per transition is the
//! contract the timer relies on.

use crate::domain::schedule::{LAST_PHASE_INDEX, Phase, PhaseKind, PhaseRole, phase_at};

pub const END_OF_DAY_MESSAGE: &str = "Block 8 complete. Your work day is finished!";
const FALLBACK_COMPLETION_MESSAGE: &str = "Phase complete.";

pub fn start_message(phase: &Phase) -> String {
    match phase.role {
        PhaseRole::Planning => format!(
            "Starting planning phase. {} minutes to organize your day.",
            phase.duration_minutes()
        ),
        PhaseRole::Block(number) => format!("Starting Block {number}. Time to focus."),
        PhaseRole::Break => format!("Starting {} minute break.", phase.duration_minutes()),
        PhaseRole::LunchBreak => {
            format!("Starting {} minute lunch break.", phase.duration_minutes())
        }
    }
}

/// Message for the phase at `index` running out. Break messages look ahead to
/// name the block that starts next; the last phase gets the end-of-day line.
pub fn completion_message(index: usize) -> String {
    if index == LAST_PHASE_INDEX {
        return END_OF_DAY_MESSAGE.to_string();
    }
    let Some(phase) = phase_at(index) else {
        return FALLBACK_COMPLETION_MESSAGE.to_string();
    };
    let next = phase_at(index + 1);

    match (phase.role, next) {
        (PhaseRole::Planning, Some(next)) => format!(
            "Planning complete. Starting {} minute break.",
            next.duration_minutes()
        ),
        (PhaseRole::Block(number), Some(next)) if next.role == PhaseRole::LunchBreak => format!(
            "Block {number} complete. Starting {} minute lunch break.",
            next.duration_minutes()
        ),
        (PhaseRole::Block(number), Some(_)) => format!("Block {number} complete. Starting break."),
        (PhaseRole::Break | PhaseRole::LunchBreak, Some(next)) => match next.role {
            PhaseRole::Block(number) => {
                format!("Break is over. Starting Block {number}. Time to focus.")
            }
            _ => FALLBACK_COMPLETION_MESSAGE.to_string(),
        },
        _ => FALLBACK_COMPLETION_MESSAGE.to_string(),
    }
}

pub fn milestone_message(phase: &Phase, minutes: u32) -> String {
    let unit = if minutes == 1 { "minute" } else { "minutes" };
    match phase.kind {
        PhaseKind::Work => format!("{minutes} {unit} remaining in {}", phase.name),
        PhaseKind::Break => format!("Break ending in {minutes} {unit}"),
    }
}
