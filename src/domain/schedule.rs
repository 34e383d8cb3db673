use crate::domain::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Work,
    Break,
}

impl PhaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Break => "break",
        }
    }
}

/// What a phase means for announcement wording. The state machine itself only
/// looks at `PhaseKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseRole {
    Planning,
    Block(u8),
    Break,
    LunchBreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub name: &'static str,
    pub duration_seconds: u32,
    pub kind: PhaseKind,
    pub role: PhaseRole,
}

impl Phase {
    pub fn duration_minutes(&self) -> u32 {
        self.duration_seconds / 60
    }
}

const PLANNING_SECONDS: u32 = 20 * 60;
const BLOCK_SECONDS: u32 = 45 * 60;
const BREAK_SECONDS: u32 = 15 * 60;
const LUNCH_SECONDS: u32 = 30 * 60;

const fn block(name: &'static str, number: u8) -> Phase {
    Phase {
        name,
        duration_seconds: BLOCK_SECONDS,
        kind: PhaseKind::Work,
        role: PhaseRole::Block(number),
    }
}

const BREAK: Phase = Phase {
    name: "Break",
    duration_seconds: BREAK_SECONDS,
    kind: PhaseKind::Break,
    role: PhaseRole::Break,
};

const LUNCH: Phase = Phase {
    name: "Break",
    duration_seconds: LUNCH_SECONDS,
    kind: PhaseKind::Break,
    role: PhaseRole::LunchBreak,
};

/// The fixed workday: planning, then eight 45 minute blocks separated by
/// breaks, with the long break after block 5.
pub const SCHEDULE: [Phase; 17] = [
    Phase {
        name: "Planning",
        duration_seconds: PLANNING_SECONDS,
        kind: PhaseKind::Work,
        role: PhaseRole::Planning,
    },
    BREAK,
    block("Block 1", 1),
    BREAK,
    block("Block 2", 2),
    BREAK,
    block("Block 3", 3),
    BREAK,
    block("Block 4", 4),
    BREAK,
    block("Block 5", 5),
    LUNCH,
    block("Block 6", 6),
    BREAK,
    block("Block 7", 7),
    BREAK,
    block("Block 8", 8),
];

pub const LAST_PHASE_INDEX: usize = SCHEDULE.len() - 1;

pub fn phase_at(index: usize) -> Option<&'static Phase> {
    SCHEDULE.get(index)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerState {
    #[serde(alias = "phase_index")]
    pub current_phase_index: usize,
    pub time_remaining_seconds: u32,
    pub is_running: bool,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub day_ended: bool,
}

impl Default for TimerState {
    fn default() -> Self {
        Self::initial()
    }
}

impl TimerState {
    /// Planning phase, not running, full duration.
    pub fn initial() -> Self {
        Self {
            current_phase_index: 0,
            time_remaining_seconds: SCHEDULE[0].duration_seconds,
            is_running: false,
            started_at: None,
            paused_at: None,
            day_ended: false,
        }
    }

    pub fn phase(&self) -> &'static Phase {
        &SCHEDULE[self.current_phase_index.min(LAST_PHASE_INDEX)]
    }

    pub fn phase_name(&self) -> &'static str {
        self.phase().name
    }

    pub fn phase_kind(&self) -> PhaseKind {
        self.phase().kind
    }

    pub fn is_finished(&self) -> bool {
        self.current_phase_index == LAST_PHASE_INDEX
            && self.time_remaining_seconds == 0
            && !self.is_running
    }

    pub fn format_time_remaining(&self) -> String {
        let minutes = self.time_remaining_seconds / 60;
        let seconds = self.time_remaining_seconds % 60;
        format!("{minutes:02}:{seconds:02}")
    }

    pub fn validate(&self) -> Result<(), String> {
        let Some(phase) = phase_at(self.current_phase_index) else {
            return Err(format!(
                "timer_state.current_phase_index {} is outside the schedule",
                self.current_phase_index
            ));
        };
        if self.time_remaining_seconds > phase.duration_seconds {
            return Err(format!(
                "timer_state.time_remaining_seconds {} exceeds {} duration",
                self.time_remaining_seconds, phase.name
            ));
        }
        Ok(())
    }
}
