//! Input bounds. Everything that crosses the engine boundary is checked
//! against these before it can touch state or the WAL.

use crate::model::{DAY_MS, Ms};

/// 2000-01-01T00:00:00Z. Anything earlier is a caller bug.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// No single commitment or rule window may be wider than this.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;

/// Availability/slot queries are capped to this window.
pub const MAX_QUERY_WINDOW_MS: Ms = 92 * DAY_MS;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_COMMITMENTS_PER_RESOURCE: usize = 100_000;
pub const MAX_RULES_PER_SCOPE: usize = 1_024;
pub const MAX_WINDOWS_PER_RULE: usize = 48;

pub const MAX_MATCHES_PER_TOURNAMENT: usize = 4_096;
pub const MAX_COURTS_PER_TOURNAMENT: usize = 256;
pub const MAX_PLAYERS_PER_MATCH: usize = 8;
pub const MAX_PLAYER_BLOCKS_PER_TOURNAMENT: usize = 8_192;

/// Scheduler knob floors — below these the grid walk degenerates.
pub const MIN_SLOT_MIN: u32 = 5;
pub const MIN_DURATION_MIN: u32 = 1;

/// Hard cap on grid candidates examined per match before giving up.
pub const MAX_CANDIDATES_PER_MATCH: usize = 20_000;
