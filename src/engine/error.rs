use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Candidate span overlaps an occupying commitment.
    Conflict(Ulid),
    /// Span is malformed (start >= end) or outside the valid range.
    InvalidRange,
    DateInPast,
    /// Start does not fall on the slot grid.
    InvalidTimeGrid,
    /// Reschedule requested after the booking's deadline.
    WindowExpired { deadline: Ms },
    /// Only Confirmed bookings may be rescheduled.
    NotConfirmed(Ulid),
    SlotUnavailable,
    /// Holder already has an overlapping commitment elsewhere.
    AgendaConflict(Ulid),
    /// The commitment index points at state that no longer exists.
    MissingExistingData(Ulid),
    /// Another request holds the advisory lock.
    Locked(String),
    NoCourtsConfigured(Ulid),
    AgreementNotActive(Ulid),
    OverrideAlreadyExecuted(Ulid),
    /// Override lacks the tournament linkage needed to execute.
    OverrideNotExecutable(Ulid),
    CapacityExceeded(u32),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code, the shape API layers key off.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "INVALID_ID",
            EngineError::AlreadyExists(_) => "ALREADY_EXISTS",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::InvalidRange => "INVALID_DATE",
            EngineError::DateInPast => "DATE_IN_PAST",
            EngineError::InvalidTimeGrid => "INVALID_TIME_GRID",
            EngineError::WindowExpired { .. } => "BOOKING_RESCHEDULE_WINDOW_EXPIRED",
            EngineError::NotConfirmed(_) => "BOOKING_NOT_CONFIRMED",
            EngineError::SlotUnavailable => "SLOT_UNAVAILABLE",
            EngineError::AgendaConflict(_) => "AGENDA_CONFLICT",
            EngineError::MissingExistingData(_) => "MISSING_EXISTING_DATA",
            EngineError::Locked(_) => "LOCKED",
            EngineError::NoCourtsConfigured(_) => "NO_COURTS_CONFIGURED",
            EngineError::AgreementNotActive(_) => "AGREEMENT_NOT_ACTIVE",
            EngineError::OverrideAlreadyExecuted(_) => "OVERRIDE_ALREADY_EXECUTED",
            EngineError::OverrideNotExecutable(_) => "OVERRIDE_NOT_EXECUTABLE",
            EngineError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::WalError(_) => "WAL_ERROR",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with commitment: {id}"),
            EngineError::InvalidRange => write!(f, "invalid time range"),
            EngineError::DateInPast => write!(f, "requested time is in the past"),
            EngineError::InvalidTimeGrid => write!(f, "start does not align to the slot grid"),
            EngineError::WindowExpired { deadline } => {
                write!(f, "reschedule window expired at {deadline}")
            }
            EngineError::NotConfirmed(id) => {
                write!(f, "booking {id} is not confirmed")
            }
            EngineError::SlotUnavailable => write!(f, "requested slot is unavailable"),
            EngineError::AgendaConflict(id) => {
                write!(f, "holder agenda conflict with commitment: {id}")
            }
            EngineError::MissingExistingData(id) => {
                write!(f, "stored state for {id} is incomplete")
            }
            EngineError::Locked(key) => write!(f, "operation in progress: {key}"),
            EngineError::NoCourtsConfigured(id) => {
                write!(f, "tournament {id} has no usable courts")
            }
            EngineError::AgreementNotActive(id) => {
                write!(f, "agreement {id} is not active")
            }
            EngineError::OverrideAlreadyExecuted(id) => {
                write!(f, "override {id} was already executed")
            }
            EngineError::OverrideNotExecutable(id) => {
                write!(f, "override {id} has no tournament linkage")
            }
            EngineError::CapacityExceeded(cap) => {
                write!(f, "capacity {cap} exceeded: all slots occupied")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
