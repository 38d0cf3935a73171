use chrono::NaiveDate;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::{ReservationStatus, RoomStatus};

/// Coarse error categories callers branch on (retry, 404, 409...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    RoomUnavailable,
    InvalidTransition,
    Conflict,
    StorageFailure,
}

#[derive(Debug)]
pub enum EngineError {
    RoomNotFound(Ulid),
    ReservationNotFound(Ulid),
    AlreadyExists(String),
    InvalidDateRange {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    InvalidAmount(Decimal),
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    RoomUnavailable {
        room_id: Ulid,
        conflicting: Ulid,
    },
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    InvalidStatusOverride {
        room_id: Ulid,
        status: RoomStatus,
    },
    Conflict(&'static str),
    StorageFailure(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::RoomNotFound(_) | EngineError::ReservationNotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyExists(_)
            | EngineError::InvalidDateRange { .. }
            | EngineError::InvalidAmount(_)
            | EngineError::InvalidInput(_)
            | EngineError::LimitExceeded(_) => ErrorKind::InvalidInput,
            EngineError::RoomUnavailable { .. } => ErrorKind::RoomUnavailable,
            EngineError::InvalidTransition { .. } | EngineError::InvalidStatusOverride { .. } => {
                ErrorKind::InvalidTransition
            }
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::StorageFailure(_) => ErrorKind::StorageFailure,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::InvalidDateRange { check_in, check_out } => {
                write!(f, "invalid date range: check-out {check_out} is not after check-in {check_in}")
            }
            EngineError::InvalidAmount(amount) => {
                write!(f, "invalid amount: {amount} (must be positive)")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::RoomUnavailable { room_id, conflicting } => write!(
                f,
                "room {room_id} unavailable: overlaps reservation {conflicting}"
            ),
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "reservation {id} cannot move from {from} to {to}")
            }
            EngineError::InvalidStatusOverride { room_id, status } => write!(
                f,
                "cannot set room {room_id} to {status}: conflicts with its checked-in reservation state"
            ),
            EngineError::Conflict(msg) => write!(f, "conflict, retry: {msg}"),
            EngineError::StorageFailure(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
