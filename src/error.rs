use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not logged in: no session cookie was found")]
    NotAuthenticated,
}

/// Which page of the reservation flow a failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStage {
    /// The lab-support category listing (first POST).
    Category,
    /// The time-slot listing (second POST).
    TimeSlot,
}

impl std::fmt::Display for ReservationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationStage::Category => write!(f, "category"),
            ReservationStage::TimeSlot => write!(f, "time slot"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    #[error("no {stage} cards found")]
    NoCandidates { stage: ReservationStage },
    #[error("no {stage} card has a usable form")]
    NoUsableForm { stage: ReservationStage },
    #[error("failed to join the group, the portal did not confirm the enrolment")]
    NotConfirmed,
    #[error("request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no reservation with id {0}")]
    UnknownReservation(u64),
    #[error("reservation {0} is already fulfilled")]
    AlreadyFulfilled(u64),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("downloaded {actual} bytes but the server announced {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("could not write the file: {0}")]
    Io(#[from] std::io::Error),
}
