use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or out-of-policy input.
    Validation(String),
    NotFound(&'static str, Ulid),
    /// Name already taken, or empty.
    DuplicateName(String),
    /// Overlaps the given existing booking.
    Conflict(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// True for faults on our side; everything else is the caller's input.
    pub fn is_internal(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(kind, id) => write!(f, "{kind} not found: {id}"),
            EngineError::DuplicateName(name) if name.is_empty() => {
                write!(f, "room name must not be empty")
            }
            EngineError::DuplicateName(name) => write!(f, "room name already exists: {name}"),
            EngineError::Conflict(id) => {
                write!(f, "time slot overlaps an existing booking: {id}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
