use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("database query error: {0}")]
    Query(String),

    #[error("database migration error: {0}")]
    Migration(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("check constraint violated: {0}")]
    CheckViolation(String),
}

impl DatabaseError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DatabaseError::UniqueViolation(_))
    }
}

impl From<DieselError> for DatabaseError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(kind, info) => {
                let message = info.message().to_string();
                match kind {
                    DatabaseErrorKind::UniqueViolation => DatabaseError::UniqueViolation(message),
                    DatabaseErrorKind::CheckViolation => DatabaseError::CheckViolation(message),
                    // older sqlite builds report constraint failures without an extended code
                    _ if message.starts_with("UNIQUE constraint failed") => {
                        DatabaseError::UniqueViolation(message)
                    }
                    _ if message.starts_with("CHECK constraint failed") => {
                        DatabaseError::CheckViolation(message)
                    }
                    _ => DatabaseError::Query(message),
                }
            }
            other => DatabaseError::Query(other.to_string()),
        }
    }
}
