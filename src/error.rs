use serde::Serialize;
use thiserror::Error;

use crate::store::EntityId;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to build GraphQL schema: {message}")]
    BuildError { message: String },

    #[error("Failed to parse: {message}")]
    ParseError { message: String },

    #[error("Unknown type '{type_name}'")]
    UnknownType { type_name: String },

    #[error("Unknown field '{field}' on type '{type_name}'")]
    UnknownField { type_name: String, field: String },

    #[error("Field '{field}' is registered twice on type '{type_name}'")]
    DuplicateField { type_name: String, field: String },

    #[error("Unsupported: {message}")]
    Unsupported { message: String },

    #[error("N+1 query detected: Type '{type_name}' is used in a list context but resolver(s) '{resolver}' are not batched. Register them with Field::batch to fix.")]
    NPlusOne { type_name: String, resolver: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not authorized to access '{coordinate}'")]
    Unauthorized { coordinate: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("{kind} not found for id {id}")]
    NotFound { kind: String, id: EntityId },

    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Execution cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(kind: impl Into<String>, id: EntityId) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unauthorized { .. } => ErrorKind::Authorization,
            Error::Schema(_) => ErrorKind::Schema,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Coarse classification attached to every error reported in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Authorization,
    Schema,
    NotFound,
    Validation,
    Internal,
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::Unauthorized {
            coordinate: "Query.customers".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(err.to_string(), "Not authorized to access 'Query.customers'");

        let err = Error::from(SchemaError::UnknownType {
            type_name: "Nope".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::Schema);

        let err = Error::not_found("Department", 7);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "Department not found for id 7");

        let err = Error::from(anyhow::anyhow!("backend down"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.to_string(), "backend down");
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"NOT_FOUND\"");
    }
}
