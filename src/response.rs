use std::fmt;

use async_graphql_value::ConstValue;
use serde::Serialize;

use crate::error::{Error, ErrorKind, SchemaError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Location of a value in the result tree, e.g. `students.1.department`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Path(Vec<PathSegment>);

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn field(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Field(key.to_string()));
        Self(segments)
    }

    pub fn index(&self, idx: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(idx));
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                PathSegment::Field(name) => f.write_str(name)?,
                PathSegment::Index(idx) => write!(f, "{}", idx)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub message: String,
    pub path: Path,
    pub kind: ErrorKind,
}

impl FieldError {
    pub fn new(path: Path, error: &Error) -> Self {
        Self {
            message: error.to_string(),
            path,
            kind: error.kind(),
        }
    }
}

/// Result tree plus the errors of every field that failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub data: ConstValue,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl Response {
    pub fn from_error(error: &Error) -> Self {
        Self {
            data: ConstValue::Null,
            errors: vec![FieldError::new(Path::root(), error)],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors_of(&self, kind: ErrorKind) -> impl Iterator<Item = &FieldError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }

    pub fn into_json(self) -> serde_json::Value {
        serde_json::to_value(&self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<SchemaError> for Response {
    fn from(err: SchemaError) -> Self {
        Response::from_error(&Error::from(err))
    }
}
