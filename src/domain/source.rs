//! Backing data that the sample schema does not keep in the store.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::entities::Student;
use crate::store::EntityId;

/// Stand-in for the services behind the sample schema.
pub trait DataSource: fmt::Debug + Send + Sync {
    /// Department assigned to a newly enrolled student.
    fn department_name(&self, student: &Student) -> String;

    /// Owner of the profile with the given id.
    fn profile_owner(&self, profile_id: EntityId) -> EntityId;
}

/// Fully deterministic answers, derived from ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureSource;

impl DataSource for FixtureSource {
    fn department_name(&self, student: &Student) -> String {
        if student.id % 2 == 1 { "Maths" } else { "Geo" }.to_string()
    }

    fn profile_owner(&self, profile_id: EntityId) -> EntityId {
        if profile_id % 2 == 1 {
            3
        } else {
            4
        }
    }
}

/// Hands out configured department names in turn.
#[derive(Debug)]
pub struct RotatingSource {
    departments: Vec<String>,
    cursor: AtomicUsize,
}

impl RotatingSource {
    /// `None` when there is nothing to rotate through.
    pub fn new(departments: Vec<String>) -> Option<Self> {
        if departments.is_empty() {
            return None;
        }
        Some(Self {
            departments,
            cursor: AtomicUsize::new(0),
        })
    }
}

impl DataSource for RotatingSource {
    fn department_name(&self, _student: &Student) -> String {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.departments.len();
        self.departments[idx].clone()
    }

    fn profile_owner(&self, profile_id: EntityId) -> EntityId {
        FixtureSource.profile_owner(profile_id)
    }
}
