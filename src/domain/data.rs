use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::entities::{Customer, Department, Student};
use crate::domain::source::DataSource;
use crate::error::{Error, Result};
use crate::store::{Store, Table};

/// Everything the sample service keeps in memory.
#[derive(Debug, Clone, Default)]
pub struct SchoolData {
    pub customers: Table<Customer>,
    pub students: Table<Student>,
    pub departments: Table<Department>,
}

fn checked_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("name must not be blank"));
    }
    Ok(name)
}

impl SchoolData {
    /// Two customers and three enrolled students.
    pub fn seeded(source: &dyn DataSource) -> Self {
        let mut data = Self::default();
        for name in ["A", "B"] {
            data.customers.create(|id| Customer {
                id,
                name: name.to_string(),
            });
        }
        for name in ["A Student", "B Student", "C Student"] {
            data.enroll(name, source);
        }
        data
    }

    /// Creates a student together with its department.
    pub fn add_student(&mut self, name: &str, source: &dyn DataSource) -> Result<Student> {
        let name = checked_name(name)?;
        Ok(self.enroll(name, source))
    }

    pub fn add_customer(&mut self, name: &str) -> Result<Customer> {
        let name = checked_name(name)?;
        Ok(self.customers.create(|id| Customer {
            id,
            name: name.to_string(),
        }))
    }

    fn enroll(&mut self, name: &str, source: &dyn DataSource) -> Student {
        let student = self.students.create(|id| Student {
            id,
            name: name.to_string(),
        });
        let department_name = source.department_name(&student);
        self.departments.create(|id| Department {
            id,
            student_id: student.id,
            name: department_name,
        });
        student
    }

    /// Departments of `students` from a single pass over all departments.
    /// The first department linked to a student wins; students without one
    /// are left out of the map.
    pub fn departments_for(&self, students: &[Student]) -> HashMap<Student, Department> {
        let mut by_student: HashMap<_, &Department> = HashMap::with_capacity(students.len());
        for department in self.departments.list() {
            by_student.entry(department.student_id).or_insert(department);
        }

        students
            .iter()
            .filter_map(|student| {
                by_student
                    .get(&student.id)
                    .map(|department| (student.clone(), (*department).clone()))
            })
            .collect()
    }
}

/// Resolver context of the sample schema.
///
/// Reads go through [`AppData::snapshot`], fixed for the whole execution so a
/// write landing mid-query is never half-visible. A write made through this
/// context republishes the snapshot, so the rest of a mutation observes it.
#[derive(Debug)]
pub struct AppData {
    store: Arc<Store<SchoolData>>,
    snapshot: RwLock<Arc<SchoolData>>,
    source: Arc<dyn DataSource>,
}

impl AppData {
    pub async fn new(store: Arc<Store<SchoolData>>, source: Arc<dyn DataSource>) -> Self {
        let snapshot = store.snapshot().await;
        Self {
            store,
            snapshot: RwLock::new(snapshot),
            source,
        }
    }

    pub async fn snapshot(&self) -> Arc<SchoolData> {
        self.snapshot.read().await.clone()
    }

    pub fn source(&self) -> &dyn DataSource {
        self.source.as_ref()
    }

    pub async fn create_student(&self, name: &str) -> Result<Student> {
        let source = self.source.clone();
        let student = self
            .commit(|data| data.add_student(name, source.as_ref()))
            .await?;

        tracing::info!(id = student.id, name = %student.name, "student created");
        Ok(student)
    }

    pub async fn create_customer(&self, name: &str) -> Result<Customer> {
        let customer = self.commit(|data| data.add_customer(name)).await?;

        tracing::info!(id = customer.id, name = %customer.name, "customer created");
        Ok(customer)
    }

    async fn commit<R>(&self, apply: impl FnOnce(&mut SchoolData) -> Result<R>) -> Result<R> {
        let (result, published) = self.store.commit(apply).await?;
        *self.snapshot.write().await = published;
        Ok(result)
    }
}
