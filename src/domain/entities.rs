use async_graphql::Name;
use async_graphql_value::ConstValue;
use indexmap::IndexMap;

use crate::context::{object_field, FromConstValue, GraphQLType, ToConstValue};
use crate::store::{Entity, EntityId, Linked};

fn object<const N: usize>(fields: [(&str, ConstValue); N]) -> ConstValue {
    ConstValue::Object(
        fields
            .into_iter()
            .map(|(key, value)| (Name::new(key), value))
            .collect::<IndexMap<_, _>>(),
    )
}

#[derive(Debug, Clone)]
pub struct Customer {
    pub id: EntityId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub id: EntityId,
    pub customer_id: EntityId,
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: EntityId,
    pub name: String,
}

/// Department of one student, linked through `student_id`.
#[derive(Debug, Clone)]
pub struct Department {
    pub id: EntityId,
    pub student_id: EntityId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub greeting: String,
}

impl Greeting {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            greeting: greeting.into(),
        }
    }
}

impl Entity for Customer {
    const KIND: &'static str = "Customer";

    fn id(&self) -> EntityId {
        self.id
    }
}

impl Entity for Profile {
    const KIND: &'static str = "Profile";

    fn id(&self) -> EntityId {
        self.id
    }
}

impl Linked for Profile {
    fn linked_id(&self) -> EntityId {
        self.customer_id
    }
}

impl Entity for Student {
    const KIND: &'static str = "Student";

    fn id(&self) -> EntityId {
        self.id
    }
}

impl Entity for Department {
    const KIND: &'static str = "Department";

    fn id(&self) -> EntityId {
        self.id
    }
}

impl Linked for Department {
    fn linked_id(&self) -> EntityId {
        self.student_id
    }
}

crate::identity_eq!(Customer, Profile, Student, Department);

impl GraphQLType for Customer {
    const TYPE_NAME: &'static str = "Customer";
}

impl GraphQLType for Profile {
    const TYPE_NAME: &'static str = "Profile";
}

impl GraphQLType for Student {
    const TYPE_NAME: &'static str = "Student";
}

impl GraphQLType for Department {
    const TYPE_NAME: &'static str = "Department";
}

impl GraphQLType for Greeting {
    const TYPE_NAME: &'static str = "Greeting";
}

impl ToConstValue for Customer {
    fn to_const_value(&self) -> ConstValue {
        object([
            ("id", self.id.to_const_value()),
            ("name", self.name.to_const_value()),
        ])
    }
}

impl FromConstValue for Customer {
    fn from_const_value(value: &ConstValue) -> Result<Self, String> {
        Ok(Self {
            id: object_field(value, "id")?,
            name: object_field(value, "name")?,
        })
    }
}

impl ToConstValue for Profile {
    fn to_const_value(&self) -> ConstValue {
        object([
            ("id", self.id.to_const_value()),
            ("customerId", self.customer_id.to_const_value()),
        ])
    }
}

impl ToConstValue for Student {
    fn to_const_value(&self) -> ConstValue {
        object([
            ("id", self.id.to_const_value()),
            ("name", self.name.to_const_value()),
        ])
    }
}

impl FromConstValue for Student {
    fn from_const_value(value: &ConstValue) -> Result<Self, String> {
        Ok(Self {
            id: object_field(value, "id")?,
            name: object_field(value, "name")?,
        })
    }
}

impl ToConstValue for Department {
    fn to_const_value(&self) -> ConstValue {
        object([
            ("id", self.id.to_const_value()),
            ("departmentName", self.name.to_const_value()),
        ])
    }
}

impl ToConstValue for Greeting {
    fn to_const_value(&self) -> ConstValue {
        object([("greeting", self.greeting.to_const_value())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_student_keys_by_id_only() {
        let mut departments = HashMap::new();
        departments.insert(
            Student {
                id: 1,
                name: "A Student".to_string(),
            },
            "Maths",
        );

        let renamed = Student {
            id: 1,
            name: "renamed".to_string(),
        };
        assert_eq!(departments.get(&renamed), Some(&"Maths"));
    }

    #[test]
    fn test_student_value_round_trip() {
        let student = Student {
            id: 7,
            name: "G Student".to_string(),
        };
        let value = student.to_const_value();
        let back = Student::from_const_value(&value).unwrap();

        assert_eq!(back.id, 7);
        assert_eq!(back.name, "G Student");
    }

    #[test]
    fn test_department_exposes_department_name() {
        let department = Department {
            id: 2,
            student_id: 2,
            name: "Geo".to_string(),
        };
        let json = department.to_const_value().into_json().unwrap();
        assert_eq!(json, serde_json::json!({ "id": 2, "departmentName": "Geo" }));
    }
}
