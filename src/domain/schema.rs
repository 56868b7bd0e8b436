//! Wiring of the sample schema.

use std::time::UNIX_EPOCH;

use crate::auth::AccessPolicy;
use crate::config::Config;
use crate::context::{BatchCtx, Ctx};
use crate::domain::data::AppData;
use crate::domain::entities::{Customer, Greeting, Profile, Student};
use crate::error::SchemaError;
use crate::registry::{Field, Object, Schema};
use crate::store::EntityId;
use crate::subscription::{Pacing, Tick};

pub const QUERY: &str = "Query";
pub const MUTATION: &str = "Mutation";
pub const SUBSCRIPTION: &str = "Subscription";

const GREETING: &str = "Hello...";
const HELLO: &str = "Hellowwww.............";

fn stream_greeting(tick: &Tick) -> Greeting {
    let since_epoch = tick.at.duration_since(UNIX_EPOCH).unwrap_or_default();
    Greeting::new(format!(
        "Hello from stream @ {}.{:03}",
        since_epoch.as_secs(),
        since_epoch.subsec_millis()
    ))
}

fn query() -> Object<AppData> {
    Object::new(QUERY)
        .field(Field::new("hello", |_ctx: Ctx<AppData>| async move {
            Ok(HELLO.to_string())
        }))
        .field(Field::new("helloWithName", |ctx: Ctx<AppData>| async move {
            let name: String = ctx.require_arg("name")?;
            Ok(format!("{}{}", GREETING, name))
        }))
        .field(Field::new("greeting", |_ctx: Ctx<AppData>| async move {
            Ok(Greeting::new(GREETING))
        }))
        .field(
            Field::new("customerById", |ctx: Ctx<AppData>| async move {
                let id: EntityId = ctx.require_arg("id")?;
                let customer = ctx.data().snapshot().await.customers.find(id)?.clone();
                Ok(customer)
            })
            .guard(AccessPolicy::role("USER")),
        )
        .field(
            Field::new("customers", |ctx: Ctx<AppData>| async move {
                Ok(ctx.data().snapshot().await.customers.list().to_vec())
            })
            .guard(AccessPolicy::role("ADMIN")),
        )
        .field(Field::new("profileById", |ctx: Ctx<AppData>| async move {
            let id: EntityId = ctx.require_arg("id")?;
            Ok(Profile {
                id,
                customer_id: ctx.data().source().profile_owner(id),
            })
        }))
        .field(
            Field::new("students", |ctx: Ctx<AppData>| async move {
                Ok(ctx.data().snapshot().await.students.list().to_vec())
            })
            .guard(AccessPolicy::role("ADMIN")),
        )
        .field(Field::new("departmentByStudent", |ctx: Ctx<AppData>| async move {
            let id: EntityId = ctx.require_arg("studentId")?;
            let department = ctx.data().snapshot().await.departments.find_linked(id)?.clone();
            Ok(department)
        }))
}

fn mutation() -> Object<AppData> {
    Object::new(MUTATION)
        .field(
            Field::new("addStudent", |ctx: Ctx<AppData>| async move {
                let name: String = ctx.require_arg("name")?;
                ctx.data().create_student(&name).await
            })
            .guard(AccessPolicy::any_of(["ADMIN", "USER"])),
        )
        .field(
            Field::new("addCustomer", |ctx: Ctx<AppData>| async move {
                let name: String = ctx.require_arg("name")?;
                ctx.data().create_customer(&name).await
            })
            .guard(AccessPolicy::role("ADMIN")),
        )
}

fn subscription(config: &Config) -> Object<AppData> {
    Object::new(SUBSCRIPTION)
        .field(Field::subscription(
            "greetings",
            |_ctx: Ctx<AppData>, tick: Tick| async move { Ok(stream_greeting(&tick)) },
        ))
        .field(
            Field::subscription("counter", |_ctx: Ctx<AppData>, tick: Tick| async move {
                Ok(tick.seq as i64 + 1)
            })
            .paced(Pacing::unbounded(config.pacing().interval)),
        )
}

pub fn build_schema(config: &Config) -> Result<Schema<AppData>, SchemaError> {
    let customer = Object::new("Customer")
        .field(Field::property::<i64>("id").required())
        .field(Field::property::<String>("name"))
        .field(Field::new("profile", |ctx: Ctx<AppData>| async move {
            let customer = ctx.parent_as::<Customer>()?;
            Ok(Profile {
                id: customer.id,
                customer_id: customer.id,
            })
        }));

    let profile = Object::new("Profile")
        .field(Field::property::<i64>("id").required())
        .field(Field::property::<i64>("customerId"));

    let student = Object::new("Student")
        .field(Field::property::<i64>("id").required())
        .field(Field::property::<String>("name"))
        .field(Field::batch(
            "department",
            |ctx: BatchCtx<AppData>, students: Vec<Student>| async move {
                Ok(ctx.data().snapshot().await.departments_for(&students))
            },
        ));

    let department = Object::new("Department")
        .field(Field::property::<i64>("id").required())
        .field(Field::property::<String>("departmentName"));

    let greeting = Object::new("Greeting").field(Field::property::<String>("greeting"));

    Schema::build(QUERY, Some(MUTATION), Some(SUBSCRIPTION))
        .register(query())
        .register(mutation())
        .register(subscription(config))
        .register(customer)
        .register(profile)
        .register(student)
        .register(department)
        .register(greeting)
        .default_pacing(config.pacing())
        .deny_unbatched_lists(config.schema.deny_unbatched_lists)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FieldCoordinate, ResolveMode};
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_sample_schema_builds() {
        let schema = build_schema(&Config::default()).unwrap();

        let department = schema
            .field(&FieldCoordinate::new("Student", "department"))
            .unwrap();
        assert_eq!(department.mode(), ResolveMode::Batch);

        let customers = schema
            .field(&FieldCoordinate::new(QUERY, "customers"))
            .unwrap();
        assert_eq!(customers.policy(), &AccessPolicy::role("ADMIN"));

        assert_eq!(
            schema
                .field(&FieldCoordinate::new(SUBSCRIPTION, "greetings"))
                .unwrap()
                .mode(),
            ResolveMode::Stream
        );
    }

    #[test]
    fn test_unbatched_profile_is_reported_when_denied() {
        let mut config = Config::default();
        config.schema.deny_unbatched_lists = true;

        let err = build_schema(&config).err().unwrap();
        assert!(matches!(
            err,
            SchemaError::NPlusOne { ref type_name, ref resolver } if type_name == "Customer" && resolver == "profile"
        ));
    }

    #[test]
    fn test_stream_greeting_text() {
        let tick = Tick {
            seq: 0,
            elapsed: Duration::from_secs(1),
            at: UNIX_EPOCH + Duration::from_millis(1_700_000_000_042),
        };
        assert_eq!(
            stream_greeting(&tick).greeting,
            "Hello from stream @ 1700000000.042"
        );
        assert!(SystemTime::now() > tick.at);
    }
}
