use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use convoy_engine::{CancellationToken, Config, ConstValue, Error, ErrorKind, GraphQLService};
use futures_util::StreamExt;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Counts `batch load` events for one field.
struct BatchCounter {
    field: &'static str,
    count: Arc<AtomicUsize>,
}

#[derive(Default)]
struct BatchEvent {
    message: String,
    field: String,
}

impl Visit for BatchEvent {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "field" {
            self.field = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "field" => self.field = format!("{:?}", value),
            _ => {}
        }
    }
}

impl<S: Subscriber> Layer<S> for BatchCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut seen = BatchEvent::default();
        event.record(&mut seen);
        if seen.message == "batch load" && seen.field == self.field {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn service() -> GraphQLService {
    assert_ok!(GraphQLService::new(&Config::default()))
}

#[tokio::test]
async fn customers_require_admin() {
    let service = service();
    let query = "{ customers { id name } }";

    let response = service.execute_query(service.principal("arnold"), query).await;
    assert!(response.is_ok());
    assert_eq!(
        response.into_json(),
        json!({ "data": { "customers": [
            { "id": 1, "name": "A" },
            { "id": 2, "name": "B" },
        ]}})
    );

    let response = service.execute_query(service.principal("pallab"), query).await;
    assert_eq!(
        response.into_json(),
        json!({
            "data": { "customers": null },
            "errors": [{
                "message": "Not authorized to access 'Query.customers'",
                "path": ["customers"],
                "kind": "AUTHORIZATION"
            }]
        })
    );
}

#[tokio::test]
async fn role_prefix_and_any_of_roles() {
    let config = assert_ok!(Config::from_json_str(
        r#"{ "users": [{ "name": "legacy", "roles": ["ROLE_USER"] }] }"#
    ));
    let service = assert_ok!(GraphQLService::new(&config));

    let response = service
        .execute_query(service.principal("legacy"), "{ customerById(id: \"2\") { name } }")
        .await;
    assert_eq!(
        response.into_json(),
        json!({ "data": { "customerById": { "name": "B" } } })
    );

    let response = service
        .execute_query(service.principal("nobody"), "{ customerById(id: \"2\") { name } hello }")
        .await;
    let json = response.into_json();
    assert_eq!(json["data"], json!({ "customerById": null, "hello": "Hellowwww............." }));
    assert_eq!(json["errors"][0]["kind"], "AUTHORIZATION");
}

#[tokio::test]
async fn students_load_departments_in_one_pass() {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry()
        .with(BatchCounter {
            field: "department",
            count: count.clone(),
        })
        .with(tracing_subscriber::fmt::layer().with_test_writer());
    let _guard = tracing::subscriber::set_default(subscriber);

    let service = service();
    let response = service
        .execute_query(
            service.principal("steve"),
            "{ students { id department { departmentName } } }",
        )
        .await;

    assert!(response.is_ok());
    assert_eq!(
        response.data.into_json().unwrap(),
        json!({ "students": [
            { "id": 1, "department": { "departmentName": "Maths" } },
            { "id": 2, "department": { "departmentName": "Geo" } },
            { "id": 3, "department": { "departmentName": "Maths" } },
        ]})
    );
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn aliased_student_lists_share_one_department_pass() {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(BatchCounter {
        field: "department",
        count: count.clone(),
    });
    let _guard = tracing::subscriber::set_default(subscriber);

    let service = service();
    let response = service
        .execute_query(
            service.principal("steve"),
            "{ a: students { id department { departmentName } } b: students { id department { departmentName } } }",
        )
        .await;

    assert!(response.is_ok(), "{:?}", response.errors);
    let data = response.data.into_json().unwrap();
    assert_eq!(data["a"], data["b"]);
    assert_eq!(data["b"][2]["department"]["departmentName"], "Maths");
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn add_student_creates_department_atomically() {
    let service = service();

    let response = service
        .execute_query(
            service.principal("pallab"),
            r#"mutation { addStudent(name: "D Student") { id name department { departmentName } } }"#,
        )
        .await;
    assert!(response.is_ok(), "{:?}", response.errors);
    assert_eq!(
        response.data.into_json().unwrap(),
        json!({ "addStudent": { "id": 4, "name": "D Student", "department": { "departmentName": "Geo" } } })
    );

    let response = service
        .execute_query(service.principal("arnold"), "{ students { id name } }")
        .await;
    let students = response.data.into_json().unwrap()["students"].clone();
    assert_eq!(students.as_array().map(Vec::len), Some(4));
    assert_eq!(students[3], json!({ "id": 4, "name": "D Student" }));

    let response = service
        .execute_query(
            service.principal("arnold"),
            "{ departmentByStudent(studentId: \"4\") { departmentName } }",
        )
        .await;
    assert_eq!(
        response.data.into_json().unwrap(),
        json!({ "departmentByStudent": { "departmentName": "Geo" } })
    );
}

#[tokio::test]
async fn mutations_run_in_request_order() {
    let service = service();

    let response = service
        .execute_query(
            service.principal("steve"),
            r#"mutation {
                first: addStudent(name: "D Student") { id }
                blank: addStudent(name: "  ") { id }
                second: addStudent(name: "E Student") { id }
            }"#,
        )
        .await;

    assert_eq!(
        response.data.clone().into_json().unwrap(),
        json!({ "first": { "id": 4 }, "blank": null, "second": { "id": 5 } })
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].kind, ErrorKind::Validation);
    assert_eq!(service.store().snapshot().await.departments.len(), 5);
}

#[tokio::test]
async fn variables_and_operation_name() {
    let service = service();

    let response = service
        .execute_with_variables(
            service.principal("arnold"),
            r#"
                query Hello($name: String = "nobody") { helloWithName(name: $name) }
                query Profile($id: Int!) { profileById(id: $id) { id customerId } }
            "#,
            Some("Profile"),
            json!({ "id": 7 }),
        )
        .await;

    assert_eq!(
        response.data.into_json().unwrap(),
        json!({ "profileById": { "id": 7, "customerId": 3 } })
    );
}

#[tokio::test]
async fn unknown_field_fails_the_whole_query() {
    let service = service();

    let response = service
        .execute_query(service.principal("arnold"), "{ hello students { id grade } }")
        .await;

    assert_eq!(
        response.into_json(),
        json!({
            "data": null,
            "errors": [{
                "message": "Unknown field 'grade' on type 'Student'",
                "path": [],
                "kind": "SCHEMA"
            }]
        })
    );
}

#[tokio::test]
async fn fragments_are_rejected() {
    let service = service();

    let response = service
        .execute_query(
            service.principal("arnold"),
            "{ students { ...Fields } } fragment Fields on Student { id }",
        )
        .await;

    assert_eq!(response.data, ConstValue::Null);
    assert_eq!(response.errors_of(ErrorKind::Schema).count(), 1);
}

#[tokio::test]
async fn repeated_reads_are_identical() {
    let service = service();

    let response = service
        .execute_query(
            service.principal("steve"),
            "{ a: customers { id profile { customerId } } b: customers { id profile { customerId } } }",
        )
        .await;

    let data = response.data.into_json().unwrap();
    assert_eq!(data["a"], data["b"]);
    assert_eq!(data["a"][1]["profile"]["customerId"], 2);
}

#[tokio::test(start_paused = true)]
async fn bounded_greetings_complete_after_ten_events() {
    let service = service();

    let handle = assert_ok!(
        service
            .subscribe(service.principal("pallab"), "subscription { greetings { greeting } }")
            .await
    );
    let events: Vec<_> = handle.collect().await;

    assert_eq!(events.len(), 10);
    let events: Vec<_> = events.into_iter().map(|e| e.unwrap()).collect();
    assert_eq!(
        events.iter().map(|e| e.seq).collect::<Vec<_>>(),
        (0..10).collect::<Vec<_>>()
    );
    assert!(events.windows(2).all(|w| w[0].elapsed < w[1].elapsed));
    assert!(events[0].elapsed >= Duration::from_secs(1));
    assert!(events[9].elapsed >= Duration::from_secs(10));

    let text = events[0].data.clone().into_json().unwrap();
    assert!(text["greetings"]["greeting"]
        .as_str()
        .unwrap()
        .starts_with("Hello from stream @ "));
}

#[tokio::test(start_paused = true)]
async fn unbounded_counter_stops_when_closed() {
    let config = assert_ok!(Config::from_json_str(
        r#"{ "subscription": { "interval_ms": 100, "limit": 3 } }"#
    ));
    let service = assert_ok!(GraphQLService::new(&config));

    let mut handle = assert_ok!(
        service
            .subscribe(service.principal("pallab"), "subscription { counter }")
            .await
    );

    let mut seen = Vec::new();
    for _ in 0..5 {
        let event = handle.next().await.unwrap().unwrap();
        seen.push(event.data.into_json().unwrap()["counter"].clone());
    }
    assert_eq!(seen, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);

    handle.close();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(handle.next().await.is_none());
}

#[tokio::test]
async fn subscribing_with_a_query_is_refused() {
    let service = service();

    let err = assert_err!(service.subscribe(service.principal("pallab"), "{ hello }").await);
    assert_eq!(err.kind(), ErrorKind::Schema);
}

#[tokio::test(start_paused = true)]
async fn cancelled_execution_reports_nothing() {
    let service = service();
    let token = CancellationToken::new();
    token.cancel();

    let result = service
        .execute_cancellable(service.principal("arnold"), "{ students { id } }", &token)
        .await;

    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn unbatched_lists_can_be_denied() {
    let config = assert_ok!(Config::from_json_str(
        r#"{ "schema": { "deny_unbatched_lists": true } }"#
    ));

    let err = assert_err!(GraphQLService::new(&config));
    assert!(err.to_string().contains("profile"));
}
