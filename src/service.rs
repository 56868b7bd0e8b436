use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{authorize, Principal, PrincipalDirectory};
use crate::config::Config;
use crate::domain::{build_schema, AppData, DataSource, FixtureSource, RotatingSource, SchoolData, Student};
use crate::error::{Result, SchemaError};
use crate::registry::{FieldCoordinate, Schema};
use crate::request::Request;
use crate::response::Response;
use crate::store::Store;
use crate::subscription::SubscriptionHandle;

/// Entry point for the transport layer: takes query text and a principal,
/// hands back a response or a live subscription.
#[derive(Clone)]
pub struct GraphQLService {
    schema: Schema<AppData>,
    store: Arc<Store<SchoolData>>,
    source: Arc<dyn DataSource>,
    directory: PrincipalDirectory,
}

impl GraphQLService {
    pub fn new(config: &Config) -> Result<Self, SchemaError> {
        let source: Arc<dyn DataSource> = match RotatingSource::new(config.departments.clone()) {
            Some(rotating) => Arc::new(rotating),
            None => Arc::new(FixtureSource),
        };
        Self::with_source(config, source)
    }

    pub fn with_source(config: &Config, source: Arc<dyn DataSource>) -> Result<Self, SchemaError> {
        let schema = build_schema(config)?;
        let store = Arc::new(Store::new(SchoolData::seeded(source.as_ref())));
        let directory = PrincipalDirectory::from_users(&config.users());

        tracing::info!(source = ?source, "service ready");
        Ok(Self {
            schema,
            store,
            source,
            directory,
        })
    }

    /// Looks up a known user; unknown names get no roles.
    pub fn principal(&self, name: &str) -> Arc<Principal> {
        Arc::new(self.directory.resolve(name))
    }

    pub fn schema(&self) -> &Schema<AppData> {
        &self.schema
    }

    pub fn store(&self) -> &Store<SchoolData> {
        &self.store
    }

    async fn context(&self) -> Arc<AppData> {
        Arc::new(AppData::new(self.store.clone(), self.source.clone()).await)
    }

    pub async fn execute(&self, principal: Arc<Principal>, request: Request) -> Response {
        let data = self.context().await;
        self.schema.execute(data, principal, request).await
    }

    pub async fn execute_query(&self, principal: Arc<Principal>, query: &str) -> Response {
        match Request::parse(query) {
            Ok(request) => self.execute(principal, request).await,
            Err(err) => err.into(),
        }
    }

    pub async fn execute_with_variables(
        &self,
        principal: Arc<Principal>,
        query: &str,
        operation_name: Option<&str>,
        variables: serde_json::Value,
    ) -> Response {
        match Request::parse_with(query, operation_name, Some(variables)) {
            Ok(request) => self.execute(principal, request).await,
            Err(err) => err.into(),
        }
    }

    /// Runs `query` until it completes or `token` fires, whichever is first.
    pub async fn execute_cancellable(
        &self,
        principal: Arc<Principal>,
        query: &str,
        token: &CancellationToken,
    ) -> Result<Response> {
        let request = match Request::parse(query) {
            Ok(request) => request,
            Err(err) => return Ok(err.into()),
        };
        let data = self.context().await;
        self.schema
            .execute_cancellable(data, principal, request, token)
            .await
    }

    pub async fn subscribe(&self, principal: Arc<Principal>, query: &str) -> Result<SubscriptionHandle> {
        let request = Request::parse(query)?;
        let data = self.context().await;
        self.schema.subscribe(data, principal, request)
    }

    /// Enrolls a student outside of a query, under the same access rule as
    /// the `addStudent` mutation.
    pub async fn add_student(&self, principal: &Principal, name: &str) -> Result<Student> {
        let coordinate = FieldCoordinate::new(crate::domain::schema::MUTATION, "addStudent");
        let field = self.schema.field(&coordinate)?;
        authorize(principal, field.policy(), &coordinate.to_string())?;

        self.context().await.create_student(name).await
    }
}

impl std::fmt::Debug for GraphQLService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQLService")
            .field("types", &self.schema.type_names().collect::<Vec<_>>())
            .field("source", &self.source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_service_executes_query_text() {
        let service = GraphQLService::new(&Config::default()).unwrap();

        let response = service
            .execute_query(service.principal("pallab"), "{ hello helloWithName(name: \"Kim\") }")
            .await;

        assert!(response.is_ok());
        assert_eq!(
            response.data.into_json().unwrap(),
            serde_json::json!({ "hello": "Hellowwww.............", "helloWithName": "Hello...Kim" })
        );
    }

    #[tokio::test]
    async fn test_parse_error_is_a_schema_error() {
        let service = GraphQLService::new(&Config::default()).unwrap();

        let response = service
            .execute_query(service.principal("arnold"), "{ hello ")
            .await;

        assert_eq!(response.data, async_graphql_value::ConstValue::Null);
        assert_eq!(response.errors_of(ErrorKind::Schema).count(), 1);
    }

    #[tokio::test]
    async fn test_add_student_checks_roles() {
        let service = GraphQLService::new(&Config::default()).unwrap();

        let err = service
            .add_student(&Principal::anonymous(), "D Student")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(service.store().snapshot().await.students.len(), 3);

        let student = service
            .add_student(&service.principal("pallab"), "D Student")
            .await
            .unwrap();
        assert_eq!(student.id, 4);
    }

    #[tokio::test]
    async fn test_rotating_departments_from_config() {
        let config = Config::from_json_str(r#"{ "departments": ["Physics"] }"#).unwrap();
        let service = GraphQLService::new(&config).unwrap();

        let data = service.store().snapshot().await;
        assert!(data.departments.list().iter().all(|d| d.name == "Physics"));
    }
}
