pub mod auth;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod executor;
pub mod loader;
pub mod registry;
pub mod request;
pub mod response;
pub mod service;
pub mod store;
pub mod subscription;

pub use async_graphql_value::ConstValue;
pub use auth::{authorize, AccessPolicy, Principal, PrincipalDirectory, UserConfig};
pub use config::Config;
pub use context::{BatchCtx, Ctx, FromConstValue, GraphQLType, ToConstValue};
pub use error::{Error, ErrorKind, Result, SchemaError};
pub use executor::Phase;
pub use loader::{BatchLoader, BatchOutcome, BoxFuture};
pub use registry::{Field, FieldCoordinate, Object, ResolveMode, Schema, SchemaBuilder, TypeRef};
pub use request::{Arguments, OperationKind, Request, Selection};
pub use response::{FieldError, Path, PathSegment, Response};
pub use service::GraphQLService;
pub use store::{Entity, EntityId, Linked, Store, Table};
pub use subscription::{Event, Pacing, SubscriptionHandle, Tick};
pub use tokio_util::sync::CancellationToken;
