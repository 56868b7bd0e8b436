//! Field resolver registry.
//!
//! Types are registered as [`Object`]s holding [`Field`]s, in the same shape
//! as `async_graphql::dynamic`. Every field carries its resolution mode and
//! its access policy; [`SchemaBuilder::finish`] checks the whole registry up
//! front so that dangling type references surface before any query runs.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use async_graphql_value::ConstValue;
use indexmap::IndexMap;

use crate::auth::AccessPolicy;
use crate::context::{BatchCtx, Ctx, FromConstValue, GraphQLType, ToConstValue};
use crate::error::{Error, Result, SchemaError};
use crate::loader::{BatchLoader, BoxFuture};
use crate::store::Entity;
use crate::subscription::{Pacing, Tick};

pub type SlotResult = std::result::Result<ConstValue, Arc<Error>>;

pub(crate) type DirectFn<C> =
    Arc<dyn Fn(Ctx<C>) -> BoxFuture<'static, Result<ConstValue>> + Send + Sync>;
pub(crate) type BatchFn<C> =
    Arc<dyn Fn(BatchCtx<C>, Vec<ConstValue>) -> BoxFuture<'static, Vec<SlotResult>> + Send + Sync>;
pub(crate) type StreamFn<C> =
    Arc<dyn Fn(Ctx<C>, Tick) -> BoxFuture<'static, Result<ConstValue>> + Send + Sync>;

/// A strongly typed `(type, field)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldCoordinate {
    pub type_name: String,
    pub field: String,
}

impl FieldCoordinate {
    pub fn new(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRef {
    pub name: &'static str,
    pub scalar: bool,
    pub list: bool,
}

impl TypeRef {
    pub fn of<T: GraphQLType>() -> Self {
        Self {
            name: T::TYPE_NAME,
            scalar: T::IS_SCALAR,
            list: T::IS_LIST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    Direct,
    Batch,
    Stream,
}

pub(crate) enum Resolver<C> {
    Direct(DirectFn<C>),
    Batch(BatchFn<C>),
    Stream(StreamFn<C>),
}

impl<C> Resolver<C> {
    fn mode(&self) -> ResolveMode {
        match self {
            Resolver::Direct(_) => ResolveMode::Direct,
            Resolver::Batch(_) => ResolveMode::Batch,
            Resolver::Stream(_) => ResolveMode::Stream,
        }
    }
}

pub struct Field<C> {
    pub(crate) name: String,
    pub(crate) ty: TypeRef,
    pub(crate) resolver: Resolver<C>,
    pub(crate) policy: AccessPolicy,
    pub(crate) required: bool,
    pub(crate) pacing: Option<Pacing>,
}

impl<C> fmt::Debug for Field<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("mode", &self.resolver.mode())
            .field("policy", &self.policy)
            .field("required", &self.required)
            .field("pacing", &self.pacing)
            .finish()
    }
}

impl<C: Send + Sync + 'static> Field<C> {
    /// A DIRECT field, resolved once per parent.
    pub fn new<R, F, Fut>(name: impl Into<String>, resolver: F) -> Self
    where
        R: ToConstValue + GraphQLType,
        F: Fn(Ctx<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let func: DirectFn<C> = Arc::new(move |ctx: Ctx<C>| -> BoxFuture<'static, Result<ConstValue>> {
            let fut = resolver(ctx);
            Box::pin(async move { fut.await.map(|value| value.to_const_value()) })
        });

        Self::with_resolver(name, TypeRef::of::<R>(), Resolver::Direct(func))
    }

    /// A DIRECT field that reads the same-named key off the parent object.
    pub fn property<R: GraphQLType>(name: impl Into<String>) -> Self {
        let name = name.into();
        let key = name.clone();
        let func: DirectFn<C> = Arc::new(move |ctx: Ctx<C>| -> BoxFuture<'static, Result<ConstValue>> {
            let value = ctx.parent_field(&key).cloned().unwrap_or(ConstValue::Null);
            Box::pin(async move { Ok(value) })
        });

        Self::with_resolver(name, TypeRef::of::<R>(), Resolver::Direct(func))
    }

    /// A BATCH field: all parents at one tree level are loaded with a single
    /// call to `loader`, which receives each distinct parent once and answers
    /// with a map keyed by parent.
    pub fn batch<P, R, F, Fut>(name: impl Into<String>, loader: F) -> Self
    where
        P: Entity + FromConstValue + Clone + Hash + Eq + Send + Sync + 'static,
        R: ToConstValue + GraphQLType + Send + 'static,
        F: Fn(BatchCtx<C>, Vec<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<P, R>>> + Send + 'static,
    {
        let name = name.into();
        let field = name.clone();
        let loader = Arc::new(loader);

        let func: BatchFn<C> = Arc::new(
            move |ctx: BatchCtx<C>, parents: Vec<ConstValue>| -> BoxFuture<'static, Vec<SlotResult>> {
                let loader = loader.clone();
                let batch = BatchLoader::new(field.clone());
                Box::pin(async move {
                    let decoded: Vec<std::result::Result<P, Arc<Error>>> = parents
                        .iter()
                        .map(|value| {
                            P::from_const_value(value).map_err(|message| {
                                Arc::new(Error::Internal(anyhow::anyhow!(
                                    "cannot read {} parent: {}",
                                    P::KIND,
                                    message
                                )))
                            })
                        })
                        .collect();

                    let outcome = batch
                        .load(
                            decoded.iter().filter_map(|p| p.as_ref().ok().cloned()),
                            move |distinct| (*loader)(ctx, distinct),
                        )
                        .await;

                    decoded
                        .into_iter()
                        .map(|parent| {
                            let parent = parent?;
                            outcome.get(&parent).map(|value| value.to_const_value())
                        })
                        .collect()
                })
            },
        );

        Self::with_resolver(name, TypeRef::of::<R>(), Resolver::Batch(func))
    }

    /// A STREAM field for the subscription root. `producer` is called once
    /// per paced tick.
    pub fn subscription<R, F, Fut>(name: impl Into<String>, producer: F) -> Self
    where
        R: ToConstValue + GraphQLType,
        F: Fn(Ctx<C>, Tick) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let func: StreamFn<C> =
            Arc::new(move |ctx: Ctx<C>, tick: Tick| -> BoxFuture<'static, Result<ConstValue>> {
                let fut = producer(ctx, tick);
                Box::pin(async move { fut.await.map(|value| value.to_const_value()) })
            });

        Self::with_resolver(name, TypeRef::of::<R>(), Resolver::Stream(func))
    }

    fn with_resolver(name: impl Into<String>, ty: TypeRef, resolver: Resolver<C>) -> Self {
        Self {
            name: name.into(),
            ty,
            resolver,
            policy: AccessPolicy::Public,
            required: false,
            pacing: None,
        }
    }
}

impl<C> Field<C> {
    pub fn guard(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Marks the field non-null: a failure nulls the enclosing object.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Overrides the schema-wide pacing of a STREAM field. Setting it on any
    /// other field is reported by [`SchemaBuilder::finish`].
    pub fn paced(mut self, pacing: Pacing) -> Self {
        self.pacing = Some(pacing);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ResolveMode {
        self.resolver.mode()
    }

    pub fn type_ref(&self) -> TypeRef {
        self.ty
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn is_required(&self) -> bool {
        self.required
    }
}

#[derive(Debug)]
pub struct Object<C> {
    pub(crate) name: String,
    pub(crate) fields: IndexMap<String, Field<C>>,
    duplicates: Vec<String>,
}

impl<C> Object<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
            duplicates: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field<C>) -> Self {
        if self.fields.contains_key(&field.name) {
            self.duplicates.push(field.name.clone());
        } else {
            self.fields.insert(field.name.clone(), field);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, field: &str) -> Option<&Field<C>> {
        self.fields.get(field)
    }
}

pub(crate) struct SchemaInner<C> {
    pub(crate) objects: IndexMap<String, Object<C>>,
    pub(crate) query: String,
    pub(crate) mutation: Option<String>,
    pub(crate) subscription: Option<String>,
    pub(crate) pacing: Pacing,
}

impl<C> SchemaInner<C> {
    pub(crate) fn object(&self, type_name: &str) -> Result<&Object<C>, SchemaError> {
        self.objects
            .get(type_name)
            .ok_or_else(|| SchemaError::UnknownType {
                type_name: type_name.to_string(),
            })
    }

    pub(crate) fn field(&self, coordinate: &FieldCoordinate) -> Result<&Field<C>, SchemaError> {
        self.object(&coordinate.type_name)?
            .get(&coordinate.field)
            .ok_or_else(|| SchemaError::UnknownField {
                type_name: coordinate.type_name.clone(),
                field: coordinate.field.clone(),
            })
    }
}

/// An immutable, validated registry. Cheap to clone and shared by every
/// execution.
pub struct Schema<C> {
    pub(crate) inner: Arc<SchemaInner<C>>,
}

impl<C> Clone for Schema<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> Schema<C> {
    pub fn build(
        query: impl Into<String>,
        mutation: Option<&str>,
        subscription: Option<&str>,
    ) -> SchemaBuilder<C> {
        SchemaBuilder {
            objects: IndexMap::new(),
            query: query.into(),
            mutation: mutation.map(str::to_string),
            subscription: subscription.map(str::to_string),
            pacing: Pacing::default(),
            deny_unbatched_lists: false,
            errors: Vec::new(),
        }
    }

    pub fn field(&self, coordinate: &FieldCoordinate) -> Result<&Field<C>, SchemaError> {
        self.inner.field(coordinate)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.inner.objects.keys().map(String::as_str)
    }
}

pub struct SchemaBuilder<C> {
    objects: IndexMap<String, Object<C>>,
    query: String,
    mutation: Option<String>,
    subscription: Option<String>,
    pacing: Pacing,
    deny_unbatched_lists: bool,
    errors: Vec<SchemaError>,
}

impl<C> SchemaBuilder<C> {
    pub fn register(mut self, object: Object<C>) -> Self {
        if self.objects.contains_key(&object.name) {
            self.errors.push(SchemaError::BuildError {
                message: format!("type '{}' is registered twice", object.name),
            });
        } else {
            self.objects.insert(object.name.clone(), object);
        }
        self
    }

    /// Pacing for STREAM fields that do not set their own.
    pub fn default_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Rejects object-returning DIRECT fields on types that appear in list
    /// position.
    pub fn deny_unbatched_lists(mut self, deny: bool) -> Self {
        self.deny_unbatched_lists = deny;
        self
    }

    pub fn finish(mut self) -> Result<Schema<C>, SchemaError> {
        if let Some(err) = self.errors.drain(..).next() {
            return Err(err);
        }

        for object in self.objects.values() {
            if let Some(field) = object.duplicates.first() {
                return Err(SchemaError::DuplicateField {
                    type_name: object.name.clone(),
                    field: field.clone(),
                });
            }
        }

        let roots: Vec<&String> = std::iter::once(&self.query)
            .chain(self.mutation.as_ref())
            .chain(self.subscription.as_ref())
            .collect();
        for root in &roots {
            if !self.objects.contains_key(root.as_str()) {
                return Err(SchemaError::UnknownType {
                    type_name: root.to_string(),
                });
            }
        }

        check_interval("the default pacing", &self.pacing)?;

        for object in self.objects.values() {
            let is_root = roots.iter().any(|r| **r == object.name);
            let is_subscription = self.subscription.as_deref() == Some(object.name.as_str());

            for field in object.fields.values() {
                let coordinate = FieldCoordinate::new(&object.name, &field.name);

                if !field.ty.scalar && !self.objects.contains_key(field.ty.name) {
                    return Err(SchemaError::BuildError {
                        message: format!(
                            "{} returns unregistered type '{}'",
                            coordinate, field.ty.name
                        ),
                    });
                }

                match field.resolver.mode() {
                    ResolveMode::Batch if is_root => {
                        return Err(SchemaError::BuildError {
                            message: format!("{} is batched but root fields have no parent", coordinate),
                        })
                    }
                    ResolveMode::Stream if !is_subscription => {
                        return Err(SchemaError::BuildError {
                            message: format!("{} streams outside the subscription type", coordinate),
                        })
                    }
                    ResolveMode::Direct | ResolveMode::Batch if is_subscription => {
                        return Err(SchemaError::BuildError {
                            message: format!("subscription field {} must stream", coordinate),
                        })
                    }
                    _ => {}
                }

                if let Some(pacing) = &field.pacing {
                    if field.resolver.mode() != ResolveMode::Stream {
                        return Err(SchemaError::BuildError {
                            message: format!("{} is paced but does not stream", coordinate),
                        });
                    }
                    check_interval(&coordinate.to_string(), pacing)?;
                }
            }
        }

        if self.deny_unbatched_lists {
            self.check_n_plus_one()?;
        }

        tracing::debug!(types = self.objects.len(), query = %self.query, "schema built");

        Ok(Schema {
            inner: Arc::new(SchemaInner {
                objects: self.objects,
                query: self.query,
                mutation: self.mutation,
                subscription: self.subscription,
                pacing: self.pacing,
            }),
        })
    }

    fn check_n_plus_one(&self) -> Result<(), SchemaError> {
        let list_context_types: HashSet<&str> = self
            .objects
            .values()
            .flat_map(|o| o.fields.values())
            .filter(|f| f.ty.list && !f.ty.scalar)
            .map(|f| f.ty.name)
            .collect();

        for object in self.objects.values() {
            if !list_context_types.contains(object.name.as_str()) {
                continue;
            }

            let unbatched: Vec<&str> = object
                .fields
                .values()
                .filter(|f| !f.ty.scalar && f.resolver.mode() == ResolveMode::Direct)
                .map(|f| f.name.as_str())
                .collect();

            if !unbatched.is_empty() {
                return Err(SchemaError::NPlusOne {
                    type_name: object.name.clone(),
                    resolver: unbatched.join(", "),
                });
            }
        }

        Ok(())
    }
}

fn check_interval(owner: &str, pacing: &Pacing) -> Result<(), SchemaError> {
    if pacing.interval.is_zero() {
        return Err(SchemaError::BuildError {
            message: format!("{} needs a pacing interval greater than zero", owner),
        });
    }
    Ok(())
}
