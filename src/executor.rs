//! Query execution.
//!
//! Execution walks the selection tree breadth first. A level is every group
//! of parents found at one depth, whichever field they were reached through.
//! DIRECT fields run once per parent; a BATCH field runs once for the whole
//! level. Sibling fields resolve concurrently, and once the deepest level is
//! done the objects are assembled bottom-up in request order.

use std::fmt;
use std::sync::Arc;

use async_graphql::Name;
use async_graphql_value::ConstValue;
use futures::future::join_all;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::auth::{authorize, Principal};
use crate::context::{BatchCtx, Ctx};
use crate::error::{Error, Result, SchemaError};
use crate::loader::BoxFuture;
use crate::registry::{
    BatchFn, DirectFn, FieldCoordinate, Object, Resolver, Schema, SchemaInner, SlotResult, TypeRef,
};
use crate::request::{Arguments, OperationKind, Request, Selection};
use crate::response::{FieldError, Path, Response};
use crate::subscription::{Emission, SubscriptionHandle};

const TYPENAME: &str = "__typename";

/// Lifecycle of one execution, reported through tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parsed,
    Authorizing,
    Resolving,
    Merged,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Parsed => "parsed",
            Phase::Authorizing => "authorizing",
            Phase::Resolving => "resolving",
            Phase::Merged => "merged",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

type ObjectMap = IndexMap<Name, ConstValue>;

/// A parent value waiting for its selection set to be resolved.
#[derive(Debug, Clone)]
struct Slot {
    path: Path,
    value: ConstValue,
}

/// Parents of one object type that share a selection set. Every level of
/// an execution is a list of groups; children of one field of one group
/// form one group of the next level.
struct Group<'s, C> {
    object: &'s Object<C>,
    slots: Vec<Slot>,
    selections: &'s [Selection],
}

/// Where the children of one parent slot ended up in the next level.
enum Shape {
    Failed,
    Null,
    One(usize),
    Many(Vec<Option<usize>>),
}

/// One selected field across every slot of a group.
enum Resolved {
    /// Final values. `None` marks a failed slot; its error is already
    /// recorded.
    Values(Vec<Option<ConstValue>>),
    /// Object values whose selection continues in group `child` of the
    /// next level.
    Nested { shapes: Vec<Shape>, child: Option<usize> },
}

impl Resolved {
    /// Swaps child slot indices for the objects assembled one level down.
    fn into_values(self, below: &mut [Vec<Option<ObjectMap>>]) -> Vec<Option<ConstValue>> {
        let (shapes, child) = match self {
            Resolved::Values(values) => return values,
            Resolved::Nested { shapes, child } => (shapes, child),
        };

        let mut take = |idx: usize| {
            child
                .and_then(|group| below[group][idx].take())
                .map(ConstValue::Object)
        };
        shapes
            .into_iter()
            .map(|shape| match shape {
                Shape::Failed => None,
                Shape::Null => Some(ConstValue::Null),
                Shape::One(idx) => take(idx),
                Shape::Many(items) => Some(ConstValue::List(
                    items
                        .into_iter()
                        .map(|item| item.and_then(&mut take).unwrap_or(ConstValue::Null))
                        .collect(),
                )),
            })
            .collect()
    }
}

/// How one selected field of one group gets its raw results.
enum Plan<'f, C> {
    Ready(Vec<SlotResult>),
    Direct(&'f DirectFn<C>),
    Batch(FieldCoordinate, &'f BatchFn<C>),
}

/// Every group of a level that selects the same batch field with the same
/// arguments.
struct Batch<'b, C> {
    coordinate: FieldCoordinate,
    load: &'b BatchFn<C>,
    arguments: &'b Arguments,
    members: Vec<(usize, usize)>,
}

/// Raw results of field `field` for every slot of group `group`.
struct Delivery {
    group: usize,
    field: usize,
    results: Vec<SlotResult>,
}

struct Execution<'a, C> {
    schema: &'a SchemaInner<C>,
    data: Arc<C>,
    principal: Arc<Principal>,
}

impl<'a, C: Send + Sync + 'static> Execution<'a, C> {
    /// Resolves the root selections. Mutation roots run one after another,
    /// each with its whole subtree; query roots resolve together.
    async fn run_root<'s>(
        &self,
        root: &'s Object<C>,
        selections: &'s [Selection],
        serial: bool,
        errors: &mut Vec<FieldError>,
    ) -> Option<ObjectMap>
    where
        'a: 's,
    {
        let group = |selections: &'s [Selection]| Group {
            object: root,
            slots: vec![Slot {
                path: Path::root(),
                value: ConstValue::Null,
            }],
            selections,
        };

        if !serial {
            return single(self.run(vec![group(selections)], errors).await);
        }

        let mut data = ObjectMap::new();
        for selection in selections {
            let object = single(
                self.run(vec![group(std::slice::from_ref(selection))], errors)
                    .await,
            )?;
            data.extend(object);
        }
        Some(data)
    }

    /// Resolves `first` and every level below it, then assembles the
    /// objects of each group of `first` bottom-up.
    async fn run<'s>(
        &self,
        first: Vec<Group<'s, C>>,
        errors: &mut Vec<FieldError>,
    ) -> Vec<Vec<Option<ObjectMap>>>
    where
        'a: 's,
    {
        let mut levels: Vec<(Vec<Group<'s, C>>, Vec<Vec<Resolved>>)> = Vec::new();
        let mut current = first;

        while !current.is_empty() {
            let raw = self.resolve_level(&current).await;

            let mut next = Vec::new();
            let mut resolved = Vec::with_capacity(current.len());
            for (group, fields) in current.iter().zip(raw) {
                let mut outputs = Vec::with_capacity(fields.len());
                for (selection, results) in group.selections.iter().zip(fields) {
                    let key = selection.response_key();
                    let paths = group.slots.iter().map(|s| s.path.field(key)).collect();
                    let ty = group.object.get(&selection.name).map(|f| f.ty);
                    outputs.push(self.complete(
                        ty,
                        paths,
                        results,
                        &selection.selection_set,
                        &mut next,
                        errors,
                    ));
                }
                resolved.push(outputs);
            }

            levels.push((current, resolved));
            current = next;
        }

        let mut below: Vec<Vec<Option<ObjectMap>>> = Vec::new();
        while let Some((groups, resolved)) = levels.pop() {
            let mut assembled = Vec::with_capacity(groups.len());
            for (group, fields) in groups.iter().zip(resolved) {
                assembled.push(merge(group, fields, &mut below));
            }
            below = assembled;
        }
        below
    }

    /// Runs every field of one level. DIRECT fields resolve once per slot;
    /// a BATCH field resolves once for all slots of the level that select it
    /// with the same arguments, whichever parent field they were reached
    /// through.
    async fn resolve_level(&self, groups: &[Group<'_, C>]) -> Vec<Vec<Vec<SlotResult>>> {
        let mut raw: Vec<Vec<Vec<SlotResult>>> = groups
            .iter()
            .map(|group| vec![Vec::new(); group.selections.len()])
            .collect();
        let mut tasks: Vec<BoxFuture<'_, Vec<Delivery>>> = Vec::new();
        let mut batches: Vec<Batch<'_, C>> = Vec::new();

        for (g, group) in groups.iter().enumerate() {
            for (f, selection) in group.selections.iter().enumerate() {
                match self.plan(group, selection) {
                    Plan::Ready(results) => raw[g][f] = results,
                    Plan::Direct(resolve) => tasks.push(self.direct((g, f), group, selection, resolve)),
                    Plan::Batch(coordinate, load) => {
                        let arguments = &selection.arguments;
                        match batches
                            .iter_mut()
                            .find(|b| b.coordinate == coordinate && b.arguments == arguments)
                        {
                            Some(batch) => batch.members.push((g, f)),
                            None => batches.push(Batch {
                                coordinate,
                                load,
                                arguments,
                                members: vec![(g, f)],
                            }),
                        }
                    }
                }
            }
        }
        tasks.extend(batches.into_iter().map(|batch| self.batch(groups, batch)));

        for delivery in join_all(tasks).await.into_iter().flatten() {
            raw[delivery.group][delivery.field] = delivery.results;
        }
        raw
    }

    fn plan(&self, group: &Group<'_, C>, selection: &Selection) -> Plan<'a, C> {
        let parents = group.slots.len();
        if selection.name == TYPENAME {
            return Plan::Ready(vec![Ok(ConstValue::String(group.object.name.clone())); parents]);
        }

        let coordinate = FieldCoordinate::new(&group.object.name, &selection.name);
        let field = match self.schema.field(&coordinate) {
            Ok(field) => field,
            Err(err) => return Plan::Ready(vec![Err(Arc::new(err.into())); parents]),
        };

        tracing::trace!(%coordinate, phase = %Phase::Authorizing, parents);
        if let Err(err) = authorize(&self.principal, &field.policy, &coordinate.to_string()) {
            return Plan::Ready(vec![Err(Arc::new(err)); parents]);
        }

        tracing::trace!(%coordinate, phase = %Phase::Resolving, mode = ?field.mode());
        match &field.resolver {
            Resolver::Direct(resolve) => Plan::Direct(resolve),
            Resolver::Batch(load) => Plan::Batch(coordinate, load),
            Resolver::Stream(_) => {
                let err = Error::from(SchemaError::Unsupported {
                    message: format!("{} can only be subscribed to", coordinate),
                });
                Plan::Ready(vec![Err(Arc::new(err)); parents])
            }
        }
    }

    fn direct<'b>(
        &'b self,
        (group_idx, field): (usize, usize),
        group: &'b Group<'_, C>,
        selection: &'b Selection,
        resolve: &'b DirectFn<C>,
    ) -> BoxFuture<'b, Vec<Delivery>> {
        Box::pin(async move {
            let results = join_all(group.slots.iter().map(|slot| {
                let ctx = Ctx::new(
                    self.data.clone(),
                    self.principal.clone(),
                    parent_of(slot),
                    selection.arguments.clone(),
                );
                let fut = resolve(ctx);
                async move { fut.await.map_err(Arc::new) }
            }))
            .await;

            vec![Delivery {
                group: group_idx,
                field,
                results,
            }]
        })
    }

    fn batch<'b>(&'b self, groups: &'b [Group<'_, C>], batch: Batch<'b, C>) -> BoxFuture<'b, Vec<Delivery>> {
        Box::pin(async move {
            let parents: Vec<ConstValue> = batch
                .members
                .iter()
                .flat_map(|&(g, _)| groups[g].slots.iter().map(|slot| slot.value.clone()))
                .collect();
            tracing::trace!(
                coordinate = %batch.coordinate,
                groups = batch.members.len(),
                parents = parents.len(),
                "level batch"
            );

            let ctx = BatchCtx::new(
                self.data.clone(),
                self.principal.clone(),
                batch.arguments.clone(),
            );
            let mut results = (batch.load)(ctx, parents).await.into_iter();

            batch
                .members
                .into_iter()
                .map(|(group, field)| Delivery {
                    group,
                    field,
                    results: results.by_ref().take(groups[group].slots.len()).collect(),
                })
                .collect()
        })
    }

    /// Turns raw resolver results into final values. Object values become
    /// one group of the next level, pushed onto `next`.
    fn complete<'s>(
        &self,
        ty: Option<TypeRef>,
        paths: Vec<Path>,
        results: Vec<SlotResult>,
        selection_set: &'s [Selection],
        next: &mut Vec<Group<'s, C>>,
        errors: &mut Vec<FieldError>,
    ) -> Resolved
    where
        'a: 's,
    {
        let ty = match ty {
            Some(ty) if !ty.scalar && !selection_set.is_empty() => ty,
            _ => {
                let values = paths
                    .into_iter()
                    .zip(results)
                    .map(|(path, result)| match result {
                        Ok(value) => Some(value),
                        Err(err) => {
                            errors.push(FieldError::new(path, &err));
                            None
                        }
                    })
                    .collect();
                return Resolved::Values(values);
            }
        };

        let mut children = Vec::new();
        let shapes: Vec<Shape> = paths
            .into_iter()
            .zip(results)
            .map(|(path, result)| match result {
                Err(err) => {
                    errors.push(FieldError::new(path, &err));
                    Shape::Failed
                }
                Ok(ConstValue::Null) => Shape::Null,
                Ok(ConstValue::List(items)) => Shape::Many(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(idx, value)| {
                            if value == ConstValue::Null {
                                return None;
                            }
                            children.push(Slot {
                                path: path.index(idx),
                                value,
                            });
                            Some(children.len() - 1)
                        })
                        .collect(),
                ),
                Ok(value) => {
                    children.push(Slot { path, value });
                    Shape::One(children.len() - 1)
                }
            })
            .collect();

        if children.is_empty() {
            return Resolved::Nested { shapes, child: None };
        }

        match self.schema.object(ty.name) {
            Ok(object) => {
                next.push(Group {
                    object,
                    slots: children,
                    selections: selection_set,
                });
                Resolved::Nested {
                    shapes,
                    child: Some(next.len() - 1),
                }
            }
            Err(err) => {
                let err = Error::from(err);
                errors.extend(children.into_iter().map(|c| FieldError::new(c.path, &err)));
                Resolved::Nested { shapes, child: None }
            }
        }
    }
}

/// The only object of a run seeded with one single-slot group.
fn single(groups: Vec<Vec<Option<ObjectMap>>>) -> Option<ObjectMap> {
    groups.into_iter().next()?.into_iter().next().flatten()
}

fn parent_of(slot: &Slot) -> Option<ConstValue> {
    match slot.value {
        ConstValue::Null => None,
        ref value => Some(value.clone()),
    }
}

/// Assembles one object per slot of `group` in requested field order. A
/// failed required field nulls its whole object.
fn merge<C>(
    group: &Group<'_, C>,
    fields: Vec<Resolved>,
    below: &mut [Vec<Option<ObjectMap>>],
) -> Vec<Option<ObjectMap>> {
    let mut objects: Vec<Option<ObjectMap>> = (0..group.slots.len()).map(|_| Some(IndexMap::new())).collect();

    for (selection, resolved) in group.selections.iter().zip(fields) {
        let required = group
            .object
            .get(&selection.name)
            .map(|f| f.is_required())
            .unwrap_or(false);
        let key = Name::new(selection.response_key());

        for (slot, value) in objects.iter_mut().zip(resolved.into_values(below)) {
            let Some(map) = slot.as_mut() else {
                continue;
            };
            match value {
                Some(value) => {
                    map.insert(key.clone(), value);
                }
                None if required => *slot = None,
                None => {
                    map.insert(key.clone(), ConstValue::Null);
                }
            }
        }
    }

    objects
}

impl<C: Send + Sync + 'static> Schema<C> {
    /// Executes a query or mutation. Field failures are reported next to a
    /// partial result; request-level problems yield `data: null`.
    pub async fn execute(&self, data: Arc<C>, principal: Arc<Principal>, request: Request) -> Response {
        let token = CancellationToken::new();
        match self
            .execute_cancellable(data, principal, request, &token)
            .await
        {
            Ok(response) => response,
            Err(err) => Response::from_error(&err),
        }
    }

    /// Like [`Schema::execute`], but gives up as soon as `token` is cancelled.
    /// Results of loads still in flight at that point are discarded.
    pub async fn execute_cancellable(
        &self,
        data: Arc<C>,
        principal: Arc<Principal>,
        request: Request,
        token: &CancellationToken,
    ) -> Result<Response> {
        tracing::debug!(operation = ?request.operation, principal = principal.name(), phase = %Phase::Parsed);

        let root = match self.prepare(&request) {
            Ok(root) => root,
            Err(err) => {
                tracing::debug!(phase = %Phase::Failed, error = %err);
                return Ok(Response::from_error(&Error::from(err)));
            }
        };

        let execution = Execution {
            schema: &self.inner,
            data,
            principal,
        };
        let serial = request.operation == OperationKind::Mutation;

        let mut errors = Vec::new();
        let resolved = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(phase = %Phase::Failed, "execution cancelled");
                return Err(Error::Cancelled);
            }
            resolved = execution.run_root(root, &request.selections, serial, &mut errors) => resolved,
        };
        tracing::debug!(phase = %Phase::Merged, errors = errors.len());

        let data = resolved.map(ConstValue::Object).unwrap_or(ConstValue::Null);

        tracing::debug!(phase = %Phase::Done);
        Ok(Response { data, errors })
    }

    /// Opens a subscription. The request must select exactly one field of
    /// the subscription type; each event carries that field's value projected
    /// through its selection set.
    pub fn subscribe(
        &self,
        data: Arc<C>,
        principal: Arc<Principal>,
        request: Request,
    ) -> Result<SubscriptionHandle> {
        self.prepare(&request)?;

        let [selection] = request.selections.as_slice() else {
            return Err(SchemaError::Unsupported {
                message: "a subscription must select exactly one field".to_string(),
            }
            .into());
        };
        let root = self.inner.subscription.as_deref().unwrap_or_default();
        let coordinate = FieldCoordinate::new(root, &selection.name);
        let field = self.inner.field(&coordinate)?;

        authorize(&principal, &field.policy, &coordinate.to_string())?;

        let Resolver::Stream(func) = &field.resolver else {
            return Err(SchemaError::Unsupported {
                message: format!("{} is not a stream", coordinate),
            }
            .into());
        };
        let pacing = field.pacing.unwrap_or(self.inner.pacing);
        let func = func.clone();
        let ty = field.ty;

        tracing::debug!(%coordinate, principal = principal.name(), ?pacing, "subscription opened");

        let schema = self.clone();
        let selection = selection.clone();
        let ctx = Ctx::new(data.clone(), principal.clone(), None, selection.arguments.clone());

        Ok(SubscriptionHandle::open(pacing, move |tick| {
            let schema = schema.clone();
            let selection = selection.clone();
            let data = data.clone();
            let principal = principal.clone();
            let payload = func(ctx.clone(), tick);

            async move {
                let path = Path::root().field(selection.response_key());
                let payload = payload.await.map_err(|err| FieldError::new(path.clone(), &err))?;

                let execution = Execution {
                    schema: &schema.inner,
                    data,
                    principal,
                };
                let mut errors = Vec::new();
                let mut next = Vec::new();
                let resolved = execution.complete(
                    Some(ty),
                    vec![path],
                    vec![Ok(payload)],
                    &selection.selection_set,
                    &mut next,
                    &mut errors,
                );
                let mut below = execution.run(next, &mut errors).await;

                let value = resolved
                    .into_values(&mut below)
                    .into_iter()
                    .next()
                    .flatten()
                    .unwrap_or(ConstValue::Null);
                Ok::<_, FieldError>(Emission {
                    data: ConstValue::Object(IndexMap::from([(
                        Name::new(selection.response_key()),
                        value,
                    )])),
                    errors,
                })
            }
        }))
    }

    /// Picks the root type for the operation and checks the whole selection
    /// tree against the registry before anything runs.
    fn prepare(&self, request: &Request) -> Result<&Object<C>, SchemaError> {
        let root = match request.operation {
            OperationKind::Query => Some(self.inner.query.as_str()),
            OperationKind::Mutation => self.inner.mutation.as_deref(),
            OperationKind::Subscription => self.inner.subscription.as_deref(),
        }
        .ok_or_else(|| SchemaError::Unsupported {
            message: format!("the schema has no {:?} type", request.operation),
        })?;

        if request.selections.is_empty() {
            return Err(SchemaError::ParseError {
                message: "empty selection set".to_string(),
            });
        }

        let object = self.inner.object(root)?;
        self.validate(object, &request.selections)?;
        Ok(object)
    }

    fn validate(&self, object: &Object<C>, selections: &[Selection]) -> Result<(), SchemaError> {
        for selection in selections {
            if selection.name == TYPENAME {
                if !selection.selection_set.is_empty() {
                    return Err(SchemaError::ParseError {
                        message: format!("{} has no fields", TYPENAME),
                    });
                }
                continue;
            }

            let field = object
                .get(&selection.name)
                .ok_or_else(|| SchemaError::UnknownField {
                    type_name: object.name.clone(),
                    field: selection.name.clone(),
                })?;
            let coordinate = FieldCoordinate::new(&object.name, &selection.name);

            match (field.ty.scalar, selection.selection_set.is_empty()) {
                (true, false) => {
                    return Err(SchemaError::ParseError {
                        message: format!("{} is a scalar and has no fields", coordinate),
                    })
                }
                (false, true) => {
                    return Err(SchemaError::ParseError {
                        message: format!("{} needs a selection of subfields", coordinate),
                    })
                }
                (false, false) => {
                    let child = self.inner.object(field.ty.name)?;
                    self.validate(child, &selection.selection_set)?;
                }
                (true, true) => {}
            }
        }
        Ok(())
    }
}
