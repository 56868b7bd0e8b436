//! In-memory entity store.
//!
//! A [`Store`] publishes its whole dataset as an immutable `Arc` snapshot.
//! Readers grab the current snapshot once and keep it for the duration of an
//! execution; writers are serialized behind a lock, mutate a private copy and
//! swap it in only when the whole write succeeded. A failed write therefore
//! leaves no trace, and a write that lands mid-execution is invisible to it.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{Error, Result};

pub type EntityId = i64;

/// A stored record with a stable identity.
///
/// Batch keying hashes records by identity alone; implement `Eq`/`Hash` with
/// [`identity_eq!`](crate::identity_eq) rather than deriving them.
pub trait Entity {
    const KIND: &'static str;

    fn id(&self) -> EntityId;
}

/// A record that points at another record by holding its identity.
pub trait Linked: Entity {
    fn linked_id(&self) -> EntityId;
}

#[macro_export]
macro_rules! identity_eq {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ::std::cmp::PartialEq for $ty {
                fn eq(&self, other: &Self) -> bool {
                    $crate::store::Entity::id(self) == $crate::store::Entity::id(other)
                }
            }

            impl ::std::cmp::Eq for $ty {}

            impl ::std::hash::Hash for $ty {
                fn hash<H: ::std::hash::Hasher>(&self, state: &mut H) {
                    ::std::hash::Hash::hash(&$crate::store::Entity::id(self), state)
                }
            }
        )+
    };
}

/// Append-only sequence of one entity kind with its identity counter.
#[derive(Debug, Clone)]
pub struct Table<T> {
    rows: Vec<T>,
    next_id: EntityId,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            next_id: 1,
        }
    }
}

impl<T: Entity + Clone> Table<T> {
    /// Assigns the next identity, builds the record and appends it.
    pub fn create(&mut self, build: impl FnOnce(EntityId) -> T) -> T {
        let id = self.next_id;
        self.next_id += 1;

        let row = build(id);
        debug_assert_eq!(row.id(), id, "{} built with a foreign id", T::KIND);
        self.rows.push(row.clone());
        row
    }

    /// Rows in insertion order.
    pub fn list(&self) -> &[T] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last_id(&self) -> Option<EntityId> {
        self.rows.last().map(Entity::id)
    }

    pub fn find(&self, id: EntityId) -> Result<&T> {
        // ids are handed out in increasing order, so rows stay sorted
        self.rows
            .binary_search_by_key(&id, Entity::id)
            .map(|idx| &self.rows[idx])
            .map_err(|_| Error::not_found(T::KIND, id))
    }
}

impl<T: Linked + Clone> Table<T> {
    /// First row, in insertion order, linked to `id`.
    pub fn find_linked(&self, id: EntityId) -> Result<&T> {
        self.rows
            .iter()
            .find(|row| row.linked_id() == id)
            .ok_or_else(|| Error::not_found(T::KIND, id))
    }
}

#[derive(Debug)]
pub struct Store<S> {
    state: RwLock<Arc<S>>,
}

impl<S: Clone + Send + Sync> Store<S> {
    pub fn new(initial: S) -> Self {
        Self {
            state: RwLock::new(Arc::new(initial)),
        }
    }

    /// A consistent view of the dataset; later writes never show up in it.
    pub async fn snapshot(&self) -> Arc<S> {
        self.state.read().await.clone()
    }

    /// Runs `apply` against a private copy and publishes it if `apply`
    /// succeeds. Writers never interleave.
    pub async fn write<R>(&self, apply: impl FnOnce(&mut S) -> Result<R>) -> Result<R> {
        self.commit(apply).await.map(|(result, _)| result)
    }

    /// Like [`Store::write`], also returning the snapshot the write published.
    pub async fn commit<R>(&self, apply: impl FnOnce(&mut S) -> Result<R>) -> Result<(R, Arc<S>)> {
        let mut state = self.state.write().await;

        let mut next = Arc::clone(&state);
        let result = apply(Arc::make_mut(&mut next))?;
        *state = next.clone();

        Ok((result, next))
    }
}
