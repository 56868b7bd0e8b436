use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::error::{Error, Result};
use crate::store::Entity;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-parent results of one batch load, keyed by parent identity in
/// first-seen order.
#[derive(Debug)]
pub struct BatchOutcome<P, V> {
    entries: IndexMap<P, Result<V, Arc<Error>>>,
}

impl<P: Hash + Eq, V> BatchOutcome<P, V> {
    pub fn get(&self, parent: &P) -> Result<&V, Arc<Error>> {
        match self.entries.get(parent) {
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => Err(err.clone()),
            None => Err(Arc::new(Error::Internal(anyhow::anyhow!(
                "parent was not part of the batch"
            )))),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn parents(&self) -> impl Iterator<Item = &P> {
        self.entries.keys()
    }
}

/// Loads one field for a whole set of parents with a single fetch.
///
/// Parents are deduplicated by identity before the fetch runs, so the fetch
/// only ever sees each parent once. Every distinct parent gets an entry in
/// the outcome; a parent the fetch did not answer for gets its own
/// `NotFound` entry without affecting the others.
#[derive(Debug, Clone)]
pub struct BatchLoader {
    field: String,
}

impl BatchLoader {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub async fn load<P, V, F, Fut>(
        &self,
        parents: impl IntoIterator<Item = P>,
        fetch: F,
    ) -> BatchOutcome<P, V>
    where
        P: Entity + Hash + Eq + Clone,
        F: FnOnce(Vec<P>) -> Fut,
        Fut: Future<Output = Result<HashMap<P, V>>>,
    {
        let mut requested = 0usize;
        let distinct: IndexSet<P> = parents
            .into_iter()
            .inspect(|_| requested += 1)
            .collect();

        if distinct.is_empty() {
            return BatchOutcome {
                entries: IndexMap::new(),
            };
        }

        tracing::debug!(
            field = %self.field,
            parent = P::KIND,
            requested,
            distinct = distinct.len(),
            "batch load"
        );

        let entries = match fetch(distinct.iter().cloned().collect()).await {
            Ok(mut found) => distinct
                .into_iter()
                .map(|parent| {
                    let entry = found.remove(&parent).ok_or_else(|| {
                        Arc::new(Error::not_found(
                            format!("{}.{}", P::KIND, self.field),
                            parent.id(),
                        ))
                    });
                    (parent, entry)
                })
                .collect(),
            Err(err) => {
                tracing::debug!(field = %self.field, error = %err, "batch load failed");
                let err = Arc::new(err);
                distinct
                    .into_iter()
                    .map(|parent| (parent, Err(err.clone())))
                    .collect()
            }
        };

        BatchOutcome { entries }
    }
}
