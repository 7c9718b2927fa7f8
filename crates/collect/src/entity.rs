//! Entity change feed.
//!
//! An [`EntityCollection`] mirrors a set of persisted entities into an
//! [`ObservableTreeList`] so that derivation pipelines can be built over them.
//! The persistence layer itself is only reached through [`EntityStore`].

use crate::base::ObservableTreeList;
use crate::collection::{CollectionRef, ObservableCollection};
use std::cell::RefCell;
use std::rc::Rc;
use strata_core::{ElementId, OperationError, Result};
use strata_tree::TreeMap;
use tracing::{debug, trace};

/// Persistence collaborator of an [`EntityCollection`].
pub trait EntityStore<E> {
    /// Identity of a persisted entity.
    type Key: Clone + Ord + 'static;

    /// Returns the identity of `entity`.
    fn key_of(&self, entity: &E) -> Self::Key;

    /// Fetches the entities with the given identities, loading `fields`.
    fn fulfill(&self, keys: &[Self::Key], fields: &[&str]) -> core::result::Result<Vec<E>, OperationError>;

    /// Persists a new entity and returns it as stored, identity included.
    fn create(&self, entity: &E) -> core::result::Result<E, OperationError>;

    /// Persists changes to an existing entity.
    fn update(&self, entity: &E) -> core::result::Result<(), OperationError>;

    /// Deletes the entity with identity `key`.
    fn delete(&self, key: &Self::Key) -> core::result::Result<(), OperationError>;
}

/// One record of a store's change feed.
#[derive(Clone, Debug, PartialEq)]
pub enum EntityChange<K, E> {
    /// A new entity was persisted.
    Created(E),
    /// An existing entity changed.
    Updated(E),
    /// The entity with this identity was deleted.
    Deleted(K),
}

/// A live collection of entities backed by an [`EntityStore`].
pub struct EntityCollection<E, S: EntityStore<E>> {
    store: S,
    list: Rc<ObservableTreeList<E>>,
    index: RefCell<TreeMap<S::Key, ElementId>>,
}

impl<E: Clone + 'static, S: EntityStore<E>> EntityCollection<E, S> {
    /// Creates an empty collection over `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            list: ObservableTreeList::new(),
            index: RefCell::new(TreeMap::new()),
        }
    }

    /// Returns the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the backing list for building pipelines.
    pub fn collection(&self) -> CollectionRef<E> {
        self.list.clone()
    }

    /// Returns the number of loaded entities.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns true if no entity is loaded.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Returns the handle of the loaded entity with identity `key`.
    pub fn element_of(&self, key: &S::Key) -> Option<ElementId> {
        let id = *self.index.borrow().get(key)?;
        if self.list.element(id).is_some() {
            Some(id)
        } else {
            self.index.borrow_mut().remove(key);
            None
        }
    }

    /// Returns the loaded entity with identity `key`.
    pub fn get(&self, key: &S::Key) -> Option<E> {
        self.element_of(key).and_then(|id| self.list.element(id))
    }

    /// Fetches `keys` from the store and loads them, replacing loaded copies.
    ///
    /// Returns the number of entities the store delivered.
    pub fn load(&self, keys: &[S::Key], fields: &[&str]) -> Result<usize> {
        let entities = self.store.fulfill(keys, fields)?;
        debug!(requested = keys.len(), delivered = entities.len(), "Fulfilled entities");
        let count = entities.len();
        for entity in entities {
            self.upsert(entity)?;
        }
        Ok(count)
    }

    /// Applies one change feed record to the loaded entities.
    pub fn apply(&self, change: EntityChange<S::Key, E>) -> Result<()> {
        match change {
            EntityChange::Created(entity) | EntityChange::Updated(entity) => {
                self.upsert(entity)?;
            }
            EntityChange::Deleted(key) => {
                self.forget(&key)?;
            }
        }
        Ok(())
    }

    /// Persists a new entity and loads the stored copy.
    pub fn create(&self, entity: E) -> Result<ElementId> {
        let stored = self.store.create(&entity)?;
        self.upsert(stored)
    }

    /// Persists changes to an entity and loads them.
    pub fn update(&self, entity: E) -> Result<ElementId> {
        self.store.update(&entity)?;
        self.upsert(entity)
    }

    /// Deletes an entity from the store and unloads it.
    ///
    /// Returns true if the entity was loaded.
    pub fn delete(&self, key: &S::Key) -> Result<bool> {
        self.store.delete(key)?;
        self.forget(key)
    }

    fn upsert(&self, entity: E) -> Result<ElementId> {
        let key = self.store.key_of(&entity);
        if let Some(id) = self.element_of(&key) {
            trace!(?id, "Entity updated");
            self.list.set(id, entity)?;
            return Ok(id);
        }
        let id = self.list.push(entity)?;
        trace!(?id, "Entity loaded");
        self.index.borrow_mut().insert(key, id);
        Ok(id)
    }

    fn forget(&self, key: &S::Key) -> Result<bool> {
        let Some(id) = self.element_of(key) else {
            return Ok(false);
        };
        self.index.borrow_mut().remove(key);
        self.list.remove(id)?;
        trace!(?id, "Entity unloaded");
        Ok(true)
    }
}
