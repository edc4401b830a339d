//! Generic CRUD base shared by every typed data service.
//!
//! Each entity owns exactly one bucket. The top-level service opens its own
//! transaction per call; `tx()` returns a transaction-scoped variant for
//! cross-bucket work such as derived-counter maintenance.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::store::{key_u32, Store, StoreError, TxRead, WriteTx};

/// A record stored in its own bucket under a numeric key.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const BUCKET: &'static str;

    fn id(&self) -> u32;
    fn set_id(&mut self, id: u32);
}

/// Typed service over one bucket. Cheap to clone.
pub struct Service<T: Entity> {
    store: Store,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Service<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> Service<T> {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Borrow a caller's transaction instead of opening one.
    pub fn tx<'a>(&self, tx: &'a mut WriteTx) -> ServiceTx<'a, T> {
        ServiceTx {
            tx,
            _marker: PhantomData,
        }
    }

    /// Assigns the next identifier and stores the record.
    pub fn create(&self, record: &mut T) -> Result<(), StoreError> {
        self.store.update(|tx| self.tx(tx).create(record))
    }

    pub fn read(&self, id: u32) -> Result<T, StoreError> {
        self.store.view(|tx| read_tx(tx, id))
    }

    pub fn read_all(&self) -> Result<Vec<T>, StoreError> {
        self.store.view(|tx| tx.read_all(T::BUCKET))
    }

    pub fn update(&self, id: u32, record: &T) -> Result<(), StoreError> {
        self.store.update(|tx| self.tx(tx).update(id, record))
    }

    pub fn delete(&self, id: u32) -> Result<(), StoreError> {
        self.store.update(|tx| self.tx(tx).delete(id))
    }
}

/// Transaction-scoped variant of [`Service`].
pub struct ServiceTx<'a, T: Entity> {
    tx: &'a mut WriteTx,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Entity> ServiceTx<'a, T> {
    pub fn create(&mut self, record: &mut T) -> Result<(), StoreError> {
        let id = self.tx.next_id(T::BUCKET);
        record.set_id(id);
        self.tx.put(T::BUCKET, &key_u32(id), record)
    }

    /// Stores a record under an identifier chosen by the caller (used by
    /// buckets keyed by a foreign ID, such as endpoint relations).
    pub fn create_with_id(&mut self, id: u32, record: &T) -> Result<(), StoreError> {
        self.tx.put(T::BUCKET, &key_u32(id), record)
    }

    pub fn read(&self, id: u32) -> Result<T, StoreError> {
        read_tx(self.tx, id)
    }

    pub fn read_all(&self) -> Result<Vec<T>, StoreError> {
        self.tx.read_all(T::BUCKET)
    }

    pub fn update(&mut self, id: u32, record: &T) -> Result<(), StoreError> {
        if !self.tx.exists(T::BUCKET, &key_u32(id)) {
            return Err(StoreError::NotFound);
        }
        self.tx.put(T::BUCKET, &key_u32(id), record)
    }

    pub fn delete(&mut self, id: u32) -> Result<(), StoreError> {
        self.tx.delete(T::BUCKET, &key_u32(id))
    }
}

/// Read one record of `T` out of any transaction.
pub fn read_tx<T: Entity>(tx: &impl TxRead, id: u32) -> Result<T, StoreError> {
    tx.get(T::BUCKET, &key_u32(id))
}

/// Read every record of `T` out of any transaction, in key order.
pub fn read_all_tx<T: Entity>(tx: &impl TxRead) -> Result<Vec<T>, StoreError> {
    tx.read_all(T::BUCKET)
}
