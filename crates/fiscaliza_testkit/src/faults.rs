//! Fault injection for saga and cascade tests.
//!
//! [`FaultyStore`] wraps any [`EntityStore`] and fails chosen calls, so the
//! compensation paths can be driven deterministically.

use fiscaliza_core::{Collection, CoreError, CoreResult, EntityStore, Fields, Filter, Record};
use parking_lot::Mutex;
use std::collections::HashMap;

/// The store call a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`, including each id of `delete_many`
    Delete,
    /// `get` and `filter`
    Read,
}

/// Builds the error returned by a failing call.
type ErrorFactory = Box<dyn Fn() -> CoreError + Send + Sync>;

struct Fault {
    /// Matching calls to let through first.
    skip: usize,
    /// Matching calls to fail after that.
    times: usize,
    error: ErrorFactory,
}

/// An [`EntityStore`] that fails selected calls of the wrapped store.
pub struct FaultyStore<S> {
    inner: S,
    faults: Mutex<HashMap<(Collection, FaultOp), Fault>>,
    calls: Mutex<Vec<(Collection, FaultOp)>>,
}

impl<S: EntityStore> FaultyStore<S> {
    /// Wraps `inner` with no faults armed.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fails the next call of `op` on `collection` with the error built
    /// by `error`.
    pub fn fail_next<E>(&self, collection: Collection, op: FaultOp, error: E)
    where
        E: Fn() -> CoreError + Send + Sync + 'static,
    {
        self.fail_after(collection, op, 0, 1, error);
    }

    /// Lets `skip` matching calls through, then fails the next `times`.
    pub fn fail_after<E>(&self, collection: Collection, op: FaultOp, skip: usize, times: usize, error: E)
    where
        E: Fn() -> CoreError + Send + Sync + 'static,
    {
        let fault = Fault {
            skip,
            times,
            error: Box::new(error),
        };
        self.faults.lock().insert((collection, op), fault);
    }

    /// Disarms every fault.
    pub fn clear(&self) {
        self.faults.lock().clear();
    }

    /// Returns how many calls of `op` on `collection` were made.
    pub fn call_count(&self, collection: Collection, op: FaultOp) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| **call == (collection, op))
            .count()
    }

    fn check(&self, collection: Collection, op: FaultOp) -> CoreResult<()> {
        self.calls.lock().push((collection, op));
        let mut faults = self.faults.lock();
        let Some(fault) = faults.get_mut(&(collection, op)) else {
            return Ok(());
        };
        if fault.skip > 0 {
            fault.skip -= 1;
            return Ok(());
        }
        if fault.times == 0 {
            return Ok(());
        }
        fault.times -= 1;
        Err((fault.error)())
    }
}

impl<S: EntityStore> EntityStore for FaultyStore<S> {
    fn create(&self, collection: Collection, fields: Fields) -> CoreResult<Record> {
        self.check(collection, FaultOp::Create)?;
        self.inner.create(collection, fields)
    }

    fn update(&self, collection: Collection, id: &str, fields: Fields) -> CoreResult<Record> {
        self.check(collection, FaultOp::Update)?;
        self.inner.update(collection, id, fields)
    }

    fn delete(&self, collection: Collection, id: &str) -> CoreResult<()> {
        self.check(collection, FaultOp::Delete)?;
        self.inner.delete(collection, id)
    }

    fn get(&self, collection: Collection, id: &str) -> CoreResult<Record> {
        self.check(collection, FaultOp::Read)?;
        self.inner.get(collection, id)
    }

    fn filter(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&str>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Record>> {
        self.check(collection, FaultOp::Read)?;
        self.inner.filter(collection, filter, sort, limit)
    }
}
