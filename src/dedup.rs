use crate::model::Record;
use crate::store::{Store, StoreError};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted(String),
    Duplicate,
}

// Single writer only: exists + persist is not atomic.
pub struct DedupGate<'s> {
    store: &'s mut dyn Store,
}

impl<'s> DedupGate<'s> {
    pub fn new(store: &'s mut dyn Store) -> Self {
        Self { store }
    }

    pub fn admit(&mut self, record: &Record) -> Result<Admission, StoreError> {
        if self.store.exists(record.fingerprint())? {
            debug!(
                fingerprint = %record.fingerprint(),
                title = %record.title(),
                "duplicate record"
            );
            return Ok(Admission::Duplicate);
        }

        let id = self.store.persist(record)?;
        Ok(Admission::Admitted(id))
    }
}
