use serde::{Deserialize, Serialize};

/// Per-slot bookkeeping stored alongside a tuple's bytes in a relation page.
#[derive(PartialEq, Eq, Hash, Clone, Debug, Copy, Deserialize, Serialize)]
pub struct TupleMetadata {
    is_deleted: bool,
}

impl TupleMetadata {
    pub fn new(is_deleted: bool) -> Self {
        Self { is_deleted }
    }

    pub fn deleted_payload_metadata() -> TupleMetadata {
        Self::new(true)
    }

    pub fn set_deleted(&mut self, d: bool) {
        self.is_deleted = d;
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }
}
