//! Multi-key writes applied as one transaction

/// A single write inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite
    Put {
        bucket: String,
        key: String,
        value: String,
    },
    /// Insert a key that must not exist yet; the whole batch fails with
    /// `StoreError::Conflict` otherwise
    Insert {
        bucket: String,
        key: String,
        value: String,
    },
    Delete {
        bucket: String,
        key: String,
    },
    /// Delete only while the stored value equals `expected`; a mismatch is not an error
    DeleteIf {
        bucket: String,
        key: String,
        expected: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, bucket: &str, key: &str, value: impl Into<String>) -> Self {
        self.ops.push(BatchOp::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn insert(mut self, bucket: &str, key: &str, value: impl Into<String>) -> Self {
        self.ops.push(BatchOp::Insert {
            bucket: bucket.to_string(),
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn delete(mut self, bucket: &str, key: &str) -> Self {
        self.ops.push(BatchOp::Delete {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self
    }

    pub fn delete_if(mut self, bucket: &str, key: &str, expected: impl Into<String>) -> Self {
        self.ops.push(BatchOp::DeleteIf {
            bucket: bucket.to_string(),
            key: key.to_string(),
            expected: expected.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}
