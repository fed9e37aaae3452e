use weft_types::ContentId;

/// Default maximum traversal distance for skip-list references.
pub const DEFAULT_REFERENCES_COUNT: usize = 16;

/// Default capacity of the log event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Construction options for a [`Log`](crate::Log).
#[derive(Clone, Debug)]
pub struct LogOptions {
    /// Log identifier. A fresh UUID v7 is used when `None`.
    pub id: Option<String>,
    /// Entries within this traversal distance of the heads are candidates
    /// for skip-list references on append.
    pub references_count: usize,
    pub channel_capacity: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            id: None,
            references_count: DEFAULT_REFERENCES_COUNT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl LogOptions {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_references_count(mut self, count: usize) -> Self {
        self.references_count = count;
        self
    }
}

/// Bounds for [`Log::iterator`](crate::Log::iterator).
///
/// Iteration runs newest to oldest. `lt`/`lte` pick the starting entries
/// (default: the heads), `gt`/`gte` the entry to stop at, and `amount`
/// caps the number of entries returned.
#[derive(Clone, Debug, Default)]
pub struct IteratorOptions {
    /// Stop before reaching this entry.
    pub gt: Option<ContentId>,
    /// Stop after yielding this entry.
    pub gte: Option<ContentId>,
    /// Start below these entries (they are not yielded).
    pub lt: Option<Vec<ContentId>>,
    /// Start at these entries.
    pub lte: Option<Vec<ContentId>>,
    /// Maximum number of entries.
    pub amount: Option<usize>,
}

impl IteratorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gt(mut self, hash: ContentId) -> Self {
        self.gt = Some(hash);
        self
    }

    pub fn gte(mut self, hash: ContentId) -> Self {
        self.gte = Some(hash);
        self
    }

    pub fn lt(mut self, hashes: Vec<ContentId>) -> Self {
        self.lt = Some(hashes);
        self
    }

    pub fn lte(mut self, hashes: Vec<ContentId>) -> Self {
        self.lte = Some(hashes);
        self
    }

    pub fn amount(mut self, amount: usize) -> Self {
        self.amount = Some(amount);
        self
    }
}
