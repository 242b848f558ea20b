//! Engine configuration.

/// Configuration for the numbering, saga and cascade engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Row limit passed to every store query. Queries are not paginated, so
    /// this must exceed the largest expected collection slice.
    pub query_limit: usize,

    /// Deadline given to new determinations, in days.
    pub default_deadline_days: u32,

    /// Number of leading characters of a finding's text used to relate
    /// legacy non-conformities that carry no source reference.
    pub legacy_prefix_len: usize,

    /// Whether a successful finding chain is followed by a renumbering pass
    /// over its unit and the units after it.
    pub renumber_after_create: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_limit: 500,
            default_deadline_days: 30,
            legacy_prefix_len: 50,
            renumber_after_create: true,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the query row limit.
    #[must_use]
    pub const fn query_limit(mut self, limit: usize) -> Self {
        self.query_limit = limit;
        self
    }

    /// Sets the default determination deadline.
    #[must_use]
    pub const fn default_deadline_days(mut self, days: u32) -> Self {
        self.default_deadline_days = days;
        self
    }

    /// Sets the legacy text-match prefix length.
    #[must_use]
    pub const fn legacy_prefix_len(mut self, len: usize) -> Self {
        self.legacy_prefix_len = len;
        self
    }

    /// Sets whether finding chains renumber after creation.
    #[must_use]
    pub const fn renumber_after_create(mut self, value: bool) -> Self {
        self.renumber_after_create = value;
        self
    }
}
