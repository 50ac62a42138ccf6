//! Planner configuration.

/// Tunables for a planning run.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Rows processed per batch; a merge side larger than this is a
    /// candidate for the unsorted path.
    pub batch_size: usize,
    /// Guard against rule sets that never converge.
    pub max_rule_executions: usize,
    /// Record before/after plan snapshots for every rule.
    pub enable_trace: bool,
    /// How many times larger one merge side must be than the other before
    /// sorting it is considered too expensive.
    pub sort_cost_ratio: f64,
    /// Entries kept in the plan cache.
    pub cache_capacity: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            max_rule_executions: 10_000,
            enable_trace: false,
            sort_cost_ratio: 8.0,
            cache_capacity: 128,
        }
    }
}

impl PlannerConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_rule_executions(mut self, max: usize) -> Self {
        self.max_rule_executions = max;
        self
    }

    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.enable_trace = enabled;
        self
    }

    pub fn with_sort_cost_ratio(mut self, ratio: f64) -> Self {
        self.sort_cost_ratio = ratio;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}
