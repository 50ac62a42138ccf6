//! Cache of optimized plans keyed by the statement's token stream.
//!
//! Cached trees are shared behind an [`Arc`] and never mutated; callers that
//! want to rewrite a cached plan clone it first.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

use super::node::PlanTree;

#[derive(Debug, Default)]
struct Entries {
    plans: HashMap<String, Arc<PlanTree>>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

/// Bounded plan cache with first-in first-out eviction.
#[derive(Debug)]
pub struct PlanCache {
    capacity: usize,
    entries: RwLock<Entries>,
}

impl PlanCache {
    /// A cache holding at most `capacity` plans. Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Statement text with whitespace and comments between tokens dropped.
    /// Quoted literals and identifiers are kept intact. Text that does not
    /// tokenize has no key and is never cached.
    fn key(sql: &str) -> Option<String> {
        let tokens = Tokenizer::new(&GenericDialect {}, sql).tokenize().ok()?;
        let words: Vec<String> = tokens
            .iter()
            .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
            .map(|t| t.to_string())
            .collect();
        Some(words.join(" "))
    }

    pub fn get(&self, sql: &str) -> Option<Arc<PlanTree>> {
        let key = Self::key(sql)?;
        self.entries.read().plans.get(&key).cloned()
    }

    /// Store a plan, evicting the oldest entries if the cache is full.
    pub fn insert(&self, sql: &str, plan: PlanTree) -> Arc<PlanTree> {
        let plan = Arc::new(plan);
        if self.capacity == 0 {
            return plan;
        }
        let Some(key) = Self::key(sql) else {
            return plan;
        };
        let mut entries = self.entries.write();
        if entries.plans.insert(key.clone(), Arc::clone(&plan)).is_none() {
            entries.order.push_back(key);
        }
        while entries.plans.len() > self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.plans.remove(&oldest);
            log::trace!("evicted cached plan for {}", oldest);
        }
        plan
    }

    pub fn len(&self) -> usize {
        self.entries.read().plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.plans.clear();
        entries.order.clear();
    }
}
