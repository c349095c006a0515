//! Resolution planning
//!
//! References are grouped by query id before anything runs. The first pass
//! decides the mode of every id, where a single `_refresh` reference wins
//! over any number of plain ones. The second pass emits each id once, in
//! the order its first reference appears, together with every distinct
//! table name the statement uses for it.

use reql_core::{Position, QueryReference};
use std::collections::{HashMap, HashSet};

/// One query to resolve, and the tables its result is materialized into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedQuery {
    /// Query id
    pub id: u64,

    /// Execute instead of consulting the result cache
    pub refresh: bool,

    /// Distinct table names, compared case-insensitively, in document order
    pub names: Vec<String>,

    /// Where the deciding reference appears; reported on failures
    pub position: Position,
}

/// Ordered, deduplicated work list for one execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionPlan {
    queries: Vec<PlannedQuery>,
}

impl ResolutionPlan {
    pub fn new(references: &[QueryReference]) -> Self {
        // Pass one: preferred mode and reporting position per id
        let mut modes: HashMap<u64, (bool, Position)> = HashMap::new();
        for reference in references {
            modes
                .entry(reference.id)
                .and_modify(|(refresh, position)| {
                    if reference.refresh && !*refresh {
                        *refresh = true;
                        *position = reference.position();
                    }
                })
                .or_insert((reference.refresh, reference.position()));
        }

        // Pass two: one entry per id, first-seen order
        let mut queries: Vec<PlannedQuery> = Vec::new();
        let mut slots: HashMap<u64, usize> = HashMap::new();
        let mut seen_names: HashSet<String> = HashSet::new();

        for reference in references {
            let slot = *slots.entry(reference.id).or_insert_with(|| {
                let (refresh, position) = modes[&reference.id];
                queries.push(PlannedQuery {
                    id: reference.id,
                    refresh,
                    names: Vec::new(),
                    position,
                });
                queries.len() - 1
            });

            if seen_names.insert(reference.name.to_lowercase()) {
                queries[slot].names.push(reference.name.clone());
            }
        }

        Self { queries }
    }

    pub fn queries(&self) -> &[PlannedQuery] {
        &self.queries
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }
}

impl<'a> IntoIterator for &'a ResolutionPlan {
    type Item = &'a PlannedQuery;
    type IntoIter = std::slice::Iter<'a, PlannedQuery>;

    fn into_iter(self) -> Self::IntoIter {
        self.queries.iter()
    }
}
