use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use log::{debug, info, warn};

use crate::classifier::{classify_all, FilterClause, PlannerContext, RelationKind};
use crate::collector::{PlanNode, QueryDesc, Recommendation, Recommendations, RowCounts};
use crate::config::ExtStatConfig;
use crate::error::{ExtStatError, ExtStatResult};
use crate::stat::{
    union_expressions, ColumnSet, HostExpr, RelIndex, RelationId, MIN_STAT_DIMENSIONS,
};

/// Candidates are kept per relation and range table entry: a self join has two entries for
/// the same relation, with different filters.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateKey {
    pub relation: RelationId,
    pub rel_index: RelIndex,
}

/// Columns and expressions of a relation's filters usable by extended statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationCandidateEntry<E> {
    pub columns: ColumnSet,
    pub expressions: Vec<E>,
}

/// Base relation of a planned query with its restriction clauses.
#[derive(Clone, Debug, PartialEq)]
pub struct BaseRelation<E> {
    pub rel_index: RelIndex,
    pub restrictions: Vec<FilterClause<E>>,
}

impl<E> BaseRelation<E> {
    pub fn new(rel_index: RelIndex, restrictions: Vec<FilterClause<E>>) -> Self {
        Self {
            rel_index,
            restrictions,
        }
    }
}

/// Outcome of checking a finished plan.
#[derive(Debug)]
pub struct ExecutionReport<E> {
    pub recommendations: Recommendations<E>,
    /// Scans of candidate relations that couldn't be checked.
    pub failures: Vec<ExtStatError>,
}

impl<E> Default for ExecutionReport<E> {
    fn default() -> Self {
        Self {
            recommendations: Recommendations::default(),
            failures: vec![],
        }
    }
}

/// Per-session state of the query driven candidate collection.
///
/// Candidates gathered while planning live until the outermost execution ends. Executions
/// started while another one runs (a function running a query, for example) only move the
/// depth counter, so the enclosing execution still sees everything collected so far.
#[derive(Debug)]
pub struct CollectorSession<E> {
    enabled: bool,
    threshold: f64,
    depth: usize,
    candidates: BTreeMap<CandidateKey, RelationCandidateEntry<E>>,
}

impl<E: HostExpr> CollectorSession<E> {
    pub fn new(config: &ExtStatConfig) -> Self {
        Self {
            enabled: config.enable_candidate_collection,
            threshold: config.estimation_error_threshold,
            depth: 0,
            candidates: BTreeMap::new(),
        }
    }

    pub fn update_config(&mut self, config: &ExtStatConfig) {
        self.enabled = config.enable_candidate_collection;
        self.threshold = config.estimation_error_threshold;
    }

    /// A negative threshold switches collection off as well.
    pub fn is_active(&self) -> bool {
        self.enabled && self.threshold >= 0.0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn candidate(&self, key: &CandidateKey) -> Option<&RelationCandidateEntry<E>> {
        self.candidates.get(key)
    }

    pub fn candidates(
        &self,
    ) -> impl Iterator<Item = (&CandidateKey, &RelationCandidateEntry<E>)> + '_ {
        self.candidates.iter()
    }

    /// Gathers candidates from the restrictions of planned base relations. Relations whose
    /// compatible clauses give less than two dimensions are left out.
    pub fn collect_planner_clauses<C>(&mut self, relations: &[BaseRelation<E>], ctx: &C)
    where
        C: PlannerContext<E> + ?Sized,
    {
        if !self.is_active() {
            return;
        }

        for relation in relations {
            if relation.restrictions.is_empty() {
                continue;
            }
            let rte = match ctx.range_table_entry(relation.rel_index) {
                Some(rte) if rte.kind == RelationKind::Table => rte,
                _ => continue,
            };

            let gathered = classify_all(&relation.restrictions, relation.rel_index, ctx);
            if gathered.dimensions() < MIN_STAT_DIMENSIONS {
                continue;
            }

            let key = CandidateKey {
                relation: rte.relation,
                rel_index: relation.rel_index,
            };
            debug!(
                "Candidate for relation {} (rte {}): columns {:?}, {} expressions",
                key.relation,
                key.rel_index,
                gathered.columns,
                gathered.expressions.len()
            );

            let entry = self
                .candidates
                .entry(key)
                .or_insert_with(|| RelationCandidateEntry {
                    columns: ColumnSet::new(),
                    expressions: vec![],
                });
            entry.columns.union_with(&gathered.columns);
            union_expressions(&mut entry.expressions, gathered.expressions);
        }
    }

    /// Enters a query execution. The depth is restored when the guard goes away.
    pub fn enter_execution(&mut self) -> ExecutionGuard<'_, E> {
        self.begin_execution();
        ExecutionGuard {
            session: self,
            finished: false,
        }
    }

    /// Runs `execution` one level deeper. An error return counts as an aborted execution.
    pub fn with_execution<T, Err, F>(&mut self, execution: F) -> Result<T, Err>
    where
        F: FnOnce(&mut CollectorSession<E>) -> Result<T, Err>,
    {
        let mut guard = self.enter_execution();
        let result = execution(&mut *guard);
        if result.is_ok() {
            guard.finish();
        }
        result
    }

    /// Callback flavor of [`CollectorSession::enter_execution`] for hosts that report the
    /// entry and exit separately. Every call must be paired with
    /// [`CollectorSession::end_execution`].
    pub fn begin_execution(&mut self) {
        self.depth += 1;
    }

    /// Leaves an execution. An execution leaving abnormally at the outermost level releases
    /// the candidates, since no end callback will follow.
    pub fn end_execution(&mut self, completed: bool) {
        debug_assert!(self.depth > 0, "Unbalanced execution exit");
        self.depth = self.depth.saturating_sub(1);

        if !completed && self.depth == 0 {
            warn!("Query execution aborted, releasing statistics candidates");
            self.teardown();
        }
    }

    /// Planned and observed rows of a node if it was badly estimated.
    pub fn probe_node(&self, node: &PlanNode) -> ExtStatResult<Option<RowCounts>> {
        Ok(node
            .row_counts()?
            .filter(|counts| counts.actual >= 2.0 && counts.estimation_error() >= self.threshold))
    }

    /// Executor end callback. Looks for badly estimated scans of candidate relations in the
    /// finished plan. The candidates are dropped at the outermost level.
    pub fn on_executor_end(&mut self, query: &QueryDesc) -> ExecutionReport<E> {
        let report = if query.instrument_rows && self.is_active() {
            self.recommend(query)
        } else {
            ExecutionReport::default()
        };

        if self.depth == 0 {
            self.teardown();
        }

        report
    }

    fn recommend(&self, query: &QueryDesc) -> ExecutionReport<E> {
        let mut report = ExecutionReport::default();

        for node in query.plan.iter() {
            let rel_index = match node.kind.scanned_relation() {
                Some(rel_index) => rel_index,
                None => continue,
            };
            let rte = match query.range_table_entry(rel_index) {
                Some(rte) => rte,
                None => continue,
            };
            let key = CandidateKey {
                relation: rte.relation,
                rel_index,
            };
            let entry = match self.candidates.get(&key) {
                Some(entry) => entry,
                None => continue,
            };

            let counts = match self.probe_node(node) {
                Ok(Some(counts)) => counts,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Can't check the estimate of {}: {}", node, e);
                    report.failures.push(e);
                    continue;
                }
            };

            let recommendation = Recommendation {
                relation: key.relation,
                rel_index,
                node: node.to_string(),
                planned_rows: counts.planned,
                actual_rows: counts.actual,
                estimation_error: counts.estimation_error(),
                columns: entry.columns.clone(),
                expressions: entry.expressions.clone(),
            };
            info!("Extended statistics candidate: {}", recommendation);
            report.recommendations.push(recommendation);
        }

        report
    }

    /// Drops every candidate.
    pub fn teardown(&mut self) {
        if !self.candidates.is_empty() {
            debug!("Releasing {} statistics candidates", self.candidates.len());
        }
        self.candidates.clear();
    }
}

/// One level of query execution. Dereferences to the session, so nested executions are
/// entered through it.
pub struct ExecutionGuard<'a, E: HostExpr> {
    session: &'a mut CollectorSession<E>,
    finished: bool,
}

impl<'a, E: HostExpr> ExecutionGuard<'a, E> {
    /// Leaves the execution normally.
    pub fn finish(mut self) {
        self.finished = true;
    }
}

impl<'a, E: HostExpr> Deref for ExecutionGuard<'a, E> {
    type Target = CollectorSession<E>;

    fn deref(&self) -> &Self::Target {
        self.session
    }
}

impl<'a, E: HostExpr> DerefMut for ExecutionGuard<'a, E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
    }
}

impl<'a, E: HostExpr> Drop for ExecutionGuard<'a, E> {
    fn drop(&mut self) {
        self.session.end_execution(self.finished);
    }
}
