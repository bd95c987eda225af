use std::fmt::{Display, Formatter};

use strum_macros::AsRefStr;

use crate::classifier::RangeTableEntry;
use crate::error::{ExtStatError, ExtStatResult};
use crate::stat::RelIndex;

/// Largest row estimate the planner produces.
pub const MAX_ROW_ESTIMATE: f64 = 1e100;

/// Forces a row estimate to be sane, the way the planner does it: at least one row, a whole
/// number, finite.
pub fn clamp_row_est(rows: f64) -> f64 {
    if rows.is_nan() || rows > MAX_ROW_ESTIMATE {
        MAX_ROW_ESTIMATE
    } else if rows <= 1.0 {
        1.0
    } else {
        rows.round()
    }
}

/// Share of the total work the planner assumes each participant of a parallel plan does.
///
/// The leader participates too, less so with more workers to feed.
pub fn parallel_divisor(workers: usize) -> f64 {
    let mut divisor = workers as f64;
    let leader_contribution = 1.0 - 0.3 * divisor;
    if leader_contribution > 0.0 {
        divisor += leader_contribution;
    }
    divisor
}

/// Counters of one executing process for one plan node, with all loops finished.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Instrumentation {
    /// Tuples emitted, summed over loops.
    pub ntuples: f64,
    pub nloops: f64,
    /// Tuples removed by the node's filter.
    pub nfiltered1: f64,
    /// Tuples removed by recheck or join filters.
    pub nfiltered2: f64,
    /// Secondary tuple counter, e.g. heap fetches.
    pub ntuples2: f64,
}

impl Instrumentation {
    pub fn new(ntuples: f64, nloops: f64) -> Self {
        Self {
            ntuples,
            nloops,
            ..Default::default()
        }
    }

    pub fn with_filtered(mut self, nfiltered1: f64, nfiltered2: f64) -> Self {
        self.nfiltered1 = nfiltered1;
        self.nfiltered2 = nfiltered2;
        self
    }

    fn touched(&self) -> f64 {
        self.nfiltered1 + self.nfiltered2 + self.ntuples2
    }
}

/// Instrumentation of a node. In a parallel plan `leader` also includes the totals of all
/// workers, and every worker has its own entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeInstrumentation {
    pub leader: Instrumentation,
    pub workers: Option<Vec<Instrumentation>>,
}

impl NodeInstrumentation {
    pub fn serial(leader: Instrumentation) -> Self {
        Self {
            leader,
            workers: None,
        }
    }

    pub fn parallel(leader: Instrumentation, workers: Vec<Instrumentation>) -> Self {
        Self {
            leader,
            workers: Some(workers),
        }
    }
}

/// Predicted and observed rows of one node, per loop.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RowCounts {
    pub planned: f64,
    pub actual: f64,
    /// Tuples read but filtered out, leaf nodes only.
    pub touched: f64,
}

impl RowCounts {
    pub fn estimation_error(&self) -> f64 {
        (self.planned / self.actual).max(self.actual / self.planned)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, AsRefStr)]
pub enum PlanNodeKind {
    SeqScan(RelIndex),
    IndexScan(RelIndex),
    IndexOnlyScan(RelIndex),
    BitmapHeapScan(RelIndex),
    BitmapIndexScan,
    ForeignScan,
    NestedLoop,
    HashJoin,
    MergeJoin,
    Hash,
    Sort,
    Aggregate,
    Limit,
    Gather,
    Other,
}

impl PlanNodeKind {
    /// Range table index of the base relation read by the node.
    pub fn scanned_relation(&self) -> Option<RelIndex> {
        match self {
            PlanNodeKind::SeqScan(rel_index)
            | PlanNodeKind::IndexScan(rel_index)
            | PlanNodeKind::IndexOnlyScan(rel_index)
            | PlanNodeKind::BitmapHeapScan(rel_index) => Some(*rel_index),
            _ => None,
        }
    }
}

/// Node of an executed plan.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanNode {
    pub id: usize,
    pub kind: PlanNodeKind,
    /// Planner estimate of rows per loop, per participant in a parallel plan.
    pub plan_rows: f64,
    pub instrument: Option<NodeInstrumentation>,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    pub fn new(id: usize, kind: PlanNodeKind, plan_rows: f64) -> Self {
        Self {
            id,
            kind,
            plan_rows,
            instrument: None,
            children: vec![],
        }
    }

    pub fn with_instrument(mut self, instrument: NodeInstrumentation) -> Self {
        self.instrument = Some(instrument);
        self
    }

    pub fn with_child(mut self, child: PlanNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Visits the node and its descendants, parents first.
    pub fn iter(&self) -> impl Iterator<Item = &PlanNode> + '_ {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// Planned and observed rows of the node, `None` if it never ran.
    pub fn row_counts(&self) -> ExtStatResult<Option<RowCounts>> {
        let instrument =
            self.instrument
                .as_ref()
                .ok_or_else(|| ExtStatError::InstrumentationMissing {
                    node: self.to_string(),
                })?;

        let leader = &instrument.leader;
        if leader.nloops <= 0.0 {
            return Ok(None);
        }

        let (planned, actual, touched) = match &instrument.workers {
            Some(workers) => {
                let planned = self.plan_rows * parallel_divisor(workers.len());
                let mut actual = 0.0;
                let mut touched = 0.0;
                let mut worker_tuples = 0.0;
                let mut worker_loops = 0.0;

                // A worker may start and quit without getting any work.
                for worker in workers.iter().filter(|w| w.nloops > 0.0) {
                    worker_tuples += worker.ntuples;
                    worker_loops += worker.nloops;
                    actual += worker.ntuples / worker.nloops;
                    if self.is_leaf() {
                        touched += worker.touched();
                    }
                }

                debug_assert!(leader.nloops >= worker_loops);
                let leader_loops = leader.nloops - worker_loops;
                if leader_loops > 0.0 {
                    actual += (leader.ntuples - worker_tuples) / leader_loops;
                    if self.is_leaf() {
                        touched += leader.touched();
                    }
                }

                (planned, actual, touched)
            }
            None => {
                let touched = if self.is_leaf() {
                    leader.touched() / leader.nloops
                } else {
                    0.0
                };
                (self.plan_rows, leader.ntuples / leader.nloops, touched)
            }
        };

        Ok(Some(RowCounts {
            planned: clamp_row_est(planned),
            actual: clamp_row_est(actual),
            touched,
        }))
    }
}

impl Display for PlanNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind.scanned_relation() {
            Some(rel_index) => write!(f, "{}#{} on {}", self.kind.as_ref(), self.id, rel_index),
            None => write!(f, "{}#{}", self.kind.as_ref(), self.id),
        }
    }
}

/// Executed query handed to the executor end callback.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryDesc {
    pub plan: PlanNode,
    /// Range table, entry `i` has range table index `i + 1`.
    pub range_table: Vec<RangeTableEntry>,
    /// Row counting instrumentation was requested for the query.
    pub instrument_rows: bool,
}

impl QueryDesc {
    pub fn range_table_entry(&self, rel_index: RelIndex) -> Option<&RangeTableEntry> {
        (rel_index as usize)
            .checked_sub(1)
            .and_then(|idx| self.range_table.get(idx))
    }
}

#[cfg(test)]
mod tests {
    use crate::collector::{
        clamp_row_est, parallel_divisor, Instrumentation, NodeInstrumentation, PlanNode,
        PlanNodeKind, MAX_ROW_ESTIMATE,
    };
    use crate::error::ExtStatError;

    #[test]
    fn test_clamp_row_est() {
        assert_eq!(1.0, clamp_row_est(0.0));
        assert_eq!(1.0, clamp_row_est(-5.0));
        assert_eq!(3.0, clamp_row_est(2.6));
        assert_eq!(MAX_ROW_ESTIMATE, clamp_row_est(f64::NAN));
        assert_eq!(MAX_ROW_ESTIMATE, clamp_row_est(1e200));
    }

    #[test]
    fn test_parallel_divisor() {
        assert!((parallel_divisor(2) - 2.4).abs() < 1e-9);
        assert!((parallel_divisor(4) - 4.0).abs() < 1e-9);
        assert!((parallel_divisor(0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_serial_row_counts() {
        let node = PlanNode::new(1, PlanNodeKind::SeqScan(1), 100.0).with_instrument(
            NodeInstrumentation::serial(Instrumentation::new(2000.0, 2.0).with_filtered(40.0, 0.0)),
        );

        let counts = node.row_counts().unwrap().unwrap();
        assert_eq!(100.0, counts.planned);
        assert_eq!(1000.0, counts.actual);
        assert_eq!(20.0, counts.touched);
        assert_eq!(10.0, counts.estimation_error());
    }

    #[test]
    fn test_parallel_row_counts() {
        // Two workers with 300 and 500 rows, the leader itself produced 200.
        let node = PlanNode::new(1, PlanNodeKind::SeqScan(1), 100.0).with_instrument(
            NodeInstrumentation::parallel(
                Instrumentation::new(1000.0, 3.0),
                vec![
                    Instrumentation::new(300.0, 1.0),
                    Instrumentation::new(500.0, 1.0),
                    Instrumentation::new(0.0, 0.0),
                ],
            ),
        );

        // The idle worker still counts for the planner's divisor.
        let counts = node.row_counts().unwrap().unwrap();
        assert_eq!(310.0, counts.planned);
        assert_eq!(1000.0, counts.actual);
    }

    #[test]
    fn test_never_executed() {
        let node = PlanNode::new(1, PlanNodeKind::Sort, 100.0)
            .with_instrument(NodeInstrumentation::serial(Instrumentation::default()));
        assert_eq!(None, node.row_counts().unwrap());
    }

    #[test]
    fn test_missing_instrumentation() {
        let node = PlanNode::new(7, PlanNodeKind::IndexScan(2), 100.0);

        match node.row_counts() {
            Err(ExtStatError::InstrumentationMissing { node }) => {
                assert_eq!("IndexScan#7 on 2", node)
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_iter_visits_parents_first() {
        let plan = PlanNode::new(1, PlanNodeKind::HashJoin, 10.0)
            .with_child(PlanNode::new(2, PlanNodeKind::SeqScan(1), 10.0))
            .with_child(
                PlanNode::new(3, PlanNodeKind::Hash, 10.0)
                    .with_child(PlanNode::new(4, PlanNodeKind::SeqScan(2), 10.0)),
            );

        let ids = plan.iter().map(|node| node.id).collect::<Vec<_>>();
        assert_eq!(vec![1, 2, 3, 4], ids);
    }
}
