//! Host callbacks.
//!
//! The host calls into a [`HookPipeline`] at fixed points of query processing and utility
//! command execution. Extensions register an [`ExtensionHook`] each; the pipeline calls them
//! in registration order, so no hook has to remember and call its predecessor.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::catalog::{IndexProvider, StatisticsCatalog};
use crate::classifier::PlannerContext;
use crate::collector::{BaseRelation, CollectorSession, QueryDesc, Recommendations};
use crate::config::{ExtStatConfig, GenerationMode};
use crate::error::ExtStatResult;
use crate::generator::{BuildOutcome, IndexCandidateQueue, StatisticsGenerator};
use crate::signature::SignatureCache;
use crate::stat::{HostExpr, RelationId};

/// Catalog access available to utility hooks.
pub trait HostCatalog<E>: StatisticsCatalog<E> + IndexProvider<E> {}

impl<E, T: StatisticsCatalog<E> + IndexProvider<E>> HostCatalog<E> for T {}

/// Object reported by the host right after its creation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CreatedObject {
    /// A table, index or any other relation. Its definition may still be incomplete.
    Relation(RelationId),
    Other,
}

/// Callbacks of one extension. Every callback does nothing by default.
pub trait ExtensionHook<E> {
    fn name(&self) -> &str;

    /// Planning is done and the base relations carry their final restrictions.
    fn planner_final_paths(
        &mut self,
        _relations: &[BaseRelation<E>],
        _ctx: &dyn PlannerContext<E>,
    ) {
    }

    fn executor_enter(&mut self) {}

    /// `completed` is false when the execution failed or was canceled.
    fn executor_leave(&mut self, _completed: bool) {}

    fn executor_end(&mut self, _query: &QueryDesc) -> ExtStatResult<()> {
        Ok(())
    }

    fn object_created(&mut self, _object: CreatedObject) {}

    /// Statistics of `relation` were dropped, directly or along with their index or table.
    fn statistics_dropped(&mut self, _relation: RelationId) {}

    /// The running utility command finished, `completed` is false when it failed.
    fn utility_completed(
        &mut self,
        _catalog: &mut dyn HostCatalog<E>,
        _completed: bool,
    ) -> ExtStatResult<()> {
        Ok(())
    }
}

/// Hook owned by the pipeline while the registrant keeps a handle to it, see
/// [`HookPipeline::register_shared`].
pub struct SharedHook<H> {
    name: String,
    hook: Arc<Mutex<H>>,
}

impl<E, H: ExtensionHook<E>> ExtensionHook<E> for SharedHook<H> {
    fn name(&self) -> &str {
        &self.name
    }

    fn planner_final_paths(&mut self, relations: &[BaseRelation<E>], ctx: &dyn PlannerContext<E>) {
        self.hook.lock().planner_final_paths(relations, ctx)
    }

    fn executor_enter(&mut self) {
        self.hook.lock().executor_enter()
    }

    fn executor_leave(&mut self, completed: bool) {
        self.hook.lock().executor_leave(completed)
    }

    fn executor_end(&mut self, query: &QueryDesc) -> ExtStatResult<()> {
        self.hook.lock().executor_end(query)
    }

    fn object_created(&mut self, object: CreatedObject) {
        self.hook.lock().object_created(object)
    }

    fn statistics_dropped(&mut self, relation: RelationId) {
        self.hook.lock().statistics_dropped(relation)
    }

    fn utility_completed(
        &mut self,
        catalog: &mut dyn HostCatalog<E>,
        completed: bool,
    ) -> ExtStatResult<()> {
        self.hook.lock().utility_completed(catalog, completed)
    }
}

/// Ordered list of registered hooks.
pub struct HookPipeline<E> {
    hooks: Vec<Box<dyn ExtensionHook<E>>>,
}

impl<E> Default for HookPipeline<E> {
    fn default() -> Self {
        Self { hooks: vec![] }
    }
}

impl<E> HookPipeline<E> {
    pub fn register<H: ExtensionHook<E> + 'static>(&mut self, hook: H) {
        debug!("Registered hook {} at position {}", hook.name(), self.hooks.len());
        self.hooks.push(Box::new(hook));
    }

    /// Registers a hook the caller keeps using, for example to read what it collected.
    pub fn register_shared<H: ExtensionHook<E> + 'static>(&mut self, hook: Arc<Mutex<H>>) {
        let name = hook.lock().name().to_string();
        self.register(SharedHook { name, hook });
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn planner_final_paths(
        &mut self,
        relations: &[BaseRelation<E>],
        ctx: &dyn PlannerContext<E>,
    ) {
        for hook in &mut self.hooks {
            hook.planner_final_paths(relations, ctx);
        }
    }

    /// Runs a query execution between the enter and leave callbacks. Hooks are left in
    /// reverse order even if `execution` fails or panics; nested executions go through the
    /// pipeline handed to `execution`.
    pub fn run_executor<T, Err, F>(&mut self, execution: F) -> Result<T, Err>
    where
        F: FnOnce(&mut HookPipeline<E>) -> Result<T, Err>,
    {
        for hook in &mut self.hooks {
            hook.executor_enter();
        }

        let mut scope = ExecutorScope {
            pipeline: self,
            completed: false,
        };
        let result = execution(&mut *scope.pipeline);
        scope.completed = result.is_ok();
        result
    }

    /// Every hook sees the end of the query. The first failure is returned.
    pub fn executor_end(&mut self, query: &QueryDesc) -> ExtStatResult<()> {
        let mut first_error = None;
        for hook in &mut self.hooks {
            if let Err(e) = hook.executor_end(query) {
                warn!("Hook {} failed at executor end: {}", hook.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn object_created(&mut self, object: CreatedObject) {
        for hook in &mut self.hooks {
            hook.object_created(object);
        }
    }

    pub fn statistics_dropped(&mut self, relation: RelationId) {
        for hook in &mut self.hooks {
            hook.statistics_dropped(relation);
        }
    }

    /// Every hook sees the end of the command. The first failure is returned.
    pub fn utility_completed(
        &mut self,
        catalog: &mut dyn HostCatalog<E>,
        completed: bool,
    ) -> ExtStatResult<()> {
        let mut first_error = None;
        for hook in &mut self.hooks {
            if let Err(e) = hook.utility_completed(catalog, completed) {
                warn!("Hook {} failed after utility command: {}", hook.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

struct ExecutorScope<'a, E> {
    pipeline: &'a mut HookPipeline<E>,
    completed: bool,
}

impl<'a, E> Drop for ExecutorScope<'a, E> {
    fn drop(&mut self) {
        for hook in self.pipeline.hooks.iter_mut().rev() {
            hook.executor_leave(self.completed);
        }
    }
}

/// Hooks of this crate: candidate collection around queries and statistics generation for
/// indexes created by utility commands.
pub struct ExtStatHooks<E> {
    config: ExtStatConfig,
    session: CollectorSession<E>,
    generator: StatisticsGenerator,
    queue: IndexCandidateQueue,
    recommendations: Recommendations<E>,
    outcomes: Vec<(RelationId, BuildOutcome)>,
}

impl<E: HostExpr> ExtStatHooks<E> {
    pub fn new(config: ExtStatConfig, signatures: Arc<SignatureCache>) -> ExtStatResult<Self> {
        config.validate()?;

        Ok(Self {
            session: CollectorSession::new(&config),
            generator: StatisticsGenerator::new(config.clone(), signatures),
            queue: IndexCandidateQueue::new(),
            recommendations: Recommendations::default(),
            outcomes: vec![],
            config,
        })
    }

    pub fn config(&self) -> &ExtStatConfig {
        &self.config
    }

    /// Changes one option for this session. Nothing changes on error.
    pub fn set_option(&mut self, name: &str, value: &str) -> ExtStatResult<()> {
        let mut config = self.config.clone();
        config.set_option(name, value)?;
        config.validate()?;

        self.session.update_config(&config);
        self.generator.update_config(&config);
        self.config = config;
        Ok(())
    }

    pub fn session(&self) -> &CollectorSession<E> {
        &self.session
    }

    pub fn pending_indexes(&self) -> usize {
        self.queue.len()
    }

    pub fn take_recommendations(&mut self) -> Recommendations<E> {
        std::mem::take(&mut self.recommendations)
    }

    pub fn take_outcomes(&mut self) -> Vec<(RelationId, BuildOutcome)> {
        std::mem::take(&mut self.outcomes)
    }
}

impl<E: HostExpr> ExtensionHook<E> for ExtStatHooks<E> {
    fn name(&self) -> &str {
        "extstat"
    }

    fn planner_final_paths(&mut self, relations: &[BaseRelation<E>], ctx: &dyn PlannerContext<E>) {
        self.session.collect_planner_clauses(relations, ctx);
    }

    fn executor_enter(&mut self) {
        self.session.begin_execution();
    }

    fn executor_leave(&mut self, completed: bool) {
        self.session.end_execution(completed);
    }

    /// Recommendations are kept even when some scans couldn't be checked. The first of these
    /// failures is returned.
    fn executor_end(&mut self, query: &QueryDesc) -> ExtStatResult<()> {
        let report = self.session.on_executor_end(query);
        self.recommendations.extend(report.recommendations);
        report.failures.into_iter().next().map_or(Ok(()), Err)
    }

    fn object_created(&mut self, object: CreatedObject) {
        if let CreatedObject::Relation(relation) = object {
            if self.config.mode != GenerationMode::Disabled {
                self.queue.remember(relation);
            }
        }
    }

    fn statistics_dropped(&mut self, relation: RelationId) {
        self.generator.signatures().forget_relation(relation);
    }

    fn utility_completed(
        &mut self,
        catalog: &mut dyn HostCatalog<E>,
        completed: bool,
    ) -> ExtStatResult<()> {
        if !completed {
            self.queue.clear();
            return Ok(());
        }

        let outcomes = self.queue.process(&self.generator, catalog)?;
        self.outcomes.extend(outcomes);
        Ok(())
    }
}
