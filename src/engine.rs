use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::evaluate::{Evaluator, Memo, Phase};
use crate::types::{
    DataContext, ErrorKind, EvalError, ExecutionReport, FunctionRegistry, HaltReason,
    KnowledgeBase, RuleEntry, WorkingMemory,
};

/// Cycle budget used when none is configured.
pub const DEFAULT_MAX_CYCLE: u64 = 5000;

/// Per-engine settings. Passed in explicitly; there is no global default
/// to mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    max_cycle: u64,
    refraction: bool,
    memoize: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cycle: DEFAULT_MAX_CYCLE,
            refraction: true,
            memoize: true,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of cycles a run may execute.
    #[must_use]
    pub fn with_max_cycle(mut self, max_cycle: u64) -> Self {
        self.max_cycle = max_cycle;
        self
    }

    /// When enabled, a rule whose actions changed no fact is not selected
    /// again until some later action changes a fact.
    ///
    /// ```
    /// use rulekeeper::{DataContext, Engine, EngineConfig, KnowledgeBase};
    ///
    /// let grl = r#"rule Tick { when true then Log("tick"); }"#;
    /// let mut kb = KnowledgeBase::from_grl("Idle", "1", grl)?;
    /// let mut ctx = DataContext::new();
    /// assert_eq!(Engine::new().execute(&mut kb, &mut ctx)?.cycles(), 1);
    ///
    /// let config = EngineConfig::new().with_max_cycle(3).with_refraction(false);
    /// assert!(Engine::with_config(config).execute(&mut kb, &mut ctx).is_err());
    /// # Ok::<(), rulekeeper::RulekeeperError>(())
    /// ```
    #[must_use]
    pub fn with_refraction(mut self, refraction: bool) -> Self {
        self.refraction = refraction;
        self
    }

    /// When disabled, runs skip working memory and evaluate every node
    /// each time it is reached. Results are the same, only slower.
    #[must_use]
    pub fn with_memoization(mut self, memoize: bool) -> Self {
        self.memoize = memoize;
        self
    }

    #[must_use]
    pub fn max_cycle(&self) -> u64 {
        self.max_cycle
    }

    #[must_use]
    pub fn refraction(&self) -> bool {
        self.refraction
    }

    #[must_use]
    pub fn memoization(&self) -> bool {
        self.memoize
    }
}

/// Failure of a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rule '{rule}' failed in cycle {cycle}: {source}")]
    Evaluation {
        rule: String,
        cycle: u64,
        #[source]
        source: EvalError,
    },

    #[error("cycle limit of {limit} exceeded after {cycle} cycles")]
    CycleLimitExceeded { limit: u64, cycle: u64 },
}

impl EngineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Evaluation { source, .. } => source.kind(),
            EngineError::CycleLimitExceeded { .. } => ErrorKind::CycleLimitExceeded,
        }
    }

    /// The cycle the failure happened in. 0 for read-only queries.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        match self {
            EngineError::Evaluation { cycle, .. } | EngineError::CycleLimitExceeded { cycle, .. } => {
                *cycle
            }
        }
    }

    #[must_use]
    pub fn rule_name(&self) -> Option<&str> {
        match self {
            EngineError::Evaluation { rule, .. } => Some(rule),
            EngineError::CycleLimitExceeded { .. } => None,
        }
    }
}

/// Observer hooks called during a run. All methods default to no-ops.
pub trait EngineListener: Send + Sync {
    fn begin_cycle(&self, cycle: u64) {
        let _ = cycle;
    }

    fn evaluate_rule_entry(&self, cycle: u64, rule: &RuleEntry, matched: bool) {
        let _ = (cycle, rule, matched);
    }

    fn execute_rule_entry(&self, cycle: u64, rule: &RuleEntry) {
        let _ = (cycle, rule);
    }
}

/// Runs knowledge base instances against data contexts.
///
/// An engine is cheap to share: it holds configuration, the function
/// registry and listeners, never per-run state.
#[derive(Clone, Default)]
pub struct Engine {
    config: EngineConfig,
    functions: FunctionRegistry,
    listeners: Vec<Arc<dyn EngineListener>>,
}

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn EngineListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    #[must_use]
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    /// Run cycles until no rule is eligible, a rule calls `Complete()`, or
    /// the cycle budget is exhausted.
    ///
    /// The instance's working memory is reset first, since facts may have
    /// changed since the previous run.
    ///
    /// # Errors
    ///
    /// [`EngineError::Evaluation`] if a condition or action fails; the
    /// effects of actions already executed remain applied.
    /// [`EngineError::CycleLimitExceeded`] if rules are still eligible after
    /// the configured number of cycles.
    #[instrument(skip_all, fields(knowledge_base = %kb.name, version = %kb.version))]
    pub fn execute(
        &self,
        kb: &mut KnowledgeBase,
        ctx: &mut DataContext<'_>,
    ) -> Result<ExecutionReport, EngineError> {
        let start = Instant::now();
        let KnowledgeBase {
            graph,
            rules,
            by_name,
            agenda,
            memory,
            ..
        } = kb;
        memory.reset();

        let mut retracted_next: HashSet<usize> = HashSet::new();
        let mut quiescent: HashSet<usize> = HashSet::new();
        let mut fired = Vec::new();
        let mut cycle: u64 = 0;

        let halt = loop {
            let suppressed = std::mem::take(&mut retracted_next);
            let current = cycle + 1;
            for listener in &self.listeners {
                listener.begin_cycle(current);
            }

            let mut winner = None;
            let mut candidates = 0usize;
            for &idx in agenda.iter() {
                if suppressed.contains(&idx) || quiescent.contains(&idx) {
                    continue;
                }
                let rule = &rules[idx];
                let mut evaluator = Evaluator::new(
                    graph,
                    &self.functions,
                    &mut *ctx,
                    self.memo(&mut *memory),
                    Phase::Condition,
                );
                let matched = evaluator
                    .condition(rule)
                    .map_err(|source| failure(rule, current, source))?;
                for listener in &self.listeners {
                    listener.evaluate_rule_entry(current, rule, matched);
                }
                if matched {
                    candidates += 1;
                    winner.get_or_insert(idx);
                }
            }

            let Some(idx) = winner else {
                break HaltReason::Exhausted;
            };
            if cycle >= self.config.max_cycle {
                warn!(
                    limit = self.config.max_cycle,
                    candidates, "cycle limit exceeded"
                );
                return Err(EngineError::CycleLimitExceeded {
                    limit: self.config.max_cycle,
                    cycle,
                });
            }
            cycle = current;

            let rule = &rules[idx];
            debug!(cycle, candidates, winner = %rule.name, "rule selected");
            for listener in &self.listeners {
                listener.execute_rule_entry(cycle, rule);
            }
            let mut evaluator = Evaluator::new(
                graph,
                &self.functions,
                &mut *ctx,
                self.memo(&mut *memory),
                Phase::Action,
            );
            evaluator
                .actions(rule)
                .map_err(|source| failure(rule, cycle, source))?;
            let effects = evaluator.into_effects();
            fired.push(rule.name.clone());

            for name in &effects.retracted {
                let target = resolve_retract(by_name, name)
                    .map_err(|source| failure(rule, cycle, source))?;
                retracted_next.insert(target);
            }
            if effects.changed {
                quiescent.clear();
            } else if self.config.refraction {
                quiescent.insert(idx);
            }
            if effects.complete {
                break HaltReason::Completed;
            }
        };

        let report = ExecutionReport::new(cycle, fired, halt, start.elapsed());
        info!(cycles = cycle, halt = ?halt, "run finished");
        Ok(report)
    }

    fn memo<'m>(&self, memory: &'m mut WorkingMemory) -> Memo<'m> {
        if self.config.memoize {
            Memo::Tracking(memory)
        } else {
            Memo::Disabled
        }
    }

    /// Names of the rules whose conditions currently hold, in the order the
    /// engine would consider them. Evaluates conditions only; never runs
    /// actions or touches the instance's working memory.
    ///
    /// # Errors
    ///
    /// [`EngineError::Evaluation`] with cycle 0 if a condition fails.
    pub fn fetch_matching_rules(
        &self,
        kb: &KnowledgeBase,
        ctx: &mut DataContext<'_>,
    ) -> Result<Vec<String>, EngineError> {
        let mut evaluator = Evaluator::new(
            &kb.graph,
            &self.functions,
            ctx,
            Memo::Scratch(HashMap::new()),
            Phase::Condition,
        );
        let mut matching = Vec::new();
        for &idx in &kb.agenda {
            let rule = &kb.rules[idx];
            if evaluator
                .condition(rule)
                .map_err(|source| failure(rule, 0, source))?
            {
                matching.push(rule.name.clone());
            }
        }
        Ok(matching)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("functions", &self.functions)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

fn failure(rule: &RuleEntry, cycle: u64, source: EvalError) -> EngineError {
    EngineError::Evaluation {
        rule: rule.name.clone(),
        cycle,
        source,
    }
}

fn resolve_retract(by_name: &HashMap<String, usize>, name: &str) -> Result<usize, EvalError> {
    by_name
        .get(name)
        .copied()
        .ok_or_else(|| EvalError::InvocationError {
            target: "Retract".into(),
            argument: Some(0),
            message: format!("no rule named '{name}'"),
            expr: format!("Retract({name:?})"),
        })
}
