use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, info, warn};

use super::decorator::decorate;
use super::node::Tree;
use super::rule::{AddedFile, RewriteRule};
use super::traversal::{PassStats, Traversal};
use super::types::TypeOracle;
use crate::error::{Result, RewriteError};

/// Limits applied to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum number of full traversals.
    pub max_passes: u32,
    /// How often one node may be re-offered to the rules within a pass.
    pub revisit_bound: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            max_passes: 2,
            revisit_bound: 1,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// A pass produced no mutation.
    Converged,
    /// The last allowed pass still mutated the tree. The tree is valid.
    BoundExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub passes: u32,
    pub outcome: PassOutcome,
    pub stats: Vec<PassStats>,
    /// Files requested by rules, one per path, in request order.
    pub added_files: Vec<AddedFile>,
}

impl RunReport {
    pub fn mutations(&self) -> usize {
        self.stats.iter().map(|s| s.mutations).sum()
    }

    pub fn changed(&self) -> bool {
        self.mutations() > 0 || !self.added_files.is_empty()
    }
}

/// Ordered set of rewrite rules applied to trees by repeated traversal.
///
/// Rules are dispatched in declaration order, except that a rule naming
/// others in [`RewriteRule::run_after`] is moved behind them. The pipeline
/// itself holds no per-tree state and may run many trees concurrently.
pub struct Pipeline {
    rules: Vec<Arc<dyn RewriteRule>>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline {
            rules: Vec::new(),
            config,
        }
    }

    /// Builds a pipeline from rules in declaration order.
    pub fn with_rules(config: PipelineConfig, rules: Vec<Arc<dyn RewriteRule>>) -> Result<Self> {
        let mut pipeline = Pipeline::new(config);
        for rule in rules {
            pipeline.add_rule(rule)?;
        }
        Ok(pipeline)
    }

    pub fn config(&self) -> PipelineConfig {
        self.config
    }

    /// Appends a rule and re-establishes the dispatch order.
    pub fn add_rule(&mut self, rule: Arc<dyn RewriteRule>) -> Result<()> {
        if self.rules.iter().any(|r| r.id() == rule.id()) {
            return Err(RewriteError::InvariantViolation(format!(
                "rule '{}' registered twice",
                rule.id()
            )));
        }
        let mut rules = self.rules.clone();
        rules.push(rule);
        self.rules = order_rules(rules)?;
        Ok(())
    }

    /// Removes a rule by its ID.
    pub fn remove_rule(&mut self, id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id() != id);
        self.rules.len() != before
    }

    /// Rule IDs in dispatch order.
    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Runs passes over `tree` until one makes no mutation or `max_passes` is reached.
    ///
    /// The tree is mutated in place. On a fatal error it is left in whatever
    /// state the failing pass produced; use [`Pipeline::run_owned`] to get
    /// all-or-nothing behaviour.
    pub fn run(&self, tree: &mut Tree, oracle: &dyn TypeOracle) -> Result<RunReport> {
        let mut stats = Vec::new();
        let mut added_files = Vec::new();
        let mut outcome = PassOutcome::BoundExceeded;

        for pass in 1..=self.config.max_passes {
            decorate(tree, oracle);
            let pass_stats = Traversal::new(
                &self.rules,
                tree,
                oracle,
                &mut added_files,
                pass,
                self.config.revisit_bound,
            )
            .run()?;
            tree.validate()?;
            info!(
                "Pass {} over {}: {} mutation(s)",
                pass,
                tree.path().map(|p| p.display().to_string()).unwrap_or_else(|| "<tree>".into()),
                pass_stats.mutations
            );
            stats.push(pass_stats);
            if !pass_stats.changed() {
                outcome = PassOutcome::Converged;
                break;
            }
        }

        if outcome == PassOutcome::BoundExceeded {
            warn!(
                "Tree {} still changing after {} pass(es)",
                tree.path().map(|p| p.display().to_string()).unwrap_or_else(|| "<tree>".into()),
                self.config.max_passes
            );
        }

        Ok(RunReport {
            passes: stats.len() as u32,
            outcome,
            stats,
            added_files: dedup_files(added_files),
        })
    }

    /// Like [`Pipeline::run`], but consumes the tree and hands it back only on success.
    pub fn run_owned(&self, mut tree: Tree, oracle: &dyn TypeOracle) -> Result<(Tree, RunReport)> {
        let report = self.run(&mut tree, oracle)?;
        Ok((tree, report))
    }
}

/// Keeps the first request for each path.
fn dedup_files(files: Vec<AddedFile>) -> Vec<AddedFile> {
    let mut seen = BTreeSet::new();
    files
        .into_iter()
        .filter(|f| {
            let fresh = seen.insert(f.path.clone());
            if !fresh {
                debug!("Dropping duplicate added file {}", f.path.display());
            }
            fresh
        })
        .collect()
}

/// Topological order over `run_after` edges, preferring declaration order.
fn order_rules(rules: Vec<Arc<dyn RewriteRule>>) -> Result<Vec<Arc<dyn RewriteRule>>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let indices: Vec<NodeIndex> = (0..rules.len()).map(|i| graph.add_node(i)).collect();
    let by_id: HashMap<&str, NodeIndex> = rules
        .iter()
        .zip(&indices)
        .map(|(r, i)| (r.id(), *i))
        .collect();

    for (rule, &node) in rules.iter().zip(&indices) {
        for dependency in rule.run_after() {
            // Dependencies on rules that are not registered are ignored.
            if let Some(&dep) = by_id.get(dependency) {
                graph.add_edge(dep, node, ());
            }
        }
    }

    // Kahn's algorithm, always releasing the earliest-declared ready rule.
    let mut in_degree: Vec<usize> = indices
        .iter()
        .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BTreeSet<usize> = (0..rules.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(rules.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for succ in graph.neighbors_directed(indices[next], Direction::Outgoing) {
            let succ = graph[succ];
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    if order.len() != rules.len() {
        let stuck = (0..rules.len())
            .find(|i| !order.contains(i))
            .map(|i| rules[i].id())
            .unwrap_or_default();
        return Err(RewriteError::RuleCycle(stuck.to_string()));
    }

    let mut slots: Vec<Option<Arc<dyn RewriteRule>>> = rules.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}
