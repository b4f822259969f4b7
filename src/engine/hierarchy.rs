//! Parent/child scheduling.
//!
//! Children of one parent form a single linear chain through `depends_on`.
//! A child may only leave `draft` once its predecessor is completed, and the
//! check happens inside the same conditional write as the status change.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use super::evaluator::ProgressEvaluator;
use super::EngineError;
use crate::models::*;

pub trait DirectiveStore: Send + Sync {
    fn get(&self, id: Uuid) -> anyhow::Result<Option<Directive>>;

    fn get_by_key(&self, key: &str) -> anyhow::Result<Option<Directive>>;

    /// Insert a standalone directive in `draft`.
    fn insert_standalone(&self, input: &CreateDirectiveInput) -> anyhow::Result<Directive>;

    fn children(&self, parent_id: Uuid) -> anyhow::Result<Vec<Directive>>;

    /// Apply `update` atomically. Returns false when any guard did not hold.
    fn compare_and_set_status(&self, update: &StatusUpdate) -> anyhow::Result<bool>;

    fn set_progress_cache(&self, id: Uuid, progress: u8) -> anyhow::Result<()>;

    /// Append `children` to the parent's chain in one transaction. Each insert
    /// is conditional on its `depends_on` still being the chain tail; returns
    /// false (and writes nothing) if the chain moved underneath the caller.
    fn append_children(&self, parent_id: Uuid, children: &[NewChild]) -> anyhow::Result<bool>;
}

// ============================================================
// Chain structure
// ============================================================

/// One `depends_on` pointer between siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEdge {
    pub child_id: Uuid,
    pub depends_on: Option<Uuid>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("child {0} appears more than once")]
    DuplicateChild(Uuid),

    #[error("child {0} depends on itself")]
    SelfDependency(Uuid),

    #[error("child {child} depends on {depends_on}, which is not a sibling")]
    ForeignPredecessor { child: Uuid, depends_on: Uuid },

    #[error("{predecessor} is the predecessor of more than one child")]
    Fork { predecessor: Uuid },

    #[error("chain has {0} heads, expected exactly one")]
    HeadCount(usize),

    #[error("{0} children are not reachable from the chain head")]
    Disconnected(usize),
}

/// Children of one parent, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildChain {
    order: Vec<Uuid>,
}

impl ChildChain {
    /// Build and validate a chain. An empty edge list is an empty chain.
    pub fn from_edges(edges: &[ChainEdge]) -> Result<Self, ChainError> {
        if edges.is_empty() {
            return Ok(Self::default());
        }

        let mut ids = HashSet::with_capacity(edges.len());
        for edge in edges {
            if !ids.insert(edge.child_id) {
                return Err(ChainError::DuplicateChild(edge.child_id));
            }
        }

        let mut successor: HashMap<Uuid, Uuid> = HashMap::with_capacity(edges.len());
        let mut heads = Vec::new();
        for edge in edges {
            match edge.depends_on {
                None => heads.push(edge.child_id),
                Some(dep) if dep == edge.child_id => {
                    return Err(ChainError::SelfDependency(edge.child_id))
                }
                Some(dep) if !ids.contains(&dep) => {
                    return Err(ChainError::ForeignPredecessor {
                        child: edge.child_id,
                        depends_on: dep,
                    })
                }
                Some(dep) => {
                    if successor.insert(dep, edge.child_id).is_some() {
                        return Err(ChainError::Fork { predecessor: dep });
                    }
                }
            }
        }

        let &[head] = heads.as_slice() else {
            return Err(ChainError::HeadCount(heads.len()));
        };

        let mut order = Vec::with_capacity(edges.len());
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            order.push(id);
            cursor = successor.get(&id).copied();
        }

        if order.len() != edges.len() {
            return Err(ChainError::Disconnected(edges.len() - order.len()));
        }

        Ok(Self { order })
    }

    pub fn from_children(children: &[Directive]) -> Result<Self, ChainError> {
        let edges: Vec<ChainEdge> = children
            .iter()
            .map(|c| ChainEdge {
                child_id: c.id,
                depends_on: c.depends_on,
            })
            .collect();
        Self::from_edges(&edges)
    }

    pub fn order(&self) -> &[Uuid] {
        &self.order
    }

    pub fn head(&self) -> Option<Uuid> {
        self.order.first().copied()
    }

    pub fn tail(&self) -> Option<Uuid> {
        self.order.last().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_last(&self, id: Uuid) -> bool {
        self.tail() == Some(id)
    }

    /// Edges produced by appending `new_ids`, in order, after the current tail.
    pub fn append_edges(&self, new_ids: &[Uuid]) -> Vec<ChainEdge> {
        let mut previous = self.tail();
        new_ids
            .iter()
            .map(|&child_id| {
                let edge = ChainEdge {
                    child_id,
                    depends_on: previous,
                };
                previous = Some(child_id);
                edge
            })
            .collect()
    }
}

/// Priority-weighted mean of child progress values, rounded down.
/// `None` when there are no children.
pub fn aggregate_progress(children: &[(u8, Priority)]) -> Option<u8> {
    let total_weight: u32 = children.iter().map(|(_, p)| p.weight()).sum();
    if total_weight == 0 {
        return None;
    }

    let weighted: u32 = children
        .iter()
        .map(|(progress, p)| u32::from(*progress) * p.weight())
        .sum();

    Some((weighted / total_weight) as u8)
}

// ============================================================
// Scheduler
// ============================================================

#[derive(Clone)]
pub struct HierarchyScheduler {
    directives: Arc<dyn DirectiveStore>,
    evaluator: ProgressEvaluator,
}

impl HierarchyScheduler {
    pub fn new(directives: Arc<dyn DirectiveStore>, evaluator: ProgressEvaluator) -> Self {
        Self {
            directives,
            evaluator,
        }
    }

    fn load(&self, id: Uuid) -> Result<Directive, EngineError> {
        self.directives.get(id)?.ok_or(EngineError::NotFound(id))
    }

    pub fn chain(&self, parent_id: Uuid) -> Result<ChildChain, EngineError> {
        let children = self.directives.children(parent_id)?;
        Ok(ChildChain::from_children(&children)?)
    }

    /// Children of `parent_id` in chain order.
    pub fn ordered_children(&self, parent_id: Uuid) -> Result<Vec<Directive>, EngineError> {
        self.load(parent_id)?;
        let children = self.directives.children(parent_id)?;
        let chain = ChildChain::from_children(&children)?;

        let mut by_id: HashMap<Uuid, Directive> =
            children.into_iter().map(|c| (c.id, c)).collect();
        Ok(chain
            .order()
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }

    /// Decompose `parent_id` further by appending children to the end of its chain.
    pub fn append_children(
        &self,
        parent_id: Uuid,
        inputs: Vec<CreateChildInput>,
    ) -> Result<Vec<Directive>, EngineError> {
        let parent = self.load(parent_id)?;

        if parent.is_child() {
            return Err(EngineError::InvalidTransition(format!(
                "{} is itself a child; decomposition is one level deep",
                parent.key
            )));
        }
        if parent.status.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "{} is completed and cannot take new children",
                parent.key
            )));
        }
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut keys = HashSet::with_capacity(inputs.len());
        for input in &inputs {
            if !keys.insert(input.key.as_str()) || self.directives.get_by_key(&input.key)?.is_some() {
                return Err(EngineError::Conflict(format!(
                    "directive key {} already exists",
                    input.key
                )));
            }
        }

        let siblings = self.directives.children(parent_id)?;
        let chain = ChildChain::from_children(&siblings)?;

        let new_ids: Vec<Uuid> = inputs.iter().map(|_| Uuid::new_v4()).collect();
        let new_edges = chain.append_edges(&new_ids);

        let mut all_edges: Vec<ChainEdge> = siblings
            .iter()
            .map(|s| ChainEdge {
                child_id: s.id,
                depends_on: s.depends_on,
            })
            .collect();
        all_edges.extend(new_edges.iter().copied());
        ChildChain::from_edges(&all_edges)?;

        let new_children: Vec<NewChild> = inputs
            .into_iter()
            .zip(new_edges)
            .map(|(input, edge)| NewChild {
                id: edge.child_id,
                key: input.key,
                title: input.title,
                declared_type: input
                    .declared_type
                    .unwrap_or_else(|| parent.declared_type.clone()),
                priority: input.priority.unwrap_or(Priority::Medium),
                depends_on: edge.depends_on,
            })
            .collect();

        if !self
            .directives
            .append_children(parent_id, &new_children)?
        {
            return Err(EngineError::Conflict(format!(
                "chain of {} changed while appending children",
                parent.key
            )));
        }

        tracing::info!(
            parent_id = %parent_id,
            appended = new_children.len(),
            chain_length = chain.len() + new_children.len(),
            "Appended children to chain"
        );

        let created = new_children
            .iter()
            .map(|c| self.load(c.id))
            .collect::<Result<Vec<_>, _>>()?;
        self.recompute_parent(parent_id)?;
        Ok(created)
    }

    /// Move a directive to a working status.
    ///
    /// `completed` is not reachable from here; use the completion guard.
    /// Transitioning to the current status is a no-op.
    pub fn transition(
        &self,
        id: Uuid,
        target: DirectiveStatus,
    ) -> Result<Directive, EngineError> {
        let directive = self.load(id)?;

        if directive.status == target {
            return Ok(directive);
        }
        if target == DirectiveStatus::Completed {
            return Err(EngineError::InvalidTransition(
                "completion requires the completion gate".to_string(),
            ));
        }
        if !directive.status.can_transition_to(target) {
            return Err(EngineError::InvalidTransition(format!(
                "{} cannot move from {} to {}",
                directive.key, directive.status, target
            )));
        }

        let update = StatusUpdate {
            id,
            expected: directive.status,
            target,
            require_children_complete: false,
        };
        if !self.directives.compare_and_set_status(&update)? {
            return Err(self.explain_rejection(&directive)?);
        }

        tracing::info!(
            directive_id = %id,
            from = %directive.status,
            to = %target,
            "Directive transitioned"
        );

        let updated = self.load(id)?;
        self.on_directive_changed(&updated)?;
        Ok(updated)
    }

    /// Work out why a conditional write on `before` did not apply.
    pub(crate) fn explain_rejection(&self, before: &Directive) -> Result<EngineError, EngineError> {
        let current = self.load(before.id)?;

        if current.status != before.status {
            return Ok(EngineError::Conflict(format!(
                "{} changed from {} to {} concurrently",
                current.key, before.status, current.status
            )));
        }

        if let Some(predecessor_id) = current.depends_on {
            let predecessor = self.load(predecessor_id)?;
            if predecessor.status != DirectiveStatus::Completed {
                tracing::info!(
                    event = "dependency_rejected",
                    directive_id = %current.id,
                    predecessor_id = %predecessor.id,
                    predecessor_status = %predecessor.status,
                    "Predecessor not completed"
                );
                return Ok(EngineError::DependencyNotSatisfied {
                    directive_id: current.id,
                    predecessor_id,
                    predecessor_status: predecessor.status,
                });
            }
        }

        let incomplete_children = self.incomplete_children(current.id)?;
        if !incomplete_children.is_empty() {
            return Ok(EngineError::IncompleteGate {
                missing_phases: Vec::new(),
                incomplete_children,
            });
        }

        Ok(EngineError::Conflict(format!(
            "{} could not be updated",
            current.key
        )))
    }

    pub(crate) fn incomplete_children(&self, parent_id: Uuid) -> Result<Vec<Uuid>, EngineError> {
        Ok(self
            .directives
            .children(parent_id)?
            .into_iter()
            .filter(|c| c.status != DirectiveStatus::Completed)
            .map(|c| c.id)
            .collect())
    }

    /// Predecessor that still blocks `directive`, if any.
    pub(crate) fn blocking_predecessor(
        &self,
        directive: &Directive,
    ) -> Result<Option<Uuid>, EngineError> {
        let Some(predecessor_id) = directive.depends_on else {
            return Ok(None);
        };
        let predecessor = self.load(predecessor_id)?;
        Ok((predecessor.status != DirectiveStatus::Completed).then_some(predecessor_id))
    }

    /// Progress a child contributes to its parent.
    fn child_progress(&self, child: &Directive) -> Result<u8, EngineError> {
        if child.status == DirectiveStatus::Completed {
            return Ok(100);
        }
        self.evaluator.calculate_for(child)
    }

    /// Priority-weighted child progress, or `None` for a directive without children.
    pub fn aggregated_progress(&self, parent_id: Uuid) -> Result<Option<u8>, EngineError> {
        let children = self.directives.children(parent_id)?;
        let readings = children
            .iter()
            .map(|c| Ok((self.child_progress(c)?, c.priority)))
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(aggregate_progress(&readings))
    }

    /// Displayed progress: the child aggregate for parents, `calculate()` otherwise.
    pub fn display_progress(&self, directive: &Directive) -> Result<u8, EngineError> {
        if directive.status == DirectiveStatus::Completed {
            return Ok(100);
        }
        match self.aggregated_progress(directive.id)? {
            Some(aggregate) => Ok(aggregate),
            None => self.evaluator.calculate_for(directive),
        }
    }

    /// Refresh the cached progress of `directive` and, for a child, of its parent.
    pub fn on_directive_changed(&self, directive: &Directive) -> Result<u8, EngineError> {
        let progress = self.display_progress(directive)?;
        if progress != directive.progress_cache {
            self.directives.set_progress_cache(directive.id, progress)?;
        }
        if let Some(parent_id) = directive.parent_id {
            self.recompute_parent(parent_id)?;
        }
        Ok(progress)
    }

    /// A draft parent starts orchestrating as soon as any child leaves `draft`.
    fn start_parent(
        &self,
        parent: Directive,
        children: &[Directive],
    ) -> Result<Directive, EngineError> {
        if parent.status != DirectiveStatus::Draft
            || children.iter().all(|c| c.status == DirectiveStatus::Draft)
        {
            return Ok(parent);
        }

        let update = StatusUpdate {
            id: parent.id,
            expected: DirectiveStatus::Draft,
            target: DirectiveStatus::InProgress,
            require_children_complete: false,
        };
        if self.directives.compare_and_set_status(&update)? {
            tracing::info!(
                event = "parent_started",
                parent_id = %parent.id,
                "Child started, parent moved to in_progress"
            );
        }
        self.load(parent.id)
    }

    /// Re-derive a parent's aggregate and auto-complete it once the last
    /// child in chain order has completed.
    pub fn recompute_parent(&self, parent_id: Uuid) -> Result<Option<u8>, EngineError> {
        let parent = self.load(parent_id)?;
        let children = self.directives.children(parent_id)?;
        if children.is_empty() {
            return Ok(None);
        }

        let readings = children
            .iter()
            .map(|c| Ok((self.child_progress(c)?, c.priority)))
            .collect::<Result<Vec<_>, EngineError>>()?;
        let Some(aggregate) = aggregate_progress(&readings) else {
            return Ok(None);
        };

        if parent.status == DirectiveStatus::Completed {
            return Ok(Some(100));
        }
        let parent = self.start_parent(parent, &children)?;

        if aggregate != parent.progress_cache {
            self.directives.set_progress_cache(parent_id, aggregate)?;
        }

        let chain = ChildChain::from_children(&children)?;
        let last_completed = chain
            .tail()
            .and_then(|tail| children.iter().find(|c| c.id == tail))
            .is_some_and(|c| c.status == DirectiveStatus::Completed);

        if last_completed {
            let update = StatusUpdate {
                id: parent_id,
                expected: parent.status,
                target: DirectiveStatus::Completed,
                require_children_complete: true,
            };
            if self.directives.compare_and_set_status(&update)? {
                tracing::info!(
                    event = "parent_auto_completed",
                    parent_id = %parent_id,
                    children = children.len(),
                    aggregate,
                    "Last child completed, parent completed"
                );
                return Ok(Some(100));
            }
            tracing::debug!(
                parent_id = %parent_id,
                "Parent auto-completion skipped, state changed concurrently"
            );
        }

        Ok(Some(aggregate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    fn linear(ids: &[Uuid]) -> Vec<ChainEdge> {
        ids.iter()
            .enumerate()
            .map(|(i, &child_id)| ChainEdge {
                child_id,
                depends_on: (i > 0).then(|| ids[i - 1]),
            })
            .collect()
    }

    #[test]
    fn orders_a_shuffled_linear_chain() {
        let ids = ids(4);
        let mut edges = linear(&ids);
        edges.reverse();

        let chain = ChildChain::from_edges(&edges).unwrap();
        assert_eq!(chain.order(), &ids[..]);
        assert_eq!(chain.head(), Some(ids[0]));
        assert!(chain.is_last(ids[3]));
    }

    #[test]
    fn empty_chain_is_valid() {
        let chain = ChildChain::from_edges(&[]).unwrap();
        assert!(chain.is_empty());
        assert_eq!(chain.tail(), None);
    }

    #[test]
    fn rejects_two_heads() {
        let ids = ids(2);
        let edges: Vec<ChainEdge> = ids
            .iter()
            .map(|&child_id| ChainEdge {
                child_id,
                depends_on: None,
            })
            .collect();
        assert_eq!(
            ChildChain::from_edges(&edges),
            Err(ChainError::HeadCount(2))
        );
    }

    #[test]
    fn rejects_a_fork() {
        let ids = ids(3);
        let edges = vec![
            ChainEdge { child_id: ids[0], depends_on: None },
            ChainEdge { child_id: ids[1], depends_on: Some(ids[0]) },
            ChainEdge { child_id: ids[2], depends_on: Some(ids[0]) },
        ];
        assert_eq!(
            ChildChain::from_edges(&edges),
            Err(ChainError::Fork { predecessor: ids[0] })
        );
    }

    #[test]
    fn rejects_a_detached_cycle() {
        let ids = ids(3);
        let edges = vec![
            ChainEdge { child_id: ids[0], depends_on: None },
            ChainEdge { child_id: ids[1], depends_on: Some(ids[2]) },
            ChainEdge { child_id: ids[2], depends_on: Some(ids[1]) },
        ];
        assert_eq!(
            ChildChain::from_edges(&edges),
            Err(ChainError::Disconnected(2))
        );
    }

    #[test]
    fn rejects_foreign_and_self_predecessors() {
        let ids = ids(2);
        let outsider = Uuid::new_v4();
        let foreign = vec![
            ChainEdge { child_id: ids[0], depends_on: None },
            ChainEdge { child_id: ids[1], depends_on: Some(outsider) },
        ];
        assert!(matches!(
            ChildChain::from_edges(&foreign),
            Err(ChainError::ForeignPredecessor { .. })
        ));

        let selfish = vec![
            ChainEdge { child_id: ids[0], depends_on: None },
            ChainEdge { child_id: ids[1], depends_on: Some(ids[1]) },
        ];
        assert_eq!(
            ChildChain::from_edges(&selfish),
            Err(ChainError::SelfDependency(ids[1]))
        );
    }

    #[test]
    fn append_edges_continue_from_the_tail() {
        let existing = ids(2);
        let chain = ChildChain::from_edges(&linear(&existing)).unwrap();
        let new = ids(2);

        let edges = chain.append_edges(&new);
        assert_eq!(edges[0].depends_on, Some(existing[1]));
        assert_eq!(edges[1].depends_on, Some(new[0]));
    }

    #[test]
    fn aggregate_weights_children_by_priority() {
        let progress = aggregate_progress(&[
            (100, Priority::Critical),
            (50, Priority::High),
            (0, Priority::Low),
        ]);
        // (100*40 + 50*30 + 0*10) / 80 = 68.75
        assert_eq!(progress, Some(68));
    }

    #[test]
    fn aggregate_of_no_children_is_none() {
        assert_eq!(aggregate_progress(&[]), None);
    }

    #[test]
    fn aggregate_of_completed_children_is_one_hundred() {
        let progress = aggregate_progress(&[
            (100, Priority::Low),
            (100, Priority::Medium),
            (100, Priority::Critical),
        ]);
        assert_eq!(progress, Some(100));
    }
}
