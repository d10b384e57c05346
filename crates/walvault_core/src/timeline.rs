//! Timeline forest for branching WAL history.
//!
//! Timelines are discovered lazily: the first WAL segment or backup
//! that references an unknown timeline synthesizes a record with
//! [`Ancestry::Pending`]. Parentage is filled in later from history
//! file evidence. Until then, a pending timeline is treated as
//! unrelated to every other timeline - never misread as a root.
//!
//! ## Invariants
//!
//! - Timelines are **append-only**: ancestry moves `Pending ->
//!   Forked`/`Root` exactly once and is never rewritten
//! - A timeline's own LSN span starts immediately after its fork point
//!   on the parent
//! - Ancestry resolution never fails the operation that triggered
//!   discovery

use crate::error::{CatalogError, CatalogResult};
use crate::types::{Lsn, TimelineId};
use std::collections::BTreeMap;

/// The first timeline of a cluster, which has no parent.
pub const ROOT_TIMELINE: TimelineId = TimelineId::new(1);

/// How a timeline relates to the rest of the forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ancestry {
    /// The original timeline; covers all LSNs from the beginning.
    Root,
    /// Diverged from `parent` at `fork_lsn` (exclusive).
    Forked {
        /// The timeline this one branched from.
        parent: TimelineId,
        /// The position of the divergence on the parent.
        fork_lsn: Lsn,
    },
    /// Referenced but with no parentage evidence yet.
    Pending,
}

/// One branch of WAL history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    /// The timeline identifier.
    pub id: TimelineId,
    /// Known ancestry state.
    pub ancestry: Ancestry,
}

/// The set of timelines known to a server's catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineHistory {
    timelines: BTreeMap<TimelineId, Timeline>,
}

impl TimelineHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a timeline by ID.
    #[must_use]
    pub fn resolve(&self, id: TimelineId) -> Option<&Timeline> {
        self.timelines.get(&id)
    }

    /// Returns all known timelines in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Timeline> {
        self.timelines.values()
    }

    /// Records that a timeline exists, synthesizing a pending record
    /// if it was not yet known.
    ///
    /// Timeline 1 is the cluster's original history and is recorded as
    /// a root; every other new timeline starts pending.
    pub fn observe(&mut self, id: TimelineId) {
        self.timelines.entry(id).or_insert_with(|| Timeline {
            id,
            ancestry: if id == ROOT_TIMELINE {
                Ancestry::Root
            } else {
                Ancestry::Pending
            },
        });
    }

    /// Records fork evidence: `child` diverged from `parent` at
    /// `fork_lsn`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the child already has conflicting
    /// fork evidence.
    pub fn observe_fork(
        &mut self,
        child: TimelineId,
        parent: TimelineId,
        fork_lsn: Lsn,
    ) -> CatalogResult<()> {
        self.observe(parent);
        self.observe(child);
        let record = self
            .timelines
            .get_mut(&child)
            .ok_or_else(|| CatalogError::invalid_state("timeline vanished during observe"))?;
        match record.ancestry {
            Ancestry::Pending => {
                record.ancestry = Ancestry::Forked { parent, fork_lsn };
                Ok(())
            }
            Ancestry::Forked {
                parent: p,
                fork_lsn: l,
            } if p == parent && l == fork_lsn => Ok(()),
            Ancestry::Forked { parent: p, .. } => Err(CatalogError::invalid_state(format!(
                "conflicting fork evidence for {child}: already forked from {p}"
            ))),
            Ancestry::Root => Err(CatalogError::invalid_state(format!(
                "fork evidence for root timeline {child}"
            ))),
        }
    }

    /// Returns true if `candidate` is a strict ancestor of `of`.
    ///
    /// Timelines with pending ancestry terminate the walk, so two
    /// branches with unresolved parentage compare as unrelated.
    #[must_use]
    pub fn is_ancestor(&self, candidate: TimelineId, of: TimelineId) -> bool {
        let mut current = of;
        loop {
            match self.resolve(current).map(|t| t.ancestry) {
                Some(Ancestry::Forked { parent, .. }) => {
                    if parent == candidate {
                        return true;
                    }
                    current = parent;
                }
                _ => return false,
            }
        }
    }

    /// Returns true if `candidate` equals `of` or is an ancestor of it.
    #[must_use]
    pub fn is_ancestor_or_self(&self, candidate: TimelineId, of: TimelineId) -> bool {
        candidate == of || self.is_ancestor(candidate, of)
    }

    /// Returns the fork path of `timeline`, root-first.
    ///
    /// Each entry carries the exclusive upper LSN bound contributed by
    /// that timeline: the fork point where the next entry diverged, or
    /// `None` for the final (unbounded) entry. A pending timeline
    /// starts its own path.
    #[must_use]
    pub fn fork_path(&self, timeline: TimelineId) -> Vec<(TimelineId, Option<Lsn>)> {
        let mut reversed = Vec::new();
        let mut current = timeline;
        let mut child_fork: Option<Lsn> = None;
        loop {
            reversed.push((current, child_fork));
            match self.resolve(current).map(|t| t.ancestry) {
                Some(Ancestry::Forked { parent, fork_lsn }) => {
                    child_fork = Some(fork_lsn);
                    current = parent;
                }
                _ => break,
            }
        }
        reversed.reverse();
        reversed
    }

    /// Returns true if `lsn` falls within the history reachable by
    /// replaying `timeline` from the beginning.
    ///
    /// `head` is the known end of the timeline's own archived WAL, if
    /// any; positions beyond it are not reachable. Positions at or
    /// before a fork point are resolved against the ancestor chain.
    #[must_use]
    pub fn lsn_is_reachable(&self, lsn: Lsn, timeline: TimelineId, head: Option<Lsn>) -> bool {
        if let Some(h) = head {
            if lsn > h {
                return false;
            }
        }
        let mut current = timeline;
        loop {
            match self.resolve(current).map(|t| t.ancestry) {
                Some(Ancestry::Forked { parent, fork_lsn }) => {
                    if lsn > fork_lsn {
                        // Within this timeline's own span.
                        return true;
                    }
                    current = parent;
                }
                Some(Ancestry::Root) => return true,
                // Ancestry unknown: assume the span covers the position
                // and let later evidence refine the answer.
                Some(Ancestry::Pending) => return true,
                None => return false,
            }
        }
    }

    /// Parses the content of a timeline history file and records every
    /// fork it describes.
    ///
    /// Each non-empty line has the form `parent-tli <TAB> fork-lsn
    /// <TAB> reason`. Lines are ordered oldest-first; consecutive
    /// lines chain ancestors, and the final line is the direct parent
    /// of `child`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` on malformed lines or conflicting fork
    /// evidence.
    pub fn load_history_file(&mut self, child: TimelineId, content: &str) -> CatalogResult<()> {
        let mut previous: Option<(TimelineId, Lsn)> = None;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let tli: u32 = fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| {
                    CatalogError::invalid_state(format!("malformed history line: {line}"))
                })?;
            let lsn: Lsn = fields
                .next()
                .ok_or_else(|| {
                    CatalogError::invalid_state(format!("malformed history line: {line}"))
                })?
                .parse()
                .map_err(|_| {
                    CatalogError::invalid_state(format!("malformed history LSN: {line}"))
                })?;
            let tli = TimelineId::new(tli);
            if let Some((parent, fork_lsn)) = previous {
                self.observe_fork(tli, parent, fork_lsn)?;
            }
            previous = Some((tli, lsn));
        }
        if let Some((parent, fork_lsn)) = previous {
            self.observe_fork(child, parent, fork_lsn)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forked_history() -> TimelineHistory {
        // tli 2 forked from tli 1 at LSN 100
        let mut history = TimelineHistory::new();
        history.observe(ROOT_TIMELINE);
        history
            .observe_fork(TimelineId::new(2), ROOT_TIMELINE, Lsn::new(100))
            .unwrap();
        history
    }

    #[test]
    fn observe_synthesizes_pending() {
        let mut history = TimelineHistory::new();
        history.observe(TimelineId::new(5));
        let tl = history.resolve(TimelineId::new(5)).unwrap();
        assert_eq!(tl.ancestry, Ancestry::Pending);
    }

    #[test]
    fn timeline_one_is_root() {
        let mut history = TimelineHistory::new();
        history.observe(ROOT_TIMELINE);
        assert_eq!(
            history.resolve(ROOT_TIMELINE).unwrap().ancestry,
            Ancestry::Root
        );
    }

    #[test]
    fn resolve_unknown_is_none() {
        let history = TimelineHistory::new();
        assert!(history.resolve(TimelineId::new(9)).is_none());
    }

    #[test]
    fn fork_evidence_fills_pending() {
        let mut history = TimelineHistory::new();
        history.observe(TimelineId::new(2));
        history
            .observe_fork(TimelineId::new(2), ROOT_TIMELINE, Lsn::new(50))
            .unwrap();
        assert_eq!(
            history.resolve(TimelineId::new(2)).unwrap().ancestry,
            Ancestry::Forked {
                parent: ROOT_TIMELINE,
                fork_lsn: Lsn::new(50)
            }
        );
    }

    #[test]
    fn duplicate_fork_evidence_is_idempotent() {
        let mut history = forked_history();
        assert!(history
            .observe_fork(TimelineId::new(2), ROOT_TIMELINE, Lsn::new(100))
            .is_ok());
    }

    #[test]
    fn conflicting_fork_evidence_rejected() {
        let mut history = forked_history();
        let err = history
            .observe_fork(TimelineId::new(2), TimelineId::new(3), Lsn::new(100))
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidState { .. }));
    }

    #[test]
    fn ancestor_walk() {
        let mut history = forked_history();
        history
            .observe_fork(TimelineId::new(3), TimelineId::new(2), Lsn::new(200))
            .unwrap();

        assert!(history.is_ancestor(ROOT_TIMELINE, TimelineId::new(3)));
        assert!(history.is_ancestor(TimelineId::new(2), TimelineId::new(3)));
        assert!(!history.is_ancestor(TimelineId::new(3), ROOT_TIMELINE));
        // Strict: a timeline is not its own ancestor
        assert!(!history.is_ancestor(TimelineId::new(2), TimelineId::new(2)));
    }

    #[test]
    fn pending_timelines_are_unrelated() {
        let mut history = TimelineHistory::new();
        history.observe(TimelineId::new(2));
        history.observe(TimelineId::new(3));
        assert!(!history.is_ancestor(TimelineId::new(2), TimelineId::new(3)));
        assert!(!history.is_ancestor(TimelineId::new(3), TimelineId::new(2)));
    }

    #[test]
    fn reachability_via_ancestor() {
        let history = forked_history();
        // LSN 50 precedes the fork at 100, so it lives on the parent.
        assert!(history.lsn_is_reachable(Lsn::new(50), TimelineId::new(2), None));
        // LSN 150 is on timeline 2's own span.
        assert!(history.lsn_is_reachable(Lsn::new(150), TimelineId::new(2), None));
    }

    #[test]
    fn reachability_bounded_by_head() {
        let history = forked_history();
        // Timeline 1's archive ends at 100; 150 was never written there.
        assert!(!history.lsn_is_reachable(Lsn::new(150), ROOT_TIMELINE, Some(Lsn::new(100))));
        assert!(history.lsn_is_reachable(Lsn::new(80), ROOT_TIMELINE, Some(Lsn::new(100))));
    }

    #[test]
    fn fork_path_is_root_first() {
        let mut history = forked_history();
        history
            .observe_fork(TimelineId::new(3), TimelineId::new(2), Lsn::new(200))
            .unwrap();

        let path = history.fork_path(TimelineId::new(3));
        assert_eq!(
            path,
            vec![
                (ROOT_TIMELINE, Some(Lsn::new(100))),
                (TimelineId::new(2), Some(Lsn::new(200))),
                (TimelineId::new(3), None),
            ]
        );
    }

    #[test]
    fn history_file_chains_forks() {
        let mut history = TimelineHistory::new();
        let content = "1\t0/64\tno recovery target specified\n2\t0/C8\treason\n";
        history
            .load_history_file(TimelineId::new(3), content)
            .unwrap();

        assert!(history.is_ancestor(ROOT_TIMELINE, TimelineId::new(3)));
        assert_eq!(
            history.resolve(TimelineId::new(3)).unwrap().ancestry,
            Ancestry::Forked {
                parent: TimelineId::new(2),
                fork_lsn: Lsn::new(0xC8)
            }
        );
        assert_eq!(
            history.resolve(TimelineId::new(2)).unwrap().ancestry,
            Ancestry::Forked {
                parent: ROOT_TIMELINE,
                fork_lsn: Lsn::new(0x64)
            }
        );
    }

    #[test]
    fn malformed_history_line_rejected() {
        let mut history = TimelineHistory::new();
        assert!(history
            .load_history_file(TimelineId::new(2), "not a history line")
            .is_err());
    }
}
