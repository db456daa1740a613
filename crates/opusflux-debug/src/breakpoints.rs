//! Breakpoint registry keyed by source span.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::span::SourceSpan;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub span: SourceSpan,
    pub enabled: bool,
    pub hit_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointToggle {
    Added,
    Removed,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: IndexMap<SourceSpan, Breakpoint>,
    generation: u64,
}

/// Shared between the UI-facing side, which toggles, and the worker thread,
/// which queries at every correlated event.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    state: RwLock<RegistryState>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an enabled breakpoint at `span`, or removes the one already there.
    pub fn toggle(&self, span: SourceSpan) -> BreakpointToggle {
        let mut state = self.state.write();
        state.generation += 1;
        if state.entries.shift_remove(&span).is_some() {
            return BreakpointToggle::Removed;
        }
        state.entries.insert(
            span.clone(),
            Breakpoint {
                span,
                enabled: true,
                hit_count: 0,
            },
        );
        BreakpointToggle::Added
    }

    #[must_use]
    pub fn is_enabled(&self, span: &SourceSpan) -> bool {
        self.state
            .read()
            .entries
            .get(span)
            .is_some_and(|bp| bp.enabled)
    }

    /// Returns `false` when no breakpoint exists at `span`.
    pub fn set_enabled(&self, span: &SourceSpan, enabled: bool) -> bool {
        let mut state = self.state.write();
        let Some(bp) = state.entries.get_mut(span) else {
            return false;
        };
        if bp.enabled != enabled {
            bp.enabled = enabled;
            state.generation += 1;
        }
        true
    }

    pub fn record_hit(&self, span: &SourceSpan) {
        if let Some(bp) = self.state.write().entries.get_mut(span) {
            bp.hit_count += 1;
        }
    }

    #[must_use]
    pub fn list(&self) -> Vec<Breakpoint> {
        self.state.read().entries.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        if !state.entries.is_empty() {
            state.entries.clear();
            state.generation += 1;
        }
    }

    /// Bumped on every change to the enabled set.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }
}
