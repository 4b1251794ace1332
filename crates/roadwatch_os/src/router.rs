#![forbid(unsafe_code)]

use roadwatch_contracts::identity::Role;
use roadwatch_contracts::view::ViewId;
use tracing::debug;

use crate::nav::CapabilityTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    Changed { from: ViewId, to: ViewId },
    Unchanged,
    /// The view is outside the role's visible set; nothing happened.
    NotVisible,
}

/// Active-tab selection. Holds no business state.
#[derive(Debug, Clone)]
pub struct ViewRouter {
    table: &'static CapabilityTable,
    active: ViewId,
}

impl ViewRouter {
    pub fn new(table: &'static CapabilityTable) -> Self {
        Self {
            table,
            active: ViewId::Live,
        }
    }

    pub fn active(&self) -> ViewId {
        self.active
    }

    pub fn select(&mut self, view: ViewId, role: Role) -> SelectOutcome {
        if !self.table.view_allowed(view, role) {
            debug!(view = view.as_str(), role = role.as_str(), "view not visible; ignoring");
            return SelectOutcome::NotVisible;
        }
        if view == self.active {
            return SelectOutcome::Unchanged;
        }
        let from = self.active;
        self.active = view;
        SelectOutcome::Changed { from, to: view }
    }

    /// Moves the active view back inside the role's visible set, if it left it.
    pub fn reconcile(&mut self, role: Role) -> SelectOutcome {
        if self.table.view_allowed(self.active, role) {
            return SelectOutcome::Unchanged;
        }
        match self.table.default_view(role) {
            Some(fallback) => {
                let from = self.active;
                self.active = fallback;
                SelectOutcome::Changed { from, to: fallback }
            }
            None => SelectOutcome::NotVisible,
        }
    }
}
