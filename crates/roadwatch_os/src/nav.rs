#![forbid(unsafe_code)]

use roadwatch_contracts::identity::Role;
use roadwatch_contracts::view::{ConsoleAction, ViewId};

/// Static role grants for views and actions. Entry order is the fallback order used when the
/// active view stops being visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityTable {
    pub views: &'static [(ViewId, &'static [Role])],
    pub actions: &'static [(ConsoleAction, &'static [Role])],
}

pub static CONSOLE_CAPABILITIES: CapabilityTable = CapabilityTable {
    views: &[
        (ViewId::Live, &[Role::Admin, Role::Operator]),
        (ViewId::Archive, &[Role::Admin, Role::Operator]),
        (ViewId::Settings, &[Role::Admin]),
    ],
    actions: &[
        (ConsoleAction::ReviewEvidence, &[Role::Admin, Role::Operator]),
        (ConsoleAction::RefreshArchive, &[Role::Admin, Role::Operator]),
        (ConsoleAction::SwitchSource, &[Role::Admin]),
        (ConsoleAction::UploadMedia, &[Role::Admin]),
    ],
};

impl CapabilityTable {
    pub fn visible_views(&self, role: Role) -> Vec<ViewId> {
        self.views
            .iter()
            .filter(|(_, roles)| roles.contains(&role))
            .map(|(view, _)| *view)
            .collect()
    }

    pub fn view_allowed(&self, view: ViewId, role: Role) -> bool {
        self.views
            .iter()
            .any(|(v, roles)| *v == view && roles.contains(&role))
    }

    pub fn action_allowed(&self, action: ConsoleAction, role: Role) -> bool {
        self.actions
            .iter()
            .any(|(a, roles)| *a == action && roles.contains(&role))
    }

    pub fn default_view(&self, role: Role) -> Option<ViewId> {
        self.views
            .iter()
            .find(|(_, roles)| roles.contains(&role))
            .map(|(view, _)| *view)
    }
}

pub fn visible_views(role: Role) -> Vec<ViewId> {
    CONSOLE_CAPABILITIES.visible_views(role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_nav_01_every_routable_view_is_in_the_table() {
        for view in ViewId::ALL {
            assert!(visible_views(Role::Admin).contains(&view), "{view:?} missing");
        }
    }

    #[test]
    fn at_nav_02_settings_is_admin_only() {
        assert_eq!(
            visible_views(Role::Admin),
            vec![ViewId::Live, ViewId::Archive, ViewId::Settings]
        );
        assert_eq!(visible_views(Role::Operator), vec![ViewId::Live, ViewId::Archive]);
    }

    #[test]
    fn at_nav_03_media_actions_require_admin() {
        for action in [ConsoleAction::SwitchSource, ConsoleAction::UploadMedia] {
            assert!(CONSOLE_CAPABILITIES.action_allowed(action, Role::Admin));
            assert!(!CONSOLE_CAPABILITIES.action_allowed(action, Role::Operator));
        }
        assert!(CONSOLE_CAPABILITIES.action_allowed(ConsoleAction::ReviewEvidence, Role::Operator));
    }

    #[test]
    fn at_nav_04_default_view_is_first_visible_in_table_order() {
        assert_eq!(CONSOLE_CAPABILITIES.default_view(Role::Operator), Some(ViewId::Live));
        let archive_first = CapabilityTable {
            views: &[
                (ViewId::Settings, &[Role::Admin]),
                (ViewId::Archive, &[Role::Operator]),
                (ViewId::Live, &[Role::Operator]),
            ],
            actions: &[],
        };
        assert_eq!(archive_first.default_view(Role::Operator), Some(ViewId::Archive));
        assert_eq!(archive_first.default_view(Role::Admin), Some(ViewId::Settings));
    }
}
