//! Access decisions shared by the Docker and Kubernetes proxy paths.

use crate::auth::RestrictedRequestContext;
use crate::persistence::ResourceControl;

/// Single-resource decision. With no control record the resource is open to
/// callers who inherited the environment through an access policy, which is
/// every caller that reached the proxy.
pub fn can_access_resource(
    context: &RestrictedRequestContext,
    control: Option<&ResourceControl>,
) -> bool {
    if context.is_admin() {
        return true;
    }
    match control {
        Some(control) => control.authorizes(context.user_id, &context.team_ids),
        None => true,
    }
}

/// Collection-entry decision. Lists are filtered more strictly than single
/// reads: entries without a control record are hidden from non-admins, so a
/// user only sees the resources shared with them.
pub fn visible_in_collection(
    context: &RestrictedRequestContext,
    control: Option<&ResourceControl>,
) -> bool {
    if context.is_admin() {
        return true;
    }
    match control {
        Some(control) => control.authorizes(context.user_id, &context.team_ids),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{
        Ownership, ResourceControlId, ResourceControlType, TeamId, UserId, UserRole,
    };

    fn context(role: UserRole) -> RestrictedRequestContext {
        RestrictedRequestContext {
            user_id: UserId(2),
            username: "alice".into(),
            role,
            team_ids: vec![TeamId(4)],
        }
    }

    fn control(user: u32) -> ResourceControl {
        ResourceControl {
            id: ResourceControlId(1),
            resource_id: "abc".into(),
            kind: ResourceControlType::Container,
            ownership: Ownership::Private,
            user_ids: vec![UserId(user)],
            team_ids: Vec::new(),
        }
    }

    #[test]
    fn admins_bypass_every_check() {
        let admin = context(UserRole::Admin);
        assert!(can_access_resource(&admin, Some(&control(99))));
        assert!(visible_in_collection(&admin, None));
    }

    #[test]
    fn uncontrolled_resources_are_readable_but_hidden_from_lists() {
        let user = context(UserRole::Standard);
        assert!(can_access_resource(&user, None));
        assert!(!visible_in_collection(&user, None));
    }

    #[test]
    fn controlled_resources_follow_the_record() {
        let user = context(UserRole::Standard);
        assert!(can_access_resource(&user, Some(&control(2))));
        assert!(!can_access_resource(&user, Some(&control(9))));
        assert!(visible_in_collection(&user, Some(&control(2))));
    }
}
