//! Edge dispatch: resolving edge-group membership and mapping groups to the
//! stacks and jobs an endpoint must receive.
//!
//! Static groups enumerate endpoint IDs in a roaring bitmap; dynamic groups
//! match a tag predicate over the union of endpoint and endpoint-group tags.
//! Untrusted edge endpoints never match: nothing is dispatched to an agent an
//! administrator has not approved.

pub mod cache;
pub mod dispatch;

use crate::persistence::{
    EdgeGroup, EdgeJob, EdgeJobId, EdgeStack, EdgeStackId, Endpoint, EndpointGroup, EndpointId,
    Settings, TagId,
};

/// Endpoints of `endpoints` that belong to `group`.
pub fn edge_group_related_endpoints(
    group: &EdgeGroup,
    endpoints: &[Endpoint],
    endpoint_groups: &[EndpointGroup],
) -> Vec<EndpointId> {
    endpoints
        .iter()
        .filter(|endpoint| {
            let endpoint_group = endpoint_groups
                .iter()
                .find(|candidate| candidate.id == endpoint.group_id);
            edge_group_related_to_endpoint(group, endpoint, endpoint_group)
        })
        .map(|endpoint| endpoint.id)
        .collect()
}

/// Whether `endpoint` is a member of `group`.
pub fn edge_group_related_to_endpoint(
    group: &EdgeGroup,
    endpoint: &Endpoint,
    endpoint_group: Option<&EndpointGroup>,
) -> bool {
    if !endpoint.kind.is_edge() || !endpoint.user_trusted {
        return false;
    }

    if !group.dynamic {
        return group.endpoint_ids.contains(endpoint.id);
    }

    let mut tags: Vec<TagId> = endpoint.tag_ids.clone();
    if let Some(endpoint_group) = endpoint_group {
        tags.extend(endpoint_group.tag_ids.iter().copied());
    }

    if group.partial_match {
        group.tag_ids.iter().any(|tag| tags.contains(tag))
    } else {
        group.tag_ids.iter().all(|tag| tags.contains(tag))
    }
}

/// Edge stacks targeting `endpoint` through at least one of their groups.
pub fn endpoint_related_edge_stacks(
    endpoint: &Endpoint,
    endpoint_group: Option<&EndpointGroup>,
    edge_groups: &[EdgeGroup],
    edge_stacks: &[EdgeStack],
) -> Vec<EdgeStackId> {
    let related_groups: Vec<_> = edge_groups
        .iter()
        .filter(|group| edge_group_related_to_endpoint(group, endpoint, endpoint_group))
        .map(|group| group.id)
        .collect();

    edge_stacks
        .iter()
        .filter(|stack| {
            stack
                .edge_groups
                .iter()
                .any(|group| related_groups.contains(group))
        })
        .map(|stack| stack.id)
        .collect()
}

/// Edge jobs targeting `endpoint` through at least one of their groups.
pub fn endpoint_related_edge_jobs(
    endpoint: &Endpoint,
    endpoint_group: Option<&EndpointGroup>,
    edge_groups: &[EdgeGroup],
    edge_jobs: &[EdgeJob],
) -> Vec<EdgeJobId> {
    let related_groups: Vec<_> = edge_groups
        .iter()
        .filter(|group| edge_group_related_to_endpoint(group, endpoint, endpoint_group))
        .map(|group| group.id)
        .collect();

    edge_jobs
        .iter()
        .filter(|job| {
            job.edge_groups
                .iter()
                .any(|group| related_groups.contains(group))
        })
        .map(|job| job.id)
        .collect()
}

/// Effective agent check-in interval: the first non-zero of the endpoint
/// override, the stored settings default, and the hard-coded default.
pub fn effective_checkin_interval(
    endpoint: &Endpoint,
    settings: &Settings,
    hard_default: u64,
) -> u64 {
    if endpoint.edge.checkin_interval != 0 {
        return endpoint.edge.checkin_interval;
    }
    if settings.edge_agent_checkin_interval != 0 {
        return settings.edge_agent_checkin_interval;
    }
    hard_default
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::endpoints::test_endpoint;
    use crate::persistence::{EdgeGroupId, EndpointGroupId, EndpointType};
    use crate::roar::Roar;
    use chrono::Utc;

    fn static_group(id: u32, members: &[u32]) -> EdgeGroup {
        EdgeGroup {
            id: EdgeGroupId(id),
            name: format!("group-{id}"),
            dynamic: false,
            partial_match: false,
            tag_ids: Vec::new(),
            endpoint_ids: Roar::from_slice(
                &members.iter().map(|&m| EndpointId(m)).collect::<Vec<_>>(),
            ),
        }
    }

    fn dynamic_group(id: u32, tags: &[u32], partial: bool) -> EdgeGroup {
        EdgeGroup {
            id: EdgeGroupId(id),
            name: format!("group-{id}"),
            dynamic: true,
            partial_match: partial,
            tag_ids: tags.iter().map(|&t| TagId(t)).collect(),
            endpoint_ids: Roar::new(),
        }
    }

    fn edge_endpoint(id: u32) -> Endpoint {
        test_endpoint(id, EndpointType::EdgeAgentOnDocker)
    }

    #[test]
    fn static_membership_follows_the_bitmap() {
        let group = static_group(1, &[1, 3]);
        let endpoints = vec![edge_endpoint(1), edge_endpoint(2), edge_endpoint(3)];

        let related = edge_group_related_endpoints(&group, &endpoints, &[]);
        assert_eq!(related, vec![EndpointId(1), EndpointId(3)]);
    }

    #[test]
    fn dynamic_full_match_requires_every_tag() {
        let group = dynamic_group(1, &[1, 2], false);

        let mut both = edge_endpoint(1);
        both.tag_ids = vec![TagId(1), TagId(2)];
        let mut one = edge_endpoint(2);
        one.tag_ids = vec![TagId(1)];

        assert!(edge_group_related_to_endpoint(&group, &both, None));
        assert!(!edge_group_related_to_endpoint(&group, &one, None));
    }

    #[test]
    fn dynamic_partial_match_requires_any_tag() {
        let group = dynamic_group(1, &[1, 2], true);

        let mut one = edge_endpoint(2);
        one.tag_ids = vec![TagId(2)];
        let none = edge_endpoint(3);

        assert!(edge_group_related_to_endpoint(&group, &one, None));
        assert!(!edge_group_related_to_endpoint(&group, &none, None));
    }

    #[test]
    fn group_tags_count_towards_dynamic_membership() {
        let group = dynamic_group(1, &[5], false);
        let endpoint = edge_endpoint(1);

        let endpoint_group = EndpointGroup {
            id: EndpointGroupId(1),
            name: "retail".into(),
            description: String::new(),
            tag_ids: vec![TagId(5)],
            user_access_policies: Vec::new(),
            team_access_policies: Vec::new(),
        };

        assert!(edge_group_related_to_endpoint(
            &group,
            &endpoint,
            Some(&endpoint_group)
        ));
        assert!(!edge_group_related_to_endpoint(&group, &endpoint, None));
    }

    #[test]
    fn untrusted_and_non_edge_endpoints_never_match() {
        let group = static_group(1, &[1, 2]);

        let mut untrusted = edge_endpoint(1);
        untrusted.user_trusted = false;
        assert!(!edge_group_related_to_endpoint(&group, &untrusted, None));

        let local = test_endpoint(2, EndpointType::Docker);
        assert!(!edge_group_related_to_endpoint(&group, &local, None));
    }

    #[test]
    fn related_stacks_need_one_covering_group() {
        let groups = vec![static_group(1, &[1]), static_group(2, &[1, 2])];
        let stacks = vec![
            EdgeStack {
                id: EdgeStackId(10),
                name: "covered".into(),
                edge_groups: vec![EdgeGroupId(1), EdgeGroupId(2)],
                stack_file: String::new(),
                version: 1,
                created_at: Utc::now(),
                num_deployments: 0,
            },
            EdgeStack {
                id: EdgeStackId(11),
                name: "elsewhere".into(),
                edge_groups: vec![EdgeGroupId(9)],
                stack_file: String::new(),
                version: 1,
                created_at: Utc::now(),
                num_deployments: 0,
            },
        ];

        let related = endpoint_related_edge_stacks(&edge_endpoint(2), None, &groups, &stacks);
        assert_eq!(related, vec![EdgeStackId(10)]);
    }

    #[test]
    fn checkin_interval_prefers_the_first_non_zero() {
        let settings = Settings {
            edge_agent_checkin_interval: 30,
            ..Settings::default()
        };

        let mut endpoint = edge_endpoint(1);
        endpoint.edge.checkin_interval = 10;
        assert_eq!(effective_checkin_interval(&endpoint, &settings, 5), 10);

        endpoint.edge.checkin_interval = 0;
        assert_eq!(effective_checkin_interval(&endpoint, &settings, 5), 30);

        let zero_settings = Settings {
            edge_agent_checkin_interval: 0,
            ..Settings::default()
        };
        assert_eq!(effective_checkin_interval(&endpoint, &zero_settings, 5), 5);
    }
}
