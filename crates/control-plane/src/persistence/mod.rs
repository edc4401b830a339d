//! Entity records and typed data services over the datastore.
//!
//! One service per bucket; nothing else touches a bucket directly. Derived
//! state that spans buckets (edge-stack deployment counters) is only mutated
//! through the relation service so the invariant holds inside a single
//! transaction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::edge::cache::PollCache;
use crate::store::Store;

pub mod api_keys;
pub mod base;
pub mod custom_templates;
pub mod edge_groups;
pub mod edge_jobs;
pub mod edge_stacks;
pub mod endpoint_groups;
pub mod endpoints;
pub mod pending_actions;
pub mod registries;
pub mod relations;
pub mod resource_controls;
pub mod settings;
pub mod stacks;
pub mod tags;
pub mod team_memberships;
pub mod teams;
pub mod users;

pub use api_keys::{ApiKey, ApiKeyService};
pub use base::{read_all_tx, read_tx, Entity, Service, ServiceTx};
pub use custom_templates::{CustomTemplate, CustomTemplateService};
pub use edge_groups::{EdgeGroup, EdgeGroupService};
pub use edge_jobs::{EdgeJob, EdgeJobService};
pub use edge_stacks::{EdgeStack, EdgeStackService};
pub use endpoint_groups::{EndpointGroup, EndpointGroupService};
pub use endpoints::{
    ContainerEngine, DockerSnapshot, EdgeSettings, Endpoint, EndpointService, EndpointStatus,
    EndpointType, KubernetesSnapshot, TlsConfig,
};
pub use pending_actions::{PendingAction, PendingActionService};
pub use registries::{Registry, RegistryService};
pub use relations::{EdgeStackCounter, EndpointRelation, RelationService};
pub use resource_controls::{Ownership, ResourceControl, ResourceControlService, ResourceControlType};
pub use settings::{Settings, SettingsService};
pub use stacks::{AutoUpdateSettings, GitConfig, Stack, StackService};
pub use tags::{Tag, TagService};
pub use team_memberships::{TeamMembership, TeamMembershipService, TeamRole};
pub use teams::{Team, TeamService};
pub use users::{User, UserRole, UserService};

macro_rules! define_id {
    ($($name:ident),+ $(,)?) => {$(
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    )+};
}

define_id!(
    ApiKeyId,
    CustomTemplateId,
    EdgeGroupId,
    EdgeJobId,
    EdgeStackId,
    EndpointGroupId,
    EndpointId,
    PendingActionId,
    RegistryId,
    ResourceControlId,
    StackId,
    TagId,
    TeamId,
    TeamMembershipId,
    UserId,
);

/// Bundle of every typed service, sharing one store handle.
#[derive(Clone)]
pub struct DataServices {
    store: Store,
    pub api_keys: ApiKeyService,
    pub custom_templates: CustomTemplateService,
    pub edge_groups: EdgeGroupService,
    pub edge_jobs: EdgeJobService,
    pub edge_stacks: EdgeStackService,
    pub endpoint_groups: EndpointGroupService,
    pub endpoints: EndpointService,
    pub pending_actions: PendingActionService,
    pub registries: RegistryService,
    pub relations: RelationService,
    pub resource_controls: ResourceControlService,
    pub settings: SettingsService,
    pub stacks: StackService,
    pub tags: TagService,
    pub team_memberships: TeamMembershipService,
    pub teams: TeamService,
    pub users: UserService,
}

impl DataServices {
    pub fn new(store: Store, poll_cache: PollCache) -> Self {
        let edge_stacks = EdgeStackService::new(store.clone());
        let counter: Arc<dyn EdgeStackCounter> =
            Arc::new(edge_stacks::DeploymentCounter::new(edge_stacks.clone()));

        Self {
            api_keys: ApiKeyService::new(store.clone()),
            custom_templates: CustomTemplateService::new(store.clone()),
            edge_groups: EdgeGroupService::new(store.clone()),
            edge_jobs: EdgeJobService::new(store.clone()),
            edge_stacks,
            endpoint_groups: EndpointGroupService::new(store.clone()),
            endpoints: EndpointService::new(store.clone()),
            pending_actions: PendingActionService::new(store.clone()),
            registries: RegistryService::new(store.clone()),
            relations: RelationService::new(store.clone(), counter, poll_cache),
            resource_controls: ResourceControlService::new(store.clone()),
            settings: SettingsService::new(store.clone()),
            stacks: StackService::new(store.clone()),
            tags: TagService::new(store.clone()),
            team_memberships: TeamMembershipService::new(store.clone()),
            teams: TeamService::new(store.clone()),
            users: UserService::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
