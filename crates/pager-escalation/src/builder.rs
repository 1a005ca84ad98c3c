//! Snapshot builder.
//!
//! Copies a route and its escalation chain into an [`EscalationSnapshot`].
//! Building never fails: a deleted route or chain simply yields a snapshot
//! with nothing to execute.

use tracing::{debug, warn};

use crate::collaborators::ChainReader;
use crate::registry::BackendRegistry;
use crate::snapshot::{
    ChannelFilterSnapshot, EscalationChainSnapshot, EscalationPolicySnapshot, EscalationSnapshot,
};
use crate::types::{AlertGroup, PolicyConfig, RouteConfig};

/// Builds escalation snapshots from live configuration.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotBuilder<'a> {
    chains: &'a dyn ChainReader,
    registry: &'a BackendRegistry,
}

impl<'a> SnapshotBuilder<'a> {
    /// Creates a builder reading through `chains`.
    #[must_use]
    pub const fn new(chains: &'a dyn ChainReader, registry: &'a BackendRegistry) -> Self {
        Self { chains, registry }
    }

    /// Builds the snapshot for an alert group.
    #[must_use]
    pub fn build(&self, alert_group: &AlertGroup) -> EscalationSnapshot {
        let Some(route) = self.chains.route(alert_group) else {
            debug!(alert_group_id = %alert_group.id, "route is gone, building empty snapshot");
            return EscalationSnapshot::default();
        };

        let channel_filter_snapshot = Some(self.channel_filter_snapshot(&route));
        let Some(chain) = route.chain else {
            debug!(
                alert_group_id = %alert_group.id,
                route_id = %route.id,
                "route has no escalation chain"
            );
            return EscalationSnapshot {
                channel_filter_snapshot,
                ..EscalationSnapshot::default()
            };
        };

        let escalation_policies_snapshots = policy_snapshots(self.chains.policies(&chain.id));
        debug!(
            alert_group_id = %alert_group.id,
            chain_id = %chain.id,
            policies = escalation_policies_snapshots.len(),
            "built escalation snapshot"
        );

        EscalationSnapshot {
            channel_filter_snapshot,
            escalation_chain_snapshot: Some(EscalationChainSnapshot {
                id: chain.id,
                name: chain.name,
            }),
            escalation_policies_snapshots,
            last_active_escalation_policy_order: None,
            next_step_eta: None,
            pause_escalation: false,
        }
    }

    fn channel_filter_snapshot(&self, route: &RouteConfig) -> ChannelFilterSnapshot {
        ChannelFilterSnapshot {
            id: route.id.clone(),
            label: route.label.clone(),
            is_default: route.is_default,
            backends: self.registry.filter_settings(&route.backends),
        }
    }
}

/// Orders rows by `order` and materializes one snapshot per row.
///
/// Rows sharing an `order` keep only the first occurrence.
fn policy_snapshots(mut policies: Vec<PolicyConfig>) -> Vec<EscalationPolicySnapshot> {
    policies.sort_by_key(|p| p.order);
    let mut snapshots: Vec<EscalationPolicySnapshot> = Vec::with_capacity(policies.len());
    for policy in &policies {
        if snapshots.last().is_some_and(|last| last.order == policy.order) {
            warn!(
                policy_id = %policy.id,
                order = policy.order,
                "duplicate policy order, skipping"
            );
            continue;
        }
        snapshots.push(EscalationPolicySnapshot::from_policy(policy));
    }
    snapshots
}
