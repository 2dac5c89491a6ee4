//! Audit trail for durable mutations.
//!
//! Events go to the `audit` tracing target so they can be routed separately
//! with an `EnvFilter` directive such as `audit=info`.
use crate::model::Actor;
use chrono::Utc;

pub fn record(entity: &'static str, action: &'static str, entity_id: i64, actor: Actor) {
    tracing::info!(
        target: "audit",
        entity,
        action,
        entity_id,
        actor = %actor,
        at = %Utc::now().to_rfc3339(),
        "mutation"
    );
}
