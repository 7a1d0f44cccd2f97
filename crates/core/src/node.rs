//! Node inventory types.
//!
//! A [`Node`] is a machine capable of running test scripts through an
//! installed agent. Identity (`id`) never changes once provisioned; the
//! remaining attributes are replaced wholesale when the node-management
//! layer syncs its inventory. Liveness is deliberately *not* a field here,
//! see [`crate::liveness`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{NodeId, TenantId};

/// Maximum length of a node address (`host`, `host:port`, or IP literal).
const MAX_ADDRESS_LEN: usize = 255;

// ---------------------------------------------------------------------------
// NodeRole
// ---------------------------------------------------------------------------

/// What a node is provisioned to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Runs test scripts dispatched by the orchestrator.
    #[default]
    Execution,
    /// Coordinates distributed runs; never receives runner commands.
    Controller,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A provisioned node as known to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Owning tenant, or `None` for the shared pool.
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub role: NodeRole,
    /// Reachable address of the node, informational only. Transport goes
    /// through the agent channel, never directly to this address.
    pub address: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Trial nodes belong to the shared pool regardless of `tenant_id`.
    #[serde(default)]
    pub trial: bool,
}

fn default_enabled() -> bool {
    true
}

impl Node {
    /// Whether this node is part of the shared ("free") pool.
    pub fn is_free(&self) -> bool {
        self.trial || self.tenant_id.is_none()
    }

    /// Whether `tenant_id` may schedule work on this node.
    pub fn is_visible_to(&self, tenant_id: TenantId) -> bool {
        self.is_free() || self.tenant_id == Some(tenant_id)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a node before it enters the inventory.
///
/// Rules:
/// - `id` must be positive.
/// - `address` must not be empty or exceed `MAX_ADDRESS_LEN` characters.
/// - `address` must not contain whitespace.
pub fn validate_node(node: &Node) -> Result<(), CoreError> {
    if node.id <= 0 {
        return Err(CoreError::Validation(format!(
            "Node id must be positive, got {}",
            node.id
        )));
    }
    if node.address.is_empty() {
        return Err(CoreError::Validation(
            "Node address must not be empty".to_string(),
        ));
    }
    if node.address.len() > MAX_ADDRESS_LEN {
        return Err(CoreError::Validation(format!(
            "Node address must not exceed {MAX_ADDRESS_LEN} characters"
        )));
    }
    if node.address.chars().any(char::is_whitespace) {
        return Err(CoreError::Validation(
            "Node address must not contain whitespace".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
