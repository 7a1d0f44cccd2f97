//! Command dispatch over agent routes.
//!
//! A dispatch resolves the agent's route, sends one [`CommandEnvelope`] and
//! waits for the matching reply, the timeout, or cancellation of the
//! execution it belongs to, whichever comes first. Replies are correlated
//! through a pending table keyed by invocation id; a reply that arrives
//! after its dispatch settled finds no entry and is discarded.

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use testfleet_core::outcome::DispatchOutcome;
use testfleet_core::types::NodeId;

use crate::error::ChannelError;
use crate::events::{ChannelEvent, ChannelEvents};
use crate::protocol::{AgentRequest, CommandEnvelope, ReplyFrame, ServerMessage};
use crate::router::{ChannelRouter, Outbound, RouteKey, RouteTable};

/// Reason reported for in-flight commands whose connection dropped.
pub const AGENT_DISCONNECTED: &str = "agent disconnected";

struct PendingReply {
    connection_id: Uuid,
    node_id: NodeId,
    tx: oneshot::Sender<DispatchOutcome>,
}

/// Removes a pending reply when its dispatch settles or is dropped.
struct PendingSlot<'a> {
    pending: &'a DashMap<Uuid, PendingReply>,
    invocation_id: Uuid,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        // No-op when the reply path already removed it.
        self.pending.remove(&self.invocation_id);
    }
}

/// Keeps an execution cancellable for as long as it is alive.
///
/// Dropping the guard, whether the execution settled or its future was
/// abandoned, stops tracking the execution id.
#[must_use = "the execution stops being tracked when the guard is dropped"]
pub struct ExecutionGuard<'a> {
    channel: &'a AgentChannel,
    execution_id: String,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.channel.finish_execution(&self.execution_id);
    }
}

/// A freshly registered agent connection. The owner forwards everything
/// from `receiver` to the socket.
#[derive(Debug)]
pub struct AgentConnection {
    pub connection_id: Uuid,
    pub receiver: mpsc::UnboundedReceiver<Outbound>,
}

/// Routes, pending replies and execution cancellation for all agents.
///
/// Designed to be wrapped in `Arc` and shared between the WebSocket
/// handler (connect, replies, disconnect) and the orchestration engine
/// (dispatch, broadcast, cancel).
pub struct AgentChannel {
    routes: RouteTable,
    pending: DashMap<Uuid, PendingReply>,
    executions: DashMap<String, CancellationToken>,
    events: ChannelEvents,
}

impl Default for AgentChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentChannel {
    pub fn new() -> Self {
        Self {
            routes: RouteTable::new(),
            pending: DashMap::new(),
            executions: DashMap::new(),
            events: ChannelEvents::default(),
        }
    }

    // ---- connections ----

    /// Register an agent connection for `route`, replacing any older one.
    pub fn connect(&self, route: RouteKey) -> AgentConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        let router = ChannelRouter {
            connection_id,
            sender: tx,
            connected_at: chrono::Utc::now(),
        };

        let replaced = self.routes.insert(route, router).map(|old| {
            let _ = old.sender.send(Outbound::Close);
            old.connection_id
        });

        match replaced {
            Some(old) => tracing::info!(
                node_id = route.node_id,
                tenant_id = ?route.tenant_id,
                %connection_id,
                replaced = %old,
                "Agent reconnected, replaced route",
            ),
            None => tracing::info!(
                node_id = route.node_id,
                tenant_id = ?route.tenant_id,
                %connection_id,
                "Agent connected",
            ),
        }

        self.events.publish(ChannelEvent::AgentConnected {
            route,
            connection_id,
            replaced,
        });

        AgentConnection {
            connection_id,
            receiver: rx,
        }
    }

    /// Tear down a connection. The route is only removed if it still
    /// belongs to `connection_id`; commands in flight on that connection
    /// resolve to `Rejected("agent disconnected")` either way.
    pub fn disconnect(&self, route: RouteKey, connection_id: Uuid) -> bool {
        let removed = self.routes.remove_if_current(&route, connection_id);
        let failed_pending = self.fail_pending(|p| p.connection_id == connection_id);

        tracing::info!(
            node_id = route.node_id,
            %connection_id,
            route_removed = removed,
            failed_pending,
            "Agent disconnected",
        );
        self.events.publish(ChannelEvent::AgentDisconnected {
            route,
            connection_id,
            failed_pending,
        });
        removed
    }

    /// Hand an agent reply to the dispatch waiting for it.
    ///
    /// Fails with [`ChannelError::UnknownInvocation`] when nothing is
    /// waiting (already settled, cancelled, or sent on another connection).
    pub fn deliver_reply(
        &self,
        connection_id: Uuid,
        frame: ReplyFrame,
    ) -> Result<(), ChannelError> {
        let invocation_id = frame.invocation_id;
        let (_, pending) = self
            .pending
            .remove_if(&invocation_id, |_, p| p.connection_id == connection_id)
            .ok_or(ChannelError::UnknownInvocation(invocation_id))?;

        if pending.tx.send(frame.result.into()).is_err() {
            tracing::debug!(
                %invocation_id,
                node_id = pending.node_id,
                "Dispatch gone before reply",
            );
        }
        Ok(())
    }

    pub fn is_connected(&self, route: &RouteKey) -> bool {
        self.routes.contains(route)
    }

    pub fn connection_count(&self) -> usize {
        self.routes.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Close every agent connection and fail all in-flight commands.
    pub fn shutdown_all(&self) {
        let routes = self.routes.drain();
        let count = routes.len();
        for (_, router) in routes {
            let _ = router.sender.send(Outbound::Close);
        }
        let failed = self.fail_pending(|_| true);
        tracing::info!(count, failed, "Closed all agent connections");
    }

    // ---- executions ----

    /// Start tracking `execution_id` so it can be cancelled. Returns the
    /// execution's token (the existing one if already tracked).
    pub fn begin_execution(&self, execution_id: &str) -> CancellationToken {
        self.executions
            .entry(execution_id.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// [`begin_execution`](Self::begin_execution) paired with a guard that
    /// calls [`finish_execution`](Self::finish_execution) on drop.
    pub fn track_execution(&self, execution_id: &str) -> ExecutionGuard<'_> {
        self.begin_execution(execution_id);
        ExecutionGuard {
            channel: self,
            execution_id: execution_id.to_string(),
        }
    }

    /// Mark an execution cancelled locally. In-flight runs for it settle as
    /// `Cancelled` and their late replies are discarded, whether or not the
    /// agent stops.
    ///
    /// Returns `false` if the execution is not tracked.
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        match self.executions.get(execution_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(execution_id, "Execution cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, execution_id: &str) -> bool {
        self.executions
            .get(execution_id)
            .is_some_and(|t| t.is_cancelled())
    }

    /// Stop tracking an execution once its dispatches have settled.
    pub fn finish_execution(&self, execution_id: &str) {
        self.executions.remove(execution_id);
    }

    // ---- dispatch ----

    /// Send `request` to one agent and wait up to `timeout` for its reply.
    ///
    /// Exactly one send is attempted; there are no retries.
    pub async fn dispatch(
        &self,
        route: RouteKey,
        request: AgentRequest,
        timeout: Duration,
    ) -> DispatchOutcome {
        let node_id = route.node_id;
        let cancel = request
            .cancellable_execution()
            .and_then(|id| self.executions.get(id).map(|t| t.clone()));

        if cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return DispatchOutcome::Cancelled;
        }

        let Some(router) = self.routes.resolve(&route) else {
            tracing::warn!(node_id, tenant_id = ?route.tenant_id, "No route to agent");
            return DispatchOutcome::Unreachable;
        };

        let kind = request.kind();
        let envelope = CommandEnvelope::new(request, timeout);
        let invocation_id = envelope.invocation_id;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            invocation_id,
            PendingReply {
                connection_id: router.connection_id,
                node_id,
                tx,
            },
        );
        let _slot = PendingSlot {
            pending: &self.pending,
            invocation_id,
        };

        if let Err(e) = router.send(node_id, ServerMessage::Command(envelope)) {
            tracing::warn!(node_id, %invocation_id, error = %e, "Failed to send command");
            return DispatchOutcome::rejected(e.to_string());
        }
        tracing::debug!(node_id, %invocation_id, command = kind.as_str(), "Command sent");

        let cancelled = async {
            match &cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            reply = tokio::time::timeout(timeout, rx) => match reply {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => DispatchOutcome::rejected(AGENT_DISCONNECTED),
                Err(_) => DispatchOutcome::Timeout,
            },
            _ = cancelled => DispatchOutcome::Cancelled,
        };

        match &outcome {
            DispatchOutcome::Acknowledged { .. } => {}
            DispatchOutcome::Cancelled => {
                tracing::info!(
                    node_id,
                    %invocation_id,
                    "Dispatch cancelled, late reply will be discarded",
                );
            }
            other => tracing::warn!(
                node_id,
                %invocation_id,
                command = kind.as_str(),
                outcome = other.label(),
                "Dispatch did not succeed",
            ),
        }
        outcome
    }

    /// Dispatch `request` to every route concurrently and wait for all of
    /// them to settle. Duplicate node ids collapse to a single dispatch.
    pub async fn broadcast(
        &self,
        routes: &[RouteKey],
        request: &AgentRequest,
        timeout: Duration,
    ) -> BTreeMap<NodeId, DispatchOutcome> {
        let mut targets: BTreeMap<NodeId, RouteKey> = BTreeMap::new();
        for route in routes {
            targets.entry(route.node_id).or_insert(*route);
        }

        let dispatches = targets
            .values()
            .map(|route| self.dispatch(*route, request.clone(), timeout));
        let outcomes = join_all(dispatches).await;

        targets.into_keys().zip(outcomes).collect()
    }

    fn fail_pending(&self, matches: impl Fn(&PendingReply) -> bool) -> usize {
        let ids: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|entry| matches(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.tx.send(DispatchOutcome::rejected(AGENT_DISCONNECTED));
                failed += 1;
            }
        }
        failed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
