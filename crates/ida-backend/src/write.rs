//! Optimistic write tiers for node references.
//!
//! A [`WritePlan`] tries its strategies in order and stops at the first that
//! applies. Tiers the store cannot serve are skipped; a failed tier falls
//! through to the next. Only when every tier is exhausted does the plan
//! report an error, namely the last failure seen.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ida_store::{
    escape_segment, Capabilities, Context, JsonPatch, ObjectStore, PatchBody, StoreError,
    StoreResult, StoredObject, Subresource,
};
use serde_json::{json, Value};
use tracing::debug;

// ---------------------------------------------------------------------------
// WriteTier / TierOutcome
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteTier {
    /// Create the status with this node's entry if no status exists yet.
    GuardedPatch,
    /// Insert or overwrite this node's entry.
    ReplacePatch,
    /// Delete this node's entry.
    RemovePatch,
    /// Write the local copy through the status subresource.
    StatusUpdate,
    /// Write the local copy as a whole object.
    FullUpdate,
}

impl fmt::Display for WriteTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GuardedPatch => "guarded-patch",
            Self::ReplacePatch => "replace-patch",
            Self::RemovePatch => "remove-patch",
            Self::StatusUpdate => "status-update",
            Self::FullUpdate => "full-update",
        };
        f.write_str(s)
    }
}

/// Result of one tier.
#[derive(Clone, Debug, PartialEq)]
pub enum TierOutcome {
    Applied,
    /// The store lacks what this tier needs. Never surfaced.
    Unsupported,
    Failed(StoreError),
}

// ---------------------------------------------------------------------------
// WriteTarget
// ---------------------------------------------------------------------------

/// What a plan writes: one node's entry on one stored object.
#[derive(Clone, Debug)]
pub struct WriteTarget {
    /// Name of the stored object.
    pub name: String,
    /// Node whose reference is written.
    pub node: String,
    /// Timestamp recorded for the node.
    pub timestamp: DateTime<Utc>,
    /// The cached object with the change already applied, guarded by the
    /// cached resource version.
    pub desired: StoredObject,
}

impl WriteTarget {
    fn node_path(&self) -> String {
        format!("/status/nodes/{}", escape_segment(&self.node))
    }

    fn timestamp_value(&self) -> Value {
        Value::String(self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
    }
}

// ---------------------------------------------------------------------------
// WriteStrategy
// ---------------------------------------------------------------------------

/// One tier of a [`WritePlan`].
#[async_trait]
pub trait WriteStrategy: Send + Sync {
    fn tier(&self) -> WriteTier;

    /// Whether the store offers what this tier needs.
    fn supported(&self, capabilities: Capabilities) -> bool;

    async fn attempt(
        &self,
        store: &dyn ObjectStore,
        ctx: &Context,
        target: &WriteTarget,
    ) -> StoreResult<()>;
}

/// `test /status == null` then `add /status {nodes: {node: now}}`.
pub struct GuardedPatch;

#[async_trait]
impl WriteStrategy for GuardedPatch {
    fn tier(&self) -> WriteTier {
        WriteTier::GuardedPatch
    }

    fn supported(&self, capabilities: Capabilities) -> bool {
        capabilities.patch
    }

    async fn attempt(
        &self,
        store: &dyn ObjectStore,
        ctx: &Context,
        target: &WriteTarget,
    ) -> StoreResult<()> {
        let mut nodes = serde_json::Map::new();
        nodes.insert(target.node.clone(), target.timestamp_value());
        let patch = PatchBody::Json(vec![
            JsonPatch::test("/status", Value::Null),
            JsonPatch::add("/status", json!({ "nodes": nodes })),
        ]);
        store
            .patch(ctx, &target.name, &patch, Subresource::Status)
            .await
            .map(drop)
    }
}

/// `add /status/nodes/<node>`: inserts the entry or overwrites an existing
/// one, leaving other nodes' entries alone. Needs `/status/nodes` to exist.
pub struct ReplacePatch;

#[async_trait]
impl WriteStrategy for ReplacePatch {
    fn tier(&self) -> WriteTier {
        WriteTier::ReplacePatch
    }

    fn supported(&self, capabilities: Capabilities) -> bool {
        capabilities.patch
    }

    async fn attempt(
        &self,
        store: &dyn ObjectStore,
        ctx: &Context,
        target: &WriteTarget,
    ) -> StoreResult<()> {
        let patch = PatchBody::Json(vec![JsonPatch::add(
            target.node_path(),
            target.timestamp_value(),
        )]);
        store
            .patch(ctx, &target.name, &patch, Subresource::Status)
            .await
            .map(drop)
    }
}

/// `remove /status/nodes/<node>`.
pub struct RemovePatch;

#[async_trait]
impl WriteStrategy for RemovePatch {
    fn tier(&self) -> WriteTier {
        WriteTier::RemovePatch
    }

    fn supported(&self, capabilities: Capabilities) -> bool {
        capabilities.patch
    }

    async fn attempt(
        &self,
        store: &dyn ObjectStore,
        ctx: &Context,
        target: &WriteTarget,
    ) -> StoreResult<()> {
        let patch = PatchBody::Json(vec![JsonPatch::remove(target.node_path())]);
        store
            .patch(ctx, &target.name, &patch, Subresource::Status)
            .await
            .map(drop)
    }
}

/// Write the desired copy's status.
pub struct StatusUpdate;

#[async_trait]
impl WriteStrategy for StatusUpdate {
    fn tier(&self) -> WriteTier {
        WriteTier::StatusUpdate
    }

    fn supported(&self, capabilities: Capabilities) -> bool {
        capabilities.update_status
    }

    async fn attempt(
        &self,
        store: &dyn ObjectStore,
        ctx: &Context,
        target: &WriteTarget,
    ) -> StoreResult<()> {
        store
            .update_status(ctx, target.desired.clone())
            .await
            .map(drop)
    }
}

/// Write the whole desired copy.
pub struct FullUpdate;

#[async_trait]
impl WriteStrategy for FullUpdate {
    fn tier(&self) -> WriteTier {
        WriteTier::FullUpdate
    }

    fn supported(&self, _capabilities: Capabilities) -> bool {
        true
    }

    async fn attempt(
        &self,
        store: &dyn ObjectStore,
        ctx: &Context,
        target: &WriteTarget,
    ) -> StoreResult<()> {
        store.update(ctx, target.desired.clone()).await.map(drop)
    }
}

// ---------------------------------------------------------------------------
// WriteReport
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct TierAttempt {
    pub tier: WriteTier,
    pub outcome: TierOutcome,
    pub elapsed: Duration,
}

/// Every tier a plan went through, in order.
#[derive(Clone, Debug, Default)]
pub struct WriteReport {
    pub attempts: Vec<TierAttempt>,
    pub elapsed: Duration,
}

impl WriteReport {
    /// The tier that applied the write, if any.
    pub fn applied_by(&self) -> Option<WriteTier> {
        self.attempts
            .iter()
            .find(|a| a.outcome == TierOutcome::Applied)
            .map(|a| a.tier)
    }

    pub fn is_applied(&self) -> bool {
        self.applied_by().is_some()
    }

    /// Tiers in the order they were visited.
    pub fn tiers(&self) -> Vec<WriteTier> {
        self.attempts.iter().map(|a| a.tier).collect()
    }

    /// The applying tier, or the last failure.
    pub fn into_result(self) -> StoreResult<WriteTier> {
        if let Some(tier) = self.applied_by() {
            return Ok(tier);
        }
        let last_failure = self.attempts.into_iter().rev().find_map(|a| match a.outcome {
            TierOutcome::Failed(err) => Some(err),
            _ => None,
        });
        Err(last_failure
            .unwrap_or_else(|| StoreError::Unsupported("every write tier".into())))
    }
}

// ---------------------------------------------------------------------------
// WritePlan
// ---------------------------------------------------------------------------

/// Ordered write strategies, first success wins.
pub struct WritePlan {
    strategies: Vec<Box<dyn WriteStrategy>>,
}

impl WritePlan {
    /// An empty plan. Use [`Self::add_strategy`] to add tiers.
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Guarded patch, replace patch, status update, full update.
    pub fn for_acquire() -> Self {
        let mut plan = Self::new();
        plan.add_strategy(Box::new(GuardedPatch));
        plan.add_strategy(Box::new(ReplacePatch));
        plan.add_strategy(Box::new(StatusUpdate));
        plan.add_strategy(Box::new(FullUpdate));
        plan
    }

    /// Remove patch, status update, full update.
    pub fn for_release() -> Self {
        let mut plan = Self::new();
        plan.add_strategy(Box::new(RemovePatch));
        plan.add_strategy(Box::new(StatusUpdate));
        plan.add_strategy(Box::new(FullUpdate));
        plan
    }

    pub fn add_strategy(&mut self, strategy: Box<dyn WriteStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn tiers(&self) -> Vec<WriteTier> {
        self.strategies.iter().map(|s| s.tier()).collect()
    }

    /// Run the tiers in order until one applies.
    ///
    /// Cancellation stops the plan at the tier it interrupted.
    pub async fn execute(
        &self,
        store: &dyn ObjectStore,
        ctx: &Context,
        target: &WriteTarget,
    ) -> WriteReport {
        let plan_start = Instant::now();
        let capabilities = store.capabilities();
        let mut report = WriteReport::default();

        for strategy in &self.strategies {
            let tier = strategy.tier();
            if !strategy.supported(capabilities) {
                report.attempts.push(TierAttempt {
                    tier,
                    outcome: TierOutcome::Unsupported,
                    elapsed: Duration::ZERO,
                });
                continue;
            }

            let tier_start = Instant::now();
            let result = strategy.attempt(store, ctx, target).await;
            let elapsed = tier_start.elapsed();

            let outcome = match result {
                Ok(()) => TierOutcome::Applied,
                Err(err) if err.is_unsupported() => TierOutcome::Unsupported,
                Err(err) => {
                    debug!(
                        object = %target.name,
                        node = %target.node,
                        %tier,
                        error = %err,
                        "write tier failed, falling through"
                    );
                    TierOutcome::Failed(err)
                }
            };

            let stop = match &outcome {
                TierOutcome::Applied => true,
                TierOutcome::Failed(err) => err.is_cancellation(),
                TierOutcome::Unsupported => false,
            };
            report.attempts.push(TierAttempt {
                tier,
                outcome,
                elapsed,
            });
            if stop {
                break;
            }
        }

        report.elapsed = plan_start.elapsed();
        report
    }
}

impl Default for WritePlan {
    fn default() -> Self {
        Self::new()
    }
}
