//! Trap/override policy resolver.
//!
//! At most one external policy may be registered at a time. It is asked
//! before every zone enter/exit whether it wants to override the default
//! lifecycle (e.g. force a buff clear on exit).
//!
//! Readers never block, writers serialize: the current registration is
//! published through an `ArcSwapOption`, and register/unregister take a
//! mutex. A replaced registration is dropped once the last in-flight
//! evaluation holding it finishes.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::isolation::isolate;
use crate::metrics::ZoneCounters;
use crate::types::{LifecycleStage, Position};

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// What the policy is told about a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrapLifecycleContext {
    /// Platform id of the character's owner.
    pub character_id: u64,
    /// Zone being entered or left.
    pub zone_id: String,
    /// Character position at evaluation time.
    pub position: Position,
    /// Enter or exit.
    pub stage: LifecycleStage,
}

/// A policy's verdict. Computed fresh for each evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapLifecycleDecision {
    /// The policy wants the default lifecycle overridden.
    pub override_triggered: bool,
    /// Clear buffs on exit even if the zone would not.
    pub force_buff_clear_on_exit: bool,
    /// Human-readable explanation.
    pub reason: String,
}

impl TrapLifecycleDecision {
    /// A no-op decision carrying `reason` (empty becomes `"No override"`).
    #[must_use]
    pub fn none(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            override_triggered: false,
            force_buff_clear_on_exit: false,
            reason: if reason.trim().is_empty() {
                "No override".to_string()
            } else {
                reason
            },
        }
    }

    /// An override decision.
    #[must_use]
    pub fn triggered(force_buff_clear_on_exit: bool, reason: impl Into<String>) -> Self {
        Self {
            override_triggered: true,
            force_buff_clear_on_exit,
            reason: reason.into(),
        }
    }
}

impl Default for TrapLifecycleDecision {
    fn default() -> Self {
        Self::none("")
    }
}

/// An externally supplied lifecycle override policy.
///
/// A panic inside any method is caught by the resolver.
pub trait TrapLifecyclePolicy: Send + Sync {
    /// Whether the policy currently wants to be consulted.
    fn is_enabled(&self) -> bool;

    /// Called before a player's enter lifecycle runs.
    ///
    /// # Errors
    /// Any error becomes a no-op decision carrying the message.
    fn on_before_enter(&self, context: &TrapLifecycleContext) -> Result<TrapLifecycleDecision>;

    /// Called before a player's exit lifecycle runs.
    ///
    /// # Errors
    /// Any error becomes a no-op decision carrying the message.
    fn on_before_exit(&self, context: &TrapLifecycleContext) -> Result<TrapLifecycleDecision>;
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

struct Registration {
    policy: Arc<dyn TrapLifecyclePolicy>,
    owner: String,
}

/// Single-slot holder for the active [`TrapLifecyclePolicy`].
pub struct TrapPolicyResolver {
    current: ArcSwapOption<Registration>,
    writer: Mutex<()>,
    counters: Arc<ZoneCounters>,
}

impl std::fmt::Debug for TrapPolicyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapPolicyResolver")
            .field("owner", &self.owner())
            .finish_non_exhaustive()
    }
}

impl Default for TrapPolicyResolver {
    fn default() -> Self {
        Self::new(Arc::new(ZoneCounters::new()))
    }
}

impl TrapPolicyResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new(counters: Arc<ZoneCounters>) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            writer: Mutex::new(()),
            counters,
        }
    }

    fn load(&self) -> Option<Arc<Registration>> {
        self.current.load_full()
    }

    /// Install `policy`, replacing any current one. An empty owner is
    /// recorded as `"unknown"`.
    pub fn register_policy(&self, policy: Arc<dyn TrapLifecyclePolicy>, owner: &str) {
        let owner = if owner.trim().is_empty() {
            "unknown".to_string()
        } else {
            owner.trim().to_string()
        };
        let _guard = self.writer.lock();
        self.current.store(Some(Arc::new(Registration {
            policy,
            owner: owner.clone(),
        })));
        info!(owner = %owner, "Trap policy registered");
    }

    /// Remove the current policy.
    ///
    /// An empty `owner` unregisters unconditionally; otherwise the policy
    /// is only removed if `owner` matches the registering owner
    /// (case-insensitive). Returns `true` if a policy was removed.
    pub fn unregister_policy(&self, owner: &str) -> bool {
        let _guard = self.writer.lock();
        let Some(current) = self.load() else {
            return false;
        };
        let owner = owner.trim();
        if !owner.is_empty() && !current.owner.eq_ignore_ascii_case(owner) {
            warn!(requested = %owner, current = %current.owner, "Trap policy unregister refused: owner mismatch");
            return false;
        }
        self.current.store(None);
        info!(owner = %current.owner, "Trap policy unregistered");
        true
    }

    /// Owner tag of the current policy.
    #[must_use]
    pub fn owner(&self) -> Option<String> {
        self.load().map(|r| r.owner.clone())
    }

    /// Whether a policy is registered and reports itself enabled.
    #[must_use]
    pub fn are_overrides_enabled(&self) -> bool {
        self.load().is_some_and(|r| {
            isolate(|| Ok::<_, String>(r.policy.is_enabled())).unwrap_or(false)
        })
    }

    /// Ask the policy about an enter transition.
    #[must_use]
    pub fn evaluate_enter(&self, context: &TrapLifecycleContext) -> TrapLifecycleDecision {
        self.evaluate(context, "enter", |p, c| p.on_before_enter(c))
    }

    /// Ask the policy about an exit transition.
    #[must_use]
    pub fn evaluate_exit(&self, context: &TrapLifecycleContext) -> TrapLifecycleDecision {
        self.evaluate(context, "exit", |p, c| p.on_before_exit(c))
    }

    fn evaluate<F>(&self, context: &TrapLifecycleContext, stage: &str, call: F) -> TrapLifecycleDecision
    where
        F: FnOnce(&dyn TrapLifecyclePolicy, &TrapLifecycleContext) -> Result<TrapLifecycleDecision>,
    {
        let Some(registration) = self.load() else {
            return TrapLifecycleDecision::none("Trap policy not enabled");
        };
        let policy = registration.policy.as_ref();
        let outcome = isolate(|| {
            if policy.is_enabled() {
                call(policy, context).map(Some)
            } else {
                Ok(None)
            }
        });
        match outcome {
            Ok(Some(decision)) => decision,
            Ok(None) => TrapLifecycleDecision::none("Trap policy not enabled"),
            Err(reason) => {
                self.counters.policy_faults.fetch_add(1, Ordering::Relaxed);
                warn!(owner = %registration.owner, zone_id = %context.zone_id, reason = %reason, "Trap policy {stage} failed");
                TrapLifecycleDecision::none(format!("Trap policy {stage} error: {reason}"))
            }
        }
    }
}
