//! Runtime counters for the zone engine.
//!
//! Lock-free `AtomicU64` counters incremented on the hot path and read on
//! export. One [`ZoneCounters`] instance is owned by the application
//! context and shared by `Arc` with every subsystem that reports into it.

use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Counters (lock-free)
// ---------------------------------------------------------------------------

/// Atomic counters for high-frequency events.
#[derive(Debug)]
pub struct ZoneCounters {
    /// Zone enter transitions processed.
    pub zone_enters: AtomicU64,
    /// Zone exit transitions processed (implicit exits included).
    pub zone_exits: AtomicU64,
    /// Flow runs completed.
    pub flows_executed: AtomicU64,
    /// Flow runs that did not fully succeed.
    pub flows_failed: AtomicU64,
    /// Individual flow actions that failed.
    pub actions_failed: AtomicU64,
    /// Policy evaluations that faulted.
    pub policy_faults: AtomicU64,
    /// Event handlers that faulted.
    pub handler_faults: AtomicU64,
    /// Lifecycle steps that faulted.
    pub step_faults: AtomicU64,
    /// Progression snapshots captured.
    pub snapshots_captured: AtomicU64,
    /// Progression snapshots restored.
    pub snapshots_restored: AtomicU64,
    /// Post-restore validations that found a mismatch.
    pub validation_mismatches: AtomicU64,
    /// Snapshot persistence reads or writes that failed.
    pub persistence_failures: AtomicU64,
}

impl ZoneCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            zone_enters: AtomicU64::new(0),
            zone_exits: AtomicU64::new(0),
            flows_executed: AtomicU64::new(0),
            flows_failed: AtomicU64::new(0),
            actions_failed: AtomicU64::new(0),
            policy_faults: AtomicU64::new(0),
            handler_faults: AtomicU64::new(0),
            step_faults: AtomicU64::new(0),
            snapshots_captured: AtomicU64::new(0),
            snapshots_restored: AtomicU64::new(0),
            validation_mismatches: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
        }
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            zone_enters: self.zone_enters.load(Ordering::Relaxed),
            zone_exits: self.zone_exits.load(Ordering::Relaxed),
            flows_executed: self.flows_executed.load(Ordering::Relaxed),
            flows_failed: self.flows_failed.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
            policy_faults: self.policy_faults.load(Ordering::Relaxed),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
            step_faults: self.step_faults.load(Ordering::Relaxed),
            snapshots_captured: self.snapshots_captured.load(Ordering::Relaxed),
            snapshots_restored: self.snapshots_restored.load(Ordering::Relaxed),
            validation_mismatches: self.validation_mismatches.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.zone_enters,
            &self.zone_exits,
            &self.flows_executed,
            &self.flows_failed,
            &self.actions_failed,
            &self.policy_faults,
            &self.handler_faults,
            &self.step_faults,
            &self.snapshots_captured,
            &self.snapshots_restored,
            &self.validation_mismatches,
            &self.persistence_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for ZoneCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Zone enter transitions.
    pub zone_enters: u64,
    /// Zone exit transitions.
    pub zone_exits: u64,
    /// Flow runs.
    pub flows_executed: u64,
    /// Failed flow runs.
    pub flows_failed: u64,
    /// Failed actions.
    pub actions_failed: u64,
    /// Policy faults.
    pub policy_faults: u64,
    /// Handler faults.
    pub handler_faults: u64,
    /// Step faults.
    pub step_faults: u64,
    /// Snapshots captured.
    pub snapshots_captured: u64,
    /// Snapshots restored.
    pub snapshots_restored: u64,
    /// Validation mismatches.
    pub validation_mismatches: u64,
    /// Persistence failures.
    pub persistence_failures: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows: [(&str, &str, u64); 12] = [
            ("zonekit_zone_enters_total", "Zone enter transitions", self.zone_enters),
            ("zonekit_zone_exits_total", "Zone exit transitions", self.zone_exits),
            ("zonekit_flows_executed_total", "Flow runs completed", self.flows_executed),
            ("zonekit_flows_failed_total", "Flow runs with failures", self.flows_failed),
            ("zonekit_actions_failed_total", "Failed flow actions", self.actions_failed),
            ("zonekit_policy_faults_total", "Trap policy faults", self.policy_faults),
            ("zonekit_handler_faults_total", "Event handler faults", self.handler_faults),
            ("zonekit_step_faults_total", "Lifecycle step faults", self.step_faults),
            ("zonekit_snapshots_captured_total", "Progression snapshots captured", self.snapshots_captured),
            ("zonekit_snapshots_restored_total", "Progression snapshots restored", self.snapshots_restored),
            ("zonekit_validation_mismatches_total", "Post-restore validation mismatches", self.validation_mismatches),
            ("zonekit_persistence_failures_total", "Snapshot persistence failures", self.persistence_failures),
        ];
        let mut out = String::new();
        for (name, help, value) in rows {
            out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"));
        }
        out
    }
}
