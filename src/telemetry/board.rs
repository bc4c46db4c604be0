use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use super::models::{MachineLive, MachineSnapshot, TelemetryEvent};

/// Machine snapshots keyed by machine id. Snapshots are never removed during
/// a session; a silent machine keeps its last timestamp.
#[derive(Debug, Default)]
pub struct TelemetryModel {
    machines: HashMap<String, MachineSnapshot>,
    /// First-seen order, so views render a stable board.
    order: Vec<String>,
    applied_events: u64,
}

impl TelemetryModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, machine: &str) -> &mut MachineSnapshot {
        if !self.machines.contains_key(machine) {
            self.order.push(machine.to_string());
        }
        self.machines
            .entry(machine.to_string())
            .or_insert_with(|| MachineSnapshot::new(machine))
    }

    /// Last write wins per machine; fields the event leaves out are kept.
    pub fn apply_telemetry_event(&mut self, event: &TelemetryEvent) {
        self.entry(&event.machine).merge_event(event);
        self.applied_events += 1;
    }

    /// Folds a live-board row, which also carries the display name and the
    /// nominal cycle duration.
    pub fn apply_machines_live(&mut self, rows: &[MachineLive]) {
        for row in rows {
            let snapshot = self.entry(&row.machine);
            if let Some(name) = row.machine_name.as_ref().filter(|n| !n.is_empty()) {
                snapshot.machine_name = name.clone();
            }
            if row.nominal_duration_s.is_some() {
                snapshot.nominal_duration_s = row.nominal_duration_s;
            }
            snapshot.merge_event(&row.to_event());
        }
        self.applied_events += rows.len() as u64;
    }

    pub fn snapshot(&self, machine: &str) -> Option<&MachineSnapshot> {
        self.machines.get(machine)
    }

    pub fn snapshots(&self) -> Vec<MachineSnapshot> {
        self.order
            .iter()
            .filter_map(|machine| self.machines.get(machine).cloned())
            .collect()
    }

    pub fn nominal_durations(&self) -> HashMap<String, f64> {
        self.machines
            .values()
            .filter_map(|snapshot| {
                snapshot
                    .nominal_duration_s
                    .map(|nominal| (snapshot.machine.clone(), nominal))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn applied_events(&self) -> u64 {
        self.applied_events
    }
}

/// Shared handle to the model. Views read through it; only the stream fold
/// task and the hydration call write.
#[derive(Clone, Default)]
pub struct LiveBoard {
    inner: Arc<RwLock<TelemetryModel>>,
}

impl LiveBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_telemetry_event(&self, event: &TelemetryEvent) {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        guard.apply_telemetry_event(event);
    }

    pub fn apply_machines_live(&self, rows: &[MachineLive]) {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        guard.apply_machines_live(rows);
    }

    pub fn snapshot(&self, machine: &str) -> Option<MachineSnapshot> {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        guard.snapshot(machine).cloned()
    }

    pub fn snapshots(&self) -> Vec<MachineSnapshot> {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        guard.snapshots()
    }

    pub fn nominal_durations(&self) -> HashMap<String, f64> {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        guard.nominal_durations()
    }

    pub fn applied_events(&self) -> u64 {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        guard.applied_events()
    }
}
