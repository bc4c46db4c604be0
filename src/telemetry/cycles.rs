use std::collections::HashMap;

use log::warn;

use super::models::{CycleStatus, PartMachineCycle, PartStep};

pub const DEFAULT_CYCLE_TOLERANCE_S: f64 = 1.0;

/// Classifies a realized cycle against its nominal duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleClassifier {
    tolerance_s: f64,
}

impl Default for CycleClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CYCLE_TOLERANCE_S)
    }
}

impl CycleClassifier {
    /// Negative or NaN tolerances collapse to zero.
    pub fn new(tolerance_s: f64) -> Self {
        let tolerance_s = if tolerance_s.is_finite() && tolerance_s > 0.0 {
            tolerance_s
        } else {
            0.0
        };
        Self { tolerance_s }
    }

    pub fn tolerance_s(&self) -> f64 {
        self.tolerance_s
    }

    pub fn classify(&self, delta_s: f64) -> CycleStatus {
        if delta_s > self.tolerance_s {
            CycleStatus::Over
        } else if delta_s < -self.tolerance_s {
            CycleStatus::Under
        } else {
            CycleStatus::OnTime
        }
    }

    /// Groups `steps` by (machine, cycle) and derives one record per group.
    ///
    /// Output is sorted by cycle; machines inside a cycle keep the order in
    /// which their first step appears. Groups for machines without a nominal
    /// duration are skipped.
    pub fn compute(
        &self,
        steps: &[PartStep],
        nominal_durations: &HashMap<String, f64>,
    ) -> Vec<PartMachineCycle> {
        let mut order: Vec<(i64, &str)> = Vec::new();
        let mut totals: HashMap<(i64, &str), f64> = HashMap::new();

        for step in steps {
            let key = (step.cycle, step.machine.as_str());
            match totals.get_mut(&key) {
                Some(total) => *total += step.real_duration_s,
                None => {
                    totals.insert(key, step.real_duration_s);
                    order.push(key);
                }
            }
        }

        // Stable: ties on cycle keep first-appearance order.
        order.sort_by_key(|(cycle, _)| *cycle);

        order
            .into_iter()
            .filter_map(|(cycle, machine)| {
                let Some(&nominal_duration_s) = nominal_durations.get(machine) else {
                    warn!("No nominal duration for machine {machine}; skipping cycle {cycle}");
                    return None;
                };
                let real_cycle_time_s = totals.get(&(cycle, machine)).copied().unwrap_or(0.0);
                let delta_s = real_cycle_time_s - nominal_duration_s;
                Some(PartMachineCycle {
                    machine: machine.to_string(),
                    cycle,
                    real_cycle_time_s,
                    nominal_duration_s,
                    delta_s,
                    status: self.classify(delta_s),
                })
            })
            .collect()
    }
}

/// [`CycleClassifier::compute`] with the default tolerance.
pub fn compute_part_machine_cycles(
    steps: &[PartStep],
    nominal_durations: &HashMap<String, f64>,
) -> Vec<PartMachineCycle> {
    CycleClassifier::default().compute(steps, nominal_durations)
}

/// Orders steps by start time; steps without one sort last, in input order.
pub fn sort_steps_by_start(steps: &mut [PartStep]) {
    steps.sort_by(|a, b| match (a.start_time, b.start_time) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}
