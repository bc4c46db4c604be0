use std::sync::Arc;

use log::{info, warn};

use crate::api::MonitoringApi;
use crate::error::MonitorResult;

use super::board::LiveBoard;
use super::cycles::{sort_steps_by_start, CycleClassifier};
use super::models::{Anomaly, AnomalyCycle, Page, Part, PartDetail};

/// Fetch-side of the correlation model: pages of anomalies and parts, plus
/// the cycle context that ties them to machines.
///
/// Failures are returned as-is and never retried here; the caller keeps its
/// previous page on error.
#[derive(Clone)]
pub struct CorrelationService {
    api: Arc<dyn MonitoringApi>,
    board: LiveBoard,
    classifier: CycleClassifier,
}

impl CorrelationService {
    pub fn new(api: Arc<dyn MonitoringApi>, board: LiveBoard, classifier: CycleClassifier) -> Self {
        Self {
            api,
            board,
            classifier,
        }
    }

    pub fn board(&self) -> &LiveBoard {
        &self.board
    }

    pub async fn load_anomalies(&self, page: u32, page_size: u32) -> MonitorResult<Page<Anomaly>> {
        self.api.list_anomalies(page, page_size).await
    }

    /// One anomaly with its steps and a cycle record recomputed from those
    /// steps. The backend's own record is kept when no nominal duration is
    /// known for the machine.
    pub async fn load_anomaly_cycle(&self, anomaly_id: &str) -> MonitorResult<AnomalyCycle> {
        let mut context = self.api.get_anomaly_cycle(anomaly_id).await?;
        sort_steps_by_start(&mut context.steps);

        let mut nominals = self.board.nominal_durations();
        if let Some(cycle) = &context.cycle {
            nominals
                .entry(cycle.machine.clone())
                .or_insert(cycle.nominal_duration_s);
        }

        let target_machine = context
            .anomaly
            .machine
            .clone()
            .or_else(|| context.cycle.as_ref().map(|c| c.machine.clone()));
        let target_cycle = context
            .anomaly
            .cycle
            .or_else(|| context.cycle.as_ref().map(|c| c.cycle));

        let recomputed = self
            .classifier
            .compute(&context.steps, &nominals)
            .into_iter()
            .find(|record| {
                target_machine.as_deref() == Some(record.machine.as_str())
                    && target_cycle == Some(record.cycle)
            });

        match recomputed {
            Some(record) => context.cycle = Some(record),
            None if context.cycle.is_none() => {
                warn!("Anomaly {anomaly_id} has no derivable cycle record");
            }
            None => {}
        }

        Ok(context)
    }

    pub async fn load_parts(&self, page: u32, page_size: u32) -> MonitorResult<Page<Part>> {
        self.api.list_parts(page, page_size).await
    }

    /// Part detail with steps in start order and cycles derived client-side.
    pub async fn load_part_detail(&self, part_id: &str) -> MonitorResult<PartDetail> {
        let mut detail = self.api.get_part_detail(part_id).await?;
        sort_steps_by_start(&mut detail.steps);

        let mut nominals = self.board.nominal_durations();
        for cycle in &detail.machines {
            nominals
                .entry(cycle.machine.clone())
                .or_insert(cycle.nominal_duration_s);
        }

        let derived = self.classifier.compute(&detail.steps, &nominals);
        if !derived.is_empty() || detail.steps.is_empty() {
            detail.machines = derived;
        }
        Ok(detail)
    }

    /// Seeds the board from the live endpoint before the stream delivers.
    pub async fn hydrate_board(&self) -> MonitorResult<usize> {
        let rows = self.api.machines_live().await?;
        self.board.apply_machines_live(&rows);
        info!("Hydrated live board with {} machines", rows.len());
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use crate::telemetry::{CycleStatus, LoginResponse, MachineLive, PartMachineCycle, PartStep};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeApi {
        cycle_calls: AtomicUsize,
    }

    fn step(machine: &str, cycle: i64, duration: f64) -> PartStep {
        PartStep {
            part_id: "P-1".into(),
            machine: machine.into(),
            step_id: "S1".into(),
            step_name: "drill".into(),
            cycle,
            start_time: None,
            end_time: None,
            real_duration_s: duration,
        }
    }

    fn anomaly(id: &str, machine: &str, cycle: i64) -> Anomaly {
        Anomaly {
            id: id.into(),
            part_id: Some("P-1".into()),
            machine: Some(machine.into()),
            step_id: None,
            step_name: None,
            cycle: Some(cycle),
            anomaly_score: Some(0.9),
            rule_anomaly: Some(true),
            rule_reasons: vec!["overrun".into()],
            has_step_error: None,
            n_step_errors: None,
            cycle_duration_s: None,
            duration_overrun_s: None,
            severity: Some("HIGH".into()),
            ts_detected: None,
        }
    }

    #[async_trait]
    impl MonitoringApi for FakeApi {
        async fn login(&self, _u: &str, _p: &str) -> MonitorResult<LoginResponse> {
            Err(MonitorError::Unauthorized)
        }

        async fn list_anomalies(&self, page: u32, page_size: u32) -> MonitorResult<Page<Anomaly>> {
            Ok(Page {
                items: vec![anomaly("1", "M1", 1)],
                total: 1,
                page,
                page_size,
            })
        }

        async fn get_anomaly_cycle(&self, anomaly_id: &str) -> MonitorResult<AnomalyCycle> {
            self.cycle_calls.fetch_add(1, Ordering::SeqCst);
            match anomaly_id {
                "a-1" => Ok(AnomalyCycle {
                    anomaly: anomaly("a-1", "M1", 1),
                    steps: vec![step("M1", 1, 7.0), step("M1", 1, 5.0), step("M2", 1, 3.0)],
                    cycle: Some(PartMachineCycle {
                        machine: "M1".into(),
                        cycle: 1,
                        real_cycle_time_s: 0.0,
                        nominal_duration_s: 10.0,
                        delta_s: 0.0,
                        status: CycleStatus::Unknown,
                    }),
                }),
                _ => Err(MonitorError::NotFound(format!("anomaly {anomaly_id}"))),
            }
        }

        async fn list_parts(&self, _page: u32, _page_size: u32) -> MonitorResult<Page<Part>> {
            Err(MonitorError::Http { status: 500 })
        }

        async fn get_part_detail(&self, part_id: &str) -> MonitorResult<PartDetail> {
            Ok(PartDetail {
                part_id: part_id.into(),
                machines: Vec::new(),
                steps: vec![step("M1", 2, 30.0), step("M1", 1, 12.0)],
            })
        }

        async fn machines_live(&self) -> MonitorResult<Vec<MachineLive>> {
            Ok(vec![MachineLive {
                machine: "M1".into(),
                machine_name: Some("Lathe".into()),
                nominal_duration_s: Some(10.0),
                ..MachineLive::default()
            }])
        }
    }

    fn service() -> (CorrelationService, Arc<FakeApi>) {
        let api = Arc::new(FakeApi::default());
        let service = CorrelationService::new(api.clone(), LiveBoard::new(), CycleClassifier::default());
        (service, api)
    }

    #[tokio::test]
    async fn missing_anomaly_is_not_found_without_retry() {
        let (service, api) = service();
        let err = service.load_anomaly_cycle("missing-id").await.unwrap_err();
        assert!(matches!(err, MonitorError::NotFound(_)));
        assert_eq!(api.cycle_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn anomaly_cycle_is_recomputed_from_steps() {
        let (service, _) = service();
        let context = service.load_anomaly_cycle("a-1").await.unwrap();
        let cycle = context.cycle.unwrap();
        assert_eq!(cycle.machine, "M1");
        assert_eq!(cycle.real_cycle_time_s, 12.0);
        assert_eq!(cycle.delta_s, 2.0);
        assert_eq!(cycle.status, CycleStatus::Over);
    }

    #[tokio::test]
    async fn part_detail_uses_board_nominals() {
        let (service, _) = service();
        service.hydrate_board().await.unwrap();

        let detail = service.load_part_detail("P-1").await.unwrap();
        let cycles: Vec<(i64, CycleStatus)> =
            detail.machines.iter().map(|c| (c.cycle, c.status)).collect();
        assert_eq!(cycles, vec![(1, CycleStatus::Over), (2, CycleStatus::Over)]);
        assert_eq!(service.board().snapshot("M1").unwrap().machine_name, "Lathe");
    }

    #[tokio::test]
    async fn fetch_errors_pass_through() {
        let (service, _) = service();
        assert!(matches!(
            service.load_parts(1, 50).await,
            Err(MonitorError::Http { status: 500 })
        ));
        let page = service.load_anomalies(2, 25).await.unwrap();
        assert_eq!((page.page, page.page_size, page.items.len()), (2, 25, 1));
    }
}
