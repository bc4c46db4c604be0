pub mod board;
pub mod cycles;
pub mod models;
pub mod service;

pub use board::{LiveBoard, TelemetryModel};
pub use cycles::{compute_part_machine_cycles, sort_steps_by_start, CycleClassifier};
pub use models::{
    Anomaly, AnomalyCycle, CycleStatus, LoginResponse, MachineLive, MachineSnapshot, Page, Part,
    PartDetail, PartMachineCycle, PartStatus, PartStep, TelemetryEvent,
};
pub use service::CorrelationService;
