pub mod clock;
pub mod controller;
pub mod digest;
pub mod fetcher;
pub mod loop_worker;

pub use clock::{Clock, SystemClock};
pub use controller::MonitorController;
pub use digest::compute_digest;
pub use fetcher::{FetchError, PageFetcher, ProxyFetcher};
pub use loop_worker::{monitor_loop, CycleReport, Monitor, TargetOutcome};
