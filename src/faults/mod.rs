//! Fault detection pipeline (§4.4–§4.6): pure detectors, the informer-driven
//! resource watcher, and the two enrichment paths (event-stream and informer).

pub mod detectors;
pub mod enrichment;
pub mod processor;
pub mod resource_watcher;

pub use detectors::{FaultSeverity, FaultSignal, FaultType};
