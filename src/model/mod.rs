//! Verdict vocabulary shared by the router, plugins and DNA memory

pub mod event;
pub mod result;
pub mod verdict;

pub use event::{EventTime, ThreatEvent};
pub use result::{ClassificationResult, PluginOutcome, RoutingResult, UNMATCHED_MODEL};
pub use verdict::Verdict;
