//! Threatloop: sealed command transport, keyword-routed threat classification,
//! plugin enrichment and an append-only threat memory.
//!
//! A command is sealed by the [`Envelope`], opened on the far side of the
//! transport, dispatched by the [`Router`] to a [`Classifier`], enriched by
//! every registered [`Plugin`], and recorded in [`DnaMemory`].

pub mod classifiers;
pub mod config;
pub mod envelope;
pub mod feed;
pub mod memory;
pub mod model;
pub mod pipeline;
pub mod plugin;
pub mod router;

pub use config::Config;
pub use envelope::{Envelope, EnvelopeError, SealedMessage};
pub use feed::{FeedHandle, FeedItem, PayloadFeed, ReplaySource};
pub use memory::DnaMemory;
pub use model::{ClassificationResult, PluginOutcome, RoutingResult, ThreatEvent, Verdict};
pub use pipeline::{CommandReport, Pipeline};
pub use plugin::{Plugin, PluginRegistry};
pub use router::{Classifier, ClassifierRegistry, DispatchRule, Router};
