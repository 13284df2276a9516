//! Payload feed, a supervised background task pushing payloads into the command loop
//!
//! A [`PayloadSource`] yields payloads; [`PayloadFeed`] paces them onto a
//! bounded channel and stops on end of source, on [`FeedHandle::stop`], or
//! when the receiver goes away.

use log::{debug, info, warn};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

/// One payload on its way to the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub text: String,
    pub src_ip: Option<String>,
}

impl FeedItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            src_ip: None,
        }
    }

    pub fn with_source(mut self, src_ip: impl Into<String>) -> Self {
        self.src_ip = Some(src_ip.into());
        self
    }
}

/// Where payloads come from
pub trait PayloadSource: Send + 'static {
    fn name(&self) -> &str;

    /// Next payload, `Ok(None)` once the source is exhausted
    fn next_payload(&mut self) -> Result<Option<FeedItem>, FeedError>;
}

/// Replays a capture export, one payload per line.
///
/// Lines are either `payload` or `src_ip<TAB>payload`. Lines starting with
/// `#` are comments.
pub struct ReplaySource {
    name: String,
    lines: std::vec::IntoIter<String>,
}

impl ReplaySource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| FeedError::Source(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_lines(
            path.display().to_string(),
            content.lines().map(str::to_string),
        ))
    }

    pub fn from_lines<I, S>(name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines
            .into_iter()
            .map(Into::into)
            .filter(|l| !l.trim_start().starts_with('#'))
            .collect();
        Self {
            name: name.into(),
            lines: lines.into_iter(),
        }
    }
}

impl PayloadSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_payload(&mut self) -> Result<Option<FeedItem>, FeedError> {
        Ok(self.lines.next().map(|line| parse_line(&line)))
    }
}

fn parse_line(line: &str) -> FeedItem {
    if let Some((ip, payload)) = line.split_once('\t') {
        if ip.trim().parse::<IpAddr>().is_ok() {
            return FeedItem::new(payload.trim()).with_source(ip.trim());
        }
    }
    FeedItem::new(line.trim())
}

/// Counters returned when the feed task ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub sent: usize,
    /// Empty payloads dropped before sending
    pub skipped: usize,
    /// Ended by `stop()` or a closed receiver rather than end of source
    pub stopped: bool,
}

pub struct PayloadFeed;

impl PayloadFeed {
    pub fn spawn<S: PayloadSource>(source: S, tx: mpsc::Sender<FeedItem>) -> FeedHandle {
        Self::spawn_with_interval(source, DEFAULT_INTERVAL, tx)
    }

    pub fn spawn_with_interval<S: PayloadSource>(
        mut source: S,
        interval: Duration,
        tx: mpsc::Sender<FeedItem>,
    ) -> FeedHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let interval = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            info!("Payload feed started: {} (every {:?})", source.name(), interval);
            let mut summary = FeedSummary::default();
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => {
                        summary.stopped = true;
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                let item = match source.next_payload()? {
                    Some(item) => item,
                    None => break,
                };
                if item.text.is_empty() {
                    debug!("Empty payload skipped");
                    summary.skipped += 1;
                    continue;
                }

                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => {
                        summary.stopped = true;
                        break;
                    }
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            warn!("Payload feed receiver closed");
                            summary.stopped = true;
                            break;
                        }
                        summary.sent += 1;
                    }
                }
            }

            info!(
                "Payload feed finished: {} sent, {} skipped",
                summary.sent, summary.skipped
            );
            Ok::<_, FeedError>(summary)
        });

        FeedHandle { task, stop_tx }
    }
}

/// Owner of a running feed. Dropping it stops the feed.
pub struct FeedHandle {
    task: JoinHandle<Result<FeedSummary, FeedError>>,
    stop_tx: watch::Sender<bool>,
}

impl FeedHandle {
    /// Ask the feed to finish after the payload in flight
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn join(self) -> Result<FeedSummary, FeedError> {
        let FeedHandle { task, stop_tx: _stop_tx } = self;
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(FeedError::Aborted),
            Err(e) => Err(FeedError::Panicked(e.to_string())),
        }
    }
}

/// Payload feed errors
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Payload source failed: {0}")]
    Source(String),

    #[error("Payload feed aborted")]
    Aborted,

    #[error("Payload feed panicked: {0}")]
    Panicked(String),
}
