//! The long-running collection loop.
//!
//! ```text
//! WAITING_FOR_LIVE -> CONNECTING -> STREAMING -> CHECKPOINTING -> CONNECTING ...
//!                                                     \-> DONE
//! ```
//!
//! Every path into `DONE` passes through `CHECKPOINTING`, so the dataset on
//! disk holds every captured event when `run` returns.

use crate::dataset::{Dataset, DatasetSink};
use crate::error::ServiceError;
use crate::helix::StatusSource;
use crate::irc::{ChatConnector, IrcMessage, KeywordMatcher, Session};
use crate::metadata::MetadataStore;
use crate::recovery::RecoveryManager;
use crate::{ChatEvent, CollectorState, CollectorStatus, ServiceStatus};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Resolves once the shutdown flag is raised. A dropped sender never resolves.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Optional wall-clock bounds for collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionWindow {
    pub start: Option<DateTime<Utc>>,
    pub stop: Option<DateTime<Utc>>,
}

impl CollectionWindow {
    pub fn until_start(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.start
            .filter(|start| *start > now)
            .map(|start| (start - now).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn until_stop(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.stop
            .map(|stop| (stop - now).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        self.stop.is_some_and(|stop| stop <= now)
    }
}

#[derive(Debug, Clone)]
pub struct CollectionSettings {
    pub dataset: String,
    pub refresh_interval: Duration,
    pub offline_poll_interval: Duration,
    pub post_drop_delay: Duration,
    pub liveness_retry_delay: Duration,
    pub window: CollectionWindow,
    pub await_next_broadcast: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Offline,
    Cancelled,
    WindowClosed,
    ConnectFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub events_collected: usize,
    pub total_events: usize,
    pub checkpoints: usize,
    pub exit: ExitReason,
}

/// Why a session ended when collection should carry on
#[derive(Debug)]
enum StreamEnd {
    RefreshDue,
    Dropped(String),
}

#[derive(Debug)]
enum Outcome {
    Continue(StreamEnd),
    Stop(ExitReason),
}

enum Verdict {
    Live,
    Offline,
    Stop(ExitReason),
}

enum Step {
    WaitingForLive,
    Connecting,
    Streaming(Session),
    Checkpointing(Outcome),
    Done(ExitReason),
}

impl Step {
    fn state(&self) -> CollectorState {
        match self {
            Step::WaitingForLive => CollectorState::WaitingForLive,
            Step::Connecting => CollectorState::Connecting,
            Step::Streaming(_) => CollectorState::Streaming,
            Step::Checkpointing(_) => CollectorState::Checkpointing,
            Step::Done(_) => CollectorState::Done,
        }
    }
}

pub struct Collection<C, S> {
    connector: C,
    status_source: S,
    sink: DatasetSink,
    matcher: KeywordMatcher,
    recovery: RecoveryManager,
    settings: CollectionSettings,
    metadata: MetadataStore,
    dataset: Dataset,
    status: Arc<RwLock<CollectorStatus>>,
    shutdown: watch::Receiver<bool>,
    events_collected: usize,
    checkpoints: usize,
    last_sent: Option<NaiveDateTime>,
}

impl<C: ChatConnector, S: StatusSource> Collection<C, S> {
    /// Builds the loop and resumes from whatever the sink already holds.
    pub fn new(
        connector: C,
        status_source: S,
        sink: DatasetSink,
        matcher: KeywordMatcher,
        recovery: RecoveryManager,
        settings: CollectionSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ServiceError> {
        let dataset = sink.load(&settings.dataset)?;
        let dataset_last_sent = dataset.last_sent();

        let mut status = CollectorStatus::new(matcher.channel());
        status.total_events = dataset.len();

        Ok(Self {
            connector,
            status_source,
            sink,
            matcher,
            recovery,
            settings,
            metadata: MetadataStore::new(),
            dataset,
            status: Arc::new(RwLock::new(status)),
            shutdown,
            events_collected: 0,
            checkpoints: 0,
            last_sent: dataset_last_sent,
        })
    }

    /// Shared view for the health endpoint
    pub fn status(&self) -> Arc<RwLock<CollectorStatus>> {
        self.status.clone()
    }

    pub async fn run(mut self) -> Result<RunSummary, ServiceError> {
        info!(
            "Starting collection for keyword '{}' ({} events already on disk)",
            self.matcher.keyword(),
            self.dataset.len()
        );
        self.status.write().await.status = ServiceStatus::Healthy;

        let mut step = Step::WaitingForLive;
        loop {
            self.enter(step.state()).await;

            step = match step {
                Step::WaitingForLive => self.wait_for_live().await,
                Step::Connecting => self.connect().await,
                Step::Streaming(session) => self.stream(session).await,
                Step::Checkpointing(outcome) => self.checkpoint_then(outcome).await?,
                Step::Done(exit) => {
                    let summary = RunSummary {
                        events_collected: self.events_collected,
                        total_events: self.dataset.len(),
                        checkpoints: self.checkpoints,
                        exit,
                    };
                    info!("Collection finished: {:?}", summary);
                    return Ok(summary);
                }
            };
        }
    }

    async fn enter(&self, state: CollectorState) {
        info!("State -> {}", state);
        let mut status = self.status.write().await;
        status.state = state;
        if state == CollectorState::Done {
            status.status = ServiceStatus::ShuttingDown;
        }
    }

    async fn wait_for_live(&mut self) -> Step {
        loop {
            if let Some(wait) = self.settings.window.until_start(Utc::now()) {
                info!("Collection window opens in {:?}", wait);
                if !self.pause(wait).await {
                    return Step::Checkpointing(Outcome::Stop(ExitReason::Cancelled));
                }
                continue;
            }

            match self.liveness_verdict().await {
                Verdict::Live => return Step::Connecting,
                Verdict::Offline => {
                    info!(
                        "Broadcast offline, polling again in {:?}",
                        self.settings.offline_poll_interval
                    );
                    if !self.pause(self.settings.offline_poll_interval).await {
                        return Step::Checkpointing(Outcome::Stop(ExitReason::Cancelled));
                    }
                }
                Verdict::Stop(exit) => return Step::Checkpointing(Outcome::Stop(exit)),
            }
        }
    }

    /// Polls until the status source gives a definite answer.
    async fn liveness_verdict(&mut self) -> Verdict {
        loop {
            if self.settings.window.is_closed(Utc::now()) {
                return Verdict::Stop(ExitReason::WindowClosed);
            }

            let polled = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return Verdict::Stop(ExitReason::Cancelled),
                polled = self.status_source.is_live() => polled,
            };

            let retry_in = match polled {
                Ok(true) => return Verdict::Live,
                Ok(false) => return Verdict::Offline,
                Err(ServiceError::RateLimited { wait_time_secs }) => {
                    warn!("Status endpoint rate limited, waiting {}s", wait_time_secs);
                    Duration::from_secs(wait_time_secs)
                }
                Err(e) => {
                    warn!(
                        "Liveness unknown ({}), retrying in {:?}",
                        e, self.settings.liveness_retry_delay
                    );
                    self.settings.liveness_retry_delay
                }
            };

            if !self.pause(retry_in).await {
                return Verdict::Stop(ExitReason::Cancelled);
            }
        }
    }

    async fn connect(&mut self) -> Step {
        let fetched = tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown) => {
                return Step::Checkpointing(Outcome::Stop(ExitReason::Cancelled));
            }
            fetched = self.status_source.fetch() => fetched,
        };
        let snapshot = self.metadata.apply(fetched);
        self.status.write().await.last_metadata = Some(snapshot.metadata.clone());

        let connector = &self.connector;
        let opened = tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown) => {
                return Step::Checkpointing(Outcome::Stop(ExitReason::Cancelled));
            }
            opened = self.recovery.execute(|| connector.connect()) => opened,
        };

        match opened {
            Ok(session) => Step::Streaming(session),
            Err(e) => {
                error!("Could not open a chat session: {}", e);
                self.status.write().await.status = ServiceStatus::Degraded;
                Step::Checkpointing(Outcome::Stop(ExitReason::ConnectFailed))
            }
        }
    }

    async fn stream(&mut self, mut session: Session) -> Step {
        let session_id = session.id();
        self.status.write().await.session_id = Some(session_id.to_string());

        let window_left = self.settings.window.until_stop(Utc::now());
        let refresh = sleep(self.settings.refresh_interval);
        let window_timer = sleep(window_left.unwrap_or(self.settings.refresh_interval));
        tokio::pin!(refresh, window_timer);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => {
                    break Outcome::Stop(ExitReason::Cancelled);
                }
                _ = &mut window_timer, if window_left.is_some() => {
                    break Outcome::Stop(ExitReason::WindowClosed);
                }
                _ = &mut refresh => break Outcome::Continue(StreamEnd::RefreshDue),
                received = session.next_message() => match received {
                    Ok(IrcMessage::Reconnect) => {
                        break Outcome::Continue(StreamEnd::Dropped(
                            "server asked for a reconnect".to_string(),
                        ));
                    }
                    Ok(message) => {
                        if self.capture(&message) {
                            self.publish_progress().await;
                        }
                    }
                    Err(e) => {
                        if !e.is_connection() {
                            warn!(session = %session_id, "Unexpected session error: {}", e);
                        }
                        break Outcome::Continue(StreamEnd::Dropped(e.to_string()));
                    }
                },
            }
        };

        info!(session = %session_id, "Session ending: {:?}", outcome);
        session.close().await;
        self.status.write().await.session_id = None;

        Step::Checkpointing(outcome)
    }

    /// Appends an event when `message` is a keyword hit. Returns whether it was.
    fn capture(&mut self, message: &IrcMessage) -> bool {
        let Some(hit) = self.matcher.matches(message) else {
            return false;
        };

        let snapshot = self.metadata.current();
        let event = ChatEvent {
            sent: self.stamp(),
            game_name: snapshot.metadata.game_name.clone(),
            title: snapshot.metadata.title.clone(),
            user: hit.user.to_string(),
            message: hit.message.to_string(),
        };

        info!(
            "Captured message from {} (metadata v{}): {}",
            event.user, snapshot.version, event.message
        );
        self.dataset.push(event);
        self.events_collected += 1;
        true
    }

    /// Local wall clock, never earlier than the previous stamp or the last resumed row
    fn stamp(&mut self) -> NaiveDateTime {
        let now = Local::now().naive_local();
        let sent = match self.last_sent {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_sent = Some(sent);
        sent
    }

    async fn publish_progress(&self) {
        let mut status = self.status.write().await;
        status.events_collected = self.events_collected;
        status.total_events = self.dataset.len();
    }

    async fn checkpoint(&mut self) -> Result<(), ServiceError> {
        let path = self.sink.save(&self.dataset, &self.settings.dataset)?;
        self.checkpoints += 1;
        info!(
            "Checkpoint {}: {} events written to {}",
            self.checkpoints,
            self.dataset.len(),
            path.display()
        );

        let mut status = self.status.write().await;
        status.status = ServiceStatus::Healthy;
        status.last_checkpoint = Some(Utc::now());
        status.events_collected = self.events_collected;
        status.total_events = self.dataset.len();
        Ok(())
    }

    async fn checkpoint_then(&mut self, outcome: Outcome) -> Result<Step, ServiceError> {
        let saved = self.checkpoint().await;

        match outcome {
            Outcome::Stop(exit) => {
                if let Err(e) = saved {
                    error!("Final checkpoint failed: {}", e);
                    self.status.write().await.status = ServiceStatus::Degraded;
                    return Err(e);
                }
                Ok(Step::Done(exit))
            }
            Outcome::Continue(end) => {
                let failed = saved.is_err();
                if let Err(e) = saved {
                    error!("Checkpoint failed, retrying at the next one: {}", e);
                    self.status.write().await.status = ServiceStatus::Degraded;
                }

                match self.after_session(end).await {
                    // the next checkpoint is the final one
                    Step::Done(exit) if failed => Ok(Step::Checkpointing(Outcome::Stop(exit))),
                    next => Ok(next),
                }
            }
        }
    }

    async fn after_session(&mut self, end: StreamEnd) -> Step {
        if let StreamEnd::Dropped(reason) = &end {
            warn!(
                "Session dropped ({}), checking broadcast in {:?}",
                reason, self.settings.post_drop_delay
            );
            if !self.pause(self.settings.post_drop_delay).await {
                return Step::Done(ExitReason::Cancelled);
            }
        }

        match self.liveness_verdict().await {
            Verdict::Live => Step::Connecting,
            Verdict::Offline if self.settings.await_next_broadcast => {
                info!("Broadcast ended, waiting for the next one");
                Step::WaitingForLive
            }
            Verdict::Offline => Step::Done(ExitReason::Offline),
            Verdict::Stop(exit) => Step::Done(exit),
        }
    }

    /// Sleeps, cut short by the window end. Returns false when cancelled.
    async fn pause(&mut self, duration: Duration) -> bool {
        let duration = match self.settings.window.until_stop(Utc::now()) {
            Some(left) => duration.min(left),
            None => duration,
        };

        tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown) => false,
            _ = sleep(duration) => true,
        }
    }
}
