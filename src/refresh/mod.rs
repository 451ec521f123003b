use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::aggregate::aggregate;
use crate::api::{AppSelection, ComplianceSource, FALLBACK_MESSAGE, failure_message};
use crate::core::{Aggregates, CompliancePayload};
use crate::logs::{RefreshLog, RefreshOutcome, RefreshRecord};
use crate::session::Session;

pub const INTERVAL_CHOICES: [Duration; 4] = [
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(10 * 60),
    Duration::from_secs(30 * 60),
];
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const NOT_SIGNED_IN: &str = "not signed in";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Fetching,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Mount,
    Manual,
    AppChanged,
    Timer,
}

impl Trigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            Trigger::Mount => "mount",
            Trigger::Manual => "manual",
            Trigger::AppChanged => "app_changed",
            Trigger::Timer => "timer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOptions {
    pub auto_refresh: bool,
    pub interval: Duration,
    pub default_app: Option<AppSelection>,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            auto_refresh: false,
            interval: DEFAULT_INTERVAL,
            default_app: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    AppsLoaded { apps: Vec<String> },
    AppsFailed { message: String },
    Started { seq: u64, trigger: Trigger },
    Applied { seq: u64 },
    Failed { seq: u64, message: String },
    Stale { seq: u64 },
}

enum Message {
    Apps(Result<Vec<String>, String>),
    Compliance {
        seq: u64,
        result: Result<CompliancePayload, String>,
        finished_at: OffsetDateTime,
    },
}

#[derive(Debug, Clone)]
struct InFlight {
    trigger: Trigger,
    app: AppSelection,
    started_at: OffsetDateTime,
}

/// Owns the current payload and every request that may replace it.
///
/// Requests run on their own threads and report back over a channel that
/// [`poll`](Self::poll) drains. Every compliance request gets a sequence
/// number; a response older than the newest one already settled (applied
/// or failed) is discarded, so a slow answer for a previous app never
/// overwrites a newer one.
pub struct RefreshController {
    source: Arc<dyn ComplianceSource>,
    session: Session,
    options: RefreshOptions,
    tx: Sender<Message>,
    rx: Receiver<Message>,

    apps: Vec<String>,
    apps_pending: bool,
    selected: AppSelection,

    payload: Option<CompliancePayload>,
    applied_seq: u64,
    settled_seq: u64,
    next_seq: u64,
    in_flight: BTreeMap<u64, InFlight>,
    error: Option<String>,
    last_success_at: Option<OffsetDateTime>,

    next_tick: Option<Instant>,
    shut_down: bool,
    log: Option<RefreshLog>,
    log_error: Option<String>,
}

impl RefreshController {
    pub fn new(source: Arc<dyn ComplianceSource>, session: Session, options: RefreshOptions) -> Self {
        let (tx, rx) = mpsc::channel();
        let selected = options.default_app.clone().unwrap_or_default();
        Self {
            source,
            session,
            options,
            tx,
            rx,
            apps: Vec::new(),
            apps_pending: false,
            selected,
            payload: None,
            applied_seq: 0,
            settled_seq: 0,
            next_seq: 1,
            in_flight: BTreeMap::new(),
            error: None,
            last_success_at: None,
            next_tick: None,
            shut_down: false,
            log: None,
            log_error: None,
        }
    }

    pub fn with_log(mut self, log: RefreshLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn state(&self) -> RefreshState {
        if self.apps_pending || !self.in_flight.is_empty() {
            return RefreshState::Fetching;
        }
        match &self.error {
            Some(message) => RefreshState::Error(message.clone()),
            None => RefreshState::Idle,
        }
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.state(), RefreshState::Fetching)
    }

    pub fn payload(&self) -> Option<&CompliancePayload> {
        self.payload.as_ref()
    }

    pub fn applied_seq(&self) -> u64 {
        self.applied_seq
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn last_success_at(&self) -> Option<OffsetDateTime> {
        self.last_success_at
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn options(&self) -> &RefreshOptions {
        &self.options
    }

    pub fn apps(&self) -> &[String] {
        &self.apps
    }

    pub fn selected(&self) -> &AppSelection {
        &self.selected
    }

    pub fn next_tick(&self) -> Option<Instant> {
        self.next_tick
    }

    pub fn log_error(&self) -> Option<&str> {
        self.log_error.as_deref()
    }

    pub fn selection_options(&self) -> Vec<AppSelection> {
        std::iter::once(AppSelection::All)
            .chain(self.apps.iter().cloned().map(AppSelection::App))
            .collect()
    }

    pub fn start(&mut self, now: Instant) {
        if self.shut_down || self.apps_pending {
            return;
        }
        if !self.session.is_authenticated() {
            self.error = Some(NOT_SIGNED_IN.to_string());
            return;
        }
        self.apps_pending = true;
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = guarded(|| source.fetch_apps());
            let _ = tx.send(Message::Apps(result));
        });
        self.reschedule(now);
    }

    pub fn start_with_apps(
        &mut self,
        apps: anyhow::Result<Vec<String>>,
        now: Instant,
    ) -> Vec<RefreshEvent> {
        let mut events = Vec::new();
        if self.shut_down || self.apps_pending {
            return events;
        }
        let result = apps.map_err(|err| failure_message(&err));
        self.handle(Message::Apps(result), now, &mut events);
        self.reschedule(now);
        events
    }

    pub fn trigger(&mut self, trigger: Trigger, now: Instant) -> Option<u64> {
        if self.shut_down {
            return None;
        }
        if !self.session.is_authenticated() {
            self.error = Some(NOT_SIGNED_IN.to_string());
            return None;
        }

        self.error = None;
        let seq = self.next_seq;
        self.next_seq += 1;
        let app = self.selected.clone();
        self.in_flight.insert(
            seq,
            InFlight {
                trigger,
                app: app.clone(),
                started_at: OffsetDateTime::now_utc(),
            },
        );

        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = guarded(|| source.fetch_compliance(&app));
            let _ = tx.send(Message::Compliance {
                seq,
                result,
                finished_at: OffsetDateTime::now_utc(),
            });
        });

        if trigger == Trigger::Timer {
            self.next_tick = Some(now + self.options.interval);
        }
        Some(seq)
    }

    pub fn select_app(&mut self, app: AppSelection, now: Instant) -> Option<u64> {
        if app == self.selected {
            return None;
        }
        self.selected = app;
        self.reschedule(now);
        self.trigger(Trigger::AppChanged, now)
    }

    pub fn set_auto_refresh(&mut self, enabled: bool, now: Instant) {
        self.options.auto_refresh = enabled;
        self.reschedule(now);
    }

    pub fn set_interval(&mut self, interval: Duration, now: Instant) {
        self.options.interval = interval;
        self.reschedule(now);
    }

    pub fn cycle_interval(&mut self, now: Instant) -> Duration {
        let pos = INTERVAL_CHOICES
            .iter()
            .position(|d| *d == self.options.interval);
        let next = match pos {
            Some(p) => INTERVAL_CHOICES[(p + 1) % INTERVAL_CHOICES.len()],
            None => DEFAULT_INTERVAL,
        };
        self.set_interval(next, now);
        next
    }

    fn reschedule(&mut self, now: Instant) {
        self.next_tick = if self.options.auto_refresh && !self.shut_down {
            Some(now + self.options.interval)
        } else {
            None
        };
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn poll(&mut self, now: Instant) -> Vec<RefreshEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(msg) => self.handle(msg, now, &mut events),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if let Some(due) = self.next_tick {
            if now >= due && self.options.auto_refresh {
                if let Some(seq) = self.trigger(Trigger::Timer, now) {
                    events.push(RefreshEvent::Started {
                        seq,
                        trigger: Trigger::Timer,
                    });
                }
            }
        }
        events
    }

    pub fn settle(&mut self) -> Vec<RefreshEvent> {
        let mut events = Vec::new();
        while !self.shut_down && (self.apps_pending || !self.in_flight.is_empty()) {
            match self.rx.recv() {
                Ok(msg) => self.handle(msg, Instant::now(), &mut events),
                Err(_) => break,
            }
        }
        events
    }

    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.next_tick = None;
        self.apps_pending = false;
        self.in_flight.clear();
    }

    fn handle(&mut self, msg: Message, now: Instant, events: &mut Vec<RefreshEvent>) {
        match msg {
            Message::Apps(result) => {
                self.apps_pending = false;
                self.apps_loaded(result, events);
                if let Some(seq) = self.trigger(Trigger::Mount, now) {
                    events.push(RefreshEvent::Started {
                        seq,
                        trigger: Trigger::Mount,
                    });
                }
            }
            Message::Compliance {
                seq,
                result,
                finished_at,
            } => {
                if let Some(event) = self.complete(seq, result, finished_at) {
                    events.push(event);
                }
            }
        }
    }

    fn apps_loaded(&mut self, result: Result<Vec<String>, String>, events: &mut Vec<RefreshEvent>) {
        match result {
            Ok(apps) => {
                self.apps = sort_app_names(apps);
                self.selected = default_selection(&self.apps, self.options.default_app.as_ref());
                events.push(RefreshEvent::AppsLoaded {
                    apps: self.apps.clone(),
                });
            }
            Err(message) => {
                self.apps.clear();
                self.selected = self.options.default_app.clone().unwrap_or_default();
                events.push(RefreshEvent::AppsFailed { message });
            }
        }
    }

    fn complete(
        &mut self,
        seq: u64,
        result: Result<CompliancePayload, String>,
        finished_at: OffsetDateTime,
    ) -> Option<RefreshEvent> {
        let flight = self.in_flight.remove(&seq)?;

        if seq < self.settled_seq {
            self.write_log(seq, &flight, finished_at, RefreshOutcome::Stale, None, None);
            return Some(RefreshEvent::Stale { seq });
        }
        self.settled_seq = seq;

        match result {
            Ok(payload) => {
                let agg = aggregate(&payload);
                self.write_log(
                    seq,
                    &flight,
                    finished_at,
                    RefreshOutcome::Ok,
                    None,
                    Some(&agg),
                );
                self.payload = Some(payload);
                self.applied_seq = seq;
                self.last_success_at = Some(finished_at);
                self.error = None;
                Some(RefreshEvent::Applied { seq })
            }
            Err(message) => {
                self.write_log(
                    seq,
                    &flight,
                    finished_at,
                    RefreshOutcome::Error,
                    Some(&message),
                    None,
                );
                self.error = Some(message.clone());
                Some(RefreshEvent::Failed { seq, message })
            }
        }
    }

    fn write_log(
        &mut self,
        seq: u64,
        flight: &InFlight,
        finished_at: OffsetDateTime,
        status: RefreshOutcome,
        error: Option<&str>,
        agg: Option<&Aggregates>,
    ) {
        let Some(log) = &self.log else {
            return;
        };
        let record = RefreshRecord {
            seq,
            trigger: flight.trigger.as_str().to_string(),
            app: flight.app.to_string(),
            started_at: flight.started_at,
            finished_at,
            status,
            error: error.map(str::to_string),
            totals: agg.map(|a| a.totals),
            excluded_regions: agg.map(|a| a.excluded_regions.len()).unwrap_or(0),
        };
        if let Err(err) = log.append(&record) {
            // One failure disables the log for the rest of the session.
            self.log_error = Some(format!("{err:#}"));
            self.log = None;
        }
    }
}

impl Drop for RefreshController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(failure_message(&err)),
        Err(_) => Err(FALLBACK_MESSAGE.to_string()),
    }
}

pub fn sort_app_names(mut apps: Vec<String>) -> Vec<String> {
    apps.retain(|a| !a.trim().is_empty());
    apps.sort();
    apps.dedup();
    apps
}

pub fn default_selection(apps: &[String], configured: Option<&AppSelection>) -> AppSelection {
    match configured {
        Some(AppSelection::All) => return AppSelection::All,
        Some(AppSelection::App(name)) if apps.is_empty() || apps.contains(name) => {
            return AppSelection::App(name.clone());
        }
        _ => {}
    }
    apps.first()
        .cloned()
        .map(AppSelection::App)
        .unwrap_or(AppSelection::All)
}
