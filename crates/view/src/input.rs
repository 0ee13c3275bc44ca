//! The filter entry: debounced free-text publishing and label-selector submission.

use std::fmt;
use std::time::{Duration, Instant};

use pipedash_search::{classify, LabelFilterError, LabelFilterSet, LabelPair, QueryKind};
use tracing::{debug, info};

use crate::channel::QueryChannel;

/// A scheduled publish. Only the most recently issued ticket can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub generation: u64,
    pub due: Instant,
}

/// Restartable one-shot timer driven by the caller's clock.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    generation: u64,
    pending: Option<Ticket>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, generation: 0, pending: None }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Restart the timer; any earlier ticket goes stale.
    pub fn schedule(&mut self, now: Instant) -> Ticket {
        self.generation += 1;
        let t = Ticket { generation: self.generation, due: now + self.delay };
        self.pending = Some(t);
        t
    }

    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn pending(&self) -> Option<Ticket> {
        self.pending
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.pending.as_ref() == Some(ticket)
    }

    pub fn take_due(&mut self, now: Instant) -> Option<Ticket> {
        match self.pending {
            Some(t) if t.due <= now => self.pending.take(),
            _ => None,
        }
    }

    /// Consume `ticket` if it is still the current one.
    pub fn take(&mut self, ticket: &Ticket) -> bool {
        if self.is_current(ticket) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    Idle,
    PendingDebounce(Ticket),
    Committed,
}

/// Dismissible message shown next to the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
}

impl From<LabelFilterError> for Notice {
    fn from(e: LabelFilterError) -> Self {
        Self { message: e.to_string() }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    Nothing,
    Scheduled(Ticket),
    /// The query now on the channel.
    Published(String),
    /// The label filters changed; carries the new upstream selector.
    LabelFilters(String),
    Rejected(Notice),
}

pub struct FilterInput {
    channel: QueryChannel,
    debouncer: Debouncer,
    text: String,
    state: InputState,
    labels: LabelFilterSet,
    notice: Option<Notice>,
}

impl FilterInput {
    /// The entry starts out showing the channel's current query.
    pub fn new(channel: QueryChannel, delay: Duration) -> Self {
        let text = channel.current_value();
        Self { channel, debouncer: Debouncer::new(delay), text, state: InputState::Idle, labels: LabelFilterSet::new(), notice: None }
    }

    pub fn with_label_filters(mut self, labels: LabelFilterSet) -> Self {
        self.labels = labels;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn state(&self) -> InputState {
        self.state
    }

    pub fn label_filters(&self) -> &LabelFilterSet {
        &self.labels
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn dismiss_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    fn publish(&mut self, query: String) -> InputOutcome {
        self.debouncer.cancel();
        self.state = InputState::Committed;
        self.channel.publish(query.clone());
        InputOutcome::Published(query)
    }

    pub fn on_input(&mut self, text: &str, now: Instant) -> InputOutcome {
        self.text = text.to_string();
        match classify(text) {
            QueryKind::Empty => self.publish(String::new()),
            QueryKind::LabelSelector(_) => {
                // submitted explicitly; never published as text
                self.debouncer.cancel();
                self.state = InputState::Idle;
                InputOutcome::Nothing
            }
            QueryKind::FreeText(_) => {
                let t = self.debouncer.schedule(now);
                self.state = InputState::PendingDebounce(t);
                InputOutcome::Scheduled(t)
            }
        }
    }

    /// Fire the pending publish if it is due at `now`.
    pub fn tick(&mut self, now: Instant) -> InputOutcome {
        match self.debouncer.take_due(now) {
            Some(t) => self.commit(t),
            None => InputOutcome::Nothing,
        }
    }

    /// Fire `ticket` regardless of the clock; stale tickets do nothing.
    pub fn fire(&mut self, ticket: Ticket) -> InputOutcome {
        if self.debouncer.take(&ticket) {
            self.commit(ticket)
        } else {
            debug!(generation = ticket.generation, "stale debounce ticket ignored");
            InputOutcome::Nothing
        }
    }

    fn commit(&mut self, ticket: Ticket) -> InputOutcome {
        debug!(generation = ticket.generation, "debounced query fired");
        let q = self.text.trim().to_string();
        self.publish(q)
    }

    pub fn submit(&mut self) -> InputOutcome {
        match classify(&self.text) {
            QueryKind::Empty => self.publish(String::new()),
            QueryKind::FreeText(q) => self.publish(q),
            QueryKind::LabelSelector(pairs) => {
                self.debouncer.cancel();
                match self.labels.merge(&pairs) {
                    Ok(()) => {
                        self.text.clear();
                        self.notice = None;
                        self.state = InputState::Idle;
                        let selector = self.labels.selector();
                        info!(selector = %selector, "label filters applied");
                        InputOutcome::LabelFilters(selector)
                    }
                    Err(e) => {
                        let notice = Notice::from(e);
                        debug!(notice = %notice, "label filter rejected");
                        self.notice = Some(notice.clone());
                        InputOutcome::Rejected(notice)
                    }
                }
            }
        }
    }

    pub fn escape(&mut self) -> InputOutcome {
        self.text.clear();
        self.publish(String::new())
    }

    pub fn remove_label_filter(&mut self, pair: &LabelPair) -> InputOutcome {
        if self.labels.remove(pair) {
            InputOutcome::LabelFilters(self.labels.selector())
        } else {
            InputOutcome::Nothing
        }
    }

    pub fn clear_label_filters(&mut self) -> InputOutcome {
        if self.labels.is_empty() {
            return InputOutcome::Nothing;
        }
        self.labels.clear();
        InputOutcome::LabelFilters(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(300);

    fn input() -> (QueryChannel, FilterInput) {
        let ch = QueryChannel::detached();
        let fi = FilterInput::new(ch.clone(), DELAY);
        (ch, fi)
    }

    #[test]
    fn typing_publishes_after_quiet_period() {
        let (ch, mut fi) = input();
        let t0 = Instant::now();
        assert!(matches!(fi.on_input("p", t0), InputOutcome::Scheduled(_)));
        assert!(matches!(fi.on_input("pr", t0 + Duration::from_millis(100)), InputOutcome::Scheduled(_)));
        assert_eq!(fi.tick(t0 + Duration::from_millis(350)), InputOutcome::Nothing);
        assert_eq!(ch.current_value(), "");
        assert_eq!(fi.tick(t0 + Duration::from_millis(400)), InputOutcome::Published("pr".into()));
        assert_eq!(ch.current_value(), "pr");
        assert_eq!(fi.state(), InputState::Committed);
        assert_eq!(fi.tick(t0 + Duration::from_millis(900)), InputOutcome::Nothing);
    }

    #[test]
    fn stale_ticket_does_not_fire() {
        let (ch, mut fi) = input();
        let t0 = Instant::now();
        let InputOutcome::Scheduled(first) = fi.on_input("bu", t0) else { panic!("expected a ticket") };
        let InputOutcome::Scheduled(second) = fi.on_input("build", t0) else { panic!("expected a ticket") };
        assert_eq!(fi.fire(first), InputOutcome::Nothing);
        assert_eq!(ch.current_value(), "");
        assert_eq!(fi.fire(second), InputOutcome::Published("build".into()));
        assert_eq!(fi.fire(second), InputOutcome::Nothing);
    }

    #[test]
    fn clearing_publishes_immediately() {
        let (ch, mut fi) = input();
        ch.publish("old");
        let t0 = Instant::now();
        fi.on_input("ne", t0);
        assert_eq!(fi.on_input("  ", t0), InputOutcome::Published(String::new()));
        assert_eq!(ch.current_value(), "");
        assert_eq!(fi.tick(t0 + DELAY * 2), InputOutcome::Nothing);
    }

    #[test]
    fn label_selector_cancels_pending_publish() {
        let (ch, mut fi) = input();
        let t0 = Instant::now();
        fi.on_input("env", t0);
        assert_eq!(fi.on_input("env:prod", t0), InputOutcome::Nothing);
        assert_eq!(fi.state(), InputState::Idle);
        assert_eq!(fi.tick(t0 + DELAY * 2), InputOutcome::Nothing);
        assert_eq!(ch.current_value(), "");

        assert_eq!(fi.submit(), InputOutcome::LabelFilters("env=prod".into()));
        assert_eq!(fi.text(), "");
        fi.on_input("team:a , env:dev", t0);
        assert_eq!(fi.submit(), InputOutcome::LabelFilters("env=prod,team=a,env=dev".into()));
    }

    #[test]
    fn rejected_selector_keeps_text_and_raises_notice() {
        let (_ch, mut fi) = input();
        let t0 = Instant::now();
        fi.on_input("env:prod", t0);
        fi.submit();
        fi.on_input("env:prod", t0);
        let InputOutcome::Rejected(notice) = fi.submit() else { panic!("expected a rejection") };
        assert!(notice.message.contains("env=prod"));
        assert_eq!(fi.text(), "env:prod");
        assert_eq!(fi.label_filters().len(), 1);
        assert_eq!(fi.dismiss_notice(), Some(notice));
        assert!(fi.notice().is_none());

        let long = format!("name:{}", "x".repeat(64));
        fi.on_input(&long, t0);
        assert!(matches!(fi.submit(), InputOutcome::Rejected(_)));
        assert_eq!(fi.text(), long);
        assert_eq!(fi.label_filters().selector(), "env=prod");
    }

    #[test]
    fn submit_and_escape_publish_now() {
        let (ch, mut fi) = input();
        let t0 = Instant::now();
        fi.on_input(" deploy ", t0);
        assert_eq!(fi.submit(), InputOutcome::Published("deploy".into()));
        assert_eq!(fi.debouncer.pending(), None);
        fi.on_input("deploy -main", t0);
        assert_eq!(fi.escape(), InputOutcome::Published(String::new()));
        assert_eq!(fi.text(), "");
        assert_eq!(ch.current_value(), "");
        assert_eq!(fi.tick(t0 + DELAY), InputOutcome::Nothing);
    }

    #[test]
    fn label_filters_can_be_removed() {
        let (_ch, fi) = input();
        let mut fi = fi.with_label_filters(LabelFilterSet::from_selector("env=prod,team=a"));
        assert_eq!(fi.remove_label_filter(&LabelPair::new("env", "prod")), InputOutcome::LabelFilters("team=a".into()));
        assert_eq!(fi.remove_label_filter(&LabelPair::new("env", "prod")), InputOutcome::Nothing);
        assert_eq!(fi.clear_label_filters(), InputOutcome::LabelFilters(String::new()));
        assert_eq!(fi.clear_label_filters(), InputOutcome::Nothing);
    }
}
