use std::time::{Duration, Instant};

use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTicket {
    generation: u64,
    scheduled: Instant,
}

/// Fixed-cadence scheduler; at most one cycle is ever in flight.
#[derive(Debug)]
pub struct Poller {
    interval: Duration,
    state: PollerState,
    generation: u64,
    in_flight: Option<CycleTicket>,
    next_due: Option<Instant>,
    completed: u64,
    skipped: u64,
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: PollerState::Idle,
            generation: 0,
            in_flight: None,
            next_due: None,
            completed: 0,
            skipped: 0,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn start(&mut self, now: Instant) {
        if self.state == PollerState::Running {
            return;
        }
        debug!("poller started");
        self.state = PollerState::Running;
        self.next_due = Some(now);
    }

    /// An in-flight cycle still completes and is applied.
    pub fn stop(&mut self) {
        if self.state == PollerState::Idle {
            return;
        }
        debug!("poller stopped");
        self.state = PollerState::Idle;
        self.next_due = None;
    }

    /// Like `stop`, but the in-flight result is discarded.
    pub fn cancel(&mut self) {
        self.stop();
        self.generation += 1;
    }

    pub fn refresh_now(&mut self, now: Instant) -> bool {
        if self.state != PollerState::Running || self.in_flight.is_some() {
            return false;
        }
        self.next_due = Some(now);
        true
    }

    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        if self.in_flight.is_some() {
            return None;
        }
        self.next_due
            .map(|due| due.saturating_duration_since(now))
    }

    pub fn poll_due(&mut self, now: Instant) -> Option<CycleTicket> {
        if self.state != PollerState::Running || self.in_flight.is_some() {
            return None;
        }
        let due = self.next_due?;
        if now < due {
            return None;
        }
        let ticket = CycleTicket {
            generation: self.generation,
            scheduled: due,
        };
        self.in_flight = Some(ticket);
        self.next_due = None;
        Some(ticket)
    }

    /// Returns whether the result should be applied.
    pub fn finish(&mut self, ticket: CycleTicket, now: Instant) -> bool {
        if self.in_flight != Some(ticket) {
            return false;
        }
        self.in_flight = None;
        self.completed += 1;
        let current = ticket.generation == self.generation;
        if self.state == PollerState::Running && self.next_due.is_none() {
            let (due, skipped) = self.next_boundary(ticket.scheduled, now);
            if skipped > 0 {
                debug!("cycle overran the interval, skipped {skipped} tick(s)");
            }
            self.skipped += skipped;
            self.next_due = Some(due);
        }
        current
    }

    // First boundary strictly after `finished`, plus how many ticks were passed over.
    fn next_boundary(&self, scheduled: Instant, finished: Instant) -> (Instant, u64) {
        let first = scheduled + self.interval;
        if finished < first || self.interval.is_zero() {
            return (first.max(finished), 0);
        }
        let behind = finished.duration_since(first);
        let ticks = behind.as_nanos() / self.interval.as_nanos() + 1;
        let due = u32::try_from(ticks)
            .ok()
            .and_then(|n| self.interval.checked_mul(n))
            .and_then(|offset| first.checked_add(offset))
            .unwrap_or(finished + self.interval);
        (due, u64::try_from(ticks).unwrap_or(u64::MAX))
    }
}
