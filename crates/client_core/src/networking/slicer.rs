use std::time::Duration;

use tokio::time::Instant;

struct Run<T> {
    tag: String,
    items: Vec<T>,
}

/// Coalesces bursts of same-tagged bundles into batches.
///
/// The window is a sequence of runs; a bundle with a different tag seals the
/// open run. On every short tick each sealed run is emitted as one batch and
/// the open run follows unless it grew since the previous tick. The prolonged
/// deadline, counted from the first bundle of the window, flushes whatever is
/// left. The slicer owns no timers: the owner sleeps until `next_deadline`
/// and calls `fire`.
pub struct Slicer<T> {
    default_interval: Duration,
    prolonged_interval: Duration,
    runs: Vec<Run<T>>,
    open_run_grew: bool,
    next_tick: Option<Instant>,
    prolonged_at: Option<Instant>,
}

impl<T> Slicer<T> {
    pub fn new(default_interval: Duration, prolonged_interval: Duration) -> Self {
        Self {
            default_interval,
            prolonged_interval,
            runs: Vec::new(),
            open_run_grew: false,
            next_tick: None,
            prolonged_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.runs.iter().map(|run| run.items.len()).sum()
    }

    pub fn take(&mut self, tag: &str, item: T, now: Instant) {
        if self.runs.is_empty() {
            self.next_tick = Some(now + self.default_interval);
            self.prolonged_at = Some(now + self.prolonged_interval);
        }
        match self.runs.last_mut() {
            Some(run) if run.tag == tag => run.items.push(item),
            _ => self.runs.push(Run {
                tag: tag.to_owned(),
                items: vec![item],
            }),
        }
        self.open_run_grew = true;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.next_tick, self.prolonged_at) {
            (Some(tick), Some(prolonged)) => Some(tick.min(prolonged)),
            (tick, prolonged) => tick.or(prolonged),
        }
    }

    pub fn fire(&mut self, now: Instant) -> Vec<Vec<T>> {
        if self.prolonged_at.is_some_and(|at| at <= now) {
            return self.flush();
        }
        if !self.next_tick.is_some_and(|at| at <= now) {
            return Vec::new();
        }

        let open = if self.open_run_grew {
            self.runs.pop()
        } else {
            None
        };
        let batches: Vec<Vec<T>> = self.runs.drain(..).map(|run| run.items).collect();
        self.runs.extend(open);
        self.open_run_grew = false;

        if self.runs.is_empty() {
            self.reset_timers();
        } else {
            self.next_tick = Some(now + self.default_interval);
        }
        batches
    }

    pub fn flush(&mut self) -> Vec<Vec<T>> {
        self.reset_timers();
        self.open_run_grew = false;
        self.runs.drain(..).map(|run| run.items).collect()
    }

    fn reset_timers(&mut self) {
        self.next_tick = None;
        self.prolonged_at = None;
    }
}

#[cfg(test)]
#[path = "../tests/slicer_tests.rs"]
mod tests;
