//! The request correlator (C8): ties an outgoing command's `id=N` to the
//! `begin`/`end` block (or bare line) that answers it over the otherwise
//! unordered async event stream.
//!
//! Grounded on `ttapi.py`'s `sendWithWait`/`_handleCollection`/
//! `_startCollecting`/`_stopCollecting`. Pure state, no I/O: the actual
//! waiting (a timeout future) is the caller's concern, typically backed
//! by a `tokio::sync::oneshot` signalled when [`Correlator::observe`]
//! reports the wait as done.

use crate::parmline::{Parm, ParmLine};

/// Whether a collecting wait is idle, has sent its request and is
/// waiting for the opening `begin id=N`, or is actively swallowing lines
/// until the matching `end id=N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectState {
    Idle,
    PendingBegin,
    Collecting,
}

/// Result of observing one inbound line against the outstanding wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Unrelated to any in-flight collection; dispatch this line as a
    /// normal event.
    Pass,
    /// Part of the response block (or the block markers themselves);
    /// swallow it silently. `done` is set on the line that completes the
    /// wait.
    Eat { done: bool },
    /// A connect/disconnect interrupted an in-progress collection. The
    /// wait is now satisfied (with whatever was collected so far), but
    /// the line itself should still dispatch normally.
    Aborted,
}

/// Allocates correlation ids and tracks at most one outstanding
/// request/response wait at a time, matching the original single-thread,
/// single-outstanding-command design.
#[derive(Debug, Clone)]
pub struct Correlator {
    cur_id: u8,
    max_id: u8,
    wait_id: u8,
    collecting: CollectState,
    collected: Vec<ParmLine>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Correlator {
            cur_id: 0,
            max_id: 127,
            wait_id: 0,
            collecting: CollectState::Idle,
            collected: Vec::new(),
        }
    }

    /// Allocate the next correlation id, cycling through `1..=max_id`
    /// (0 is reserved for "no wait outstanding").
    pub fn next_id(&mut self) -> u8 {
        self.cur_id += 1;
        if self.cur_id > self.max_id {
            self.cur_id = 1;
        }
        self.cur_id
    }

    /// The id currently being waited on, or 0 if none.
    pub fn wait_id(&self) -> u8 {
        self.wait_id
    }

    /// Begin a plain wait: no output collection, just waiting for the
    /// matching `begin`/`end` block to pass through so the caller can be
    /// woken.
    pub fn start_wait(&mut self, id: u8) {
        self.wait_id = id;
        self.collecting = CollectState::Idle;
    }

    /// Begin a wait that also collects every line between the matching
    /// `begin id=N` and `end id=N` for return to the caller.
    pub fn start_collecting(&mut self, id: u8) {
        self.wait_id = id;
        self.collected.clear();
        self.collecting = CollectState::PendingBegin;
    }

    /// Stop collecting and return whatever was gathered, resetting state.
    pub fn stop_collecting(&mut self) -> Vec<ParmLine> {
        self.collecting = CollectState::Idle;
        std::mem::take(&mut self.collected)
    }

    /// For a plain (non-collecting) wait: check whether `line` is the
    /// `begin`/`end` marker for the outstanding id, and if it's the
    /// closing `end`, clear the wait. Returns `true` if it matched.
    /// Callers still dispatch `event_begin`/`event_end` normally; this
    /// only tracks whether the wait is now satisfied.
    pub fn observe_plain_marker(&mut self, line: &ParmLine) -> bool {
        if self.wait_id == 0 || self.collecting != CollectState::Idle {
            return false;
        }
        if !matches!(line.event.as_str(), "begin" | "end") || !id_matches(line, self.wait_id) {
            return false;
        }
        if line.event == "end" {
            self.wait_id = 0;
        }
        true
    }

    /// Mirrors `_handleCollection`: called for every inbound line before
    /// event dispatch, whenever a collecting wait may be in progress.
    pub fn observe(&mut self, line: &ParmLine) -> CollectOutcome {
        let is_boundary = line.event == "_connected_" || line.event == "_disconnected_";
        match self.collecting {
            CollectState::Idle => CollectOutcome::Pass,
            CollectState::PendingBegin => {
                if line.event == "begin" && id_matches(line, self.wait_id) {
                    self.collecting = CollectState::Collecting;
                    return CollectOutcome::Eat { done: false };
                }
                if is_boundary {
                    self.collecting = CollectState::Idle;
                    self.wait_id = 0;
                    return CollectOutcome::Aborted;
                }
                CollectOutcome::Pass
            }
            CollectState::Collecting => {
                if is_boundary {
                    self.collecting = CollectState::Idle;
                    self.wait_id = 0;
                    return CollectOutcome::Aborted;
                }
                if line.event == "end" && id_matches(line, self.wait_id) {
                    self.collecting = CollectState::Idle;
                    self.wait_id = 0;
                    return CollectOutcome::Eat { done: true };
                }
                self.collected.push(line.clone());
                CollectOutcome::Eat { done: false }
            }
        }
    }
}

fn id_matches(line: &ParmLine, wait_id: u8) -> bool {
    match line.get("id") {
        Some(Parm::Int(n)) => *n == wait_id as i64,
        Some(Parm::Str(s)) => s.raw == wait_id.to_string(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_cycles_and_skips_zero() {
        let mut c = Correlator::new();
        assert_eq!(c.next_id(), 1);
        c.cur_id = 127;
        assert_eq!(c.next_id(), 1);
    }

    #[test]
    fn collecting_begin_to_end() {
        let mut c = Correlator::new();
        c.start_collecting(5);
        let begin = ParmLine::parse("begin id=5").unwrap();
        assert_eq!(c.observe(&begin), CollectOutcome::Eat { done: false });

        let mid = ParmLine::parse("adduser userid=1").unwrap();
        assert_eq!(c.observe(&mid), CollectOutcome::Eat { done: false });

        let end = ParmLine::parse("end id=5").unwrap();
        assert_eq!(c.observe(&end), CollectOutcome::Eat { done: true });

        let collected = c.stop_collecting();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].event, "adduser");
    }

    #[test]
    fn unrelated_begin_block_passes_through_while_pending() {
        let mut c = Correlator::new();
        c.start_collecting(5);
        let other_begin = ParmLine::parse("begin id=9").unwrap();
        assert_eq!(c.observe(&other_begin), CollectOutcome::Pass);
    }

    #[test]
    fn disconnect_aborts_in_progress_collection() {
        let mut c = Correlator::new();
        c.start_collecting(5);
        let begin = ParmLine::parse("begin id=5").unwrap();
        c.observe(&begin);
        let disc = ParmLine::parse("_disconnected_").unwrap();
        assert_eq!(c.observe(&disc), CollectOutcome::Aborted);
        assert_eq!(c.wait_id(), 0);
    }

    #[test]
    fn plain_wait_marker_matching() {
        let mut c = Correlator::new();
        c.start_wait(5);
        let begin = ParmLine::parse("begin id=5").unwrap();
        assert!(c.observe_plain_marker(&begin));
        assert_eq!(c.wait_id(), 5);
        let end = ParmLine::parse("end id=5").unwrap();
        assert!(c.observe_plain_marker(&end));
        assert_eq!(c.wait_id(), 0);
    }
}
