//! The server session (C4): login state machine, event dispatch, model
//! bookkeeping, and the request correlator, for one connected server.
//!
//! The session itself is sans-IO, in the style of the teacher's
//! `state::HandshakeMachine`: [`ServerSession::accept_line`] consumes one
//! parsed inbound frame and returns a [`Dispatched`] result describing
//! what happened and what the caller (owning the actual socket) should
//! do about it. Grounded throughout on `ttapi.py`'s `TeamTalkServer`
//! class.

pub mod events;
pub mod message;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::attrdict::AttrDict;
use crate::correlator::Correlator;
use crate::parmline::{Parm, ParmLine};

pub use events::Dispatched;

/// Login state, matching the transition table in `SPEC_FULL.md` §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Connected,
    LoggingIn,
    LoginError,
    LoggingOut,
    LoggedIn,
}

/// A command the owner of a [`ServerSession`] should carry out after a
/// dispatch call.
#[derive(Debug, Clone)]
pub enum Action {
    /// Send this frame to the server.
    Send(ParmLine),
    /// Schedule a reconnect attempt after the standard 5 s delay.
    ScheduleReconnect,
    /// Tear the connection down; no further auto-reconnect.
    Terminate,
}

/// One connected (or connecting) server's live state.
pub struct ServerSession {
    pub shortname: String,
    pub state: State,
    pub is_v5: bool,
    pub info: AttrDict,
    pub me: AttrDict,
    pub channels: HashMap<String, AttrDict>,
    pub users: HashMap<String, AttrDict>,
    pub files: HashMap<String, AttrDict>,
    pub temporary_users: HashSet<String>,
    pub last_error: Option<String>,
    pub correlator: Correlator,
    /// 0 = off, 1 = on, 2 = on and overrides kick-suppression.
    pub auto_login: u8,
    /// Set once a manual (user-initiated) disconnect/logout suppresses
    /// auto-reconnect until the next explicit login.
    pub manual_cm: bool,
    /// A `join` frame queued by [`ServerSession::login`] to send once
    /// login succeeds.
    pub(crate) pending_join: Option<ParmLine>,
}

impl ServerSession {
    pub fn new(shortname: impl Into<String>) -> Self {
        ServerSession {
            shortname: shortname.into(),
            state: State::Disconnected,
            is_v5: true,
            info: AttrDict::new(),
            me: AttrDict::new(),
            channels: HashMap::new(),
            users: HashMap::new(),
            files: HashMap::new(),
            temporary_users: HashSet::new(),
            last_error: None,
            correlator: Correlator::new(),
            auto_login: 0,
            manual_cm: false,
            pending_join: None,
        }
    }

    /// Build the `login` frame per the login procedure: strip
    /// channel-join parameters (kept for the post-login join), force
    /// `clientname`/`version`, default `udpport`/`nickname`.
    pub fn login(
        &mut self,
        mut login_parms: AttrDict,
        client_name: &str,
        client_version: &str,
        tcp_port: i64,
    ) -> ParmLine {
        let chanid = login_parms.remove("chanid");
        let channel = login_parms.remove("channel");
        let chanpassword = login_parms.remove("chanpassword");

        login_parms.set("clientname", client_name);
        login_parms.set("version", client_version);
        if !login_parms.contains("udpport") {
            login_parms.set("udpport", tcp_port.to_string());
        }
        if !login_parms.contains("nickname") {
            login_parms.set("nickname", "");
        }

        let mut line = ParmLine::new("login");
        for (k, v) in login_parms.iter() {
            line.set(k, crate::parmline::str_parm(v));
        }

        if chanid.is_some() || channel.is_some() {
            let mut join = ParmLine::new("join");
            if let Some(id) = chanid {
                join.set("chanid", Parm::Int(id.parse().unwrap_or(0)));
            } else if let Some(name) = channel {
                join.set("channel", crate::parmline::str_parm(name));
            }
            if let Some(pw) = chanpassword {
                join.set("chanpassword", crate::parmline::str_parm(pw));
            }
            self.pending_join = Some(join);
        }

        self.state = State::LoggingIn;
        line
    }

    /// Reject lines whose event keyword contains anything but letters
    /// and `_` — a guard against a rogue server invoking unintended
    /// method dispatch.
    pub fn is_safe_event_name(event: &str) -> bool {
        !event.is_empty() && event.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
    }

    /// Consume one inbound line: check the correlator for an in-progress
    /// response collection first, then dispatch to `event_<name>`-style
    /// handling.
    pub fn accept_line(&mut self, line: &ParmLine, now: DateTime<Utc>) -> Dispatched {
        if !Self::is_safe_event_name(&line.event) {
            return Dispatched {
                output: Some(format!("Invalid line: {}", line.to_line())),
                actions: Vec::new(),
                run_triggers: false,
                eaten: true,
                collection_done: false,
            };
        }
        match self.correlator.observe(line) {
            crate::correlator::CollectOutcome::Eat { done } => Dispatched {
                output: None,
                actions: Vec::new(),
                run_triggers: false,
                eaten: true,
                collection_done: done,
            },
            crate::correlator::CollectOutcome::Aborted => {
                let mut dispatched = events::handle_line(self, line, now);
                dispatched.collection_done = true;
                dispatched
            }
            crate::correlator::CollectOutcome::Pass => events::handle_line(self, line, now),
        }
    }

    /// Interval to wait before the next scheduled reconnect attempt.
    pub fn reconnect_delay() -> Duration {
        Duration::from_secs(5)
    }
}
