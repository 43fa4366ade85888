//! Event dispatch table (part of C4): one `handle_line` call per inbound
//! frame, translating `event_<name>` bodies from `ttapi.py` into a single
//! match over [`ParmLine::event`].

use chrono::{DateTime, Utc};

use crate::attrdict::AttrDict;
use crate::model::{self, RecordKind, UpdateOutcome};
use crate::parmline::{parm_to_text, ParmLine};
use crate::session::message::{format_message, non_empty_nickname};
use crate::session::{Action, ServerSession, State};

/// Output of dispatching one inbound line.
#[derive(Debug, Clone, Default)]
pub struct Dispatched {
    /// Text to show the user, if this event produces user-visible output.
    pub output: Option<String>,
    /// Commands the caller should carry out (send a reply, schedule a
    /// reconnect, ...).
    pub actions: Vec<Action>,
    /// Whether the trigger engine should evaluate this line. False for
    /// `userbanned`/`useraccount` list rows.
    pub run_triggers: bool,
    /// Whether this line was a correlator begin/end marker that should
    /// not be shown even as a raw fallback.
    pub eaten: bool,
    /// Set on the line that completes an outstanding [`crate::correlator::Correlator`]
    /// collection (normally or via abort). The caller should retrieve the
    /// buffered lines with `Correlator::stop_collecting` and wake whatever
    /// is waiting on the correlated send.
    pub collection_done: bool,
}

impl Dispatched {
    fn output(text: impl Into<String>) -> Self {
        Dispatched {
            output: Some(text.into()),
            run_triggers: true,
            ..Default::default()
        }
    }

    fn silent() -> Self {
        Dispatched {
            run_triggers: true,
            ..Default::default()
        }
    }

    fn eaten() -> Self {
        Dispatched {
            run_triggers: false,
            eaten: true,
            ..Default::default()
        }
    }

    fn no_triggers(text: impl Into<String>) -> Self {
        Dispatched {
            output: Some(text.into()),
            run_triggers: false,
            ..Default::default()
        }
    }
}

/// Dispatch one already-parsed inbound line against the session's model.
/// Event names containing anything but letters and `_` are rejected
/// before this is called (see [`ServerSession::accept_line`]).
pub fn handle_line(session: &mut ServerSession, line: &ParmLine, now: DateTime<Utc>) -> Dispatched {
    match line.event.as_str() {
        "welcome" => {
            let outcome = update(session, None, RecordKind::User, true, &[], line, now);
            let userid = text_of(line, "userid");
            if let Some(userid) = userid {
                session.me = AttrDict::new();
                session.me.set("userid", userid);
            }
            if let Some(version) = line.get_str("version") {
                session.is_v5 = version.starts_with('5');
            }
            session.state = State::Connected;
            discard_diff(outcome);
            Dispatched::silent()
        }
        "ok" if session.state == State::LoggingIn => {
            session.state = State::LoggedIn;
            let mut actions = Vec::new();
            if let Some(join) = session.pending_join.take() {
                actions.push(Action::Send(join));
            }
            Dispatched {
                output: Some("Logged in".to_string()),
                actions,
                run_triggers: true,
                eaten: false,
                collection_done: false,
            }
        }
        "accepted" => {
            let outcome = update_record(&mut session.me, RecordKind::User, true, &[], line, session.is_v5, now);
            discard_diff(outcome);
            let mut warnings = Vec::new();
            if let Some(rights) = session.me.get("userrights").and_then(|r| r.parse::<i64>().ok()) {
                if rights & 0x1 == 0 {
                    warnings.push("Warning: Multiple logins disallowed");
                }
                if rights & 0x2 == 0 {
                    warnings.push("Warning: Unable to see channel participants");
                }
            }
            if warnings.is_empty() {
                Dispatched::silent()
            } else {
                Dispatched::output(warnings.join(", "))
            }
        }
        "serverupdate" => {
            let outcome = update(session, Some("server"), RecordKind::User, false, &[], line, now);
            emit(outcome)
        }
        "loggedin" => {
            let userid = text_of(line, "userid").unwrap_or_default();
            session.users.insert(userid.clone(), record_from(line));
            let name = non_empty_nickname(session.users.get(&userid), &userid, false, false, false, None);
            Dispatched::output(format!("{} logged in", name))
        }
        "loggedout" => {
            if let Some(userid) = text_of(line, "userid") {
                let removed = session.users.remove(&userid);
                let name = non_empty_nickname(removed.as_ref(), &userid, false, false, false, None);
                Dispatched::output(format!("{} logged out", name))
            } else {
                session.channels.clear();
                session.users.clear();
                session.temporary_users.clear();
                session.me = AttrDict::new();
                session.state = State::Connected;
                let mut actions = Vec::new();
                if session.auto_login > 0 && !session.manual_cm {
                    actions.push(Action::ScheduleReconnect);
                }
                Dispatched {
                    output: Some("Logged out".to_string()),
                    actions,
                    run_triggers: true,
                    eaten: false,
                    collection_done: false,
                }
            }
        }
        "addchannel" => {
            let chanid = text_of(line, "channelid").unwrap_or_default();
            let mut record = AttrDict::new();
            let outcome = update_record(&mut record, RecordKind::Channel, false, &[], line, session.is_v5, now);
            session.channels.insert(chanid.clone(), record);
            if outcome.channel_path_dirty {
                recompute_path(session, &chanid);
            }
            emit(outcome)
        }
        "updatechannel" => {
            let chanid = text_of(line, "channelid").unwrap_or_default();
            let mut record = session.channels.remove(&chanid).unwrap_or_default();
            let outcome = update_record(&mut record, RecordKind::Channel, false, &["parentid", "channel"], line, session.is_v5, now);
            session.channels.insert(chanid.clone(), record);
            if outcome.channel_path_dirty {
                recompute_path(session, &chanid);
            }
            emit(outcome)
        }
        "removechannel" => {
            let chanid = text_of(line, "channelid").unwrap_or_default();
            session.channels.remove(&chanid);
            Dispatched::output(format!("Channel {} removed", chanid))
        }
        "adduser" => {
            let userid = text_of(line, "userid").unwrap_or_default();
            let is_new = !session.users.contains_key(&userid);
            let mut record = session.users.remove(&userid).unwrap_or_default();
            let outcome = update_record(&mut record, RecordKind::User, true, &[], line, session.is_v5, now);
            if is_new {
                session.temporary_users.insert(userid.clone());
            }
            session.users.insert(userid, record);
            discard_diff(outcome);
            Dispatched::silent()
        }
        "removeuser" => {
            let userid = text_of(line, "userid").unwrap_or_default();
            if session.temporary_users.remove(&userid) {
                session.users.remove(&userid);
            }
            Dispatched::silent()
        }
        "updateuser" => {
            let userid = text_of(line, "userid").unwrap_or_default();
            let is_new = !session.users.contains_key(&userid);
            let mut record = session.users.remove(&userid).unwrap_or_default();
            let outcome = update_record(&mut record, RecordKind::User, false, &[], line, session.is_v5, now);
            if is_new {
                session.temporary_users.insert(userid.clone());
            }
            session.users.insert(userid, record);
            emit(outcome)
        }
        "joined" => {
            let chanid = text_of(line, "channelid");
            if let Some(c) = chanid {
                session.me.set("channelid", c);
            }
            Dispatched::silent()
        }
        "left" => {
            session.me.remove("channelid");
            Dispatched::silent()
        }
        "addfile" => {
            let fileid = text_of(line, "fileid").unwrap_or_default();
            session.files.insert(fileid, record_from(line));
            Dispatched::silent()
        }
        "removefile" => {
            let fileid = text_of(line, "fileid").unwrap_or_default();
            session.files.remove(&fileid);
            Dispatched::silent()
        }
        "messagedeliver" => {
            let msg_type = line.get_int("type").unwrap_or(0);
            let content = line.get_str("content").unwrap_or("");
            let srcid = text_of(line, "srcuserid").unwrap_or_default();
            let dstid = text_of(line, "destuserid");
            let chanid = text_of(line, "channelid");
            let my_userid = session.me.get("userid").map(str::to_string);
            let is_to_me = if msg_type == 2 {
                chanid.is_some() && chanid == session.me.get("channelid").map(str::to_string)
            } else {
                dstid.is_some() && dstid == my_userid
            };
            let src = non_empty_nickname(session.users.get(&srcid), &srcid, false, false, false, None);
            let dst = dstid
                .as_deref()
                .map(|d| non_empty_nickname(session.users.get(d), d, false, false, false, None));
            let channel = chanid.and_then(|c| {
                session
                    .channels
                    .get(&c)
                    .and_then(|rec| rec.get("channel"))
                    .map(str::to_string)
            });
            let text = format_message(msg_type, content, &src, dst.as_deref(), channel.as_deref(), is_to_me);
            Dispatched::output(text)
        }
        "kicked" => {
            if session.auto_login != 2 {
                session.manual_cm = true;
            }
            Dispatched::output("Kicked".to_string())
        }
        "stats" | "useraccount" | "userbanned" => Dispatched::no_triggers(line.to_line()),
        "error" => {
            let msg = line.get_str("error").unwrap_or("unknown error").to_string();
            session.last_error = Some(msg.clone());
            if session.state == State::LoggingIn {
                session.state = State::LoginError;
            }
            Dispatched::output(format!("Error: {}", msg))
        }
        "pong" => Dispatched::eaten(),
        "begin" | "end" => {
            if session.correlator.observe_plain_marker(line) {
                Dispatched::eaten()
            } else {
                Dispatched::silent()
            }
        }
        _ => Dispatched {
            output: Some(line.to_line()),
            run_triggers: true,
            ..Default::default()
        },
    }
}

fn update(
    session: &mut ServerSession,
    category: Option<&str>,
    kind: RecordKind,
    silent: bool,
    preserve: &[&str],
    line: &ParmLine,
    now: DateTime<Utc>,
) -> UpdateOutcome {
    let is_v5 = session.is_v5;
    let incoming = record_from(line);
    model::update_parms(
        &mut session.info,
        &incoming,
        model::UpdateOptions {
            category,
            silent,
            preserve,
            kind,
            is_v5,
        },
        now,
    )
}

fn update_record(
    record: &mut AttrDict,
    kind: RecordKind,
    silent: bool,
    preserve: &[&str],
    line: &ParmLine,
    is_v5: bool,
    now: DateTime<Utc>,
) -> UpdateOutcome {
    let incoming = record_from(line);
    model::update_parms(
        record,
        &incoming,
        model::UpdateOptions {
            category: None,
            silent,
            preserve,
            kind,
            is_v5,
        },
        now,
    )
}

/// Read a parameter's textual form regardless of its wire type. Id-style
/// parameters (`userid`, `channelid`, `fileid`, ...) travel as bare ints,
/// not quoted strings, so `ParmLine::get_str` alone would miss them.
fn text_of(line: &ParmLine, name: &str) -> Option<String> {
    line.get(name).map(parm_to_text)
}

fn record_from(line: &ParmLine) -> AttrDict {
    let mut record = AttrDict::new();
    for (k, v) in &line.parms {
        record.set(k, parm_to_text(v));
    }
    record
}

/// Recompute and store a channel's full `/`-joined path after its `name`
/// or `parentid` changed.
fn recompute_path(session: &mut ServerSession, chanid: &str) {
    let path = model::recompute_channel_path(
        chanid,
        |id| session.channels.get(id).and_then(|c| c.get("name")).map(str::to_string),
        |id| session.channels.get(id).and_then(|c| c.get("parentid")).map(str::to_string),
    );
    if let Some(record) = session.channels.get_mut(chanid) {
        record.set("channel", path);
    }
}

fn discard_diff(_outcome: UpdateOutcome) {}

fn emit(outcome: UpdateOutcome) -> Dispatched {
    match outcome.diff {
        Some(text) => Dispatched::output(text),
        None => Dispatched::silent(),
    }
}
