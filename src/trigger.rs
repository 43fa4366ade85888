//! The trigger engine (C6): regex match/action rules evaluated against
//! every inbound event.
//!
//! Grounded on `triggers.py`'s `Trigger`/`Triggers` classes. Like the rest
//! of this crate, matching and substitution are pure functions; sending
//! the resulting [`TriggerAction`]s is left to the caller.

use regex::RegexBuilder;

use crate::error::TriggerError;
use crate::parmline::{parm_to_text as parm_text, ParmLine};

/// One match clause: an event-name pattern plus per-parameter patterns.
/// All patterns are implicitly anchored (`^...$`) and case-insensitive.
#[derive(Debug, Clone)]
pub struct MatchSpec {
    pub name: String,
    pub event: String,
    pub parms: Vec<(String, String)>,
}

impl MatchSpec {
    /// Parse a match spec written the way a trigger config line is: an
    /// event pattern followed by `key=pattern` pairs, e.g.
    /// `updateuser statusmode=\d+ address=10\.0\.`.
    ///
    /// Match values are regexes and address prefixes, not typed wire
    /// values, so this splits on whitespace and the first `=` rather than
    /// running the line through [`ParmLine::parse_relaxed`]'s typed
    /// grammar — a bare `10.0.0.` must stay the literal text `10.0.0.`,
    /// not `Int(10)` plus a stray `.0.0.` keyword, and a char class like
    /// `[0-9]+` must not be mistaken for the bracketed-int-list type.
    pub fn parse(name: impl Into<String>, line: &str) -> Result<Self, TriggerError> {
        let mut tokens = line.split_whitespace();
        let event = tokens.next().ok_or_else(|| TriggerError::BadPattern {
            parm: line.to_string(),
            source_message: "empty match spec".to_string(),
        })?;
        let parms = tokens
            .map(|tok| match tok.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (tok.to_string(), String::new()),
            })
            .collect();
        Ok(MatchSpec {
            name: name.into(),
            event: event.to_string(),
            parms,
        })
    }
}

fn anchored_match(pattern: &str, value: &str) -> Result<bool, TriggerError> {
    let anchored = format!("^{}$", pattern);
    let re = RegexBuilder::new(&anchored)
        .case_insensitive(true)
        .build()
        .map_err(|e| TriggerError::BadPattern {
            parm: pattern.to_string(),
            source_message: e.to_string(),
        })?;
    Ok(re.is_match(value))
}

/// Does `addr` (an actual `...addr`-style parameter value, possibly
/// bracketed/ported) match `pattern` (a literal address or address
/// prefix)? Not a regex match: a left-anchored string comparison after
/// normalizing brackets, `::ffff:` prefixes, and trailing ports.
fn match_address(pattern: &str, addr: &str) -> bool {
    let mut addr = addr.to_string();
    if let (Some(start), Some(end)) = (addr.find('['), addr.find(']')) {
        if end > start {
            addr = addr[start + 1..end].to_string();
        }
    }
    if !pattern.starts_with(':') {
        if let Some(rest) = addr
            .to_ascii_lowercase()
            .strip_prefix("::ffff:")
            .map(|s| s.to_string())
        {
            addr = rest;
        }
    }
    if let Some(colon) = addr.rfind(':') {
        if addr[colon + 1..].chars().all(|c| c.is_ascii_digit()) && !addr[colon + 1..].is_empty() {
            addr.truncate(colon);
        }
    }
    let mut pattern = pattern.to_string();
    if pattern.split('.').count() < 4 {
        pattern.push('.');
    }
    addr.starts_with(&pattern)
}

/// An action to perform when a trigger fires, after `%(name)`
/// substitution has already been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    /// Send this parmline text directly to the server that fired the
    /// trigger, bypassing the command processor.
    Send(String),
    /// Like `Send`, but the caller should wait for the matching response
    /// before continuing (`sendWithWait`).
    SendWithWait(String),
    /// Speak this text through whatever output sink the caller uses.
    Say(String),
    /// Run this text through the command processor, as if the user typed
    /// it, scoped to the firing server.
    RunCommand(String),
}

/// One named action template, substituted and dispatched when its
/// trigger's match fires.
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub name: String,
    pub template: String,
}

/// A named set of matches and actions: if any match fires, every action
/// runs once, in order.
#[derive(Debug, Clone, Default)]
pub struct Trigger {
    pub name: String,
    matches: Vec<MatchSpec>,
    actions: Vec<ActionSpec>,
}

/// What fired, and the resulting actions, from one [`Trigger::apply`]
/// call.
#[derive(Debug, Clone)]
pub struct Fired {
    pub trigger_name: String,
    pub match_name: String,
    pub actions: Vec<TriggerAction>,
}

impl Trigger {
    pub fn new(name: impl Into<String>) -> Self {
        Trigger {
            name: name.into(),
            matches: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn add_match(&mut self, spec: MatchSpec) {
        self.matches.push(spec);
    }

    pub fn add_action(&mut self, name: impl Into<String>, template: impl Into<String>) {
        self.actions.push(ActionSpec {
            name: name.into(),
            template: template.into(),
        });
    }

    /// Check every match in order; on the first match, run all actions
    /// and stop. Matching multiple match clauses in one trigger is not
    /// cumulative: only the first hit fires.
    pub fn apply(&self, shortname: &str, line: &ParmLine) -> Result<Option<Fired>, TriggerError> {
        for spec in &self.matches {
            if is_match(spec, line)? {
                let mut actions = Vec::new();
                for action in &self.actions {
                    actions.push(resolve_action(shortname, &action.template, line)?);
                }
                return Ok(Some(Fired {
                    trigger_name: self.name.clone(),
                    match_name: spec.name.clone(),
                    actions,
                }));
            }
        }
        Ok(None)
    }
}

fn is_match(spec: &MatchSpec, line: &ParmLine) -> Result<bool, TriggerError> {
    if spec.event.eq_ignore_ascii_case("line") {
        if let Some((_, pattern)) = spec.parms.iter().find(|(k, _)| k.eq_ignore_ascii_case("match")) {
            return anchored_match(pattern, &line.to_line());
        }
    }

    if !anchored_match(&spec.event, &line.event)? {
        return Ok(false);
    }

    for (key, pattern) in &spec.parms {
        if key.eq_ignore_ascii_case("address") {
            let matched = line
                .parms
                .iter()
                .filter(|(k, _)| k.to_ascii_lowercase().ends_with("addr"))
                .any(|(_, v)| match_address(pattern, &parm_text(v)));
            if !matched {
                return Ok(false);
            }
            continue;
        }
        match line.get(key) {
            None => return Ok(false),
            Some(v) => {
                if !anchored_match(pattern, &parm_text(v))? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

/// Expand `%(name)` (and `%(!name)`, which omits the `name="..."`
/// prefix) against the firing line's parameters, then classify the
/// resulting text into a [`TriggerAction`].
fn resolve_action(shortname: &str, template: &str, line: &ParmLine) -> Result<TriggerAction, TriggerError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("%(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find(')')
            .ok_or_else(|| TriggerError::UnknownSubstitution(after.to_string()))?;
        let mut key = &after[..end];
        let exclude_name = key.starts_with('!');
        if exclude_name {
            key = &key[1..];
        }
        let value = match line.get(key) {
            Some(v) => parm_text(v),
            None => return Err(TriggerError::UnknownSubstitution(key.to_string())),
        };
        if exclude_name {
            out.push_str(&value);
        } else {
            out.push_str(&format!("{}=\"{}\"", key, value));
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    let lower = out.to_ascii_lowercase();
    if lower.starts_with("sendwithwait ") {
        let payload = out.split_once(' ').map(|x| x.1).unwrap_or("").to_string();
        return Ok(TriggerAction::SendWithWait(payload));
    }
    if lower.starts_with("send ") {
        let payload = out.split_once(' ').map(|x| x.1).unwrap_or("").to_string();
        return Ok(TriggerAction::Send(payload));
    }
    if lower.starts_with("say ") {
        let payload = out.split_once(' ').map(|x| x.1).unwrap_or("").to_string();
        return Ok(TriggerAction::Say(payload));
    }
    Ok(TriggerAction::RunCommand(format!("server {} {}", shortname, out)))
}

/// An ordered collection of named triggers, evaluated against every
/// inbound event.
#[derive(Debug, Clone, Default)]
pub struct Triggers {
    triggers: Vec<Trigger>,
}

impl Triggers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the trigger with this name.
    pub fn get_or_create(&mut self, name: &str) -> &mut Trigger {
        if let Some(idx) = self.triggers.iter().position(|t| t.name == name) {
            return &mut self.triggers[idx];
        }
        self.triggers.push(Trigger::new(name));
        self.triggers.last_mut().unwrap()
    }

    /// Evaluate every trigger against `line`, in definition order. Every
    /// trigger whose match fires contributes its own [`Fired`] entry;
    /// unlike match clauses within one trigger, triggers are independent
    /// and all of them get a chance.
    pub fn apply(&self, shortname: &str, line: &ParmLine) -> Result<Vec<Fired>, TriggerError> {
        let mut fired = Vec::new();
        for trigger in &self.triggers {
            if let Some(hit) = trigger.apply(shortname, line)? {
                fired.push(hit);
            }
        }
        Ok(fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_event_and_parm() {
        let spec = MatchSpec::parse("m1", r"updateuser statusmode=\d+").unwrap();
        let line = ParmLine::parse(r#"updateuser statusmode=2 userid=7"#).unwrap();
        assert!(is_match(&spec, &line).unwrap());
    }

    #[test]
    fn rejects_missing_parm() {
        let spec = MatchSpec::parse("m1", "updateuser channel=Lobby").unwrap();
        let line = ParmLine::parse("updateuser userid=1").unwrap();
        assert!(!is_match(&spec, &line).unwrap());
    }

    #[test]
    fn address_match_strips_brackets_and_port() {
        let spec = MatchSpec::parse("m1", "updateuser address=10.0.0").unwrap();
        let line = ParmLine::parse(r#"updateuser udpaddr="[10.0.0.5]:1234""#).unwrap();
        assert!(is_match(&spec, &line).unwrap());
    }

    #[test]
    fn substitution_and_dispatch() {
        let mut trigger = Trigger::new("greet");
        trigger.add_match(MatchSpec::parse("m1", "adduser").unwrap());
        trigger.add_action("a1", r#"send message content=%(!nickname) userid=%(userid)"#);
        let line = ParmLine::parse(r#"adduser userid=3 nickname="bob""#).unwrap();
        let fired = trigger.apply("srv1", &line).unwrap().unwrap();
        assert_eq!(fired.match_name, "m1");
        assert_eq!(
            fired.actions[0],
            TriggerAction::Send(r#"message content=bob userid=userid="3""#.to_string())
        );
    }

    #[test]
    fn unknown_substitution_errors() {
        let mut trigger = Trigger::new("t");
        trigger.add_match(MatchSpec::parse("m1", "adduser").unwrap());
        trigger.add_action("a1", "say hi %(missing)");
        let line = ParmLine::parse("adduser userid=1").unwrap();
        assert!(trigger.apply("srv1", &line).is_err());
    }

    #[test]
    fn run_command_default_dispatch() {
        let mut trigger = Trigger::new("t");
        trigger.add_match(MatchSpec::parse("m1", "kicked").unwrap());
        trigger.add_action("a1", "rejoin");
        let line = ParmLine::parse("kicked userid=1").unwrap();
        let fired = trigger.apply("srv1", &line).unwrap().unwrap();
        assert_eq!(fired.actions[0], TriggerAction::RunCommand("server srv1 rejoin".to_string()));
    }
}
