//! The model diffing updater (C5): merges incoming event parameters into a
//! stored record and renders a human-readable description of what changed.
//!
//! Grounded on `ttapi.py`'s `updateParms`/`doStatus`/`doFlagBits` family.

use crate::attrdict::AttrDict;
use chrono::{DateTime, Utc};

/// Whether a record being updated is a user or a channel. The original
/// implementation infers this from whether the record happens to carry a
/// `parentid` key; per this crate's Open Question decision (see
/// `DESIGN.md`), callers state it explicitly instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    User,
    Channel,
}

/// Outcome of an [`update_parms`] call.
#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    /// Human-readable diff text, if not silent and something changed.
    pub diff: Option<String>,
    /// True if the record's channel path needs recomputing (channel
    /// records only, when `name` or `parentid` changed).
    pub channel_path_dirty: bool,
}

/// Extra knobs for [`update_parms`] beyond the record being merged into.
#[derive(Debug, Clone, Copy)]
pub struct UpdateOptions<'a> {
    pub category: Option<&'a str>,
    pub silent: bool,
    pub preserve: &'a [&'a str],
    pub kind: RecordKind,
    pub is_v5: bool,
}

/// Merge `incoming` into `record`, applying the `preserve` rule, stamping
/// `statustime` on first status change, and producing a diff unless
/// `silent`.
pub fn update_parms(
    record: &mut AttrDict,
    incoming: &AttrDict,
    opts: UpdateOptions,
    now: DateTime<Utc>,
) -> UpdateOutcome {
    let UpdateOptions {
        category,
        silent,
        preserve,
        kind,
        is_v5,
    } = opts;
    let old = record.clone();

    if !preserve.is_empty() {
        record.retain_only(preserve, incoming);
    }
    record.merge(incoming);

    let channel_path_dirty =
        kind == RecordKind::Channel && (incoming.contains("parentid") || incoming.contains("name"));

    let status_touched = incoming.contains("statusmode") || incoming.contains("statusmsg");
    if status_touched && !record.contains("statustime") {
        record.set("statustime", now.timestamp().to_string());
    }

    if silent {
        return UpdateOutcome {
            diff: None,
            channel_path_dirty,
        };
    }

    let mut keys: Vec<String> = old
        .keys()
        .chain(record.keys())
        .map(str::to_string)
        .collect();
    keys.sort();
    keys.dedup();

    let mut buf = Vec::new();
    let mut status_done = false;

    for k in &keys {
        if k == "statustime" {
            continue;
        }
        if k == "statusmode" || k == "statusmsg" {
            if old.get(k) == record.get(k) {
                continue;
            }
            if !status_done {
                if let Some(text) = format_status(&old, record, now) {
                    buf.push(text);
                }
                status_done = true;
            }
            continue;
        }
        if k == "sublocal" || k == "subpeer" {
            let v1 = old.get(k).unwrap_or("");
            let v2 = record.get(k).unwrap_or("");
            if v1 == v2 {
                continue;
            }
            if let Some(text) = subscription_diff(k, v1, v2, is_v5) {
                buf.push(text);
            }
            continue;
        }

        let (mut v1, mut v2) = (
            old.get(k).unwrap_or("").to_string(),
            record.get(k).unwrap_or("").to_string(),
        );
        if k == "udpaddr" {
            v1 = strip_udp_port(&v1);
            v2 = strip_udp_port(&v2);
        }

        if v1 == v2 || (v1.is_empty() && v2.is_empty()) {
            continue;
        }
        if !v1.is_empty() && v2.is_empty() {
            buf.push(format!("{} cleared", k));
            continue;
        }
        if v1.is_empty() && !v2.is_empty() {
            buf.push(format!("{} \"{}\"", k, v2));
            continue;
        }

        if v1.starts_with('[') && v2.starts_with('[') && v1.ends_with(']') && v2.ends_with(']') {
            let l1: Vec<&str> = v1[1..v1.len() - 1].split(',').collect();
            let l2: Vec<&str> = v2[1..v2.len() - 1].split(',').collect();
            if l1.len() == l2.len() {
                for (i, (a, b)) in l1.iter().zip(l2.iter()).enumerate() {
                    if a != b {
                        include_update(&mut buf, &format!("{}[{}]", k, i + 1), a, b);
                    }
                }
                continue;
            }
        }

        include_update(&mut buf, k, &v1, &v2);
    }

    let text = buf.join(", ");
    let diff = if text.is_empty() {
        None
    } else if let Some(cat) = category {
        Some(format!("{}: {}", cat, text))
    } else {
        Some(text)
    };

    UpdateOutcome {
        diff,
        channel_path_dirty,
    }
}

fn include_update(buf: &mut Vec<String>, name: &str, v1: &str, v2: &str) {
    if v1 == v2 {
        return;
    }
    if name == "nickname" {
        buf.push(format!("{} changed to \"{}\"", name, v2));
        return;
    }
    buf.push(format!("{} changed from \"{}\" to \"{}\"", name, v1, v2));
}

fn strip_udp_port(addr: &str) -> String {
    let stripped = match addr.rsplit_once(':') {
        Some((host, _port)) => host.to_string(),
        None => addr.to_string(),
    };
    if stripped == "[::]" || stripped == "0.0.0.0" {
        String::new()
    } else {
        stripped
    }
}

/// Recompute a channel's full `/`-joined path, given a lookup from chanid
/// to its parent record. Call after [`update_parms`] reports
/// `channel_path_dirty` for a channel record.
pub fn recompute_channel_path(
    chanid: &str,
    name_of: impl Fn(&str) -> Option<String>,
    parent_of: impl Fn(&str) -> Option<String>,
) -> String {
    let mut path = String::from("/");
    let mut current = chanid.to_string();
    while current != "0" && !current.is_empty() {
        let name = name_of(&current).unwrap_or_default();
        path = format!("/{}{}", name, path);
        current = parent_of(&current).unwrap_or_else(|| "0".to_string());
    }
    path
}

fn format_status(old: &AttrDict, new: &mut AttrDict, now: DateTime<Utc>) -> Option<String> {
    let oldstat: u32 = old.get("statusmode").and_then(|v| v.parse().ok()).unwrap_or(0);
    let newstat: u32 = new.get("statusmode").and_then(|v| v.parse().ok()).unwrap_or(0);

    let mut changes = Vec::new();
    changes.extend(do_flag_bits(oldstat, newstat, 3, Some(&["active", "idle", "question", "stat3"])));
    changes.extend(do_flag_bits(oldstat, newstat, 256, Some(&["male", "female"])));
    changes.extend(do_flag_bits(oldstat, newstat, 512, Some(&["disabled video", "enabled video"])));
    changes.extend(do_flag_bits(oldstat, newstat, 2048, Some(&["stopped streaming", "started streaming"])));
    let bits_left = 0xFFFF_FFFFu32 ^ 3 ^ 256 ^ 512 ^ 2048;
    changes.extend(do_flag_bits(oldstat, newstat, bits_left, None));

    let mut buf = changes.join(", ");

    let new_msg = new.get("statusmsg").filter(|m| !m.is_empty());
    let old_msg = old.get("statusmsg").filter(|m| !m.is_empty());
    if let Some(msg) = new_msg {
        if buf.is_empty() {
            buf = format!("message \"{}\"", msg);
        } else {
            buf = format!("{} ({})", buf, msg);
        }
    } else if buf.is_empty() && old_msg.is_some() {
        buf = "message cleared".to_string();
    }

    if buf.is_empty() {
        return None;
    }

    let prior_stamp = new.get("statustime").and_then(|v| v.parse::<i64>().ok());
    new.set("statustime", now.timestamp().to_string());

    let mut statbuf = String::new();
    if let Some(prior) = prior_stamp {
        let diff_secs = now.timestamp() - prior;
        if diff_secs != 0 {
            statbuf = format!(" after {}", secs_to_hms(diff_secs));
        }
    }

    Some(format!("status {}{}", buf, statbuf))
}

fn secs_to_hms(secs: i64) -> String {
    let secs = secs.max(0);
    let (mm, ss) = (secs / 60, secs % 60);
    let (hh, mm) = (mm / 60, mm % 60);
    format!("{:02}:{:02}:{:02}", hh, mm, ss)
}

/// Compare `bits` worth of set flags between `oldval`/`newval` and return
/// human-readable deltas. With `names.len() == collapsed_bits + 1`, the
/// field is reported as a single named value; otherwise each surviving bit
/// position is reported individually as `off<n>`/`on<n>` unless a name is
/// supplied for it.
fn do_flag_bits(oldval: u32, newval: u32, bits: u32, names: Option<&[&str]>) -> Vec<String> {
    let (bits, oldval, newval, cnt) = if bits == 0 {
        (0xFFFF_FFFF, oldval, newval, 32)
    } else {
        collect_bits(bits, oldval, newval)
    };

    if let Some(names) = names {
        if names.len() as u32 == bits + 1 {
            if (oldval & bits) != (newval & bits) {
                if let Some(name) = names.get(newval as usize) {
                    return vec![(*name).to_string()];
                }
            }
            return Vec::new();
        }
    }

    let mut changes = Vec::new();
    let mut ov = oldval;
    let mut nv = newval;
    for i in 0..cnt {
        let (off_name, on_name) = match names.and_then(|n| n.get(i as usize)) {
            Some(name) => (String::new(), (*name).to_string()),
            None => (format!("off{}", i + 1), format!("on{}", i + 1)),
        };
        let o = ov & 1;
        let n = nv & 1;
        let chosen = if n != 0 && o == 0 {
            Some(on_name)
        } else if o != 0 && n == 0 {
            Some(off_name)
        } else {
            None
        };
        if let Some(name) = chosen {
            if !name.is_empty() {
                changes.push(name);
            }
        }
        ov >>= 1;
        nv >>= 1;
    }
    changes
}

/// Compact the set bits of `bits0` down to the LSB end, carrying the
/// corresponding bits of `oldval0`/`newval0` along with them. Returns
/// `(collapsed_mask, collapsed_old, collapsed_new, bit_count)`.
fn collect_bits(mut bits0: u32, mut oldval0: u32, mut newval0: u32) -> (u32, u32, u32, u32) {
    let mut bits = 0u32;
    let mut oldval = 0u32;
    let mut newval = 0u32;
    let mut cnt = 0u32;
    let mut newbit = 1u32;
    while bits0 != 0 {
        if bits0 & 1 != 0 {
            bits |= newbit;
            if oldval0 & 1 != 0 {
                oldval |= newbit;
            }
            if newval0 & 1 != 0 {
                newval |= newbit;
            }
            newbit <<= 1;
            cnt += 1;
        }
        bits0 >>= 1;
        oldval0 >>= 1;
        newval0 >>= 1;
    }
    (bits, oldval, newval, cnt)
}

/// v5 (32-bit) subscription bit letters, lsb first: 16 subscription bits
/// followed by their 16 intercept mirrors. Bit 3 (`"0"`) is the documented
/// but unused `notUsed` slot, preserved to keep bit positions stable.
pub const V5_SUB_BITNAMES: [&str; 32] = [
    "u", "c", "b", "0", "a", "v", "d", "x", "s", "1", "2", "3", "4", "5", "6", "7", "U", "C", "B",
    "00", "A", "V", "D", "X", "S", "11", "22", "33", "44", "55", "66", "77",
];

/// v4 (16-bit) subscription bit letters, lsb first.
pub const V4_SUB_BITNAMES: [&str; 16] = [
    "u", "c", "b", "a", "v", "d", "x", "s", "U", "C", "B", "A", "V", "D", "X", "S",
];

fn subscription_diff(key: &str, old: &str, new: &str, is_v5: bool) -> Option<String> {
    let v1: u32 = if old.is_empty() { 0 } else { old.parse().unwrap_or(0) };
    let v2: u32 = if new.is_empty() { 0 } else { new.parse().unwrap_or(0) };

    let bitnames: &[&str] = if is_v5 { &V5_SUB_BITNAMES } else { &V4_SUB_BITNAMES };
    let mut mask = 1u32;
    let mut tokens = Vec::new();
    for name in bitnames {
        let b1 = v1 & mask;
        let b2 = v2 & mask;
        if b1 != b2 {
            let sign = if b2 != 0 && b1 == 0 { "+" } else { "-" };
            tokens.push(format!("{}{}", sign, name));
        }
        mask <<= 1;
    }

    let label = if key.eq_ignore_ascii_case("sublocal") {
        "local subscription changes"
    } else {
        "remote subscription changes"
    };
    Some(format!("{}: {}", label, tokens.join(" ")))
}

/// Full subscription bit names for display (not the terse diff letters),
/// per §6 of the external interface description.
pub fn sub_bit_names(is_v5: bool) -> &'static [&'static str] {
    if is_v5 {
        &[
            "user messages",
            "channel messages",
            "broadcast messages",
            "notUsed",
            "audio",
            "video",
            "desktop",
            "desktopAccess",
            "stream",
        ]
    } else {
        &[
            "user messages",
            "channel messages",
            "broadcast messages",
            "audio",
            "video",
            "desktop",
            "desktopAccess",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn upd(record: &mut AttrDict, incoming: &AttrDict, silent: bool, kind: RecordKind, now: DateTime<Utc>) -> UpdateOutcome {
        update_parms(
            record,
            incoming,
            UpdateOptions {
                category: None,
                silent,
                preserve: &[],
                kind,
                is_v5: true,
            },
            now,
        )
    }

    #[test]
    fn merges_and_diffs_nickname() {
        let mut record = AttrDict::new();
        record.set("nickname", "bob");
        let mut incoming = AttrDict::new();
        incoming.set("nickname", "bobby");
        let outcome = update_parms(
            &mut record,
            &incoming,
            UpdateOptions {
                category: Some("user"),
                silent: false,
                preserve: &[],
                kind: RecordKind::User,
                is_v5: true,
            },
            at(0),
        );
        assert_eq!(record.get("nickname"), Some("bobby"));
        assert_eq!(outcome.diff.as_deref(), Some("user: nickname changed to \"bobby\""));
    }

    #[test]
    fn silent_suppresses_diff() {
        let mut record = AttrDict::new();
        let incoming = AttrDict::new();
        let outcome = upd(&mut record, &incoming, true, RecordKind::User, at(0));
        assert!(outcome.diff.is_none());
    }

    #[test]
    fn status_diff_literal_scenario() {
        // Scenario 4 from the testable-properties scenarios.
        let mut record = AttrDict::new();
        record.set("statusmode", "0");
        let mut incoming = AttrDict::new();
        incoming.set("statusmode", "2");
        incoming.set("statusmsg", "brb");
        let outcome = upd(&mut record, &incoming, false, RecordKind::User, at(0));
        assert_eq!(outcome.diff.as_deref(), Some("status question (brb)"));

        let mut incoming2 = AttrDict::new();
        incoming2.set("statusmode", "0");
        incoming2.set("statusmsg", "");
        let outcome2 = upd(&mut record, &incoming2, false, RecordKind::User, at(70));
        // The mode change to "active" already makes buf non-empty, so the
        // cleared-message wording is only used when nothing else changed.
        assert_eq!(outcome2.diff.as_deref(), Some("status active after 00:01:10"));
    }

    #[test]
    fn subscription_diff_symmetry() {
        let mut a = AttrDict::new();
        a.set("sublocal", "5");
        let mut b = AttrDict::new();
        b.set("sublocal", "3");
        let forward = upd(&mut a.clone(), &b, false, RecordKind::User, at(0)).diff.unwrap();
        let backward = upd(&mut b.clone(), &a, false, RecordKind::User, at(0)).diff.unwrap();
        let flip = |s: &str| -> Vec<String> {
            s.split(": ")
                .nth(1)
                .unwrap()
                .split(' ')
                .map(|tok| {
                    if let Some(rest) = tok.strip_prefix('+') {
                        format!("-{}", rest)
                    } else if let Some(rest) = tok.strip_prefix('-') {
                        format!("+{}", rest)
                    } else {
                        tok.to_string()
                    }
                })
                .collect()
        };
        let mut f: Vec<String> = flip(&forward);
        let mut b_tokens: Vec<String> = backward
            .split(": ")
            .nth(1)
            .unwrap()
            .split(' ')
            .map(str::to_string)
            .collect();
        f.sort();
        b_tokens.sort();
        assert_eq!(f, b_tokens);
    }

    #[test]
    fn udpaddr_port_is_ignored() {
        let mut record = AttrDict::new();
        record.set("udpaddr", "1.2.3.4:1000");
        let mut incoming = AttrDict::new();
        incoming.set("udpaddr", "1.2.3.4:2000");
        let outcome = upd(&mut record, &incoming, false, RecordKind::User, at(0));
        assert!(outcome.diff.is_none());
    }

    #[test]
    fn list_values_diff_element_wise() {
        let mut record = AttrDict::new();
        record.set("members", "[1,2,3]");
        let mut incoming = AttrDict::new();
        incoming.set("members", "[1,5,3]");
        let outcome = upd(&mut record, &incoming, false, RecordKind::User, at(0));
        assert_eq!(
            outcome.diff.as_deref(),
            Some("members[2] changed from \"2\" to \"5\"")
        );
    }

    #[test]
    fn channel_path_dirty_flag() {
        let mut record = AttrDict::new();
        record.set("name", "Lobby");
        record.set("parentid", "0");
        let mut incoming = AttrDict::new();
        incoming.set("parentid", "3");
        let outcome = upd(&mut record, &incoming, true, RecordKind::Channel, at(0));
        assert!(outcome.channel_path_dirty);
    }

    #[test]
    fn path_recomputation() {
        use std::collections::HashMap;
        let mut names = HashMap::new();
        names.insert("2".to_string(), "Sub".to_string());
        names.insert("1".to_string(), "Lobby".to_string());
        let mut parents = HashMap::new();
        parents.insert("2".to_string(), "1".to_string());
        parents.insert("1".to_string(), "0".to_string());
        let path = recompute_channel_path(
            "2",
            |id| names.get(id).cloned(),
            |id| parents.get(id).cloned(),
        );
        assert_eq!(path, "/Lobby/Sub/");
    }
}
