//! Message formatting and display-name derivation (part of C4).
//!
//! Grounded on `ttapi.py`'s `nonEmptyNickname`/`channelname` and the
//! `event_messagedeliver` formatting rules.

use crate::attrdict::AttrDict;

/// Render a chat/typing message per its `type` field.
///
/// `src`/`dst` are already-derived display names (see
/// [`non_empty_nickname`]); `channel` is the destination channel's
/// display path for type-2 intercepts.
pub fn format_message(
    msg_type: i64,
    content: &str,
    src: &str,
    dst: Option<&str>,
    channel: Option<&str>,
    is_to_me: bool,
) -> String {
    let content = content.replace("\\r\\n", "\r\n");
    match msg_type {
        1 if is_to_me => format!("User message from {}:\n{}", src, content),
        1 => format!(
            "User message from {} to {}:\n{}",
            src,
            dst.unwrap_or(""),
            content
        ),
        2 if is_to_me => format!("Channel message from {}:\n{}", src, content),
        2 => format!(
            "Channel message from {} to {}:\n{}",
            src,
            channel.unwrap_or(""),
            content
        ),
        3 => format!("*** Broadcast message from {}:\n{}", src, content),
        4 if is_to_me => format!("User {} {}", src, content.replace("\r\n", " ")),
        4 => format!(
            "User {} {} to {}",
            src,
            content.replace("\r\n", " "),
            dst.unwrap_or("")
        ),
        _ => format!("unrecognized message type {}: {}", msg_type, content),
    }
}

/// A displayable name for a user record, with the level of detail the
/// original `nonEmptyNickname` supports.
pub fn non_empty_nickname(
    user: Option<&AttrDict>,
    userid: &str,
    force_details: bool,
    include_user_type: bool,
    shorten_facebook: bool,
    server_version: Option<&str>,
) -> String {
    let Some(user) = user else {
        return format!("<userid {}>", userid);
    };

    let nickname = user.get("nickname").filter(|n| !n.is_empty());
    let mut username = user.get("username").map(str::to_string);

    if shorten_facebook {
        if let (Some(sver), Some(uver)) = (server_version, user.get("version")) {
            if version_at_least(sver, "5.3") && version_at_least(uver, "5.3") {
                if let Some(u) = &username {
                    if let Some(rest) = facebook_suffix(u) {
                        username = Some(format!("Facebook{}", rest));
                    }
                }
            }
        }
    }

    let mut force_details = force_details;
    let mut id_included = false;
    let mut name = if let Some(nick) = nickname {
        let mut n = format!("\"{}\"", nick);
        if let Some(u) = &username {
            n = format!("{} ({})", n, u);
        }
        n
    } else if let Some(u) = &username {
        format!("({})", u)
    } else {
        force_details = true;
        id_included = true;
        format!("<nameless user {}>", userid)
    };

    if include_user_type {
        let utype = match user.get("usertype") {
            Some("1") => "User".to_string(),
            Some("2") => "Admin".to_string(),
            Some(other) => format!("UserType{}", other),
            None => "UserType".to_string(),
        };
        name = format!("{} {}", utype, name);
    }

    if !force_details {
        return name;
    }

    let mut ip = user.get("ipaddr").map(str::to_string);
    if ip.as_deref().map_or(true, |v| v.starts_with("0.0.0.0") || v.is_empty()) {
        ip = user.get("udpaddr").map(str::to_string);
        if ip.as_deref().map_or(true, |v| v.starts_with("0.0.0.0") || v.is_empty()) {
            ip = None;
        } else if let Some(addr) = &ip {
            ip = Some(format!("UDP {}", addr.rsplit_once(':').map_or(addr.as_str(), |(h, _)| h)));
        }
    }
    if let Some(addr) = ip {
        name = format!("{} from {}", name, addr);
    }
    if !id_included {
        name = format!("{} (userid {})", name, userid);
    }
    name
}

/// Numeric-ish version compare (`"5.10" >= "5.3"`), fixing the
/// original's lexicographic string comparison (see `DESIGN.md`).
fn version_at_least(version: &str, floor: &str) -> bool {
    parse_version(version) >= parse_version(floor)
}

fn parse_version(v: &str) -> (u32, u32) {
    let mut parts = v.splitn(2, '.');
    let major = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    (major, minor)
}

fn facebook_suffix(username: &str) -> Option<String> {
    let digits_end = username.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let rest = &username[digits_end..];
    rest.strip_prefix("@facebook.com").map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_user_message_to_me() {
        let out = format_message(1, "hi", "\"bob\"", None, None, true);
        assert_eq!(out, "User message from \"bob\":\nhi");
    }

    #[test]
    fn formats_channel_message_intercept() {
        let out = format_message(2, "hi", "\"bob\"", None, Some("Lobby"), false);
        assert_eq!(out, "Channel message from \"bob\" to Lobby:\nhi");
    }

    #[test]
    fn decodes_literal_crlf() {
        let out = format_message(3, r"line1\r\nline2", "\"bob\"", None, None, false);
        assert_eq!(out, "*** Broadcast message from \"bob\":\nline1\r\nline2");
    }

    #[test]
    fn nickname_with_username() {
        let mut user = AttrDict::new();
        user.set("nickname", "bob");
        user.set("username", "bobby");
        let name = non_empty_nickname(Some(&user), "7", false, false, false, None);
        assert_eq!(name, "\"bob\" (bobby)");
    }

    #[test]
    fn nameless_user_forces_details() {
        let mut user = AttrDict::new();
        user.set("ipaddr", "1.2.3.4");
        let name = non_empty_nickname(Some(&user), "9", false, false, false, None);
        assert_eq!(name, "<nameless user 9> from 1.2.3.4");
    }

    #[test]
    fn facebook_shortened_only_when_both_versions_current() {
        let mut user = AttrDict::new();
        user.set("nickname", "bob");
        user.set("username", "12345@facebook.com");
        user.set("version", "5.3");
        let shortened = non_empty_nickname(Some(&user), "1", false, false, true, Some("5.3"));
        assert_eq!(shortened, "\"bob\" (Facebook)");

        let mut old_server_user = user.clone();
        old_server_user.set("version", "5.3");
        let not_shortened = non_empty_nickname(Some(&old_server_user), "1", false, false, true, Some("4.5"));
        assert_eq!(not_shortened, "\"bob\" (12345@facebook.com)");
    }

    #[test]
    fn numeric_version_compare_fixes_lexicographic_bug() {
        // "5.10" < "5.3" lexicographically, but numerically 5.10 > 5.3.
        assert!(version_at_least("5.10", "5.3"));
    }
}
