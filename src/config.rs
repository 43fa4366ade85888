//! Per-server configuration (C7's input). Loading the config file itself
//! (an INI dialect with section inheritance) is out of scope for this
//! crate; this module only defines the shape a loader hands us and the
//! identity/equality rules the registry diffs against.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One `match <trigger>.<name> = <spec>` or `action <trigger>.<name> =
/// <spec>` config line.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TriggerRule {
    pub trigger: String,
    pub name: String,
    pub spec: String,
}

/// Desired configuration for one server, as produced by a config loader.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServerConfig {
    pub shortname: String,
    pub host: String,
    pub tcpport: u16,
    pub encrypted: bool,
    pub auto_login: u8,
    pub silent: bool,
    pub hidden: bool,
    pub soundsdir: Option<String>,
    pub soundvolume: Option<u8>,
    /// Arbitrary login parameters (`username`, `password`, `nickname`,
    /// `channel`, ...), in the order given.
    pub login_parms: BTreeMap<String, String>,
    pub match_rules: Vec<TriggerRule>,
    pub action_rules: Vec<TriggerRule>,
}

impl ServerConfig {
    /// Whether `host`/`tcpport`/`encrypted` differ: a connection-identity
    /// change requires tearing the old session down and building a new
    /// one, rather than reconfiguring it in place.
    pub fn identity_changed(&self, other: &ServerConfig) -> bool {
        self.host != other.host || self.tcpport != other.tcpport || self.encrypted != other.encrypted
    }

    /// Whether only the login parameters differ (connection identity is
    /// unchanged).
    pub fn login_parms_changed(&self, other: &ServerConfig) -> bool {
        !self.identity_changed(other) && self.login_parms != other.login_parms
    }

    /// Whether only mutable display/behavior flags differ.
    pub fn flags_changed(&self, other: &ServerConfig) -> bool {
        self.silent != other.silent
            || self.hidden != other.hidden
            || self.auto_login != other.auto_login
            || self.match_rules != other.match_rules
            || self.action_rules != other.action_rules
    }
}
