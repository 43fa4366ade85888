//! # ttcom-proto
//!
//! A multi-server protocol engine for the TeamTalk (TT4/TT5) text
//! protocol: a line-based, UTF-8, `event key=value ...` wire format
//! spoken by TeamTalk voice/chat servers.
//!
//! This crate is sans-IO at its core: the parser, the attribute model,
//! the login state machine, the diffing updater, the trigger engine,
//! and the request correlator are all pure state-transition functions.
//! The optional `tokio` feature layers a real TCP/TLS transport and a
//! server registry with a background event log on top.
//!
//! ## Quick start
//!
//! ```rust
//! use ttcom_proto::parmline::ParmLine;
//!
//! let line = ParmLine::parse(r#"addchannel channelid=12 name="Lobby""#).unwrap();
//! assert_eq!(line.event, "addchannel");
//! assert_eq!(line.get_str("name"), Some("Lobby"));
//! ```

#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod attrdict;
pub mod config;
pub mod correlator;
pub mod error;
pub mod model;
pub mod parmline;
pub mod trigger;

#[cfg(feature = "tokio")]
pub mod registry;
#[cfg(feature = "tokio")]
pub mod session;
#[cfg(feature = "tokio")]
pub mod transport;

pub use self::attrdict::AttrDict;
pub use self::config::ServerConfig;
pub use self::correlator::{CollectOutcome, Correlator};
pub use self::error::{ParmLineParseError, TriggerError, TtcomError};
pub use self::model::{RecordKind, UpdateOptions, UpdateOutcome};
pub use self::parmline::{Parm, ParmLine};
pub use self::trigger::{Fired, Trigger, TriggerAction, Triggers};

#[cfg(feature = "tokio")]
pub use self::registry::{reconcile, Reconcile};
#[cfg(feature = "tokio")]
pub use self::session::{Action, ServerSession, State};
#[cfg(feature = "tokio")]
pub use self::transport::{Transport, TransportReadError, MAX_LINE_LEN};
