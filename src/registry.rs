//! The server registry (C7): reconciles desired configuration against
//! live sessions, and the append-only event log.
//!
//! Grounded on the config-diff procedure in `SPEC_FULL.md` §4.7 (itself
//! distilled from `ttapi.py`'s server-add/server-remove command
//! handling) and, for the log file's gzip-or-plain append choice, on
//! the teacher's buffered-writer conventions in `transport.rs`.

use std::collections::HashMap;

use crate::config::ServerConfig;

/// What the registry's owner should do to bring one server in line with
/// its desired configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconcile {
    /// No longer desired: disconnect and drop.
    Remove,
    /// Host/port/encryption changed: tear down and reconnect from
    /// scratch.
    Rebuild { auto_login: bool },
    /// Only login parameters changed: log out, then log back in with
    /// the new parameters if auto-login is desired.
    Relogin { auto_login: bool },
    /// Only mutable flags (silent/hidden/autoLogin/triggers) changed;
    /// apply in place.
    UpdateFlags,
    /// Newly desired: construct and optionally auto-login.
    Add { auto_login: bool },
    /// Nothing changed.
    Unchanged,
}

/// Diff `desired` against `current`, one [`Reconcile`] action per
/// shortname. Keys present only in `current` are reported as
/// [`Reconcile::Remove`]; keys present only in `desired` as
/// [`Reconcile::Add`].
pub fn reconcile(
    current: &HashMap<String, ServerConfig>,
    desired: &HashMap<String, ServerConfig>,
) -> HashMap<String, Reconcile> {
    let mut plan = HashMap::new();

    for (shortname, old) in current {
        match desired.get(shortname) {
            None => {
                plan.insert(shortname.clone(), Reconcile::Remove);
            }
            Some(new) => {
                let action = if old.identity_changed(new) {
                    Reconcile::Rebuild {
                        auto_login: new.auto_login > 0,
                    }
                } else if old.login_parms_changed(new) {
                    Reconcile::Relogin {
                        auto_login: new.auto_login > 0,
                    }
                } else if old.flags_changed(new) {
                    Reconcile::UpdateFlags
                } else {
                    Reconcile::Unchanged
                };
                plan.insert(shortname.clone(), action);
            }
        }
    }

    for (shortname, new) in desired {
        if !current.contains_key(shortname) {
            plan.insert(
                shortname.clone(),
                Reconcile::Add {
                    auto_login: new.auto_login > 0,
                },
            );
        }
    }

    plan
}

#[cfg(feature = "tokio")]
pub use log::EventLog;

#[cfg(feature = "tokio")]
mod log {
    use std::io::{BufRead, BufReader as SyncBufReader, Read, Write};
    use std::path::{Path, PathBuf};

    use chrono::{DateTime, Utc};
    use flate2::read::GzDecoder;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tokio::sync::Mutex;

    /// Append-only log of every raw line received from every server,
    /// formatted as a timestamp line followed by an indented
    /// `shortname: payload` line. Backed by either a plain-text file or
    /// a gzip-compressed one, chosen by what already exists on disk.
    pub struct EventLog {
        path: PathBuf,
        gzip: bool,
        buffer: Mutex<Vec<u8>>,
    }

    impl EventLog {
        /// Open (or create) the log at `base` (`<base>.log` or
        /// `<base>.log.gz`). If a `.log.gz` file exists, it is sanity
        /// checked by decompressing it fully before appending continues.
        pub fn open(base: &Path) -> std::io::Result<Self> {
            let plain = base.with_extension("log");
            let gz = plain.with_extension("log.gz");

            if plain.exists() {
                return Ok(EventLog {
                    path: plain,
                    gzip: false,
                    buffer: Mutex::new(Vec::new()),
                });
            }

            if gz.exists() {
                let mut decoder = GzDecoder::new(std::fs::File::open(&gz)?);
                let mut sink = Vec::new();
                decoder.read_to_end(&mut sink)?;
                return Ok(EventLog {
                    path: gz,
                    gzip: true,
                    buffer: Mutex::new(Vec::new()),
                });
            }

            Ok(EventLog {
                path: gz,
                gzip: true,
                buffer: Mutex::new(Vec::new()),
            })
        }

        /// Queue one entry for the next flush.
        pub async fn record(&self, shortname: &str, raw_line: &str, when: DateTime<Utc>) {
            let entry = format!("{}\n  {}: {}\n", when.to_rfc2822(), shortname, raw_line);
            self.buffer.lock().await.extend_from_slice(entry.as_bytes());
        }

        /// Append whatever is queued to the log file. Intended to run on
        /// a 5 s interval.
        pub async fn flush(&self) -> std::io::Result<()> {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(());
            }
            let pending = std::mem::take(&mut *buffer);
            drop(buffer);

            let path = self.path.clone();
            let gzip = self.gzip;
            tokio::task::spawn_blocking(move || append_to_disk(&path, gzip, &pending))
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
            Ok(())
        }
    }

    fn append_to_disk(path: &Path, gzip: bool, pending: &[u8]) -> std::io::Result<()> {
        if !gzip {
            let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            return file.write_all(pending);
        }

        // gzip has no native append; decompress what exists, append, and
        // rewrite the whole stream.
        let mut existing = Vec::new();
        if path.exists() {
            let file = std::fs::File::open(path)?;
            let mut decoder = GzDecoder::new(SyncBufReader::new(file));
            decoder.read_to_end(&mut existing)?;
        }
        existing.extend_from_slice(pending);

        let file = std::fs::File::create(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&existing)?;
        encoder.finish()?;
        Ok(())
    }

    #[allow(dead_code)]
    fn read_lines(path: &Path) -> std::io::Result<Vec<String>> {
        let file = std::fs::File::open(path)?;
        SyncBufReader::new(file).lines().collect()
    }
}
