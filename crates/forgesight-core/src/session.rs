//! Per-run progress sessions for multi-client transports.
//!
//! A transport opens a session when a run is submitted, hands the emitter to
//! the pipeline, and lets the client attach to the stream under the same run
//! id. Exactly one listener may consume a given run's events; a run whose
//! stream is never attached (or attached late) simply loses those events.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::progress::{progress_channel, ChannelEmitter, ProgressStream};

struct Session {
    stream: Option<ProgressStream>,
}

/// Run-id-keyed registry of live progress channels.
///
/// Interior mutability so a transport can share it behind an `Arc`.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the progress channel for a run, returning its emitter.
    ///
    /// An existing session under the same id is replaced; its unattached
    /// stream is dropped with it.
    pub fn open(&self, run_id: &str) -> ChannelEmitter {
        let (emitter, stream) = progress_channel();
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(
            run_id.to_string(),
            Session {
                stream: Some(stream),
            },
        );
        emitter
    }

    /// Take the stream for a run.
    ///
    /// At most one listener: the second and later calls return `None`, as
    /// does an unknown run id.
    pub fn attach(&self, run_id: &str) -> Option<ProgressStream> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.get_mut(run_id).and_then(|s| s.stream.take())
    }

    /// Remove a run's session once its stream has terminated.
    ///
    /// An unattached stream is dropped with the entry, so later emits for
    /// that run are silently discarded.
    pub fn close(&self, run_id: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.remove(run_id).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
