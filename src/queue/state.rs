use std::collections::HashSet;
use std::convert::TryFrom;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::models::{Clip, ClipRecord};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// What happened when the cursor moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Next(usize),
    /// Ran off the end; the list was cleared so the next fetch goes remote.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Remaining,
    /// The removed clip was the last one at or after the cursor.
    Exhausted,
    /// Nothing left at all.
    Emptied,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptReport {
    pub received: usize,
    pub invalid: usize,
    pub ineligible: usize,
    pub kept: usize,
}

/// Who is asking, and when.
#[derive(Debug, Clone, Copy)]
pub struct Eligibility<'a> {
    pub viewer_id: &'a str,
    pub now: DateTime<Utc>,
    pub window: usize,
}

/// Read-only view handed out by the manager.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub clips: Vec<Clip>,
    pub cursor: usize,
    pub cached: bool,
    pub blacklist: Vec<String>,
    pub resets: u64,
}

/// Cached eligible clips for one viewer, plus the cursor and the
/// session-scoped blacklist of media proven unplayable.
#[derive(Debug, Default)]
pub struct QueueState {
    clips: Vec<Clip>,
    cursor: usize,
    cached_at: Option<Instant>,
    hold_until: Option<Instant>,
    blacklist: HashSet<String>,
    watched: HashSet<String>,
    resets: u64,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&Clip> {
        self.clips.get(self.cursor)
    }

    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        !self.clips.is_empty()
            && self
                .cached_at
                .map(|cached_at| now.saturating_duration_since(cached_at) < ttl)
                .unwrap_or(false)
    }

    pub fn hold_until(&self) -> Option<Instant> {
        self.hold_until
    }

    /// Keep fetches away until `until`.
    pub fn hold(&mut self, until: Instant) {
        self.hold_until = Some(until);
    }

    pub fn release_hold(&mut self) {
        self.hold_until = None;
    }

    pub fn is_blacklisted(&self, media_ref: &str) -> bool {
        self.blacklist.contains(media_ref)
    }

    pub fn has_watched(&self, clip_id: &str) -> bool {
        self.watched.contains(clip_id)
    }

    pub fn mark_watched(&mut self, clip_id: &str) {
        self.watched.insert(clip_id.to_string());
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn is_eligible(&self, clip: &Clip, who: &Eligibility<'_>) -> bool {
        !clip.is_owned_by(who.viewer_id)
            && clip.is_promotable_at(who.now)
            && clip.remaining_views() > 0
            && !self.has_watched(&clip.id)
            && !self.is_blacklisted(&clip.media_ref)
    }

    /// Replace the cache with a freshly fetched list: validate, filter,
    /// order newest first, cap to the window, and rewind the cursor.
    pub fn accept(
        &mut self,
        records: Vec<ClipRecord>,
        who: &Eligibility<'_>,
        fetched_at: Instant,
    ) -> AcceptReport {
        let mut report = AcceptReport {
            received: records.len(),
            ..AcceptReport::default()
        };

        let mut clips = Vec::with_capacity(records.len());
        for record in records {
            match Clip::try_from(record) {
                Ok(clip) if self.is_eligible(&clip, who) => clips.push(clip),
                Ok(_) => report.ineligible += 1,
                Err(err) => {
                    log_warn!("dropping clip record: {err}");
                    report.invalid += 1;
                }
            }
        }

        // Stable: records without a timestamp keep the service's order.
        clips.sort_by(|a, b| match (a.created_at, b.created_at) {
            (Some(a), Some(b)) => b.cmp(&a),
            _ => std::cmp::Ordering::Equal,
        });
        clips.truncate(who.window);

        report.kept = clips.len();
        self.clips = clips;
        self.cursor = 0;
        self.cached_at = Some(fetched_at);
        report
    }

    /// Move to the next clip. Running past the end clears the list and the
    /// cache timestamp so the next fetch goes to the service.
    pub fn advance(&mut self) -> Advance {
        self.cursor += 1;
        if self.cursor < self.clips.len() {
            Advance::Next(self.cursor)
        } else {
            self.clear();
            Advance::Exhausted
        }
    }

    /// Blacklist the clip's media, splice it out, and keep the cursor on the
    /// same logical position.
    pub fn remove(&mut self, clip: &Clip) -> RemoveOutcome {
        self.blacklist.insert(clip.media_ref.clone());

        if let Some(index) = self.clips.iter().position(|c| c.id == clip.id) {
            self.clips.remove(index);
            if index < self.cursor {
                self.cursor -= 1;
            }
        }

        if self.clips.is_empty() {
            self.cursor = 0;
            self.cached_at = None;
            RemoveOutcome::Emptied
        } else if self.cursor >= self.clips.len() {
            self.clear();
            RemoveOutcome::Exhausted
        } else {
            RemoveOutcome::Remaining
        }
    }

    /// Next fetch goes remote even if the list is still populated.
    pub fn invalidate(&mut self) {
        self.cached_at = None;
    }

    /// Forget the blacklist and the cache entirely.
    pub fn reset(&mut self) {
        self.blacklist.clear();
        self.clear();
        self.hold_until = None;
        self.resets += 1;
    }

    fn clear(&mut self) {
        self.clips.clear();
        self.cursor = 0;
        self.cached_at = None;
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let mut blacklist: Vec<String> = self.blacklist.iter().cloned().collect();
        blacklist.sort();
        QueueSnapshot {
            clips: self.clips.clone(),
            cursor: self.cursor,
            cached: self.cached_at.is_some(),
            blacklist,
            resets: self.resets,
        }
    }
}
