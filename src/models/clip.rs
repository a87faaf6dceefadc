use std::convert::TryFrom;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    Active,
    Paused,
    Completed,
    OnHold,
    Repromoted,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Active => "active",
            ClipStatus::Paused => "paused",
            ClipStatus::Completed => "completed",
            ClipStatus::OnHold => "on_hold",
            ClipStatus::Repromoted => "repromoted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(ClipStatus::Active),
            "paused" => Some(ClipStatus::Paused),
            "completed" => Some(ClipStatus::Completed),
            "on_hold" | "on-hold" | "onhold" => Some(ClipStatus::OnHold),
            "repromoted" => Some(ClipStatus::Repromoted),
            _ => None,
        }
    }
}

/// Clip as it arrives from the queue fetch call. Numbers are signed and the
/// status is free text; `Clip::try_from` does the validating. The HTTP
/// backend decodes rows one at a time and drops the ones that do not parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRecord {
    pub clip_id: String,
    pub media_ref: String,
    #[serde(default)]
    pub title: String,
    pub target_duration_seconds: i64,
    pub reward_amount: i64,
    #[serde(default)]
    pub view_count: i64,
    #[serde(default)]
    pub target_view_count: i64,
    pub status: String,
    #[serde(default)]
    pub hold_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Read-only cached copy of a promoted clip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: String,
    pub media_ref: String,
    pub title: String,
    pub target_duration_secs: u32,
    pub reward_amount: u64,
    pub view_count: u64,
    pub target_view_count: u64,
    pub status: ClipStatus,
    pub hold_expiry: Option<DateTime<Utc>>,
    pub owner_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Clip {
    pub fn remaining_views(&self) -> u64 {
        self.target_view_count.saturating_sub(self.view_count)
    }

    /// Lifecycle check: active, or on hold with a hold that has lapsed.
    /// A hold without an expiry never lapses.
    pub fn is_promotable_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ClipStatus::Active => true,
            ClipStatus::OnHold => self.hold_expiry.map(|expiry| expiry <= now).unwrap_or(false),
            ClipStatus::Paused | ClipStatus::Completed | ClipStatus::Repromoted => false,
        }
    }

    pub fn is_owned_by(&self, viewer_id: &str) -> bool {
        self.owner_id.as_deref() == Some(viewer_id)
    }
}

impl TryFrom<ClipRecord> for Clip {
    type Error = EngineError;

    fn try_from(record: ClipRecord) -> Result<Self, Self::Error> {
        let invalid = |what: &str| EngineError::InvalidClip(format!("{}: {what}", record.clip_id));

        if record.clip_id.trim().is_empty() {
            return Err(EngineError::InvalidClip("missing clip id".into()));
        }
        if record.media_ref.trim().is_empty() {
            return Err(invalid("missing media reference"));
        }
        if record.target_duration_seconds <= 0 {
            return Err(invalid("target duration must be positive"));
        }
        if record.reward_amount <= 0 {
            return Err(invalid("reward amount must be positive"));
        }
        let target_duration_secs = u32::try_from(record.target_duration_seconds)
            .map_err(|_| invalid("target duration out of range"))?;
        let status = ClipStatus::parse(&record.status)
            .ok_or_else(|| invalid(&format!("unknown status '{}'", record.status)))?;

        Ok(Clip {
            target_duration_secs,
            reward_amount: record.reward_amount as u64,
            view_count: record.view_count.max(0) as u64,
            target_view_count: record.target_view_count.max(0) as u64,
            status,
            id: record.clip_id,
            media_ref: record.media_ref,
            title: record.title,
            hold_expiry: record.hold_expiry,
            owner_id: record.owner_id,
            created_at: record.created_at,
        })
    }
}
