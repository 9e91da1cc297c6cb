//! Read-time engagement aggregation and badge evaluation.
//!
//! Nothing here is materialized: counts and series are derived from the raw
//! view and like rows on every read, and badge evaluation re-checks its
//! thresholds each time it runs. Awarding is idempotent because the store
//! treats a duplicate award as success.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::Settings,
    model::{BadgeKind, Profile, ViewEvent},
    storage::{Result, Store},
};

/// Category used for views that arrived without a referrer.
pub const DIRECT_REFERRER: &str = "Direct";

/// Thresholds and allowlists governing badge evaluation.
#[derive(Debug, Clone)]
pub struct BadgePolicy {
    /// Likes required for the `famous` badge.
    pub popular_likes: u64,
    /// Lowercased handles allowed to show each exclusive badge.
    pub exclusive: HashMap<BadgeKind, HashSet<String>>,
}

impl BadgePolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            popular_likes: settings.popular_likes,
            exclusive: settings.exclusive_badges.clone(),
        }
    }
}

/// One calendar day in a dense views-by-day series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayCount {
    pub date: NaiveDate,
    pub count: u64,
}

/// One referrer bucket, most-visited first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferrerCount {
    pub referrer: String,
    pub count: u64,
}

/// Headline counters for a profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stats {
    pub view_count: u64,
    pub unique_visitors: u64,
    pub views_today: u64,
    pub like_count: u64,
}

/// The calendar date of a view in the viewer's timezone, expressed as
/// minutes east of UTC.
fn local_date(event: &ViewEvent, tz_offset_minutes: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(tz_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    event.viewed_at.with_timezone(&offset).date_naive()
}

/// "Today" in the viewer's timezone.
pub fn local_today(tz_offset_minutes: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(tz_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    Utc::now().with_timezone(&offset).date_naive()
}

/// Count of distinct visitor identifiers among the views.
pub fn unique_visitors(views: &[ViewEvent]) -> u64 {
    views
        .iter()
        .map(|v| v.visitor_id.as_str())
        .collect::<HashSet<_>>()
        .len() as u64
}

/// Views whose local date equals `today`.
pub fn views_today(views: &[ViewEvent], today: NaiveDate, tz_offset_minutes: i32) -> u64 {
    views
        .iter()
        .filter(|v| local_date(v, tz_offset_minutes) == today)
        .count() as u64
}

/// Dense per-day counts for the last `days` calendar days ending at
/// `today`. Days without views appear with an explicit zero so charting
/// gets a gap-free series.
pub fn views_by_day(
    views: &[ViewEvent],
    today: NaiveDate,
    days: u32,
    tz_offset_minutes: i32,
) -> Vec<DayCount> {
    let mut buckets: HashMap<NaiveDate, u64> = HashMap::new();
    for v in views {
        *buckets.entry(local_date(v, tz_offset_minutes)).or_default() += 1;
    }
    (0..days)
        .rev()
        .map(|back| {
            let date = today - Duration::days(back as i64);
            DayCount {
                date,
                count: buckets.get(&date).copied().unwrap_or(0),
            }
        })
        .collect()
}

/// Top `k` referrers by view count. Views without a referrer fall into the
/// "Direct" bucket. Ties order arbitrarily.
pub fn top_referrers(views: &[ViewEvent], k: usize) -> Vec<ReferrerCount> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for v in views {
        let key = v.referrer.as_deref().unwrap_or(DIRECT_REFERRER);
        *counts.entry(key).or_default() += 1;
    }
    let mut out: Vec<ReferrerCount> = counts
        .into_iter()
        .map(|(referrer, count)| ReferrerCount {
            referrer: referrer.to_string(),
            count,
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out.truncate(k);
    out
}

/// Headline counters for one profile.
pub fn stats(store: &Store, profile_id: Uuid, tz_offset_minutes: i32) -> Result<Stats> {
    let views = store.views(profile_id)?;
    Ok(Stats {
        view_count: views.len() as u64,
        unique_visitors: unique_visitors(&views),
        views_today: views_today(&views, local_today(tz_offset_minutes), tz_offset_minutes),
        like_count: store.like_count(profile_id)?,
    })
}

/// Run badge evaluation for a profile and persist anything newly earned.
/// Returns the badges awarded by this call. Safe to re-run: existing
/// awards are left alone and a racing duplicate insert counts as success.
///
/// Only automatic badges are ever written; exclusive badges stay read-time
/// (see [`display_badges`]).
pub fn evaluate_and_award(
    store: &Store,
    profile: &Profile,
    policy: &BadgePolicy,
) -> Result<Vec<BadgeKind>> {
    let mut eligible = vec![BadgeKind::SignedUp];
    if store.element_count(profile.id)? >= 1 {
        eligible.push(BadgeKind::CustomizedProfile);
    }
    let likes = store.like_count(profile.id)?;
    if likes >= 1 {
        eligible.push(BadgeKind::GotLike);
    }
    if likes >= policy.popular_likes {
        eligible.push(BadgeKind::Famous);
    }
    let mut newly = vec![];
    for kind in eligible {
        if store.award_badge(profile.id, kind)? {
            newly.push(kind);
        }
    }
    Ok(newly)
}

/// Badges to display for a profile: the persisted awards, unioned with any
/// exclusive badges whose allowlist carries the handle (case-insensitive).
pub fn display_badges(
    store: &Store,
    profile: &Profile,
    policy: &BadgePolicy,
) -> Result<Vec<BadgeKind>> {
    let mut out: Vec<BadgeKind> = store.badges(profile.id)?.iter().map(|b| b.kind).collect();
    let handle = profile.handle.to_lowercase();
    let mut extra: Vec<BadgeKind> = policy
        .exclusive
        .iter()
        .filter(|(kind, allowed)| !out.contains(kind) && allowed.contains(&handle))
        .map(|(kind, _)| *kind)
        .collect();
    extra.sort();
    out.extend(extra);
    Ok(out)
}
