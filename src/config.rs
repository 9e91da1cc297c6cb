//! Configuration loading from `.env` files.

use std::{
    collections::{HashMap, HashSet},
    env,
    path::PathBuf,
};

use anyhow::{Context, Result};

use crate::model::BadgeKind;

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Number of likes that earns the `famous` badge when unconfigured.
pub const DEFAULT_POPULAR_LIKES: u64 = 10;
/// Referrer list length when unconfigured.
pub const DEFAULT_TOP_REFERRERS: usize = 5;

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for all storage.
    pub store_root: PathBuf,
    /// HTTP bind address, e.g. `127.0.0.1:7777`.
    pub bind_http: String,
    /// Like count required for the `famous` badge.
    pub popular_likes: u64,
    /// How many referrers the analytics payload reports.
    pub top_referrers: usize,
    /// Allowlists for exclusive badges, lowercased handles per badge.
    pub exclusive_badges: HashMap<BadgeKind, HashSet<String>>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT")?);
        let bind_http = env::var("BIND_HTTP")?;
        let popular_likes = env::var("POPULAR_LIKES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_POPULAR_LIKES);
        let top_referrers = env::var("TOP_REFERRERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TOP_REFERRERS);
        let exclusive_badges =
            parse_allowlists(&env::var("EXCLUSIVE_BADGES").unwrap_or_default());
        Ok(Self {
            store_root,
            bind_http,
            popular_likes,
            top_referrers,
            exclusive_badges,
        })
    }
}

/// Parse `badge:handle|handle;badge:handle` into per-badge allowlists.
///
/// Handles are lowercased so evaluation can match case-insensitively.
/// Unknown badge names and automatic badges are skipped rather than
/// letting configuration grant threshold badges.
pub fn parse_allowlists(input: &str) -> HashMap<BadgeKind, HashSet<String>> {
    let mut out = HashMap::new();
    for entry in input.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((badge, handles)) = entry.split_once(':') else {
            continue;
        };
        let Some(kind) = BadgeKind::parse(badge.trim()) else {
            continue;
        };
        if kind.is_automatic() {
            continue;
        }
        let set: HashSet<String> = handles
            .split('|')
            .filter_map(|h| {
                let t = h.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(t.to_lowercase())
                }
            })
            .collect();
        if !set.is_empty() {
            out.insert(kind, set);
        }
    }
    out
}
