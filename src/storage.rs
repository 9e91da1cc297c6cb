//! File-backed store for profiles, elements, and engagement rows.
//!
//! Everything lives under one root directory. Uniqueness constraints the
//! hosted-database version of this app leaned on (one profile per handle,
//! one like per visitor, one badge per kind) are enforced here with
//! `create_new` opens, so a losing racer sees `AlreadyExists` and can treat
//! the insert as a no-op.

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::to_writer;
use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::model::{
    BadgeAward, BadgeKind, Element, ElementContent, ElementKind, Like, Profile, ViewEvent,
};

/// Failures surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record absent, or hidden from the caller and treated as absent.
    #[error("not found")]
    NotFound,
    /// A uniqueness constraint or revision fence rejected the write.
    #[error("conflict")]
    Conflict,
    /// Write attempted by a non-owner.
    #[error("unauthorized")]
    Unauthorized,
    /// Request payload failed validation.
    #[error("invalid: {0}")]
    Invalid(String),
    /// Underlying filesystem failure.
    #[error("storage failure: {0}")]
    Transient(#[from] io::Error),
    /// A record on disk no longer parses.
    #[error("corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Fields accepted when creating a profile.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewProfile {
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub background_url: Option<String>,
    #[serde(default)]
    pub theme_color: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub show_badges: Option<bool>,
}

/// Partial update for a profile. Optional string fields are cleared by
/// sending an empty string; absent fields are left untouched.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ProfilePatch {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub background_url: Option<String>,
    #[serde(default)]
    pub theme_color: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub show_badges: Option<bool>,
}

/// Fields accepted when adding an element.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewElement {
    pub kind: ElementKind,
    pub content: ElementContent,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub rotation: Option<f64>,
    #[serde(default)]
    pub styles: Option<serde_json::Value>,
}

/// Persistent store rooted at `root`.
#[derive(Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Create a new store rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        let dirs = [
            "profiles",
            "index/by-handle",
            "index/by-owner",
            "elements",
            "views",
            "likes",
            "badges",
            "sessions",
        ];
        for d in dirs {
            fs::create_dir_all(self.root.join(d))?;
        }
        Ok(())
    }

    // ---- sessions ----------------------------------------------------

    /// Mint a session token for `identity` and persist the mapping.
    pub fn grant_session(&self, identity: &str) -> Result<String> {
        safe_component(identity)?;
        let token = Uuid::new_v4().to_string();
        fs::write(self.root.join("sessions").join(&token), identity)?;
        Ok(token)
    }

    /// Resolve a bearer token to the identity it was granted for.
    pub fn resolve_session(&self, token: &str) -> Option<String> {
        safe_component(token).ok()?;
        fs::read_to_string(self.root.join("sessions").join(token)).ok()
    }

    // ---- profiles ----------------------------------------------------

    /// Create the caller's profile. `Conflict` when the handle is taken or
    /// the identity already owns a profile.
    pub fn create_profile(&self, identity: &str, new: NewProfile) -> Result<Profile> {
        safe_component(identity)?;
        validate_handle(&new.handle)?;
        let now = Utc::now();
        let profile = Profile {
            id: Uuid::new_v4(),
            user_id: identity.to_string(),
            handle: new.handle,
            display_name: new.display_name.filter(|s| !s.is_empty()),
            bio: new.bio.filter(|s| !s.is_empty()),
            avatar_url: new.avatar_url.filter(|s| !s.is_empty()),
            background_url: new.background_url.filter(|s| !s.is_empty()),
            theme_color: new.theme_color.unwrap_or_else(|| "#6366f1".to_string()),
            is_public: new.is_public.unwrap_or(true),
            show_badges: new.show_badges.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };

        // Claim the handle first, then the one-profile-per-owner slot.
        let handle_path = self.root.join("index/by-handle").join(&profile.handle);
        claim(&handle_path, profile.id.to_string().as_bytes())?;
        let owner_path = self.root.join("index/by-owner").join(identity);
        if let Err(e) = claim(&owner_path, profile.id.to_string().as_bytes()) {
            let _ = fs::remove_file(&handle_path);
            return Err(e);
        }

        self.write_json(&self.profile_path(profile.id), &profile)?;
        Ok(profile)
    }

    /// Load a profile by id.
    pub fn profile_by_id(&self, id: Uuid) -> Result<Profile> {
        self.read_json(&self.profile_path(id))
    }

    /// Map a handle to its profile id with no visibility gating. Operator
    /// tooling uses this; request paths go through [`profile_by_handle`].
    ///
    /// [`profile_by_handle`]: Store::profile_by_handle
    pub fn resolve_handle(&self, handle: &str) -> Result<Uuid> {
        safe_component(handle)?;
        let id = fs::read_to_string(self.root.join("index/by-handle").join(handle))
            .map_err(|_| StoreError::NotFound)?;
        id.trim().parse().map_err(|_| StoreError::NotFound)
    }

    /// Resolve a handle for `caller`. A private profile is indistinguishable
    /// from a missing one unless the caller owns it.
    pub fn profile_by_handle(&self, handle: &str, caller: Option<&str>) -> Result<Profile> {
        let id = self.resolve_handle(handle)?;
        let profile = self.profile_by_id(id)?;
        if !profile.is_public && caller != Some(profile.user_id.as_str()) {
            return Err(StoreError::NotFound);
        }
        Ok(profile)
    }

    /// Load the profile owned by `identity`.
    pub fn profile_by_owner(&self, identity: &str) -> Result<Profile> {
        safe_component(identity)?;
        let id = fs::read_to_string(self.root.join("index/by-owner").join(identity))
            .map_err(|_| StoreError::NotFound)?;
        let id: Uuid = id.trim().parse().map_err(|_| StoreError::NotFound)?;
        self.profile_by_id(id)
    }

    /// Apply a partial update. Owner-only.
    pub fn update_profile(&self, id: Uuid, caller: &str, patch: ProfilePatch) -> Result<Profile> {
        let mut profile = self.profile_by_id(id)?;
        if profile.user_id != caller {
            return Err(StoreError::Unauthorized);
        }
        apply_opt(&mut profile.display_name, patch.display_name);
        apply_opt(&mut profile.bio, patch.bio);
        apply_opt(&mut profile.avatar_url, patch.avatar_url);
        apply_opt(&mut profile.background_url, patch.background_url);
        if let Some(c) = patch.theme_color {
            if !c.is_empty() {
                profile.theme_color = c;
            }
        }
        if let Some(v) = patch.is_public {
            profile.is_public = v;
        }
        if let Some(v) = patch.show_badges {
            profile.show_badges = v;
        }
        profile.updated_at = Utc::now();
        self.write_json(&self.profile_path(id), &profile)?;
        Ok(profile)
    }

    /// Delete a profile and everything that references it. Owner-only.
    pub fn delete_profile(&self, id: Uuid, caller: &str) -> Result<()> {
        let profile = self.profile_by_id(id)?;
        if profile.user_id != caller {
            return Err(StoreError::Unauthorized);
        }
        fs::remove_file(self.profile_path(id))?;
        let _ = fs::remove_file(self.root.join("index/by-handle").join(&profile.handle));
        let _ = fs::remove_file(self.root.join("index/by-owner").join(&profile.user_id));
        for sub in ["elements", "likes", "badges"] {
            let dir = self.root.join(sub).join(id.to_string());
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
        }
        let _ = fs::remove_file(self.views_path(id));
        Ok(())
    }

    /// All public profiles, newest first, optionally filtered by a
    /// case-insensitive substring over handle and display name.
    pub fn public_profiles(&self, search: Option<&str>) -> Result<Vec<Profile>> {
        let needle = search.map(|s| s.to_lowercase());
        let mut out: Vec<Profile> = vec![];
        for entry in WalkDir::new(self.root.join("profiles")).min_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let profile: Profile = self.read_json(&entry.into_path())?;
            if !profile.is_public {
                continue;
            }
            if let Some(q) = &needle {
                let name = profile
                    .display_name
                    .as_deref()
                    .unwrap_or_default()
                    .to_lowercase();
                if !profile.handle.to_lowercase().contains(q) && !name.contains(q) {
                    continue;
                }
            }
            out.push(profile);
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    // ---- elements ----------------------------------------------------

    /// Elements of a profile, stacking order ascending, insertion order
    /// breaking ties.
    pub fn list_elements(&self, profile_id: Uuid) -> Result<Vec<Element>> {
        let dir = self.elements_dir(profile_id);
        let mut out: Vec<Element> = vec![];
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    out.push(self.read_json(&path)?);
                }
            }
        }
        out.sort_by_key(|e| (e.z_index, e.seq));
        Ok(out)
    }

    /// Add an element on top of the stack. Owner-only.
    pub fn add_element(&self, profile_id: Uuid, caller: &str, new: NewElement) -> Result<Element> {
        let profile = self.profile_by_id(profile_id)?;
        if profile.user_id != caller {
            return Err(StoreError::Unauthorized);
        }
        if new.content.kind() != new.kind {
            return Err(StoreError::Invalid(
                "content shape does not match element type".into(),
            ));
        }
        let existing = self.list_elements(profile_id)?;
        // max + 1 rather than len(): deletions leave gaps, and len() would
        // hand out a stacking value that is already in use.
        let z_index = existing.iter().map(|e| e.z_index).max().map_or(0, |z| z + 1);
        let seq = self.next_seq(profile_id)?;
        let (dw, dh) = new.kind.default_size();
        let now = Utc::now();
        let element = Element {
            id: Uuid::new_v4(),
            profile_id,
            kind: new.kind,
            content: new.content,
            x: new.x,
            y: new.y,
            width: new.width.unwrap_or(dw),
            height: new.height.unwrap_or(dh),
            rotation: new.rotation.unwrap_or(0.0),
            z_index,
            seq,
            revision: 0,
            styles: new.styles,
            created_at: now,
            updated_at: now,
        };
        self.write_json(&self.element_path(profile_id, element.id), &element)?;
        Ok(element)
    }

    /// Commit a drag-release position. The revision fences stale commits:
    /// anything at or below the stored revision lost the race and is
    /// rejected with `Conflict` instead of clobbering a newer position.
    pub fn update_position(
        &self,
        profile_id: Uuid,
        element_id: Uuid,
        caller: &str,
        x: f64,
        y: f64,
        revision: u64,
    ) -> Result<Element> {
        let mut element = self.element(profile_id, element_id)?;
        self.require_owner(profile_id, caller)?;
        if revision <= element.revision {
            return Err(StoreError::Conflict);
        }
        element.x = x;
        element.y = y;
        element.revision = revision;
        element.updated_at = Utc::now();
        self.write_json(&self.element_path(profile_id, element_id), &element)?;
        Ok(element)
    }

    /// Replace an element's content. The type tag is immutable, so the new
    /// payload must keep the element's shape. Owner-only.
    pub fn update_content(
        &self,
        profile_id: Uuid,
        element_id: Uuid,
        caller: &str,
        content: ElementContent,
    ) -> Result<Element> {
        let mut element = self.element(profile_id, element_id)?;
        self.require_owner(profile_id, caller)?;
        if content.kind() != element.kind {
            return Err(StoreError::Invalid(
                "content shape does not match element type".into(),
            ));
        }
        element.content = content;
        element.updated_at = Utc::now();
        self.write_json(&self.element_path(profile_id, element_id), &element)?;
        Ok(element)
    }

    /// Remove an element. Sibling stacking orders keep their gaps.
    pub fn remove_element(&self, profile_id: Uuid, element_id: Uuid, caller: &str) -> Result<()> {
        let path = self.element_path(profile_id, element_id);
        if !path.exists() {
            return Err(StoreError::NotFound);
        }
        self.require_owner(profile_id, caller)?;
        fs::remove_file(path)?;
        Ok(())
    }

    /// Load one element.
    pub fn element(&self, profile_id: Uuid, element_id: Uuid) -> Result<Element> {
        self.read_json(&self.element_path(profile_id, element_id))
    }

    /// Count a profile's elements.
    pub fn element_count(&self, profile_id: Uuid) -> Result<u64> {
        Ok(self.list_elements(profile_id)?.len() as u64)
    }

    // ---- views -------------------------------------------------------

    /// Append one view event unless the caller owns the profile. Returns
    /// whether a row was written.
    pub fn record_view(
        &self,
        profile_id: Uuid,
        visitor_id: &str,
        referrer: Option<String>,
        caller: Option<&str>,
    ) -> Result<bool> {
        safe_component(visitor_id)?;
        let profile = self.profile_by_id(profile_id)?;
        if caller == Some(profile.user_id.as_str()) {
            return Ok(false);
        }
        let event = ViewEvent {
            visitor_id: visitor_id.to_string(),
            referrer: referrer.filter(|r| !r.is_empty()),
            viewed_at: Utc::now(),
        };
        let mut log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.views_path(profile_id))?;
        to_writer(&mut log, &event)?;
        log.write_all(b"\n")?;
        Ok(true)
    }

    /// All view events for a profile, oldest first.
    pub fn views(&self, profile_id: Uuid) -> Result<Vec<ViewEvent>> {
        let path = self.views_path(profile_id);
        if !path.exists() {
            return Ok(vec![]);
        }
        let data = fs::read_to_string(path)?;
        let mut out = vec![];
        for line in data.lines().filter(|l| !l.trim().is_empty()) {
            out.push(serde_json::from_str(line)?);
        }
        Ok(out)
    }

    // ---- likes -------------------------------------------------------

    /// Like a profile for one visitor. Returns false when the like already
    /// existed; the duplicate insert is success, not an error.
    pub fn like(&self, profile_id: Uuid, visitor_id: &str) -> Result<bool> {
        safe_component(visitor_id)?;
        self.profile_by_id(profile_id)?;
        let dir = self.root.join("likes").join(profile_id.to_string());
        fs::create_dir_all(&dir)?;
        let row = Like {
            visitor_id: visitor_id.to_string(),
            created_at: Utc::now(),
        };
        match claim_json(&dir.join(format!("{visitor_id}.json")), &row) {
            Ok(()) => Ok(true),
            Err(StoreError::Conflict) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove a visitor's like. Returns false when there was none.
    pub fn unlike(&self, profile_id: Uuid, visitor_id: &str) -> Result<bool> {
        safe_component(visitor_id)?;
        let path = self
            .root
            .join("likes")
            .join(profile_id.to_string())
            .join(format!("{visitor_id}.json"));
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether this visitor currently likes the profile.
    pub fn has_liked(&self, profile_id: Uuid, visitor_id: &str) -> bool {
        safe_component(visitor_id).is_ok()
            && self
                .root
                .join("likes")
                .join(profile_id.to_string())
                .join(format!("{visitor_id}.json"))
                .exists()
    }

    /// Number of likes for a profile.
    pub fn like_count(&self, profile_id: Uuid) -> Result<u64> {
        let dir = self.root.join("likes").join(profile_id.to_string());
        if !dir.exists() {
            return Ok(0);
        }
        Ok(fs::read_dir(dir)?.count() as u64)
    }

    // ---- badges ------------------------------------------------------

    /// Persist a badge award. Returns false when the badge was already
    /// earned; badges are permanent, so this never overwrites.
    pub fn award_badge(&self, profile_id: Uuid, kind: BadgeKind) -> Result<bool> {
        let dir = self.root.join("badges").join(profile_id.to_string());
        fs::create_dir_all(&dir)?;
        let award = BadgeAward {
            kind,
            earned_at: Utc::now(),
        };
        match claim_json(&dir.join(format!("{}.json", kind.as_str())), &award) {
            Ok(()) => Ok(true),
            Err(StoreError::Conflict) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Earned badges for a profile, oldest first.
    pub fn badges(&self, profile_id: Uuid) -> Result<Vec<BadgeAward>> {
        let dir = self.root.join("badges").join(profile_id.to_string());
        let mut out: Vec<BadgeAward> = vec![];
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                out.push(self.read_json(&entry?.path())?);
            }
        }
        out.sort_by(|a, b| a.earned_at.cmp(&b.earned_at).then(a.kind.cmp(&b.kind)));
        Ok(out)
    }

    // ---- plumbing ----------------------------------------------------

    fn require_owner(&self, profile_id: Uuid, caller: &str) -> Result<()> {
        let profile = self.profile_by_id(profile_id)?;
        if profile.user_id != caller {
            return Err(StoreError::Unauthorized);
        }
        Ok(())
    }

    /// Next insertion-sequence value for a profile's elements.
    fn next_seq(&self, profile_id: Uuid) -> Result<u64> {
        let dir = self.elements_dir(profile_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(".seq");
        let next = fs::read_to_string(&path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map_or(0, |n| n + 1);
        fs::write(path, next.to_string())?;
        Ok(next)
    }

    fn profile_path(&self, id: Uuid) -> PathBuf {
        self.root.join("profiles").join(format!("{id}.json"))
    }

    fn elements_dir(&self, profile_id: Uuid) -> PathBuf {
        self.root.join("elements").join(profile_id.to_string())
    }

    fn element_path(&self, profile_id: Uuid, element_id: Uuid) -> PathBuf {
        self.elements_dir(profile_id)
            .join(format!("{element_id}.json"))
    }

    fn views_path(&self, profile_id: Uuid) -> PathBuf {
        self.root.join("views").join(format!("{profile_id}.ndjson"))
    }

    /// Write JSON atomically via a tempfile in the target directory.
    fn write_json<T: serde::Serialize>(&self, path: &PathBuf, value: &T) -> Result<()> {
        let parent = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)?;
        let tmp = tempfile::NamedTempFile::new_in(&parent)?;
        to_writer(&tmp, value)?;
        tmp.persist(path).map_err(|e| StoreError::Transient(e.error))?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &PathBuf) -> Result<T> {
        let data = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound
            } else {
                StoreError::Transient(e)
            }
        })?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Create `path` exclusively with `contents`; `Conflict` if it exists.
fn claim(path: &PathBuf, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                StoreError::Conflict
            } else {
                StoreError::Transient(e)
            }
        })?;
    f.write_all(contents)?;
    Ok(())
}

/// Like [`claim`] but serializing a JSON value.
fn claim_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<()> {
    claim(path, serde_json::to_string(value)?.as_bytes())
}

/// Reject values that would escape their directory when used as a file name.
fn safe_component(s: &str) -> Result<()> {
    if s.is_empty()
        || s == "."
        || s == ".."
        || s.contains('/')
        || s.contains('\\')
        || s.contains('\0')
    {
        return Err(StoreError::Invalid("unsafe identifier".into()));
    }
    Ok(())
}

/// Handles route URLs and name files, so the charset is kept tight.
fn validate_handle(handle: &str) -> Result<()> {
    if handle.is_empty() || handle.len() > 64 {
        return Err(StoreError::Invalid("handle must be 1-64 characters".into()));
    }
    if !handle
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(StoreError::Invalid(
            "handle may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    Ok(())
}

/// Set, clear (empty string), or keep an optional text field.
fn apply_opt(field: &mut Option<String>, patch: Option<String>) {
    if let Some(v) = patch {
        *field = if v.is_empty() { None } else { Some(v) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        store.init().unwrap();
        (dir, store)
    }

    fn new_profile(handle: &str) -> NewProfile {
        NewProfile {
            handle: handle.into(),
            display_name: None,
            bio: None,
            avatar_url: None,
            background_url: None,
            theme_color: None,
            is_public: None,
            show_badges: None,
        }
    }

    fn text_element(text: &str) -> NewElement {
        NewElement {
            kind: ElementKind::Text,
            content: ElementContent::Text { text: text.into() },
            x: 50.0,
            y: 50.0,
            width: None,
            height: None,
            rotation: None,
            styles: None,
        }
    }

    #[test]
    fn create_and_lookup_profile() {
        let (_dir, store) = store();
        let created = store.create_profile("u1", new_profile("alice")).unwrap();
        assert!(created.is_public);
        assert_eq!(created.theme_color, "#6366f1");
        let by_handle = store.profile_by_handle("alice", None).unwrap();
        assert_eq!(by_handle, created);
        let by_owner = store.profile_by_owner("u1").unwrap();
        assert_eq!(by_owner.id, created.id);
    }

    #[test]
    fn duplicate_handle_conflicts() {
        let (_dir, store) = store();
        store.create_profile("u1", new_profile("alice")).unwrap();
        let err = store.create_profile("u2", new_profile("alice")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[test]
    fn one_profile_per_identity() {
        let (_dir, store) = store();
        store.create_profile("u1", new_profile("alice")).unwrap();
        let err = store.create_profile("u1", new_profile("alice2")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        // the losing handle is released again
        store.create_profile("u2", new_profile("alice2")).unwrap();
    }

    #[test]
    fn handle_lookup_is_case_sensitive() {
        let (_dir, store) = store();
        store.create_profile("u1", new_profile("Alice")).unwrap();
        assert!(matches!(
            store.profile_by_handle("alice", None),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn private_profile_looks_missing_to_non_owners() {
        let (_dir, store) = store();
        let mut new = new_profile("ghost");
        new.is_public = Some(false);
        let profile = store.create_profile("u1", new).unwrap();
        let hidden = store.profile_by_handle("ghost", Some("u2"));
        let missing = store.profile_by_handle("nobody", Some("u2"));
        assert!(matches!(hidden, Err(StoreError::NotFound)));
        assert!(matches!(missing, Err(StoreError::NotFound)));
        // owner still resolves it
        let seen = store.profile_by_handle("ghost", Some("u1")).unwrap();
        assert_eq!(seen.id, profile.id);
    }

    #[test]
    fn invalid_handles_rejected() {
        let (_dir, store) = store();
        let long = "x".repeat(65);
        for bad in ["", "has space", "a/b", "..", long.as_str()] {
            assert!(matches!(
                store.create_profile("u1", new_profile(bad)),
                Err(StoreError::Invalid(_))
            ));
        }
    }

    #[test]
    fn update_profile_owner_only() {
        let (_dir, store) = store();
        let profile = store.create_profile("u1", new_profile("alice")).unwrap();
        let patch = ProfilePatch {
            display_name: Some("Alice".into()),
            is_public: Some(false),
            ..Default::default()
        };
        let err = store
            .update_profile(profile.id, "u2", patch.clone())
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized));
        let updated = store.update_profile(profile.id, "u1", patch).unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Alice"));
        assert!(!updated.is_public);
        // empty string clears an optional field
        let cleared = store
            .update_profile(
                profile.id,
                "u1",
                ProfilePatch {
                    display_name: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(cleared.display_name, None);
    }

    #[test]
    fn delete_profile_cascades() {
        let (_dir, store) = store();
        let profile = store.create_profile("u1", new_profile("alice")).unwrap();
        store.add_element(profile.id, "u1", text_element("hi")).unwrap();
        store.like(profile.id, "v1").unwrap();
        store
            .record_view(profile.id, "v1", None, None)
            .unwrap();
        store.award_badge(profile.id, BadgeKind::SignedUp).unwrap();

        assert!(matches!(
            store.delete_profile(profile.id, "u2"),
            Err(StoreError::Unauthorized)
        ));
        store.delete_profile(profile.id, "u1").unwrap();

        assert!(matches!(
            store.profile_by_handle("alice", Some("u1")),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.profile_by_owner("u1"),
            Err(StoreError::NotFound)
        ));
        assert!(store.list_elements(profile.id).unwrap().is_empty());
        assert_eq!(store.like_count(profile.id).unwrap(), 0);
        assert!(store.views(profile.id).unwrap().is_empty());
        assert!(store.badges(profile.id).unwrap().is_empty());
        // the handle is free again
        store.create_profile("u2", new_profile("alice")).unwrap();
    }

    #[test]
    fn elements_ordered_by_stack_then_insertion() {
        let (_dir, store) = store();
        let profile = store.create_profile("u1", new_profile("alice")).unwrap();
        let a = store.add_element(profile.id, "u1", text_element("a")).unwrap();
        let b = store.add_element(profile.id, "u1", text_element("b")).unwrap();
        let c = store.add_element(profile.id, "u1", text_element("c")).unwrap();
        assert_eq!((a.z_index, b.z_index, c.z_index), (0, 1, 2));
        let listed = store.list_elements(profile.id).unwrap();
        let ids: Vec<_> = listed.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn stack_order_survives_deletions_without_collisions() {
        let (_dir, store) = store();
        let profile = store.create_profile("u1", new_profile("alice")).unwrap();
        let a = store.add_element(profile.id, "u1", text_element("a")).unwrap();
        let b = store.add_element(profile.id, "u1", text_element("b")).unwrap();
        store.remove_element(profile.id, a.id, "u1").unwrap();
        // len() would hand out 1 again and collide with b; max+1 does not
        let c = store.add_element(profile.id, "u1", text_element("c")).unwrap();
        assert_eq!(b.z_index, 1);
        assert_eq!(c.z_index, 2);
    }

    #[test]
    fn element_writes_are_owner_only() {
        let (_dir, store) = store();
        let profile = store.create_profile("u1", new_profile("alice")).unwrap();
        assert!(matches!(
            store.add_element(profile.id, "u2", text_element("x")),
            Err(StoreError::Unauthorized)
        ));
        let el = store.add_element(profile.id, "u1", text_element("x")).unwrap();
        assert!(matches!(
            store.update_position(profile.id, el.id, "u2", 1.0, 2.0, 1),
            Err(StoreError::Unauthorized)
        ));
        assert!(matches!(
            store.remove_element(profile.id, el.id, "u2"),
            Err(StoreError::Unauthorized)
        ));
    }

    #[test]
    fn stale_position_commits_are_rejected() {
        let (_dir, store) = store();
        let profile = store.create_profile("u1", new_profile("alice")).unwrap();
        let el = store.add_element(profile.id, "u1", text_element("x")).unwrap();
        let moved = store
            .update_position(profile.id, el.id, "u1", 10.0, 20.0, 2)
            .unwrap();
        assert_eq!((moved.x, moved.y), (10.0, 20.0));
        // a commit from an earlier drag arrives late and must not win
        assert!(matches!(
            store.update_position(profile.id, el.id, "u1", 1.0, 1.0, 1),
            Err(StoreError::Conflict)
        ));
        assert!(matches!(
            store.update_position(profile.id, el.id, "u1", 1.0, 1.0, 2),
            Err(StoreError::Conflict)
        ));
        let current = store.element(profile.id, el.id).unwrap();
        assert_eq!((current.x, current.y), (10.0, 20.0));
    }

    #[test]
    fn content_keeps_its_shape() {
        let (_dir, store) = store();
        let profile = store.create_profile("u1", new_profile("alice")).unwrap();
        let el = store.add_element(profile.id, "u1", text_element("x")).unwrap();
        let err = store
            .update_content(
                profile.id,
                el.id,
                "u1",
                ElementContent::Image { url: "https://x/y.png".into() },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        let updated = store
            .update_content(
                profile.id,
                el.id,
                "u1",
                ElementContent::Text { text: "y".into() },
            )
            .unwrap();
        assert_eq!(updated.content, ElementContent::Text { text: "y".into() });
    }

    #[test]
    fn mismatched_new_element_rejected() {
        let (_dir, store) = store();
        let profile = store.create_profile("u1", new_profile("alice")).unwrap();
        let mut new = text_element("x");
        new.kind = ElementKind::Image;
        assert!(matches!(
            store.add_element(profile.id, "u1", new),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn like_unlike_round_trip() {
        let (_dir, store) = store();
        let profile = store.create_profile("u1", new_profile("alice")).unwrap();
        let before = store.like_count(profile.id).unwrap();
        assert!(store.like(profile.id, "v1").unwrap());
        assert!(store.has_liked(profile.id, "v1"));
        // duplicate insert is success, not error
        assert!(!store.like(profile.id, "v1").unwrap());
        assert_eq!(store.like_count(profile.id).unwrap(), 1);
        assert!(store.unlike(profile.id, "v1").unwrap());
        assert!(!store.unlike(profile.id, "v1").unwrap());
        assert!(!store.has_liked(profile.id, "v1"));
        assert_eq!(store.like_count(profile.id).unwrap(), before);
    }

    #[test]
    fn views_skip_the_owner() {
        let (_dir, store) = store();
        let profile = store.create_profile("u1", new_profile("alice")).unwrap();
        assert!(!store
            .record_view(profile.id, "v-owner", None, Some("u1"))
            .unwrap());
        assert!(store
            .record_view(profile.id, "v1", Some("https://a".into()), Some("u2"))
            .unwrap());
        assert!(store.record_view(profile.id, "v2", None, None).unwrap());
        let views = store.views(profile.id).unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].referrer.as_deref(), Some("https://a"));
        assert_eq!(views[1].referrer, None);
    }

    #[test]
    fn badge_awards_are_idempotent() {
        let (_dir, store) = store();
        let profile = store.create_profile("u1", new_profile("alice")).unwrap();
        assert!(store.award_badge(profile.id, BadgeKind::SignedUp).unwrap());
        assert!(!store.award_badge(profile.id, BadgeKind::SignedUp).unwrap());
        let badges = store.badges(profile.id).unwrap();
        assert_eq!(badges.len(), 1);
        assert_eq!(badges[0].kind, BadgeKind::SignedUp);
    }

    #[test]
    fn sessions_resolve_to_identity() {
        let (_dir, store) = store();
        let token = store.grant_session("u1").unwrap();
        assert_eq!(store.resolve_session(&token).as_deref(), Some("u1"));
        assert_eq!(store.resolve_session("bogus"), None);
        assert_eq!(store.resolve_session("../sessions/x"), None);
    }

    #[test]
    fn explore_filters_and_searches() {
        let (_dir, store) = store();
        let mut hidden = new_profile("secret");
        hidden.is_public = Some(false);
        store.create_profile("u1", hidden).unwrap();
        let mut named = new_profile("bob");
        named.display_name = Some("Bobby Tables".into());
        store.create_profile("u2", named).unwrap();
        store.create_profile("u3", new_profile("carol")).unwrap();

        let all = store.public_profiles(None).unwrap();
        assert_eq!(all.len(), 2);
        let hits = store.public_profiles(Some("BOBBY")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].handle, "bob");
        let by_handle = store.public_profiles(Some("car")).unwrap();
        assert_eq!(by_handle.len(), 1);
        assert!(store.public_profiles(Some("zzz")).unwrap().is_empty());
    }
}
