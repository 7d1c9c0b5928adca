//! Library inventory provider.
//!
//! The inventory snapshot lists every `(canonical_id, medium)` the target
//! library already holds, so the pipeline never recommends something the
//! user owns. [`PlexInventory`] builds it from a Plex Media Server.
//!
//! Each library item's canonical id is found by the first strategy that
//! yields one:
//!
//! 1. Embedded cross-reference GUIDs: the legacy `guid` attribute and the
//!    `<Guid id="tmdb://N"/>` children.
//! 2. A `{tmdb-N}` marker in a media file path.
//! 3. The per-item key cache, keyed by the item's rating key.
//! 4. A per-item metadata fetch (`/library/metadata/{rating_key}`). The
//!    result is written back to the key cache.
//!
//! Items that yield no id are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use quick_xml::events::{BytesStart, Event};
use reqwest::Client;
use tracing::{debug, info, warn};

use curator_core::models::{InventoryItem, Medium};
use curator_core::store::Store;

use crate::config::LibraryConfig;
use crate::error::ProviderError;
use crate::http::build_client;

#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// The full current holdings. Replaces the previous snapshot wholesale.
    async fn snapshot(&self) -> Result<Vec<InventoryItem>>;
}

/// Fetch a snapshot and store it. On failure the previous snapshot stays.
pub async fn refresh(provider: &dyn InventoryProvider, store: &dyn Store) -> Result<usize> {
    let items = provider
        .snapshot()
        .await
        .context("Failed to fetch library inventory")?;
    store
        .replace_inventory(&items, Utc::now())
        .await
        .context("Failed to store library inventory")?;
    info!(items = items.len(), "library inventory refreshed");
    Ok(items.len())
}

/// A library section from `/library/sections`.
#[derive(Debug, Clone, PartialEq)]
pub struct LibrarySection {
    pub key: String,
    pub title: String,
    pub kind: String,
}

impl LibrarySection {
    fn medium(&self) -> Option<Medium> {
        match self.kind.as_str() {
            "movie" => Some(Medium::Movie),
            "show" => Some(Medium::Tv),
            _ => None,
        }
    }
}

/// One movie or show from a section listing or a metadata response.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    pub rating_key: String,
    pub title: String,
    pub medium: Medium,
    pub guids: Vec<String>,
    pub files: Vec<String>,
}

impl LibraryEntry {
    pub fn embedded_id(&self) -> Option<i64> {
        self.guids.iter().find_map(|g| tmdb_id_from_guid(g))
    }

    pub fn path_id(&self) -> Option<i64> {
        self.files.iter().find_map(|f| tmdb_id_from_path(f))
    }
}

/// Parse `tmdb://12345` (legacy agents may append `?lang=en`).
pub fn tmdb_id_from_guid(guid: &str) -> Option<i64> {
    let rest = guid
        .strip_prefix("tmdb://")
        .or_else(|| guid.strip_prefix("com.plexapp.agents.themoviedb://"))?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok().filter(|id| *id > 0)
}

/// Find a `{tmdb-12345}` marker anywhere in a file path.
pub fn tmdb_id_from_path(path: &str) -> Option<i64> {
    let mut rest = path;
    while let Some(start) = rest.find("{tmdb-") {
        let tail = &rest[start + "{tmdb-".len()..];
        if let Some(end) = tail.find('}') {
            if let Ok(id) = tail[..end].parse::<i64>() {
                if id > 0 {
                    return Some(id);
                }
            }
        }
        rest = tail;
    }
    None
}

fn attr(e: &BytesStart, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

pub fn parse_sections(xml: &str) -> Result<Vec<LibrarySection>> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut sections = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Directory" {
                    if let Some(key) = attr(&e, "key") {
                        sections.push(LibrarySection {
                            key,
                            title: attr(&e, "title").unwrap_or_default(),
                            kind: attr(&e, "type").unwrap_or_default(),
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("invalid library sections XML: {}", e),
            _ => {}
        }
        buf.clear();
    }
    Ok(sections)
}

fn entry_medium(e: &BytesStart) -> Option<Medium> {
    match (e.local_name().as_ref(), attr(e, "type").as_deref()) {
        (b"Video", Some("movie")) | (b"Video", None) => Some(Medium::Movie),
        (b"Directory", Some("show")) => Some(Medium::Tv),
        _ => None,
    }
}

fn start_entry(e: &BytesStart, medium: Medium) -> LibraryEntry {
    LibraryEntry {
        rating_key: attr(e, "ratingKey").unwrap_or_default(),
        title: attr(e, "title").unwrap_or_default(),
        medium,
        guids: attr(e, "guid").into_iter().collect(),
        files: Vec::new(),
    }
}

/// Parse the movies and shows of a section listing or metadata response.
pub fn parse_entries(xml: &str) -> Result<Vec<LibraryEntry>> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut entries = Vec::new();
    let mut current: Option<LibraryEntry> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if current.is_none() {
                    if let Some(medium) = entry_medium(&e) {
                        current = Some(start_entry(&e, medium));
                    }
                } else {
                    add_child(current.as_mut(), &e);
                }
            }
            Ok(Event::Empty(e)) => {
                if current.is_none() {
                    if let Some(medium) = entry_medium(&e) {
                        entries.push(start_entry(&e, medium));
                    }
                } else {
                    add_child(current.as_mut(), &e);
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"Video" || name.as_ref() == b"Directory" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("invalid library listing XML: {}", e),
            _ => {}
        }
        buf.clear();
    }
    Ok(entries)
}

fn add_child(entry: Option<&mut LibraryEntry>, e: &BytesStart) {
    let Some(entry) = entry else { return };
    match e.local_name().as_ref() {
        b"Guid" => entry.guids.extend(attr(e, "id")),
        b"Part" => entry.files.extend(attr(e, "file")),
        _ => {}
    }
}

/// Plex Media Server inventory. The token is read from `PLEX_TOKEN`.
pub struct PlexInventory {
    client: Client,
    base_url: String,
    token: String,
    store: Arc<dyn Store>,
}

impl PlexInventory {
    pub fn new(config: &LibraryConfig, store: Arc<dyn Store>) -> Result<Self, ProviderError> {
        let token = std::env::var("PLEX_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ProviderError::MissingCredentials("PLEX_TOKEN"))?;
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            base_url: config.url.trim_end_matches('/').to_string(),
            token,
            store,
        })
    }

    async fn fetch_xml(&self, path: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/xml")
            .send()
            .await
            .map_err(ProviderError::Network)?;

        let status = response.status();
        let body = response.text().await.map_err(ProviderError::Network)?;
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: format!("library request {} failed", path),
            });
        }
        Ok(body)
    }

    async fn fetch_item_id(&self, rating_key: &str) -> Result<Option<i64>> {
        let xml = self
            .fetch_xml(&format!("/library/metadata/{}", rating_key))
            .await?;
        Ok(parse_entries(&xml)?
            .into_iter()
            .next()
            .and_then(|e| e.embedded_id()))
    }

    async fn resolve_entry(
        &self,
        entry: &LibraryEntry,
        cached: &HashMap<String, i64>,
    ) -> Option<i64> {
        if let Some(id) = entry.embedded_id() {
            return Some(id);
        }
        if let Some(id) = entry.path_id() {
            debug!(title = %entry.title, canonical_id = id, "id from file path");
            return Some(id);
        }
        if entry.rating_key.is_empty() {
            return None;
        }
        if let Some(id) = cached.get(&entry.rating_key) {
            return Some(*id);
        }

        match self.fetch_item_id(&entry.rating_key).await {
            Ok(Some(id)) => {
                if let Err(e) = self
                    .store
                    .remember_library_key(&entry.rating_key, id, entry.medium)
                    .await
                {
                    warn!(rating_key = %entry.rating_key, error = %e, "failed to cache library key");
                }
                Some(id)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(title = %entry.title, rating_key = %entry.rating_key, error = %e, "item metadata fetch failed");
                None
            }
        }
    }
}

#[async_trait]
impl InventoryProvider for PlexInventory {
    async fn snapshot(&self) -> Result<Vec<InventoryItem>> {
        let cached = self.store.library_key_ids().await.unwrap_or_else(|e| {
            warn!(error = %e, "library key cache unavailable");
            HashMap::new()
        });

        let sections = parse_sections(&self.fetch_xml("/library/sections").await?)?;

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        let mut dropped = 0usize;

        for section in sections {
            let Some(medium) = section.medium() else {
                continue;
            };
            let listing = match self
                .fetch_xml(&format!("/library/sections/{}/all", section.key))
                .await
                .map_err(anyhow::Error::from)
                .and_then(|xml| parse_entries(&xml))
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(section = %section.title, error = %e, "skipping library section");
                    continue;
                }
            };

            for entry in listing.into_iter().filter(|e| e.medium == medium) {
                match self.resolve_entry(&entry, &cached).await {
                    Some(canonical_id) => {
                        let item = InventoryItem {
                            canonical_id,
                            medium,
                        };
                        if seen.insert(item) {
                            items.push(item);
                        }
                    }
                    None => dropped += 1,
                }
            }
        }

        info!(items = items.len(), dropped, "library scanned");
        Ok(items)
    }
}
