use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Title -> summary, as discovered on the paginated listing.
pub type SummaryIndex = BTreeMap<String, TitleSummary>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterLink {
    #[serde(default)]
    pub chapter_title: String,
    #[serde(default)]
    pub chapter_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleSummary {
    #[serde(default)]
    pub title: String,
    /// Detail page URL.
    #[serde(default)]
    pub url: String,
    /// Cover image seen on the listing.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub chapters: Vec<ChapterLink>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(default, alias = "title")]
    pub chapter: String,
    #[serde(default)]
    pub url: String,
    /// `DD-MM-YYYY`.
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default, alias = "pages")]
    pub images: Vec<String>,
}

impl Chapter {
    pub fn new(chapter: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            chapter: chapter.into(),
            url: url.into(),
            release_date: None,
            images: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.images.is_empty()
    }

    pub fn order_key(&self) -> f64 {
        chapter_order_key(&self.chapter)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestChapter {
    pub chapter: String,
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRecord {
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "thumbnail")]
    pub cover: Option<String>,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub alternative_titles: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "bookmarked")]
    pub bookmark_count: u64,
    #[serde(default, alias = "description")]
    pub summary: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub total_chapters: usize,
    #[serde(default)]
    pub latest_chapters: Vec<LatestChapter>,
}

impl TitleRecord {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            slug: slugify(&title),
            title,
            url: url.into(),
            ..Self::default()
        }
    }

    /// Brings a record read from disk back to its invariants.
    pub fn normalize(&mut self, fallback_slug: &str) {
        if self.slug.trim().is_empty() {
            self.slug = if self.title.trim().is_empty() {
                fallback_slug.to_owned()
            } else {
                slugify(&self.title)
            };
        }
        dedup_in_order(&mut self.genres);
        dedup_in_order(&mut self.alternative_titles);
        for chapter in &mut self.chapters {
            if chapter.release_date.as_deref().is_some_and(|d| d.trim().is_empty()) {
                chapter.release_date = None;
            }
        }
        dedup_chapters(&mut self.chapters);
        sort_chapters(&mut self.chapters);
    }

    pub fn refresh_derived(&mut self) {
        self.total_chapters = self.chapters.len();
        let skip = self.chapters.len().saturating_sub(2);
        self.latest_chapters = self.chapters[skip..]
            .iter()
            .map(|c| LatestChapter {
                chapter: c.chapter.clone(),
                release_date: c.release_date.clone(),
            })
            .collect();
    }

    pub fn chapter_mut(&mut self, title: &str) -> Option<&mut Chapter> {
        self.chapters.iter_mut().find(|c| c.chapter == title)
    }

    pub fn pending_chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.chapters.iter().filter(|c| !c.is_complete())
    }
}

/// Legacy catalogs stored a denormalized object per title instead of its slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CatalogEntry {
    Slug(String),
    Legacy(LegacyCatalogEntry),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyCatalogEntry {
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl CatalogEntry {
    pub fn slug(&self) -> Option<&str> {
        match self {
            Self::Slug(slug) => Some(slug.as_str()),
            Self::Legacy(entry) => entry.slug.as_deref(),
        }
        .filter(|s| !s.trim().is_empty())
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub manga_count: usize,
    pub chapter_count: usize,
    pub genres: Vec<GenreCount>,
}

impl CatalogStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TitleRecord>) -> Self {
        let mut stats = Self::default();
        let mut genre_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in records {
            stats.manga_count += 1;
            stats.chapter_count += record.chapters.len();
            for genre in &record.genres {
                *genre_counts.entry(genre.as_str()).or_default() += 1;
            }
        }

        let mut genres = genre_counts
            .into_iter()
            .map(|(name, count)| GenreCount {
                name: name.to_owned(),
                count,
            })
            .collect::<Vec<_>>();
        genres.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        stats.genres = genres;
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedStage {
    pub name: String,
    pub exit_code: i32,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub running: bool,
    pub current_stage: Option<String>,
    pub cycle_number: u64,
    pub completed_stages: Vec<CompletedStage>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub live_message: Option<String>,
}

/// Lowercases, collapses every run of non-alphanumeric characters into one `-`
/// and trims hyphens from both ends.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;
    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch);
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

static CHAPTER_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid chapter number regex"));

/// First integer or decimal token in a chapter title; `0` when there is none.
pub fn chapter_order_key(title: &str) -> f64 {
    CHAPTER_NUMBER
        .find(title)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Orders by numeric key, then by title, so the result does not depend on
/// the order chapters were first seen in.
pub fn sort_chapters(chapters: &mut [Chapter]) {
    chapters.sort_by(|a, b| {
        a.order_key()
            .total_cmp(&b.order_key())
            .then_with(|| a.chapter.cmp(&b.chapter))
    });
}

/// Keeps the first chapter for every title.
pub fn dedup_chapters(chapters: &mut Vec<Chapter>) {
    let mut seen = HashSet::new();
    chapters.retain(|c| seen.insert(c.chapter.clone()));
}

pub fn dedup_in_order(values: &mut Vec<String>) {
    let mut seen = HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
}
