//! Additive merge rules for discovered summaries and per-title records.
//!
//! Merges never drop data: chapters, genres and alternative titles are unions,
//! scalar fields only move from absent to present or to a newer present value,
//! and chapter images/release dates are only ever back-filled.

use std::collections::HashSet;

use crate::formats::{
    ChapterLink, TitleRecord, TitleSummary, dedup_chapters, dedup_in_order, sort_chapters,
};

pub fn merge_record(existing: Option<TitleRecord>, fresh: TitleRecord) -> TitleRecord {
    let Some(mut merged) = existing else {
        let mut record = fresh;
        dedup_in_order(&mut record.genres);
        dedup_in_order(&mut record.alternative_titles);
        dedup_chapters(&mut record.chapters);
        sort_chapters(&mut record.chapters);
        return record;
    };

    if merged.slug.is_empty() {
        merged.slug = fresh.slug;
    }
    if merged.title.is_empty() {
        merged.title = fresh.title;
    }
    if merged.url.is_empty() {
        merged.url = fresh.url;
    }

    overwrite_present(&mut merged.rank, fresh.rank);
    overwrite_present(&mut merged.status, fresh.status);
    overwrite_present(&mut merged.cover, fresh.cover);
    if fresh.bookmark_count != 0 {
        merged.bookmark_count = fresh.bookmark_count;
    }
    if !fresh.summary.trim().is_empty() {
        merged.summary = fresh.summary;
    }

    union_in_order(&mut merged.genres, fresh.genres);
    union_in_order(&mut merged.alternative_titles, fresh.alternative_titles);

    dedup_chapters(&mut merged.chapters);
    let mut fresh_chapters = fresh.chapters;
    dedup_chapters(&mut fresh_chapters);
    for chapter in fresh_chapters {
        match merged.chapter_mut(&chapter.chapter) {
            Some(stored) => {
                if stored.images.is_empty() && !chapter.images.is_empty() {
                    stored.images = chapter.images;
                }
                if stored.release_date.is_none() && chapter.release_date.is_some() {
                    stored.release_date = chapter.release_date;
                }
                if stored.url.is_empty() && !chapter.url.is_empty() {
                    stored.url = chapter.url;
                }
            }
            None => merged.chapters.push(chapter),
        }
    }
    sort_chapters(&mut merged.chapters);

    merged
}

/// Titles of chapters in `fresh` that `existing` does not have yet.
pub fn new_chapter_titles(existing: Option<&TitleRecord>, fresh: &TitleRecord) -> Vec<String> {
    let known = existing
        .map(|r| {
            r.chapters
                .iter()
                .map(|c| c.chapter.as_str())
                .collect::<HashSet<_>>()
        })
        .unwrap_or_default();
    let mut seen = HashSet::new();
    fresh
        .chapters
        .iter()
        .filter(|c| !known.contains(c.chapter.as_str()) && seen.insert(c.chapter.as_str()))
        .map(|c| c.chapter.clone())
        .collect()
}

/// Folds a freshly scraped listing entry into the discovery index entry.
/// The chapter list is unioned by chapter URL.
pub fn merge_summary(existing: &mut TitleSummary, fresh: TitleSummary) {
    if existing.url.is_empty() {
        existing.url = fresh.url;
    }
    if existing.image.as_deref().is_none_or(str::is_empty) {
        existing.image = fresh.image;
    }

    let mut known = existing
        .chapters
        .iter()
        .map(|c| c.chapter_url.clone())
        .collect::<HashSet<_>>();
    let additions = fresh
        .chapters
        .into_iter()
        .filter(|c| known.insert(c.chapter_url.clone()))
        .collect::<Vec<ChapterLink>>();
    existing.chapters.extend(additions);
}

fn overwrite_present(target: &mut Option<String>, fresh: Option<String>) {
    let Some(value) = fresh else {
        return;
    };
    if value.trim().is_empty() || target.as_deref() == Some(value.as_str()) {
        return;
    }
    *target = Some(value);
}

fn union_in_order(target: &mut Vec<String>, fresh: Vec<String>) {
    target.extend(fresh);
    dedup_in_order(target);
}
