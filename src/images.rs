//! Stage 3: fill in image lists for chapters that have none yet.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context as _;
use url::Url;

use crate::formats::TitleRecord;
use crate::parse::parse_chapter_page;
use crate::pool;
use crate::stage::{StageContext, StageReport};

/// One pending chapter of one stored title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterUnit {
    pub slug: String,
    pub chapter: String,
    pub url: String,
}

impl fmt::Display for ChapterUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.slug, self.chapter)
    }
}

pub async fn run(ctx: &StageContext) -> anyhow::Result<StageReport> {
    let slugs = ctx.store.list_slugs().await.context("list stored titles")?;
    let mut units = Vec::new();
    let mut unreadable = Vec::new();
    for slug in slugs {
        match ctx.store.load_record(&slug).await {
            Ok(Some(record)) => units.extend(pending_units(&slug, &record)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(slug = %slug, ?err, "skipping unreadable record");
                unreadable.push(format!("{slug}: {err:#}"));
            }
        }
    }

    let total = units.len();
    tracing::info!(chapters = total, "fetching chapter images");

    let processed = Arc::new(AtomicUsize::new(0));
    let worker_ctx = ctx.clone();
    let outcome = pool::run_with_retry(units, ctx.config.concurrency, move |unit| {
        let ctx = worker_ctx.clone();
        let processed = Arc::clone(&processed);
        async move {
            let result = fill_chapter(&ctx, &unit).await;
            let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.status
                .live(format!("Fetched images for {done}/{total} chapters"))
                .await;
            result
        }
    })
    .await;

    for failure in &outcome.failed {
        tracing::warn!(unit = %failure.unit, error = %failure.error, "chapter failed");
    }
    let filled = outcome.succeeded.iter().filter(|stored| **stored).count();
    tracing::info!(filled, failed = outcome.failed.len(), "chapter images done");

    let mut report = StageReport::from_failures(outcome.succeeded.len(), &outcome.failed, |unit| {
        unit.to_string()
    });
    report.failures.extend(unreadable);
    Ok(report)
}

/// Chapters of `record` still waiting for images. Chapters without a URL
/// cannot be fetched and are left alone.
pub fn pending_units(slug: &str, record: &TitleRecord) -> Vec<ChapterUnit> {
    record
        .pending_chapters()
        .filter(|c| !c.url.trim().is_empty())
        .map(|c| ChapterUnit {
            slug: slug.to_owned(),
            chapter: c.chapter.clone(),
            url: c.url.clone(),
        })
        .collect()
}

/// Returns whether the images were stored. Another writer may have filled the
/// chapter first, in which case the stored list wins.
async fn fill_chapter(ctx: &StageContext, unit: &ChapterUnit) -> anyhow::Result<bool> {
    let url =
        Url::parse(&unit.url).with_context(|| format!("invalid chapter url {:?}", unit.url))?;
    let body = ctx.fetcher.fetch(url.as_str()).await?;
    let images =
        parse_chapter_page(&body, &url).with_context(|| format!("parse chapter page {url}"))?;
    let count = images.len();

    let updated = ctx
        .store
        .update_record(&unit.slug, |existing| {
            let mut record = existing?;
            let chapter = record.chapter_mut(&unit.chapter)?;
            if !chapter.images.is_empty() {
                return None;
            }
            chapter.images = images;
            Some(record)
        })
        .await?;

    if updated.is_some() {
        tracing::debug!(unit = %unit, images = count, "chapter images stored");
    }
    Ok(updated.is_some())
}
