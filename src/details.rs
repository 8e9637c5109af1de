//! Stage 2: fetch every discovered title's detail page and merge it into the
//! stored record.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context as _;
use chrono::{Local, NaiveDate};
use url::Url;

use crate::fetch::Fetcher;
use crate::formats::{TitleSummary, slugify};
use crate::merge::{merge_record, new_chapter_titles};
use crate::parse::parse_detail_page;
use crate::pool;
use crate::stage::{StageContext, StageReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleUpdate {
    pub slug: String,
    pub title: String,
    pub new_chapters: Vec<String>,
}

pub async fn run(ctx: &StageContext) -> anyhow::Result<StageReport> {
    let index = ctx
        .store
        .load_summaries()
        .await
        .context("load title index")?
        .unwrap_or_default();
    let units = index.into_values().collect::<Vec<_>>();
    let total = units.len();
    tracing::info!(titles = total, "fetching title details");

    let today = Local::now().date_naive();
    let processed = Arc::new(AtomicUsize::new(0));
    let worker_ctx = ctx.clone();
    let outcome = pool::run_all(units, ctx.config.concurrency, move |summary| {
        let ctx = worker_ctx.clone();
        let processed = Arc::clone(&processed);
        async move {
            let result = update_title(&ctx, summary, today).await;
            let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.status
                .live(format!("Processed {done}/{total} titles"))
                .await;
            result
        }
    })
    .await;

    for failure in &outcome.failed {
        tracing::warn!(title = %failure.unit.title, error = %failure.error, "title failed");
    }
    log_new_chapters(&outcome.succeeded);

    Ok(StageReport::from_failures(
        outcome.succeeded.len(),
        &outcome.failed,
        |summary| summary.title.clone(),
    ))
}

/// Fetch, parse and merge one title under its record lock.
pub async fn update_title(
    ctx: &StageContext,
    summary: TitleSummary,
    today: NaiveDate,
) -> anyhow::Result<TitleUpdate> {
    let slug = slugify(&summary.title);
    if slug.is_empty() {
        anyhow::bail!("title {:?} has no usable slug", summary.title);
    }
    let url = Url::parse(&summary.url)
        .with_context(|| format!("invalid detail url {:?}", summary.url))?;

    let body = ctx.fetcher.fetch(url.as_str()).await?;
    let page = parse_detail_page(&body, &url, today)
        .with_context(|| format!("parse detail page {url}"))?;
    let mut fresh = page.into_record(&summary.title, &summary.url);

    let candidates = [fresh.cover.take(), summary.image]
        .into_iter()
        .flatten()
        .filter(|c| !c.trim().is_empty())
        .collect::<Vec<_>>();
    fresh.cover = if ctx.config.validate_covers {
        first_valid_cover(&ctx.fetcher, candidates).await
    } else {
        candidates.into_iter().next()
    };

    let mut new_chapters = Vec::new();
    ctx.store
        .update_record(&slug, |existing| {
            new_chapters = new_chapter_titles(existing.as_ref(), &fresh);
            Some(merge_record(existing, fresh))
        })
        .await?;
    tracing::debug!(slug = %slug, new = new_chapters.len(), "title merged");

    Ok(TitleUpdate {
        slug,
        title: summary.title,
        new_chapters,
    })
}

async fn first_valid_cover(fetcher: &Fetcher, candidates: Vec<String>) -> Option<String> {
    for candidate in candidates {
        if fetcher.is_image(&candidate).await {
            return Some(candidate);
        }
        tracing::debug!(url = %candidate, "cover candidate rejected");
    }
    None
}

fn log_new_chapters(updates: &[TitleUpdate]) {
    let mut updated = updates
        .iter()
        .filter(|u| !u.new_chapters.is_empty())
        .collect::<Vec<_>>();
    if updated.is_empty() {
        tracing::info!("no new chapters");
        return;
    }
    updated.sort_by(|a, b| a.title.cmp(&b.title));
    for update in updated {
        tracing::info!(
            title = %update.title,
            count = update.new_chapters.len(),
            chapters = ?update.new_chapters,
            "new chapters"
        );
    }
}
