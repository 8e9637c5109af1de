//! Stage 1: walk `<base>/page/<n>/` until the site answers 404.

use std::collections::btree_map::Entry;

use anyhow::Context as _;

use crate::formats::{SummaryIndex, TitleSummary};
use crate::merge::merge_summary;
use crate::parse::parse_list_page;
use crate::stage::{StageContext, StageReport};

/// Visits list pages from 1 upward, persisting the index after every page.
/// A 404 ends the walk normally; any other failure is fatal for the stage.
pub async fn run(ctx: &StageContext) -> anyhow::Result<StageReport> {
    let store = &ctx.store;
    let mut index = store
        .load_summaries()
        .await
        .context("load title index")?
        .unwrap_or_default();
    let mut unsaved = false;
    let mut pages = 0;

    for page in 1u32.. {
        if ctx.cancel.is_cancelled() {
            tracing::info!(page, "shutdown requested; stopping discovery");
            break;
        }

        let url = ctx.config.list_page_url(page)?;
        ctx.status.live(format!("Processing page {page}")).await;
        let body = match ctx.fetcher.fetch_listing(url.as_str()).await {
            Ok(body) => body,
            Err(err) if err.is_not_found() => {
                tracing::info!(page, "no more list pages");
                break;
            }
            Err(err) => return Err(err).with_context(|| format!("fetch list page {page}")),
        };
        let summaries =
            parse_list_page(&body, &url).with_context(|| format!("parse list page {page}"))?;

        let found = summaries.len();
        let added = merge_page(&mut index, summaries);
        pages += 1;
        tracing::info!(page, found, added, total = index.len(), "list page merged");

        match store.save_summaries(&index).await {
            Ok(()) => unsaved = false,
            Err(err) => {
                tracing::warn!(page, ?err, "failed to persist title index; continuing");
                unsaved = true;
            }
        }
    }

    if unsaved {
        store
            .save_summaries(&index)
            .await
            .context("persist title index")?;
    }

    Ok(StageReport {
        succeeded: pages,
        failures: Vec::new(),
    })
}

/// Folds one page of listings into the index and returns how many titles were new.
pub fn merge_page(index: &mut SummaryIndex, summaries: Vec<TitleSummary>) -> usize {
    let mut added = 0;
    for summary in summaries {
        if summary.title.trim().is_empty() {
            continue;
        }
        match index.entry(summary.title.clone()) {
            Entry::Occupied(mut entry) => merge_summary(entry.get_mut(), summary),
            Entry::Vacant(entry) => {
                entry.insert(summary);
                added += 1;
            }
        }
    }
    added
}
