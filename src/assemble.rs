//! Stage 4: derive per-title fields, the slug catalog and aggregate stats from
//! the stored records. Nothing is rewritten when its bytes would not change.

use std::collections::HashSet;

use anyhow::Context as _;
use chrono::Local;

use crate::formats::{CatalogStats, TitleRecord};
use crate::stage::{StageContext, StageReport};
use crate::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblySummary {
    pub records_rewritten: usize,
    pub catalog_written: bool,
    pub stats_written: bool,
    pub stats: CatalogStats,
}

pub async fn run(ctx: &StageContext) -> anyhow::Result<StageReport> {
    ctx.status.live("Assembling catalog").await;
    let (summary, report) = assemble(&ctx.store).await?;
    tracing::info!(
        titles = summary.stats.manga_count,
        chapters = summary.stats.chapter_count,
        genres = summary.stats.genres.len(),
        records_rewritten = summary.records_rewritten,
        catalog_written = summary.catalog_written,
        stats_written = summary.stats_written,
        "catalog assembled"
    );
    Ok(report)
}

pub async fn assemble(store: &Store) -> anyhow::Result<(AssemblySummary, StageReport)> {
    let slugs = store.list_slugs().await.context("list stored titles")?;
    let catalog = store.load_catalog().await.context("load catalog")?;

    let mut catalog_slugs = catalog.slugs;
    let mut listed = catalog_slugs.iter().cloned().collect::<HashSet<_>>();
    let mut records = Vec::with_capacity(slugs.len());
    let mut summary = AssemblySummary::default();
    let mut report = StageReport::default();

    for slug in slugs {
        match refresh_record(store, &slug).await {
            Ok((record, rewritten)) => {
                if rewritten {
                    summary.records_rewritten += 1;
                }
                if listed.insert(slug.clone()) {
                    catalog_slugs.push(slug);
                }
                records.push(record);
                report.succeeded += 1;
            }
            Err(err) => {
                tracing::warn!(slug = %slug, ?err, "failed to assemble record");
                report.failures.push(format!("{slug}: {err:#}"));
            }
        }
    }

    if catalog.migrated_from_legacy {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let backup = store
            .backup_catalog(&stamp)
            .await
            .context("back up legacy catalog")?;
        tracing::info!(backup = %backup.display(), "migrating legacy catalog to slugs");
    }

    summary.catalog_written = store
        .save_catalog_if_changed(&catalog_slugs)
        .await
        .context("write catalog")?;
    summary.stats = CatalogStats::from_records(&records);
    summary.stats_written = store
        .save_stats_if_changed(&summary.stats)
        .await
        .context("write stats")?;

    Ok((summary, report))
}

async fn refresh_record(store: &Store, slug: &str) -> anyhow::Result<(TitleRecord, bool)> {
    let _guard = store.lock_record(slug).await;
    let mut record = store
        .load_record(slug)
        .await?
        .ok_or_else(|| anyhow::anyhow!("record disappeared: {slug}"))?;
    record.refresh_derived();
    let rewritten = store.save_record_if_changed(&record).await?;
    Ok((record, rewritten))
}
