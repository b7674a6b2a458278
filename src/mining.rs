use std::path::Path;

use globset::GlobMatcher;
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    archive::ReadingArchive,
    context::Context,
    error::Result,
    model_store::ModelStore,
    options::Options,
    sorter::UsageSorter,
    training::{ModelTrainer, TrainingSummary},
    usage::{self, UsageExtractor},
    walker::{self, DiscoveredArchive},
};

/// Counts from one sorting pass over a context corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SortSummary {
    pub archives: usize,
    pub failed_archives: usize,
    pub contexts: usize,
    pub skipped_records: usize,
    pub ineligible_contexts: usize,
    pub usages: usize,
}

/// Sorts usages from a context corpus into buckets.
pub struct CorpusSorter<'a, E> {
    sorter: &'a UsageSorter,
    extractor: E,
    cache_capacity: usize,
}

impl<'a, E: UsageExtractor> CorpusSorter<'a, E> {
    pub fn new(sorter: &'a UsageSorter, extractor: E, cache_capacity: usize) -> Self {
        Self {
            sorter,
            extractor,
            cache_capacity,
        }
    }

    /// Empty the buckets and refill them from every archive under `root`.
    ///
    /// An archive that cannot be opened is logged and skipped.
    pub fn clear_and_sort_usages(
        &self,
        root: &Path,
        only: Option<&GlobMatcher>,
    ) -> Result<SortSummary> {
        let archives = walker::discover_archives(root, only)?;
        self.sorter.clear()?;

        let mut summary = SortSummary {
            archives: archives.len(),
            ..SortSummary::default()
        };
        tracing::info!(
            archives = archives.len(),
            root = %root.display(),
            "sorting usages"
        );

        let mut session = self.sorter.session(self.cache_capacity);
        for (i, archive) in archives.iter().enumerate() {
            tracing::info!(
                "({}/{}) {} ({:.1} MB)",
                i + 1,
                archives.len(),
                archive.relative_path.display(),
                archive.size as f64 / (1024.0 * 1024.0),
            );

            let mut ra = match ReadingArchive::open(&archive.absolute_path) {
                Ok(ra) => ra,
                Err(e) => {
                    summary.failed_archives += 1;
                    tracing::error!("skipping archive: {e}");
                    continue;
                }
            };

            let (contexts, failures) = ra.read_all::<Context>();
            summary.skipped_records += failures;
            summary.contexts += contexts.len();

            // Extract in parallel, store sequentially (single writer).
            let extracted: Vec<_> = contexts
                .par_iter()
                .map(|ctx| {
                    if !ctx.is_eligible_for_mining() {
                        return None;
                    }
                    let erased = ctx.erased();
                    Some(usage::filter_interesting(
                        self.extractor.usages(&erased),
                    ))
                })
                .collect();

            for usages in extracted {
                let Some(usages) = usages else {
                    summary.ineligible_contexts += 1;
                    continue;
                };
                summary.usages += usages.len();
                session.store(&usages)?;
            }
            log_archive_done(archive, summary.usages);
        }
        session.finish()?;

        tracing::info!(
            contexts = summary.contexts,
            usages = summary.usages,
            failed_archives = summary.failed_archives,
            "sorting finished"
        );
        Ok(summary)
    }
}

/// Sorts a context corpus, then mines one model per bucket.
pub struct MiningPipeline<'a, E> {
    sorting: CorpusSorter<'a, E>,
    store: &'a ModelStore,
    options: Options,
}

impl<'a, E: UsageExtractor> MiningPipeline<'a, E> {
    pub fn new(
        sorter: &'a UsageSorter,
        store: &'a ModelStore,
        extractor: E,
        options: Options,
        cache_capacity: usize,
    ) -> Self {
        Self {
            sorting: CorpusSorter::new(sorter, extractor, cache_capacity),
            store,
            options,
        }
    }

    pub fn clear_and_sort_usages(
        &self,
        root: &Path,
        only: Option<&GlobMatcher>,
    ) -> Result<SortSummary> {
        self.sorting.clear_and_sort_usages(root, only)
    }

    /// Mine models from the current buckets.
    pub fn mine_models(&self) -> Result<TrainingSummary> {
        ModelTrainer::new(self.sorting.sorter, self.store, self.options)
            .clear_and_mine_models()
    }

    /// Sort the corpus, then mine.
    pub fn run(
        &self,
        root: &Path,
        only: Option<&GlobMatcher>,
    ) -> Result<(SortSummary, TrainingSummary)> {
        let sorted = self.clear_and_sort_usages(root, only)?;
        let trained = self.mine_models()?;
        Ok((sorted, trained))
    }
}

fn log_archive_done(archive: &DiscoveredArchive, total_usages: usize) {
    tracing::debug!(
        archive = %archive.relative_path.display(),
        total_usages,
        "archive sorted"
    );
}

impl<E> std::fmt::Debug for CorpusSorter<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusSorter")
            .field("cache_capacity", &self.cache_capacity)
            .finish_non_exhaustive()
    }
}

impl<E> std::fmt::Debug for MiningPipeline<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiningPipeline")
            .field("options", &self.options)
            .field("sorting", &self.sorting)
            .finish_non_exhaustive()
    }
}
