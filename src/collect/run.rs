//! The collection loop.
//!
//! Candidate state machine: FETCHED → FETCH_FILTERED → DOWNLOADED →
//! FILE_FILTERED → COMPILED → RENDER_FILTERED → PERSISTED, with SKIPPED
//! reachable from every filtering/compile step. Skips clean up temp
//! state and never touch category counters; only a full persist
//! increments exactly one counter.

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::collect::persist::{
    self, base_metadata, extract_tar_gz, persist_instance, remove_empty_partitions,
};
use crate::collect::progress::CategoryProgress;
use crate::collect::{RunConfig, RunSummary, Runner};
use crate::compile::{CompilationResult, CompilerProgress};
use crate::error::CollectError;
use crate::filter::fetch::AFTER_DATE_FILTER;

/// Drive `runner` until every category that has been persisted to at
/// least once reaches `config.num_instances`.
///
/// Transient scrape errors are slept through and retried; exhaustion of
/// the source and persist failures propagate and end the run.
pub async fn run(runner: &mut Runner, config: &RunConfig) -> Result<RunSummary, CollectError> {
    let output_path = config.destination_path.join(&runner.name);
    std::fs::create_dir_all(&output_path)?;

    let tmp_structure = config.tmp_path.join("structure");
    let tmp_images = config.tmp_path.join("images");

    let mut progress = CategoryProgress::new();
    let compiler_progress = CompilerProgress::new();
    let mut downloaded = 0usize;
    let mut compiled = 0usize;

    'collect: while !progress.all_reached(config.num_instances) {
        let batch = match runner.fetcher.scrape(config.batch_size).await {
            Ok(batch) => batch,
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "failed to scrape data, retrying");
                tokio::time::sleep(config.retry_delay).await;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let mut notified_stale_window = false;

        'candidate: for mut scrape_result in batch {
            persist::reset_dirs(&[&config.tmp_path, &tmp_structure, &tmp_images])?;

            // Fetch filters: first rejection short-circuits the chain.
            for filter in &runner.fetch_filters {
                match filter.filter(&scrape_result) {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(
                            filter = filter.name(),
                            instance = %scrape_result.instance_name,
                            "rejected by fetch filter"
                        );
                        // Only a date-boundary rejection implies the
                        // fetcher is producing stale data.
                        if filter.name() == AFTER_DATE_FILTER && !notified_stale_window {
                            runner.fetcher.notify_window_stale();
                            notified_stale_window = true;
                        }
                        continue 'candidate;
                    }
                    Err(e) => {
                        warn!(filter = filter.name(), error = %e, "fetch filter failed");
                        continue 'candidate;
                    }
                }
            }

            let mut metadata = base_metadata(&scrape_result);

            match runner
                .fetcher
                .download(&tmp_structure, &scrape_result)
                .await
            {
                Ok(()) => downloaded += 1,
                Err(e) => {
                    warn!(instance = %scrape_result.instance_name, error = %e, "failed to download data");
                    continue 'candidate;
                }
            }

            // Archives are unpacked in place; the instance keeps its
            // stripped name from here on.
            if let Some(stripped) = scrape_result
                .instance_name
                .strip_suffix(".tar.gz")
                .map(str::to_string)
            {
                let archive = tmp_structure.join(&scrape_result.instance_name);
                if let Err(e) = extract_tar_gz(&archive, &tmp_structure.join(&stripped)) {
                    warn!(instance = %scrape_result.instance_name, error = %e, "failed to extract data");
                    continue 'candidate;
                }
                scrape_result.instance_name = stripped;
            }

            let download_path = tmp_structure.join(&scrape_result.instance_name);

            // File filters: info is recorded for audit regardless of
            // the outcome.
            let mut file_filter_info = Map::new();
            for filter in &runner.file_filters {
                match filter.filter(&download_path).await {
                    Ok((accepted, filter_info)) => {
                        if !filter_info.is_empty() {
                            file_filter_info
                                .insert(filter.name().to_string(), Value::Object(filter_info));
                        }
                        if !accepted {
                            info!(
                                filter = filter.name(),
                                instance = %scrape_result.instance_name,
                                "rejected by file filter"
                            );
                            continue 'candidate;
                        }
                    }
                    Err(e) => {
                        warn!(filter = filter.name(), error = %e, "file filter failed");
                        continue 'candidate;
                    }
                }
            }
            if !file_filter_info.is_empty() {
                metadata.insert("file_filters".to_string(), Value::Object(file_filter_info));
            }

            let (compilation_results, compilation_info) = match runner
                .compiler
                .compile(
                    &download_path,
                    &tmp_images,
                    Some(&scrape_result),
                    &compiler_progress,
                )
                .await
            {
                Ok(output) => {
                    compiled += 1;
                    output
                }
                Err(e) => {
                    warn!(instance = %scrape_result.instance_name, error = %e, "failed to compile data");
                    continue 'candidate;
                }
            };
            if !compilation_info.is_empty() {
                metadata.insert(
                    "compilation_info".to_string(),
                    Value::Object(compilation_info),
                );
            }

            // Rendering filters per produced image; a rejection or
            // filter error drops that image only.
            let mut accepted_results: Vec<CompilationResult> = Vec::new();
            let mut rendering_filter_info = Map::new();
            'image: for compilation_result in compilation_results {
                for filter in &runner.rendering_filters {
                    match filter.check_and_accept_image(&compilation_result.rendering_path) {
                        Ok((true, filter_info)) => {
                            if !filter_info.is_empty() {
                                rendering_filter_info
                                    .insert(filter.name().to_string(), Value::Object(filter_info));
                            }
                        }
                        Ok((false, filter_info)) => {
                            info!(
                                filter = filter.name(),
                                reason = filter_info
                                    .get("reason")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("unspecified"),
                                "rejected by rendering filter"
                            );
                            continue 'image;
                        }
                        Err(e) => {
                            warn!(filter = filter.name(), error = %e, "rendering filter failed");
                            continue 'image;
                        }
                    }
                }
                accepted_results.push(compilation_result);
            }
            if !rendering_filter_info.is_empty() {
                metadata.insert(
                    "rendering_filters".to_string(),
                    Value::Object(rendering_filter_info),
                );
            }

            for compilation_result in accepted_results {
                let persisted =
                    persist_instance(&output_path, &compilation_result, metadata.clone())?;
                let count = progress.record(&persisted.category);
                compiler_progress.acknowledge(&persisted.category);
                info!(
                    instance = %persisted.id,
                    category = %persisted.category,
                    count,
                    quota = config.num_instances,
                    "instance collected"
                );
                if progress.all_reached(config.num_instances) {
                    break 'collect;
                }
            }
        }
    }

    remove_empty_partitions(&output_path, progress.categories())?;

    let summary = RunSummary {
        downloaded,
        compiled,
        collected: progress.snapshot(),
    };
    info!(
        downloaded = summary.downloaded,
        compiled = summary.compiled,
        "scraping complete"
    );
    for (category, count) in &summary.collected {
        info!(category = %category, instances = count, "category total");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::compile::{CompilationInfo, Compiler};
    use crate::error::{CompilationError, DownloadError, ScrapeError};
    use crate::fetch::{Fetcher, ScrapeResult};
    use tempfile::TempDir;

    fn candidate(name: &str) -> ScrapeResult {
        ScrapeResult {
            download_url: format!("https://example.com/{name}"),
            instance_name: name.to_string(),
            date: Utc::now(),
            additional_info: Map::new(),
        }
    }

    /// Fetcher replaying scripted batches, then a terminal error.
    struct ScriptedFetcher {
        batches: Mutex<VecDeque<Vec<ScrapeResult>>>,
        stale_notifications: Arc<AtomicUsize>,
    }

    impl ScriptedFetcher {
        fn new(batches: Vec<Vec<ScrapeResult>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                stale_notifications: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn scrape(&mut self, _count: usize) -> Result<Vec<ScrapeResult>, ScrapeError> {
            match self.batches.lock().unwrap().pop_front() {
                Some(batch) => Ok(batch),
                None => Err(ScrapeError::Exhausted {
                    floor: "2020-01-01".to_string(),
                }),
            }
        }

        async fn download(
            &self,
            destination_path: &Path,
            result: &ScrapeResult,
        ) -> Result<(), DownloadError> {
            std::fs::create_dir_all(destination_path.join(&result.instance_name))?;
            Ok(())
        }

        fn notify_window_stale(&mut self) {
            self.stale_notifications.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Compiler emitting one image per call, with categories cycling
    /// through the given list.
    struct CyclingCompiler {
        categories: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl CyclingCompiler {
        fn new(categories: Vec<&'static str>) -> Self {
            Self {
                categories,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Compiler for CyclingCompiler {
        async fn compile(
            &self,
            _data_path: &Path,
            destination_path: &Path,
            _scrape_result: Option<&ScrapeResult>,
            _progress: &CompilerProgress,
        ) -> Result<(Vec<CompilationResult>, CompilationInfo), CompilationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let category = self.categories[n % self.categories.len()];
            let image_path = destination_path.join(format!("render_{n}.png"));
            image::RgbImage::from_fn(16, 16, |x, y| {
                image::Rgb([(x * 13 + y * 7 + n as u32 * 29) as u8, 50, 90])
            })
            .save(&image_path)
            .map_err(|e| CompilationError::RenderFailed(e.to_string()))?;

            Ok((
                vec![CompilationResult {
                    rendering_path: image_path,
                    category: category.to_string(),
                    data_path: None,
                    text: None,
                    assets_path: Vec::new(),
                }],
                CompilationInfo::new(),
            ))
        }
    }

    fn test_config(dir: &TempDir, num_instances: usize) -> RunConfig {
        RunConfig {
            destination_path: dir.path().join("out"),
            tmp_path: dir.path().join("tmp"),
            num_instances,
            batch_size: 2,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn runner(fetcher: ScriptedFetcher, compiler: CyclingCompiler) -> Runner {
        Runner {
            name: "test".to_string(),
            fetcher: Box::new(fetcher),
            fetch_filters: Vec::new(),
            file_filters: Vec::new(),
            compiler: Box::new(compiler),
            rendering_filters: Vec::new(),
        }
    }

    #[tokio::test]
    async fn terminates_once_every_category_reaches_target() {
        let dir = TempDir::new().unwrap();
        // Four candidates, alternating A/B via the cycling compiler.
        let fetcher = ScriptedFetcher::new(vec![
            vec![candidate("one"), candidate("two")],
            vec![candidate("three"), candidate("four")],
            vec![candidate("five"), candidate("six")],
        ]);
        let mut runner = runner(fetcher, CyclingCompiler::new(vec!["a", "b"]));

        let summary = run(&mut runner, &test_config(&dir, 2)).await.unwrap();
        assert_eq!(summary.collected["a"], 2);
        assert_eq!(summary.collected["b"], 2);
        assert_eq!(summary.downloaded, 4);

        // Both categories were persisted with the expected layout.
        let out = dir.path().join("out/test");
        for category in ["a", "b"] {
            let images = out.join(category).join("images");
            assert_eq!(images.read_dir().unwrap().count(), 2);
            let metadata = out.join(category).join("metadata");
            assert_eq!(metadata.read_dir().unwrap().count(), 2);
        }
    }

    #[tokio::test]
    async fn single_category_source_never_terminates_and_surfaces_exhaustion() {
        let dir = TempDir::new().unwrap();
        // Candidates only ever produce category A and cannot reach the
        // target before the source runs dry: the loop must surface the
        // exhaustion error instead of terminating silently.
        let fetcher = ScriptedFetcher::new(vec![vec![candidate("only")]]);
        let mut runner = runner(fetcher, CyclingCompiler::new(vec!["a"]));

        let err = run(&mut runner, &test_config(&dir, 5)).await.unwrap_err();
        assert!(matches!(
            err,
            CollectError::Scrape(ScrapeError::Exhausted { .. })
        ));
    }

    #[tokio::test]
    async fn unbalanced_categories_block_termination_until_exhaustion() {
        let dir = TempDir::new().unwrap();
        // First candidate produces category A and B alternately, but
        // only two candidates exist: A reaches 1, B reaches 1, target 2
        // is never met for either, so exhaustion must surface rather
        // than silent termination.
        let fetcher = ScriptedFetcher::new(vec![vec![candidate("one"), candidate("two")]]);
        let mut runner = runner(fetcher, CyclingCompiler::new(vec!["a", "b"]));

        let err = run(&mut runner, &test_config(&dir, 2)).await.unwrap_err();
        assert!(matches!(
            err,
            CollectError::Scrape(ScrapeError::Exhausted { .. })
        ));
    }

    #[tokio::test]
    async fn date_boundary_rejection_notifies_fetcher_once_per_batch() {
        use crate::filter::fetch::AfterDateFetchFilter;

        let dir = TempDir::new().unwrap();
        let mut old_batch = vec![candidate("stale1"), candidate("stale2")];
        for result in &mut old_batch {
            result.date = Utc::now() - chrono::Duration::days(400);
        }
        let mut fresh = candidate("fresh");
        fresh.date = Utc::now();

        let fetcher = ScriptedFetcher::new(vec![old_batch, vec![fresh]]);
        let notifications = fetcher.stale_notifications.clone();
        let mut runner = runner(fetcher, CyclingCompiler::new(vec!["a"]));
        runner.fetch_filters.push(Box::new(AfterDateFetchFilter::new(
            Utc::now() - chrono::Duration::days(30),
        )));

        let summary = run(&mut runner, &test_config(&dir, 1)).await.unwrap();
        assert_eq!(summary.collected["a"], 1);
        // Two stale candidates in the first batch, one notification.
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compiler_failure_skips_candidate_not_run() {
        struct FailingOnceCompiler {
            inner: CyclingCompiler,
            failed: AtomicUsize,
        }

        #[async_trait]
        impl Compiler for FailingOnceCompiler {
            async fn compile(
                &self,
                data_path: &Path,
                destination_path: &Path,
                scrape_result: Option<&ScrapeResult>,
                progress: &CompilerProgress,
            ) -> Result<(Vec<CompilationResult>, CompilationInfo), CompilationError> {
                if self.failed.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(CompilationError::RenderFailed("boom".to_string()));
                }
                self.inner
                    .compile(data_path, destination_path, scrape_result, progress)
                    .await
            }
        }

        let dir = TempDir::new().unwrap();
        let fetcher =
            ScriptedFetcher::new(vec![vec![candidate("bad"), candidate("good")]]);
        let mut runner = Runner {
            name: "test".to_string(),
            fetcher: Box::new(fetcher),
            fetch_filters: Vec::new(),
            file_filters: Vec::new(),
            compiler: Box::new(FailingOnceCompiler {
                inner: CyclingCompiler::new(vec!["a"]),
                failed: AtomicUsize::new(0),
            }),
            rendering_filters: Vec::new(),
        };

        let summary = run(&mut runner, &test_config(&dir, 1)).await.unwrap();
        assert_eq!(summary.collected["a"], 1);
        assert_eq!(summary.compiled, 1);
        assert_eq!(summary.downloaded, 2);
    }
}
