use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{ConfigError, ExtractError, FetchError};
use crate::extract::{self, PageRecords};
use crate::fetcher::{fetch_with_retry, AbortHandle, Fetch, RetryPolicy};
use crate::store::{DetailTarget, RecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ListPhase,
    DetailPhase,
    Done,
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot start {requested:?} from {current:?}")]
    PhaseOrder { current: Phase, requested: Phase },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Retry budget spent or a non-retryable HTTP failure.
    Fetch,
    /// Fetched, but the page layout did not match its schema.
    Structure,
}

#[derive(Debug, Clone)]
pub struct PageFailure {
    pub url: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl PageFailure {
    fn fetch(e: FetchError) -> Self {
        PageFailure { url: e.url.clone(), kind: FailureKind::Fetch, reason: e.to_string() }
    }

    fn structure(url: &str, e: ExtractError) -> Self {
        PageFailure { url: url.to_string(), kind: FailureKind::Structure, reason: e.to_string() }
    }
}

#[derive(Debug, Default)]
pub struct CrawlReport {
    pub list_attempts: usize,
    pub detail_attempts: usize,
    pub pages_ok: usize,
    pub failures: Vec<PageFailure>,
    pub skipped_rows: usize,
    /// Cells that lost non-ASCII characters.
    pub degraded_cells: usize,
    pub aborted: bool,
    pub elapsed: Duration,
}

enum PageOutcome<T> {
    Extracted(PageRecords<T>),
    Failed(PageFailure),
    /// Run aborted before this page's fetch started.
    NotScheduled,
}

struct Job<M> {
    seq: usize,
    url: String,
    meta: M,
}

/// Drives the two-phase crawl and owns the store for its lifetime.
pub struct Crawler<F: Fetch> {
    fetcher: Arc<F>,
    settings: Settings,
    policy: RetryPolicy,
    abort: AbortHandle,
    phase: Phase,
    store: RecordStore,
    report: CrawlReport,
    started: Option<Instant>,
    show_progress: bool,
}

impl<F: Fetch> Crawler<F> {
    /// Rejects invalid settings before anything touches the network.
    pub fn new(fetcher: Arc<F>, settings: Settings) -> Result<Self, CrawlError> {
        settings.validate()?;
        let policy = settings.retry_policy();
        Ok(Crawler {
            fetcher,
            settings,
            policy,
            abort: AbortHandle::new(),
            phase: Phase::Idle,
            store: RecordStore::new(),
            report: CrawlReport::default(),
            started: None,
            show_progress: false,
        })
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Both phases in order, then hand back the store and report.
    pub async fn run(mut self) -> Result<(RecordStore, CrawlReport), CrawlError> {
        self.run_list_phase().await?;
        self.run_detail_phase().await?;
        Ok(self.finish())
    }

    fn enter(&mut self, from: Phase, to: Phase) -> Result<(), CrawlError> {
        if self.phase != from {
            return Err(CrawlError::PhaseOrder { current: self.phase, requested: to });
        }
        self.phase = to;
        self.started.get_or_insert_with(Instant::now);
        Ok(())
    }

    /// Fetch every list page in range and merge municipalities. Results are
    /// merged in page order once all pages are in, so a key seen on several
    /// pages keeps the value from the highest page number.
    pub async fn run_list_phase(&mut self) -> Result<(), CrawlError> {
        self.enter(Phase::Idle, Phase::ListPhase)?;
        info!(
            first = self.settings.first_page,
            last = self.settings.last_page,
            "downloading municipality metadata"
        );

        let jobs: Vec<Job<u32>> = self
            .settings
            .pages()
            .enumerate()
            .map(|(seq, page)| Job { seq, url: self.settings.list_url(page), meta: page })
            .collect();

        let pb = self.progress_bar(jobs.len(), "list pages");
        let mut rx = self.spawn_pages(jobs, |body, _| extract::municipalities(body));

        let mut arrived = BTreeMap::new();
        while let Some((job, outcome)) = rx.recv().await {
            pb.inc(1);
            arrived.insert(job.seq, (job, outcome));
        }
        pb.finish_and_clear();

        for (job, outcome) in arrived.into_values() {
            let page = match self.account(&job.url, outcome, Phase::ListPhase) {
                Some(page) => page,
                None => continue,
            };
            info!(
                page = job.meta,
                municipalities = page.records.len(),
                skipped = page.skipped.len(),
                "list page parsed"
            );
            for record in page.records {
                let key = record.key();
                if self.store.upsert_municipality(record) {
                    debug!(municipality = %key, page = job.meta, "duplicate key, later page wins");
                }
            }
        }

        self.phase = Phase::DetailPhase;
        Ok(())
    }

    /// Fetch one detail page per municipality known after the list phase.
    pub async fn run_detail_phase(&mut self) -> Result<(), CrawlError> {
        if self.phase != Phase::DetailPhase {
            return Err(CrawlError::PhaseOrder {
                current: self.phase,
                requested: Phase::DetailPhase,
            });
        }
        let targets = self.store.detail_targets();
        info!(municipalities = targets.len(), "downloading barangay data");

        let jobs: Vec<Job<DetailTarget>> = targets
            .into_iter()
            .enumerate()
            .map(|(seq, t)| Job { seq, url: self.settings.detail_url(&t.href), meta: t })
            .collect();

        let pb = self.progress_bar(jobs.len(), "detail pages");
        let mut rx = self.spawn_pages(jobs, |body, target: &DetailTarget| {
            extract::barangays(body, &target.muni_name)
        });

        while let Some((job, outcome)) = rx.recv().await {
            pb.inc(1);
            let page = match self.account(&job.url, outcome, Phase::DetailPhase) {
                Some(page) => page,
                None => continue,
            };
            debug!(
                municipality = %job.meta.key,
                barangays = page.records.len(),
                "detail page parsed"
            );
            for record in page.records {
                self.store.insert_barangay(&job.meta.key, record);
            }
        }
        pb.finish_and_clear();

        self.phase = Phase::Done;
        Ok(())
    }

    pub fn finish(mut self) -> (RecordStore, CrawlReport) {
        self.report.aborted = self.abort.is_aborted();
        self.report.elapsed = self.started.map(|t| t.elapsed()).unwrap_or_default();
        (self.store, self.report)
    }

    /// Update the report for one page outcome; hands back extracted records.
    fn account<T>(&mut self, url: &str, outcome: PageOutcome<T>, phase: Phase) -> Option<PageRecords<T>> {
        match outcome {
            PageOutcome::NotScheduled => None,
            PageOutcome::Failed(failure) => {
                self.count_attempt(phase);
                warn!(url = %failure.url, kind = ?failure.kind, "page skipped: {}", failure.reason);
                self.report.failures.push(failure);
                None
            }
            PageOutcome::Extracted(page) => {
                self.count_attempt(phase);
                self.report.pages_ok += 1;
                self.report.skipped_rows += page.skipped.len();
                self.report.degraded_cells += page.degraded;
                if !page.skipped.is_empty() {
                    debug!(url, skipped = page.skipped.len(), "rows skipped");
                }
                Some(page)
            }
        }
    }

    fn count_attempt(&mut self, phase: Phase) {
        match phase {
            Phase::ListPhase => self.report.list_attempts += 1,
            _ => self.report.detail_attempts += 1,
        }
    }

    /// Fetch and extract every job on a bounded pool. Outcomes come back on
    /// the returned channel; the caller is the only writer to the store.
    fn spawn_pages<M, T, X>(&self, jobs: Vec<Job<M>>, parse_page: X) -> mpsc::Receiver<(Job<M>, PageOutcome<T>)>
    where
        M: Send + 'static,
        T: Send + 'static,
        X: Fn(&[u8], &M) -> Result<PageRecords<T>, ExtractError> + Send + Sync + 'static,
    {
        let concurrency = self.settings.concurrency;
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let parse_page = Arc::new(parse_page);
        let (tx, rx) = mpsc::channel(concurrency * 2);

        for job in jobs {
            let fetcher = Arc::clone(&self.fetcher);
            let sem = Arc::clone(&semaphore);
            let parse_page = Arc::clone(&parse_page);
            let policy = self.policy.clone();
            let abort = self.abort.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let _permit = sem.acquire().await;
                let outcome = if abort.is_aborted() {
                    PageOutcome::NotScheduled
                } else {
                    match fetch_with_retry(fetcher.as_ref(), &job.url, &policy, &abort).await {
                        Ok(body) => match parse_page(&body[..], &job.meta) {
                            Ok(page) => PageOutcome::Extracted(page),
                            Err(e) => PageOutcome::Failed(PageFailure::structure(&job.url, e)),
                        },
                        Err(e) => PageOutcome::Failed(PageFailure::fetch(e)),
                    }
                };
                let _ = tx.send((job, outcome)).await;
            });
        }

        rx
    }

    fn progress_bar(&self, len: usize, label: &'static str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg} ({per_sec}, eta {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(label);
        pb
    }
}
