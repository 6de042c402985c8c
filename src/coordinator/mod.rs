// Job coordinator: the single authority over job lifecycle.
//
// At most one runner is active per process; entrypoints fail fast with a
// busy error instead of queueing. Progress is fanned out over a broadcast
// channel so any number of read-only subscribers see every event in order.

mod runner;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::TranscribeConfig;
use crate::editor;
use crate::error::{Error, Result};
use crate::fallback::{FallbackEngine, SpeechRecognizer, WhisperCliRecognizer};
use crate::hashing::sha256_file;
use crate::models::{JobResult, JobStatus, SpeakerRoleConfig};
use crate::paths::is_supported_media;
use crate::progress::{ProgressEvent, Stage};
use crate::remote::{RemoteEngine, TranscriptionTransport};
use crate::store::Store;

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Builder for a [`Coordinator`]; engines can be swapped out at the seams.
pub struct CoordinatorBuilder {
    store: Arc<Store>,
    config: TranscribeConfig,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    transport: Option<Arc<dyn TranscriptionTransport>>,
}

impl CoordinatorBuilder {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            config: TranscribeConfig::default(),
            recognizer: None,
            transport: None,
        }
    }

    pub fn config(mut self, config: TranscribeConfig) -> Self {
        self.config = config;
        self
    }

    /// Local recognizer backing the fallback engine.
    pub fn recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Replace the HTTP transport of the remote engine.
    pub fn transport(mut self, transport: Arc<dyn TranscriptionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Coordinator {
        let recognizer = self.recognizer.unwrap_or_else(|| {
            Arc::new(WhisperCliRecognizer::new(
                "whisper-cli",
                self.store.paths().root().join("models/ggml-base.bin"),
                Some(self.config.language.clone()),
            ))
        });
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);

        Coordinator {
            store: self.store,
            config: self.config,
            fallback: Arc::new(FallbackEngine::new(recognizer)),
            transport: self.transport,
            active: Arc::new(AtomicBool::new(false)),
            progress_tx,
        }
    }
}

/// Drives jobs from source file to final transcript.
pub struct Coordinator {
    store: Arc<Store>,
    config: TranscribeConfig,
    fallback: Arc<FallbackEngine>,
    transport: Option<Arc<dyn TranscriptionTransport>>,
    active: Arc<AtomicBool>,
    progress_tx: broadcast::Sender<ProgressEvent>,
}

/// Releases the single-job slot when the runner finishes, however it exits.
struct ActiveGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl Coordinator {
    pub fn builder(store: Arc<Store>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(store)
    }

    /// Whether a job runner is currently active.
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Subscribe to progress events. Every subscriber receives every event
    /// in emission order.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// Start a new job for a source file. Refuses while another job runs.
    pub async fn start_job(
        &self,
        source: &Path,
        api_key: Option<&str>,
        use_remote: bool,
        roles: SpeakerRoleConfig,
    ) -> Result<String> {
        let guard = self.acquire_slot()?;

        let result = self.prepare_job(source, api_key, use_remote, roles).await;
        let (job_id, remote) = match result {
            Ok(prepared) => prepared,
            Err(e) => {
                drop(guard);
                return Err(e);
            }
        };

        self.spawn_runner(job_id.clone(), remote, roles, false, guard);
        Ok(job_id)
    }

    /// Resume the most recent auto-resumable job, if any.
    pub async fn resume_latest(&self, api_key: Option<&str>, use_remote: bool) -> Result<Option<String>> {
        let guard = self.acquire_slot()?;

        let remote = match self.build_remote(api_key, use_remote) {
            Ok(remote) => remote,
            Err(e) => {
                drop(guard);
                return Err(e);
            }
        };

        let job = match self.store.latest_auto_resumable_job() {
            Ok(Some(job)) => job,
            Ok(None) => {
                drop(guard);
                return Ok(None);
            }
            Err(e) => {
                drop(guard);
                return Err(e);
            }
        };

        log::info!("Resuming job {} from status {:?}", job.id, job.status);
        let roles = SpeakerRoleConfig::new(job.interviewer_count, job.participant_count);
        let job_id = job.id.clone();
        self.spawn_runner(job_id.clone(), remote, roles, true, guard);
        Ok(Some(job_id))
    }

    /// Flip I and D on every final segment of a job.
    pub fn swap_roles(&self, job_id: &str) -> Result<JobResult> {
        if self.store.get_job(job_id)?.is_none() {
            return Err(Error::ParsingFailed("Job findes ikke".to_string()));
        }
        self.store.toggle_swap_roles(job_id)?;
        self.store
            .read_job_result(job_id)?
            .ok_or_else(|| Error::ParsingFailed("Kunne ikke indlæse slutresultat".to_string()))
    }

    /// Replace the final transcript with edited editor text.
    pub fn update_transcript(&self, job_id: &str, editor_text: &str) -> Result<JobResult> {
        if self.store.get_job(job_id)?.is_none() {
            return Err(Error::ParsingFailed("Job findes ikke".to_string()));
        }

        let prior = self.store.get_transcript(job_id)?;
        let updated = editor::parse_editor_text(editor_text, &prior)?;
        self.store
            .set_final_transcript(job_id, &updated, JobStatus::Ready)?;
        self.store
            .read_job_result(job_id)?
            .ok_or_else(|| Error::ParsingFailed("Kunne ikke indlæse opdateret resultat".to_string()))
    }

    /// Read-only job result accessor.
    pub fn job_result(&self, job_id: &str) -> Result<Option<JobResult>> {
        self.store.read_job_result(job_id)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn acquire_slot(&self) -> Result<ActiveGuard> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }
        Ok(ActiveGuard {
            flag: self.active.clone(),
        })
    }

    async fn prepare_job(
        &self,
        source: &Path,
        api_key: Option<&str>,
        use_remote: bool,
        roles: SpeakerRoleConfig,
    ) -> Result<(String, Option<Arc<RemoteEngine>>)> {
        let remote = self.build_remote(api_key, use_remote)?;

        if !source.exists() {
            return Err(Error::SourceMissing(source.to_path_buf()));
        }
        if !is_supported_media(source) {
            return Err(Error::ParsingFailed(format!(
                "Filformatet understøttes ikke: {:?}",
                source
            )));
        }

        let source_hash = sha256_file(source)?;
        let job_id = uuid::Uuid::new_v4().to_string();

        // Copy the original into the job directory so deleting the user's
        // file cannot invalidate a resumable job.
        self.store.paths().ensure_job_dirs(&job_id)?;
        let copied = self.store.paths().source_copy_path(&job_id, source);
        std::fs::copy(source, &copied)?;

        let source_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("source-audio")
            .to_string();
        self.store.create_job(
            &job_id,
            &copied.to_string_lossy(),
            &source_name,
            &source_hash,
            roles,
        )?;

        self.emit(ProgressEvent::new(
            &job_id,
            JobStatus::Queued,
            Stage::Upload,
            1.0,
            None,
            0,
            0,
            "Kildefil kopieret til jobmappe",
        ));

        Ok((job_id, remote))
    }

    fn build_remote(&self, api_key: Option<&str>, use_remote: bool) -> Result<Option<Arc<RemoteEngine>>> {
        if !use_remote {
            return Ok(None);
        }

        if let Some(transport) = &self.transport {
            return Ok(Some(Arc::new(RemoteEngine::new(
                transport.clone(),
                self.config.clone(),
            ))));
        }

        let key = api_key.map(str::trim).filter(|k| !k.is_empty());
        match key {
            Some(key) => Ok(Some(Arc::new(RemoteEngine::with_http(
                self.config.clone(),
                key,
            )?))),
            None => Err(Error::ApiKeyMissing),
        }
    }

    fn spawn_runner(
        &self,
        job_id: String,
        remote: Option<Arc<RemoteEngine>>,
        roles: SpeakerRoleConfig,
        resume: bool,
        guard: ActiveGuard,
    ) {
        let ctx = runner::RunnerCtx {
            store: self.store.clone(),
            config: self.config.clone(),
            remote,
            fallback: self.fallback.clone(),
            progress: self.progress_tx.clone(),
            roles,
        };

        tokio::spawn(async move {
            runner::run_job(ctx, job_id, resume).await;
            drop(guard);
        });
    }

    fn emit(&self, event: ProgressEvent) {
        let _ = self.progress_tx.send(event);
    }
}
