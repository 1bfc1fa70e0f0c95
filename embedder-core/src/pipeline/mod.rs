//! Download, trim, normalize and shrink one video, then hand it to a
//! [`Delivery`].
//!
//! Every request runs in its own [`RequestWorkspace`]. Failures abort the
//! request with a single message to the delivery target; the media file is
//! deleted whatever happens.

mod error;
mod request;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::artifact::{ArtifactName, LocateMode, MediaArtifact, StageSuffix, SupersedeError};
use crate::config::Settings;
use crate::cookies::CookieStore;
use crate::tools::{exceeds_upload_limit, ToolError, ToolRunner, TARGET_VIDEO_CODEC};
use crate::workspace::RequestWorkspace;

pub use error::{PipelineError, PipelineResult, UPLOAD_FAILED_MESSAGE};
pub use request::{PipelineRequest, TrimRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Downloading,
    Trimming,
    CodecCheck,
    Transcoding,
    SizeCheck,
    Compressing,
    Ready,
    Delivered,
    Failed,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Where the terminal response of a request goes. A run calls exactly one of
/// the two methods, once.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, file: &Path, file_name: &str) -> Result<(), DeliveryError>;

    async fn report_failure(&self, message: &str) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub request_id: Uuid,
    pub source_url: String,
    pub logical_name: Option<String>,
    pub final_file: Option<String>,
    pub stages: Vec<Stage>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineReport {
    fn new(request_id: Uuid, source_url: impl Into<String>) -> Self {
        Self {
            request_id,
            source_url: source_url.into(),
            logical_name: None,
            final_file: None,
            stages: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(?stage, "entering stage");
        self.stages.push(stage);
    }

    pub fn terminal_stage(&self) -> Option<Stage> {
        self.stages.last().copied()
    }

    pub fn delivered(&self) -> bool {
        self.terminal_stage() == Some(Stage::Delivered)
    }

    pub fn visited(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }
}

#[derive(Clone)]
pub struct Pipeline {
    tools: Arc<dyn ToolRunner>,
    cookies: CookieStore,
    work_root: PathBuf,
    locate_mode: LocateMode,
}

impl Pipeline {
    pub fn new<P: Into<PathBuf>>(
        tools: Arc<dyn ToolRunner>,
        cookies: CookieStore,
        work_root: P,
    ) -> Self {
        Self {
            tools,
            cookies,
            work_root: work_root.into(),
            locate_mode: LocateMode::default(),
        }
    }

    pub fn from_settings(settings: &Settings, tools: Arc<dyn ToolRunner>) -> Self {
        Self::new(
            tools,
            CookieStore::new(&settings.paths.cookies_dir),
            &settings.paths.work_dir,
        )
        .with_locate_mode(settings.pipeline.locate_mode)
    }

    pub fn with_locate_mode(mut self, mode: LocateMode) -> Self {
        self.locate_mode = mode;
        self
    }

    pub fn cookies(&self) -> &CookieStore {
        &self.cookies
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Parses the raw command arguments and runs the request. A malformed
    /// request is reported through `delivery` like any other failure.
    pub async fn handle(
        &self,
        url: &str,
        start: Option<&str>,
        end: Option<&str>,
        delivery: &dyn Delivery,
    ) -> PipelineReport {
        match PipelineRequest::parse(url, start, end) {
            Ok(request) => self.run(&request, delivery).await,
            Err(err) => {
                let mut report = PipelineReport::new(Uuid::new_v4(), url);
                warn!(url, error = %err, "rejected embed request");
                report.error = Some(err.to_string());
                report.stages.push(Stage::Failed);
                report_failure(delivery, &err).await;
                report.finished_at = Some(Utc::now());
                report
            }
        }
    }

    pub async fn run(&self, request: &PipelineRequest, delivery: &dyn Delivery) -> PipelineReport {
        let request_id = Uuid::new_v4();
        let span = info_span!("embed", %request_id, url = %request.url());
        async move {
            let mut report = PipelineReport::new(request_id, request.raw_url());
            match self.process(request, delivery, &mut report).await {
                Ok(()) => {
                    report.stages.push(Stage::Delivered);
                    info!(file = ?report.final_file, "video delivered");
                }
                Err(err) => {
                    report.stages.push(Stage::Failed);
                    warn!(error = %err, "embed request failed");
                    report.error = Some(err.to_string());
                    report_failure(delivery, &err).await;
                }
            }
            report.finished_at = Some(Utc::now());
            report
        }
        .instrument(span)
        .await
    }

    async fn process(
        &self,
        request: &PipelineRequest,
        delivery: &dyn Delivery,
        report: &mut PipelineReport,
    ) -> PipelineResult<()> {
        let workspace = RequestWorkspace::create(&self.work_root)
            .map_err(|err| PipelineError::Workspace(err.to_string()))?;
        let mut artifact = MediaArtifact::with_name(
            ArtifactName::from_url(request.raw_url()),
            request.url().clone(),
            workspace.path(),
            self.locate_mode,
        );
        report.logical_name = Some(artifact.name().to_string());

        let outcome = self.drive(request, &mut artifact, delivery, report).await;

        if artifact.current().is_some() {
            match artifact.release().await {
                Ok(()) => debug!(artifact = %artifact.name(), "deleted video"),
                Err(error) => warn!(artifact = %artifact.name(), %error, "could not delete video"),
            }
        }
        drop(artifact);
        workspace.close();
        outcome
    }

    async fn drive(
        &self,
        request: &PipelineRequest,
        artifact: &mut MediaArtifact,
        delivery: &dyn Delivery,
        report: &mut PipelineReport,
    ) -> PipelineResult<()> {
        let tools = &self.tools;

        report.enter(Stage::Downloading);
        let cookies = self
            .cookies
            .resolve(request.url())
            .map_err(|err| PipelineError::Download(err.to_string()))?;
        info!(
            stage = "download",
            artifact = %artifact.name(),
            cookies = ?cookies,
            "downloading video"
        );
        tools
            .fetch(
                request.url(),
                artifact.dir(),
                &artifact.name().to_string(),
                cookies.as_deref(),
            )
            .await
            .map_err(|err| PipelineError::Download(err.detail().to_string()))?;
        artifact
            .materialize()
            .await
            .map_err(|err| PipelineError::Download(err.to_string()))?;

        if let Some(range) = request.trim() {
            report.enter(Stage::Trimming);
            info!(stage = "trim", artifact = %artifact.name(), start = %range.start, end = %range.end, "trimming video");
            artifact
                .supersede(StageSuffix::Trim, |input, output| async move {
                    tools.trim(&input, &output, &range.start, &range.end).await
                })
                .await
                .map_err(|err| PipelineError::Trim(supersede_detail(err)))?;
        }

        report.enter(Stage::CodecCheck);
        let current = current_path(artifact)?;
        match tools.probe_codec(&current).await {
            Ok(codec) if codec != TARGET_VIDEO_CODEC => {
                report.enter(Stage::Transcoding);
                info!(stage = "convert", artifact = %artifact.name(), %codec, "converting video");
                artifact
                    .supersede(StageSuffix::Convert, |input, output| async move {
                        tools.transcode_to_h264(&input, &output).await
                    })
                    .await
                    .map_err(|err| PipelineError::Convert(supersede_detail(err)))?;
            }
            Ok(codec) => debug!(%codec, "video already uses the target codec"),
            Err(error) => warn!(%error, "could not get codec, keeping video as is"),
        }

        report.enter(Stage::SizeCheck);
        let current = current_path(artifact)?;
        match fs::metadata(&current).await {
            Ok(metadata) if exceeds_upload_limit(metadata.len()) => {
                report.enter(Stage::Compressing);
                info!(
                    stage = "compress",
                    artifact = %artifact.name(),
                    size_bytes = metadata.len(),
                    "compressing video"
                );
                let duration_seconds = tools
                    .probe_duration_seconds(&current)
                    .await
                    .map_err(|err| PipelineError::Compress(err.to_string()))?;
                artifact
                    .supersede(StageSuffix::Compress, |input, output| async move {
                        tools
                            .compress_to_budget(&input, &output, duration_seconds)
                            .await
                    })
                    .await
                    .map_err(|err| PipelineError::Compress(supersede_detail(err)))?;
            }
            Ok(metadata) => debug!(size_bytes = metadata.len(), "video fits the upload limit"),
            Err(error) => warn!(%error, "could not get file info, skipping compression"),
        }

        report.enter(Stage::Ready);
        let file = artifact
            .current()
            .cloned()
            .ok_or_else(|| PipelineError::Upload("no video file to upload".into()))?;
        info!(stage = "deliver", file = %file.file_name, "responding with video");
        delivery
            .deliver(&file.path, &file.file_name)
            .await
            .map_err(|err| PipelineError::Upload(err.to_string()))?;
        report.final_file = Some(file.file_name);
        Ok(())
    }
}

fn current_path(artifact: &MediaArtifact) -> PipelineResult<PathBuf> {
    artifact
        .current_path()
        .map(Path::to_path_buf)
        .map_err(|err| PipelineError::Download(err.to_string()))
}

fn supersede_detail(err: SupersedeError<ToolError>) -> String {
    match err {
        SupersedeError::Transform(err) => err.detail().to_string(),
        SupersedeError::Artifact(err) => err.to_string(),
    }
}

async fn report_failure(delivery: &dyn Delivery, err: &PipelineError) {
    if let Err(error) = delivery.report_failure(&err.user_message()).await {
        warn!(%error, "could not respond to interaction");
    }
}
