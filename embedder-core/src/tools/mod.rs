mod budget;
mod error;

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use crate::config::ToolsSection;
use crate::error::ConfigError;

pub use budget::{
    exceeds_upload_limit, parse_duration_ceiling, BitrateBudget, COMPRESS_AUDIO_BITRATE,
    MAX_UPLOAD_BYTES, TARGET_SIZE_BITS, TRANSCODE_AUDIO_BITRATE,
};
pub use error::{ToolError, ToolResult};

/// Codec every delivered file ends up with.
pub const TARGET_VIDEO_CODEC: &str = "h264";

const STDERR_TAIL_LINES: usize = 8;

/// The media operations the pipeline needs. Transform adapters return the
/// exact path they wrote.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Downloads `url` into `dir` as `<name>.<ext>`; the extension is chosen by
    /// the fetch tool.
    async fn fetch(
        &self,
        url: &Url,
        dir: &Path,
        name: &str,
        cookies: Option<&Path>,
    ) -> ToolResult<()>;

    async fn probe_codec(&self, input: &Path) -> ToolResult<String>;

    async fn probe_duration_seconds(&self, input: &Path) -> ToolResult<u64>;

    async fn transcode_to_h264(&self, input: &Path, output: &Path) -> ToolResult<PathBuf>;

    async fn trim(&self, input: &Path, output: &Path, start: &str, end: &str)
        -> ToolResult<PathBuf>;

    async fn compress_to_budget(
        &self,
        input: &Path,
        output: &Path,
        duration_seconds: u64,
    ) -> ToolResult<PathBuf>;
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor {
    timeout: Option<Duration>,
}

impl SystemCommandExecutor {
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> io::Result<Output> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match self.timeout {
            Some(limit) => timeout(limit, command.output()).await.map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("timed out after {}s", limit.as_secs()),
                )
            })?,
            None => command.output().await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    pub fn resolve(section: &ToolsSection) -> Result<Self, ConfigError> {
        Ok(Self {
            yt_dlp: locate(&section.yt_dlp)?,
            ffmpeg: locate(&section.ffmpeg)?,
            ffprobe: locate(&section.ffprobe)?,
        })
    }
}

/// Resolves one program against `PATH`, or checks it directly when a path is
/// given.
pub fn locate(program: &Path) -> Result<PathBuf, ConfigError> {
    which::which(program).map_err(|_| ConfigError::ToolMissing {
        tool: program.display().to_string(),
    })
}

/// Runs yt-dlp, ffprobe and ffmpeg with the fixed argument templates.
pub struct SystemToolRunner {
    paths: ToolPaths,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for SystemToolRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemToolRunner")
            .field("paths", &self.paths)
            .finish()
    }
}

impl SystemToolRunner {
    pub fn new(paths: ToolPaths, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor::default()));
        Self { paths, executor }
    }

    pub fn from_settings(section: &ToolsSection) -> Result<Self, ConfigError> {
        let paths = ToolPaths::resolve(section)?;
        let executor = Arc::new(SystemCommandExecutor::with_timeout(section.timeout()));
        Ok(Self::new(paths, Some(executor)))
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    /// Runs the command and returns stdout, or the failure text.
    async fn execute(&self, mut command: Command) -> Result<Vec<u8>, String> {
        let program = command.as_std().get_program().to_string_lossy().to_string();
        debug!(program = %program, args = ?command.as_std().get_args().collect::<Vec<_>>(), "running external tool");
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|err| format!("could not run {program}: {err}"))?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(failure_detail(&program, &output))
        }
    }

    async fn probe(&self, input: &Path, entry: &str, video_only: bool) -> ToolResult<String> {
        let mut command = Command::new(&self.paths.ffprobe);
        command.arg("-v").arg("error");
        if video_only {
            command.arg("-select_streams").arg("v:0");
        }
        command
            .arg("-show_entries")
            .arg(entry)
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(input);
        let stdout = self
            .execute(command)
            .await
            .map_err(ToolError::ProbeFailed)?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn fetch(
        &self,
        url: &Url,
        dir: &Path,
        name: &str,
        cookies: Option<&Path>,
    ) -> ToolResult<()> {
        let mut command = Command::new(&self.paths.yt_dlp);
        command.arg("-o").arg(dir.join(format!("{name}.%(ext)s")));
        if let Some(cookies) = cookies {
            command.arg("--cookies").arg(cookies);
        }
        command.arg(url.as_str());
        self.execute(command)
            .await
            .map(|_| ())
            .map_err(ToolError::DownloadFailed)
    }

    async fn probe_codec(&self, input: &Path) -> ToolResult<String> {
        let codec = self.probe(input, "stream=codec_name", true).await?;
        if codec.is_empty() {
            return Err(ToolError::ProbeFailed(format!(
                "no video stream in {}",
                input.display()
            )));
        }
        Ok(codec)
    }

    async fn probe_duration_seconds(&self, input: &Path) -> ToolResult<u64> {
        let raw = self.probe(input, "format=duration", false).await?;
        parse_duration_ceiling(&raw)
            .ok_or_else(|| ToolError::ProbeFailed(format!("unparseable duration {raw:?}")))
    }

    async fn transcode_to_h264(&self, input: &Path, output: &Path) -> ToolResult<PathBuf> {
        let mut command = Command::new(&self.paths.ffmpeg);
        command
            .arg("-i")
            .arg(input)
            .arg("-c:v")
            .arg("libx264")
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg(TRANSCODE_AUDIO_BITRATE)
            .arg(output);
        self.execute(command)
            .await
            .map_err(ToolError::TranscodeFailed)?;
        Ok(output.to_path_buf())
    }

    async fn trim(
        &self,
        input: &Path,
        output: &Path,
        start: &str,
        end: &str,
    ) -> ToolResult<PathBuf> {
        let mut command = Command::new(&self.paths.ffmpeg);
        command
            .arg("-ss")
            .arg(start)
            .arg("-to")
            .arg(end)
            .arg("-i")
            .arg(input)
            .arg(output);
        self.execute(command).await.map_err(ToolError::TrimFailed)?;
        Ok(output.to_path_buf())
    }

    async fn compress_to_budget(
        &self,
        input: &Path,
        output: &Path,
        duration_seconds: u64,
    ) -> ToolResult<PathBuf> {
        let budget = BitrateBudget::for_duration(duration_seconds).ok_or_else(|| {
            ToolError::CompressFailed(format!(
                "duration {duration_seconds}s leaves no video bitrate budget"
            ))
        })?;
        let mut command = Command::new(&self.paths.ffmpeg);
        command
            .arg("-i")
            .arg(input)
            .arg("-b:v")
            .arg(budget.video_bitrate.to_string())
            .arg("-maxrate:v")
            .arg(budget.video_bitrate.to_string())
            .arg("-bufsize:v")
            .arg(budget.buffer_size.to_string())
            .arg("-b:a")
            .arg(budget.audio_bitrate.to_string())
            .arg(output);
        self.execute(command)
            .await
            .map_err(ToolError::CompressFailed)?;
        Ok(output.to_path_buf())
    }
}

fn failure_detail(program: &str, output: &Output) -> String {
    let name = Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string());
    let status = match output.status.code() {
        Some(code) => format!("{name} exited with status {code}"),
        None => format!("{name} was terminated by a signal"),
    };
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return status;
    }
    let tail = &lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..];
    format!("{status}: {}", tail.join("\n"))
}
