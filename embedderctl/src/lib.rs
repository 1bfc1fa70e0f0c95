pub mod discord;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use embedder_core::config::{self, CREDENTIALS_FILE, SETTINGS_FILE};
use embedder_core::cookies::{CookieError, CookieFile, CookieStore};
use embedder_core::pipeline::{Delivery, DeliveryError, Pipeline, PipelineReport};
use embedder_core::tools::{locate, SystemToolRunner, ToolRunner};
use embedder_core::Settings;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] embedder_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cookie store error: {0}")]
    Cookies(#[from] CookieError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("discord error: {0}")]
    Discord(#[from] serenity::Error),
    #[error("{0}")]
    Embed(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Discord video embedder", long_about = None)]
pub struct Cli {
    /// Path to embedder.toml (defaults to the user config directory)
    #[arg(long)]
    pub settings: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to Discord and serve /embed
    Run,
    /// Run the pipeline locally and copy the result into a directory
    Embed(EmbedArgs),
    /// Check tools, credentials and directories
    Health,
    /// Manage per-domain cookie files
    #[command(subcommand)]
    Cookies(CookieCommands),
}

#[derive(Args, Debug)]
pub struct EmbedArgs {
    /// URL of the video to embed
    pub url: String,
    /// Start time, e.g. 01:30
    #[arg(long)]
    pub start: Option<String>,
    /// End time, e.g. 02:00
    #[arg(long)]
    pub end: Option<String>,
    /// Directory receiving the finished file
    #[arg(long, default_value = ".")]
    pub output: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum CookieCommands {
    /// List stored cookie files
    List,
    /// Copy a Netscape cookie file into the store
    Add(CookieAddArgs),
}

#[derive(Args, Debug)]
pub struct CookieAddArgs {
    /// Cookie file; its name must contain the site's domain
    pub file: PathBuf,
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Run => context.serve().await?,
        Commands::Embed(args) => {
            let outcome = context.embed(args).await?;
            render(&outcome.report, cli.format)?;
            if !outcome.report.delivered() {
                return Err(AppError::Embed(
                    outcome
                        .failure
                        .unwrap_or_else(|| "embed request failed".to_string()),
                ));
            }
        }
        Commands::Health => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
        Commands::Cookies(CookieCommands::List) => {
            let list = CookieList {
                rows: context.cookie_store().list()?,
            };
            render(&list, cli.format)?;
        }
        Commands::Cookies(CookieCommands::Add(args)) => {
            let saved = context.cookie_add(args).await?;
            render(&saved, cli.format)?;
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    settings: Settings,
    settings_path: PathBuf,
    config_dir: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_dir = match &cli.settings {
            Some(path) => path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            None => config::config_dir()?,
        };
        let settings_path = cli
            .settings
            .clone()
            .unwrap_or_else(|| config_dir.join(SETTINGS_FILE));
        let settings = config::load_settings_or_default(&settings_path)?;
        Ok(Self {
            settings,
            settings_path,
            config_dir,
        })
    }

    fn cookie_store(&self) -> CookieStore {
        CookieStore::new(&self.settings.paths.cookies_dir)
    }

    fn pipeline(&self) -> Result<Pipeline> {
        let tools: Arc<dyn ToolRunner> =
            Arc::new(SystemToolRunner::from_settings(&self.settings.tools)?);
        Ok(Pipeline::from_settings(&self.settings, tools))
    }

    async fn serve(&self) -> Result<()> {
        let pipeline = self.pipeline()?;
        self.cookie_store().ensure_dir()?;
        let env_path = config::ensure_credentials_file(&self.config_dir)?;
        let credentials = config::load_credentials(&env_path)?;
        info!(
            application_id = credentials.application_id,
            work_dir = %self.settings.paths.work_dir.display(),
            cookies_dir = %self.settings.paths.cookies_dir.display(),
            "starting bot"
        );
        discord::serve(&credentials, pipeline).await?;
        Ok(())
    }

    async fn embed(&self, args: &EmbedArgs) -> Result<EmbedOutcome> {
        let pipeline = self.pipeline()?;
        fs::create_dir_all(&args.output)?;
        let delivery = LocalDelivery::new(&args.output);
        let report = pipeline
            .handle(
                &args.url,
                args.start.as_deref(),
                args.end.as_deref(),
                &delivery,
            )
            .await;
        Ok(EmbedOutcome {
            report,
            failure: delivery.failure(),
        })
    }

    async fn cookie_add(&self, args: &CookieAddArgs) -> Result<CookieSaved> {
        let file_name = args
            .file
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| AppError::MissingResource(format!("{}", args.file.display())))?;
        let contents = tokio::fs::read(&args.file).await?;
        let path = self.cookie_store().save(&file_name, &contents).await?;
        Ok(CookieSaved {
            path,
            size_bytes: contents.len() as u64,
        })
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = Vec::new();
        results.push(self.check_settings());
        results.push(self.check_credentials());
        let tools = &self.settings.tools;
        for (name, program) in [
            ("yt-dlp", &tools.yt_dlp),
            ("ffmpeg", &tools.ffmpeg),
            ("ffprobe", &tools.ffprobe),
        ] {
            results.push(match locate(program) {
                Ok(path) => HealthEntry::ok(name, format!("{}", path.display())),
                Err(err) => HealthEntry::error(name, err.to_string()),
            });
        }
        results.push(check_directory("work_dir", &self.settings.paths.work_dir));
        results.push(check_directory(
            "cookies_dir",
            &self.settings.paths.cookies_dir,
        ));
        results
    }

    fn check_settings(&self) -> HealthEntry {
        if self.settings_path.exists() {
            HealthEntry::ok(SETTINGS_FILE, format!("{}", self.settings_path.display()))
        } else {
            HealthEntry::warn(
                SETTINGS_FILE,
                format!("{} not found, using defaults", self.settings_path.display()),
            )
        }
    }

    fn check_credentials(&self) -> HealthEntry {
        let path = self.config_dir.join(CREDENTIALS_FILE);
        if !path.exists() {
            return HealthEntry::error(
                CREDENTIALS_FILE,
                format!("{} not found", path.display()),
            );
        }
        match config::load_credentials(&path) {
            Ok(credentials) => HealthEntry::ok(
                CREDENTIALS_FILE,
                format!("application {}", credentials.application_id),
            ),
            Err(err) => HealthEntry::error(CREDENTIALS_FILE, err.to_string()),
        }
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::error(name, format!("{} is not a directory", path.display())),
        Err(_) => HealthEntry::warn(
            name,
            format!("{} not found, created on first use", path.display()),
        ),
    }
}

/// Copies the finished file into a local directory instead of uploading it.
struct LocalDelivery {
    output_dir: PathBuf,
    failure: Mutex<Option<String>>,
}

impl LocalDelivery {
    fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            failure: Mutex::new(None),
        }
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|failure| failure.clone())
    }
}

#[async_trait]
impl Delivery for LocalDelivery {
    async fn deliver(
        &self,
        file: &Path,
        file_name: &str,
    ) -> std::result::Result<(), DeliveryError> {
        let target = self.output_dir.join(file_name);
        tokio::fs::copy(file, &target)
            .await
            .map_err(|source| DeliveryError::Io {
                source,
                path: target.clone(),
            })?;
        info!(path = %target.display(), "saved video");
        Ok(())
    }

    async fn report_failure(&self, message: &str) -> std::result::Result<(), DeliveryError> {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(message.to_string());
        }
        Ok(())
    }
}

struct EmbedOutcome {
    report: PipelineReport,
    failure: Option<String>,
}

impl DisplayFallback for PipelineReport {
    fn display(&self) -> String {
        let stages: Vec<String> = self
            .stages
            .iter()
            .map(|stage| format!("{stage:?}").to_lowercase())
            .collect();
        let mut lines = vec![
            format!("request: {}", self.request_id),
            format!("url: {}", self.source_url),
            format!("stages: {}", stages.join(" -> ")),
        ];
        if let Some(file) = &self.final_file {
            lines.push(format!("file: {file}"));
        }
        if let Some(error) = &self.error {
            lines.push(format!("error: {error}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct CookieList {
    pub rows: Vec<CookieFile>,
}

impl DisplayFallback for CookieList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "no cookie files".to_string();
        }
        self.rows
            .iter()
            .map(|row| format!("{} ({} bytes)", row.name, row.size_bytes))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct CookieSaved {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl DisplayFallback for CookieSaved {
    fn display(&self) -> String {
        format!("saved {} ({} bytes)", self.path.display(), self.size_bytes)
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for HealthEntry {
    fn display(&self) -> String {
        format!(
            "[{status}] {name}: {detail}",
            status = self.status,
            name = self.name,
            detail = self.detail
        )
    }
}
