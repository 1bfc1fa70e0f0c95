pub mod artifact;
pub mod config;
pub mod cookies;
pub mod error;
pub mod pipeline;
pub mod tools;
pub mod workspace;

pub use artifact::{
    ArtifactError, ArtifactName, ArtifactResult, LocateMode, MaterializedFile, MediaArtifact,
    StageSuffix, SupersedeError,
};
pub use config::{
    config_dir, credentials_from_sources, ensure_credentials_file, load_credentials,
    load_settings, load_settings_or_default, Credentials, PathsSection, PipelineSection, Settings,
    ToolsSection,
};
pub use cookies::{CookieError, CookieFile, CookieResult, CookieStore};
pub use error::{ConfigError, Result};
pub use pipeline::{
    Delivery, DeliveryError, Pipeline, PipelineError, PipelineReport, PipelineRequest,
    PipelineResult, Stage, TrimRange, UPLOAD_FAILED_MESSAGE,
};
pub use tools::{
    BitrateBudget, CommandExecutor, SystemCommandExecutor, SystemToolRunner, ToolError,
    ToolPaths, ToolResult, ToolRunner,
};
pub use workspace::{RequestWorkspace, WorkspaceError};
