//! On-disk lifecycle of the media file a request works on.
//!
//! A [`MediaArtifact`] starts as a bare logical name, gets its first file when
//! the fetch tool has written `<name>.<ext>`, and is then replaced stage by
//! stage. Each replacement appends a [`StageSuffix`] to the logical name and
//! deletes the file it supersedes, so at most one file carrying the name
//! exists at any time.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use url::Url;

pub const OUTPUT_EXTENSION: &str = "mp4";

/// Longest hex-encoded URL used verbatim as a logical name.
const MAX_HEX_NAME_LEN: usize = 160;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("could not find video file for {name}")]
    NotFound { name: String },
    #[error("found {} files for {name}: {}", .candidates.len(), .candidates.join(", "))]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },
    #[error("stage {requested} cannot follow {applied}")]
    OutOfOrder {
        applied: StageSuffix,
        requested: StageSuffix,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl ArtifactError {
    fn io(path: &Path, source: std::io::Error, name: &str) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            ArtifactError::NotFound {
                name: name.to_string(),
            }
        } else {
            ArtifactError::Io {
                source,
                path: path.to_path_buf(),
            }
        }
    }
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;

#[derive(Debug, Error)]
pub enum SupersedeError<E>
where
    E: std::error::Error + 'static,
{
    #[error(transparent)]
    Transform(E),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Transformation stages, declared in the only order they may be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageSuffix {
    Trim,
    Convert,
    Compress,
}

impl StageSuffix {
    pub fn as_suffix(self) -> &'static str {
        match self {
            StageSuffix::Trim => "-trim",
            StageSuffix::Convert => "-convert",
            StageSuffix::Compress => "-compress",
        }
    }
}

impl fmt::Display for StageSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_suffix())
    }
}

/// How the file behind a logical name is found after each step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocateMode {
    /// Match `<name>.` and fail when more than one file matches; transform
    /// outputs are taken from the path the adapter reports.
    #[default]
    Exact,
    /// Match any file starting with `<name>`, last one in name order wins,
    /// rescanning after every stage.
    PrefixScan,
}

/// Logical name of an artifact: the URL-derived base plus the suffixes
/// applied so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    base: String,
    stages: Vec<StageSuffix>,
}

impl ArtifactName {
    /// Hex of the URL bytes, or the hex SHA-256 of the URL when that would
    /// make filenames too long.
    pub fn from_url(url: &str) -> Self {
        let encoded = hex::encode(url.as_bytes());
        let base = if encoded.len() <= MAX_HEX_NAME_LEN {
            encoded
        } else {
            hex::encode(Sha256::digest(url.as_bytes()))
        };
        Self {
            base,
            stages: Vec::new(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn stages(&self) -> &[StageSuffix] {
        &self.stages
    }

    pub fn last_stage(&self) -> Option<StageSuffix> {
        self.stages.last().copied()
    }

    pub fn with_stage(&self, stage: StageSuffix) -> ArtifactResult<Self> {
        if let Some(applied) = self.last_stage() {
            if stage <= applied {
                return Err(ArtifactError::OutOfOrder {
                    applied,
                    requested: stage,
                });
            }
        }
        let mut next = self.clone();
        next.stages.push(stage);
        Ok(next)
    }

    pub fn output_file_name(&self, stage: StageSuffix) -> String {
        format!("{self}{}.{OUTPUT_EXTENSION}", stage.as_suffix())
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        for stage in &self.stages {
            f.write_str(stage.as_suffix())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedFile {
    pub path: PathBuf,
    pub file_name: String,
}

impl MaterializedFile {
    fn from_path(path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Self { path, file_name }
    }
}

pub struct MediaArtifact {
    name: ArtifactName,
    source: Url,
    dir: PathBuf,
    mode: LocateMode,
    current: Option<MaterializedFile>,
    released: bool,
}

impl fmt::Debug for MediaArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaArtifact")
            .field("name", &self.name.to_string())
            .field("source", &self.source.as_str())
            .field("dir", &self.dir)
            .field("current", &self.current)
            .finish()
    }
}

impl MediaArtifact {
    pub fn new<P: Into<PathBuf>>(source: Url, dir: P, mode: LocateMode) -> Self {
        let name = ArtifactName::from_url(source.as_str());
        Self::with_name(name, source, dir, mode)
    }

    pub fn with_name<P: Into<PathBuf>>(
        name: ArtifactName,
        source: Url,
        dir: P,
        mode: LocateMode,
    ) -> Self {
        Self {
            name,
            source,
            dir: dir.into(),
            mode,
            current: None,
            released: false,
        }
    }

    pub fn name(&self) -> &ArtifactName {
        &self.name
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current(&self) -> Option<&MaterializedFile> {
        self.current.as_ref()
    }

    pub fn current_path(&self) -> ArtifactResult<&Path> {
        self.current
            .as_ref()
            .map(|file| file.path.as_path())
            .ok_or_else(|| ArtifactError::NotFound {
                name: self.name.to_string(),
            })
    }

    /// Finds the file carrying the current logical name in the artifact
    /// directory.
    pub async fn materialize(&mut self) -> ArtifactResult<&MaterializedFile> {
        let name = self.name.to_string();
        let pattern = match self.mode {
            LocateMode::Exact => format!("{name}."),
            LocateMode::PrefixScan => name.clone(),
        };
        let mut candidates = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|source| ArtifactError::io(&self.dir, source, &name))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| ArtifactError::io(&self.dir, source, &name))?
        {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with(&pattern) {
                candidates.push(file_name);
            }
        }
        candidates.sort();

        let chosen = match (self.mode, candidates.len()) {
            (_, 0) => return Err(ArtifactError::NotFound { name }),
            (LocateMode::Exact, n) if n > 1 => {
                return Err(ArtifactError::Ambiguous { name, candidates })
            }
            _ => candidates.pop().unwrap_or_default(),
        };
        debug!(artifact = %name, file = %chosen, "materialized artifact");
        Ok(self
            .current
            .insert(MaterializedFile::from_path(self.dir.join(chosen))))
    }

    /// Replaces the current file with the output of `transform`.
    ///
    /// `transform` receives the current path and the path it must write
    /// (`<name><suffix>.mp4`) and returns the path it actually wrote. On
    /// success the superseded file is deleted before the new one is located,
    /// so a failed lookup never leaves two files behind. On transform failure
    /// the current file stays in place and any partial output is removed.
    pub async fn supersede<F, Fut, E>(
        &mut self,
        stage: StageSuffix,
        transform: F,
    ) -> Result<&MaterializedFile, SupersedeError<E>>
    where
        F: FnOnce(PathBuf, PathBuf) -> Fut,
        Fut: Future<Output = Result<PathBuf, E>>,
        E: std::error::Error + 'static,
    {
        let next_name = self.name.with_stage(stage)?;
        let input = self.current_path()?.to_path_buf();
        let output = self.dir.join(self.name.output_file_name(stage));

        let written = match transform(input.clone(), output.clone()).await {
            Ok(written) => written,
            Err(err) => {
                remove_partial(&output).await;
                return Err(SupersedeError::Transform(err));
            }
        };

        if let Err(source) = fs::remove_file(&input).await {
            remove_partial(&written).await;
            return Err(ArtifactError::io(&input, source, &self.name.to_string()).into());
        }
        self.current = None;
        self.name = next_name;

        match self.mode {
            LocateMode::Exact => {
                if fs::metadata(&written).await.is_err() {
                    return Err(ArtifactError::NotFound {
                        name: self.name.to_string(),
                    }
                    .into());
                }
                Ok(self.current.insert(MaterializedFile::from_path(written)))
            }
            LocateMode::PrefixScan => Ok(self.materialize().await?),
        }
    }

    /// Deletes the current file. Not idempotent: the second call reports
    /// `NotFound` because the file is already gone.
    pub async fn release(&mut self) -> ArtifactResult<()> {
        let name = self.name.to_string();
        let file = self
            .current
            .as_ref()
            .ok_or_else(|| ArtifactError::NotFound { name: name.clone() })?;
        self.released = true;
        fs::remove_file(&file.path)
            .await
            .map_err(|source| ArtifactError::io(&file.path, source, &name))?;
        debug!(artifact = %name, "released artifact");
        Ok(())
    }
}

impl Drop for MediaArtifact {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(file) = &self.current {
            if let Err(error) = std::fs::remove_file(&file.path) {
                if error.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %file.path.display(), %error, "failed to remove unreleased artifact");
                }
            }
        }
    }
}

async fn remove_partial(path: &Path) {
    if let Err(error) = fs::remove_file(path).await {
        if error.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), %error, "failed to remove partial output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Error)]
    #[error("encoder exploded")]
    struct Boom;

    fn url() -> Url {
        Url::parse("https://example.org/v").unwrap()
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    async fn write_output(_input: PathBuf, output: PathBuf) -> Result<PathBuf, Boom> {
        fs::write(&output, b"frames").await.unwrap();
        Ok(output)
    }

    #[test]
    fn short_urls_are_hex_encoded() {
        let name = ArtifactName::from_url("https://a.b/c");
        assert_eq!(name.to_string(), hex::encode("https://a.b/c"));
    }

    #[test]
    fn long_urls_fall_back_to_digest() {
        let long = format!("https://example.org/{}", "x".repeat(200));
        let name = ArtifactName::from_url(&long);
        assert_eq!(name.base().len(), 64);
        assert_eq!(name, ArtifactName::from_url(&long));
    }

    #[test]
    fn suffixes_only_move_forward() {
        let name = ArtifactName::from_url("u");
        let trimmed = name.with_stage(StageSuffix::Trim).unwrap();
        let converted = trimmed.with_stage(StageSuffix::Convert).unwrap();
        assert!(matches!(
            converted.with_stage(StageSuffix::Convert),
            Err(ArtifactError::OutOfOrder { .. })
        ));
        assert!(matches!(
            converted.with_stage(StageSuffix::Trim),
            Err(ArtifactError::OutOfOrder { .. })
        ));
        let compressed = converted.with_stage(StageSuffix::Compress).unwrap();
        assert_eq!(compressed.to_string(), "75-trim-convert-compress");
    }

    #[tokio::test]
    async fn materialize_finds_fetched_file() {
        let dir = TempDir::new().unwrap();
        let mut artifact = MediaArtifact::new(url(), dir.path(), LocateMode::Exact);
        let file_name = format!("{}.webm", artifact.name());
        std::fs::write(dir.path().join(&file_name), b"x").unwrap();
        let file = artifact.materialize().await.unwrap();
        assert_eq!(file.file_name, file_name);
    }

    #[tokio::test]
    async fn materialize_without_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut artifact = MediaArtifact::new(url(), dir.path(), LocateMode::Exact);
        assert!(matches!(
            artifact.materialize().await,
            Err(ArtifactError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn exact_mode_rejects_ambiguous_matches() {
        let dir = TempDir::new().unwrap();
        let mut artifact = MediaArtifact::new(url(), dir.path(), LocateMode::Exact);
        std::fs::write(dir.path().join(format!("{}.webm", artifact.name())), b"x").unwrap();
        std::fs::write(dir.path().join(format!("{}.mkv", artifact.name())), b"x").unwrap();
        match artifact.materialize().await {
            Err(ArtifactError::Ambiguous { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn prefix_scan_takes_last_match() {
        let dir = TempDir::new().unwrap();
        let mut artifact = MediaArtifact::new(url(), dir.path(), LocateMode::PrefixScan);
        std::fs::write(dir.path().join(format!("{}.mkv", artifact.name())), b"x").unwrap();
        std::fs::write(dir.path().join(format!("{}.webm", artifact.name())), b"x").unwrap();
        let file = artifact.materialize().await.unwrap();
        assert!(file.file_name.ends_with(".webm"));
        // the leftover is ours to clean up, the artifact only tracks one file
        std::fs::remove_file(dir.path().join(format!("{}.mkv", artifact.name()))).unwrap();
    }

    #[tokio::test]
    async fn supersede_replaces_the_file() {
        for mode in [LocateMode::Exact, LocateMode::PrefixScan] {
            let dir = TempDir::new().unwrap();
            let mut artifact = MediaArtifact::new(url(), dir.path(), mode);
            let base = artifact.name().to_string();
            std::fs::write(dir.path().join(format!("{base}.webm")), b"x").unwrap();
            artifact.materialize().await.unwrap();

            let file = artifact
                .supersede(StageSuffix::Convert, write_output)
                .await
                .unwrap();
            assert_eq!(file.file_name, format!("{base}-convert.mp4"));
            assert_eq!(files_in(dir.path()), vec![format!("{base}-convert.mp4")]);
            assert_eq!(artifact.name().to_string(), format!("{base}-convert"));
        }
    }

    #[tokio::test]
    async fn failed_transform_keeps_current_file() {
        let dir = TempDir::new().unwrap();
        let mut artifact = MediaArtifact::new(url(), dir.path(), LocateMode::Exact);
        let base = artifact.name().to_string();
        std::fs::write(dir.path().join(format!("{base}.webm")), b"x").unwrap();
        artifact.materialize().await.unwrap();

        let result = artifact
            .supersede(StageSuffix::Trim, |_input, output| async move {
                fs::write(&output, b"half").await.unwrap();
                Err::<PathBuf, _>(Boom)
            })
            .await;
        assert!(matches!(result, Err(SupersedeError::Transform(Boom))));
        assert_eq!(files_in(dir.path()), vec![format!("{base}.webm")]);
        assert_eq!(artifact.name().to_string(), base);
    }

    #[tokio::test]
    async fn missing_output_still_deletes_prior_file() {
        let dir = TempDir::new().unwrap();
        let mut artifact = MediaArtifact::new(url(), dir.path(), LocateMode::Exact);
        let base = artifact.name().to_string();
        std::fs::write(dir.path().join(format!("{base}.webm")), b"x").unwrap();
        artifact.materialize().await.unwrap();

        let result = artifact
            .supersede(StageSuffix::Convert, |_input, output| async move {
                Ok::<_, Boom>(output)
            })
            .await;
        assert!(matches!(
            result,
            Err(SupersedeError::Artifact(ArtifactError::NotFound { .. }))
        ));
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn release_is_not_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut artifact = MediaArtifact::new(url(), dir.path(), LocateMode::Exact);
        std::fs::write(dir.path().join(format!("{}.mp4", artifact.name())), b"x").unwrap();
        artifact.materialize().await.unwrap();

        artifact.release().await.unwrap();
        assert!(files_in(dir.path()).is_empty());
        assert!(matches!(
            artifact.release().await,
            Err(ArtifactError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn drop_removes_unreleased_file() {
        let dir = TempDir::new().unwrap();
        {
            let mut artifact = MediaArtifact::new(url(), dir.path(), LocateMode::Exact);
            std::fs::write(dir.path().join(format!("{}.mp4", artifact.name())), b"x").unwrap();
            artifact.materialize().await.unwrap();
        }
        assert!(files_in(dir.path()).is_empty());
    }
}
