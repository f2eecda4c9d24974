//! Artifact collection and upload for local runs

use sandrun_core::domain::artifact::ArtifactLayout;
use sandrun_core::domain::result::ExecutionResult;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::args::REPORT_DIRS;
use crate::interrupt::race;
use crate::repository::ArtifactStore;

/// Budget for the whole upload phase
const UPLOAD_BUDGET: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Screenshot,
    Video,
    Trace,
}

impl MediaKind {
    fn classify(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "png" | "jpg" | "jpeg" => Some(MediaKind::Screenshot),
            "webm" => Some(MediaKind::Video),
            "zip" => Some(MediaKind::Trace),
            _ => None,
        }
    }

    fn content_type(&self, path: &Path) -> &'static str {
        match self {
            MediaKind::Screenshot if path.extension().is_some_and(|e| e == "png") => "image/png",
            MediaKind::Screenshot => "image/jpeg",
            MediaKind::Video => "video/webm",
            MediaKind::Trace => "application/zip",
        }
    }

    fn key(&self, layout: &ArtifactLayout, name: &str) -> String {
        match self {
            MediaKind::Screenshot => layout.screenshot(name),
            MediaKind::Video => format!("{}{}", layout.videos_prefix(), name),
            MediaKind::Trace => format!("{}{}", layout.traces_prefix(), name),
        }
    }
}

/// A media file produced by the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub kind: MediaKind,
    pub path: PathBuf,
    /// Path below the report directory, `/`-separated
    pub name: String,
}

/// Finds screenshots, videos and traces under the run's report directories
pub fn collect_media(scripts_dir: &Path) -> Vec<MediaFile> {
    let mut files = Vec::new();
    for dir in REPORT_DIRS {
        let root = scripts_dir.join(dir);
        if !root.is_dir() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let Some(kind) = MediaKind::classify(entry.path()) else {
                continue;
            };
            let Ok(rel) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(MediaFile {
                kind,
                path: entry.path().to_path_buf(),
                name,
            });
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}

/// Uploads logs, the structured report and media, recording their URIs
///
/// Best-effort: failures are logged and skipped. Cancellation stops the
/// remaining uploads without changing the result's status.
pub async fn upload_artifacts(
    store: &dyn ArtifactStore,
    scripts_dir: &Path,
    result: &mut ExecutionResult,
    cancel: &CancellationToken,
) {
    let layout = ArtifactLayout::new(&result.tenant_id, &result.run_id);
    let deadline = Instant::now() + UPLOAD_BUDGET;
    let run_id = result.run_id.clone();

    let logs = result.logs.clone().into_bytes();
    match race(
        store.upload(&layout.execution_log(), logs, "text/plain; charset=utf-8"),
        cancel,
        deadline,
    )
    .await
    {
        Ok(Ok(uri)) => result.logs_uri = Some(uri),
        Ok(Err(e)) => warn!("Run {}: log upload failed: {:#}", run_id, e),
        Err(interrupted) => {
            warn!("Run {}: uploads stopped: {:?}", run_id, interrupted);
            return;
        }
    }

    if let Some(raw) = result.raw_results.clone() {
        match race(
            store.upload(&layout.results_json(), raw, "application/json"),
            cancel,
            deadline,
        )
        .await
        {
            Ok(Ok(uri)) => result.results_uri = Some(uri),
            Ok(Err(e)) => warn!("Run {}: report upload failed: {:#}", run_id, e),
            Err(interrupted) => {
                warn!("Run {}: uploads stopped: {:?}", run_id, interrupted);
                return;
            }
        }
    }

    let media = {
        let dir = scripts_dir.to_path_buf();
        tokio::task::spawn_blocking(move || collect_media(&dir))
            .await
            .unwrap_or_default()
    };
    debug!("Run {}: {} media file(s) to upload", run_id, media.len());

    let mut uploaded = [false; 3];
    for file in &media {
        let data = match tokio::fs::read(&file.path).await {
            Ok(data) => data,
            Err(e) => {
                warn!("Run {}: cannot read {}: {}", run_id, file.path.display(), e);
                continue;
            }
        };
        let key = file.kind.key(&layout, &file.name);
        match race(
            store.upload(&key, data, file.kind.content_type(&file.path)),
            cancel,
            deadline,
        )
        .await
        {
            Ok(Ok(_)) => uploaded[file.kind as usize] = true,
            Ok(Err(e)) => warn!("Run {}: upload of {} failed: {:#}", run_id, key, e),
            Err(interrupted) => {
                warn!("Run {}: uploads stopped: {:?}", run_id, interrupted);
                break;
            }
        }
    }

    if uploaded[MediaKind::Screenshot as usize] {
        result.screenshots_uri = Some(store.uri_for(&layout.screenshots_prefix()));
    }
    if uploaded[MediaKind::Video as usize] {
        result.videos_uri = Some(store.uri_for(&layout.videos_prefix()));
    }
    if uploaded[MediaKind::Trace as usize] {
        result.traces_uri = Some(store.uri_for(&layout.traces_prefix()));
    }
    result.artifacts_uri = Some(store.uri_for(layout.prefix()));

    info!(
        "Run {}: artifacts uploaded under {}",
        run_id,
        layout.prefix()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::FsArtifactStore;
    use sandrun_core::domain::request::ExecutionRequest;
    use std::fs;

    #[test]
    fn test_collect_media() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("test-results/login-chromium");
        fs::create_dir_all(&results).unwrap();
        fs::write(results.join("test-failed-1.png"), "png").unwrap();
        fs::write(results.join("video.webm"), "webm").unwrap();
        fs::write(results.join("trace.zip"), "zip").unwrap();
        fs::write(results.join("error-context.md"), "md").unwrap();

        let media = collect_media(dir.path());
        let names: Vec<_> = media.iter().map(|m| (m.kind, m.name.as_str())).collect();
        assert_eq!(
            names,
            vec![
                (MediaKind::Screenshot, "login-chromium/test-failed-1.png"),
                (MediaKind::Trace, "login-chromium/trace.zip"),
                (MediaKind::Video, "login-chromium/video.webm"),
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_records_uris() {
        let scripts = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let shots = scripts.path().join("test-results/a");
        fs::create_dir_all(&shots).unwrap();
        fs::write(shots.join("shot.png"), "png").unwrap();

        let store = FsArtifactStore::new(store_dir.path(), "sandrun");
        let req = ExecutionRequest::new("run-1", "tenant-1", "/x", "http://x");
        let mut result = ExecutionResult::new(&req);
        result.logs = "  1 passed".into();
        result.raw_results = Some(b"{}".to_vec());

        upload_artifacts(&store, scripts.path(), &mut result, &CancellationToken::new()).await;

        assert!(result.logs_uri.unwrap().ends_with("tenant-1/run-1/execution.log"));
        assert!(result.results_uri.unwrap().ends_with("tenant-1/run-1/results.json"));
        assert!(result.screenshots_uri.unwrap().ends_with("tenant-1/run-1/screenshots/"));
        assert!(result.videos_uri.is_none());
        assert!(
            store_dir
                .path()
                .join("sandrun/tenant-1/run-1/screenshots/a/shot.png")
                .is_file()
        );
    }

    #[tokio::test]
    async fn test_cancelled_upload_leaves_uris_empty() {
        let scripts = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(store_dir.path(), "sandrun");
        let req = ExecutionRequest::new("run-1", "tenant-1", "/x", "http://x");
        let mut result = ExecutionResult::new(&req);

        let cancel = CancellationToken::new();
        cancel.cancel();
        upload_artifacts(&store, scripts.path(), &mut result, &cancel).await;
        assert!(result.logs_uri.is_none());
        assert!(result.artifacts_uri.is_none());
    }
}
