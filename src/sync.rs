//! Document sync: push the source documents a question batch needs.
//!
//! For every `{source_dir}/{category}/{id}.pdf` whose id is requested, the
//! document is uploaded unless the indexed-set log already lists it. The
//! upload carries membership metadata naming every question that cites the
//! document, and is recorded in the log once it succeeds. A log entry written
//! under a different upload mode or encoding does not count: the document is
//! uploaded again so its remote copy answers the current filter. A failure on
//! one document is logged and the batch moves on.

use crate::client::{UpsertRequest, VectorService, collection_name};
use crate::error::{EvalError, Result};
use crate::membership::{CompositeKey, MembershipEncoding, MembershipIndex};
use crate::naming::document_name;
use crate::render::{PageRenderer, Rasterizer, encode_file, render_error};
use crate::tracker::IndexedSetTracker;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extension of source documents.
pub const SOURCE_EXTENSION: &str = "pdf";

/// What one remote document corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// The whole PDF, named `{id}`.
    #[default]
    Document,
    /// One PNG per page, named `{id}_page_{n}`.
    Pages,
}

/// Outcome of one sync call.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub upserted: Vec<CompositeKey>,
    pub skipped: Vec<CompositeKey>,
    pub failed: Vec<(CompositeKey, String)>,
}

impl SyncReport {
    pub fn merge(&mut self, other: SyncReport) {
        self.upserted.extend(other.upserted);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }
}

/// A local source document selected for sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub document_id: u32,
    pub path: PathBuf,
}

/// Uploads source documents to the service, at most once per composite key.
pub struct DocumentSync<'a, S, R = PageRenderer> {
    service: &'a S,
    tracker: &'a IndexedSetTracker,
    source_dir: PathBuf,
    renderer: R,
    mode: UploadMode,
    encoding: MembershipEncoding,
}

impl<'a, S: VectorService, R: Rasterizer> DocumentSync<'a, S, R> {
    pub fn new(
        service: &'a S,
        tracker: &'a IndexedSetTracker,
        source_dir: impl Into<PathBuf>,
        renderer: R,
    ) -> Self {
        Self {
            service,
            tracker,
            source_dir: source_dir.into(),
            renderer,
            mode: UploadMode::default(),
            encoding: MembershipEncoding::default(),
        }
    }

    pub fn with_mode(mut self, mode: UploadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_encoding(mut self, encoding: MembershipEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Make sure every requested document of `category` is indexed.
    ///
    /// Requested documents with no local file are logged and left out. Errors
    /// only when the category folder or the indexed-set log cannot be read;
    /// per-document failures land in [`SyncReport::failed`].
    pub async fn sync(
        &self,
        source_ids: &[u32],
        category: &str,
        membership: &MembershipIndex,
    ) -> Result<SyncReport> {
        let indexed = self.tracker.latest()?;
        let files = list_source_files(&self.source_dir.join(category), source_ids)?;
        let collection = collection_name(category);
        let mut report = SyncReport::default();

        for file in files {
            let key = CompositeKey::new(category, file.document_id);

            match indexed.get(&key.file_id()) {
                Some(record) if record.matches(self.mode, self.encoding) => {
                    tracing::info!(%key, "skipping already indexed document");
                    report.skipped.push(key);
                    continue;
                }
                Some(record) => {
                    tracing::warn!(
                        %key,
                        indexed_mode = ?record.mode,
                        indexed_encoding = ?record.encoding,
                        mode = ?self.mode,
                        encoding = ?self.encoding,
                        "re-indexing document uploaded with other settings"
                    );
                }
                None => {}
            }

            match self.index_document(&file, &key, &collection, membership).await {
                Ok(units) => {
                    tracing::info!(%key, units, collection = %collection, "upserted document");
                    report.upserted.push(key);
                }
                Err(e) => {
                    tracing::warn!(
                        category,
                        document_id = file.document_id,
                        error = %e,
                        "failed to index document"
                    );
                    report.failed.push((key, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    async fn index_document(
        &self,
        file: &SourceFile,
        key: &CompositeKey,
        collection: &str,
        membership: &MembershipIndex,
    ) -> Result<usize> {
        let qids = membership
            .qids(key)
            .ok_or_else(|| EvalError::Unreferenced(key.file_id()))?;

        let units = self.upload(file, qids, collection).await?;
        self.tracker.record(key, collection, units, self.mode, self.encoding)?;
        Ok(units)
    }

    async fn upload(
        &self,
        file: &SourceFile,
        qids: &BTreeSet<u32>,
        collection: &str,
    ) -> Result<usize> {
        match self.mode {
            UploadMode::Document => {
                let request = UpsertRequest {
                    name: document_name(file.document_id, None),
                    document_base64: encode_file(&file.path)?,
                    collection_name: collection.to_string(),
                    metadata: self.encoding.metadata(qids),
                    wait: true,
                };
                self.service.upsert_document(&request).await?;
                Ok(1)
            }
            UploadMode::Pages => {
                let pages = self.renderer.page_count(&file.path).await?;
                if pages == 0 {
                    return Err(render_error(&file.path, "document has no pages"));
                }
                for page in 1..=pages {
                    // Dropping the guard deletes the image on every path out of this block
                    let image = self.renderer.render_page(&file.path, page).await?;
                    let request = UpsertRequest {
                        name: document_name(file.document_id, Some(page)),
                        document_base64: image.to_base64()?,
                        collection_name: collection.to_string(),
                        metadata: self.encoding.metadata(qids),
                        wait: true,
                    };
                    self.service.upsert_document(&request).await?;
                    tracing::debug!(name = %request.name, "upserted page");
                }
                Ok(pages as usize)
            }
        }
    }
}

/// Source files in `folder` whose numeric stem is one of `source_ids`, by id.
///
/// A missing folder yields no files. Requested ids without a file are logged.
pub fn list_source_files(folder: &Path, source_ids: &[u32]) -> Result<Vec<SourceFile>> {
    if !folder.is_dir() {
        tracing::warn!(folder = %folder.display(), "source folder not found");
        return Ok(Vec::new());
    }

    let wanted: HashSet<u32> = source_ids.iter().copied().collect();
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(folder).to_path_buf();
            EvalError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SOURCE_EXTENSION) {
            continue;
        }
        let Some(document_id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };

        if wanted.contains(&document_id) {
            files.push(SourceFile {
                document_id,
                path: path.to_path_buf(),
            });
        }
    }

    files.sort_by_key(|f| f.document_id);

    let found: HashSet<u32> = files.iter().map(|f| f.document_id).collect();
    let mut missing: Vec<u32> = wanted.difference(&found).copied().collect();
    missing.sort_unstable();
    for document_id in missing {
        tracing::warn!(folder = %folder.display(), document_id, "source document not found");
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SearchHit;
    use crate::client::SearchRequest;
    use crate::fixtures::Question;
    use crate::render::RenderedPage;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingService {
        upserts: Mutex<Vec<UpsertRequest>>,
        fail_names: Vec<String>,
    }

    impl VectorService for RecordingService {
        async fn upsert_document(&self, request: &UpsertRequest) -> Result<()> {
            if self.fail_names.contains(&request.name) {
                return Err(EvalError::remote(Some(500), "boom"));
            }
            self.upserts.lock().unwrap().push(request.clone());
            Ok(())
        }

        async fn search(&self, _request: &SearchRequest) -> Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        dir: TempDir,
        tracker: IndexedSetTracker,
        membership: MembershipIndex,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let finance = dir.path().join("reference/finance");
        fs::create_dir_all(&finance).unwrap();
        for name in ["7.pdf", "9.pdf", "12.pdf", "notes.pdf", "7.txt"] {
            fs::write(finance.join(name), b"%PDF-1.4 test").unwrap();
        }

        let questions = vec![
            Question {
                qid: 1,
                query: "x".into(),
                category: "finance".into(),
                source: vec![7, 9],
            },
            Question {
                qid: 12,
                query: "y".into(),
                category: "finance".into(),
                source: vec![7],
            },
        ];
        let tracker = IndexedSetTracker::new(dir.path().join("eval/indexed_files.jsonl"));
        Fixture {
            membership: MembershipIndex::build(&questions),
            tracker,
            dir,
        }
    }

    fn renderer(fx: &Fixture) -> PageRenderer {
        PageRenderer::new(fx.dir.path().join("tmp"), 72)
    }

    /// Writes a small PNG per page into a scratch dir, like pdftoppm would.
    struct FakeRasterizer {
        scratch_dir: PathBuf,
        pages: u32,
    }

    impl FakeRasterizer {
        fn new(fx: &Fixture, pages: u32) -> Self {
            let scratch_dir = fx.dir.path().join("tmp");
            fs::create_dir_all(&scratch_dir).unwrap();
            Self { scratch_dir, pages }
        }

        fn leftover_images(&self) -> usize {
            fs::read_dir(&self.scratch_dir).unwrap().count()
        }
    }

    impl Rasterizer for FakeRasterizer {
        async fn page_count(&self, _pdf: &Path) -> Result<u32> {
            Ok(self.pages)
        }

        async fn render_page(&self, pdf: &Path, page: u32) -> Result<RenderedPage> {
            let stem = pdf.file_stem().unwrap().to_str().unwrap();
            let path = self.scratch_dir.join(format!("{stem}_page_{page}.png"));
            fs::write(&path, b"\x89PNG").unwrap();
            Ok(RenderedPage::new(path, page))
        }
    }

    #[test]
    fn test_list_source_files_filters() {
        let fx = fixture();
        let folder = fx.dir.path().join("reference/finance");

        let files = list_source_files(&folder, &[12, 7, 99]).unwrap();
        let ids: Vec<u32> = files.iter().map(|f| f.document_id).collect();
        assert_eq!(ids, vec![7, 12]);

        let absent = list_source_files(&fx.dir.path().join("reference/absent"), &[7]).unwrap();
        assert!(absent.is_empty());
    }

    #[tokio::test]
    async fn test_sync_uploads_with_membership_and_records() {
        let fx = fixture();
        let service = RecordingService::default();
        let sync = DocumentSync::new(
            &service,
            &fx.tracker,
            fx.dir.path().join("reference"),
            renderer(&fx),
        );

        let report = sync.sync(&[7], "finance", &fx.membership).await.unwrap();
        assert_eq!(report.upserted, vec![CompositeKey::new("finance", 7)]);

        let upserts = service.upserts.lock().unwrap();
        assert_eq!(upserts.len(), 1);
        let request = &upserts[0];
        assert_eq!(request.name, "7");
        assert_eq!(request.collection_name, "_data_finance_collection");
        assert!(request.wait);
        assert!(request.metadata.contains_key("1"));
        assert!(request.metadata.contains_key("12"));
        assert_eq!(request.metadata.len(), 2);

        assert!(fx.tracker.load().unwrap().contains("finance_7"));
    }

    #[tokio::test]
    async fn test_second_sync_skips() {
        let fx = fixture();
        let service = RecordingService::default();
        let sync = DocumentSync::new(
            &service,
            &fx.tracker,
            fx.dir.path().join("reference"),
            renderer(&fx),
        )
        .with_encoding(MembershipEncoding::Tokens);

        sync.sync(&[7, 9], "finance", &fx.membership).await.unwrap();
        let second = sync.sync(&[7, 9], "finance", &fx.membership).await.unwrap();

        assert!(second.upserted.is_empty());
        assert_eq!(second.skipped.len(), 2);
        assert_eq!(service.upserts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_document() {
        let fx = fixture();
        let service = RecordingService {
            fail_names: vec!["7".to_string()],
            ..Default::default()
        };
        let sync = DocumentSync::new(
            &service,
            &fx.tracker,
            fx.dir.path().join("reference"),
            renderer(&fx),
        );

        let report = sync.sync(&[7, 9], "finance", &fx.membership).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, CompositeKey::new("finance", 7));
        assert_eq!(report.upserted, vec![CompositeKey::new("finance", 9)]);

        let indexed = fx.tracker.load().unwrap();
        assert!(!indexed.contains("finance_7"));
        assert!(indexed.contains("finance_9"));
    }

    #[tokio::test]
    async fn test_unreferenced_document_not_uploaded() {
        let fx = fixture();
        let service = RecordingService::default();
        let sync = DocumentSync::new(
            &service,
            &fx.tracker,
            fx.dir.path().join("reference"),
            renderer(&fx),
        );

        // 12 exists on disk but no finance question cites it
        let report = sync.sync(&[12], "finance", &fx.membership).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(service.upserts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pages_mode_uploads_each_page() {
        let fx = fixture();
        let service = RecordingService::default();
        let sync = DocumentSync::new(
            &service,
            &fx.tracker,
            fx.dir.path().join("reference"),
            FakeRasterizer::new(&fx, 3),
        )
        .with_mode(UploadMode::Pages);

        let report = sync.sync(&[7], "finance", &fx.membership).await.unwrap();
        assert_eq!(report.upserted, vec![CompositeKey::new("finance", 7)]);

        let upserts = service.upserts.lock().unwrap();
        let names: Vec<&str> = upserts.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["7_page_1", "7_page_2", "7_page_3"]);
        for request in upserts.iter() {
            assert_eq!(request.metadata, upserts[0].metadata);
            assert_eq!(request.document_base64, "iVBORw==");
        }
        assert!(upserts[0].metadata.contains_key("1"));
        assert!(upserts[0].metadata.contains_key("12"));
        assert_eq!(sync.renderer.leftover_images(), 0);

        let latest = fx.tracker.latest().unwrap();
        let record = &latest["finance_7"];
        assert_eq!(record.units, Some(3));
        assert_eq!(record.mode, UploadMode::Pages);
    }

    #[tokio::test]
    async fn test_failed_page_cleans_up_and_is_not_recorded() {
        let fx = fixture();
        let service = RecordingService {
            fail_names: vec!["7_page_2".to_string()],
            ..Default::default()
        };
        let sync = DocumentSync::new(
            &service,
            &fx.tracker,
            fx.dir.path().join("reference"),
            FakeRasterizer::new(&fx, 3),
        )
        .with_mode(UploadMode::Pages);

        let report = sync.sync(&[7], "finance", &fx.membership).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.upserted.is_empty());

        let names: Vec<String> = service
            .upserts
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.name.clone())
            .collect();
        assert_eq!(names, vec!["7_page_1"]);
        assert_eq!(sync.renderer.leftover_images(), 0);
        assert!(!fx.tracker.load().unwrap().contains("finance_7"));
    }

    #[tokio::test]
    async fn test_zero_page_document_is_not_recorded() {
        let fx = fixture();
        let service = RecordingService::default();
        let sync = DocumentSync::new(
            &service,
            &fx.tracker,
            fx.dir.path().join("reference"),
            FakeRasterizer::new(&fx, 0),
        )
        .with_mode(UploadMode::Pages);

        let report = sync.sync(&[7], "finance", &fx.membership).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("no pages"));
        assert!(service.upserts.lock().unwrap().is_empty());
        assert!(fx.tracker.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_encoding_change_reindexes() {
        let fx = fixture();
        let service = RecordingService::default();
        let source_dir = fx.dir.path().join("reference");

        DocumentSync::new(&service, &fx.tracker, &source_dir, renderer(&fx))
            .sync(&[7], "finance", &fx.membership)
            .await
            .unwrap();

        let tokens = DocumentSync::new(&service, &fx.tracker, &source_dir, renderer(&fx))
            .with_encoding(MembershipEncoding::Tokens);
        let report = tokens.sync(&[7], "finance", &fx.membership).await.unwrap();
        assert_eq!(report.upserted, vec![CompositeKey::new("finance", 7)]);
        assert!(report.skipped.is_empty());

        let upserts = service.upserts.lock().unwrap();
        assert_eq!(upserts.len(), 2);
        assert!(upserts[1].metadata.contains_key(crate::membership::MEMBERSHIP_KEY));
        drop(upserts);

        // Now recorded under tokens, so a repeat is a no-op
        let again = tokens.sync(&[7], "finance", &fx.membership).await.unwrap();
        assert_eq!(again.skipped.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_folder_and_ids_are_skipped() {
        let fx = fixture();
        let service = RecordingService::default();
        let sync = DocumentSync::new(
            &service,
            &fx.tracker,
            fx.dir.path().join("reference"),
            renderer(&fx),
        );

        let report = sync.sync(&[7], "absent", &fx.membership).await.unwrap();
        assert!(report.upserted.is_empty() && report.failed.is_empty());

        // 99 has no file; 7 is still uploaded
        let report = sync.sync(&[7, 99], "finance", &fx.membership).await.unwrap();
        assert_eq!(report.upserted, vec![CompositeKey::new("finance", 7)]);
        assert!(report.failed.is_empty());
    }
}
