use std::collections::BTreeMap;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Duration, TimeZone, Utc};

use lumo_media_archiver::archive::{ArchiveOptions, Archiver};
use lumo_media_archiver::catalog::CatalogClient;
use lumo_media_archiver::domain::{ItemId, MediaItem};
use lumo_media_archiver::error::ArchiverError;
use lumo_media_archiver::fetcher::ItemFetcher;
use lumo_media_archiver::output::JsonOutput;
use lumo_media_archiver::state::{ProgressState, ProgressStore};
use lumo_media_archiver::store::BackupStore;

fn item(id: &str, name: &str, size: u64, day: i64) -> MediaItem {
    let base = Utc.with_ymd_and_hms(2021, 1, 1, 12, 0, 0).unwrap();
    MediaItem {
        id: id.parse().unwrap(),
        size_bytes: size,
        display_name: name.to_string(),
        original_path: format!("/upload/{name}.jpg"),
        created_at: base + Duration::days(day),
    }
}

struct MockCatalog {
    items: Vec<MediaItem>,
    ping_ok: bool,
    pages_served: Mutex<u32>,
}

impl MockCatalog {
    fn new(items: Vec<MediaItem>) -> Self {
        Self {
            items,
            ping_ok: true,
            pages_served: Mutex::new(0),
        }
    }

    fn unreachable() -> Self {
        Self {
            items: Vec::new(),
            ping_ok: false,
            pages_served: Mutex::new(0),
        }
    }
}

impl CatalogClient for MockCatalog {
    fn ping(&self) -> Result<(), ArchiverError> {
        if self.ping_ok {
            Ok(())
        } else {
            Err(ArchiverError::Probe("connection refused".to_string()))
        }
    }

    fn fetch_page(&self, page: u32, page_size: u32) -> Result<Vec<MediaItem>, ArchiverError> {
        *self.pages_served.lock().unwrap() += 1;
        let start = ((page - 1) * page_size) as usize;
        let end = (start + page_size as usize).min(self.items.len());
        if start >= self.items.len() {
            return Ok(Vec::new());
        }
        Ok(self.items[start..end].to_vec())
    }
}

/// Writes the item id as file content; optionally fails the nth fetch.
#[derive(Default)]
struct MockFetcher {
    calls: Mutex<usize>,
    fail_on_call: Option<usize>,
}

impl MockFetcher {
    fn failing_on(call: usize) -> Self {
        Self {
            calls: Mutex::new(0),
            fail_on_call: Some(call),
        }
    }
}

impl ItemFetcher for MockFetcher {
    fn fetch(&self, id: &ItemId, destination: &Utf8Path) -> Result<(), ArchiverError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if self.fail_on_call == Some(*calls) {
            return Err(ArchiverError::FetchHttp("connection reset".to_string()));
        }
        std::fs::write(destination.as_std_path(), id.as_str())
            .map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    backup_dir: Utf8PathBuf,
    state_file: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let backup_dir = Utf8PathBuf::from_path_buf(temp.path().join("backups")).unwrap();
        let state_file = Utf8PathBuf::from_path_buf(temp.path().join("state.json")).unwrap();
        Self {
            _temp: temp,
            backup_dir,
            state_file,
        }
    }

    fn archiver(
        &self,
        catalog: MockCatalog,
        fetcher: MockFetcher,
        capacity: u64,
        page_size: u32,
    ) -> Archiver<MockCatalog, MockFetcher> {
        Archiver::new(
            catalog,
            fetcher,
            BackupStore::new(self.backup_dir.clone()),
            ProgressStore::new(self.state_file.clone()),
            capacity,
            page_size,
        )
    }

    fn progress(&self) -> ProgressState {
        ProgressStore::new(self.state_file.clone()).load().unwrap()
    }

    /// Sorted relative path -> content map of the backup tree.
    fn tree(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if !self.backup_dir.as_std_path().exists() {
            return out;
        }
        let mut stack = vec![self.backup_dir.as_std_path().to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let relative = path
                        .strip_prefix(self.backup_dir.as_std_path())
                        .unwrap()
                        .to_string_lossy()
                        .to_string();
                    out.insert(relative, std::fs::read_to_string(&path).unwrap());
                }
            }
        }
        out
    }
}

fn reference_items() -> Vec<MediaItem> {
    vec![
        item("aa", "one", 4, 0),
        item("bb", "two", 4, 1),
        item("cc", "three", 4, 2),
        item("dd", "four", 7, 3),
    ]
}

#[test]
fn full_run_produces_expected_layout() {
    let fixture = Fixture::new();
    let archiver = fixture.archiver(
        MockCatalog::new(reference_items()),
        MockFetcher::default(),
        10,
        2,
    );

    let report = archiver
        .run(ArchiveOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(report.archived_items, 4);
    assert_eq!(report.transferred_bytes, 19);
    assert_eq!(report.final_chunk_index, 3);
    assert_eq!(report.final_chunk_occupied_bytes, 7);
    assert_eq!(report.skipped_items, 0);

    let tree = fixture.tree();
    let paths: Vec<&str> = tree.keys().map(String::as_str).collect();
    assert_eq!(
        paths,
        vec![
            "Chunk_1/one.jpg",
            "Chunk_1/two.jpg",
            "Chunk_2/three.jpg",
            "Chunk_3/four.jpg",
        ]
    );

    let state = fixture.progress();
    assert_eq!(state.last_item_id, Some("dd".parse().unwrap()));
    assert_eq!(state.current_chunk_index, 3);
    assert_eq!(state.current_chunk_occupied_bytes, 7);
}

#[test]
fn completed_run_is_idempotent() {
    let fixture = Fixture::new();
    let archiver = fixture.archiver(
        MockCatalog::new(reference_items()),
        MockFetcher::default(),
        10,
        10,
    );
    archiver.run(ArchiveOptions::default(), &JsonOutput).unwrap();
    let state_before = fixture.progress();

    let rerun = fixture.archiver(
        MockCatalog::new(reference_items()),
        MockFetcher::default(),
        10,
        10,
    );
    let report = rerun.run(ArchiveOptions::default(), &JsonOutput).unwrap();

    assert_eq!(report.archived_items, 0);
    assert_eq!(report.skipped_items, 4);
    assert_eq!(fixture.progress(), state_before);
}

#[test]
fn interrupted_run_resumes_to_identical_layout() {
    // Uninterrupted baseline.
    let baseline = Fixture::new();
    baseline
        .archiver(
            MockCatalog::new(reference_items()),
            MockFetcher::default(),
            10,
            2,
        )
        .run(ArchiveOptions::default(), &JsonOutput)
        .unwrap();

    // Same catalog, but the third transfer dies.
    let fixture = Fixture::new();
    let archiver = fixture.archiver(
        MockCatalog::new(reference_items()),
        MockFetcher::failing_on(3),
        10,
        2,
    );
    let err = archiver
        .run(ArchiveOptions::default(), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, ArchiverError::FetchHttp(_));

    // State points at the last fully completed item.
    let state = fixture.progress();
    assert_eq!(state.last_item_id, Some("bb".parse().unwrap()));

    // Re-run retries exactly the failed item and finishes.
    let resumed = fixture.archiver(
        MockCatalog::new(reference_items()),
        MockFetcher::default(),
        10,
        2,
    );
    let report = resumed.run(ArchiveOptions::default(), &JsonOutput).unwrap();
    assert_eq!(report.archived_items, 2);
    assert_eq!(report.skipped_items, 2);

    assert_eq!(fixture.tree(), baseline.tree());
    assert_eq!(fixture.progress(), baseline.progress());
}

#[test]
fn chunk_transition_is_persisted_before_the_new_chunk_is_touched() {
    let fixture = Fixture::new();
    // Third item opens chunk 2 and its transfer fails.
    let archiver = fixture.archiver(
        MockCatalog::new(reference_items()),
        MockFetcher::failing_on(3),
        10,
        10,
    );
    archiver
        .run(ArchiveOptions::default(), &JsonOutput)
        .unwrap_err();

    let state = fixture.progress();
    assert_eq!(state.last_item_id, Some("bb".parse().unwrap()));
    assert_eq!(state.current_chunk_index, 2);
    assert_eq!(state.current_chunk_occupied_bytes, 0);

    // Nothing landed in the chunk that was opened and then aborted.
    assert!(!fixture.tree().keys().any(|path| path.contains("three")));
}

#[test]
fn colliding_display_names_get_distinct_files() {
    let fixture = Fixture::new();
    let items = vec![
        item("aa", "holiday", 2, 0),
        item("bb", "holiday", 2, 1),
    ];
    let archiver = fixture.archiver(MockCatalog::new(items), MockFetcher::default(), 10, 10);
    archiver.run(ArchiveOptions::default(), &JsonOutput).unwrap();

    let tree = fixture.tree();
    assert_eq!(tree.get("Chunk_1/holiday.jpg").unwrap(), "aa");
    assert_eq!(tree.get("Chunk_1/holiday_bb.jpg").unwrap(), "bb");
}

#[test]
fn oversized_item_overflows_its_own_chunk() {
    let fixture = Fixture::new();
    let items = vec![
        item("aa", "small", 4, 0),
        item("bb", "huge", 25, 1),
        item("cc", "after", 3, 2),
    ];
    let archiver = fixture.archiver(MockCatalog::new(items), MockFetcher::default(), 10, 10);
    let report = archiver.run(ArchiveOptions::default(), &JsonOutput).unwrap();

    assert_eq!(report.oversized_items, 1);
    let tree = fixture.tree();
    assert!(tree.contains_key("Chunk_1/small.jpg"));
    assert!(tree.contains_key("Chunk_2/huge.jpg"));
    assert!(tree.contains_key("Chunk_3/after.jpg"));
}

#[test]
fn missing_resume_marker_is_an_error() {
    let fixture = Fixture::new();
    let store = ProgressStore::new(fixture.state_file.clone());
    store
        .save(&ProgressState {
            last_item_id: Some("vanished".parse().unwrap()),
            current_chunk_index: 2,
            current_chunk_occupied_bytes: 5,
        })
        .unwrap();

    let fetcher = MockFetcher::default();
    let archiver = fixture.archiver(MockCatalog::new(reference_items()), fetcher, 10, 10);
    let err = archiver
        .run(ArchiveOptions::default(), &JsonOutput)
        .unwrap_err();

    assert_matches!(err, ArchiverError::ResumeMarkerNotFound(_));
    assert_eq!(archiver.state().unwrap().last_item_id, Some("vanished".parse().unwrap()));
    assert!(fixture.tree().is_empty());
}

#[test]
fn dry_run_writes_nothing() {
    let fixture = Fixture::new();
    let archiver = fixture.archiver(
        MockCatalog::new(reference_items()),
        MockFetcher::default(),
        10,
        10,
    );
    let report = archiver
        .run(
            ArchiveOptions { dry_run: true },
            &JsonOutput,
        )
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.archived_items, 4);
    assert_eq!(report.final_chunk_index, 3);
    assert!(fixture.tree().is_empty());
    assert!(!fixture.state_file.as_std_path().exists());
}

#[test]
fn probe_failure_aborts_before_any_work() {
    let fixture = Fixture::new();
    let fetcher = MockFetcher::default();
    let archiver = fixture.archiver(MockCatalog::unreachable(), fetcher, 10, 10);
    let err = archiver
        .run(ArchiveOptions::default(), &JsonOutput)
        .unwrap_err();

    assert_matches!(err, ArchiverError::Probe(_));
    assert!(fixture.tree().is_empty());
    assert!(!fixture.state_file.as_std_path().exists());
}

#[test]
fn plan_groups_items_with_date_ranges() {
    let fixture = Fixture::new();
    let archiver = fixture.archiver(
        MockCatalog::new(reference_items()),
        MockFetcher::default(),
        10,
        2,
    );
    let report = archiver.plan(&JsonOutput).unwrap();

    assert_eq!(report.total_items, 4);
    assert_eq!(report.total_bytes, 19);
    assert_eq!(report.chunks.len(), 3);

    assert_eq!(report.chunks[0].index, 1);
    assert_eq!(report.chunks[0].items, 2);
    assert_eq!(report.chunks[0].size_bytes, 8);
    assert_eq!(report.chunks[0].first_date, "2021-01-01");
    assert_eq!(report.chunks[0].last_date, "2021-01-02");

    assert_eq!(report.chunks[2].index, 3);
    assert_eq!(report.chunks[2].size_bytes, 7);

    // Planning never touches the filesystem.
    assert!(fixture.tree().is_empty());
    assert!(!fixture.state_file.as_std_path().exists());
}

#[test]
fn plan_ignores_existing_progress() {
    let fixture = Fixture::new();
    ProgressStore::new(fixture.state_file.clone())
        .save(&ProgressState {
            last_item_id: Some("bb".parse().unwrap()),
            current_chunk_index: 2,
            current_chunk_occupied_bytes: 4,
        })
        .unwrap();

    let archiver = fixture.archiver(
        MockCatalog::new(reference_items()),
        MockFetcher::default(),
        10,
        10,
    );
    let report = archiver.plan(&JsonOutput).unwrap();
    assert_eq!(report.chunks.len(), 3);
    assert_eq!(report.chunks[0].index, 1);
}
