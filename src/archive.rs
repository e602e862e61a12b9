use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::catalog::{CatalogClient, ItemPager};
use crate::chunker::ChunkAllocator;
use crate::domain::{ItemId, MediaItem, format_bytes};
use crate::error::ArchiverError;
use crate::fetcher::ItemFetcher;
use crate::state::{ProgressState, ProgressStore};
use crate::store::BackupStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveOptions {
    /// Walk the identical loop without fetching or persisting anything.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub archived_items: u64,
    pub transferred_bytes: u64,
    pub skipped_items: u64,
    pub oversized_items: u64,
    pub chunks_opened: u64,
    pub final_chunk_index: u32,
    pub final_chunk_occupied_bytes: u64,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub chunks: Vec<PlanChunk>,
    pub total_items: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanChunk {
    pub index: u32,
    pub items: u64,
    pub size_bytes: u64,
    /// Creation dates (YYYY-MM-DD) of the first and last item in the chunk.
    pub first_date: String,
    pub last_date: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Resumption modeled as an explicit cursor: consume items without archiving
/// them until the persisted marker id is seen, then resume with the next one.
#[derive(Debug, Clone)]
pub struct ResumeCursor {
    marker: Option<ItemId>,
    found: bool,
}

impl ResumeCursor {
    pub fn new(marker: Option<ItemId>) -> Self {
        Self {
            marker,
            found: false,
        }
    }

    /// True while still seeking past the marker. The marker item itself is
    /// skipped too: it was fully processed by the previous run.
    pub fn should_skip(&mut self, item: &MediaItem) -> bool {
        let Some(marker) = &self.marker else {
            return false;
        };
        if self.found {
            return false;
        }
        if item.id == *marker {
            self.found = true;
        }
        true
    }

    /// False when a marker was set but never observed, meaning the catalog
    /// contents or ordering changed since the last run.
    pub fn is_satisfied(&self) -> bool {
        self.marker.is_none() || self.found
    }

    pub fn marker(&self) -> Option<&ItemId> {
        self.marker.as_ref()
    }
}

/// Drives CatalogReader, ChunkAllocator, ItemFetcher and ProgressStore in a
/// single strictly sequential loop. Chunk assignment depends on the running
/// occupancy of the current chunk, so items must be observed in catalog order.
///
/// Operational contract: exactly one archiver instance may run against a given
/// backup-dir/state-file pair at a time. Concurrent runs against the same
/// state file are undefined behavior and must be prevented by the caller.
pub struct Archiver<C: CatalogClient, F: ItemFetcher> {
    catalog: C,
    fetcher: F,
    backup: BackupStore,
    progress: ProgressStore,
    capacity_bytes: u64,
    page_size: u32,
}

impl<C: CatalogClient, F: ItemFetcher> Archiver<C, F> {
    pub fn new(
        catalog: C,
        fetcher: F,
        backup: BackupStore,
        progress: ProgressStore,
        capacity_bytes: u64,
        page_size: u32,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            backup,
            progress,
            capacity_bytes,
            page_size,
        }
    }

    pub fn run(
        &self,
        options: ArchiveOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, ArchiverError> {
        sink.event(ProgressEvent {
            message: "phase=Probe; checking catalog reachability".to_string(),
            elapsed: None,
        });
        self.catalog.ping()?;

        let mut state = self.progress.load()?;
        let mut allocator = ChunkAllocator::resume(
            self.capacity_bytes,
            state.current_chunk_index,
            state.current_chunk_occupied_bytes,
        );
        let mut cursor = ResumeCursor::new(state.last_item_id.clone());
        if let Some(marker) = cursor.marker() {
            sink.event(ProgressEvent {
                message: format!("phase=Resume; seeking past item {marker}"),
                elapsed: None,
            });
        }

        let mut report = RunReport {
            archived_items: 0,
            transferred_bytes: 0,
            skipped_items: 0,
            oversized_items: 0,
            chunks_opened: 0,
            final_chunk_index: allocator.current().index,
            final_chunk_occupied_bytes: allocator.current().occupied_bytes,
            dry_run: options.dry_run,
        };

        for item in ItemPager::new(&self.catalog, self.page_size) {
            let item = item?;
            if cursor.should_skip(&item) {
                report.skipped_items += 1;
                continue;
            }

            let placement = allocator.place(item.size_bytes);
            if placement.oversized {
                report.oversized_items += 1;
            }
            if placement.opened_new_chunk {
                report.chunks_opened += 1;
                sink.event(ProgressEvent {
                    message: format!("phase=Chunk; opened chunk {}", placement.chunk_index),
                    elapsed: None,
                });
                // Persist the boundary before anything lands in the new
                // chunk: a crash right here resumes into an empty chunk,
                // with the closing item already committed.
                if !options.dry_run {
                    state.current_chunk_index = placement.chunk_index;
                    state.current_chunk_occupied_bytes = 0;
                    self.progress.save(&state)?;
                }
            }

            if !options.dry_run {
                self.backup.ensure_chunk_dir(placement.chunk_index)?;
            }
            let target = self.backup.target_path(placement.chunk_index, &item);

            if !options.dry_run {
                self.fetcher.fetch(&item.id, &target)?;
            }

            allocator.commit(item.size_bytes);
            report.archived_items += 1;
            report.transferred_bytes += item.size_bytes;

            state.last_item_id = Some(item.id.clone());
            state.current_chunk_index = allocator.current().index;
            state.current_chunk_occupied_bytes = allocator.current().occupied_bytes;
            if !options.dry_run {
                self.progress.save(&state)?;
            }

            if report.archived_items % 100 == 0 {
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Transfer; {} items, {} archived",
                        report.archived_items,
                        format_bytes(report.transferred_bytes)
                    ),
                    elapsed: None,
                });
            }
        }

        if !cursor.is_satisfied() {
            let marker = cursor
                .marker()
                .map(|id| id.as_str().to_string())
                .unwrap_or_default();
            warn!(%marker, "resume marker never appeared in the enumeration");
            return Err(ArchiverError::ResumeMarkerNotFound(marker));
        }

        report.final_chunk_index = allocator.current().index;
        report.final_chunk_occupied_bytes = allocator.current().occupied_bytes;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} items in {} chunk(s)",
                report.archived_items,
                report.final_chunk_index
            ),
            elapsed: None,
        });
        Ok(report)
    }

    /// Lay the whole catalog out into chunks without touching the filesystem
    /// or the progress state. Useful for capacity planning before burning.
    pub fn plan(&self, sink: &dyn ProgressSink) -> Result<PlanReport, ArchiverError> {
        sink.event(ProgressEvent {
            message: "phase=Probe; checking catalog reachability".to_string(),
            elapsed: None,
        });
        self.catalog.ping()?;

        sink.event(ProgressEvent {
            message: "phase=Plan; enumerating catalog".to_string(),
            elapsed: None,
        });

        let mut allocator = ChunkAllocator::new(self.capacity_bytes);
        let mut chunks: Vec<PlanChunk> = Vec::new();
        let mut open: Option<PlanChunk> = None;
        let mut total_items = 0u64;
        let mut total_bytes = 0u64;

        for item in ItemPager::new(&self.catalog, self.page_size) {
            let item = item?;
            let placement = allocator.place(item.size_bytes);
            allocator.commit(item.size_bytes);
            total_items += 1;
            total_bytes += item.size_bytes;

            let date = item.created_at.format("%Y-%m-%d").to_string();
            if placement.opened_new_chunk {
                if let Some(done) = open.take() {
                    chunks.push(done);
                }
            }
            match &mut open {
                Some(chunk) => {
                    chunk.items += 1;
                    chunk.size_bytes += item.size_bytes;
                    chunk.last_date = date;
                }
                None => {
                    open = Some(PlanChunk {
                        index: placement.chunk_index,
                        items: 1,
                        size_bytes: item.size_bytes,
                        first_date: date.clone(),
                        last_date: date,
                    });
                }
            }
        }
        if let Some(done) = open.take() {
            chunks.push(done);
        }

        Ok(PlanReport {
            chunks,
            total_items,
            total_bytes,
        })
    }

    pub fn state(&self) -> Result<ProgressState, ArchiverError> {
        self.progress.load()
    }
}
