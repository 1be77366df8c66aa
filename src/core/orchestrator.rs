//! Sync orchestrator: one run of the incremental order sync.
//!
//! A run is an explicit state machine:
//!
//! ```text
//! InitContainer -> InitWatermark -> InitLog -> ReadWatermark -> FetchPage(1)
//! FetchPage(n) -> AppendRows -> FetchPage(n+1)     (page had orders)
//! FetchPage(n) -> Finalize -> Done                 (page was empty)
//! any state -> Error                               (absorbing)
//! ```
//!
//! Every storage and network call is awaited before the next transition, so
//! a run never has two operations in flight. The watermark is only rewritten
//! in `Finalize`; pages appended before a failure stay in the log and are
//! fetched again by the next run (at-least-once).

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{BlobError, BlobStore, OrderSource, SourceError};
use crate::domain::{
    Order, PageCursor, RunContext, RunOutcome, RunReport, SyncStage, SyncTarget, Watermark,
    WatermarkParseError,
};

use super::encoder::RowEncoder;

/// Errors that end a run
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage initialization failed: {0}")]
    StorageInit(#[source] BlobError),

    #[error("failed to read watermark: {0}")]
    WatermarkRead(#[source] BlobError),

    #[error("stored watermark is unusable: {0}")]
    WatermarkInvalid(#[from] WatermarkParseError),

    #[error("failed to fetch page {page}: {source}")]
    Fetch {
        page: u32,
        #[source]
        source: SourceError,
    },

    #[error("failed to append page {page}: {source}")]
    Append {
        page: u32,
        #[source]
        source: BlobError,
    },

    #[error("failed to write watermark: {0}")]
    WatermarkWrite(#[source] BlobError),
}

impl SyncError {
    /// Stage of the run the error belongs to
    pub fn stage(&self) -> SyncStage {
        match self {
            Self::StorageInit(_) => SyncStage::StorageInit,
            Self::WatermarkRead(_) | Self::WatermarkInvalid(_) => SyncStage::WatermarkRead,
            Self::Fetch { .. } => SyncStage::Fetch,
            Self::Append { .. } => SyncStage::Append,
            Self::WatermarkWrite(_) => SyncStage::WatermarkWrite,
        }
    }
}

/// States of a run
#[derive(Debug)]
pub enum SyncState {
    InitContainer,
    InitWatermark,
    InitLog,
    ReadWatermark,
    FetchPage {
        watermark: Watermark,
        cursor: PageCursor,
    },
    AppendRows {
        watermark: Watermark,
        cursor: PageCursor,
        orders: Vec<Order>,
    },
    Finalize {
        cursor: PageCursor,
    },
    Done {
        orders: u64,
        pages: u32,
    },
    Error(SyncError),
}

impl SyncState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitContainer => "init_container",
            Self::InitWatermark => "init_watermark",
            Self::InitLog => "init_log",
            Self::ReadWatermark => "read_watermark",
            Self::FetchPage { .. } => "fetch_page",
            Self::AppendRows { .. } => "append_rows",
            Self::Finalize { .. } => "finalize",
            Self::Done { .. } => "done",
            Self::Error(_) => "error",
        }
    }

    /// `Done` and `Error` map to themselves
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error(_))
    }
}

/// Drives sync runs against one store, source and target
pub struct SyncOrchestrator<S, O> {
    store: S,
    source: O,
    target: SyncTarget,
    encoder: RowEncoder,
}

impl<S, O> SyncOrchestrator<S, O>
where
    S: BlobStore,
    O: OrderSource,
{
    pub fn new(store: S, source: O, target: SyncTarget) -> Self {
        Self {
            store,
            source,
            target,
            encoder: RowEncoder::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn source(&self) -> &O {
        &self.source
    }

    pub fn target(&self) -> &SyncTarget {
        &self.target
    }

    /// Execute one run. `now` becomes the next watermark on success.
    ///
    /// Failures are logged and reported in the returned [`RunReport`];
    /// this never returns an error.
    #[instrument(skip(self), fields(container = %self.target.container))]
    pub async fn run(&self, now: DateTime<Utc>) -> RunReport {
        let ctx = RunContext::new(now, self.target.clone());
        info!(
            run_id = %ctx.run_id,
            source = self.source.name(),
            store = self.store.name(),
            "Starting order sync"
        );

        let mut state = SyncState::InitContainer;
        let outcome = loop {
            state = match state {
                SyncState::Done { orders, pages } => {
                    info!(run_id = %ctx.run_id, orders, pages, "Order sync completed");
                    break RunOutcome::Completed { orders, pages };
                }
                SyncState::Error(e) => {
                    let stage = e.stage();
                    error!(run_id = %ctx.run_id, %stage, error = %e, "Order sync failed");
                    break RunOutcome::Failed {
                        stage,
                        error: e.to_string(),
                    };
                }
                other => self.step(&ctx, other).await,
            };
        };

        RunReport {
            run_id: ctx.run_id,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            outcome,
        }
    }

    /// Transition function: perform the work of `state` and return the next one
    pub async fn step(&self, ctx: &RunContext, state: SyncState) -> SyncState {
        debug!(run_id = %ctx.run_id, state = state.name(), "Entering state");

        let next = match state {
            SyncState::InitContainer => self.init_container(ctx).await,
            SyncState::InitWatermark => self.init_watermark(ctx).await,
            SyncState::InitLog => self.init_log(ctx).await,
            SyncState::ReadWatermark => self.read_watermark(ctx).await,
            SyncState::FetchPage { watermark, cursor } => self.fetch_page(watermark, cursor).await,
            SyncState::AppendRows {
                watermark,
                cursor,
                orders,
            } => self.append_rows(ctx, watermark, cursor, &orders).await,
            SyncState::Finalize { cursor } => self.finalize(ctx, cursor).await,
            terminal @ (SyncState::Done { .. } | SyncState::Error(_)) => return terminal,
        };

        next.unwrap_or_else(SyncState::Error)
    }

    async fn init_container(&self, ctx: &RunContext) -> Result<SyncState, SyncError> {
        let created = self
            .store
            .create_container_if_not_exists(&ctx.target.container)
            .await
            .map_err(SyncError::StorageInit)?;

        if created {
            info!(container = %ctx.target.container, "Created container");
        } else {
            debug!(container = %ctx.target.container, "Container exists");
        }
        Ok(SyncState::InitWatermark)
    }

    async fn init_watermark(&self, ctx: &RunContext) -> Result<SyncState, SyncError> {
        let target = &ctx.target;
        let exists = self
            .store
            .blob_exists(&target.container, &target.watermark_blob)
            .await
            .map_err(SyncError::StorageInit)?;

        if !exists {
            let sentinel = Watermark::sentinel();
            self.store
                .write_text(&target.container, &target.watermark_blob, &sentinel.to_iso_string())
                .await
                .map_err(SyncError::StorageInit)?;
            info!(blob = %target.watermark_blob, %sentinel, "Created watermark");
        }
        Ok(SyncState::InitLog)
    }

    async fn init_log(&self, ctx: &RunContext) -> Result<SyncState, SyncError> {
        let target = &ctx.target;
        let size = self
            .store
            .blob_size(&target.container, &target.orders_blob)
            .await
            .map_err(SyncError::StorageInit)?;

        match size {
            None => {
                self.store
                    .create_append_blob(
                        &target.container,
                        &target.orders_blob,
                        &self.encoder.header(),
                    )
                    .await
                    .map_err(SyncError::StorageInit)?;
                info!(blob = %target.orders_blob, "Created order log with header");
            }
            // Left behind when the header append failed after the blob was created
            Some(0) => {
                self.store
                    .append_text(&target.container, &target.orders_blob, &self.encoder.header())
                    .await
                    .map_err(SyncError::StorageInit)?;
                warn!(blob = %target.orders_blob, "Order log was empty, wrote header");
            }
            Some(_) => {}
        }
        Ok(SyncState::ReadWatermark)
    }

    async fn read_watermark(&self, ctx: &RunContext) -> Result<SyncState, SyncError> {
        let text = self
            .store
            .read_text(&ctx.target.container, &ctx.target.watermark_blob)
            .await
            .map_err(SyncError::WatermarkRead)?;
        let watermark: Watermark = text.parse()?;

        info!(%watermark, "Retrieved last execution time");
        Ok(SyncState::FetchPage {
            watermark,
            cursor: PageCursor::first(),
        })
    }

    async fn fetch_page(
        &self,
        watermark: Watermark,
        cursor: PageCursor,
    ) -> Result<SyncState, SyncError> {
        let orders = self
            .source
            .fetch_page(&watermark, cursor.page)
            .await
            .map_err(|source| SyncError::Fetch {
                page: cursor.page,
                source,
            })?;

        if orders.is_empty() {
            debug!(page = cursor.page, total = cursor.total, "Empty page, all orders received");
            return Ok(SyncState::Finalize { cursor });
        }

        debug!(page = cursor.page, count = orders.len(), "Received page");
        Ok(SyncState::AppendRows {
            watermark,
            cursor,
            orders,
        })
    }

    async fn append_rows(
        &self,
        ctx: &RunContext,
        watermark: Watermark,
        cursor: PageCursor,
        orders: &[Order],
    ) -> Result<SyncState, SyncError> {
        let rows = self.encoder.encode_page(orders);
        self.store
            .append_text(&ctx.target.container, &ctx.target.orders_blob, &rows)
            .await
            .map_err(|source| SyncError::Append {
                page: cursor.page,
                source,
            })?;

        let next = cursor.advance(orders.len());
        debug!(page = cursor.page, rows = orders.len(), total = next.total, "Appended page");
        Ok(SyncState::FetchPage {
            watermark,
            cursor: next,
        })
    }

    async fn finalize(&self, ctx: &RunContext, cursor: PageCursor) -> Result<SyncState, SyncError> {
        let watermark = Watermark::new(ctx.started_at);
        self.store
            .write_text(
                &ctx.target.container,
                &ctx.target.watermark_blob,
                &watermark.to_iso_string(),
            )
            .await
            .map_err(SyncError::WatermarkWrite)?;

        info!(orders = cursor.total, %watermark, "Updated last execution time");
        Ok(SyncState::Done {
            orders: cursor.total,
            pages: cursor.pages_written(),
        })
    }
}
