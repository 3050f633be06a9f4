//! Orchestrator (C7): wires C1–C6 and C8 together and runs the
//! producer/consumer loops (`spec.md` §4.7).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use sqlx::{PgPool, Row};

use crate::checkpoint::{self, Checkpoint};
use crate::config::{Settings, SyncDoc};
use crate::error::{Error, Result};
use crate::executor::query::DefaultQueryBuilder;
use crate::executor::Executor;
use crate::name;
use crate::payload::{Payload, TgOp};
use crate::queue::{self, EventQueue};
use crate::registry::{self, RegistryHandle};
use crate::resolver;
use crate::search::http::HttpSearchClient;
use crate::search::{BulkOp, SearchCapabilities, SearchIndex};
use crate::tailer::{self, NotifyListener, ReplicationSlot, SlotBounds};
use crate::tree::Tree;

/// Running totals surfaced by the status worker
/// (`spec.md` §4.7 "Status worker").
#[derive(Default)]
pub struct SyncCounts {
    pub xlog: AtomicU64,
    pub db: AtomicU64,
    pub redis: AtomicU64,
}

/// A small RAII scope timer logging elapsed wall-time, matching
/// `original_source/pgsync/utils.Timer` used to wrap the CLI's `main()`.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn new(label: impl Into<String>) -> Self {
        Timer {
            label: label.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        tracing::info!(elapsed = ?self.start.elapsed(), "{} finished", self.label);
    }
}

/// One configured sync instance, wiring the checkpoint, queue, tree, source
/// tailer, resolver, and executor collaborators around a single `SyncDoc`
/// (`spec.md` §3 "Sync instance").
pub struct Sync {
    name: String,
    database_url: String,
    doc: SyncDoc,
    settings: Settings,
    pool: PgPool,
    tree: Arc<Tree>,
    checkpoint: Box<dyn Checkpoint>,
    queue: Box<dyn EventQueue>,
    search: Arc<dyn SearchIndex>,
    query_builder: Arc<DefaultQueryBuilder>,
    counts: SyncCounts,
    truncate: AtomicBool,
    producer: bool,
    consumer: bool,
    _handle: RegistryHandle,
}

impl Sync {
    pub async fn new(doc: SyncDoc, settings: Settings, database_url: String) -> Result<Self> {
        let name = name::derive_sync_name(&doc.database, doc.index_name());
        let handle = registry::claim(&name)?;

        let declared_schemas = crate::config::nodes::schemas_of(&doc.nodes)?;
        let tree = crate::config::nodes::build_tree(&doc.nodes, &declared_schemas)?;

        let pool = PgPool::connect(&database_url)
            .await
            .map_err(Error::from)?;

        let checkpoint = checkpoint::get_checkpoint(&name, &settings);
        let queue = queue::get_queue(&name, &settings);

        let capabilities = SearchCapabilities {
            major_version: settings.search_major_version,
            is_opensearch: settings.search_is_opensearch,
        };
        let search: Arc<dyn SearchIndex> =
            Arc::new(HttpSearchClient::new(settings.search_url.clone(), capabilities));
        let query_builder = Arc::new(DefaultQueryBuilder::new(pool.clone()));

        Ok(Sync {
            name,
            database_url,
            doc,
            settings,
            pool,
            tree: Arc::new(tree),
            checkpoint,
            queue,
            search,
            query_builder,
            counts: SyncCounts::default(),
            truncate: AtomicBool::new(false),
            producer: true,
            consumer: true,
            _handle: handle,
        })
    }

    pub fn with_producer_consumer(mut self, producer: bool, consumer: bool) -> Self {
        self.producer = producer;
        self.consumer = consumer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn build_executor(&self) -> Executor {
        let mut executor = Executor::new(
            self.query_builder.clone(),
            self.doc.index_name(),
            self.search.capabilities(),
        );
        if let Some(pipeline) = &self.doc.pipeline {
            executor = executor.with_pipeline(pipeline.clone());
        }
        if let Some(routing) = &self.doc.routing {
            executor = executor.with_routing_column(routing.clone());
        }
        executor
    }

    async fn flush_bulk(&self, ops: Vec<BulkOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.counts.db.fetch_add(ops.len() as u64, Ordering::Relaxed);
        self.search.bulk(self.doc.index_name(), ops).await
    }

    /// Startup validation: `max_replication_slots`, `wal_level = logical`,
    /// the managed-RDS logical-replication setting, the replication slot's
    /// existence, and the checkpoint store's own validation
    /// (`spec.md` §6 "Required source-DB settings"). Every tree invariant —
    /// declared schemas, primary keys, relationship key-list lengths — is
    /// already enforced at construction by `Tree::new`.
    pub async fn validate(&self) -> Result<()> {
        let row = sqlx::query("SHOW max_replication_slots")
            .fetch_one(&self.pool)
            .await?;
        let raw: String = row.try_get(0)?;
        let max_slots: i64 = raw.trim().parse().unwrap_or(0);
        if max_slots < 1 {
            return Err(Error::environment(
                "max_replication_slots must be at least 1",
            ));
        }

        let row = sqlx::query("SHOW wal_level").fetch_one(&self.pool).await?;
        let wal_level: String = row.try_get(0)?;
        if wal_level.trim() != "logical" {
            return Err(Error::environment(format!(
                "wal_level must be 'logical', got '{}'",
                wal_level.trim()
            )));
        }

        if let Ok(row) = sqlx::query("SHOW rds.logical_replication")
            .fetch_one(&self.pool)
            .await
        {
            let enabled: String = row.try_get::<String, _>(0).unwrap_or_default();
            if enabled.trim() != "on" {
                return Err(Error::environment(
                    "rds.logical_replication must be enabled on managed RDS instances",
                ));
            }
        }

        let slot = ReplicationSlot::new(self.pool.clone(), self.name.clone());
        if !slot.exists().await? {
            return Err(Error::environment(format!(
                "replication slot '{}' does not exist",
                self.name
            )));
        }

        self.checkpoint.validate().await?;
        Ok(())
    }

    /// Read-only diagnostic: reports, per non-root node, whether an index
    /// exists on its primary-key columns, suggesting a `CREATE INDEX`
    /// statement when missing (`spec.md` §6 CLI `--analyze`/`-a`).
    pub async fn analyze(&self) -> Result<String> {
        let mut report = String::new();
        let root = self.tree.root();
        for node in self.tree.traverse_breadth_first() {
            if node.table == root.table && node.schema == root.schema {
                continue;
            }
            if self
                .index_exists(&node.schema, &node.table, &node.primary_keys)
                .await?
            {
                continue;
            }
            let columns = node.primary_keys.join(", ");
            report.push_str(&format!(
                "-- missing index on \"{}\".\"{}\" ({})\nCREATE INDEX ON \"{}\".\"{}\" ({});\n",
                node.schema, node.table, columns, node.schema, node.table, columns
            ));
        }
        Ok(report)
    }

    async fn index_exists(&self, schema: &str, table: &str, columns: &[String]) -> Result<bool> {
        let pattern = format!("%({})%", columns.join(", "));
        let row = sqlx::query(
            "SELECT count(*) AS n FROM pg_indexes \
             WHERE schemaname = $1 AND tablename = $2 AND indexdef ILIKE $3",
        )
        .bind(schema)
        .bind(table)
        .bind(pattern)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }

    /// The five-step one-shot sequence (`spec.md` §4.7 "`pull()` sequence").
    pub async fn pull(&self) -> Result<()> {
        let txmin = self.checkpoint.get().await?;
        let txmax = tailer::txid_current(&self.pool).await?;
        let upto_lsn = tailer::current_wal_lsn(&self.pool).await?;

        tracing::debug!(txmin, txmax, "pull");

        self.refresh_materialized_views().await?;

        let executor = self.build_executor();
        let mut stream = executor.sync(self.tree.clone(), None, txmin, Some(txmax));
        let mut batch = Vec::new();
        while let Some(op) = stream.next().await {
            batch.push(op?);
            if batch.len() >= self.settings.redis_write_chunk_size {
                self.flush_bulk(std::mem::take(&mut batch)).await?;
            }
        }
        self.flush_bulk(batch).await?;

        let mut slot = ReplicationSlot::new(self.pool.clone(), self.name.clone());
        let bounds = SlotBounds {
            upto_nchanges: Some(self.settings.logical_slot_chunk_size),
            upto_lsn: Some(upto_lsn),
        };
        let changes = slot.peek(bounds.clone()).await?;
        let payloads = changes
            .iter()
            .map(tailer::decode_logical_change)
            .collect::<Result<Vec<Payload>>>()?;
        slot.advance(bounds).await?;
        if !payloads.is_empty() {
            self.counts
                .xlog
                .fetch_add(payloads.len() as u64, Ordering::Relaxed);
            self.queue.push(payloads).await?;
        }

        self.checkpoint.set(txmax).await?;
        self.truncate.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn refresh_materialized_views(&self) -> Result<()> {
        for node in self.tree.traverse_breadth_first() {
            if node.is_view() {
                let qualified = format!("\"{}\".\"{}\"", node.schema, node.table);
                sqlx::query(&format!("REFRESH MATERIALIZED VIEW {qualified}"))
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Splits one dequeued batch into the runs the resolver operates on
    /// (`spec.md` §4.7 "Insert-reordering optimization"): pure-INSERT
    /// batches are grouped by table since inserts commute; mixed batches
    /// only split on `(tg_op, table)` boundaries to preserve source order.
    fn split_batch(batch: Vec<Payload>) -> Vec<Vec<Payload>> {
        if !batch.is_empty() && batch.iter().all(|p| p.tg_op == TgOp::Insert) {
            let mut groups: std::collections::BTreeMap<String, Vec<Payload>> = Default::default();
            for payload in batch {
                groups.entry(payload.table.clone()).or_default().push(payload);
            }
            return groups.into_values().collect();
        }

        let mut runs = Vec::new();
        let mut iter = batch.into_iter();
        let Some(first) = iter.next() else {
            return runs;
        };
        let mut current_key = (first.tg_op, first.table.clone());
        let mut current = vec![first];
        for payload in iter {
            let key = (payload.tg_op, payload.table.clone());
            if key == current_key {
                current.push(payload);
            } else {
                runs.push(std::mem::take(&mut current));
                current_key = key;
                current.push(payload);
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }
        runs
    }

    async fn process_batch(&self, batch: Vec<Payload>) -> Result<()> {
        self.refresh_materialized_views().await?;

        let mut min_xmin: Option<i64> = None;
        let mut saw_non_null_xmin = false;

        for run in Self::split_batch(batch) {
            for payload in &run {
                if let Some(xmin) = payload.xmin {
                    saw_non_null_xmin = true;
                    min_xmin = Some(min_xmin.map_or(xmin, |m: i64| m.min(xmin)));
                }
            }

            let resolved = resolver::resolve(
                &run,
                &self.tree,
                self.search.as_ref(),
                self.query_builder.as_ref(),
            )
            .await?;

            let mut ops = resolved.deletes;
            if !resolved.filters.is_empty() {
                let executor = self.build_executor();
                for chunk in resolver::chunk_filter_set(&resolved.filters, self.settings.filter_chunk_size) {
                    let mut stream = executor.sync(self.tree.clone(), Some(chunk), None, None);
                    while let Some(op) = stream.next().await {
                        ops.push(op?);
                    }
                }
            }
            self.flush_bulk(ops).await?;
        }

        if saw_non_null_xmin {
            if let Some(min_xmin) = min_xmin {
                let txmax = tailer::txid_current(&self.pool).await?;
                self.checkpoint.set(min_xmin.min(txmax) - 1).await?;
            }
        }

        Ok(())
    }

    /// Producer loop: buffers notify-channel payloads, flushing to the
    /// queue when full or on poll timeout, and runs `pull()` once after the
    /// first flush to close the startup gap (`spec.md` §4.7 "Producer
    /// loop").
    async fn producer_loop(&self) {
        let channel = self.doc.database.clone();
        let known_schemas: Vec<String> = self.tree.schemas().iter().cloned().collect();
        let mut listener = match NotifyListener::connect(
            &self.database_url,
            &channel,
            self.doc.index_name().to_string(),
            known_schemas,
        )
        .await
        {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "producer failed to connect notify listener");
                std::process::exit(1);
            }
        };

        let mut buffer: Vec<Payload> = Vec::new();
        let mut first_flush = true;

        loop {
            match listener.next_payload(self.settings.poll_timeout).await {
                Ok(Some(payload)) => {
                    buffer.push(payload);
                    if buffer.len() < self.settings.redis_write_chunk_size {
                        continue;
                    }
                }
                Ok(None) => {
                    if buffer.is_empty() {
                        continue;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "producer loop error");
                    continue;
                }
            }

            let flushed = std::mem::take(&mut buffer);
            if let Err(e) = self.queue.push(flushed).await {
                tracing::error!(error = %e, "failed to push buffered payloads to queue");
                continue;
            }

            if first_flush {
                first_flush = false;
                if let Err(e) = self.pull().await {
                    tracing::error!(error = %e, "startup pull failed");
                }
            }
        }
    }

    /// Consumer loop: pops a batch off the queue and hands it to
    /// `process_batch` (`spec.md` §4.7 "Consumer loop").
    async fn consumer_loop(&self) {
        loop {
            let batch = match self.queue.pop(self.settings.redis_write_chunk_size).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!(error = %e, "failed to pop from queue");
                    tokio::time::sleep(self.settings.redis_poll_interval).await;
                    continue;
                }
            };
            if batch.is_empty() {
                tokio::time::sleep(self.settings.redis_poll_interval).await;
                continue;
            }
            self.counts
                .redis
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            if let Err(e) = self.process_batch(batch).await {
                tracing::error!(error = %e, "failed to process batch");
            }
        }
    }

    /// Every `REPLICATION_SLOT_CLEANUP_INTERVAL`, if armed, drains the slot
    /// with no upper bound (`spec.md` §4.7 "Slot-truncation worker").
    async fn truncation_worker(&self) {
        loop {
            tokio::time::sleep(self.settings.replication_slot_cleanup_interval).await;
            if self.truncate.load(Ordering::Relaxed) {
                let mut slot = ReplicationSlot::new(self.pool.clone(), self.name.clone());
                if let Err(e) = slot.advance_unbounded().await {
                    tracing::error!(error = %e, "failed to truncate replication slot");
                }
            }
        }
    }

    /// Every `LOG_INTERVAL`, emits one status line summarizing
    /// `{xlog, db, redis, index}` counts, mirroring
    /// `original_source/pgsync/sync.py::_status` (`spec.md` §4.7 "Status
    /// worker").
    async fn status_worker(&self) {
        loop {
            tokio::time::sleep(self.settings.log_interval).await;
            let doc_count = self.search.doc_count().await.unwrap_or(0);
            tracing::info!(
                "Sync {}:{} Xlog: [{}] => Db: [{}] => Redis: [{}] => index: [{}]...",
                self.doc.database,
                self.doc.index_name(),
                self.counts.xlog.load(Ordering::Relaxed),
                self.counts.db.load(Ordering::Relaxed),
                self.counts.redis.load(Ordering::Relaxed),
                doc_count,
            );
        }
    }

    /// Runs the daemon/receive mode: producer and consumer loops
    /// concurrently and indefinitely, plus the truncation and status
    /// workers, each as its own `tokio::spawn`ed task
    /// (`spec.md` §4.7 "receive()"; `--producer`/`--consumer` toggles
    /// disable the C4 or C5→C6→C8 side respectively).
    pub async fn run_daemon(self: Arc<Self>, num_workers: usize) -> Result<()> {
        let mut handles = Vec::new();

        if self.producer {
            let me = self.clone();
            handles.push(tokio::spawn(async move { me.producer_loop().await }));
        }

        if self.consumer {
            for _ in 0..num_workers.max(1) {
                let me = self.clone();
                handles.push(tokio::spawn(async move { me.consumer_loop().await }));
            }
            let me = self.clone();
            handles.push(tokio::spawn(async move { me.truncation_worker().await }));
        }

        let me = self.clone();
        handles.push(tokio::spawn(async move { me.status_worker().await }));

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "an orchestrator task exited unexpectedly");
            }
        }
        Ok(())
    }

    /// Polling mode: a tight loop of `pull()` followed by `POLL_INTERVAL`
    /// sleep (`spec.md` §4.7 "Polling").
    pub async fn run_polling(&self) -> Result<()> {
        loop {
            self.pull().await?;
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Deletes the checkpoint and queue namespace for this sync
    /// (`original_source/pgsync/sync.py::teardown_triggers`'s
    /// checkpoint/redis cleanup half; the trigger/view/function DDL half
    /// stays out of scope).
    pub async fn teardown(&self) -> Result<()> {
        self.checkpoint.teardown().await?;
        self.queue.delete().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::TgOp;

    fn payload(tg_op: TgOp, table: &str, xmin: i64) -> Payload {
        Payload {
            tg_op,
            schema: "public".into(),
            table: table.into(),
            old: Default::default(),
            new: Default::default(),
            xmin: Some(xmin),
        }
    }

    #[test]
    fn split_batch_groups_pure_inserts_by_table() {
        let batch = vec![
            payload(TgOp::Insert, "book", 1),
            payload(TgOp::Insert, "author", 2),
            payload(TgOp::Insert, "book", 3),
        ];
        let runs = Sync::split_batch(batch);
        assert_eq!(runs.len(), 2);
        let book_run = runs.iter().find(|r| r[0].table == "book").unwrap();
        assert_eq!(book_run.len(), 2);
    }

    #[test]
    fn split_batch_preserves_order_on_mixed_tg_ops() {
        let batch = vec![
            payload(TgOp::Insert, "book", 1),
            payload(TgOp::Update, "book", 2),
            payload(TgOp::Insert, "book", 3),
        ];
        let runs = Sync::split_batch(batch);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0][0].tg_op, TgOp::Insert);
        assert_eq!(runs[1][0].tg_op, TgOp::Update);
        assert_eq!(runs[2][0].tg_op, TgOp::Insert);
    }

    #[test]
    fn split_batch_splits_only_on_tg_op_table_boundaries() {
        let batch = vec![
            payload(TgOp::Update, "book", 1),
            payload(TgOp::Update, "book", 2),
            payload(TgOp::Delete, "book", 3),
        ];
        let runs = Sync::split_batch(batch);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].len(), 2);
        assert_eq!(runs[1].len(), 1);
    }

    #[test]
    fn split_batch_empty_input_yields_no_runs() {
        assert!(Sync::split_batch(Vec::new()).is_empty());
    }
}
