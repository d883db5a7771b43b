//! Streaming SQL Server row source.
//!
//! The query runs on a spawned task over a dedicated connection and feeds
//! rows through a bounded channel, so the engine pulls one row at a time
//! while the server keeps streaming.

use async_trait::async_trait;
use futures::TryStreamExt;
use tiberius::ToSql;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::mapping::Mapping;
use crate::core::row::SourceRow;
use crate::core::traits::{RowSource, RowSourceFactory};
use crate::drivers::mssql::connection::{map_tiberius_error, row_values, timed};
use crate::drivers::mssql::convert::to_sql_param;
use crate::drivers::mssql::MssqlPool;
use crate::error::{Result, SyncError};

use super::{SourceQuery, SourceQueryBuilder};

/// Rows buffered between the reader task and the engine.
const CHANNEL_CAPACITY: usize = 16;

/// Opens one streaming query per mapping against the source pool.
pub struct MssqlSourceFactory {
    pool: MssqlPool,
}

impl MssqlSourceFactory {
    pub fn new(pool: MssqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RowSourceFactory for MssqlSourceFactory {
    async fn open(&self, mapping: &Mapping) -> Result<Box<dyn RowSource>> {
        let query = SourceQueryBuilder::new(mapping).build()?;
        debug!("Source query for {}: {}", mapping.source_table.full_name(), query.sql);

        let client = self
            .pool
            .inner()
            .dedicated_connection()
            .await
            .map_err(map_tiberius_error)?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let limit = self.pool.command_timeout();
        let handle = tokio::spawn(async move {
            if let Err(e) = stream_rows(client, query, limit, tx.clone()).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(Box::new(MssqlRowSource {
            rx: Some(rx),
            handle: Some(handle),
        }))
    }
}

async fn stream_rows(
    mut client: crate::drivers::mssql::pool::MssqlClient,
    query: SourceQuery,
    limit: Option<std::time::Duration>,
    tx: mpsc::Sender<Result<SourceRow>>,
) -> Result<()> {
    let boxed: Vec<Box<dyn ToSql>> = query.params.iter().map(to_sql_param).collect();
    let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();

    let stream = timed(limit, &query.sql, client.query(query.sql.as_str(), &refs)).await?;
    let mut rows = stream.into_row_stream();

    while let Some(row) = rows.try_next().await.map_err(map_tiberius_error)? {
        let values = row_values(row)?;
        let mut source_row = SourceRow::with_capacity(values.len());
        for (name, value) in query.columns.iter().zip(values) {
            source_row.insert(name.as_str(), value);
        }
        if tx.send(Ok(source_row)).await.is_err() {
            // receiver closed early
            break;
        }
    }
    Ok(())
}

/// Pull side of a streaming source query.
pub struct MssqlRowSource {
    rx: Option<mpsc::Receiver<Result<SourceRow>>>,
    handle: Option<JoinHandle<()>>,
}

#[async_trait]
impl RowSource for MssqlRowSource {
    async fn next_row(&mut self) -> Result<Option<SourceRow>> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(SyncError::Config("row source read after close".into()));
        };
        match rx.recv().await {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
