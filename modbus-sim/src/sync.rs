use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::StreamExt;
use log::warn;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::IntervalStream;

use crate::codec::{self, CodecError, Value};
use crate::point::RegisterPoint;
use crate::store::{PointStore, StoreError};

/// Surface of the serving backend consumed by the sync engine.
///
/// Raw buffers cross this boundary as base64 text because the channel is
/// text-oriented; the engine owns the decoding on both directions.
#[async_trait]
pub trait RegisterBackend: Send + Sync {
    async fn start_server(&self, port: u16) -> Result<(), io::Error>;
    async fn stop_server(&self) -> Result<(), io::Error>;
    async fn list_configs(&self) -> Result<Vec<RegisterPoint>, io::Error>;
    async fn upsert_config(&self, point: RegisterPoint) -> Result<(), io::Error>;
    async fn remove_config(&self, id: &str) -> Result<(), io::Error>;
    /// Reset the backend to exactly this set of points.
    async fn init_configs(&self, points: Vec<RegisterPoint>) -> Result<(), io::Error>;
    async fn get_values(&self) -> Result<HashMap<String, String>, io::Error>;
    async fn set_value(&self, id: &str, value: &str) -> Result<(), io::Error>;
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("backend poll failed: {source}")]
    Poll {
        #[source]
        source: io::Error,
    },
    #[error("backend write for {id:?} failed: {source}")]
    Write {
        id: String,
        #[source]
        source: io::Error,
    },
    #[error("backend config call for {id:?} failed: {source}")]
    Config {
        id: String,
        #[source]
        source: io::Error,
    },
    #[error("corrupt value transport for {id:?}: {source}")]
    Transport {
        id: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("no register point with id {id:?}")]
    UnknownId { id: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Direction of a delta step against the scaled value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Increase,
    Decrease,
}

/// Keeps the point store in sync with the serving backend.
///
/// A recurring task polls the backend's value snapshot; every write is
/// followed by an immediate extra poll so the store reflects
/// backend-confirmed state instead of the optimistic write. The
/// write-triggered poll does not reset the periodic cadence. Failed backend
/// calls are surfaced, never retried here.
pub struct SyncEngine<B> {
    backend: Arc<B>,
    store: Arc<Mutex<PointStore>>,
    poller: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl<B: RegisterBackend + 'static> SyncEngine<B> {
    pub fn new(backend: Arc<B>, store: Arc<Mutex<PointStore>>) -> Self {
        Self {
            backend,
            store,
            poller: None,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn store(&self) -> Arc<Mutex<PointStore>> {
        Arc::clone(&self.store)
    }

    async fn poll_once(backend: &B, store: &Mutex<PointStore>) -> Result<(), SyncError> {
        let encoded = backend
            .get_values()
            .await
            .map_err(|source| SyncError::Poll { source })?;
        let mut snapshot = HashMap::with_capacity(encoded.len());
        for (id, text) in encoded {
            let bytes = STANDARD
                .decode(&text)
                .map_err(|source| SyncError::Transport {
                    id: id.clone(),
                    source,
                })?;
            snapshot.insert(id, bytes);
        }
        store.lock().unwrap().apply_snapshot(snapshot);
        Ok(())
    }

    /// Fetch the backend's live register snapshot and make it the store's
    /// current raw state.
    pub async fn poll(&self) -> Result<(), SyncError> {
        Self::poll_once(&self.backend, &self.store).await
    }

    /// Send a raw buffer to the backend, then resync. The poll is sequenced
    /// after the backend acknowledged the write.
    pub async fn write(&self, id: &str, raw: &[u8]) -> Result<(), SyncError> {
        let expected = {
            let store = self.store.lock().unwrap();
            store
                .get(id)
                .ok_or_else(|| SyncError::UnknownId { id: id.to_string() })?
                .raw_len()
        };
        if raw.len() != expected {
            return Err(CodecError::SizeMismatch {
                expected,
                actual: raw.len(),
            }
            .into());
        }

        self.backend
            .set_value(id, &STANDARD.encode(raw))
            .await
            .map_err(|source| SyncError::Write {
                id: id.to_string(),
                source,
            })?;
        self.poll().await
    }

    /// Step a point's value by its configured delta in engineering units.
    ///
    /// The new raw value is `round((engineering ± delta - offset) / scale)`
    /// with ties away from zero, re-encoded and written through [`Self::write`].
    pub async fn step_value(&self, id: &str, direction: StepDirection) -> Result<(), SyncError> {
        let (point, raw) = {
            let store = self.store.lock().unwrap();
            let point = store
                .get(id)
                .cloned()
                .ok_or_else(|| SyncError::UnknownId { id: id.to_string() })?;
            let raw = store
                .raw_value(id)
                .map(<[u8]>::to_vec)
                .unwrap_or_default();
            (point, raw)
        };

        let engineering = match point.to_engineering(&raw)? {
            Value::Number(n) => n,
            // stepping is defined on the numeric path only
            Value::Bool(_) => {
                return Err(CodecError::UnsupportedType {
                    data_type: point.value_type,
                }
                .into())
            }
        };
        let stepped = match direction {
            StepDirection::Increase => engineering + point.delta,
            StepDirection::Decrease => engineering - point.delta,
        };
        let raw_scaled = ((stepped - point.offset) / point.scale).round();
        let buf = codec::encode(Value::Number(raw_scaled), point.byte_order, point.value_type)?;
        self.write(id, &buf).await
    }

    /// Put a point into the store and mirror it to the backend. Disabled
    /// points stay local: the backend entry is removed so the span is no
    /// longer served.
    pub async fn upsert_point(&self, point: RegisterPoint) -> Result<(), SyncError> {
        let id = point.id.clone();
        let enabled = point.enabled;
        self.store.lock().unwrap().upsert(point.clone())?;

        let result = if enabled {
            self.backend.upsert_config(point).await
        } else {
            self.backend.remove_config(&id).await
        };
        result.map_err(|source| SyncError::Config { id, source })?;
        self.poll().await
    }

    /// Remove a point from the store and the backend.
    pub async fn remove_point(&self, id: &str) -> Result<(), SyncError> {
        self.store.lock().unwrap().remove(id)?;
        self.backend
            .remove_config(id)
            .await
            .map_err(|source| SyncError::Config {
                id: id.to_string(),
                source,
            })?;
        self.poll().await
    }

    /// Replace the whole collection (all-or-nothing) and reset the backend
    /// to the enabled subset.
    pub async fn import_points(&self, points: Vec<RegisterPoint>) -> Result<(), SyncError> {
        self.store.lock().unwrap().import_all(points.clone())?;
        let enabled: Vec<RegisterPoint> = points.into_iter().filter(|p| p.enabled).collect();
        self.backend
            .init_configs(enabled)
            .await
            .map_err(|source| SyncError::Config {
                id: String::new(),
                source,
            })?;
        self.poll().await
    }

    /// Recover the collection from the backend, e.g. when attaching to an
    /// already-running server.
    pub async fn load_points(&self) -> Result<(), SyncError> {
        let points = self
            .backend
            .list_configs()
            .await
            .map_err(|source| SyncError::Poll { source })?;
        self.store.lock().unwrap().import_all(points)?;
        self.poll().await
    }

    /// Spawn the recurring poll task. The first tick fires immediately,
    /// then every `period`. A running poller is replaced.
    pub fn start(&mut self, period: Duration) {
        self.stop();
        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticks = IntervalStream::new(tokio::time::interval(period));
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticks.next() => {
                        if let Err(err) = Self::poll_once(&backend, &store).await {
                            warn!("periodic poll failed: {err}");
                        }
                    }
                }
            }
        });
        self.poller = Some((shutdown_tx, handle));
    }

    /// Cancel the recurring poll task.
    pub fn stop(&mut self) {
        if let Some((shutdown_tx, handle)) = self.poller.take() {
            let _ = shutdown_tx.send(true);
            handle.abort();
        }
    }
}

impl<B> Drop for SyncEngine<B> {
    fn drop(&mut self) {
        if let Some((shutdown_tx, handle)) = self.poller.take() {
            let _ = shutdown_tx.send(true);
            handle.abort();
        }
    }
}
