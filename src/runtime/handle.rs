use std::{io::Cursor, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    adif::{Decision, Issue, LoadReport, load_book, open_decoder},
    catalog::FieldCatalog,
    config::LogConfig,
    core::book::{Book, BookError, BookSnapshotV1},
    persist::{BookSink, PersistError},
    reconcile::{
        ImportCounters, ImportSession, ImportSource, ReconcileError, Reconciler, Resolution,
        SessionState,
    },
    record::Record,
    types::{AdifFormat, RecordIndex, Status, Timestamp},
};

use super::events::LogEvent;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Book(#[from] BookError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("an import session is active")]
    SessionActive,
    #[error("no import session is active")]
    NoSession,
    #[error("runtime channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub command_capacity: usize,
    pub event_capacity: usize,
    /// Save a snapshot after this many applied changes; 0 disables.
    pub autosave_every_ops: usize,
    /// Skip unknown or misplaced ADX elements instead of aborting the load.
    /// Off by default, so structural issues abort.
    pub continue_on_structural: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_capacity: 256,
            event_capacity: 1024,
            autosave_every_ops: 0,
            continue_on_structural: false,
        }
    }
}

/// Snapshot of the active import session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatus {
    pub state: SessionState,
    pub counters: ImportCounters,
    pub remaining: usize,
}

#[derive(Clone)]
pub struct LogHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<LogEvent>,
}

enum Command {
    Load {
        format: AdifFormat,
        bytes: Vec<u8>,
        resp: oneshot::Sender<Result<LoadReport, RuntimeError>>,
    },
    Insert {
        record: Record,
        resp: oneshot::Sender<Result<RecordIndex, RuntimeError>>,
    },
    Get {
        index: RecordIndex,
        resp: oneshot::Sender<Option<Record>>,
    },
    Len {
        resp: oneshot::Sender<usize>,
    },
    Header {
        resp: oneshot::Sender<Option<Record>>,
    },
    Snapshot {
        resp: oneshot::Sender<BookSnapshotV1>,
    },
    BeginImport {
        source: ImportSource,
        records: Vec<Record>,
        resp: oneshot::Sender<Result<ImportStatus, RuntimeError>>,
    },
    Resolve {
        resolution: Resolution,
        resp: oneshot::Sender<Result<ImportStatus, RuntimeError>>,
    },
    CancelImport {
        resp: oneshot::Sender<Result<ImportCounters, RuntimeError>>,
    },
    ImportState {
        resp: oneshot::Sender<Option<ImportStatus>>,
    },
    FeedWatermark {
        resp: oneshot::Sender<Option<Timestamp>>,
    },
    Checkpoint {
        resp: oneshot::Sender<Result<Option<i64>, RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

/// Starts the log task. Must be called from within a tokio runtime.
pub fn spawn_log(
    book: Book,
    sink: Option<Box<dyn BookSink>>,
    catalog: Arc<dyn FieldCatalog>,
    config: LogConfig,
) -> LogHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.runtime.command_capacity.max(1));
    let (events_tx, _) = broadcast::channel::<LogEvent>(config.runtime.event_capacity.max(1));

    let mut actor = LogActor {
        book,
        reconciler: Reconciler::new(Arc::clone(&catalog), config.matching.clone()),
        session: None,
        catalog,
        config,
        sink: sink.map(|s| Arc::new(Mutex::new(s))),
        events_tx: events_tx.clone(),
        ops_since_save: 0,
    };

    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            if actor.handle_command(cmd).await {
                break;
            }
        }
        debug!("log task stopped");
    });

    LogHandle { cmd_tx, events_tx }
}

impl LogHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events_tx.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Replaces the book with the records decoded from `bytes`.
    pub async fn load(&self, format: AdifFormat, bytes: Vec<u8>) -> Result<LoadReport, RuntimeError> {
        self.request(|resp| Command::Load { format, bytes, resp }).await?
    }

    pub async fn insert(&self, record: Record) -> Result<RecordIndex, RuntimeError> {
        self.request(|resp| Command::Insert { record, resp }).await?
    }

    pub async fn get(&self, index: RecordIndex) -> Result<Option<Record>, RuntimeError> {
        self.request(|resp| Command::Get { index, resp }).await
    }

    pub async fn len(&self) -> Result<usize, RuntimeError> {
        self.request(|resp| Command::Len { resp }).await
    }

    pub async fn header(&self) -> Result<Option<Record>, RuntimeError> {
        self.request(|resp| Command::Header { resp }).await
    }

    pub async fn snapshot(&self) -> Result<BookSnapshotV1, RuntimeError> {
        self.request(|resp| Command::Snapshot { resp }).await
    }

    /// Starts an import and runs it until it finishes or needs a decision.
    pub async fn begin_import(
        &self,
        source: ImportSource,
        records: Vec<Record>,
    ) -> Result<ImportStatus, RuntimeError> {
        self.request(|resp| Command::BeginImport {
            source,
            records,
            resp,
        })
        .await?
    }

    pub async fn resolve(&self, resolution: Resolution) -> Result<ImportStatus, RuntimeError> {
        self.request(|resp| Command::Resolve { resolution, resp })
            .await?
    }

    pub async fn cancel_import(&self) -> Result<ImportCounters, RuntimeError> {
        self.request(|resp| Command::CancelImport { resp }).await?
    }

    pub async fn import_state(&self) -> Result<Option<ImportStatus>, RuntimeError> {
        self.request(|resp| Command::ImportState { resp }).await
    }

    pub async fn feed_watermark(&self) -> Result<Option<Timestamp>, RuntimeError> {
        self.request(|resp| Command::FeedWatermark { resp }).await
    }

    /// Saves a snapshot; `None` when no sink is attached.
    pub async fn checkpoint(&self) -> Result<Option<i64>, RuntimeError> {
        self.request(|resp| Command::Checkpoint { resp }).await?
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }
}

struct LogActor {
    book: Book,
    reconciler: Reconciler,
    session: Option<ImportSession>,
    catalog: Arc<dyn FieldCatalog>,
    config: LogConfig,
    sink: Option<Arc<Mutex<Box<dyn BookSink>>>>,
    events_tx: broadcast::Sender<LogEvent>,
    ops_since_save: usize,
}

impl LogActor {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Load {
                format,
                bytes,
                resp,
            } => {
                let res = self.load(format, bytes);
                if let Ok(report) = &res {
                    self.ops_since_save += report.accepted;
                    self.maybe_autosave().await;
                }
                let _ = resp.send(res);
            }
            Command::Insert { record, resp } => {
                let res = self.insert(record);
                if res.is_ok() {
                    self.ops_since_save += 1;
                    self.maybe_autosave().await;
                }
                let _ = resp.send(res);
            }
            Command::Get { index, resp } => {
                let _ = resp.send(self.book.get(index).cloned());
            }
            Command::Len { resp } => {
                let _ = resp.send(self.book.len());
            }
            Command::Header { resp } => {
                let _ = resp.send(self.book.header().cloned());
            }
            Command::Snapshot { resp } => {
                let _ = resp.send(self.book.export_snapshot());
            }
            Command::BeginImport {
                source,
                records,
                resp,
            } => {
                let res = if self.session.is_some() {
                    Err(RuntimeError::SessionActive)
                } else {
                    let mut session = self.reconciler.begin(source, records);
                    let before = session.counters();
                    let state = self.reconciler.run(&mut session, &mut self.book);
                    Ok(self.after_step(session, before, state))
                };
                self.maybe_autosave().await;
                let _ = resp.send(res);
            }
            Command::Resolve { resolution, resp } => {
                let res = match self.session.take() {
                    None => Err(RuntimeError::NoSession),
                    Some(mut session) => {
                        let before = session.counters();
                        match self
                            .reconciler
                            .resolve_pending(&mut session, &mut self.book, resolution)
                        {
                            Ok(state) => Ok(self.after_step(session, before, state)),
                            Err(err) => {
                                self.session = Some(session);
                                Err(err.into())
                            }
                        }
                    }
                };
                self.maybe_autosave().await;
                let _ = resp.send(res);
            }
            Command::CancelImport { resp } => {
                let res = match self.session.take() {
                    None => Err(RuntimeError::NoSession),
                    Some(mut session) => {
                        session.cancel();
                        let counters = session.counters();
                        let _ = self.events_tx.send(LogEvent::ImportFinished {
                            status: Status::Cancelled,
                            counters,
                        });
                        Ok(counters)
                    }
                };
                let _ = resp.send(res);
            }
            Command::ImportState { resp } => {
                let _ = resp.send(self.session.as_ref().map(status_of));
            }
            Command::FeedWatermark { resp } => {
                let _ = resp.send(self.reconciler.feed_watermark());
            }
            Command::Checkpoint { resp } => {
                let _ = resp.send(self.save().await);
            }
            Command::Shutdown { resp } => {
                let out = if self.ops_since_save > 0 {
                    self.save().await.map(|_| ())
                } else {
                    Ok(())
                };
                info!(records = self.book.len(), "log shutting down");
                let _ = resp.send(out);
                return true;
            }
        }

        false
    }

    fn load(&mut self, format: AdifFormat, bytes: Vec<u8>) -> Result<LoadReport, RuntimeError> {
        if self.session.is_some() {
            return Err(RuntimeError::SessionActive);
        }
        let decision = if self.config.runtime.continue_on_structural {
            Decision::Continue
        } else {
            Decision::Abort
        };
        let handler = move |issue: &Issue| {
            warn!(%issue, ?decision, "structural issue in ADX input");
            decision
        };
        let mut decoder = open_decoder(
            format,
            Cursor::new(bytes),
            Arc::clone(&self.catalog),
            self.config.decoder.clone(),
            handler,
        );
        let report = load_book(decoder.as_mut(), &mut self.book);
        let _ = self.events_tx.send(LogEvent::Loaded {
            accepted: report.accepted,
            rejected: report.rejected,
            status: report.status,
        });
        Ok(report)
    }

    fn insert(&mut self, record: Record) -> Result<RecordIndex, RuntimeError> {
        if self.session.is_some() {
            return Err(RuntimeError::SessionActive);
        }
        let index = self.book.insert(record)?;
        let _ = self.events_tx.send(LogEvent::Inserted { index });
        Ok(index)
    }

    /// Publishes the step's events and keeps the session if it is still open.
    fn after_step(
        &mut self,
        session: ImportSession,
        before: ImportCounters,
        state: SessionState,
    ) -> ImportStatus {
        let counters = session.counters();
        let changed = (counters.accepted - before.accepted) as usize;
        self.ops_since_save += changed;

        let merged = counters.updated - before.updated;
        if merged > 0 {
            let _ = self.events_tx.send(LogEvent::Updated { merged });
        }
        let _ = self.events_tx.send(LogEvent::ImportProgress {
            source: session.source(),
            counters,
            remaining: session.remaining(),
        });

        let status = status_of(&session);
        match state {
            SessionState::Finished(done) => {
                let _ = self.events_tx.send(LogEvent::ImportFinished {
                    status: done,
                    counters,
                });
            }
            SessionState::AwaitingDecision(pending) => {
                let _ = self.events_tx.send(LogEvent::AwaitingDecision(pending));
                self.session = Some(session);
            }
            SessionState::Running => {
                self.session = Some(session);
            }
        }
        status
    }

    async fn maybe_autosave(&mut self) {
        let every = self.config.runtime.autosave_every_ops;
        if every == 0 || self.ops_since_save < every || self.session.is_some() {
            return;
        }
        if let Err(err) = self.save().await {
            warn!(error = %err, "autosave failed");
        }
    }

    async fn save(&mut self) -> Result<Option<i64>, RuntimeError> {
        let Some(sink) = self.sink.as_ref() else {
            return Ok(None);
        };
        let snapshot = self.book.export_snapshot();
        let records = snapshot.records.len();
        let sink_ref = Arc::clone(sink);
        let id = tokio::task::spawn_blocking(move || {
            let mut sink = sink_ref.blocking_lock();
            let id = sink.save(&snapshot)?;
            sink.flush()?;
            Result::<i64, PersistError>::Ok(id)
        })
        .await
        .map_err(|e| PersistError::Format(format!("join error: {e}")))??;

        self.ops_since_save = 0;
        let _ = self.events_tx.send(LogEvent::Saved { id, records });
        Ok(Some(id))
    }
}

fn status_of(session: &ImportSession) -> ImportStatus {
    ImportStatus {
        state: session.state(),
        counters: session.counters(),
        remaining: session.remaining(),
    }
}
