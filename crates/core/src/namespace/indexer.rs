//! One indexer actor per metric, wrapping that metric's [`ShardStore`].
//!
//! Appends are buffered in the store and flushed by the periodic scheduler
//! tick (or on demand); counts and queries only see flushed records.

use std::time::Duration;

use nsdb_lib::{Bit, Schema};
use nsdb_sql_parser::{Expression, SelectStatement};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::error::{ReadError, WriteError};
use crate::messages::{CountGot, RecordAdded, RecordDeleted};
use crate::statement;
use crate::store::ShardStore;

pub(crate) enum IndexerCommand {
    AddRecord {
        record: Bit,
        respond_to: oneshot::Sender<Result<RecordAdded, WriteError>>,
    },
    DeleteRecord {
        record: Bit,
        respond_to: oneshot::Sender<Result<RecordDeleted, WriteError>>,
    },
    GetCount {
        respond_to: oneshot::Sender<Result<CountGot, ReadError>>,
    },
    ExecuteSelect {
        statement: SelectStatement,
        schema: Schema,
        respond_to: oneshot::Sender<Result<Vec<Bit>, ReadError>>,
    },
    ExecuteDelete {
        condition: Expression,
        schema: Schema,
        respond_to: oneshot::Sender<Result<usize, WriteError>>,
    },
    Flush {
        respond_to: oneshot::Sender<Result<usize, WriteError>>,
    },
    Shutdown {
        destroy: bool,
        respond_to: oneshot::Sender<Result<(), WriteError>>,
    },
}

#[derive(Clone)]
pub(crate) struct IndexerActor {
    tx: mpsc::UnboundedSender<IndexerCommand>,
}

impl IndexerActor {
    pub(crate) fn spawn(
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
        store: ShardStore,
        flush_interval: Duration,
    ) -> IndexerActor {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(
            Actor {
                db: db.into(),
                namespace: namespace.into(),
                metric: metric.into(),
                store,
                flush_interval,
            }
            .run(rx),
        );
        IndexerActor { tx }
    }

    /// Hands a command (carrying the final responder) to the actor. When the
    /// actor is gone the responder is dropped with the command and the caller
    /// observes a closed reply channel.
    pub(crate) fn forward(&self, command: IndexerCommand) {
        let _ = self.tx.send(command);
    }

    pub(crate) async fn stop(&self, destroy: bool) -> Result<(), WriteError> {
        let (tx, rx) = oneshot::channel();
        self.forward(IndexerCommand::Shutdown {
            destroy,
            respond_to: tx,
        });
        rx.await.map_err(|_| WriteError::Closed)?
    }
}

struct Actor {
    db: String,
    namespace: String,
    metric: String,
    store: ShardStore,
    flush_interval: Duration,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<IndexerCommand>) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(IndexerCommand::Shutdown { destroy, respond_to }) => {
                        break Some((destroy, respond_to));
                    }
                    Some(command) => self.handle(command),
                    None => break None,
                },
                _ = ticker.tick() => self.flush_tick(),
            }
        };

        match shutdown {
            Some((true, respond_to)) => {
                let _ = respond_to.send(self.store.destroy().map_err(Into::into));
            }
            Some((false, respond_to)) => {
                let _ = respond_to.send(self.store.flush().map(|_| ()).map_err(Into::into));
            }
            None => self.flush_tick(),
        }
    }

    fn flush_tick(&mut self) {
        if let Err(error) = self.store.flush() {
            log::error!(
                "flush of shard {} failed: {error}",
                self.store.root().display()
            );
        }
    }

    fn handle(&mut self, command: IndexerCommand) {
        match command {
            IndexerCommand::AddRecord { record, respond_to } => {
                self.store.append(record.clone());
                let _ = respond_to.send(Ok(RecordAdded {
                    db: self.db.clone(),
                    namespace: self.namespace.clone(),
                    metric: self.metric.clone(),
                    record,
                }));
            }
            IndexerCommand::DeleteRecord { record, respond_to } => {
                // Flush first so buffered appends are part of the match set.
                let result = self
                    .store
                    .flush()
                    .and_then(|_| self.store.delete(&record))
                    .map(|_| RecordDeleted {
                        db: self.db.clone(),
                        namespace: self.namespace.clone(),
                        metric: self.metric.clone(),
                        record,
                    })
                    .map_err(WriteError::from);
                let _ = respond_to.send(result);
            }
            IndexerCommand::GetCount { respond_to } => {
                let _ = respond_to.send(Ok(CountGot {
                    db: self.db.clone(),
                    namespace: self.namespace.clone(),
                    metric: self.metric.clone(),
                    count: self.store.count(),
                }));
            }
            IndexerCommand::ExecuteSelect {
                statement,
                schema,
                respond_to,
            } => {
                let result = statement::check_select(&statement, &schema)
                    .map(|()| match &statement.condition {
                        Some(condition) => {
                            self.store.query(|bit| statement::matches(condition, bit))
                        }
                        None => self.store.query(|_| true),
                    })
                    .map_err(ReadError::from);
                let _ = respond_to.send(result);
            }
            IndexerCommand::ExecuteDelete {
                condition,
                schema,
                respond_to,
            } => {
                let result = statement::check_expression(&condition, &schema)
                    .map_err(WriteError::from)
                    .and_then(|()| {
                        self.store.flush()?;
                        Ok(self
                            .store
                            .delete_matching(|bit| statement::matches(&condition, bit))?)
                    });
                let _ = respond_to.send(result);
            }
            IndexerCommand::Flush { respond_to } => {
                let _ = respond_to.send(self.store.flush().map_err(Into::into));
            }
            IndexerCommand::Shutdown { .. } => unreachable!("handled by the run loop"),
        }
    }
}
