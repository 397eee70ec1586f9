//! Driver: single-writer host for async or multi-threaded callers
//!
//! Procedures are `Rc`-based and run on one logical thread. The driver
//! gives them that thread: it owns the registry and everything registered
//! in it, and takes commands from a tokio channel strictly in arrival
//! order. [`DriverHandle`] is `Send + Clone` and can be used from any task.
//!
//! Dispatch handlers built during setup receive a [`WeakDriverHandle`], so
//! a component can finish its step later with
//! [`WeakDriverHandle::post_signal`]. Weak handles do not keep the driver
//! alive: once every [`DriverHandle`] is dropped the thread stops and
//! releases the procedure tree, even without a `shutdown`.

use crate::{Procedure, Registry};
use procedure_types::{
    JournalEntry, OwnerName, ProcedureError, ProcedureResult, ProcedureStatus, Token,
};
use std::rc::Rc;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<ProcedureResult<T>>;

enum Command {
    Begin {
        owner: OwnerName,
        reply: Reply<()>,
    },
    Signal {
        owner: OwnerName,
        token: Token,
        reply: Option<Reply<()>>,
    },
    Reset {
        owner: OwnerName,
        reply: Reply<()>,
    },
    Status {
        owner: OwnerName,
        reply: Reply<ProcedureStatus>,
    },
    Journal {
        owner: OwnerName,
        reply: Reply<Vec<JournalEntry>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Starts driver threads
pub struct Driver;

impl Driver {
    /// Spawn a driver thread and run `setup` on it.
    ///
    /// `setup` builds and registers the procedures the driver will serve.
    /// Its error, if any, is returned here and the thread exits.
    pub async fn spawn<F>(setup: F) -> ProcedureResult<DriverHandle>
    where
        F: FnOnce(&Rc<Registry>, &WeakDriverHandle) -> ProcedureResult<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = DriverHandle { tx };
        let thread_handle = handle.downgrade();
        let (ready_tx, ready_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("procedure-driver".into())
            .spawn(move || {
                let registry = Rc::new(Registry::new());
                let setup_result = setup(&registry, &thread_handle);
                drop(thread_handle);

                let ready = setup_result.is_ok();
                if ready_tx.send(setup_result).is_err() || !ready {
                    registry.clear();
                    return;
                }

                tracing::info!(procedures = registry.len(), "Procedure driver running");
                serve(&registry, rx);
                registry.clear();
                tracing::info!("Procedure driver stopped");
            })?;

        ready_rx.await.map_err(|_| ProcedureError::DriverClosed)??;
        Ok(handle)
    }
}

fn serve(registry: &Rc<Registry>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Begin { owner, reply } => {
                let result = registry.lookup(owner.as_str()).map(|p| p.begin());
                let _ = reply.send(result);
            }
            Command::Signal {
                owner,
                token,
                reply,
            } => {
                let result = registry.signal(owner.as_str(), token.as_str());
                if let Err(err) = &result {
                    tracing::warn!(owner = %owner, token = %token, error = %err, "Signal dropped");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Command::Reset { owner, reply } => {
                let result = registry.lookup(owner.as_str()).map(|p| p.reset());
                let _ = reply.send(result);
            }
            Command::Status { owner, reply } => {
                let result = registry
                    .lookup(owner.as_str())
                    .map(|p| snapshot(&owner, p.as_ref()));
                let _ = reply.send(result);
            }
            Command::Journal { owner, reply } => {
                let result = registry.lookup(owner.as_str()).map(|p| {
                    p.as_orchestrator()
                        .map(|orch| orch.journal())
                        .unwrap_or_default()
                });
                let _ = reply.send(result);
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
                break;
            }
        }
    }
}

fn snapshot(owner: &OwnerName, procedure: &dyn Procedure) -> ProcedureStatus {
    match procedure.as_orchestrator() {
        Some(orch) => orch.status(),
        None => ProcedureStatus {
            name: owner.clone(),
            state: procedure.state(),
            current: None,
            pending: Vec::new(),
            // Leaves have no runs
            completed_runs: 0,
            steps: Vec::new(),
        },
    }
}

/// Cloneable, thread-safe handle to a running driver
#[derive(Clone, Debug)]
pub struct DriverHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl DriverHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> ProcedureResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| ProcedureError::DriverClosed)?;
        rx.await.map_err(|_| ProcedureError::DriverClosed)?
    }

    pub async fn begin(&self, owner: impl Into<String>) -> ProcedureResult<()> {
        let owner = OwnerName::new(owner);
        self.request(|reply| Command::Begin { owner, reply }).await
    }

    /// Hand `token` to `owner` and wait until it has been processed
    pub async fn signal(
        &self,
        owner: impl Into<String>,
        token: impl Into<String>,
    ) -> ProcedureResult<()> {
        let owner = OwnerName::new(owner);
        let token = Token::new(token);
        self.request(|reply| Command::Signal {
            owner,
            token,
            reply: Some(reply),
        })
        .await
    }

    /// Queue a signal without waiting. Usable from inside the driver
    /// thread, where awaiting would deadlock. Unknown owners are logged
    /// and dropped by the driver.
    pub fn post_signal(
        &self,
        owner: impl Into<String>,
        token: impl Into<String>,
    ) -> ProcedureResult<()> {
        post(&self.tx, owner, token)
    }

    /// A handle that can post signals but does not keep the driver running
    pub fn downgrade(&self) -> WeakDriverHandle {
        WeakDriverHandle {
            tx: self.tx.downgrade(),
        }
    }

    pub async fn reset(&self, owner: impl Into<String>) -> ProcedureResult<()> {
        let owner = OwnerName::new(owner);
        self.request(|reply| Command::Reset { owner, reply }).await
    }

    pub async fn status(&self, owner: impl Into<String>) -> ProcedureResult<ProcedureStatus> {
        let owner = OwnerName::new(owner);
        self.request(|reply| Command::Status { owner, reply }).await
    }

    /// Journal of an orchestrator; empty for leaves
    pub async fn journal(&self, owner: impl Into<String>) -> ProcedureResult<Vec<JournalEntry>> {
        let owner = OwnerName::new(owner);
        self.request(|reply| Command::Journal { owner, reply }).await
    }

    /// Stop the driver and release its procedures
    pub async fn shutdown(&self) -> ProcedureResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .map_err(|_| ProcedureError::DriverClosed)?;
        rx.await.map_err(|_| ProcedureError::DriverClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn post(
    tx: &mpsc::UnboundedSender<Command>,
    owner: impl Into<String>,
    token: impl Into<String>,
) -> ProcedureResult<()> {
    tx.send(Command::Signal {
        owner: OwnerName::new(owner),
        token: Token::new(token),
        reply: None,
    })
    .map_err(|_| ProcedureError::DriverClosed)
}

/// Handle held by components living inside the driver
#[derive(Clone)]
pub struct WeakDriverHandle {
    tx: mpsc::WeakUnboundedSender<Command>,
}

impl WeakDriverHandle {
    /// Like [`DriverHandle::post_signal`]; `DriverClosed` once every strong
    /// handle is gone.
    pub fn post_signal(
        &self,
        owner: impl Into<String>,
        token: impl Into<String>,
    ) -> ProcedureResult<()> {
        let tx = self.tx.upgrade().ok_or(ProcedureError::DriverClosed)?;
        post(&tx, owner, token)
    }

    pub fn upgrade(&self) -> Option<DriverHandle> {
        self.tx.upgrade().map(|tx| DriverHandle { tx })
    }
}

impl std::fmt::Debug for WeakDriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakDriverHandle").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Begin { owner, .. } => write!(f, "Begin({})", owner),
            Command::Signal { owner, token, .. } => write!(f, "Signal({}, {})", owner, token),
            Command::Reset { owner, .. } => write!(f, "Reset({})", owner),
            Command::Status { owner, .. } => write!(f, "Status({})", owner),
            Command::Journal { owner, .. } => write!(f, "Journal({})", owner),
            Command::Shutdown { .. } => write!(f, "Shutdown"),
        }
    }
}
