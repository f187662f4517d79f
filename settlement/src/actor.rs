//! Actor-based access to the executor
//!
//! Blocking executor calls wait on a lock. Async callers that must not block
//! their runtime go through an `ExecutorHandle`: every call becomes a message
//! in a bounded mailbox drained by one task, so calls run strictly one after
//! another.
//!
//! ```text
//!   ExecutorHandle (Clone) ──▶ mpsc::channel (bounded) ──▶ SettlementActor
//!                                                              │
//!                                                              ▼
//!                                                   SettlementExecutor::*
//! ```

use crate::events::SettlementEvent;
use crate::executor::{Receipt, SettlementExecutor};
use crate::subscription::Executed;
use crate::types::{CreateSubscription, ExecuteSubscription, GasPricing, Subscription};
use crate::{Error, Result};
use reservation_ledger::{Address, AssetBook};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

type Job<A> = Box<dyn FnOnce(&SettlementExecutor<A>) + Send>;

/// Message sent to the settlement actor
pub enum SettlementMessage<A: AssetBook> {
    /// Run a closure against the executor
    Call(Job<A>),

    /// Shutdown actor
    Shutdown,
}

impl<A: AssetBook> std::fmt::Debug for SettlementMessage<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call(_) => f.write_str("Call(..)"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Actor owning the executor
pub struct SettlementActor<A: AssetBook> {
    executor: Arc<SettlementExecutor<A>>,
    mailbox: mpsc::Receiver<SettlementMessage<A>>,
}

impl<A: AssetBook> std::fmt::Debug for SettlementActor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementActor")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl<A: AssetBook> SettlementActor<A> {
    /// Create new actor
    pub fn new(
        executor: Arc<SettlementExecutor<A>>,
        mailbox: mpsc::Receiver<SettlementMessage<A>>,
    ) -> Self {
        Self { executor, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                SettlementMessage::Call(job) => job(&self.executor),
                SettlementMessage::Shutdown => break,
            }
        }
        tracing::debug!("Settlement actor stopped");
    }
}

/// Handle for sending calls to the actor
pub struct ExecutorHandle<A: AssetBook> {
    sender: mpsc::Sender<SettlementMessage<A>>,
}

impl<A: AssetBook> std::fmt::Debug for ExecutorHandle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorHandle")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl<A: AssetBook> Clone for ExecutorHandle<A> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<A: AssetBook> ExecutorHandle<A>
where
    SettlementExecutor<A>: Send + Sync,
{
    /// Create new handle
    pub fn new(sender: mpsc::Sender<SettlementMessage<A>>) -> Self {
        Self { sender }
    }

    /// Run any executor operation on the actor
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SettlementExecutor<A>) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job<A> = Box::new(move |executor| {
            let _ = tx.send(f(executor));
        });
        self.sender
            .send(SettlementMessage::Call(job))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Create a regular authorization
    pub async fn create_subscription(
        &self,
        caller: Address,
        request: CreateSubscription,
        pricing: GasPricing,
    ) -> Result<Receipt<Subscription>> {
        self.call(move |executor| executor.create_subscription(&caller, &request, pricing))
            .await
    }

    /// Execute a due regular payment
    pub async fn execute_subscription(
        &self,
        caller: Address,
        request: ExecuteSubscription,
        pricing: GasPricing,
    ) -> Result<Receipt<Executed>> {
        self.call(move |executor| executor.execute_subscription(&caller, &request, pricing))
            .await
    }

    /// Cancel with the payer's signature
    pub async fn cancel_subscription(
        &self,
        caller: Address,
        id: Uuid,
        signature: Vec<u8>,
    ) -> Result<Receipt<bool>> {
        self.call(move |executor| executor.cancel_subscription(&caller, id, &signature))
            .await
    }

    /// Authorization by id
    pub async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>> {
        self.call(move |executor| executor.get_subscription(&id)).await
    }

    /// Take all committed events
    pub async fn drain_events(&self) -> Result<Vec<SettlementEvent>> {
        self.call(|executor| executor.drain_events()).await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SettlementMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the settlement actor
pub fn spawn_settlement_actor<A>(executor: Arc<SettlementExecutor<A>>, capacity: usize) -> ExecutorHandle<A>
where
    A: AssetBook,
    SettlementExecutor<A>: Send + Sync,
{
    let (tx, rx) = mpsc::channel(capacity); // Bounded channel for backpressure
    let actor = SettlementActor::new(executor, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    ExecutorHandle::new(tx)
}
