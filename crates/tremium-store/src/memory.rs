//! In-process coordination store
//!
//! A kameo actor owns the store state, so every operation is serialised
//! through its mailbox. Suitable when the producer and the maintenance run
//! share one process, and for tests.

use async_trait::async_trait;
use kameo::actor::{ActorRef, Spawn};
use kameo::error::SendError;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tracing::debug;

use crate::error::StoreError;
use crate::flag::{Flag, StoreSnapshot};
use crate::state::StoreState;
use crate::traits::CoordinationStore;

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub struct GetFlag {
    pub flag: Flag,
}

#[derive(Debug)]
pub struct SetFlag {
    pub flag: Flag,
    pub value: bool,
}

#[derive(Debug)]
pub struct CompareAndSet {
    pub flag: Flag,
    pub current: bool,
    pub new: bool,
}

#[derive(Debug)]
pub struct PushExportRequest {
    pub request: String,
}

#[derive(Debug)]
pub struct PopExportRequest;

#[derive(Debug)]
pub struct Initialize;

#[derive(Debug)]
pub struct Snapshot;

// ============================================================================
// Actor
// ============================================================================

/// Actor holding the store state
pub struct StoreActor {
    state: StoreState,
}

impl Actor for StoreActor {
    type Args = StoreState;
    type Error = StoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        debug!(id = %actor_ref.id(), "StoreActor starting");
        Ok(Self { state: args })
    }
}

impl Message<GetFlag> for StoreActor {
    type Reply = Result<bool, StoreError>;

    async fn handle(&mut self, msg: GetFlag, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        Ok(self.state.get(msg.flag))
    }
}

impl Message<SetFlag> for StoreActor {
    type Reply = Result<(), StoreError>;

    async fn handle(&mut self, msg: SetFlag, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.state.set(msg.flag, msg.value);
        Ok(())
    }
}

impl Message<CompareAndSet> for StoreActor {
    type Reply = Result<bool, StoreError>;

    async fn handle(
        &mut self,
        msg: CompareAndSet,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.state.compare_and_set(msg.flag, msg.current, msg.new))
    }
}

impl Message<PushExportRequest> for StoreActor {
    type Reply = Result<(), StoreError>;

    async fn handle(
        &mut self,
        msg: PushExportRequest,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.state.push_export_request(msg.request);
        Ok(())
    }
}

impl Message<PopExportRequest> for StoreActor {
    type Reply = Result<Option<String>, StoreError>;

    async fn handle(
        &mut self,
        _msg: PopExportRequest,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.state.pop_export_request())
    }
}

impl Message<Initialize> for StoreActor {
    type Reply = Result<bool, StoreError>;

    async fn handle(
        &mut self,
        _msg: Initialize,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.state.initialize())
    }
}

impl Message<Snapshot> for StoreActor {
    type Reply = StoreSnapshot;

    async fn handle(&mut self, _msg: Snapshot, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.state.snapshot()
    }
}

// ============================================================================
// Handle
// ============================================================================

/// `CoordinationStore` backed by a [`StoreActor`]
#[derive(Clone)]
pub struct MemoryStore {
    actor: ActorRef<StoreActor>,
}

impl MemoryStore {
    /// Spawn a store with every flag unset
    #[must_use]
    pub fn spawn() -> Self {
        Self::with_state(StoreState::default())
    }

    /// Spawn a store seeded with `state`
    #[must_use]
    pub fn with_state(state: StoreState) -> Self {
        Self {
            actor: StoreActor::spawn(state),
        }
    }

    /// Stop the backing actor; later operations fail with `Unavailable`
    pub async fn shutdown(&self) {
        self.actor.stop_gracefully().await.ok();
    }
}

fn handler_error<M>(err: SendError<M, StoreError>) -> StoreError {
    match err {
        SendError::HandlerError(e) => e,
        other => unavailable(other),
    }
}

fn unavailable<M, E>(_err: SendError<M, E>) -> StoreError {
    StoreError::Unavailable("store actor is not running".to_string())
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get_flag(&self, flag: Flag) -> Result<bool, StoreError> {
        self.actor.ask(GetFlag { flag }).await.map_err(handler_error)
    }

    async fn set_flag(&self, flag: Flag, value: bool) -> Result<(), StoreError> {
        self.actor
            .ask(SetFlag { flag, value })
            .await
            .map_err(handler_error)
    }

    async fn compare_and_set(
        &self,
        flag: Flag,
        current: bool,
        new: bool,
    ) -> Result<bool, StoreError> {
        self.actor
            .ask(CompareAndSet { flag, current, new })
            .await
            .map_err(handler_error)
    }

    async fn push_export_request(&self, request: &str) -> Result<(), StoreError> {
        self.actor
            .ask(PushExportRequest {
                request: request.to_string(),
            })
            .await
            .map_err(handler_error)
    }

    async fn pop_export_request(&self) -> Result<Option<String>, StoreError> {
        self.actor.ask(PopExportRequest).await.map_err(handler_error)
    }

    async fn initialize(&self) -> Result<bool, StoreError> {
        self.actor.ask(Initialize).await.map_err(handler_error)
    }

    async fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        self.actor.ask(Snapshot).await.map_err(unavailable)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flags_round_trip_through_actor() {
        let store = MemoryStore::spawn();

        assert!(store.data_collection_enabled().await.unwrap());
        store.stop_data_collection().await.unwrap();
        assert!(!store.data_collection_enabled().await.unwrap());
        store.start_data_collection().await.unwrap();
        assert!(store.data_collection_enabled().await.unwrap());

        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_compare_and_set_is_exclusive() {
        let store = MemoryStore::spawn();

        assert!(store.compare_and_set(Flag::DataFileLock, false, true).await.unwrap());
        assert!(!store.compare_and_set(Flag::DataFileLock, false, true).await.unwrap());

        store.set_flag(Flag::DataFileLock, false).await.unwrap();
        assert!(store.compare_and_set(Flag::DataFileLock, false, true).await.unwrap());

        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_counts_requests() {
        let store = MemoryStore::spawn();
        store.initialize().await.unwrap();
        store.push_export_request("2020-01-01_00-00-00").await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert!(snapshot.initialized);
        assert!(snapshot.data_collection);
        assert!(!snapshot.data_file_lock);
        assert_eq!(snapshot.pending_export_requests, 1);

        store.shutdown().await;
    }
}
