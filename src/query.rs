use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{Lookup, MessageStore, Page, PartitionCounts, SearchFilter},
    error::Error,
    message::{Message, Partition},
};

/// Where a uuid currently rests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub partition: Partition,
    pub id: i64,
}

/// Read-only views over the partitions for operators.
#[derive(Clone)]
pub struct QueryService {
    store: MessageStore,
}

impl QueryService {
    pub fn new(store: MessageStore) -> Self {
        Self { store }
    }

    pub async fn search(
        &self,
        partition: Partition,
        filter: &SearchFilter,
    ) -> Result<Page<Message>, Error> {
        self.store.search(partition, filter).await
    }

    pub async fn get(&self, partition: Partition, lookup: Lookup) -> Result<Message, Error> {
        self.store.get(partition, lookup).await
    }

    pub async fn counts(&self) -> Result<PartitionCounts, Error> {
        self.store.counts().await
    }

    /// Follows a message across moves by its uuid. Messages already migrated to file
    /// storage are no longer located.
    pub async fn locate(&self, uuid: Uuid) -> Result<Location, Error> {
        self.store
            .locate(uuid)
            .await?
            .map(|(partition, id)| Location { partition, id })
            .ok_or_else(|| Error::not_found(format!("message {uuid}")))
    }
}
