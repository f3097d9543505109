//! Metadata store: documents, notifications, quick shares, and the user/department lookups
//! the delivery loops need.
//!
//! The pipeline only talks to the [`DocumentStore`] and [`NotificationStore`] traits. Every
//! mutation is a single-record update, so an adapter's own atomicity is enough to persist a
//! stage's output together with its status change.

pub mod memory;
pub mod rest;
pub mod types;

use async_trait::async_trait;
use uuid::Uuid;

pub use memory::InMemoryStore;
pub use rest::RestStore;
pub use types::{
    Department, Document, DocumentFilter, DocumentStatus, DocumentUpdate, NewDocument,
    Notification, QuickShare, StoreError, User,
};

/// Persistence for document records plus read-only user and department lookups.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document in the `uploaded` state.
    async fn insert_document(&self, new: NewDocument) -> Result<Document, StoreError>;

    /// Fetch a document by identifier.
    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, StoreError>;

    /// List documents, oldest first.
    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>, StoreError>;

    /// Set `status` and persist `update` in the same write.
    async fn update_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        update: DocumentUpdate,
    ) -> Result<(), StoreError>;

    /// Fetch a user by identifier.
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Fetch a department by identifier.
    async fn get_department(&self, id: Uuid) -> Result<Option<Department>, StoreError>;

    /// All users belonging to a department.
    async fn department_users(&self, department_id: Uuid) -> Result<Vec<User>, StoreError>;
}

/// Persistence for notification records.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Create a notification.
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError>;

    /// All notifications not yet delivered, oldest first.
    async fn list_unsent(&self) -> Result<Vec<Notification>, StoreError>;

    /// Flag a notification as delivered.
    async fn mark_sent(&self, id: Uuid) -> Result<(), StoreError>;

    /// Whether any notification, sent or not, exists for `document_id`.
    async fn has_notification(&self, document_id: Uuid) -> Result<bool, StoreError>;
}

/// Persistence for department quick shares.
#[async_trait]
pub trait QuickShareStore: Send + Sync {
    /// All quick shares not yet delivered, oldest first.
    async fn list_unsent_quick_shares(&self) -> Result<Vec<QuickShare>, StoreError>;

    /// Flag a quick share as delivered.
    async fn mark_quick_share_sent(&self, id: Uuid) -> Result<(), StoreError>;
}
