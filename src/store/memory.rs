//! In-process store used when no REST store is configured, and by tests.

use super::types::{
    Department, Document, DocumentFilter, DocumentStatus, DocumentUpdate, NewDocument,
    Notification, QuickShare, StoreError, User,
};
use super::{DocumentStore, NotificationStore, QuickShareStore};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Document, notification, quick share, user and department tables held in memory.
#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<Uuid, Document>>,
    notifications: RwLock<HashMap<Uuid, Notification>>,
    quick_shares: RwLock<HashMap<Uuid, QuickShare>>,
    users: RwLock<HashMap<Uuid, User>>,
    departments: RwLock<HashMap<Uuid, Department>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user for notification lookups.
    pub async fn add_user(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }

    /// Register a department for notification lookups.
    pub async fn add_department(&self, department: Department) {
        self.departments
            .write()
            .await
            .insert(department.id, department);
    }

    /// Queue a quick share for delivery.
    pub async fn add_quick_share(&self, quick_share: QuickShare) {
        self.quick_shares
            .write()
            .await
            .insert(quick_share.id, quick_share);
    }

    /// All quick shares, oldest first.
    pub async fn quick_shares(&self) -> Vec<QuickShare> {
        let mut items: Vec<_> = self.quick_shares.read().await.values().cloned().collect();
        items.sort_by_key(|item| (item.created_at, item.id));
        items
    }

    /// All notifications, oldest first.
    pub async fn notifications(&self) -> Vec<Notification> {
        let mut items: Vec<_> = self.notifications.read().await.values().cloned().collect();
        items.sort_by_key(|item| (item.created_at, item.id));
        items
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert_document(&self, new: NewDocument) -> Result<Document, StoreError> {
        let document = Document::from_new(new, OffsetDateTime::now_utc());
        self.documents
            .write()
            .await
            .insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.read().await.get(&id).cloned())
    }

    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>, StoreError> {
        let mut items: Vec<_> = self
            .documents
            .read()
            .await
            .values()
            .filter(|document| filter.status.is_none_or(|status| document.status == status))
            .cloned()
            .collect();
        items.sort_by_key(|document| (document.created_at, document.id));
        items.truncate(filter.limit);
        Ok(items)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        update: DocumentUpdate,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "document",
            id,
        })?;
        document.apply(status, update, OffsetDateTime::now_utc());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn get_department(&self, id: Uuid) -> Result<Option<Department>, StoreError> {
        Ok(self.departments.read().await.get(&id).cloned())
    }

    async fn department_users(&self, department_id: Uuid) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<_> = self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.department_id == Some(department_id))
            .cloned()
            .collect();
        users.sort_by_key(|user| user.id);
        Ok(users)
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        self.notifications
            .write()
            .await
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn list_unsent(&self) -> Result<Vec<Notification>, StoreError> {
        Ok(self
            .notifications()
            .await
            .into_iter()
            .filter(|item| !item.sent)
            .collect())
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), StoreError> {
        let mut notifications = self.notifications.write().await;
        let notification = notifications.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "notification",
            id,
        })?;
        notification.sent = true;
        Ok(())
    }

    async fn has_notification(&self, document_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .notifications
            .read()
            .await
            .values()
            .any(|item| item.document_id == document_id))
    }
}

#[async_trait]
impl QuickShareStore for InMemoryStore {
    async fn list_unsent_quick_shares(&self) -> Result<Vec<QuickShare>, StoreError> {
        Ok(self
            .quick_shares()
            .await
            .into_iter()
            .filter(|item| !item.sent)
            .collect())
    }

    async fn mark_quick_share_sent(&self, id: Uuid) -> Result<(), StoreError> {
        let mut quick_shares = self.quick_shares.write().await;
        let quick_share = quick_shares.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "quick share",
            id,
        })?;
        quick_share.sent = true;
        Ok(())
    }
}
