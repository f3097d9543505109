//! HTTP adapter for a PostgREST-style metadata store (e.g. Supabase).
//!
//! Tables are addressed as `/rest/v1/{table}` and rows are selected with `column=eq.value`
//! filters. Inserts and updates ask for `Prefer: return=representation` so the adapter can
//! tell an update that matched nothing from one that succeeded.

use super::types::{
    Department, Document, DocumentFilter, DocumentStatus, DocumentUpdate, NewDocument,
    Notification, QuickShare, StoreError, User,
};
use super::{DocumentStore, NotificationStore, QuickShareStore};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

const DOCUMENTS: &str = "documents";
const NOTIFICATIONS: &str = "notifications";
const USERS: &str = "users";
const DEPARTMENTS: &str = "departments";
const QUICK_SHARES: &str = "quick_shares";

/// Lightweight HTTP client for the metadata store.
pub struct RestStore {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl RestStore {
    /// Construct a store client for `base_url`.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .user_agent("docpipe/store")
            .timeout(timeout)
            .build()?;
        let base_url = normalize_base_url(base_url).map_err(StoreError::Misconfigured)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized REST store client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let url = format_endpoint(&self.base_url, &format!("rest/v1/{table}"));
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("apikey", api_key).bearer_auth(api_key);
        }
        req
    }

    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let response = self.request(Method::GET, table).query(query).send().await?;
        let response = ensure_success(response, table).await?;
        response
            .json()
            .await
            .map_err(|error| StoreError::InvalidResponse(error.to_string()))
    }

    async fn fetch_one<T: DeserializeOwned>(
        &self,
        table: &str,
        id: Uuid,
    ) -> Result<Option<T>, StoreError> {
        let rows = self
            .fetch_rows(
                table,
                &[("id", format!("eq.{id}")), ("select", "*".into())],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn write_rows<B: Serialize + ?Sized>(
        &self,
        method: Method,
        table: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let response = self
            .request(method, table)
            .query(query)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        let response = ensure_success(response, table).await?;
        response
            .json()
            .await
            .map_err(|error| StoreError::InvalidResponse(error.to_string()))
    }

    async fn patch_by_id<B: Serialize + ?Sized>(
        &self,
        table: &str,
        entity: &'static str,
        id: Uuid,
        body: &B,
    ) -> Result<(), StoreError> {
        let rows = self
            .write_rows(Method::PATCH, table, &[("id", format!("eq.{id}"))], body)
            .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound { entity, id });
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusPatch<'a> {
    status: DocumentStatus,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
    #[serde(flatten)]
    update: &'a DocumentUpdate,
}

#[async_trait]
impl DocumentStore for RestStore {
    async fn insert_document(&self, new: NewDocument) -> Result<Document, StoreError> {
        let document = Document::from_new(new, OffsetDateTime::now_utc());
        let rows = self
            .write_rows(Method::POST, DOCUMENTS, &[], &document)
            .await?;
        match rows.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map_err(|error| StoreError::InvalidResponse(error.to_string())),
            None => Ok(document),
        }
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        self.fetch_one(DOCUMENTS, id).await
    }

    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>, StoreError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "created_at.asc".to_string()),
            ("limit", filter.limit.to_string()),
        ];
        if let Some(status) = filter.status {
            query.push(("status", format!("eq.{status}")));
        }
        self.fetch_rows(DOCUMENTS, &query).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        update: DocumentUpdate,
    ) -> Result<(), StoreError> {
        let mut update = update;
        if status != DocumentStatus::Error {
            update.error_message = None;
        }
        let patch = StatusPatch {
            status,
            updated_at: OffsetDateTime::now_utc(),
            update: &update,
        };
        self.patch_by_id(DOCUMENTS, "document", id, &patch).await?;
        tracing::debug!(document_id = %id, %status, "Document status updated");
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.fetch_one(USERS, id).await
    }

    async fn get_department(&self, id: Uuid) -> Result<Option<Department>, StoreError> {
        self.fetch_one(DEPARTMENTS, id).await
    }

    async fn department_users(&self, department_id: Uuid) -> Result<Vec<User>, StoreError> {
        self.fetch_rows(
            USERS,
            &[
                ("select", "*".into()),
                ("department_id", format!("eq.{department_id}")),
            ],
        )
        .await
    }
}

#[async_trait]
impl NotificationStore for RestStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        self.write_rows(Method::POST, NOTIFICATIONS, &[], notification)
            .await?;
        Ok(())
    }

    async fn list_unsent(&self) -> Result<Vec<Notification>, StoreError> {
        self.fetch_rows(
            NOTIFICATIONS,
            &[
                ("select", "*".into()),
                ("sent", "eq.false".into()),
                ("order", "created_at.asc".into()),
            ],
        )
        .await
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), StoreError> {
        self.patch_by_id(NOTIFICATIONS, "notification", id, &json!({ "sent": true }))
            .await
    }

    async fn has_notification(&self, document_id: Uuid) -> Result<bool, StoreError> {
        let rows: Vec<serde_json::Value> = self
            .fetch_rows(
                NOTIFICATIONS,
                &[
                    ("select", "id".into()),
                    ("document_id", format!("eq.{document_id}")),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl QuickShareStore for RestStore {
    async fn list_unsent_quick_shares(&self) -> Result<Vec<QuickShare>, StoreError> {
        self.fetch_rows(
            QUICK_SHARES,
            &[
                ("select", "*".into()),
                ("sent", "eq.false".into()),
                ("order", "created_at.asc".into()),
            ],
        )
        .await
    }

    async fn mark_quick_share_sent(&self, id: Uuid) -> Result<(), StoreError> {
        self.patch_by_id(QUICK_SHARES, "quick share", id, &json!({ "sent": true }))
            .await
    }
}

async fn ensure_success(response: Response, table: &str) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let error = StoreError::UnexpectedStatus { status, body };
    tracing::error!(table, error = %error, "Store request failed");
    Err(error)
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{GET, PATCH, POST},
        MockServer,
    };
    use regex::Regex;

    fn store_for(server: &MockServer) -> RestStore {
        RestStore::new(
            &server.base_url(),
            Some("service-key".into()),
            Duration::from_secs(5),
        )
        .expect("store")
    }

    fn sample_document() -> Document {
        Document::from_new(
            NewDocument {
                file_name: "scan.pdf".into(),
                language: "en".into(),
                file_path: "dept/scan.pdf".into(),
                department_ids: vec![Uuid::new_v4()],
                owner_id: Uuid::new_v4(),
            },
            OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("timestamp"),
        )
    }

    #[test]
    fn normalize_base_url_strips_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://db.example.org/").expect("url"),
            "https://db.example.org/"
        );
        assert_eq!(
            format_endpoint("https://db.example.org/", "/rest/v1/documents"),
            "https://db.example.org/rest/v1/documents"
        );
        assert!(normalize_base_url("not a url").is_err());
    }

    #[tokio::test]
    async fn get_document_sends_credentials_and_eq_filter() {
        let server = MockServer::start_async().await;
        let document = sample_document();
        let id = document.id;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/rest/v1/documents")
                    .query_param("id", format!("eq.{id}"))
                    .header("apikey", "service-key")
                    .header("authorization", "Bearer service-key");
                then.status(200)
                    .json_body(serde_json::to_value(vec![document.clone()]).expect("json"));
            })
            .await;

        let fetched = store_for(&server)
            .get_document(id)
            .await
            .expect("request")
            .expect("present");

        mock.assert();
        assert_eq!(fetched, document);
    }

    #[tokio::test]
    async fn list_documents_applies_status_filter_and_limit() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/rest/v1/documents")
                    .query_param("status", "eq.ocr_done")
                    .query_param("limit", "5")
                    .query_param("order", "created_at.asc");
                then.status(200).json_body(json!([]));
            })
            .await;

        let documents = store_for(&server)
            .list_documents(&DocumentFilter {
                status: Some(DocumentStatus::OcrDone),
                limit: 5,
            })
            .await
            .expect("list");

        mock.assert();
        assert!(documents.is_empty());
    }

    #[tokio::test]
    async fn update_status_patches_status_with_fields() {
        let server = MockServer::start_async().await;
        let id = Uuid::new_v4();
        let mock = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/rest/v1/documents")
                    .query_param("id", format!("eq.{id}"))
                    .header("prefer", "return=representation")
                    .body_contains("\"status\":\"ocr_done\"")
                    .body_contains("\"ocr_text\":\"A\\nB\\n\"")
                    .body_contains("\"error_message\":null");
                then.status(200).json_body(json!([{ "id": id }]));
            })
            .await;

        store_for(&server)
            .update_status(
                id,
                DocumentStatus::OcrDone,
                DocumentUpdate::ocr("A\nB\n".into(), 0.5, OffsetDateTime::now_utc()),
            )
            .await
            .expect("update");

        mock.assert();
    }

    #[tokio::test]
    async fn update_status_reports_not_found_for_empty_representation() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PATCH).path("/rest/v1/documents");
                then.status(200).json_body(json!([]));
            })
            .await;

        let error = store_for(&server)
            .update_status(
                Uuid::new_v4(),
                DocumentStatus::Error,
                DocumentUpdate::failure("boom"),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::NotFound { entity: "document", .. }));
    }

    #[tokio::test]
    async fn list_unsent_and_mark_sent_use_sent_flag() {
        let server = MockServer::start_async().await;
        let notification =
            Notification::new(Uuid::new_v4(), Uuid::new_v4(), OffsetDateTime::now_utc());
        let id = notification.id;
        let list = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/rest/v1/notifications")
                    .query_param("sent", "eq.false");
                then.status(200)
                    .json_body(serde_json::to_value(vec![notification.clone()]).expect("json"));
            })
            .await;
        let mark = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/rest/v1/notifications")
                    .query_param("id", format!("eq.{id}"))
                    .json_body(json!({ "sent": true }));
                then.status(200).json_body(json!([{ "id": id, "sent": true }]));
            })
            .await;

        let store = store_for(&server);
        let unsent = store.list_unsent().await.expect("list");
        assert_eq!(unsent, vec![notification]);
        store.mark_sent(id).await.expect("mark");

        list.assert();
        mark.assert();
    }

    #[tokio::test]
    async fn insert_document_posts_row() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path_matches(Regex::new(r"^/rest/v1/documents$").expect("regex"))
                    .body_contains("\"status\":\"uploaded\"");
                then.status(201).json_body(json!([]));
            })
            .await;

        let document = store_for(&server)
            .insert_document(NewDocument {
                file_name: "a.pdf".into(),
                language: "en".into(),
                file_path: "dept/a.pdf".into(),
                department_ids: vec![Uuid::new_v4()],
                owner_id: Uuid::new_v4(),
            })
            .await
            .expect("insert");

        mock.assert();
        assert_eq!(document.file_name, "a.pdf");
        assert_eq!(document.status, DocumentStatus::Uploaded);
    }

    #[tokio::test]
    async fn error_status_carries_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/rest/v1/users");
                then.status(500).body("db down");
            })
            .await;

        let error = store_for(&server).get_user(Uuid::new_v4()).await.unwrap_err();
        assert!(error.to_string().contains("db down"));
    }

    #[tokio::test]
    async fn has_notification_selects_by_document() {
        let server = MockServer::start_async().await;
        let document_id = Uuid::new_v4();
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/rest/v1/notifications")
                    .query_param("document_id", format!("eq.{document_id}"))
                    .query_param("limit", "1");
                then.status(200).json_body(json!([{ "id": Uuid::new_v4() }]));
            })
            .await;

        assert!(
            store_for(&server)
                .has_notification(document_id)
                .await
                .expect("lookup")
        );
        mock.assert();
    }

    #[tokio::test]
    async fn department_users_filter_on_department() {
        let server = MockServer::start_async().await;
        let department_id = Uuid::new_v4();
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/rest/v1/users")
                    .query_param("department_id", format!("eq.{department_id}"));
                then.status(200).json_body(json!([{
                    "id": Uuid::new_v4(),
                    "email": "head@example.com",
                    "department_id": department_id,
                    "position": "head"
                }]));
            })
            .await;

        let users = store_for(&server)
            .department_users(department_id)
            .await
            .expect("users");

        mock.assert();
        assert_eq!(users.len(), 1);
        assert!(users[0].is_department_head());
    }

    #[tokio::test]
    async fn quick_shares_use_sent_flag() {
        let server = MockServer::start_async().await;
        let share = QuickShare::new(
            Uuid::new_v4(),
            json!({ "title": "Budget" }).as_object().cloned().expect("object"),
            OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("timestamp"),
        );
        let id = share.id;
        let list = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/rest/v1/quick_shares")
                    .query_param("sent", "eq.false");
                then.status(200)
                    .json_body(serde_json::to_value(vec![share.clone()]).expect("json"));
            })
            .await;
        let mark = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/rest/v1/quick_shares")
                    .query_param("id", format!("eq.{id}"))
                    .json_body(json!({ "sent": true }));
                then.status(200).json_body(json!([{ "id": id, "sent": true }]));
            })
            .await;

        let store = store_for(&server);
        assert_eq!(store.list_unsent_quick_shares().await.expect("list"), vec![share]);
        store.mark_quick_share_sent(id).await.expect("mark");

        list.assert();
        mark.assert();
    }
}
