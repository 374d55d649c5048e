//! HTTP client for the Docs/Drive style document API.
//!
//! Document content goes through `{docs_base_url}/documents`, placement and
//! deletion through `{files_base_url}/files`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use kbmirror_shared::{DocumentRef, DocumentStoreConfig, KbMirrorError, Location, Result, read_token};

use crate::DocumentStore;
use crate::document::{ContentElement, Document, DocumentMeta, EditBatch, EditOp, Lookup};

/// User-Agent string for document store requests.
const USER_AGENT: &str = concat!("kbmirror/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedDocument {
    document_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDocument {
    document_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: WireBody,
}

#[derive(Debug, Default, Deserialize)]
struct WireBody {
    #[serde(default)]
    content: Vec<WireStructural>,
}

#[derive(Debug, Deserialize)]
struct WireStructural {
    #[serde(default)]
    paragraph: Option<WireParagraph>,
}

#[derive(Debug, Deserialize)]
struct WireParagraph {
    #[serde(default)]
    elements: Vec<WireParagraphElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireParagraphElement {
    #[serde(default)]
    start_index: usize,
    end_index: usize,
    #[serde(default)]
    text_run: Option<WireTextRun>,
}

#[derive(Debug, Deserialize)]
struct WireTextRun {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    trashed: bool,
}

impl From<WireDocument> for Document {
    fn from(wire: WireDocument) -> Self {
        let elements = wire
            .body
            .content
            .into_iter()
            .filter_map(|s| s.paragraph)
            .flat_map(|p| p.elements)
            .filter_map(|e| {
                e.text_run.map(|run| ContentElement {
                    start_index: e.start_index,
                    end_index: e.end_index,
                    text: run.content,
                })
            })
            .collect();

        Self {
            document_ref: DocumentRef(wire.document_id),
            title: wire.title,
            elements,
        }
    }
}

fn wire_request(op: &EditOp) -> Value {
    match op {
        EditOp::DeleteRange { start, end } => json!({
            "deleteContentRange": { "range": { "startIndex": start, "endIndex": end } }
        }),
        EditOp::InsertText { index, text } => json!({
            "insertText": { "location": { "index": index }, "text": text }
        }),
    }
}

// ---------------------------------------------------------------------------
// HttpDocumentStore
// ---------------------------------------------------------------------------

/// [`DocumentStore`] talking to the remote service over HTTPS.
pub struct HttpDocumentStore {
    client: Client,
    docs_base: String,
    files_base: String,
    token: String,
}

impl HttpDocumentStore {
    /// Build a client from the `[document_store]` section, reading the bearer
    /// token from the configured env var.
    pub fn new(config: &DocumentStoreConfig) -> Result<Self> {
        let token = read_token(&config.token_env)?;
        Self::with_token(config, token)
    }

    /// Build a client with an explicit bearer token.
    pub fn with_token(config: &DocumentStoreConfig, token: impl Into<String>) -> Result<Self> {
        let docs_base = validated_base(&config.docs_base_url, "docs_base_url")?;
        let files_base = validated_base(&config.files_base_url, "files_base_url")?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KbMirrorError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            docs_base,
            files_base,
            token: token.into(),
        })
    }

    fn document_url(&self, doc: &DocumentRef) -> String {
        format!("{}/documents/{}", self.docs_base, doc)
    }

    fn file_url(&self, doc: &DocumentRef) -> String {
        format!("{}/files/{}", self.files_base, doc)
    }

    /// Send with auth and map the status classes callers care about.
    async fn send(&self, operation: &str, resource: &str, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| KbMirrorError::Network(format!("{operation} {resource}: {e}")))?;

        let status = response.status();
        debug!(operation, resource, status = status.as_u16(), "document store reply");

        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(KbMirrorError::rate_limited(format!("{operation} {resource}")));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(KbMirrorError::not_found(resource));
        }

        let message = response.text().await.unwrap_or_default();
        Err(KbMirrorError::Remote {
            status: status.as_u16(),
            message,
        })
    }
}

fn validated_base(raw: &str, field: &str) -> Result<String> {
    Url::parse(raw)
        .map_err(|e| KbMirrorError::config(format!("invalid document_store.{field} '{raw}': {e}")))?;
    Ok(raw.trim_end_matches('/').to_string())
}

async fn parse_json<T: for<'de> Deserialize<'de>>(response: Response, what: &str) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| KbMirrorError::parse(format!("malformed {what} response: {e}")))
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    #[instrument(skip_all, fields(title = %title))]
    async fn create(&self, title: &str) -> Result<DocumentRef> {
        let url = format!("{}/documents", self.docs_base);
        let builder = self.client.post(&url).json(&json!({ "title": title }));
        let response = self.send("create", title, builder).await?;
        let created: CreatedDocument = parse_json(response, "create").await?;
        Ok(DocumentRef(created.document_id))
    }

    #[instrument(skip_all, fields(document = %doc))]
    async fn get(&self, doc: &DocumentRef) -> Result<Document> {
        let builder = self.client.get(self.document_url(doc));
        let response = self.send("get", doc.as_str(), builder).await?;
        let wire: WireDocument = parse_json(response, "get").await?;
        Ok(wire.into())
    }

    #[instrument(skip_all, fields(document = %doc, ops = batch.len()))]
    async fn batch_edit(&self, doc: &DocumentRef, batch: &EditBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let requests: Vec<Value> = batch.ops().iter().map(wire_request).collect();
        let url = format!("{}:batchUpdate", self.document_url(doc));
        let builder = self.client.post(&url).json(&json!({ "requests": requests }));
        self.send("batch_edit", doc.as_str(), builder).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(document = %doc))]
    async fn delete(&self, doc: &DocumentRef) -> Result<()> {
        let builder = self.client.delete(self.file_url(doc));
        self.send("delete", doc.as_str(), builder).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(document = %doc, location = %location))]
    async fn move_to(&self, doc: &DocumentRef, location: &Location) -> Result<()> {
        let previous = match self.locate(doc).await? {
            Lookup::Found(meta) => meta.parents,
            Lookup::NotFound => return Err(KbMirrorError::not_found(doc.as_str())),
        };
        if previous.len() == 1 && previous[0] == *location {
            return Ok(());
        }

        let mut url = Url::parse(&self.file_url(doc))
            .map_err(|e| KbMirrorError::config(format!("bad file url for {doc}: {e}")))?;
        {
            let removed: Vec<&str> = previous
                .iter()
                .map(Location::as_str)
                .filter(|p| *p != location.as_str())
                .collect();
            let mut query = url.query_pairs_mut();
            query.append_pair("addParents", location.as_str());
            if !removed.is_empty() {
                query.append_pair("removeParents", &removed.join(","));
            }
            query.append_pair("fields", "id,parents");
        }

        let builder = self.client.patch(url.as_str()).json(&json!({}));
        self.send("move", doc.as_str(), builder).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(document = %doc))]
    async fn locate(&self, doc: &DocumentRef) -> Result<Lookup> {
        let url = format!("{}?fields=parents,trashed", self.file_url(doc));
        let builder = self.client.get(&url);
        let response = match self.send("locate", doc.as_str(), builder).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(Lookup::NotFound),
            Err(e) => return Err(e),
        };
        let file: WireFile = parse_json(response, "locate").await?;
        Ok(Lookup::Found(DocumentMeta {
            parents: file.parents.into_iter().map(Location).collect(),
            trashed: file.trashed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> HttpDocumentStore {
        let config = DocumentStoreConfig {
            docs_base_url: format!("{}/v1", server.uri()),
            files_base_url: format!("{}/drive/v3/", server.uri()),
            token_env: "KBM_TEST_DOCS_TOKEN_UNSET".into(),
            timeout_secs: 5,
        };
        HttpDocumentStore::with_token(&config, "tok").unwrap()
    }

    #[tokio::test]
    async fn create_returns_document_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/documents"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(json!({ "title": "1001" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "documentId": "abc" })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server);
        let doc = store.create("1001").await.unwrap();
        assert_eq!(doc, DocumentRef::from("abc"));
    }

    #[tokio::test]
    async fn get_flattens_text_runs() {
        let server = MockServer::start().await;
        let body = json!({
            "documentId": "abc",
            "title": "1001",
            "body": { "content": [
                { "endIndex": 1, "sectionBreak": {} },
                { "startIndex": 1, "endIndex": 7, "paragraph": { "elements": [
                    { "startIndex": 1, "endIndex": 7, "textRun": { "content": "hello\n" } }
                ]}},
                { "startIndex": 7, "endIndex": 20, "paragraph": { "elements": [
                    { "startIndex": 7, "endIndex": 13, "textRun": { "content": "world " } },
                    { "startIndex": 13, "endIndex": 14, "inlineObjectElement": {} },
                    { "startIndex": 14, "endIndex": 20, "textRun": { "content": "again\n" } }
                ]}}
            ]}
        });
        Mock::given(method("GET"))
            .and(path("/v1/documents/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let doc = store_for(&server).get(&DocumentRef::from("abc")).await.unwrap();
        assert_eq!(doc.elements.len(), 3);
        assert_eq!(doc.elements[2].start_index, 14);
        assert_eq!(doc.body_start(), 1);
        assert_eq!(doc.terminal_offset(), 19);
    }

    #[tokio::test]
    async fn batch_edit_sends_ordered_requests() {
        let server = MockServer::start().await;
        let expected = json!({ "requests": [
            { "deleteContentRange": { "range": { "startIndex": 1, "endIndex": 5 } } },
            { "insertText": { "location": { "index": 1 }, "text": "new" } }
        ]});
        Mock::given(method("POST"))
            .and(path("/v1/documents/abc:batchUpdate"))
            .and(body_json(expected))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let batch = EditBatch::new().delete_range(1, 5).insert_text(1, "new");
        store_for(&server)
            .batch_edit(&DocumentRef::from("abc"), &batch)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rate_limit_and_not_found_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/documents/busy:batchUpdate"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/drive/v3/files/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/documents/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let store = store_for(&server);
        let batch = EditBatch::new().insert_text(1, "x");
        let err = store
            .batch_edit(&DocumentRef::from("busy"), &batch)
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());

        let err = store.delete(&DocumentRef::from("gone")).await.unwrap_err();
        assert!(err.is_not_found());

        let err = store.get(&DocumentRef::from("broken")).await.unwrap_err();
        assert!(matches!(err, KbMirrorError::Remote { status: 500, .. }));
    }

    #[tokio::test]
    async fn exists_in_checks_parents_and_trash() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/placed"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "parents": ["F1"], "trashed": false })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/binned"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "parents": ["F1"], "trashed": true })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store_for(&server);
        let target = Location::from("F1");
        assert!(store.exists_in(&DocumentRef::from("placed"), &target).await.unwrap());
        assert!(!store.exists_in(&DocumentRef::from("placed"), &Location::from("F2")).await.unwrap());
        assert!(!store.exists_in(&DocumentRef::from("binned"), &target).await.unwrap());
        assert!(!store.exists_in(&DocumentRef::from("missing"), &target).await.unwrap());
    }

    #[tokio::test]
    async fn move_replaces_previous_parents() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/abc"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "parents": ["root"], "trashed": false })),
            )
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/drive/v3/files/abc"))
            .and(query_param("addParents", "F1"))
            .and(query_param("removeParents", "root"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "abc" })))
            .expect(1)
            .mount(&server)
            .await;

        store_for(&server)
            .move_to(&DocumentRef::from("abc"), &Location::from("F1"))
            .await
            .unwrap();
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let config = DocumentStoreConfig {
            token_env: "KBM_TEST_DOCS_TOKEN_NEVER_SET".into(),
            ..DocumentStoreConfig::default()
        };
        assert!(matches!(
            HttpDocumentStore::new(&config),
            Err(KbMirrorError::Config { .. })
        ));
    }
}
