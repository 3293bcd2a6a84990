//! Firestore REST backend.
//!
//! Documents are listed page by page from `.../documents/{collection}` and written through
//! `.../documents:commit`, which applies every write in the request atomically.

use crate::config::{StoreSettings, MAX_BATCH_OPS};
use crate::error::StoreError;
use crate::product::{NaturalKey, ProductRecord};
use crate::store::{check_batch_size, DocumentStore};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Number, Value};
use tracing::instrument;

const API_ROOT: &str = "https://firestore.googleapis.com/v1";

/// Fields stored as `timestampValue` rather than `stringValue`.
const TIMESTAMP_FIELDS: &[&str] = &["crawledAt"];

pub struct FirestoreStore {
    client: Client,
    /// `projects/{p}/databases/{d}/documents`
    documents_path: String,
    collection: String,
    api_key: Option<String>,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<FsDocument>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FsDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl FirestoreStore {
    pub fn new(settings: &StoreSettings) -> Result<Self, StoreError> {
        if settings.project_id.is_empty() {
            return Err(StoreError::Config(
                "store.project_id is required for the firestore backend".to_string(),
            ));
        }
        Ok(Self {
            client: Client::builder().build()?,
            documents_path: format!(
                "projects/{}/databases/{}/documents",
                settings.project_id, settings.database_id
            ),
            collection: settings.collection.clone(),
            api_key: settings.api_key.clone(),
            page_size: settings.list_page_size.max(1),
        })
    }

    fn document_name(&self, id: &str) -> String {
        format!("{}/{}/{}", self.documents_path, self.collection, id)
    }

    fn with_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.query(&[("key", key.as_str())]),
            None => request,
        }
    }

    async fn list_documents(&self) -> Result<Vec<FsDocument>, StoreError> {
        let url = format!("{}/{}/{}", API_ROOT, self.documents_path, self.collection);
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&url)
                .query(&[("pageSize", self.page_size.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let response: ListResponse = read_json(self.with_key(request).send().await?).await?;
            documents.extend(response.documents);

            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(collection = %self.collection, documents = documents.len(), "Listed documents");
        Ok(documents)
    }

    async fn commit(&self, writes: Vec<Value>) -> Result<(), StoreError> {
        check_batch_size(writes.len())?;
        let url = format!("{}/{}:commit", API_ROOT, self.documents_path);
        let request = self.client.post(&url).json(&json!({ "writes": writes }));
        let _: Value = read_json(self.with_key(request).send().await?).await?;
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StoreError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<T>().await?)
}

/// Natural keys of `documents`; a document without a readable name and brand is skipped.
fn natural_keys(documents: &[FsDocument]) -> Vec<NaturalKey> {
    documents
        .iter()
        .filter_map(|doc| {
            match serde_json::from_value::<NaturalKey>(Value::Object(decode_fields(&doc.fields))) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(document = %doc.name, error = %e, "Skipping document without a readable key");
                    None
                }
            }
        })
        .collect()
}

/// Encodes a plain JSON object as Firestore typed fields.
pub fn encode_fields(object: &Map<String, Value>) -> Map<String, Value> {
    object
        .iter()
        .map(|(key, value)| {
            let typed = match value {
                Value::String(s) if TIMESTAMP_FIELDS.contains(&key.as_str()) => {
                    json!({ "timestampValue": s })
                }
                other => encode_value(other),
            };
            (key.clone(), typed)
        })
        .collect()
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({ "integerValue": n.to_string() }),
        Value::Number(n) => json!({ "doubleValue": n }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

/// Decodes Firestore typed fields back into a plain JSON object.
pub fn decode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .filter_map(|(key, value)| decode_value(value).map(|v| (key.clone(), v)))
        .collect()
}

fn decode_value(value: &Value) -> Option<Value> {
    let (kind, inner) = value.as_object()?.iter().next()?;
    match kind.as_str() {
        "stringValue" | "timestampValue" | "referenceValue" => Some(inner.clone()),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(|n| Value::Number(n.into()))
            .or_else(|| inner.as_i64().map(|n| Value::Number(n.into()))),
        "doubleValue" => inner
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number),
        "booleanValue" => Some(inner.clone()),
        "nullValue" => Some(Value::Null),
        "mapValue" => Some(Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        )),
        "arrayValue" => Some(Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(decode_value).collect())
                .unwrap_or_default(),
        )),
        _ => None,
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn fetch_keys(&self) -> Result<Vec<NaturalKey>, StoreError> {
        Ok(natural_keys(&self.list_documents().await?))
    }

    async fn fetch_all(&self) -> Result<Vec<ProductRecord>, StoreError> {
        let mut records = Vec::new();
        for doc in self.list_documents().await? {
            match serde_json::from_value::<ProductRecord>(Value::Object(decode_fields(&doc.fields))) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(document = %doc.name, error = %e, "Skipping unreadable document"),
            }
        }
        Ok(records)
    }

    #[instrument(skip(self, records), fields(collection = %self.collection, batch = records.len()))]
    async fn commit_batch(&self, records: &[ProductRecord]) -> Result<(), StoreError> {
        let writes = records
            .iter()
            .map(|record| {
                let fields = match serde_json::to_value(record)? {
                    Value::Object(map) => encode_fields(&map),
                    _ => Map::new(),
                };
                Ok(json!({
                    "update": { "name": self.document_name(&record.id), "fields": fields }
                }))
            })
            .collect::<Result<Vec<Value>, StoreError>>()?;
        self.commit(writes).await
    }

    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn delete_all(&self) -> Result<usize, StoreError> {
        let names: Vec<String> = self
            .list_documents()
            .await?
            .into_iter()
            .map(|doc| doc.name)
            .collect();

        for chunk in names.chunks(MAX_BATCH_OPS) {
            let writes = chunk.iter().map(|name| json!({ "delete": name })).collect();
            self.commit(writes).await?;
            tracing::info!(deleted = chunk.len(), "Deleted document batch");
        }
        Ok(names.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record() -> ProductRecord {
        ProductRecord {
            id: "danawa-1".to_string(),
            name: "Eau A".to_string(),
            brand: "Brand X".to_string(),
            price: 30_000,
            price_per_unit: Some(600),
            volume: None,
            product_url: "https://prod.danawa.com/info/?pcode=1".to_string(),
            image_url: None,
            rank: None,
            rating: Some(4.5),
            review_count: None,
            source: "danawa".to_string(),
            crawled_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            page_number: 3,
        }
    }

    #[test]
    fn encodes_typed_fields_and_omits_absent_optionals() {
        let Value::Object(plain) = serde_json::to_value(record()).unwrap() else {
            panic!("record serializes to an object");
        };
        let fields = encode_fields(&plain);

        assert_eq!(fields["price"], json!({ "integerValue": "30000" }));
        assert_eq!(fields["rating"], json!({ "doubleValue": 4.5 }));
        assert_eq!(fields["name"], json!({ "stringValue": "Eau A" }));
        assert!(fields["crawledAt"].get("timestampValue").is_some());
        assert!(!fields.contains_key("volume"));
        assert!(!fields.contains_key("reviewCount"));
    }

    #[test]
    fn decoded_fields_deserialize_into_records() {
        let Value::Object(plain) = serde_json::to_value(record()).unwrap() else {
            panic!("record serializes to an object");
        };
        let decoded = decode_fields(&encode_fields(&plain));
        let back: ProductRecord = serde_json::from_value(Value::Object(decoded)).unwrap();
        assert_eq!(back, record());
    }

    #[test]
    fn keys_decode_from_partial_documents() {
        let fields = json!({ "name": { "stringValue": "Eau A" }, "legacy": { "geoPointValue": {} } });
        let decoded = decode_fields(fields.as_object().unwrap());
        let key: NaturalKey = serde_json::from_value(Value::Object(decoded)).unwrap();
        assert_eq!(key, NaturalKey::new("Eau A", ""));
    }

    #[test]
    fn malformed_documents_are_left_out_of_the_key_set() {
        let doc = |name: &str, fields: Value| FsDocument {
            name: name.to_string(),
            fields: fields.as_object().cloned().unwrap_or_default(),
        };
        let documents = [
            doc("a", json!({ "name": { "stringValue": "Eau A" }, "brand": { "stringValue": "Brand X" } })),
            doc("b", json!({ "name": { "integerValue": "7" }, "brand": { "stringValue": "Brand Y" } })),
            doc("c", json!({ "name": { "stringValue": "Eau C" }, "brand": { "booleanValue": true } })),
            doc("d", json!({ "name": { "stringValue": "Eau D" } })),
        ];

        assert_eq!(
            natural_keys(&documents),
            [NaturalKey::new("Eau A", "Brand X"), NaturalKey::new("Eau D", "")]
        );
    }

    #[test]
    fn requires_project_id() {
        let settings = StoreSettings::default();
        assert!(matches!(FirestoreStore::new(&settings), Err(StoreError::Config(_))));
    }
}
