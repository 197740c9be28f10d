use std::marker::PhantomData;

use async_trait::async_trait;
use gridline_application::view_engine::value_text;
use gridline_application::{
    BulkDeleteReceipt, DeleteReceipt, ListPage, ListParams, RecordGateway,
};
use gridline_core::{ActorContext, AppError, AppResult, NonEmptyString};
use gridline_domain::{
    ChangeId, ChangeLogEntry, FilterPredicate, RecordId, RecordPatch, TableRecord,
};
use reqwest::header::IF_MATCH;
use reqwest::{Method, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::http_response::{read_json, transport_error};

/// Header carrying the acting user's subject.
pub const USER_HEADER: &str = "X-User";

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    change_id: Option<ChangeId>,
}

#[derive(Debug, Deserialize)]
struct BulkDeleteResponse {
    #[serde(default)]
    deleted: Option<usize>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct BulkDeleteRequest {
    ids: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct RestoreRequest {
    change_id: ChangeId,
}

/// REST adapter for one collection, e.g. `{base}/core-boxes`.
pub struct HttpRecordGateway<R> {
    http_client: reqwest::Client,
    collection_url: Url,
    resource: NonEmptyString,
    key_field: NonEmptyString,
    actor: ActorContext,
    record_type: PhantomData<fn() -> R>,
}

impl<R: TableRecord> HttpRecordGateway<R> {
    /// Creates a gateway for `{api_base_url}/{resource}`.
    pub fn new(
        http_client: reqwest::Client,
        api_base_url: &str,
        resource: &str,
        key_field: &str,
        actor: ActorContext,
    ) -> AppResult<Self> {
        let resource = NonEmptyString::new(resource.trim_matches('/'))?;
        let key_field = NonEmptyString::new(key_field)?;
        let mut collection_url = Url::parse(api_base_url).map_err(|error| {
            AppError::Validation(format!("invalid API base URL '{api_base_url}': {error}"))
        })?;
        collection_url
            .path_segments_mut()
            .map_err(|()| {
                AppError::Validation(format!("API base URL '{api_base_url}' cannot hold a path"))
            })?
            .pop_if_empty()
            .extend(resource.as_str().split('/'));

        Ok(Self {
            http_client,
            collection_url,
            resource,
            key_field,
            actor,
            record_type: PhantomData,
        })
    }

    /// Returns the collection URL.
    #[must_use]
    pub fn collection_url(&self) -> &Url {
        &self.collection_url
    }

    fn url_for(&self, segment: &str) -> Url {
        let mut url = self.collection_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(segment);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(method = %method, url = %url, actor = %self.actor.subject(), "sending request");
        self.http_client
            .request(method, url)
            .header(USER_HEADER, self.actor.subject())
    }

    async fn execute(&self, builder: RequestBuilder, action: &str) -> AppResult<Value> {
        let response = builder
            .send()
            .await
            .map_err(|error| transport_error(action, &error))?;
        read_json(response, action).await
    }

    fn decode_record(&self, value: Value) -> AppResult<R> {
        R::from_json(value, self.key_field.as_str())
    }

    fn decode_rows(&self, rows: Vec<Value>) -> AppResult<Vec<R>> {
        rows.into_iter()
            .map(|row| self.decode_record(row))
            .collect()
    }
}

/// Appends list parameters in the query shape the portal backend reads.
///
/// Equality and boolean filters go out as `field=value`; the other predicates
/// as `filter[field][op]=value`. Several sort keys are comma-joined.
fn append_list_query(url: &mut Url, params: &ListParams) {
    let mut pairs = url.query_pairs_mut();
    if let Some(query) = params.query.as_deref() {
        pairs.append_pair("q", query);
    }

    for filter in &params.filters {
        let field = filter.field();
        match filter.predicate() {
            FilterPredicate::Equals(value) => {
                pairs.append_pair(field, value_text(value).as_str());
            }
            FilterPredicate::IsTrue => {
                pairs.append_pair(field, "true");
            }
            FilterPredicate::IsFalse => {
                pairs.append_pair(field, "false");
            }
            FilterPredicate::Contains(needle) => {
                pairs.append_pair(format!("filter[{field}][contains]").as_str(), needle);
            }
            FilterPredicate::OneOf(values) => {
                let joined = values.iter().map(value_text).collect::<Vec<_>>().join(",");
                pairs.append_pair(format!("filter[{field}][in]").as_str(), joined.as_str());
            }
            FilterPredicate::Before(bound) => {
                pairs.append_pair(
                    format!("filter[{field}][lt]").as_str(),
                    value_text(bound).as_str(),
                );
            }
            FilterPredicate::After(bound) => {
                pairs.append_pair(
                    format!("filter[{field}][gt]").as_str(),
                    value_text(bound).as_str(),
                );
            }
        }
    }

    if !params.sort.is_empty() {
        let fields = params
            .sort
            .iter()
            .map(|key| key.field())
            .collect::<Vec<_>>()
            .join(",");
        let directions = params
            .sort
            .iter()
            .map(|key| key.direction().as_str())
            .collect::<Vec<_>>()
            .join(",");
        pairs.append_pair("sort_by", fields.as_str());
        pairs.append_pair("sort_dir", directions.as_str());
    }

    if let Some(page) = params.page {
        pairs.append_pair("page", page.to_string().as_str());
    }
    if let Some(page_size) = params.page_size {
        pairs.append_pair("page_size", page_size.to_string().as_str());
    }
    drop(pairs);

    if url.query() == Some("") {
        url.set_query(None);
    }
}

fn rows_and_total(payload: Value) -> AppResult<(Vec<Value>, Option<usize>)> {
    match payload {
        Value::Array(rows) => Ok((rows, None)),
        Value::Object(mut object) => {
            let total = object
                .get("total")
                .and_then(Value::as_u64)
                .and_then(|total| usize::try_from(total).ok());
            match object.remove("rows") {
                Some(Value::Array(rows)) => Ok((rows, total)),
                _ => Err(AppError::Transport(
                    "list response must be an array or an object with 'rows'".to_owned(),
                )),
            }
        }
        _ => Err(AppError::Transport(
            "list response must be an array or an object with 'rows'".to_owned(),
        )),
    }
}

#[async_trait]
impl<R: TableRecord> RecordGateway<R> for HttpRecordGateway<R> {
    async fn list(&self, params: &ListParams) -> AppResult<ListPage<R>> {
        let mut url = self.collection_url.clone();
        append_list_query(&mut url, params);

        let action = format!("list {}", self.resource.as_str());
        let payload = self.execute(self.request(Method::GET, url), &action).await?;
        let (rows, total) = rows_and_total(payload)?;
        let rows = self.decode_rows(rows)?;
        let total = total.unwrap_or(rows.len());

        Ok(ListPage { rows, total })
    }

    async fn create(&self, record: &R) -> AppResult<Option<R>> {
        let action = format!("create {}", self.resource.as_str());
        let builder = self
            .request(Method::POST, self.collection_url.clone())
            .json(&record.to_json());
        let payload = self.execute(builder, &action).await?;

        if payload.get(self.key_field.as_str()).is_some() {
            return self.decode_record(payload).map(Some);
        }

        debug!(
            resource = %self.resource.as_str(),
            message = payload
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default(),
            "create returned no record"
        );
        Ok(None)
    }

    async fn update(
        &self,
        id: &RecordId,
        patch: &RecordPatch,
        expected_version: Option<&str>,
    ) -> AppResult<R> {
        let action = format!("update {} {id}", self.resource.as_str());
        let mut builder = self
            .request(Method::PUT, self.url_for(id.to_string().as_str()))
            .json(patch);
        if let Some(version) = expected_version {
            builder = builder.header(IF_MATCH, version);
        }

        let payload = self.execute(builder, &action).await?;
        self.decode_record(payload)
    }

    async fn delete(
        &self,
        id: &RecordId,
        expected_version: Option<&str>,
    ) -> AppResult<DeleteReceipt> {
        let action = format!("delete {} {id}", self.resource.as_str());
        let mut builder = self.request(Method::DELETE, self.url_for(id.to_string().as_str()));
        if let Some(version) = expected_version {
            builder = builder.header(IF_MATCH, version);
        }

        let payload = self.execute(builder, &action).await?;
        if payload.is_null() {
            return Ok(DeleteReceipt::default());
        }

        let response: DeleteResponse = serde_json::from_value(payload).map_err(|error| {
            AppError::Transport(format!("{action} returned an unexpected body: {error}"))
        })?;
        Ok(DeleteReceipt {
            change_id: response.change_id,
            message: response.message,
        })
    }

    async fn bulk_delete(&self, ids: &[RecordId]) -> AppResult<BulkDeleteReceipt> {
        let action = format!("bulk delete {}", self.resource.as_str());
        let builder = self
            .request(Method::POST, self.url_for("bulk-delete"))
            .json(&BulkDeleteRequest {
                ids: ids.iter().map(RecordId::to_value).collect(),
            });

        let payload = self.execute(builder, &action).await?;
        if payload.is_null() {
            return Ok(BulkDeleteReceipt {
                deleted: ids.len(),
                message: None,
            });
        }

        let response: BulkDeleteResponse = serde_json::from_value(payload).map_err(|error| {
            AppError::Transport(format!("{action} returned an unexpected body: {error}"))
        })?;
        Ok(BulkDeleteReceipt {
            deleted: response.deleted.unwrap_or(ids.len()),
            message: response.message,
        })
    }

    async fn restore(&self, change_id: ChangeId) -> AppResult<RecordId> {
        let action = format!("restore {} change {change_id}", self.resource.as_str());
        let builder = self
            .request(Method::POST, self.url_for("restore"))
            .json(&RestoreRequest { change_id });

        let payload = self.execute(builder, &action).await?;
        payload
            .get("id")
            .or_else(|| payload.get(self.key_field.as_str()))
            .and_then(RecordId::from_value)
            .ok_or_else(|| {
                AppError::Transport(format!("{action} response did not include the restored id"))
            })
    }

    async fn list_changes(&self, limit: usize) -> AppResult<Vec<ChangeLogEntry>> {
        let action = format!("list {} changes", self.resource.as_str());
        let mut url = self.url_for("changes");
        url.query_pairs_mut()
            .append_pair("limit", limit.to_string().as_str());

        let payload = self.execute(self.request(Method::GET, url), &action).await?;
        let (rows, _) = rows_and_total(payload)?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_value::<ChangeLogEntry>(row).map_err(|error| {
                    AppError::Transport(format!("{action} returned an invalid entry: {error}"))
                })
            })
            .collect()
    }
}

impl<R> std::fmt::Debug for HttpRecordGateway<R> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRecordGateway")
            .field("collection_url", &self.collection_url.as_str())
            .field("key_field", &self.key_field.as_str())
            .field("actor", &self.actor.subject())
            .finish_non_exhaustive()
    }
}
