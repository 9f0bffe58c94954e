//! Queue endpoints: listing, single-item fetch, ingest, and delete.
//!
//! The listing endpoint is the consumer of the query builder and paginator:
//! filters, ordering, and field projection come in as repeatable query
//! parameters, invalid clauses are dropped (and echoed back on a `dropped`
//! list), and rows are returned as JSON objects exactly as projected.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, RawQuery, State},
    http::HeaderMap,
    Json,
};
use integrator_core::{
    models::NewRequest,
    query::{
        self, fields_and_relationships, filters_to_conditions, orders_to_order_by, Field,
        QueryBuilder, Table,
    },
    Paginator,
};
use serde_json::{json, Value};
use tracing::info;

use super::ApiError;
use crate::server::AppState;

/// Columns of the `requests` table exposed through the listing API.
const REQUEST_FIELDS: &[&str] = &[
    "uid",
    "batch_id",
    "source",
    "destination",
    "content_type",
    "body",
    "response",
    "status",
    "status_code",
    "retries",
    "errors",
    "frequency_type",
    "period",
    "day",
    "week",
    "month",
    "year",
    "msisdn",
    "raw_msg",
    "facility",
    "district",
    "report_type",
    "object_type",
    "extras",
    "suspended",
    "body_is_query_params",
    "submission_id",
    "url_suffix",
    "created",
    "updated",
    "*",
];

/// Default projection for single-item fetches.
const DEFAULT_ITEM_FIELDS: &str = "uid,source,destination,body,status";

/// Parsed listing parameters.
///
/// `order` and `filter` are repeatable, which plain form deserialization
/// does not express, so the raw query string is parsed by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    /// Requested page.
    pub page: String,
    /// Requested page size.
    pub page_size: String,
    /// Whether limiting applies.
    pub paging: bool,
    /// `field:asc|desc` entries.
    pub order: Vec<String>,
    /// `field:OP:value` entries.
    pub filter: Vec<String>,
    /// Field projection string.
    pub fields: String,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: "1".to_string(),
            page_size: "50".to_string(),
            paging: true,
            order: Vec::new(),
            filter: Vec::new(),
            fields: "*".to_string(),
        }
    }
}

impl ListParams {
    /// Parses a raw query string, collecting repeatable parameters.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "page" => params.page = value.into_owned(),
                "pageSize" => params.page_size = value.into_owned(),
                "paging" => params.paging = value != "false",
                "order" => params.order.push(value.into_owned()),
                "filter" => params.filter.push(value.into_owned()),
                "fields" => params.fields = value.into_owned(),
                _ => {},
            }
        }
        params
    }
}

/// `GET /api/queue` — paged, filtered, ordered listing.
pub async fn list_requests(
    State(state): State<AppState>,
    RawQuery(raw_query): RawQuery,
) -> Result<Json<Value>, ApiError> {
    let params = ListParams::from_query(raw_query.as_deref().unwrap_or(""));

    let selection = fields_and_relationships(REQUEST_FIELDS, &params.fields);
    let mut dropped = selection.dropped.clone();

    let mut builder = QueryBuilder::new(Table::new("requests", "r"));
    builder.fields =
        selection.fields.iter().map(|f| Field::qualified(f.as_str(), "r")).collect();

    let (conditions, dropped_filters) = filters_to_conditions(&params.filter, "r");
    dropped.extend(dropped_filters);
    builder.conditions = conditions;

    let (order_by, dropped_orders) = orders_to_order_by(&params.order, REQUEST_FIELDS, "r");
    dropped.extend(dropped_orders);
    builder.order_by = order_by;

    let where_clause = if builder.conditions.is_empty() {
        "TRUE".to_string()
    } else {
        query::render_conditions(&builder.conditions)
    };
    let total = state.storage.requests.count_where(&where_clause).await?;

    let pager = Paginator::new(total, &params.page_size, &params.page, params.paging);
    builder.limit = pager.page_size;
    builder.offset = pager.offset;

    let sql = builder.to_sql(params.paging);
    let requests = if sql.is_empty() {
        Vec::new()
    } else {
        state.storage.requests.select_json(&sql).await?
    };

    Ok(Json(json!({
        "pager": pager,
        "requests": requests,
        "fields": params.fields,
        "filtered": selection.fields,
        "relationships": selection.relationships,
        "filters": params.filter,
        "order": params.order,
        "dropped": dropped,
    })))
}

/// `GET /api/queue/{uid}` — single item by external uid, honoring the same
/// field projection syntax as the listing.
pub async fn get_request(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Json<Value>, ApiError> {
    let params = ListParams::from_query(raw_query.as_deref().unwrap_or(""));
    let fields =
        if params.fields == "*" { DEFAULT_ITEM_FIELDS.to_string() } else { params.fields };
    let selection = fields_and_relationships(REQUEST_FIELDS, &fields);

    let request = state
        .storage
        .requests
        .find_by_uid(&uid)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("request {uid} not found")))?;

    let value =
        serde_json::to_value(&request).map_err(|e| ApiError::Storage(e.to_string()))?;

    if selection.fields.iter().any(|f| f == "*") {
        return Ok(Json(value));
    }

    let Value::Object(record) = value else {
        return Ok(Json(value));
    };
    let projected: serde_json::Map<String, Value> = selection
        .fields
        .iter()
        .filter_map(|f| record.get(f).map(|v| (f.clone(), v.clone())))
        .collect();

    Ok(Json(Value::Object(projected)))
}

/// `DELETE /api/queue/{uid}` — administrative delete.
pub async fn delete_request(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.storage.requests.delete_by_uid(&uid).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound(format!("request {uid} not found")));
    }
    info!(uid = %uid, "request deleted");
    Ok(Json(json!({ "status": "deleted" })))
}

/// `POST /api/queue` — thin ingest shim writing a `ready` row.
///
/// Source and destination arrive as server names and resolve through the
/// server repository; everything else maps straight onto the new row.
pub async fn enqueue_request(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let lookup = |key: &str| params.get(key).cloned().unwrap_or_default();

    let source_name = lookup("source");
    let destination_name = lookup("destination");
    let source = state
        .storage
        .servers
        .find_id_by_name(&source_name)
        .await?
        .ok_or_else(|| ApiError::BadRequest(format!("unknown source '{source_name}'")))?;
    let destination = state
        .storage
        .servers
        .find_id_by_name(&destination_name)
        .await?
        .ok_or_else(|| {
            ApiError::BadRequest(format!("unknown destination '{destination_name}'"))
        })?;

    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    let new = NewRequest {
        source,
        destination,
        content_type,
        body,
        batch_id: lookup("batchid"),
        period: lookup("period"),
        week: lookup("week"),
        month: lookup("month"),
        year: lookup("year"),
        msisdn: lookup("msisdn"),
        raw_msg: lookup("rawMsg"),
        facility: lookup("facility"),
        district: lookup("district"),
        report_type: lookup("reportType"),
        object_type: lookup("objectType"),
        extras: lookup("extras"),
        body_is_query_params: lookup("isQueryParams") == "true",
        submission_id: lookup("msgid"),
        url_suffix: lookup("urlSuffix"),
    };

    let (id, uid) = state.storage.requests.create(&new).await?;
    info!(request_id = %id, uid = %uid, "request queued");

    Ok(Json(json!({
        "uid": uid,
        "source": new.source,
        "destination": new.destination,
        "status": "ready",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_defaults() {
        let params = ListParams::from_query("");
        assert_eq!(params.page, "1");
        assert_eq!(params.page_size, "50");
        assert!(params.paging);
        assert_eq!(params.fields, "*");
        assert!(params.order.is_empty());
        assert!(params.filter.is_empty());
    }

    #[test]
    fn repeatable_parameters_accumulate() {
        let params = ListParams::from_query(
            "page=2&pageSize=10&filter=status:EQ:ready&filter=retries:GT:0\
             &order=created:desc&order=uid:asc&fields=uid,status",
        );
        assert_eq!(params.page, "2");
        assert_eq!(params.page_size, "10");
        assert_eq!(params.filter.len(), 2);
        assert_eq!(params.order.len(), 2);
        assert_eq!(params.fields, "uid,status");
    }

    #[test]
    fn paging_disables_only_on_false() {
        assert!(ListParams::from_query("paging=true").paging);
        assert!(ListParams::from_query("paging=anything").paging);
        assert!(!ListParams::from_query("paging=false").paging);
    }

    #[test]
    fn url_encoding_is_decoded() {
        let params = ListParams::from_query("filter=errors%3AEQ%3ARequest%20has%20empty%20body");
        assert_eq!(params.filter, vec!["errors:EQ:Request has empty body"]);
    }
}
