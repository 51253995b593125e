use crate::connection::StoreConfig;
use crate::RateLimiter;
use async_trait::async_trait;
use dash_types::{
    ConflictKey, Predicate, Record, Scalar, StoreError, Table, TabularStore, TransportFailure,
};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use log_error::LogError;
use serde::Deserialize;

/// Error body of a PostgREST-style API.
#[derive(Deserialize, Debug, Default)]
struct ApiError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

/// [`TabularStore`] over a hosted PostgREST endpoint (`{url}/rest/v1/{table}`).
pub struct RestStore {
    client: ClientWithMiddleware,
    base: String,
}

impl RestStore {
    pub fn new(config: &StoreConfig) -> Result<Self, anyhow::Error> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(&config.key)?);
        headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.key))?,
        );
        if let Some(schema) = &config.schema {
            headers.insert("Accept-Profile", HeaderValue::from_str(schema)?);
            headers.insert("Content-Profile", HeaderValue::from_str(schema)?);
        }
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .use_rustls_tls()
            .default_headers(headers)
            .build()?;
        let mut builder = ClientBuilder::new(client);
        if let Some(rpm) = config.requests_per_minute {
            builder = builder.with(reqwest_ratelimit::all(RateLimiter::new(rpm)));
        }
        Ok(Self {
            client: builder.build(),
            base: format!("{}/rest/v1", config.url.trim_end_matches('/')),
        })
    }

    fn url(&self, table: Table) -> String {
        format!("{}/{table}", self.base)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = body_or_empty(response.text().await.map_err(anyhow::Error::from));
        Err(api_error(status, &body))
    }
}

/// Error body for classification; an unreadable one still leaves the status to go on.
fn body_or_empty(body: Result<String, anyhow::Error>) -> String {
    body.log_error("Unable to read error response body")
        .unwrap_or_default()
}

fn transport_error(err: reqwest_middleware::Error) -> StoreError {
    match err {
        reqwest_middleware::Error::Reqwest(err) => {
            let failure = if err.is_timeout() {
                TransportFailure::Timeout
            } else if err.is_connect() {
                TransportFailure::Connect
            } else {
                TransportFailure::Other
            };
            StoreError::transport(failure, err.to_string())
        }
        reqwest_middleware::Error::Middleware(err) => {
            StoreError::transport(TransportFailure::Other, err.to_string())
        }
    }
}

fn api_error(status: StatusCode, body: &str) -> StoreError {
    let parsed: ApiError = serde_json::from_str(body).unwrap_or_default();
    let mut message = parsed
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| match body.trim() {
            "" => status.to_string(),
            body => body.to_string(),
        });
    for extra in [parsed.details, parsed.hint].into_iter().flatten() {
        message.push_str(" (");
        message.push_str(&extra);
        message.push(')');
    }
    let err = StoreError::status(status.as_u16(), message);
    match parsed.code {
        Some(code) => err.with_code(code),
        None => err,
    }
}

/// PostgREST operator argument for a literal value.
fn literal(value: &Scalar) -> String {
    match value {
        Scalar::Text(t) if t.contains([',', '(', ')', '"']) => {
            format!("\"{}\"", t.replace('\\', "\\\\").replace('"', "\\\""))
        }
        v => v.to_string(),
    }
}

fn predicate_query(predicate: &Predicate) -> Vec<(String, String)> {
    match predicate {
        Predicate::Eq { field, value } => vec![(field.clone(), format!("eq.{}", literal(value)))],
        Predicate::Between { field, low, high } => vec![
            (field.clone(), format!("gte.{}", literal(low))),
            (field.clone(), format!("lte.{}", literal(high))),
        ],
    }
}

/// One page of rows with `low <= field <= high`, in a total order so offsets stay stable.
fn range_query(
    table: Table,
    field: &str,
    low: &Scalar,
    high: &Scalar,
    offset: usize,
    limit: usize,
) -> Vec<(String, String)> {
    let order: Vec<String> = table
        .sort_fields(field)
        .into_iter()
        .map(|f| format!("{f}.asc"))
        .collect();
    let mut query = predicate_query(&Predicate::Between {
        field: field.to_string(),
        low: low.clone(),
        high: high.clone(),
    });
    query.extend([
        ("select".to_string(), "*".to_string()),
        ("order".to_string(), order.join(",")),
        ("offset".to_string(), offset.to_string()),
        ("limit".to_string(), limit.to_string()),
    ]);
    query
}

#[async_trait]
impl TabularStore for RestStore {
    async fn upsert(
        &self,
        table: Table,
        records: &[Record],
        conflict_key: ConflictKey,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_vec(records).map_err(|err| StoreError::new(err.to_string()))?;
        let request = self
            .client
            .post(self.url(table))
            .query(&[("on_conflict", conflict_key.to_string())])
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .body(body);
        self.execute(request).await?;
        Ok(())
    }

    async fn select_range(
        &self,
        table: Table,
        field: &str,
        low: &Scalar,
        high: &Scalar,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let query = range_query(table, field, low, high, offset, limit);
        let response = self
            .execute(self.client.get(self.url(table)).query(&query))
            .await?;
        let text = response
            .text()
            .await
            .map_err(|err| StoreError::transport(TransportFailure::Other, err.to_string()))?;
        serde_json::from_str(&text)
            .map_err(|err| StoreError::new(format!("Unable to decode {table} rows: {err}")))
    }

    async fn delete(&self, table: Table, predicate: &Predicate) -> Result<(), StoreError> {
        let request = self
            .client
            .delete(self.url(table))
            .query(&predicate_query(predicate))
            .header("Prefer", "return=minimal");
        self.execute(request).await?;
        Ok(())
    }
}
