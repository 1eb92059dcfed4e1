use crate::{ClientError, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regwatch_core::models::{
    Document, IngestRequest, Jurisdiction, LatestDocument, LatestQuery, QueryRequest,
    QueryResponse, QueryResult, SetEmbeddingRequest,
};
use reqwest::Client as HttpClient;
use reqwest::Response;
use serde::Deserialize;

/// Keeps alphanumerics and `-_~`; `.` is encoded so an id is never a dot segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'~');

/// regwatch REST API Client
pub struct Client {
    base_url: String,
    client: HttpClient,
}

#[derive(Deserialize)]
struct LatestResponse {
    documents: Vec<LatestDocument>,
}

impl Client {
    /// Create a new client connected to the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: HttpClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `/documents/{id}` with the id encoded as a single path segment
    fn document_url(&self, id: &str) -> String {
        format!(
            "{}/documents/{}",
            self.base_url,
            utf8_percent_encode(id, PATH_SEGMENT)
        )
    }

    /// Ranked hybrid query
    pub async fn query(
        &self,
        query: impl Into<String>,
        jurisdiction: Option<Jurisdiction>,
        top_k: usize,
    ) -> Result<Vec<QueryResult>> {
        let url = format!("{}/query", self.base_url);
        let req = QueryRequest {
            query: query.into(),
            jurisdiction: jurisdiction.map(|j| j.code().to_string()),
            top_k,
        };

        let response = check(self.client.post(&url).json(&req).send().await?).await?;
        let body: QueryResponse = response.json().await?;
        Ok(body.results)
    }

    /// Latest documents, newest first
    pub async fn latest(&self, params: &LatestQuery) -> Result<Vec<LatestDocument>> {
        let url = format!("{}/documents/latest", self.base_url);

        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(jurisdiction) = &params.jurisdiction {
            query.push(("jurisdiction", jurisdiction.clone()));
        }
        if let Some(min_risk) = &params.min_risk {
            query.push(("min_risk", min_risk.clone()));
        }
        if let Some(search) = &params.search {
            query.push(("search", search.clone()));
        }
        if let Some(limit) = params.limit {
            query.push(("limit", limit.to_string()));
        }

        let response = check(self.client.get(&url).query(&query).send().await?).await?;
        let body: LatestResponse = response.json().await?;
        Ok(body.documents)
    }

    /// Ingest or replace a document
    pub async fn ingest(&self, request: &IngestRequest) -> Result<Document> {
        let url = format!("{}/documents", self.base_url);
        let response = check(self.client.post(&url).json(request).send().await?).await?;
        Ok(response.json().await?)
    }

    /// Get a document by ID
    pub async fn get_document(&self, id: impl AsRef<str>) -> Result<Option<Document>> {
        let url = self.document_url(id.as_ref());

        let response = self.client.get(&url).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }

        let mut body: serde_json::Value = check(response).await?.json().await?;
        let document = body
            .get_mut("document")
            .map(serde_json::Value::take)
            .ok_or(ClientError::InvalidResponse)?;
        Ok(Some(serde_json::from_value(document)?))
    }

    /// Replace a document's embedding. Returns false for unknown documents.
    pub async fn set_embedding(&self, id: impl AsRef<str>, vector: Vec<f32>) -> Result<bool> {
        let url = format!("{}/embedding", self.document_url(id.as_ref()));
        let req = SetEmbeddingRequest { vector };

        let response = self.client.put(&url).json(&req).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }

    /// Delete a document by ID
    pub async fn delete_document(&self, id: impl AsRef<str>) -> Result<()> {
        let url = self.document_url(id.as_ref());
        check(self.client.delete(&url).send().await?).await?;
        Ok(())
    }

    /// Store and cache statistics
    pub async fn stats(&self) -> Result<serde_json::Value> {
        let url = format!("{}/stats", self.base_url);
        let response = check(self.client.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }

    /// Health check
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        check(self.client.get(&url).send().await?).await?;
        Ok(())
    }
}

/// Turn non-success statuses into `ClientError::Server`
async fn check(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(ClientError::Server {
        status: response.status().as_u16(),
        message: response.text().await.unwrap_or_default(),
    })
}
