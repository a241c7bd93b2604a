//! Network seam for the tier router.

use async_trait::async_trait;

/// An intercepted request, reduced to what routing needs.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl GatewayRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

/// A response straight off the network.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("fetch failed: {0}")]
pub struct FetchError(pub String);

/// Something that can perform the actual network fetch. The router only
/// sees this trait, so tests can script upstream behavior.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, req: &GatewayRequest) -> Result<FetchedResponse, FetchError>;
}

/// Reqwest-backed fetcher the daemon runs with.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, req: &GatewayRequest) -> Result<FetchedResponse, FetchError> {
        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .map_err(|e| FetchError(format!("bad method {}: {e}", req.method)))?;

        let mut builder = self.client.request(method, &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| FetchError(e.to_string()))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError(e.to_string()))?
            .to_vec();

        Ok(FetchedResponse {
            status,
            content_type,
            body,
        })
    }
}
