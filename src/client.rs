//! HTTP client shared by the data source modules.
//!
//! Wraps a `reqwest::Client` configured with the request timeout and user
//! agent, and maps every failure onto [`FetchError`].

use std::io::{Cursor, Read};
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::parser::ParseError;

/// NWS alerts API.
pub const NWS_BASE_URL: &str = "https://api.weather.gov";

/// Storm Prediction Center products.
pub const SPC_BASE_URL: &str = "https://www.spc.noaa.gov";

/// Iowa Environmental Mesonet archive.
pub const IEM_BASE_URL: &str = "https://mesonet.agron.iastate.edu";

/// Space Weather Prediction Center JSON feeds.
pub const SWPC_BASE_URL: &str = "https://services.swpc.noaa.gov";

/// National Hurricane Center GIS products.
pub const NHC_BASE_URL: &str = "https://www.nhc.noaa.gov";

/// User agent sent with every request. api.weather.gov rejects requests
/// without one.
pub const DEFAULT_USER_AGENT: &str = concat!("stormwatch/", env!("CARGO_PKG_VERSION"));

/// Errors from fetching and decoding upstream products.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read KMZ archive from {url}: {source}")]
    Archive {
        url: String,
        #[source]
        source: KmzError,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors from unpacking a KMZ archive.
#[derive(Debug, Error)]
pub enum KmzError {
    #[error("invalid archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive has no KML document")]
    NoDocument,

    #[error("unreadable KML document: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the NWS alerts API.
    pub nws_base_url: String,

    /// Base URL of SPC products.
    pub spc_base_url: String,

    /// Base URL of the Iowa Environmental Mesonet.
    pub iem_base_url: String,

    /// Base URL of SWPC feeds.
    pub swpc_base_url: String,

    /// Base URL of NHC products.
    pub nhc_base_url: String,

    /// Timeout applied to each request.
    pub timeout: Duration,

    /// User agent header.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nws_base_url: NWS_BASE_URL.to_string(),
            spc_base_url: SPC_BASE_URL.to_string(),
            iem_base_url: IEM_BASE_URL.to_string(),
            swpc_base_url: SWPC_BASE_URL.to_string(),
            nhc_base_url: NHC_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with the given user agent.
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Point every provider at the same base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.nws_base_url = base_url.clone();
        self.spc_base_url = base_url.clone();
        self.iem_base_url = base_url.clone();
        self.swpc_base_url = base_url.clone();
        self.nhc_base_url = base_url;
        self
    }
}

/// Async HTTP client for the upstream providers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HttpClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        debug!("GET {}", url);
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Fetch a response body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        Ok(self.get(url).await?.text().await?)
    }

    /// Fetch a response body as raw bytes.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        Ok(self.get(url).await?.bytes().await?.to_vec())
    }

    /// Fetch and decode a JSON document.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Fetch a KMZ archive and return its KML document.
    pub async fn get_kmz_document(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.get_bytes(url).await?;
        read_kmz(&bytes).map_err(|source| FetchError::Archive {
            url: url.to_string(),
            source,
        })
    }
}

/// Extract the KML document from a KMZ archive.
///
/// Prefers `doc.kml`, falling back to the first `.kml` entry.
pub fn read_kmz(bytes: &[u8]) -> Result<String, KmzError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let entry = names
        .iter()
        .find(|n| n.eq_ignore_ascii_case("doc.kml"))
        .or_else(|| names.iter().find(|n| n.to_ascii_lowercase().ends_with(".kml")))
        .ok_or(KmzError::NoDocument)?;

    let mut file = archive.by_name(entry)?;
    let mut document = String::new();
    file.read_to_string(&mut document)?;
    Ok(document)
}
