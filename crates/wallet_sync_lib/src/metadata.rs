//! Token URI resolution and display fields of an NFT.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use std::time::Duration;

use crate::error::SyncError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Embedded SVG showing the token id, used whenever no image can be resolved.
pub fn placeholder_image(token_id: &str) -> String {
    let svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="300" height="300" viewBox="0 0 300 300"><rect width="300" height="300" fill="#1f2937"/><text x="150" y="160" font-family="monospace" font-size="28" fill="#f9fafb" text-anchor="middle">#{}</text></svg>"##,
        token_id
    );
    format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg))
}

/// Rewrites `ipfs://` (and `ipfs://ipfs/`) URIs to the HTTP gateway; other URIs are returned unchanged.
pub fn ipfs_to_gateway(uri: &str, gateway: &str) -> String {
    match uri.strip_prefix("ipfs://") {
        Some(path) => {
            let path = path.strip_prefix("ipfs/").unwrap_or(path);
            format!("{}/{}", gateway.trim_end_matches('/'), path)
        }
        None => uri.to_string(),
    }
}

fn parse_data_uri(uri: &str) -> Result<Value, SyncError> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| SyncError::ParsingError(format!("Malformed data URI: {:.40}", uri)))?;
    let bytes = if header.ends_with(";base64") {
        STANDARD
            .decode(payload.trim())
            .map_err(|err| SyncError::ParsingError(format!("Invalid base64 in data URI: {}", err)))?
    } else {
        payload.as_bytes().to_vec()
    };
    Ok(serde_json::from_slice(&bytes)?)
}

/// Display fields extracted from a metadata document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDisplay {
    pub name: String,
    pub description: String,
    pub image: String,
}

pub struct MetadataResolver {
    http: reqwest::Client,
    ipfs_gateway: String,
}

impl MetadataResolver {
    pub fn new(ipfs_gateway: &str) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(MetadataResolver {
            http,
            ipfs_gateway: ipfs_gateway.to_string(),
        })
    }

    /// Loads the metadata JSON a token URI points at.
    pub async fn resolve(&self, uri: &str) -> Result<Value, SyncError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(SyncError::InvalidInput("Empty token URI".to_string()));
        }
        if uri.starts_with("data:") {
            return parse_data_uri(uri);
        }
        let url = ipfs_to_gateway(uri, &self.ipfs_gateway);
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SyncError::InvalidInput(format!(
                "Unsupported token URI scheme: {}",
                uri
            )));
        }
        log::debug!("Fetching token metadata from {}", url);
        let body = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(body)
    }

    pub fn display(&self, token_id: &str, metadata: &Value) -> TokenDisplay {
        let text = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let image = text("image")
            .or_else(|| text("image_url"))
            .map(|image| ipfs_to_gateway(&image, &self.ipfs_gateway))
            .unwrap_or_else(|| placeholder_image(token_id));
        TokenDisplay {
            name: text("name").unwrap_or_else(|| format!("Token #{}", token_id)),
            description: text("description").unwrap_or_default(),
            image,
        }
    }
}
