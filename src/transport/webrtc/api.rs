//! HTTP side of session setup

use log::{debug, info};
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::assets::DEFAULT_STUN_SERVER;
use crate::config::SessionConfig;
use crate::error::TransportError;

#[derive(Debug, Deserialize)]
struct StartSessionResponse {
    session_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IceServersRequest<'a> {
    api_key: &'a str,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum IceUrls {
    One(String),
    Many(Vec<String>),
}

/// One ICE server as returned by the API
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IceServerEntry {
    urls: IceUrls,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    credential: Option<String>,
}

impl From<IceServerEntry> for RTCIceServer {
    fn from(entry: IceServerEntry) -> Self {
        RTCIceServer {
            urls: match entry.urls {
                IceUrls::One(url) => vec![url],
                IceUrls::Many(urls) => urls,
            },
            username: entry.username.unwrap_or_default(),
            credential: entry.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Public STUN server used when no TURN servers are requested
pub fn default_ice_servers() -> Vec<RTCIceServer> {
    vec![RTCIceServer {
        urls: vec![DEFAULT_STUN_SERVER.to_string()],
        ..Default::default()
    }]
}

pub struct SessionApi {
    client: reqwest::Client,
    base_url: String,
}

impl SessionApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Register a session with the renderer; returns its session token
    pub async fn start_session(&self, config: &SessionConfig) -> Result<String, TransportError> {
        let url = format!("{}/startAudioToVideoSession", self.base_url);
        debug!("Api: POST {}", url);

        let response: StartSessionResponse = self
            .client
            .post(&url)
            .json(config)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!("Api: session started for face {}", config.face_id);
        Ok(response.session_token)
    }

    /// Fetch TURN/STUN servers provisioned for this API key
    pub async fn ice_servers(&self, api_key: &str) -> Result<Vec<RTCIceServer>, TransportError> {
        let url = format!("{}/getIceServers", self.base_url);
        debug!("Api: POST {}", url);

        let entries: Vec<IceServerEntry> = self
            .client
            .post(&url)
            .json(&IceServersRequest { api_key })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!("Api: {} ICE servers received", entries.len());
        Ok(entries.into_iter().map(RTCIceServer::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_servers_parse_both_url_forms() {
        let body = r#"[
            {"urls": "stun:stun.example.org:3478"},
            {"urls": ["turn:turn.example.org:3478?transport=udp", "turn:turn.example.org:443"],
             "username": "user", "credential": "secret"}
        ]"#;
        let entries: Vec<IceServerEntry> = serde_json::from_str(body).unwrap();
        let servers: Vec<RTCIceServer> = entries.into_iter().map(RTCIceServer::from).collect();

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.example.org:3478"]);
        assert!(servers[0].username.is_empty());
        assert_eq!(servers[1].urls.len(), 2);
        assert_eq!(servers[1].username, "user");
        assert_eq!(servers[1].credential, "secret");
    }

    #[test]
    fn test_start_session_response() {
        let response: StartSessionResponse =
            serde_json::from_str(r#"{"session_token": "tok", "extra": 1}"#).unwrap();
        assert_eq!(response.session_token, "tok");
    }

    #[test]
    fn test_ice_request_body() {
        let body = serde_json::to_string(&IceServersRequest { api_key: "k" }).unwrap();
        assert_eq!(body, r#"{"apiKey":"k"}"#);
    }

    #[test]
    fn test_default_ice_servers() {
        let servers = default_ice_servers();
        assert_eq!(servers[0].urls, vec![DEFAULT_STUN_SERVER.to_string()]);
    }
}
