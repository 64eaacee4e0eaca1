//! Directory service: resolves a channel name to its ids and chatroom settings.

use async_trait::async_trait;

use crate::Error;
use crate::channel::{ChannelInfo, ChatroomInfo};

pub const DEFAULT_DIRECTORY_BASE: &str = "https://kick.com";

/// Lookups a join needs before it can subscribe.
///
/// Both lookups are keyed by the normalized channel name and may be served by
/// the same endpoint; callers treat them as independent.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn channel_info(&self, name: &str) -> Result<ChannelInfo, Error>;

    async fn chatroom_info(&self, name: &str) -> Result<ChatroomInfo, Error>;
}

/// [`Directory`] backed by Kick's public REST API.
#[derive(Debug, Clone)]
pub struct KickDirectory {
    http: reqwest::Client,
    base_url: String,
}

impl KickDirectory {
    pub fn new() -> Result<Self, Error> {
        Self::with_base_url(DEFAULT_DIRECTORY_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
        path: &str,
    ) -> Result<T, Error> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Directory {
                name: name.to_string(),
                message: format!("GET {path} returned {}", resp.status()),
            });
        }
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl Directory for KickDirectory {
    async fn channel_info(&self, name: &str) -> Result<ChannelInfo, Error> {
        self.get_json(name, &format!("/api/v2/channels/{name}"))
            .await
    }

    async fn chatroom_info(&self, name: &str) -> Result<ChatroomInfo, Error> {
        self.get_json(name, &format!("/api/v2/channels/{name}/chatroom"))
            .await
    }
}
