//! Channel provider seam.
//!
//! The provider is the external messaging platform. The core only depends
//! on the operations below; the concrete client is supplied by the host
//! application through a [`ProviderConnector`].

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialSpec;
use crate::database::models::ChannelClass;
use crate::{Error, Result};

/// Who a credential acts as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub username: Option<String>,
    pub display_name: String,
}

impl Identity {
    /// `@username` when available, the numeric id otherwise.
    pub fn label(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username}"),
            None => self.id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub external_id: String,
    pub title: Option<String>,
}

/// Reference to a message posted on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub message_id: i64,
    pub link: String,
}

/// Capabilities a member can hold on a channel.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SendMessages,
    DeleteMessages,
    ManageMessages,
}

impl ChannelClass {
    /// Capabilities the service identity needs on a channel of this class.
    pub fn required_capabilities(&self) -> &'static [Capability] {
        match self {
            Self::Primary | Self::Backup => &[Capability::SendMessages, Capability::DeleteMessages],
            Self::Archive => &[Capability::SendMessages],
        }
    }
}

/// Membership of the service identity on one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub is_member: bool,
    pub capabilities: BTreeSet<Capability>,
}

impl Membership {
    pub fn missing(&self, required: &[Capability]) -> Vec<Capability> {
        if !self.is_member {
            return required.to_vec();
        }
        required
            .iter()
            .filter(|c| !self.capabilities.contains(c))
            .copied()
            .collect()
    }
}

/// Content handed to a channel for storage.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub content_id: String,
    pub file_name: String,
    pub data: Vec<u8>,
    pub caption: Option<String>,
}

impl ContentItem {
    pub fn new(content_id: impl Into<String>, file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_id: content_id.into(),
            file_name: file_name.into(),
            data,
            caption: None,
        }
    }
}

/// Operations the core needs from the messaging platform.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Identity check for the credential this provider was built from.
    async fn whoami(&self) -> Result<Identity>;
    async fn describe(&self, channel: &str) -> Result<ChannelInfo>;
    async fn send_ephemeral(&self, channel: &str, text: &str) -> Result<MessageRef>;
    async fn send_content(&self, channel: &str, content: &ContentItem) -> Result<MessageRef>;
    async fn delete(&self, channel: &str, message_id: i64) -> Result<()>;
    async fn self_membership(&self, channel: &str) -> Result<Membership>;
    async fn exists(&self, channel: &str, message_id: i64) -> Result<bool>;
}

/// Builds a provider client for a credential.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(&self, credential: &CredentialSpec) -> Result<Arc<dyn ChannelProvider>>;
}

/// Source of the provider bound to the currently active credential.
#[async_trait]
pub trait ProviderSource: Send + Sync {
    async fn provider(&self) -> Result<Arc<dyn ChannelProvider>>;
}

/// Provider source that always hands out the same client.
pub struct FixedProvider(pub Arc<dyn ChannelProvider>);

#[async_trait]
impl ProviderSource for FixedProvider {
    async fn provider(&self) -> Result<Arc<dyn ChannelProvider>> {
        Ok(self.0.clone())
    }
}

/// Run a provider call with a bounded wait. Exceeding it is a failure.
pub async fn bounded<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, limit)),
    }
}
