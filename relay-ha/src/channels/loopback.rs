//! In-process provider.
//!
//! Keeps posted messages in memory. Used by the binary when no external
//! messaging platform is wired in, so the operator commands can be
//! exercised end to end.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::provider::{
    Capability, ChannelInfo, ChannelProvider, ContentItem, Identity, Membership, MessageRef,
    ProviderConnector,
};
use crate::credentials::CredentialSpec;
use crate::{Error, Result};

#[derive(Default)]
struct Store {
    /// `(channel, message id)` to message body.
    messages: DashMap<(String, i64), String>,
    next_id: AtomicI64,
}

/// Connector handing out clients that share one in-memory store.
#[derive(Default, Clone)]
pub struct LoopbackConnector {
    store: Arc<Store>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_count(&self) -> usize {
        self.store.messages.len()
    }
}

#[async_trait]
impl ProviderConnector for LoopbackConnector {
    async fn connect(&self, credential: &CredentialSpec) -> Result<Arc<dyn ChannelProvider>> {
        if credential.secret.is_empty() {
            return Err(Error::provider("connect", "empty credential secret"));
        }
        Ok(Arc::new(LoopbackProvider {
            identity: Identity {
                id: bot_id(&credential.secret).unwrap_or(credential.app_id),
                username: Some(format!("loopback_{}", credential.id)),
                display_name: credential.display_name(),
            },
            store: self.store.clone(),
        }))
    }
}

/// Numeric prefix of a `123456:secret` style token.
fn bot_id(secret: &str) -> Option<i64> {
    secret.split_once(':').and_then(|(id, _)| id.parse().ok())
}

struct LoopbackProvider {
    identity: Identity,
    store: Arc<Store>,
}

impl LoopbackProvider {
    fn post(&self, channel: &str, body: String) -> MessageRef {
        let message_id = self.store.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.store
            .messages
            .insert((channel.to_string(), message_id), body);
        MessageRef {
            message_id,
            link: format!("loopback://{channel}/{message_id}"),
        }
    }
}

#[async_trait]
impl ChannelProvider for LoopbackProvider {
    async fn whoami(&self) -> Result<Identity> {
        Ok(self.identity.clone())
    }

    async fn describe(&self, channel: &str) -> Result<ChannelInfo> {
        Ok(ChannelInfo {
            external_id: channel.to_string(),
            title: Some(channel.to_string()),
        })
    }

    async fn send_ephemeral(&self, channel: &str, text: &str) -> Result<MessageRef> {
        Ok(self.post(channel, text.to_string()))
    }

    async fn send_content(&self, channel: &str, content: &ContentItem) -> Result<MessageRef> {
        Ok(self.post(channel, content.file_name.clone()))
    }

    async fn delete(&self, channel: &str, message_id: i64) -> Result<()> {
        self.store
            .messages
            .remove(&(channel.to_string(), message_id))
            .map(|_| ())
            .ok_or_else(|| Error::not_found("Message", message_id.to_string()))
    }

    async fn self_membership(&self, _channel: &str) -> Result<Membership> {
        Ok(Membership {
            is_member: true,
            capabilities: [
                Capability::SendMessages,
                Capability::DeleteMessages,
                Capability::ManageMessages,
            ]
            .into_iter()
            .collect(),
        })
    }

    async fn exists(&self, channel: &str, message_id: i64) -> Result<bool> {
        Ok(self
            .store
            .messages
            .contains_key(&(channel.to_string(), message_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_then_delete() {
        let connector = LoopbackConnector::new();
        let client = connector
            .connect(&CredentialSpec::new("primary", "123:abc", 1, "hash"))
            .await
            .unwrap();

        let message = client.send_ephemeral("-100", "ping").await.unwrap();
        assert!(client.exists("-100", message.message_id).await.unwrap());
        assert_eq!(connector.message_count(), 1);

        client.delete("-100", message.message_id).await.unwrap();
        assert!(!client.exists("-100", message.message_id).await.unwrap());
        assert!(client.delete("-100", message.message_id).await.is_err());
    }

    #[tokio::test]
    async fn test_identity_from_token_prefix() {
        let connector = LoopbackConnector::new();
        let client = connector
            .connect(&CredentialSpec::new("backup_1", "987:xyz", 1, "hash"))
            .await
            .unwrap();
        assert_eq!(client.whoami().await.unwrap().id, 987);
        assert!(
            connector
                .connect(&CredentialSpec::new("empty", "", 1, "hash"))
                .await
                .is_err()
        );
    }
}
