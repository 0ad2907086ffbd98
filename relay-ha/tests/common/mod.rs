//! Shared fixtures: a scriptable fake provider and an in-memory component set.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_ha::cache::{KeyValueCache, MemoryCache};
use relay_ha::channels::{
    Capability, ChannelDescriptor, ChannelHealthMonitor, ChannelInfo, ChannelProvider,
    ChannelRegistry, ContentItem, Identity, Membership, MessageRef, NewChannel,
    ProviderConnector, ProviderSource, StorageManager,
};
use relay_ha::config::{ChannelHealthConfig, CredentialConfig, RelayConfig, StorageConfig};
use relay_ha::credentials::{CredentialManager, CredentialSpec};
use relay_ha::database::models::ChannelClass;
use relay_ha::database::repositories::{
    FailoverRepository, HealthRepository, SqlxChannelRepository, SqlxCredentialRepository,
    SqlxFailoverRepository, SqlxHealthRepository, SqlxStorageRepository,
};
use relay_ha::database::{DbPool, init_pool, run_migrations};
use relay_ha::notification::NotificationService;
use relay_ha::{Error, Result};

/// Provider-side state shared by every fake client.
#[derive(Default)]
pub struct FakeWorld {
    failing_secrets: Mutex<HashSet<String>>,
    failing_channels: Mutex<HashSet<String>>,
    send_only_channels: Mutex<HashSet<String>>,
    refuse_deletes: AtomicBool,
    messages: Mutex<HashSet<(String, i64)>>,
    next_id: AtomicI64,
}

impl FakeWorld {
    /// Make identity checks fail for a credential secret.
    pub fn fail_credential(&self, secret: &str) {
        self.failing_secrets.lock().insert(secret.to_string());
    }

    pub fn heal_credential(&self, secret: &str) {
        self.failing_secrets.lock().remove(secret);
    }

    /// Make every call against a channel fail.
    pub fn fail_channel(&self, channel: &str) {
        self.failing_channels.lock().insert(channel.to_string());
    }

    /// Leave the service identity with only the send capability on a channel.
    pub fn restrict_to_send(&self, channel: &str) {
        self.send_only_channels.lock().insert(channel.to_string());
    }

    pub fn refuse_deletes(&self, refuse: bool) {
        self.refuse_deletes.store(refuse, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    fn check_channel(&self, operation: &str, channel: &str) -> Result<()> {
        if self.failing_channels.lock().contains(channel) {
            return Err(Error::provider(operation, format!("chat {channel} not found")));
        }
        Ok(())
    }

    fn post(&self, channel: &str) -> MessageRef {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.messages.lock().insert((channel.to_string(), message_id));
        MessageRef {
            message_id,
            link: format!("https://t.me/c/{}/{message_id}", channel.trim_start_matches('-')),
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub world: Arc<FakeWorld>,
}

#[async_trait]
impl ProviderConnector for FakeConnector {
    async fn connect(&self, credential: &CredentialSpec) -> Result<Arc<dyn ChannelProvider>> {
        Ok(Arc::new(FakeProvider {
            secret: credential.secret.clone(),
            world: self.world.clone(),
        }))
    }
}

pub struct FakeProvider {
    secret: String,
    world: Arc<FakeWorld>,
}

impl FakeProvider {
    fn bot_id(&self) -> i64 {
        self.secret
            .split_once(':')
            .and_then(|(id, _)| id.parse().ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChannelProvider for FakeProvider {
    async fn whoami(&self) -> Result<Identity> {
        if self.world.failing_secrets.lock().contains(&self.secret) {
            return Err(Error::provider("whoami", "Unauthorized"));
        }
        let id = self.bot_id();
        Ok(Identity {
            id,
            username: Some(format!("relay_{id}_bot")),
            display_name: format!("Relay {id}"),
        })
    }

    async fn describe(&self, channel: &str) -> Result<ChannelInfo> {
        self.world.check_channel("describe", channel)?;
        Ok(ChannelInfo {
            external_id: channel.to_string(),
            title: Some(format!("Channel {channel}")),
        })
    }

    async fn send_ephemeral(&self, channel: &str, _text: &str) -> Result<MessageRef> {
        self.world.check_channel("send_message", channel)?;
        Ok(self.world.post(channel))
    }

    async fn send_content(&self, channel: &str, _content: &ContentItem) -> Result<MessageRef> {
        self.world.check_channel("send_document", channel)?;
        Ok(self.world.post(channel))
    }

    async fn delete(&self, channel: &str, message_id: i64) -> Result<()> {
        self.world.check_channel("delete_message", channel)?;
        if self.world.refuse_deletes.load(Ordering::SeqCst) {
            return Err(Error::provider("delete_message", "message can't be deleted"));
        }
        self.world
            .messages
            .lock()
            .remove(&(channel.to_string(), message_id));
        Ok(())
    }

    async fn self_membership(&self, channel: &str) -> Result<Membership> {
        self.world.check_channel("get_chat_member", channel)?;
        if self.world.send_only_channels.lock().contains(channel) {
            return Ok(Membership {
                is_member: true,
                capabilities: [Capability::SendMessages].into_iter().collect(),
            });
        }
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
        self.world.check_channel("forward_message", channel)?;
        Ok(self
            .world
            .messages
            .lock()
            .contains(&(channel.to_string(), message_id)))
    }
}

/// Credential with a `{bot id}:{secret}` token.
pub fn credential(id: &str, bot_id: i64) -> CredentialSpec {
    CredentialSpec::new(id, format!("{bot_id}:secret-token-{id}"), 12345, "apphash")
}

/// In-memory database with every migration applied.
pub async fn setup_test_db() -> DbPool {
    let pool = init_pool("sqlite::memory:")
        .await
        .expect("Failed to create test pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Registry, credentials and storage wired against one in-memory database.
pub struct Harness {
    pub pool: DbPool,
    pub world: Arc<FakeWorld>,
    pub cache: Arc<dyn KeyValueCache>,
    pub registry: Arc<ChannelRegistry>,
    pub credentials: Arc<CredentialManager>,
    pub storage: Arc<StorageManager>,
    pub monitor: Arc<ChannelHealthMonitor>,
    pub health: Arc<dyn HealthRepository>,
    pub failovers: Arc<dyn FailoverRepository>,
}

impl Harness {
    pub async fn new(specs: Vec<CredentialSpec>) -> Self {
        Self::with_config(specs, CredentialConfig::default(), StorageConfig::default()).await
    }

    pub async fn with_config(
        specs: Vec<CredentialSpec>,
        credential_config: CredentialConfig,
        storage_config: StorageConfig,
    ) -> Self {
        let pool = setup_test_db().await;
        let connector = FakeConnector::default();
        let world = connector.world.clone();
        let cache: Arc<dyn KeyValueCache> = Arc::new(MemoryCache::new());
        let notifications = Arc::new(NotificationService::disabled());
        let health: Arc<dyn HealthRepository> = Arc::new(SqlxHealthRepository::new(pool.clone()));
        let failovers: Arc<dyn FailoverRepository> =
            Arc::new(SqlxFailoverRepository::new(pool.clone()));
        let registry = Arc::new(ChannelRegistry::new(Arc::new(SqlxChannelRepository::new(
            pool.clone(),
        ))));

        let credentials = Arc::new(CredentialManager::new(
            Arc::new(connector),
            Arc::new(SqlxCredentialRepository::new(pool.clone())),
            failovers.clone(),
            health.clone(),
            cache.clone(),
            registry.clone(),
            notifications.clone(),
            credential_config,
        ));
        credentials
            .initialize_all(specs)
            .await
            .expect("Failed to initialize credentials");

        let providers: Arc<dyn ProviderSource> = credentials.clone();
        let storage = Arc::new(StorageManager::new(
            registry.clone(),
            Arc::new(SqlxStorageRepository::new(pool.clone())),
            health.clone(),
            failovers.clone(),
            cache.clone(),
            providers.clone(),
            notifications.clone(),
            storage_config,
        ));
        let monitor = Arc::new(ChannelHealthMonitor::new(
            registry.clone(),
            health.clone(),
            cache.clone(),
            providers,
            storage.clone(),
            notifications,
            ChannelHealthConfig {
                probe_spacing: Duration::ZERO,
                ..ChannelHealthConfig::default()
            },
        ));

        Self {
            pool,
            world,
            cache,
            registry,
            credentials,
            storage,
            monitor,
            health,
            failovers,
        }
    }

    pub async fn channel(
        &self,
        external_id: &str,
        class: ChannelClass,
        priority: i64,
        score: i64,
    ) -> ChannelDescriptor {
        self.registry
            .register(NewChannel::new(external_id, class, priority).with_health_score(score))
            .await
            .expect("Failed to register channel")
    }
}

pub fn content(id: &str) -> ContentItem {
    ContentItem::new(id, format!("{id}.mp4"), id.as_bytes().to_vec())
}

/// Service configuration rooted in `dir` with one primary credential.
pub fn service_config(dir: &Path, primary: CredentialSpec) -> RelayConfig {
    let mut config = RelayConfig {
        database_url: "sqlite::memory:".to_string(),
        log_dir: dir.join("logs"),
        ..RelayConfig::default()
    };
    config.credentials.primary = Some(primary);
    config.recovery.backup_locations = vec![dir.join("backups"), dir.join("mirror")];
    config.recovery.scripts_dir = dir.join("scripts");
    config.recovery.recovery_env_file = dir.join(".env.recovery");
    config.recovery.system_config_files = Vec::new();
    config.system_health.disk_path = dir.to_path_buf();
    config.permissions.log_channel = Some("-100100".to_string());
    config.permissions.content_channels = vec!["-100200".to_string()];
    config
}

/// Environment the recovery snapshot reads from.
pub fn service_env(primary: &CredentialSpec) -> HashMap<String, String> {
    [
        ("BOT_TOKEN", primary.secret.as_str()),
        ("API_ID", "12345"),
        ("LOG_CHANNEL", "-100100"),
        ("CONTENT_CHANNELS", "-100200"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
