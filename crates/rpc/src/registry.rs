//! 服务注册
//!
//! `Registry` 是服务发现的接缝：框架只负责注册、续约、注销和查询，
//! 具体后端（内存、etcd）由调用方提供。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// etcd 注册中心地址前缀
pub const ETCD_SCHEME: &str = "etcd://";

/// 服务节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Node {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            metadata: HashMap::new(),
        }
    }
}

/// 注册记录：服务名 + 本进程节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub node: Node,
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("service {0} not found")]
    NotFound(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("registry backend '{0}' is not supported")]
    Unsupported(String),
}

/// 服务注册中心
#[async_trait]
pub trait Registry: Send + Sync {
    /// 注册或续约节点，`ttl` 后未续约则过期
    async fn register(&self, record: &ServiceRecord, ttl: Duration) -> Result<(), RegistryError>;

    async fn deregister(&self, record: &ServiceRecord) -> Result<(), RegistryError>;

    /// 查询服务的存活节点
    async fn lookup(&self, service: &str) -> Result<Vec<Node>, RegistryError>;
}

/// 由绑定构造注册中心的工厂
pub type RegistryFactory =
    Arc<dyn Fn(&RegistryBinding) -> Result<Arc<dyn Registry>, RegistryError> + Send + Sync>;

/// 注册中心绑定
///
/// 只有带可识别前缀的地址会产生绑定，前缀后的地址按逗号拆分为节点列表。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryBinding {
    Etcd { peers: Vec<String> },
}

impl RegistryBinding {
    pub fn parse(address: &str) -> Option<Self> {
        let peers = address.strip_prefix(ETCD_SCHEME)?;
        Some(Self::Etcd {
            peers: peers
                .split(',')
                .map(str::trim)
                .filter(|peer| !peer.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Etcd { .. } => "etcd",
        }
    }

    pub fn peers(&self) -> &[String] {
        match self {
            Self::Etcd { peers } => peers,
        }
    }
}

/// 进程内注册中心
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    services: Arc<Mutex<BTreeMap<String, BTreeMap<String, Entry>>>>,
}

struct Entry {
    node: Node,
    expires_at: Instant,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, record: &ServiceRecord, ttl: Duration) -> Result<(), RegistryError> {
        let mut services = self.services.lock().unwrap_or_else(PoisonError::into_inner);
        services.entry(record.name.clone()).or_default().insert(
            record.node.id.clone(),
            Entry {
                node: record.node.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn deregister(&self, record: &ServiceRecord) -> Result<(), RegistryError> {
        let mut services = self.services.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(nodes) = services.get_mut(&record.name) {
            nodes.remove(&record.node.id);
            if nodes.is_empty() {
                services.remove(&record.name);
            }
        }
        Ok(())
    }

    async fn lookup(&self, service: &str) -> Result<Vec<Node>, RegistryError> {
        let now = Instant::now();
        let mut services = self.services.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(nodes) = services.get_mut(service) else {
            return Err(RegistryError::NotFound(service.to_string()));
        };
        nodes.retain(|_, entry| entry.expires_at > now);
        if nodes.is_empty() {
            services.remove(service);
            return Err(RegistryError::NotFound(service.to_string()));
        }
        Ok(nodes.values().map(|entry| entry.node.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, id: &str) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            node: Node::new(id, format!("memory:{id}")),
        }
    }

    #[test]
    fn test_binding_parse() {
        assert_eq!(
            RegistryBinding::parse("etcd://10.0.0.1:2379"),
            Some(RegistryBinding::Etcd {
                peers: vec!["10.0.0.1:2379".to_string()]
            })
        );

        let binding = RegistryBinding::parse("etcd://a:2379, b:2379,,c:2379").unwrap();
        assert_eq!(binding.scheme(), "etcd");
        assert_eq!(binding.peers(), ["a:2379", "b:2379", "c:2379"]);
    }

    #[test]
    fn test_binding_requires_scheme() {
        assert_eq!(RegistryBinding::parse("10.0.0.1:2379"), None);
        assert_eq!(RegistryBinding::parse("memory"), None);
        assert_eq!(RegistryBinding::parse("consul://10.0.0.1"), None);
    }

    #[tokio::test]
    async fn test_register_lookup_deregister() {
        let registry = MemoryRegistry::new();
        let first = record("orders", "orders-1");
        let second = record("orders", "orders-2");
        registry.register(&first, Duration::from_secs(30)).await.unwrap();
        registry.register(&second, Duration::from_secs(30)).await.unwrap();

        let nodes = registry.lookup("orders").await.unwrap();
        assert_eq!(nodes.len(), 2);

        registry.deregister(&first).await.unwrap();
        let nodes = registry.lookup("orders").await.unwrap();
        assert_eq!(nodes, vec![second.node.clone()]);

        registry.deregister(&second).await.unwrap();
        assert!(matches!(
            registry.lookup("orders").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_without_refresh() {
        let registry = MemoryRegistry::new();
        let node = record("orders", "orders-1");
        registry.register(&node, Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        registry.register(&node, Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(registry.lookup("orders").await.is_ok());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(registry.lookup("orders").await.is_err());
    }
}
