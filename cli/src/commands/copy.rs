//! `depot copy` command: copy a container within one daemon or across two.
//!
//! Within a daemon the copy is a single local clone. Across daemons the
//! source serves the container over a migration websocket and the
//! destination pulls it, trying each address the source advertises.

use std::collections::HashMap;

use clap::Args;
use depot_core::container::{is_snapshot, is_volatile_key, ContainerCreateRequest};
use depot_core::error::DepotError;
use depot_core::Result;

use crate::client::{websocket_url, Connector, RemoteConnector};
use crate::config::RemotesConfig;

#[derive(Args)]
pub struct CopyArgs {
    /// Source container or snapshot ([remote:]name[/snapshot])
    pub source: String,

    /// Destination ([remote:]name); `remote:` alone keeps the source name
    pub destination: String,

    /// Keep `volatile.*` config keys on the copy
    #[arg(long)]
    pub keep_volatile: bool,
}

/// A resolved copy between two remotes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyRequest {
    pub source_remote: String,
    pub source_name: String,
    pub dest_remote: String,
    /// Empty means the source's last path component
    pub dest_name: String,
    pub keep_volatile: bool,
}

pub async fn execute(args: CopyArgs) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = RemotesConfig::load(&RemotesConfig::default_path())?;
    let (source_remote, source_name) = config.parse_remote_and_container(&args.source);
    let (dest_remote, dest_name) = config.parse_remote_and_container(&args.destination);

    let request = CopyRequest {
        source_remote,
        source_name,
        dest_remote,
        dest_name,
        keep_volatile: args.keep_volatile,
    };
    let connector = RemoteConnector::new(config);
    copy_container(&connector, &request).await?;
    Ok(())
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Copy a container or snapshot as described by `request`.
pub async fn copy_container(connector: &dyn Connector, request: &CopyRequest) -> Result<()> {
    let source_name = request.source_name.as_str();
    if source_name.is_empty() {
        return Err(DepotError::BadRequest(
            "you must specify a source container name".into(),
        ));
    }
    let dest_name = if request.dest_name.is_empty() {
        basename(source_name)
    } else {
        request.dest_name.as_str()
    };

    let same_remote = request.source_remote == request.dest_remote;
    if same_remote && source_name == dest_name {
        return Err(DepotError::IllegalCopy(
            "can't copy to the same container name".into(),
        ));
    }

    let source = connector.connect(&request.source_remote)?;

    // Snapshots carry no state of their own.
    let (config, profiles, base_image) = if is_snapshot(source_name) {
        (HashMap::new(), Vec::new(), String::new())
    } else {
        let state = source.container_state(source_name).await?;
        let base_image = state.base_image();
        let mut config = state.config;
        if !request.keep_volatile {
            config.retain(|key, _| !is_volatile_key(key));
        }
        (config, state.profiles, base_image)
    };

    if same_remote {
        let operation = source
            .local_copy(source_name, dest_name, config, profiles)
            .await?;
        source.wait_for_success(&operation).await?;
        tracing::info!(
            remote = %request.source_remote,
            source = %source_name,
            destination = %dest_name,
            "Container copied"
        );
        return Ok(());
    }

    let dest = connector.connect(&request.dest_remote)?;

    let available = dest.list_profiles().await?;
    let missing: Vec<String> = profiles
        .iter()
        .filter(|profile| !available.contains(profile))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(DepotError::MissingProfiles(missing));
    }

    let migration = source.migration_source(source_name).await?;
    let addresses = source.addresses().await?;

    let mut last_error = None;
    for addr in &addresses {
        let url = websocket_url(addr, &migration.operation);
        let create = ContainerCreateRequest::migration(
            dest_name,
            &url,
            migration.secrets.clone(),
            config.clone(),
            profiles.clone(),
            &base_image,
        );

        let result = match dest.migrate_from(create).await {
            Ok(operation) => dest.wait_for_success(&operation).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                tracing::info!(
                    source = %format!("{}:{}", request.source_remote, source_name),
                    destination = %format!("{}:{}", request.dest_remote, dest_name),
                    address = %addr,
                    "Container migrated"
                );
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(address = %addr, error = %e, "Migration through address failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| DepotError::Remote {
        remote: request.source_remote.clone(),
        message: "source daemon advertised no addresses".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DaemonClient, MigrationSource};
    use async_trait::async_trait;
    use depot_core::container::{ContainerState, BASE_IMAGE_KEY};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const OPERATION: &str = "/1.0/operations/3b0d5d9e-0f9c-4a57-9d5e-2c4bd2b5b0a1";

    /// In-memory daemon recording every call it receives.
    #[derive(Default)]
    struct FakeDaemon {
        containers: Mutex<HashMap<String, ContainerState>>,
        profiles: Vec<String>,
        addresses: Vec<String>,
        /// Source addresses this daemon cannot dial
        unreachable: Vec<String>,
        /// Operations that fail when waited on
        failing_ops: Vec<String>,
        calls: Mutex<Vec<String>>,
        migrations: Mutex<Vec<ContainerCreateRequest>>,
    }

    impl FakeDaemon {
        fn record(&self, call: &str) {
            self.calls.lock().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn container(&self, name: &str) -> Option<ContainerState> {
            self.containers.lock().get(name).cloned()
        }
    }

    #[async_trait]
    impl DaemonClient for FakeDaemon {
        async fn container_state(&self, name: &str) -> Result<ContainerState> {
            self.record("container_state");
            self.container(name)
                .ok_or_else(|| DepotError::NotFound(format!("container {}", name)))
        }

        async fn local_copy(
            &self,
            source: &str,
            name: &str,
            config: HashMap<String, String>,
            profiles: Vec<String>,
        ) -> Result<String> {
            self.record("local_copy");
            let base = self.container(source).unwrap_or_default();
            let mut config = config;
            config.insert(BASE_IMAGE_KEY.to_string(), base.base_image());
            self.containers.lock().insert(
                name.to_string(),
                ContainerState {
                    name: name.to_string(),
                    config,
                    profiles,
                },
            );
            Ok("/1.0/operations/local".to_string())
        }

        async fn list_profiles(&self) -> Result<Vec<String>> {
            self.record("list_profiles");
            Ok(self.profiles.clone())
        }

        async fn migration_source(&self, name: &str) -> Result<MigrationSource> {
            self.record("migration_source");
            let mut secrets = HashMap::new();
            secrets.insert("control".to_string(), format!("{}-control", name));
            secrets.insert("fs".to_string(), format!("{}-fs", name));
            Ok(MigrationSource {
                operation: OPERATION.to_string(),
                secrets,
            })
        }

        async fn addresses(&self) -> Result<Vec<String>> {
            self.record("addresses");
            Ok(self.addresses.clone())
        }

        async fn migrate_from(&self, request: ContainerCreateRequest) -> Result<String> {
            self.record("migrate_from");
            if self
                .unreachable
                .iter()
                .any(|addr| request.source.operation.contains(addr.as_str()))
            {
                return Err(DepotError::Remote {
                    remote: "dst".to_string(),
                    message: format!("dial {} failed", request.source.operation),
                });
            }

            let mut config = request.config.clone();
            config.insert(BASE_IMAGE_KEY.to_string(), request.source.base_image.clone());
            self.containers.lock().insert(
                request.name.clone(),
                ContainerState {
                    name: request.name.clone(),
                    config,
                    profiles: request.profiles.clone(),
                },
            );
            self.migrations.lock().push(request);
            Ok("/1.0/operations/migrate".to_string())
        }

        async fn wait_for_success(&self, operation: &str) -> Result<()> {
            self.record("wait_for_success");
            if self.failing_ops.iter().any(|op| op == operation) {
                return Err(DepotError::Remote {
                    remote: "dst".to_string(),
                    message: "migration failed".to_string(),
                });
            }
            Ok(())
        }
    }

    struct FakeConnector {
        daemons: HashMap<String, Arc<FakeDaemon>>,
    }

    impl Connector for FakeConnector {
        fn connect(&self, remote: &str) -> Result<Arc<dyn DaemonClient>> {
            let daemon = self
                .daemons
                .get(remote)
                .cloned()
                .ok_or_else(|| DepotError::NotFound(format!("remote {}", remote)))?;
            Ok(daemon)
        }
    }

    fn connector(daemons: &[(&str, &Arc<FakeDaemon>)]) -> FakeConnector {
        FakeConnector {
            daemons: daemons
                .iter()
                .map(|(name, daemon)| (name.to_string(), Arc::clone(daemon)))
                .collect(),
        }
    }

    fn source_daemon() -> FakeDaemon {
        let mut config = HashMap::new();
        config.insert(BASE_IMAGE_KEY.to_string(), "fp-base".to_string());
        config.insert("volatile.eth0.hwaddr".to_string(), "00:16:3e:aa".to_string());
        config.insert("volatile.last_state.power".to_string(), "RUNNING".to_string());
        config.insert("limits.cpu".to_string(), "2".to_string());

        let daemon = FakeDaemon {
            profiles: vec!["default".to_string(), "web".to_string()],
            addresses: vec!["10.0.0.1:8443".to_string(), "10.0.0.2:8443".to_string()],
            ..Default::default()
        };
        daemon.containers.lock().insert(
            "c1".to_string(),
            ContainerState {
                name: "c1".to_string(),
                config,
                profiles: vec!["default".to_string(), "web".to_string()],
            },
        );
        daemon
    }

    fn request(source: &str, dest: &str) -> CopyRequest {
        let (source_remote, source_name) = source.split_once(':').unwrap();
        let (dest_remote, dest_name) = dest.split_once(':').unwrap();
        CopyRequest {
            source_remote: source_remote.to_string(),
            source_name: source_name.to_string(),
            dest_remote: dest_remote.to_string(),
            dest_name: dest_name.to_string(),
            keep_volatile: false,
        }
    }

    #[tokio::test]
    async fn test_cross_remote_falls_back_to_next_address() {
        let src = Arc::new(source_daemon());
        let dst = Arc::new(FakeDaemon {
            profiles: vec!["default".to_string(), "web".to_string()],
            unreachable: vec!["10.0.0.1:8443".to_string()],
            ..Default::default()
        });

        copy_container(&connector(&[("src", &src), ("dst", &dst)]), &request("src:c1", "dst:c2"))
            .await
            .unwrap();

        let migrations = dst.migrations.lock().clone();
        assert_eq!(migrations.len(), 1);
        let migration = &migrations[0];
        assert_eq!(migration.name, "c2");
        assert_eq!(
            migration.source.operation,
            format!("wss://10.0.0.2:8443{}/websocket", OPERATION)
        );
        assert_eq!(migration.source.base_image, "fp-base");
        assert_eq!(migration.source.mode, "pull");
        assert_eq!(migration.source.secrets["control"], "c1-control");
        assert_eq!(migration.profiles, vec!["default", "web"]);
        assert!(migration.config.keys().all(|k| !is_volatile_key(k)));
        assert_eq!(migration.config["limits.cpu"], "2");

        let copy = dst.container("c2").unwrap();
        assert_eq!(copy.base_image(), "fp-base");
        assert_eq!(
            copy.config.keys().filter(|k| is_volatile_key(k)).count(),
            1,
            "only the base image marker is volatile"
        );

        assert_eq!(
            dst.calls(),
            vec![
                "list_profiles",
                "migrate_from",
                "migrate_from",
                "wait_for_success"
            ]
        );
    }

    #[tokio::test]
    async fn test_cross_remote_failed_wait_tries_next_address() {
        let src = Arc::new(source_daemon());
        // Every wait fails, so each address is tried and the last error wins.
        let dst = Arc::new(FakeDaemon {
            profiles: vec!["default".to_string(), "web".to_string()],
            failing_ops: vec!["/1.0/operations/migrate".to_string()],
            ..Default::default()
        });

        let err = copy_container(&connector(&[("src", &src), ("dst", &dst)]), &request("src:c1", "dst:c2"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("migration failed"));
        assert_eq!(dst.migrations.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_cross_remote_all_addresses_fail() {
        let src = Arc::new(source_daemon());
        let dst = Arc::new(FakeDaemon {
            profiles: vec!["default".to_string(), "web".to_string()],
            unreachable: vec!["10.0.0.1:8443".to_string(), "10.0.0.2:8443".to_string()],
            ..Default::default()
        });

        let err = copy_container(&connector(&[("src", &src), ("dst", &dst)]), &request("src:c1", "dst:c2"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("10.0.0.2:8443"), "{}", err);
        assert!(dst.container("c2").is_none());
    }

    #[tokio::test]
    async fn test_cross_remote_no_addresses() {
        let src = Arc::new(FakeDaemon {
            addresses: Vec::new(),
            ..source_daemon()
        });
        let dst = Arc::new(FakeDaemon {
            profiles: vec!["default".to_string(), "web".to_string()],
            ..Default::default()
        });

        let err = copy_container(&connector(&[("src", &src), ("dst", &dst)]), &request("src:c1", "dst:c2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::Remote { .. }));
        assert!(!dst.calls().contains(&"migrate_from".to_string()));
    }

    #[tokio::test]
    async fn test_keep_volatile() {
        let src = Arc::new(source_daemon());
        let dst = Arc::new(FakeDaemon {
            profiles: vec!["default".to_string(), "web".to_string()],
            ..Default::default()
        });
        let mut req = request("src:c1", "dst:c2");
        req.keep_volatile = true;

        copy_container(&connector(&[("src", &src), ("dst", &dst)]), &req)
            .await
            .unwrap();

        let migrations = dst.migrations.lock().clone();
        assert_eq!(migrations[0].config["volatile.eth0.hwaddr"], "00:16:3e:aa");
        assert_eq!(migrations[0].config[BASE_IMAGE_KEY], "fp-base");
    }

    #[tokio::test]
    async fn test_missing_profiles_creates_nothing() {
        let src = Arc::new(source_daemon());
        let dst = Arc::new(FakeDaemon {
            profiles: vec!["default".to_string()],
            ..Default::default()
        });

        let err = copy_container(&connector(&[("src", &src), ("dst", &dst)]), &request("src:c1", "dst:c2"))
            .await
            .unwrap_err();
        match err {
            DepotError::MissingProfiles(missing) => assert_eq!(missing, vec!["web"]),
            other => panic!("unexpected: {}", other),
        }
        assert_eq!(dst.calls(), vec!["list_profiles"]);
        assert!(!src.calls().contains(&"migration_source".to_string()));
    }

    #[tokio::test]
    async fn test_same_remote_same_name_is_illegal() {
        let src = Arc::new(source_daemon());

        let err = copy_container(&connector(&[("local", &src)]), &request("local:c1", "local:c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::IllegalCopy(_)));
        assert!(src.calls().is_empty());
    }

    #[tokio::test]
    async fn test_same_remote_bare_destination_is_illegal() {
        let src = Arc::new(source_daemon());

        let err = copy_container(&connector(&[("local", &src)]), &request("local:c1", "local:"))
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::IllegalCopy(_)));
    }

    #[tokio::test]
    async fn test_same_remote_local_copy() {
        let src = Arc::new(source_daemon());

        copy_container(&connector(&[("local", &src)]), &request("local:c1", "local:c2"))
            .await
            .unwrap();

        assert_eq!(
            src.calls(),
            vec!["container_state", "local_copy", "wait_for_success"]
        );
        let copy = src.container("c2").unwrap();
        assert_eq!(copy.base_image(), "fp-base");
        assert!(!copy.config.contains_key("volatile.eth0.hwaddr"));
        assert_eq!(copy.profiles, vec!["default", "web"]);
    }

    #[tokio::test]
    async fn test_snapshot_copy_skips_state_and_uses_basename() {
        let src = Arc::new(source_daemon());
        let dst = Arc::new(FakeDaemon::default());

        copy_container(&connector(&[("src", &src), ("dst", &dst)]), &request("src:c1/snap0", "dst:"))
            .await
            .unwrap();

        assert!(!src.calls().contains(&"container_state".to_string()));
        let migrations = dst.migrations.lock().clone();
        assert_eq!(migrations[0].name, "snap0");
        assert_eq!(migrations[0].source.base_image, "");
        assert!(migrations[0].profiles.is_empty());
    }

    #[tokio::test]
    async fn test_empty_source_name() {
        let src = Arc::new(source_daemon());

        let err = copy_container(&connector(&[("local", &src)]), &request("local:", "local:c2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_remote() {
        let src = Arc::new(source_daemon());

        let err = copy_container(&connector(&[("src", &src)]), &request("src:c1", "nowhere:c2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::NotFound(_)));
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("c1"), "c1");
        assert_eq!(basename("c1/snap0"), "snap0");
    }
}
