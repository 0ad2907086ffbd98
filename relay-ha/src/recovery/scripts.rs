//! Deployment scripts bundled into recovery packages.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;

/// Shell scripts for redeploying the service from a recovery package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentScripts {
    pub quick_deploy: String,
    pub health_check: String,
    pub rollback: String,
    pub permissions_setup: String,
}

impl DeploymentScripts {
    /// Scripts that source `env_file` before running the binary.
    pub fn generate(env_file: &Path) -> Self {
        let env_file = env_file.display();
        Self {
            quick_deploy: format!(
                r#"#!/bin/bash
# Emergency quick deploy
set -e

if [ -f "{env_file}" ]; then
    set -a
    . "{env_file}"
    set +a
    echo "environment loaded from {env_file}"
fi

relay-ha health-check > /dev/null
echo "datastore and cache reachable"

relay-ha run &
PID=$!
sleep 10

if kill -0 "$PID" 2>/dev/null; then
    echo "relay-ha started (pid $PID)"
else
    echo "relay-ha failed to start" >&2
    exit 1
fi
"#
            ),
            health_check: r#"#!/bin/bash
# Health check
set -e

if ! pgrep -f "relay-ha run" > /dev/null; then
    echo "relay-ha is not running" >&2
    exit 1
fi

relay-ha health-check
"#
            .to_string(),
            rollback: r#"#!/bin/bash
# Rollback to the previous configuration
set -e

pkill -f "relay-ha run" || true

if [ -f ".env.backup" ]; then
    cp .env.backup .env
    echo "configuration restored from .env.backup"
fi

relay-ha run &
echo "relay-ha restarted"
"#
            .to_string(),
            permissions_setup: format!(
                r#"#!/bin/bash
# Channel permission setup
set -e

if [ -f "{env_file}" ]; then
    set -a
    . "{env_file}"
    set +a
fi

relay-ha sync-permissions
"#
            ),
        }
    }

    /// `(name, body)` pairs in a stable order.
    pub fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("quick_deploy", &self.quick_deploy),
            ("health_check", &self.health_check),
            ("rollback", &self.rollback),
            ("permissions_setup", &self.permissions_setup),
        ]
    }

    /// Write every script as `{dir}/{name}.sh`, executable on Unix.
    pub async fn install(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dir).await?;
        let mut written = Vec::with_capacity(4);
        for (name, body) in self.entries() {
            let path = dir.join(format!("{name}.sh"));
            tokio::fs::write(&path, body).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
            }
            debug!(path = %path.display(), "Deployment script written");
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uses_env_file() {
        let scripts = DeploymentScripts::generate(Path::new(".env.recovery"));
        assert!(scripts.quick_deploy.contains(". \".env.recovery\""));
        assert!(scripts.permissions_setup.contains("relay-ha sync-permissions"));
        assert!(scripts.entries().iter().all(|(_, body)| body.starts_with("#!/bin/bash")));
    }

    #[tokio::test]
    async fn test_install_writes_executables() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = DeploymentScripts::generate(Path::new(".env.recovery"));
        let written = scripts.install(&dir.path().join("scripts")).await.unwrap();
        assert_eq!(written.len(), 4);
        assert!(written[0].ends_with("quick_deploy.sh"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&written[0]).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }
}
