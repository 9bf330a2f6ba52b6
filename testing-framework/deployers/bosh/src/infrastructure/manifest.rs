use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use testing_framework_core::deployment::DeploymentRequest;
use thiserror::Error;
use tracing::debug;

const VARS_FILE: &str = "vars.yml";
const VARS_STORE: &str = "creds.yml";
const SSH_KEY_VARIABLE: &str = "ssh_key";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("no base manifest configured (set HAPROXY_BASE_MANIFEST)")]
    MissingBaseManifest,
    #[error("base manifest {path} is not readable: {source}")]
    BaseManifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare deploy workspace: {source}")]
    Io {
        #[source]
        source: io::Error,
    },
    #[error("failed to render deploy vars: {source}")]
    Vars {
        #[source]
        source: serde_yaml::Error,
    },
    #[error("vars store {path} has no ssh_key.private_key")]
    MissingPrivateKey { path: PathBuf },
    #[error("failed to read vars store {path}: {source}")]
    VarsStore {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Ops file wiring HAProxy to a single backend on the instance's loopback and
/// provisioning an SSH user for the reverse tunnel. The key pair is generated
/// by the director into the vars store.
#[must_use]
pub fn backend_ops(instance_group: &str, ssh_user: &str) -> String {
    let jobs = format!("/instance_groups/name={instance_group}/jobs");
    format!(
        "---\n\
         - type: replace\n  \
         path: {jobs}/name=haproxy/properties/ha_proxy/backend_servers?\n  \
         value: [127.0.0.1]\n\
         - type: replace\n  \
         path: {jobs}/name=haproxy/properties/ha_proxy/backend_port?\n  \
         value: ((haproxy-backend-port))\n\
         - type: replace\n  \
         path: /variables?/-\n  \
         value:\n    \
         name: {SSH_KEY_VARIABLE}\n    \
         type: ssh\n\
         - type: replace\n  \
         path: {jobs}/-\n  \
         value:\n    \
         name: user_add\n    \
         release: os-conf\n    \
         properties:\n      \
         users:\n      \
         - name: {ssh_user}\n        \
         public_key: (({SSH_KEY_VARIABLE}.public_key))\n"
    )
}

/// Scratch directory holding everything one `bosh deploy` reads or writes.
/// Dropping it removes the generated credentials.
#[derive(Debug)]
pub struct DeployWorkspace {
    dir: TempDir,
    pub manifest: PathBuf,
    pub ops_files: Vec<PathBuf>,
    pub vars_file: PathBuf,
    pub vars_store: PathBuf,
}

impl DeployWorkspace {
    /// Write the built-in ops file, the request's overlays (in order) and its
    /// vars next to an empty vars store.
    pub fn prepare(
        base_manifest: Option<&Path>,
        request: &DeploymentRequest,
        instance_group: &str,
        ssh_user: &str,
    ) -> Result<Self, ManifestError> {
        let manifest = base_manifest.ok_or(ManifestError::MissingBaseManifest)?;
        fs::metadata(manifest).map_err(|source| ManifestError::BaseManifest {
            path: manifest.to_path_buf(),
            source,
        })?;

        let dir = tempfile::Builder::new()
            .prefix("bosh-deploy-")
            .tempdir()
            .map_err(|source| ManifestError::Io { source })?;

        let overlays = std::iter::once(backend_ops(instance_group, ssh_user))
            .chain(request.ops_files.iter().cloned());
        let mut ops_files = Vec::new();
        for (index, contents) in overlays.enumerate() {
            let path = dir.path().join(format!("ops-{index}.yml"));
            fs::write(&path, contents).map_err(|source| ManifestError::Io { source })?;
            ops_files.push(path);
        }

        let mut vars = request.vars.clone();
        vars.insert(
            "haproxy-backend-port".to_owned(),
            serde_yaml::Value::Number(u64::from(request.backend_port).into()),
        );
        let vars_file = dir.path().join(VARS_FILE);
        write_vars(&vars_file, &vars)?;

        let vars_store = dir.path().join(VARS_STORE);
        debug!(
            workspace = %dir.path().display(),
            ops_files = ops_files.len(),
            "prepared deploy workspace"
        );

        Ok(Self {
            manifest: manifest.to_path_buf(),
            ops_files,
            vars_file,
            vars_store,
            dir,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Private half of the generated tunnel key pair.
    pub fn private_key(&self) -> Result<String, ManifestError> {
        read_private_key(&self.vars_store)
    }
}

fn write_vars(
    path: &Path,
    vars: &BTreeMap<String, serde_yaml::Value>,
) -> Result<(), ManifestError> {
    let rendered = serde_yaml::to_string(vars).map_err(|source| ManifestError::Vars { source })?;
    fs::write(path, rendered).map_err(|source| ManifestError::Io { source })
}

fn read_private_key(vars_store: &Path) -> Result<String, ManifestError> {
    let store_error = |source: anyhow::Error| ManifestError::VarsStore {
        path: vars_store.to_path_buf(),
        source,
    };
    let raw = fs::read_to_string(vars_store).map_err(|err| store_error(err.into()))?;
    let store: serde_yaml::Value =
        serde_yaml::from_str(&raw).map_err(|err| store_error(err.into()))?;
    store
        .get(SSH_KEY_VARIABLE)
        .and_then(|key| key.get("private_key"))
        .and_then(serde_yaml::Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| ManifestError::MissingPrivateKey {
            path: vars_store.to_path_buf(),
        })
}
