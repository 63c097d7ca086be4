// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Per-user policy file, relative to `$HOME`.
pub const USER_POLICY_FILE: &str = ".config/containers/policy.json";

/// System-wide policy file.
pub const SYSTEM_DEFAULT_POLICY_PATH: &str = "/etc/containers/policy.json";

/// Where to find the signature policy.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Use this policy file instead of looking for the default ones.
    ///
    /// This value defaults to `None`.
    #[serde(default = "Option::default")]
    pub signature_policy_path: Option<PathBuf>,

    /// Prefix for the system-wide policy path, e.g. when evaluating a
    /// policy inside a mounted root filesystem.
    ///
    /// This value defaults to `None`.
    #[serde(default = "Option::default")]
    pub root_for_implicit_absolute_paths: Option<PathBuf>,
}

impl TryFrom<&Path> for PolicyConfig {
    /// Load `PolicyConfig` from a configuration file like:
    ///    signature_policy_path = "/etc/containers/policy.json"
    ///    root_for_implicit_absolute_paths = "/mnt/rootfs"
    type Error = Error;

    fn try_from(config_path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(config_path).map_err(|e| Error::read_file(config_path, e))?;
        toml::from_str(&content).map_err(|source| Error::Config { source })
    }
}

impl PolicyConfig {
    pub fn from_file(config_path: impl AsRef<Path>) -> Result<Self> {
        Self::try_from(config_path.as_ref())
    }

    /// The policy file to use: the configured one, the per-user one if it
    /// exists, or the system-wide one.
    pub fn default_policy_path(&self) -> Result<PathBuf> {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        self.default_policy_path_with_home_dir(home.as_deref(), Path::new(SYSTEM_DEFAULT_POLICY_PATH))
    }

    fn default_policy_path_with_home_dir(
        &self,
        home_dir: Option<&Path>,
        system_policy_path: &Path,
    ) -> Result<PathBuf> {
        if let Some(path) = &self.signature_policy_path {
            return Ok(path.clone());
        }

        let mut candidates = Vec::new();
        if let Some(home) = home_dir {
            let user_policy_path = home.join(USER_POLICY_FILE);
            if user_policy_path.exists() {
                debug!("Using user policy file {user_policy_path:?}");
                return Ok(user_policy_path);
            }
            candidates.push(user_policy_path);
        }

        if let Some(root) = &self.root_for_implicit_absolute_paths {
            let relative = system_policy_path
                .strip_prefix("/")
                .unwrap_or(system_policy_path);
            return Ok(root.join(relative));
        }

        if system_policy_path.exists() {
            return Ok(system_policy_path.to_path_buf());
        }
        candidates.push(system_policy_path.to_path_buf());

        Err(Error::NoPolicyFile { candidates })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "signature_policy_path = \"/tmp/policy.json\"").unwrap();

        let config = PolicyConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config,
            PolicyConfig {
                signature_policy_path: Some(PathBuf::from("/tmp/policy.json")),
                root_for_implicit_absolute_paths: None,
            }
        );
    }

    #[test]
    fn test_config_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "signature_policy_path = [").unwrap();
        assert!(matches!(
            PolicyConfig::from_file(file.path()),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            PolicyConfig::from_file("/nonexistent/config.toml"),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_default_policy_path() {
        let home = tempfile::tempdir().unwrap();
        let system = tempfile::tempdir().unwrap();
        let system_policy = system.path().join("policy.json");

        // Explicit path wins, even if it does not exist.
        let config = PolicyConfig {
            signature_policy_path: Some("/this/does/not/exist".into()),
            ..Default::default()
        };
        assert_eq!(
            config
                .default_policy_path_with_home_dir(Some(home.path()), &system_policy)
                .unwrap(),
            PathBuf::from("/this/does/not/exist")
        );

        // Nothing exists.
        let config = PolicyConfig::default();
        let err = config
            .default_policy_path_with_home_dir(Some(home.path()), &system_policy)
            .unwrap_err();
        assert!(matches!(err, Error::NoPolicyFile { ref candidates } if candidates.len() == 2));

        // Root prefix applies to the system path without checking it.
        let config = PolicyConfig {
            root_for_implicit_absolute_paths: Some("/mnt/root".into()),
            ..Default::default()
        };
        assert_eq!(
            config
                .default_policy_path_with_home_dir(
                    Some(home.path()),
                    Path::new(SYSTEM_DEFAULT_POLICY_PATH)
                )
                .unwrap(),
            PathBuf::from("/mnt/root/etc/containers/policy.json")
        );

        // System path exists.
        fs::write(&system_policy, "{}").unwrap();
        let config = PolicyConfig::default();
        assert_eq!(
            config
                .default_policy_path_with_home_dir(Some(home.path()), &system_policy)
                .unwrap(),
            system_policy
        );

        // User path exists and takes precedence over everything but the explicit path.
        let user_policy = home.path().join(USER_POLICY_FILE);
        fs::create_dir_all(user_policy.parent().unwrap()).unwrap();
        fs::write(&user_policy, "{}").unwrap();
        let config = PolicyConfig {
            root_for_implicit_absolute_paths: Some("/mnt/root".into()),
            ..Default::default()
        };
        assert_eq!(
            config
                .default_policy_path_with_home_dir(Some(home.path()), &system_policy)
                .unwrap(),
            user_policy
        );
    }

    #[test]
    #[serial]
    fn test_default_policy_path_uses_home() {
        let home = tempfile::tempdir().unwrap();
        let user_policy = home.path().join(USER_POLICY_FILE);
        fs::create_dir_all(user_policy.parent().unwrap()).unwrap();
        fs::write(&user_policy, "{}").unwrap();

        let old_home = std::env::var_os("HOME");
        std::env::set_var("HOME", home.path());
        let res = PolicyConfig::default().default_policy_path();
        match old_home {
            Some(h) => std::env::set_var("HOME", h),
            None => std::env::remove_var("HOME"),
        }

        assert_eq!(res.unwrap(), user_policy);
    }
}
