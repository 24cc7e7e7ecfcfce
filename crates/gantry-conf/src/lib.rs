mod filters;

use std::collections::BTreeMap;
use std::path::Path;

use config::Config;
use config::ConfigError as ExternalConfigError;
use config::File;
use config::FileFormat;
use directories::ProjectDirs;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use crate::filters::DirectoryFilters;

/// Environment variable naming an explicit multi-module manifest.
pub const GOWORK: &str = "GOWORK";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration build/deserialize error")]
    Config(#[from] ExternalConfigError),
    #[error("invalid directory filter {0:?}: must start with '+' or '-' and name a path")]
    InvalidFilter(String),
    #[error("Failed to serialize options")]
    Serialize(#[from] toml::ser::Error),
}

/// Whether manifests decide the package layout.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleMode {
    #[default]
    Auto,
    On,
    /// Legacy mode: at most the folder's own `go.mod` is active.
    Off,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Options {
    pub module_mode: ModuleMode,
    /// Treat every module under the folder as one workspace, joined by a
    /// synthetic module descriptor.
    pub experimental_workspace_module: bool,
    /// Root the view at the directory of the discovered manifest rather than
    /// the folder itself.
    pub expand_workspace_to_module: bool,
    pub directory_filters: Vec<String>,
    /// Extra environment for the external toolchain.
    pub env: BTreeMap<String, String>,
    /// Upper bound on files visited by a workspace module scan.
    pub scan_file_limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            module_mode: ModuleMode::Auto,
            experimental_workspace_module: false,
            expand_workspace_to_module: true,
            directory_filters: Vec::new(),
            env: BTreeMap::new(),
            scan_file_limit: 1_000_000,
        }
    }
}

impl Options {
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let user_config_file = ProjectDirs::from("dev", "gantry", "gantry")
            .map(|proj_dirs| proj_dirs.config_dir().join("gantry.toml"));

        Self::load_from_paths(project_root, user_config_file.as_deref())
    }

    fn load_from_paths(
        project_root: &Path,
        user_config_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = user_config_path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        builder = builder.add_source(
            File::from(project_root.join(".gantry.toml"))
                .format(FileFormat::Toml)
                .required(false),
        );

        builder = builder.add_source(
            File::from(project_root.join("gantry.toml"))
                .format(FileFormat::Toml)
                .required(false),
        );

        let config = builder.build()?;
        let options: Options = config.try_deserialize()?;
        options.filters()?;
        tracing::debug!(root = %project_root.display(), ?options, "loaded options");
        Ok(options)
    }

    /// The compiled form of `directory_filters`.
    pub fn filters(&self) -> Result<DirectoryFilters, ConfigError> {
        DirectoryFilters::parse(&self.directory_filters)
    }

    /// The explicit multi-module manifest, if one is configured.
    ///
    /// `env` takes precedence over the process environment; `off` or an
    /// empty value disables the lookup. Keys in `env` match case-insensitively.
    #[must_use]
    pub fn gowork(&self) -> Option<String> {
        let configured = self
            .env
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(GOWORK))
            .map(|(_, value)| value.clone());
        let value = match configured {
            Some(value) => value,
            None => std::env::var(GOWORK).ok()?,
        };
        match value.as_str() {
            "" | "off" => None,
            _ => Some(value),
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    mod defaults {
        use super::*;

        #[test]
        fn test_load_no_files() {
            let dir = tempdir().unwrap();
            let options = Options::load_from_paths(dir.path(), None).unwrap();
            assert_eq!(options, Options::default());
            assert!(options.expand_workspace_to_module);
            assert_eq!(options.scan_file_limit, 1_000_000);
        }
    }

    mod project_files {
        use super::*;

        #[test]
        fn test_load_gantry_toml_only() {
            let dir = tempdir().unwrap();
            fs::write(
                dir.path().join("gantry.toml"),
                "module_mode = \"off\"\ndirectory_filters = [\"-vendor\"]\n",
            )
            .unwrap();
            let options = Options::load_from_paths(dir.path(), None).unwrap();
            assert_eq!(options.module_mode, ModuleMode::Off);
            assert_eq!(options.directory_filters, vec!["-vendor".to_string()]);
        }

        #[test]
        fn test_load_dot_gantry_toml_only() {
            let dir = tempdir().unwrap();
            fs::write(
                dir.path().join(".gantry.toml"),
                "experimental_workspace_module = true",
            )
            .unwrap();
            let options = Options::load_from_paths(dir.path(), None).unwrap();
            assert!(options.experimental_workspace_module);
        }

        #[test]
        fn test_load_env_table() {
            let dir = tempdir().unwrap();
            fs::write(
                dir.path().join("gantry.toml"),
                "[env]\nGOWORK = \"/elsewhere/go.work\"\n",
            )
            .unwrap();
            let options = Options::load_from_paths(dir.path(), None).unwrap();
            assert_eq!(options.gowork().as_deref(), Some("/elsewhere/go.work"));
        }
    }

    mod priority {
        use super::*;

        #[test]
        fn test_gantry_overrides_dot_gantry() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join(".gantry.toml"), "scan_file_limit = 10").unwrap();
            fs::write(dir.path().join("gantry.toml"), "scan_file_limit = 20").unwrap();
            let options = Options::load_from_paths(dir.path(), None).unwrap();
            assert_eq!(options.scan_file_limit, 20);
        }

        #[test]
        fn test_project_overrides_user() {
            let user_dir = tempdir().unwrap();
            let project_dir = tempdir().unwrap();
            let user_conf_path = user_dir.path().join("gantry.toml");
            fs::write(&user_conf_path, "module_mode = \"on\"\nscan_file_limit = 5").unwrap();
            fs::write(project_dir.path().join(".gantry.toml"), "module_mode = \"off\"").unwrap();

            let options =
                Options::load_from_paths(project_dir.path(), Some(&user_conf_path)).unwrap();
            assert_eq!(options.module_mode, ModuleMode::Off);
            // untouched keys still come from the user file
            assert_eq!(options.scan_file_limit, 5);
        }
    }

    mod user_config {
        use super::*;

        #[test]
        fn test_missing_user_config_is_ignored() {
            let user_dir = tempdir().unwrap();
            let project_dir = tempdir().unwrap();
            let user_conf_path = user_dir.path().join("gantry.toml");

            let options =
                Options::load_from_paths(project_dir.path(), Some(&user_conf_path)).unwrap();
            assert_eq!(options, Options::default());
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn test_invalid_toml_content() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join("gantry.toml"), "scan_file_limit = \"lots\"").unwrap();
            let result = Options::load_from_paths(dir.path(), None);
            assert!(matches!(result.unwrap_err(), ConfigError::Config(_)));
        }

        #[test]
        fn test_invalid_directory_filter() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join("gantry.toml"), "directory_filters = [\"vendor\"]").unwrap();
            let result = Options::load_from_paths(dir.path(), None);
            assert!(matches!(result.unwrap_err(), ConfigError::InvalidFilter(_)));
        }
    }

    #[test]
    fn gowork_off_disables_lookup() {
        let mut options = Options::default();
        options.env.insert(GOWORK.to_string(), "off".to_string());
        assert_eq!(options.gowork(), None);
    }

    #[test]
    fn options_serialize_to_toml() {
        let toml = Options::default().to_toml().unwrap();
        assert!(toml.contains("module_mode = \"auto\""));
        assert!(toml.contains("expand_workspace_to_module = true"));
    }
}
