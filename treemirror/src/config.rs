use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern, PatternError};
use serde::{Deserialize, Serialize};

use crate::mirror::LeafPolicy;

#[derive(Debug, Clone, Default)]
pub struct PatternList(Vec<Pattern>, MatchOptions);

impl PatternList {
    pub fn new<I>(patterns: I, opts: MatchOptions) -> Result<PatternList, PatternError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let patterns: Result<Vec<_>, _> = patterns
            .into_iter()
            .map(|p| Pattern::new(p.as_ref()))
            .collect();
        Ok(PatternList(patterns?, opts))
    }

    /// Checks `path` and each of its file names against the patterns,
    /// so that `*.tmp` also matches `docs/draft.tmp`.
    pub fn matches_with<P: AsRef<Utf8Path>>(&self, path: P) -> bool {
        let path = path.as_ref();
        self.0.iter().any(|p| {
            p.matches_with(path.as_str(), self.1)
                || path
                    .file_name()
                    .map(|name| p.matches_with(name, self.1))
                    .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Name of the Cloud Storage bucket
    pub name: String,
    /// Key prefix under which the staging directory is mirrored
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_staging_dir")]
    pub staging_dir: Utf8PathBuf,
    #[serde(default = "default_remote_root")]
    pub remote_root: String,
    /// Path to the `client_secret.json` of the Google application
    #[serde(default = "default_client_secret")]
    pub client_secret: Utf8PathBuf,
    #[serde(default)]
    pub bucket: Option<BucketConfig>,
    #[serde(default)]
    pub leaf_policy: LeafPolicy,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
}

fn default_staging_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("tmp")
}

fn default_client_secret() -> Utf8PathBuf {
    Utf8PathBuf::from("client_secret.json")
}

fn default_remote_root() -> String {
    "/app_data".to_string()
}

fn default_case_sensitive() -> bool {
    true
}

impl Default for Config {
    /// The configuration used when no config file exists
    fn default() -> Self {
        Config {
            staging_dir: default_staging_dir(),
            remote_root: default_remote_root(),
            client_secret: default_client_secret(),
            bucket: None,
            leaf_policy: LeafPolicy::default(),
            ignore: Vec::new(),
            case_sensitive: default_case_sensitive(),
        }
    }
}

impl Config {
    pub async fn load_from_file(path: &Utf8Path) -> anyhow::Result<Self> {
        let config_json = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read config from {path}"))?;
        let config_json = std::str::from_utf8(&config_json)?;
        let config: Config = serde_json::from_str(config_json)
            .with_context(|| format!("Failed to parse config from {path}"))?;
        config.remote_root_components()?;
        Ok(config)
    }

    /// Makes relative paths of the config relative to `base`.
    pub fn resolve_paths(&mut self, base: &Utf8Path) {
        if self.staging_dir.is_relative() {
            self.staging_dir = base.join(&self.staging_dir);
        }
        if self.client_secret.is_relative() {
            self.client_secret = base.join(&self.client_secret);
        }
    }

    /// The folder names leading to the remote root, from the top of the drive.
    pub fn remote_root_components(&self) -> crate::Result<Vec<&str>> {
        let Some(rel) = self.remote_root.strip_prefix('/') else {
            return Err(crate::Error::Config(format!(
                "remote_root must be absolute, got '{}'",
                self.remote_root
            )));
        };
        let mut comps = Vec::new();
        for comp in rel.split('/').filter(|c| !c.is_empty()) {
            if comp == "." || comp == ".." {
                return Err(crate::Error::Config(format!(
                    "remote_root can't contain '{comp}': '{}'",
                    self.remote_root
                )));
            }
            comps.push(comp);
        }
        Ok(comps)
    }

    pub fn ignore_patterns(&self) -> crate::Result<PatternList> {
        let opts = MatchOptions {
            case_sensitive: self.case_sensitive,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        PatternList::new(self.ignore.iter(), opts)
            .map_err(|err| crate::Error::Config(format!("Invalid ignore pattern: {err}")))
    }
}
