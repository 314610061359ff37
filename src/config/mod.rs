//! Runner settings: built-in defaults, then `.cambrc`, then `CAMB_*` environment variables.

use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    time::Duration,
};

use directories::BaseDirs;

use crate::{error::Result, execution::Protocol};

#[derive(Debug, Clone)]
pub struct Settings {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Settings {
    pub fn load() -> Self {
        Self::load_from(&default_config_path(), env::vars())
    }

    /// Settings from an explicit rc file and environment snapshot.
    pub fn load_from(config_path: &Path, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut map = default_map();

        // Read .cambrc if exists
        if config_path.exists() {
            if let Ok(file) = fs::File::open(config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(|l| l.ok()) {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((k, v)) = line.split_once('=') {
                        map.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }

        // Overlay environment variables (take precedence)
        for (k, v) in vars {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self {
            inner: map,
            config_path: config_path.to_path_buf(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).filter(|v| !v.is_empty()).cloned()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn executable(&self) -> Option<PathBuf> {
        self.get_path("CAMB_EXECUTABLE")
    }

    pub fn defaults_path(&self) -> Option<PathBuf> {
        self.get_path("CAMB_DEFAULTS")
    }

    pub fn scratch_dir(&self) -> Option<PathBuf> {
        self.get_path("CAMB_SCRATCH_DIR")
    }

    pub fn protocol(&self) -> Result<Protocol> {
        self.get("CAMB_PROTOCOL")
            .map(|p| p.parse())
            .unwrap_or(Ok(Protocol::Disk))
    }

    /// `0` or unset disables the timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.get_u64("CAMB_TIMEOUT")
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "CAMB_EXECUTABLE",
        "CAMB_PROTOCOL",
        "CAMB_DEFAULTS",
        "CAMB_SCRATCH_DIR",
        "CAMB_TIMEOUT",
    ];

    KEYS.contains(&k)
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("camb4rs").join(".cambrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("CAMB_PROTOCOL".into(), "disk".into());
    m.insert(
        "CAMB_SCRATCH_DIR".into(),
        env::temp_dir().to_string_lossy().into_owned(),
    );
    m.insert("CAMB_TIMEOUT".into(), "0".into());
    m
}
