//! Project configuration, read from `kiln.toml`.
//!
//! Every field has a default matching the conventional layout:
//!
//! ```toml
//! root = "."
//!
//! [sources]
//! custom_styles = "src/scss/custom/style.scss"
//! custom_scripts = "src/js/custom/*.js"
//!
//! [transform]
//! minifier = ["esbuild", "--minify", "--loader=js"]
//!
//! [watch]
//! debounce_ms = 200
//! poll_interval_ms = 1000
//!
//! [server]
//! port = 3000
//! ```

use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// File looked up in the project root when no path is given.
pub const CONFIG_FILE: &str = "kiln.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Project root; relative paths are resolved against the directory the
    /// config file lives in.
    pub root: Utf8PathBuf,
    pub sources: Sources,
    pub output: Output,
    pub transform: Transform,
    pub watch: Watch,
    pub server: Server,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            sources: Sources::default(),
            output: Output::default(),
            transform: Transform::default(),
            watch: Watch::default(),
            server: Server::default(),
        }
    }
}

/// Input patterns, relative to the root.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Sources {
    pub vendor_styles: String,
    pub custom_styles: String,
    pub vendor_styles_watch: String,
    pub custom_styles_watch: String,
    pub vendor_scripts: String,
    pub custom_scripts: String,
    /// Pages whose changes only reload the browser.
    pub markup: String,
}

impl Default for Sources {
    fn default() -> Self {
        Self {
            vendor_styles: "src/scss/vendor/vendor.scss".into(),
            custom_styles: "src/scss/custom/style.scss".into(),
            vendor_styles_watch: "src/scss/vendor/**/*.scss".into(),
            custom_styles_watch: "src/scss/custom/**/*.scss".into(),
            vendor_scripts: "src/js/vendor/*.js".into(),
            custom_scripts: "src/js/custom/*.js".into(),
            markup: "*.html".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Output {
    pub css: Utf8PathBuf,
    pub js: Utf8PathBuf,
    pub vendor_styles: String,
    pub custom_styles: String,
    pub vendor_scripts: String,
    pub custom_scripts: String,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            css: "assets/css".into(),
            js: "assets/js".into(),
            vendor_styles: "vendor.css".into(),
            custom_styles: "style.css".into(),
            vendor_scripts: "vendor.js".into(),
            custom_scripts: "script.js".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Transform {
    /// Write a source map next to unminified script bundles.
    pub sourcemaps: bool,
    /// Command the compiled CSS is piped through, e.g. autoprefixer.
    pub prefixer: Vec<String>,
    /// Command the concatenated scripts are piped through.
    pub minifier: Vec<String>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            sourcemaps: true,
            prefixer: Vec::new(),
            minifier: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Watch {
    pub debounce_ms: u64,
    /// Poll instead of relying on native notifications.
    pub poll_interval_ms: Option<u64>,
}

impl Default for Watch {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            poll_interval_ms: None,
        }
    }
}

impl Watch {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Server {
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

impl Config {
    pub fn parse(text: &str, path: &Utf8Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads `path` when given (it must exist), otherwise `kiln.toml` in
    /// `dir` if present, otherwise the defaults. A relative `root` is made
    /// relative to the directory holding the file.
    pub fn load(dir: &Utf8Path, path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let path = dir.join(CONFIG_FILE);
                if !path.is_file() {
                    tracing::debug!("no {CONFIG_FILE} in {dir}, using defaults");
                    let mut config = Config::default();
                    config.root = dir.join(&config.root);
                    return Ok(config);
                }
                path
            }
        };

        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        let mut config = Config::parse(&text, &path)?;
        if config.root.is_relative() {
            let base = path.parent().unwrap_or(dir);
            config.root = base.join(&config.root);
        }

        tracing::info!("loaded config from {path}");
        Ok(config)
    }
}
