use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use reaper::ReaperConfig;
use serde::{Deserialize, Serialize};

pub(crate) fn try_load_config(
    config_path: impl AsRef<Path>,
) -> Result<Config, Box<dyn std::error::Error>> {
    let buf = std::fs::read_to_string(config_path.as_ref())?;
    let config = toml::from_str(buf.as_str())?;
    log::info!("load config from {:?}", config_path.as_ref());
    Ok(config)
}

fn load_config() -> Config {
    let path = PathBuf::from(std::env::var("CONFIG_PATH").unwrap_or("config.toml".to_string()));
    match try_load_config(&path) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("Fail to load config from {:?}, use default: {}", path, err);
            Config::default()
        }
    }
    .check()
}

lazy_static::lazy_static! {
    pub static ref CONFIG: Config = load_config();
}

fn default_log() -> u8 {
    2
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_log")]
    pub log_level: u8,
    #[serde(default)]
    pub reaper: ReaperConfig,
    /// default timeout of a command, in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl Config {
    pub fn check(mut self) -> Self {
        if self.reaper.subreaper && !cfg!(target_os = "linux") {
            self.reaper.subreaper = false;
            log::warn!("subreaper is only supported on linux, set subreaper=false");
        }
        self
    }
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log(),
            reaper: Default::default(),
            timeout: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_full() {
        let file = write_config(
            r#"
log_level = 0
timeout = 3

[reaper]
subreaper = true
"#,
        );
        let config = try_load_config(file.path()).unwrap().check();
        assert_eq!(config.log_level, 0);
        assert_eq!(config.timeout(), Some(Duration::from_secs(3)));
        assert_eq!(config.reaper.subreaper, cfg!(target_os = "linux"));
    }
    #[test]
    fn load_empty() {
        let file = write_config("");
        assert_eq!(try_load_config(file.path()).unwrap(), Config::default());
    }
    #[test]
    fn reject_unknown() {
        let file = write_config("verbose = true\n");
        assert!(try_load_config(file.path()).is_err());
    }
    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(try_load_config(dir.path().join("config.toml")).is_err());
    }
}
