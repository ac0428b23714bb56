use std::convert::TryInto;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use steering_proxy::proxy::http::config::Config;
use steering_proxy::raw_config::RawConfig;
use structopt::StructOpt;
use tokio::fs::read_to_string;
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, StructOpt)]
#[structopt(name = "steering", about = "API gateway steering requests by path rules.")]
pub struct Opt {
    /// path of config file, json or yaml
    #[structopt(name = "FILE", parse(from_os_str))]
    pub input: PathBuf,

    /// Validate the config file and exit.
    #[structopt(long)]
    pub check: bool,

    // The number of occurrences of the `v/verbose` flag
    /// Verbose mode (-v, -vv, -vvv, etc.)
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,
}

impl Opt {
    pub fn get_level_filter(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::ERROR,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    pub fn from_args_checked() -> Result<Self> {
        Ok(Self::from_args_safe()?)
    }
}

pub async fn get_config_from_opt(opt: &Opt) -> Result<Config> {
    get_config_from_path(&opt.input).await
}

pub async fn get_config_from_path(path_buf: &Path) -> Result<Config> {
    debug!("reading config from {}", path_buf.display());
    let buffer = read_to_string(path_buf).await?;
    let raw: RawConfig = match path_buf.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&buffer)?,
        Some("yaml") | Some("yml") => serde_yaml::from_str(&buffer)?,
        _ => return Err(anyhow!("invalid file extension")),
    };
    raw.try_into()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use steering_proxy::proxy::http::config::RuleStoreConfig;
    use tracing_subscriber::filter::LevelFilter;

    use super::{get_config_from_path, Opt};

    fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_config_from_yaml() {
        let file = config_file(
            ".yaml",
            r#"
listen_port: 8080
rule_store: { type: File, value: ./db.json }
upstream: "http://127.0.0.1:5000"
"#,
        );
        let config = get_config_from_path(file.path()).await.unwrap();
        assert_eq!(config.listen_port, 8080);
        assert_eq!(
            config.http_config.rule_store,
            RuleStoreConfig::File("./db.json".into())
        );
    }

    #[tokio::test]
    async fn test_config_unknown_field() {
        let file = config_file(
            ".json",
            r#"{
                "listen_port": 8080,
                "rule_store": { "type": "File", "value": "./db.json" },
                "upstream": "http://127.0.0.1:5000",
                "upstream_timout": "1s"
            }"#,
        );
        assert!(get_config_from_path(file.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_config_extension() {
        let file = config_file(".toml", "listen_port = 8080");
        assert!(get_config_from_path(file.path()).await.is_err());
    }

    #[test]
    fn test_level_filter() {
        let mut opt = Opt {
            input: "config.yaml".into(),
            check: false,
            verbose: 0,
        };
        assert_eq!(opt.get_level_filter(), LevelFilter::ERROR);
        opt.verbose = 2;
        assert_eq!(opt.get_level_filter(), LevelFilter::DEBUG);
        opt.verbose = 7;
        assert_eq!(opt.get_level_filter(), LevelFilter::TRACE);
    }
}
