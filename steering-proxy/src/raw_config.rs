use std::convert::{TryFrom, TryInto};
use std::path::PathBuf;
use std::time::Duration;
use std::{fs, io};

use anyhow::{anyhow, Error};
use http::header::HeaderName;
use http::Uri;
use rustls::{Certificate, OwnedTrustAnchor, PrivateKey};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use serde::{Deserialize, Serialize};

use crate::proxy::http::config::{Config, HTTPConfig, RuleStoreConfig, TLSConfig};

pub const DEFAULT_ROLE_CLAIM_HEADER: &str = "x-jwt-claim-roles";

#[derive(Debug, Eq, PartialEq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)] // To prevent typos.
pub struct RawConfig {
    pub listen_port: u16,
    pub rule_store: RawRuleStore,
    /// Base URL relative rule targets are joined to.
    pub upstream: String,
    /// Request header carrying the verified role claim.
    pub role_claim_header: Option<String>,
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Option<Duration>,
    pub tls: Option<TLSRawConfig>,
}

#[derive(Debug, Eq, PartialEq, Clone, Deserialize, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum RawRuleStore {
    /// Base URL of the rule service; the request path is appended to it.
    Http(String),
    /// Rule database, a JSON or YAML list of rules each carrying its `uri`.
    File(PathBuf),
}

#[derive(Debug, Eq, PartialEq, Clone, Deserialize, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum RawFile {
    Path(PathBuf),
    Contents(Vec<u8>),
}

/// TLSRawConfig enables HTTPS on the listener when `cert_file` and `key_file` are set, and adds
/// `ca_file` to the roots trusted for upstream connections.
#[derive(Debug, Eq, PartialEq, Clone, Deserialize, Serialize, Default)]
pub struct TLSRawConfig {
    pub ca_file: Option<RawFile>,
    pub cert_file: Option<RawFile>,
    pub key_file: Option<RawFile>,
}

impl Default for RawFile {
    fn default() -> Self {
        RawFile::Contents(Default::default())
    }
}

impl TryFrom<RawFile> for Vec<u8> {
    type Error = Error;

    fn try_from(value: RawFile) -> Result<Self, Self::Error> {
        match value {
            RawFile::Contents(c) => Ok(c),
            RawFile::Path(p) => Ok(fs::read(p)?),
        }
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = Error;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let upstream: Uri = raw
            .upstream
            .parse()
            .map_err(|e| anyhow!("invalid upstream `{}`: {}", raw.upstream, e))?;
        if upstream.scheme().is_none() || upstream.authority().is_none() {
            return Err(anyhow!(
                "upstream `{}` must be an absolute http(s) url",
                raw.upstream
            ));
        }

        let role_claim_header = raw
            .role_claim_header
            .as_deref()
            .unwrap_or(DEFAULT_ROLE_CLAIM_HEADER)
            .parse::<HeaderName>()?;

        Ok(Self {
            listen_port: raw.listen_port,
            http_config: HTTPConfig {
                rule_store: raw.rule_store.try_into()?,
                upstream: raw.upstream,
                role_claim_header,
                upstream_timeout: raw.upstream_timeout,
            },
            tls_config: raw.tls.unwrap_or_default().try_into()?,
        })
    }
}

impl TryFrom<RawRuleStore> for RuleStoreConfig {
    type Error = Error;

    fn try_from(raw: RawRuleStore) -> Result<Self, Self::Error> {
        match raw {
            RawRuleStore::Http(base) => {
                let uri: Uri = base
                    .parse()
                    .map_err(|e| anyhow!("invalid rule store `{}`: {}", base, e))?;
                if uri.scheme().is_none() || uri.authority().is_none() {
                    return Err(anyhow!(
                        "rule store `{}` must be an absolute http(s) url",
                        base
                    ));
                }
                Ok(RuleStoreConfig::Http(base.trim_end_matches('/').to_string()))
            }
            RawRuleStore::File(path) => Ok(RuleStoreConfig::File(path)),
        }
    }
}

impl TryFrom<TLSRawConfig> for TLSConfig {
    type Error = Error;

    fn try_from(raw: TLSRawConfig) -> Result<Self, Self::Error> {
        let mut root_cert_store = rustls::RootCertStore::empty();
        root_cert_store.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(
            |ta| {
                OwnedTrustAnchor::from_subject_spki_name_constraints(
                    ta.subject,
                    ta.spki,
                    ta.name_constraints,
                )
            },
        ));
        if let Some(cafile) = raw.ca_file {
            let certs = certs(&mut &*Vec::<u8>::try_from(cafile)?)?;
            let (_, ignored) = root_cert_store.add_parsable_certificates(&certs);
            if ignored > 0 {
                tracing::warn!("{} certificates in ca file ignored", ignored);
            }
        }

        let tls_server_config = match (raw.cert_file, raw.key_file) {
            (None, None) => None,
            (Some(cert_file), Some(key_file)) => {
                Some(server_config(cert_file, key_file)?)
            }
            _ => return Err(anyhow!("tls cert_file and key_file must be set together")),
        };

        Ok(Self {
            tls_client_config: rustls::ClientConfig::builder()
                .with_safe_defaults()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth(),
            tls_server_config,
        })
    }
}

fn server_config(cert_file: RawFile, key_file: RawFile) -> anyhow::Result<rustls::ServerConfig> {
    let certs: Vec<Certificate> = certs(&mut &*Vec::<u8>::try_from(cert_file)?)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid cert"))
        .map(|mut certs| certs.drain(..).map(Certificate).collect())?;
    if certs.is_empty() {
        return Err(anyhow!("empty cert"));
    }

    let key_data = Vec::<u8>::try_from(key_file)?;
    let mut keys = pkcs8_private_keys(&mut &*key_data)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid key"))?;
    if keys.is_empty() {
        keys = rsa_private_keys(&mut &*key_data)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid key"))?;
    }
    let key = match keys.into_iter().next() {
        Some(key) => PrivateKey(key),
        None => return Err(anyhow!("empty key")),
    };

    Ok(rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?)
}
