//! System configuration sourced from the environment.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tracing::warn;

/// System-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// GitHub login of the bot; comments must mention `@<bot_name>`.
    pub bot_name: String,
    /// Post feedback to GitHub. When false, messages are only recorded.
    pub postback: bool,
    /// Token the bot posts comments with.
    pub github_token: Option<String>,
    /// Web host commit URLs start with.
    pub github_host: String,
    /// REST API root.
    pub github_api: String,
    /// Shared secret for `X-Hub-Signature-256` verification.
    pub webhook_secret: Option<String>,
    /// Maximum number of concurrently executing grading containers.
    pub max_jobs: usize,
    /// Where the rendezvous listener binds.
    pub rendezvous_bind: SocketAddr,
    /// Host containers dial to reach the rendezvous listener.
    pub rendezvous_host: String,
    /// Docker network grading containers are attached to.
    pub docker_network: String,
    /// Static addresses handed out to grading containers.
    pub container_addresses: Vec<IpAddr>,
    /// Path to the course file.
    pub course_file: PathBuf,
    /// Where the webhook server listens.
    pub listen: SocketAddr,
    /// PostgreSQL connection string; records are kept in memory when absent.
    pub database_url: Option<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            bot_name: "autobot".to_string(),
            postback: false,
            github_token: None,
            github_host: "https://github.com".to_string(),
            github_api: "https://api.github.com".to_string(),
            webhook_secret: None,
            max_jobs: 2,
            rendezvous_bind: SocketAddr::from(([0, 0, 0, 0], 11333)),
            rendezvous_host: "172.28.0.1".to_string(),
            docker_network: "autotest".to_string(),
            container_addresses: (10..=20)
                .map(|last| IpAddr::V4(Ipv4Addr::new(172, 28, 0, last)))
                .collect(),
            course_file: PathBuf::from("course.kdl"),
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_url: None,
        }
    }
}

impl SystemConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, falling back to
    /// defaults for absent keys.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let postback = match get("AUTOTEST_POSTBACK") {
            Some(v) => parse_bool("AUTOTEST_POSTBACK", &v)?,
            None => defaults.postback,
        };

        let github_token = get("GITHUB_BOT_TOKEN");
        if postback && github_token.is_none() {
            warn!("AUTOTEST_POSTBACK is enabled but GITHUB_BOT_TOKEN is not set");
        }

        let max_jobs = match get("AUTOTEST_MAX_JOBS") {
            Some(v) => parse_value::<usize>("AUTOTEST_MAX_JOBS", &v)?,
            None => defaults.max_jobs,
        };
        if max_jobs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "AUTOTEST_MAX_JOBS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let container_addresses = match get("AUTOTEST_CONTAINER_ADDRESSES") {
            Some(v) => parse_address_pool(&v)?,
            None => defaults.container_addresses,
        };

        Ok(Self {
            bot_name: get("AUTOTEST_BOT_NAME").unwrap_or(defaults.bot_name),
            postback,
            github_token,
            github_host: get("GITHUB_HOST")
                .map(|h| h.trim_end_matches('/').to_string())
                .unwrap_or(defaults.github_host),
            github_api: get("GITHUB_API_URL")
                .map(|h| h.trim_end_matches('/').to_string())
                .unwrap_or(defaults.github_api),
            webhook_secret: get("GITHUB_WEBHOOK_SECRET"),
            max_jobs,
            rendezvous_bind: match get("AUTOTEST_RENDEZVOUS_BIND") {
                Some(v) => parse_value("AUTOTEST_RENDEZVOUS_BIND", &v)?,
                None => defaults.rendezvous_bind,
            },
            rendezvous_host: get("AUTOTEST_RENDEZVOUS_HOST").unwrap_or(defaults.rendezvous_host),
            docker_network: get("AUTOTEST_DOCKER_NETWORK").unwrap_or(defaults.docker_network),
            container_addresses,
            course_file: get("AUTOTEST_COURSE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.course_file),
            listen: match get("AUTOTEST_LISTEN") {
                Some(v) => parse_value("AUTOTEST_LISTEN", &v)?,
                None => defaults.listen,
            },
            database_url: get("DATABASE_URL"),
        })
    }
}

fn parse_bool(field: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

fn parse_value<T>(field: &str, value: &str) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            field: field.to_string(),
            message: e.to_string(),
        })
}

/// Parse a container address pool.
///
/// Accepts a comma separated list of addresses and IPv4 last-octet ranges,
/// e.g. `172.28.0.10-20,172.28.1.5`.
pub fn parse_address_pool(value: &str) -> ConfigResult<Vec<IpAddr>> {
    const FIELD: &str = "AUTOTEST_CONTAINER_ADDRESSES";

    let mut pool = Vec::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.split_once('-') {
            Some((start, end)) => {
                let start: Ipv4Addr = parse_value(FIELD, start)?;
                let end: u8 = parse_value(FIELD, end)?;
                let [a, b, c, first] = start.octets();
                if end < first {
                    return Err(ConfigError::InvalidValue {
                        field: FIELD.to_string(),
                        message: format!("range '{}' ends before it starts", item),
                    });
                }
                pool.extend((first..=end).map(|d| IpAddr::V4(Ipv4Addr::new(a, b, c, d))));
            }
            None => pool.push(parse_value(FIELD, item)?),
        }
    }

    pool.dedup();
    if pool.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: FIELD.to_string(),
            message: "at least one address is required".to_string(),
        });
    }
    Ok(pool)
}
