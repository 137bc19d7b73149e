//! Configuration loading and validation for the healthmon daemon.
//!
//! The master file holds daemon settings and points at the host-group
//! files, which use kebab-case keys.

use crate::types::ServerConfig;
use common::LogFormat;
use healthmon::settings::{
    ConfigLoader, DaemonConfig, DaemonSettings, DnsSettings, PublishSettings, SchedulingSettings,
    StorageKind, StorageSettings, ThreadSettings, config_hash,
};
use healthmon::types::{
    DEFAULT_DNS_RESOLUTION_TIMEOUT, DEFAULT_DNS_RETRIES, DEFAULT_DNS_TTL, DnsType, DualStack, Measurement,
};
use healthmon::{CheckType, HostGroup, IpAddress};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Failed to parse host group file {}: {source}", path.display())]
    HostGroupParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Host group {group} references unknown host group {child}")]
    UnknownHostGroup { group: String, child: String },
}

impl From<ConfigError> for common::Error {
    fn from(e: ConfigError) -> Self {
        common::Error::config(e)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingSettings,
    pub threads: ThreadsSection,
    pub checks: ChecksSection,
    pub dns: DnsSection,
    pub storage: StorageSection,
    pub publish: PublishSection,
    pub http: HttpSection,
    pub host_groups: HostGroupSources,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.threads.validate()?;
        self.checks.validate()?;
        self.dns.validate()?;
        self.storage.validate()?;
        self.publish.validate()?;
        self.http.validate()?;
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: LogFormat,
}

/// Worker pool sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_thread_bounds"))]
pub struct ThreadsSection {
    #[validate(range(min = 1, max = 1024))]
    pub min: usize,

    #[validate(range(min = 1, max = 4096))]
    pub max: usize,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_monitor_interval")]
    pub monitor_interval: Duration,

    #[validate(range(min = 1, max = 100))]
    pub stride_percent: u32,

    #[validate(range(min = 1))]
    pub work_per_thread: usize,

    pub recycle: bool,

    pub recycle_after: u64,
}

/// Scheduling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ChecksSection {
    #[validate(range(max = 100))]
    pub late_threshold_percent: u64,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_drain_timeout")]
    pub drain_timeout: Duration,
}

/// Resolver settings. `ttl` and `timeout` are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DnsSection {
    #[validate(range(min = 1000))]
    pub ttl: u64,

    #[validate(range(min = 100))]
    pub timeout: u64,

    #[validate(range(max = 10))]
    pub retries: u32,

    pub server: Option<SocketAddr>,

    /// Addresses for hosts resolved with `dns-type: static`
    #[serde(rename = "static")]
    pub static_hosts: BTreeMap<String, Vec<IpAddr>>,
}

/// Result storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_storage"))]
pub struct StorageSection {
    pub kind: StorageKind,

    pub path: Option<PathBuf>,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_commit_interval")]
    pub commit_interval: Duration,
}

/// Result publishing and notification batching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PublishSection {
    pub enabled: bool,

    pub only_on_change: bool,

    /// Publish only these groups. Empty means every group.
    pub host_groups: BTreeSet<String>,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_batch_delay")]
    pub batch_delay: Duration,

    #[validate(range(min = 1, max = 10000))]
    pub batch_size: usize,

    #[validate(range(min = 10, max = 1000000))]
    pub channel_size: usize,
}

/// HTTP endpoint for /metrics and /status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HttpSection {
    pub enabled: bool,

    #[validate(custom = "validate_listen_addr")]
    pub listen: String,
}

/// Where host-group files are found
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostGroupSources {
    /// Every `*.yaml` file in this directory, in name order
    pub load_directory: Option<PathBuf>,

    /// Additional files, loaded after the directory
    pub files: Vec<PathBuf>,
}

// Default implementations

impl Default for ThreadsSection {
    fn default() -> Self {
        let d = ThreadSettings::default();
        Self {
            min: d.min,
            max: d.max,
            monitor_interval: d.monitor_interval,
            stride_percent: d.stride_percent,
            work_per_thread: d.work_per_thread,
            recycle: d.recycle,
            recycle_after: d.recycle_after,
        }
    }
}

impl Default for ChecksSection {
    fn default() -> Self {
        let d = SchedulingSettings::default();
        Self {
            late_threshold_percent: d.late_threshold_percent,
            drain_timeout: d.drain_timeout,
        }
    }
}

impl Default for DnsSection {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_DNS_TTL,
            timeout: DEFAULT_DNS_RESOLUTION_TIMEOUT,
            retries: DEFAULT_DNS_RETRIES,
            server: None,
            static_hosts: BTreeMap::new(),
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            path: None,
            commit_interval: Duration::from_secs(60),
        }
    }
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            enabled: true,
            only_on_change: false,
            host_groups: BTreeSet::new(),
            batch_delay: Duration::from_millis(100),
            batch_size: 100,
            channel_size: 10_000,
        }
    }
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:9090".to_string(),
        }
    }
}

// Custom validators

fn validate_thread_bounds(threads: &ThreadsSection) -> Result<(), ValidationError> {
    if threads.min > threads.max {
        return Err(ValidationError::new("threads_min_exceeds_max"));
    }
    Ok(())
}

fn validate_monitor_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if !(100..=60_000).contains(&millis) {
        return Err(ValidationError::new("monitor_interval_out_of_range"));
    }
    Ok(())
}

fn validate_drain_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if !(10..=600_000).contains(&millis) {
        return Err(ValidationError::new("drain_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_storage(storage: &StorageSection) -> Result<(), ValidationError> {
    if storage.kind == StorageKind::Json && storage.path.is_none() {
        return Err(ValidationError::new("json_storage_requires_path"));
    }
    Ok(())
}

fn validate_commit_interval(interval: &Duration) -> Result<(), ValidationError> {
    if interval.as_secs() < 1 {
        return Err(ValidationError::new("commit_interval_too_small"));
    }
    Ok(())
}

fn validate_batch_delay(delay: &Duration) -> Result<(), ValidationError> {
    let millis = delay.as_millis();
    if !(1..=10_000).contains(&millis) {
        return Err(ValidationError::new("batch_delay_out_of_range"));
    }
    Ok(())
}

fn validate_listen_addr(listen: &str) -> Result<(), ValidationError> {
    if listen.trim().parse::<SocketAddr>().is_err() {
        return Err(ValidationError::new("listen_addr_invalid"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Parse and validate a master config document
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    /// Find configuration file in standard locations
    pub fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/healthmon/healthmon.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./healthmon.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/healthmon/healthmon.yaml"))
    }

    /// Settings consumed by the scheduling core
    pub fn to_daemon_settings(&self) -> DaemonSettings {
        DaemonSettings {
            threads: ThreadSettings {
                min: self.threads.min,
                max: self.threads.max,
                monitor_interval: self.threads.monitor_interval,
                stride_percent: self.threads.stride_percent,
                work_per_thread: self.threads.work_per_thread,
                recycle: self.threads.recycle,
                recycle_after: self.threads.recycle_after,
            },
            checks: SchedulingSettings {
                late_threshold_percent: self.checks.late_threshold_percent,
                drain_timeout: self.checks.drain_timeout,
            },
            dns: DnsSettings {
                ttl: self.dns.ttl,
                timeout: self.dns.timeout,
                retries: self.dns.retries,
                server: self.dns.server,
                static_hosts: self
                    .dns
                    .static_hosts
                    .iter()
                    .map(|(host, addrs)| (host.clone(), addrs.iter().copied().map(IpAddress::from).collect()))
                    .collect(),
            },
            storage: StorageSettings {
                kind: self.storage.kind,
                path: self.storage.path.clone(),
            },
            publish: PublishSettings {
                enabled: self.publish.enabled,
                only_on_change: self.publish.only_on_change,
                host_groups: self.publish.host_groups.clone(),
            },
        }
    }

    /// Settings for the server tasks
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            batch_delay: self.publish.batch_delay,
            batch_size: self.publish.batch_size,
            channel_size: self.publish.channel_size,
            commit_interval: self.storage.commit_interval,
            http_enabled: self.http.enabled,
            http_listen: self.http.listen.trim().to_string(),
            ..ServerConfig::default()
        }
    }
}

impl HostGroupSources {
    /// Files to load, in order. Relative paths resolve against `base`.
    pub fn files(&self, base: Option<&Path>) -> Result<Vec<PathBuf>, ConfigError> {
        let resolve = |p: &Path| match base {
            Some(base) if p.is_relative() => base.join(p),
            _ => p.to_path_buf(),
        };

        let mut files = Vec::new();
        if let Some(dir) = &self.load_directory {
            let dir = resolve(dir.as_path());
            let mut found: Vec<PathBuf> = fs::read_dir(&dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "yaml"))
                .collect();
            found.sort();
            files.extend(found);
        }
        files.extend(self.files.iter().map(|f| resolve(f.as_path())));
        Ok(files)
    }
}

// Host-group files

/// `on`/`off` switch values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Switch {
    On,
    Off,
}

/// Resolver selection in host-group files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DnsMode {
    None,
    Ares,
    Static,
}

impl From<DnsMode> for DnsType {
    fn from(mode: DnsMode) -> Self {
        match mode {
            DnsMode::None => DnsType::None,
            DnsMode::Ares => DnsType::Lookup,
            DnsMode::Static => DnsType::Static,
        }
    }
}

/// One `host-group` entry. Integer timings are milliseconds. Keys this
/// daemon does not use are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct HostGroupEntry {
    name: String,
    check_type: Option<CheckType>,
    check_port: Option<u16>,
    check_info: Option<String>,
    uri: Option<String>,
    dual_stack_mode: Option<DualStack>,
    #[serde(default)]
    host: Vec<String>,
    #[serde(default)]
    host_group: Vec<String>,
    check_retries: Option<u32>,
    check_retry_delay: Option<u64>,
    timeout: Option<u64>,
    ttl: Option<u64>,
    group_threshold: Option<u32>,
    smoothing_window: Option<u32>,
    flap_threshold: Option<u32>,
    max_flaps: Option<u32>,
    slow_threshold: Option<u32>,
    rt_mode: Option<Measurement>,
    remote_fallback: Option<Switch>,
    local_fallback: Option<Switch>,
    source_address: Option<IpAddr>,
    tos_value: Option<u8>,
    dns_type: Option<DnsMode>,
    passthrough_info: Option<u32>,
}

impl HostGroupEntry {
    fn apply(self, group: &mut HostGroup) {
        match (self.check_type, &self.uri) {
            (Some(check_type), _) => group.check_type = check_type,
            (None, Some(_)) => group.check_type = CheckType::Http,
            (None, None) => {}
        }
        if let Some(info) = self.uri.or(self.check_info) {
            group.check_info = info;
        }
        match self.check_port {
            Some(port) => group.port = port,
            None if group.port == 0 => group.port = group.check_type.default_port(),
            None => {}
        }
        if let Some(mode) = self.dual_stack_mode {
            group.dual_stack = mode;
        }
        group.hosts.extend(self.host);
        for child in self.host_group {
            if !group.child_groups.contains(&child) {
                group.child_groups.push(child);
            }
        }

        if let Some(v) = self.check_retries {
            group.check_retries = v;
        }
        if let Some(v) = self.check_retry_delay {
            group.check_retry_delay = v;
            // check-retry-delay also sets the slow threshold
            group.slow_threshold = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = self.slow_threshold {
            group.slow_threshold = v;
        }
        if let Some(v) = self.timeout {
            group.timeout = v;
        }
        if let Some(v) = self.ttl {
            group.ttl = v;
        }
        if let Some(v) = self.group_threshold {
            group.group_threshold = v;
        }
        if let Some(v) = self.smoothing_window {
            group.smoothing_window = v;
        }
        if let Some(v) = self.flap_threshold {
            group.flap_threshold = v;
        }
        if let Some(v) = self.max_flaps {
            group.max_flaps = v;
        }
        if let Some(v) = self.rt_mode {
            group.measurement = v;
        }

        // Both values of remote-fallback set the flag
        if self.remote_fallback.is_some() {
            group.distributed_fallback.remote = true;
        }
        if let Some(switch) = self.local_fallback {
            group.distributed_fallback.local = switch == Switch::On;
        }

        if let Some(addr) = self.source_address {
            group.source_address = IpAddress::from(addr);
        }
        if let Some(v) = self.tos_value {
            group.tos_value = v;
        }
        if let Some(mode) = self.dns_type {
            group.dns_type = mode.into();
        }
        if let Some(v) = self.passthrough_info {
            group.passthrough_info = v;
        }
    }
}

/// A host-group file is either a bare list or a list under `host-group`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HostGroupFile {
    Keyed {
        #[serde(rename = "host-group")]
        host_group: Vec<HostGroupEntry>,
    },
    List(Vec<HostGroupEntry>),
}

impl HostGroupFile {
    fn into_entries(self) -> Vec<HostGroupEntry> {
        match self {
            HostGroupFile::Keyed { host_group } => host_group,
            HostGroupFile::List(entries) => entries,
        }
    }
}

/// Parse one host-group document into `groups`. An entry naming an existing
/// group updates it.
pub fn parse_host_groups(
    contents: &str,
    path: &Path,
    groups: &mut BTreeMap<String, HostGroup>,
) -> Result<usize, ConfigError> {
    if contents.trim().is_empty() {
        return Ok(0);
    }
    let file: HostGroupFile = serde_yaml::from_str(contents).map_err(|source| ConfigError::HostGroupParse {
        path: path.to_path_buf(),
        source,
    })?;
    let entries = file.into_entries();
    let count = entries.len();
    for entry in entries {
        let group = groups
            .entry(entry.name.clone())
            .or_insert_with(|| HostGroup::new(entry.name.clone()));
        entry.apply(group);
    }
    Ok(count)
}

/// Merge the hosts of every referenced child group into its parents.
pub fn resolve_child_groups(groups: &mut BTreeMap<String, HostGroup>) -> Result<(), ConfigError> {
    let parents: Vec<(String, Vec<String>)> = groups
        .values()
        .filter(|g| !g.child_groups.is_empty())
        .map(|g| (g.name.clone(), g.child_groups.clone()))
        .collect();

    for (parent, children) in parents {
        let mut hosts = BTreeSet::new();
        let mut visited = BTreeSet::from([parent.clone()]);
        let mut pending = children;
        while let Some(child) = pending.pop() {
            if !visited.insert(child.clone()) {
                continue;
            }
            let Some(group) = groups.get(&child) else {
                return Err(ConfigError::UnknownHostGroup { group: parent, child });
            };
            hosts.extend(group.hosts.iter().cloned());
            pending.extend(group.child_groups.iter().cloned());
        }
        if let Some(group) = groups.get_mut(&parent) {
            debug!(group = %parent, merged = hosts.len(), "Merged child group hosts");
            group.hosts.extend(hosts);
        }
    }
    Ok(())
}

/// [`ConfigLoader`] over a master YAML file and its host-group files.
///
/// Every load re-reads all files. Without a path the defaults are used and
/// no host groups are loaded.
pub struct YamlConfigLoader {
    path: Option<PathBuf>,
    master: Mutex<Config>,
}

impl YamlConfigLoader {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            master: Mutex::new(Config::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Master settings from the last successful load
    pub fn master(&self) -> Config {
        self.master.lock().clone()
    }

    /// Read every file and build the core configuration.
    pub fn load_config(&self) -> Result<(Config, DaemonConfig), ConfigError> {
        let mut sources: Vec<Vec<u8>> = Vec::new();
        let master = match &self.path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::FileNotFound(path.clone()));
                }
                let raw = fs::read_to_string(path)?;
                let config = Config::from_yaml(&raw)?;
                sources.push(raw.into_bytes());
                config
            }
            None => Config::default(),
        };

        let base = self.path.as_deref().and_then(Path::parent);
        let mut host_groups = BTreeMap::new();
        for file in master.host_groups.files(base)? {
            if !file.is_file() {
                return Err(ConfigError::FileNotFound(file));
            }
            let raw = fs::read_to_string(&file)?;
            let count = parse_host_groups(&raw, &file, &mut host_groups)?;
            debug!(path = %file.display(), entries = count, "Parsed host group file");
            sources.push(raw.into_bytes());
        }
        resolve_child_groups(&mut host_groups)?;

        let daemon = DaemonConfig {
            settings: master.to_daemon_settings(),
            host_groups,
            hash: config_hash(&sources),
        };
        info!(
            groups = daemon.host_groups.len(),
            files = sources.len(),
            hash = %daemon.hash,
            "Loaded configuration"
        );
        Ok((master, daemon))
    }
}

impl ConfigLoader for YamlConfigLoader {
    fn load(&self) -> common::Result<DaemonConfig> {
        let (master, daemon) = self.load_config()?;
        *self.master.lock() = master;
        Ok(daemon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups_from(yaml: &str) -> Result<BTreeMap<String, HostGroup>, ConfigError> {
        let mut groups = BTreeMap::new();
        parse_host_groups(yaml, Path::new("test.yaml"), &mut groups)?;
        resolve_child_groups(&mut groups)?;
        Ok(groups)
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threads.stride_percent, 10);
        assert_eq!(config.dns.ttl, 360_000);
        assert_eq!(config.checks.drain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_valid_yaml_parsing() {
        let yaml = r#"
logging:
  level: debug
  format: json

threads:
  min: 2
  max: 16
  monitor_interval: 500ms

checks:
  late_threshold_percent: 25
  drain_timeout: 5s

dns:
  ttl: 60000
  server: "10.0.0.53:53"
  static:
    db1.internal: ["10.1.0.1", "fd00::1"]

storage:
  kind: json
  path: /var/lib/healthmon/results.json

publish:
  only_on_change: true
  host_groups: [web]
  batch_delay: 250ms

http:
  listen: "0.0.0.0:9100"

host_groups:
  load_directory: conf.d
  files: [extra.yaml]
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.threads.min, 2);
        assert_eq!(config.threads.monitor_interval, Duration::from_millis(500));
        assert_eq!(config.threads.work_per_thread, 4);
        assert_eq!(config.checks.drain_timeout, Duration::from_secs(5));
        assert_eq!(config.dns.static_hosts["db1.internal"].len(), 2);
        assert_eq!(config.storage.kind, StorageKind::Json);
        assert_eq!(config.publish.batch_delay, Duration::from_millis(250));
        assert!(config.publish.enabled);
        assert_eq!(config.host_groups.files, vec![PathBuf::from("extra.yaml")]);

        let settings = config.to_daemon_settings();
        assert_eq!(settings.checks.late_threshold_percent, 25);
        assert_eq!(settings.dns.server, Some("10.0.0.53:53".parse().unwrap()));
        assert!(settings.publish.host_groups.contains("web"));
        assert_eq!(
            settings.dns.static_hosts["db1.internal"][0],
            "10.1.0.1".parse::<IpAddress>().unwrap()
        );

        let server = config.to_server_config();
        assert_eq!(server.batch_delay, Duration::from_millis(250));
        assert_eq!(server.http_listen, "0.0.0.0:9100");
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
        assert_eq!(Config::from_yaml("# nothing\n").unwrap(), Config::default());
    }

    #[test]
    fn test_invalid_thread_bounds() {
        let yaml = r#"
threads:
  min: 8
  max: 4
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_invalid_ranges() {
        for yaml in [
            "threads:\n  monitor_interval: 5ms\n",
            "threads:\n  stride_percent: 0\n",
            "checks:\n  late_threshold_percent: 150\n",
            "publish:\n  batch_delay: 15s\n",
            "publish:\n  batch_size: 0\n",
            "http:\n  listen: not-an-address\n",
            "dns:\n  ttl: 10\n",
        ] {
            assert!(Config::from_yaml(yaml).is_err(), "{} should be rejected", yaml);
        }
    }

    #[test]
    fn test_json_storage_requires_path() {
        let yaml = "storage:\n  kind: json\n";
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_host_group_keys() {
        let yaml = r#"
host-group:
  - name: web
    uri: /status.html
    dual-stack-mode: both
    host: [web1.example.com, web2.example.com]
    check-retries: 2
    check-retry-delay: 500
    rt-mode: smoothed-total
    remote-fallback: "off"
    local-fallback: "on"
    dns-type: ares
    tos-value: 16
    source-address: 192.0.2.1
  - name: ftp
    check-type: ftps
    dns-type: static
    host: [ftp1]
"#;
        let groups = groups_from(yaml).unwrap();

        let web = &groups["web"];
        assert_eq!(web.check_type, CheckType::Http);
        assert_eq!(web.port, 80);
        assert_eq!(web.check_info, "/status.html");
        assert_eq!(web.dual_stack, DualStack::Both);
        assert_eq!(web.hosts.len(), 2);
        assert_eq!(web.check_retries, 2);
        assert_eq!(web.check_retry_delay, 500);
        assert_eq!(web.slow_threshold, 500);
        assert_eq!(web.measurement, Measurement::SmoothedTotal);
        assert!(web.distributed_fallback.remote);
        assert!(web.distributed_fallback.local);
        assert_eq!(web.dns_type, DnsType::Lookup);
        assert_eq!(web.tos_value, 16);
        assert_eq!(web.source_address, "192.0.2.1".parse::<IpAddress>().unwrap());

        let ftp = &groups["ftp"];
        assert_eq!(ftp.check_type, CheckType::FtpsExplicit);
        assert_eq!(ftp.port, 21);
        assert_eq!(ftp.dns_type, DnsType::Static);
    }

    #[test]
    fn test_bare_list_and_explicit_port() {
        let yaml = r#"
- name: api
  check-type: https
  check-port: 8443
  check-info: /ready
  host: [api1]
"#;
        let groups = groups_from(yaml).unwrap();
        assert_eq!(groups["api"].port, 8443);
        assert_eq!(groups["api"].check_info, "/ready");
    }

    #[test]
    fn test_child_groups_merge_hosts() {
        let yaml = r#"
- name: all
  check-type: tcp
  host: [lb1]
  host-group: [web, db]
- name: web
  check-type: http
  host: [web1, web2]
  host-group: [edge]
- name: edge
  host: [edge1]
- name: db
  host: [db1]
"#;
        let groups = groups_from(yaml).unwrap();
        let hosts: Vec<&str> = groups["all"].hosts.iter().map(String::as_str).collect();
        assert_eq!(hosts, vec!["db1", "edge1", "lb1", "web1", "web2"]);
        assert_eq!(groups["web"].hosts.len(), 3);
        assert_eq!(groups["db"].hosts.len(), 1);
    }

    #[test]
    fn test_unknown_child_group_fails() {
        let yaml = r#"
- name: all
  host-group: [missing]
"#;
        match groups_from(yaml) {
            Err(ConfigError::UnknownHostGroup { group, child }) => {
                assert_eq!(group, "all");
                assert_eq!(child, "missing");
            }
            other => panic!("expected unknown host group error, got {:?}", other),
        }
    }

    #[test]
    fn test_child_group_cycle_terminates() {
        let yaml = r#"
- name: a
  host: [a1]
  host-group: [b]
- name: b
  host: [b1]
  host-group: [a]
"#;
        let groups = groups_from(yaml).unwrap();
        assert_eq!(groups["a"].hosts.len(), 2);
        assert_eq!(groups["b"].hosts.len(), 2);
    }

    #[test]
    fn test_repeated_group_name_updates() {
        let mut groups = BTreeMap::new();
        parse_host_groups("- name: web\n  check-type: http\n  host: [a]\n", Path::new("1.yaml"), &mut groups).unwrap();
        parse_host_groups("- name: web\n  host: [b]\n  ttl: 5000\n", Path::new("2.yaml"), &mut groups).unwrap();
        let web = &groups["web"];
        assert_eq!(web.hosts.len(), 2);
        assert_eq!(web.ttl, 5000);
        assert_eq!(web.check_type, CheckType::Http);
    }

    #[test]
    fn test_host_group_parse_error_names_file() {
        let mut groups = BTreeMap::new();
        let err = parse_host_groups("- name: [", Path::new("broken.yaml"), &mut groups).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }
}
