//! Data model for the DDNS system
//!
//! [`DdnsConfig`] is the desired-state unit the engine reconciles. It is
//! created from a validated [`NewDdnsConfig`], changed through
//! [`DdnsConfigPatch`] (settings) or [`StatusUpdate`] (reconciler outcome),
//! and never mutated any other way.
//!
//! [`DnsRecord`], [`NewDnsRecord`], [`DnsRecordPatch`] and [`Zone`] mirror
//! what the remote provider holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Smallest accepted reconciliation interval
pub const MIN_UPDATE_INTERVAL_SECS: u64 = 60;

/// Largest accepted reconciliation interval (30 days)
pub const MAX_UPDATE_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

/// Interval used when a request does not name one
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 300;

/// TTL given to records the engine creates
pub const DEFAULT_RECORD_TTL: u32 = 120;

/// Comment placed on records the engine creates
pub const MANAGED_RECORD_COMMENT: &str = "managed by ddns";

/// IP address family a config tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4, maintained as an A record
    Ipv4,
    /// IPv6, maintained as an AAAA record
    Ipv6,
}

impl AddressFamily {
    /// Record type that carries addresses of this family
    pub fn record_type(self) -> RecordType {
        match self {
            AddressFamily::Ipv4 => RecordType::A,
            AddressFamily::Ipv6 => RecordType::Aaaa,
        }
    }

    /// True if `ip` belongs to this family
    pub fn matches(self, ip: &IpAddr) -> bool {
        match self {
            AddressFamily::Ipv4 => ip.is_ipv4(),
            AddressFamily::Ipv6 => ip.is_ipv6(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "ipv4",
            AddressFamily::Ipv6 => "ipv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" | "v4" | "4" => Ok(AddressFamily::Ipv4),
            "ipv6" | "v6" | "6" => Ok(AddressFamily::Ipv6),
            other => Err(Error::validation(format!(
                "unknown address family '{}', expected ipv4 or ipv6",
                other
            ))),
        }
    }
}

/// Address record types the engine manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
}

impl RecordType {
    pub fn family(self) -> AddressFamily {
        match self {
            RecordType::A => AddressFamily::Ipv4,
            RecordType::Aaaa => AddressFamily::Ipv6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::Aaaa),
            other => Err(Error::validation(format!(
                "unsupported record type '{}', expected A or AAAA",
                other
            ))),
        }
    }
}

/// Reconciliation status of a config
///
/// `Checking` and `Updating` are only visible while a cycle is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigStatus {
    #[default]
    Idle,
    Checking,
    Updating,
    Ok,
    Error,
}

impl fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigStatus::Idle => "idle",
            ConfigStatus::Checking => "checking",
            ConfigStatus::Updating => "updating",
            ConfigStatus::Ok => "ok",
            ConfigStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A desired-state unit: keep `record_name` in `zone_id` pointed at this
/// host's current address of `address_family`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdnsConfig {
    pub id: String,
    pub zone_id: String,
    /// Provider record id, assigned once the record exists
    #[serde(default)]
    pub record_id: Option<String>,
    pub record_name: String,
    pub address_family: AddressFamily,
    pub update_interval_seconds: u64,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default)]
    pub status: ConfigStatus,
    /// Last address observed as authoritative on the provider
    #[serde(default)]
    pub current_ip: Option<String>,
    /// Time of the last successful provider write
    #[serde(default)]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

fn default_ttl() -> u32 {
    DEFAULT_RECORD_TTL
}

impl DdnsConfig {
    /// Record type this config maintains
    pub fn record_type(&self) -> RecordType {
        self.address_family.record_type()
    }

    /// Case-insensitive name comparison, ignoring a trailing root dot
    pub fn targets_name(&self, name: &str) -> bool {
        normalize_record_name(&self.record_name) == normalize_record_name(name)
    }
}

/// Request to create a config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDdnsConfig {
    pub zone_id: String,
    #[serde(default)]
    pub record_id: Option<String>,
    pub record_name: String,
    pub address_family: AddressFamily,
    #[serde(default = "default_interval")]
    pub update_interval_seconds: u64,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub proxied: bool,
}

fn default_interval() -> u64 {
    DEFAULT_UPDATE_INTERVAL_SECS
}

impl NewDdnsConfig {
    pub fn new(
        zone_id: impl Into<String>,
        record_name: impl Into<String>,
        address_family: AddressFamily,
        update_interval_seconds: u64,
    ) -> Self {
        Self {
            zone_id: zone_id.into(),
            record_id: None,
            record_name: record_name.into(),
            address_family,
            update_interval_seconds,
            ttl: None,
            proxied: false,
        }
    }

    /// Bind the config to an existing provider record
    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.zone_id.trim().is_empty() {
            return Err(Error::validation("zone_id is required"));
        }
        if let Some(record_id) = &self.record_id
            && record_id.trim().is_empty()
        {
            return Err(Error::validation("record_id cannot be blank"));
        }
        validate_domain_name(&self.record_name)?;
        validate_interval(self.update_interval_seconds)?;
        if let Some(ttl) = self.ttl {
            validate_ttl(ttl)?;
        }
        Ok(())
    }

    /// Build the stored config under `id`, starting in `idle`
    pub fn into_config(self, id: impl Into<String>) -> DdnsConfig {
        DdnsConfig {
            id: id.into(),
            zone_id: self.zone_id.trim().to_string(),
            record_id: self.record_id,
            record_name: self.record_name.trim().trim_end_matches('.').to_string(),
            address_family: self.address_family,
            update_interval_seconds: self.update_interval_seconds,
            ttl: self.ttl.unwrap_or(DEFAULT_RECORD_TTL),
            proxied: self.proxied,
            status: ConfigStatus::Idle,
            current_ip: None,
            last_update_time: None,
            last_error: None,
        }
    }
}

/// Settings change for an existing config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdnsConfigPatch {
    #[serde(default)]
    pub record_name: Option<String>,
    #[serde(default)]
    pub update_interval_seconds: Option<u64>,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub proxied: Option<bool>,
}

impl DdnsConfigPatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.record_name {
            validate_domain_name(name)?;
        }
        if let Some(interval) = self.update_interval_seconds {
            validate_interval(interval)?;
        }
        if let Some(ttl) = self.ttl {
            validate_ttl(ttl)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.record_name.is_none()
            && self.update_interval_seconds.is_none()
            && self.ttl.is_none()
            && self.proxied.is_none()
    }

    /// Apply to `config`
    ///
    /// A rename detaches the config from its record so the next cycle
    /// locates or creates the record under the new name.
    pub fn apply_to(&self, config: &mut DdnsConfig) {
        if let Some(name) = &self.record_name
            && !config.targets_name(name)
        {
            config.record_name = name.trim().trim_end_matches('.').to_string();
            config.record_id = None;
            config.current_ip = None;
            config.status = ConfigStatus::Idle;
        }
        if let Some(interval) = self.update_interval_seconds {
            config.update_interval_seconds = interval;
        }
        if let Some(ttl) = self.ttl {
            config.ttl = ttl;
        }
        if let Some(proxied) = self.proxied {
            config.proxied = proxied;
        }
    }
}

/// Change to one optional field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldChange<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T: Clone> FieldChange<T> {
    pub fn apply(&self, slot: &mut Option<T>) {
        match self {
            FieldChange::Keep => {}
            FieldChange::Set(value) => *slot = Some(value.clone()),
            FieldChange::Clear => *slot = None,
        }
    }
}

/// Status write produced by the reconciler
///
/// Settings fields are never touched, so a concurrent settings update is
/// not lost when a cycle persists its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: ConfigStatus,
    pub record_id: FieldChange<String>,
    pub current_ip: FieldChange<String>,
    pub last_update_time: FieldChange<DateTime<Utc>>,
    pub last_error: FieldChange<String>,
}

impl StatusUpdate {
    pub fn new(status: ConfigStatus) -> Self {
        Self {
            status,
            record_id: FieldChange::Keep,
            current_ip: FieldChange::Keep,
            last_update_time: FieldChange::Keep,
            last_error: FieldChange::Keep,
        }
    }

    /// Success: status `ok` with the error cleared
    pub fn ok() -> Self {
        Self::new(ConfigStatus::Ok).clear_error()
    }

    /// Failure: status `error` with `message` recorded
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            last_error: FieldChange::Set(message.into()),
            ..Self::new(ConfigStatus::Error)
        }
    }

    pub fn record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = FieldChange::Set(record_id.into());
        self
    }

    pub fn clear_record_id(mut self) -> Self {
        self.record_id = FieldChange::Clear;
        self
    }

    pub fn current_ip(mut self, ip: impl Into<String>) -> Self {
        self.current_ip = FieldChange::Set(ip.into());
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_update_time = FieldChange::Set(at);
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = FieldChange::Clear;
        self
    }

    pub fn apply_to(&self, config: &mut DdnsConfig) {
        config.status = self.status;
        self.record_id.apply(&mut config.record_id);
        self.current_ip.apply(&mut config.current_ip);
        self.last_update_time.apply(&mut config.last_update_time);
        self.last_error.apply(&mut config.last_error);
    }
}

/// DNS zone as listed by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Address record held by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    pub zone_id: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

impl DnsRecord {
    /// Parsed record content, `None` if it is not an address
    pub fn ip(&self) -> Option<IpAddr> {
        self.content.trim().parse().ok()
    }
}

/// Record to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDnsRecord {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl NewDnsRecord {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("record name is required"));
        }
        validate_domain_name(&self.name)?;
        validate_content(self.record_type, &self.content)?;
        validate_ttl(self.ttl)
    }
}

/// Partial record update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl DnsRecordPatch {
    /// Patch that only rewrites the record content
    pub fn content(ip: IpAddr) -> Self {
        Self {
            content: Some(ip.to_string()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.content.is_none()
            && self.name.is_none()
            && self.ttl.is_none()
            && self.proxied.is_none()
            && self.comment.is_none()
        {
            return Err(Error::validation("record patch changes nothing"));
        }
        if let Some(content) = &self.content
            && content.trim().parse::<IpAddr>().is_err()
        {
            return Err(Error::validation(format!(
                "record content '{}' is not an IP address",
                content
            )));
        }
        if let Some(name) = &self.name {
            validate_domain_name(name)?;
        }
        if let Some(ttl) = self.ttl {
            validate_ttl(ttl)?;
        }
        Ok(())
    }
}

/// Lowercase and strip the trailing root dot
pub fn normalize_record_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

pub fn validate_interval(seconds: u64) -> Result<()> {
    if seconds < MIN_UPDATE_INTERVAL_SECS {
        return Err(Error::validation(format!(
            "update_interval_seconds must be at least {}, got {}",
            MIN_UPDATE_INTERVAL_SECS, seconds
        )));
    }
    if seconds > MAX_UPDATE_INTERVAL_SECS {
        return Err(Error::validation(format!(
            "update_interval_seconds must be at most {}, got {}",
            MAX_UPDATE_INTERVAL_SECS, seconds
        )));
    }
    Ok(())
}

/// TTL 1 means "automatic" on most providers
pub fn validate_ttl(ttl: u32) -> Result<()> {
    if ttl == 1 || (60..=86_400).contains(&ttl) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "ttl must be 1 (automatic) or between 60 and 86400, got {}",
            ttl
        )))
    }
}

fn validate_content(record_type: RecordType, content: &str) -> Result<()> {
    let ip: IpAddr = content.trim().parse().map_err(|_| {
        Error::validation(format!("record content '{}' is not an IP address", content))
    })?;
    if !record_type.family().matches(&ip) {
        return Err(Error::validation(format!(
            "{} record cannot hold {}",
            record_type, ip
        )));
    }
    Ok(())
}

/// Validate that a string is a valid DNS name
///
/// Basic RFC 1035 checks plus the underscore and leading wildcard label
/// providers accept. A single trailing dot is allowed.
pub fn validate_domain_name(domain: &str) -> Result<()> {
    let domain = domain.trim();
    let domain = domain.strip_suffix('.').unwrap_or(domain);

    if domain.is_empty() {
        return Err(Error::validation("record name cannot be empty"));
    }

    if domain.len() > 253 {
        return Err(Error::validation(format!(
            "record name too long: {} chars (max 253)",
            domain.len()
        )));
    }

    for (index, label) in domain.split('.').enumerate() {
        if label.is_empty() {
            return Err(Error::validation(format!(
                "record name has an empty label: '{}'",
                domain
            )));
        }
        if index == 0 && label == "*" {
            continue;
        }
        if label.len() > 63 {
            return Err(Error::validation(format!(
                "label too long: {} chars (max 63) in '{}'",
                label.len(),
                domain
            )));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::validation(format!(
                "label '{}' contains invalid characters",
                label
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(Error::validation(format!(
                "label '{}' cannot start or end with a hyphen",
                label
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> NewDdnsConfig {
        NewDdnsConfig::new("zone-1", "home.example.com", AddressFamily::Ipv4, 60)
    }

    #[test]
    fn interval_below_minimum_is_rejected() {
        let mut req = request();
        req.update_interval_seconds = 59;
        assert!(matches!(req.validate(), Err(Error::Validation(_))));

        req.update_interval_seconds = 60;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn interval_above_maximum_is_rejected() {
        let mut req = request();
        req.update_interval_seconds = MAX_UPDATE_INTERVAL_SECS;
        assert!(req.validate().is_ok());

        req.update_interval_seconds = MAX_UPDATE_INTERVAL_SECS + 1;
        assert!(matches!(req.validate(), Err(Error::Validation(_))));

        req.update_interval_seconds = u64::MAX;
        assert!(matches!(req.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn missing_zone_is_rejected() {
        let mut req = request();
        req.zone_id = "  ".to_string();
        assert!(matches!(req.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn domain_name_rules() {
        assert!(validate_domain_name("example.com").is_ok());
        assert!(validate_domain_name("home.example.com.").is_ok());
        assert!(validate_domain_name("*.example.com").is_ok());
        assert!(validate_domain_name("_acme.example.com").is_ok());
        assert!(validate_domain_name("").is_err());
        assert!(validate_domain_name("a..b").is_err());
        assert!(validate_domain_name("-bad.example.com").is_err());
        assert!(validate_domain_name("sp ace.example.com").is_err());
        assert!(validate_domain_name(&format!("{}.com", "a".repeat(64))).is_err());
    }

    #[test]
    fn into_config_applies_defaults() {
        let config = request().into_config("id-1");
        assert_eq!(config.ttl, DEFAULT_RECORD_TTL);
        assert_eq!(config.status, ConfigStatus::Idle);
        assert!(!config.proxied);
        assert!(config.current_ip.is_none());
        assert!(config.last_update_time.is_none());
    }

    #[test]
    fn rename_detaches_record() {
        let mut config = request().with_record_id("rec-1").into_config("id-1");
        config.current_ip = Some("1.1.1.1".to_string());

        let patch = DdnsConfigPatch {
            record_name: Some("HOME.example.com.".to_string()),
            ..Default::default()
        };
        patch.apply_to(&mut config);
        assert_eq!(config.record_id.as_deref(), Some("rec-1"));

        let patch = DdnsConfigPatch {
            record_name: Some("vpn.example.com".to_string()),
            update_interval_seconds: Some(120),
            ..Default::default()
        };
        patch.apply_to(&mut config);
        assert_eq!(config.record_name, "vpn.example.com");
        assert_eq!(config.update_interval_seconds, 120);
        assert!(config.record_id.is_none());
        assert!(config.current_ip.is_none());
    }

    #[test]
    fn status_update_touches_only_named_fields() {
        let mut config = request().with_record_id("rec-1").into_config("id-1");
        config.last_error = Some("old".to_string());

        StatusUpdate::ok().current_ip("1.2.3.4").apply_to(&mut config);
        assert_eq!(config.status, ConfigStatus::Ok);
        assert_eq!(config.current_ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(config.record_id.as_deref(), Some("rec-1"));
        assert!(config.last_error.is_none());
        assert!(config.last_update_time.is_none());

        StatusUpdate::failed("gone").clear_record_id().apply_to(&mut config);
        assert_eq!(config.status, ConfigStatus::Error);
        assert!(config.record_id.is_none());
        assert_eq!(config.current_ip.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn new_record_content_must_match_type() {
        let record = NewDnsRecord {
            record_type: RecordType::Aaaa,
            name: "home.example.com".to_string(),
            content: "1.2.3.4".to_string(),
            ttl: 120,
            proxied: false,
            comment: None,
        };
        assert!(matches!(record.validate(), Err(Error::Validation(_))));

        let record = NewDnsRecord {
            content: "2001:db8::1".to_string(),
            ..record
        };
        assert!(record.validate().is_ok());
    }

    #[test]
    fn serde_names() {
        let json = serde_json::to_string(&AddressFamily::Ipv6).unwrap();
        assert_eq!(json, "\"ipv6\"");
        let json = serde_json::to_string(&RecordType::Aaaa).unwrap();
        assert_eq!(json, "\"AAAA\"");
        let json = serde_json::to_string(&ConfigStatus::Updating).unwrap();
        assert_eq!(json, "\"updating\"");
        assert_eq!("AAAA".parse::<RecordType>().unwrap(), RecordType::Aaaa);
        assert_eq!("v4".parse::<AddressFamily>().unwrap(), AddressFamily::Ipv4);
    }
}
