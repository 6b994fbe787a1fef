//! Controller configuration.
//!
//! Everything is read from environment variables. Parsing goes through a
//! lookup function so it can be exercised without touching the process
//! environment.

use crate::error::ControllerError;
use crds::{LABEL_NETWORK, LABEL_VALUE_FLOATING_IP};
use ipam_client::FloatingIpRange;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 60;
const DEFAULT_CONFIGMAP_NAME: &str = "floatingip-config";
const DEFAULT_CONFIGMAP_NAMESPACE: &str = "kube-system";
const DEFAULT_FLOATINGIP_KEY: &str = "floatingips";
const DEFAULT_SECOND_FLOATINGIP_KEY: &str = "second_floatingips";
const DEFAULT_ANNOTATION_PATCH_INTERVAL_MS: u64 = 500;
const DEFAULT_ANNOTATION_PATCH_TIMEOUT_SECS: u64 = 20;

/// Equality-based label selector (`k=v[,k=v]`).
///
/// An empty filter matches every object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    requirements: BTreeMap<String, String>,
}

impl LabelFilter {
    pub fn new<I, K, V>(requirements: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            requirements: requirements
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Selector matching pods that asked for a floating IP.
    pub fn floating_ip() -> Self {
        Self::new([(LABEL_NETWORK, LABEL_VALUE_FLOATING_IP)])
    }

    pub fn parse(selector: &str) -> Result<Self, ControllerError> {
        let mut requirements = BTreeMap::new();
        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
                .ok_or_else(|| ControllerError::InvalidConfig(format!("invalid selector term {:?}", term)))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ControllerError::InvalidConfig(format!("empty label key in {:?}", term)));
            }
            requirements.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.requirements
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}

impl fmt::Display for LabelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.requirements.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        f.write_str(&terms.join(","))
    }
}

/// Runtime configuration of the Floating IP Controller.
#[derive(Debug, Clone)]
pub struct Config {
    /// Time between two reconciliation passes
    pub resync_interval: Duration,
    /// Namespace to watch pods in, all namespaces when unset
    pub namespace: Option<String>,
    pub configmap_name: String,
    pub configmap_namespace: String,
    /// ConfigMap key holding the primary floating IP ranges
    pub floatingip_key: String,
    /// ConfigMap key holding the secondary floating IP ranges
    pub second_floatingip_key: String,
    /// Selector an owner must match to keep floating IPs
    pub wanted_selector: LabelFilter,
    /// Selector restricting which pods are considered
    pub pod_selector: LabelFilter,
    pub annotation_patch_interval: Duration,
    pub annotation_patch_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
            namespace: None,
            configmap_name: DEFAULT_CONFIGMAP_NAME.to_string(),
            configmap_namespace: DEFAULT_CONFIGMAP_NAMESPACE.to_string(),
            floatingip_key: DEFAULT_FLOATINGIP_KEY.to_string(),
            second_floatingip_key: DEFAULT_SECOND_FLOATINGIP_KEY.to_string(),
            wanted_selector: LabelFilter::floating_ip(),
            pod_selector: LabelFilter::floating_ip(),
            annotation_patch_interval: Duration::from_millis(DEFAULT_ANNOTATION_PATCH_INTERVAL_MS),
            annotation_patch_timeout: Duration::from_secs(DEFAULT_ANNOTATION_PATCH_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let resync_secs = parse_number(&var, "RESYNC_INTERVAL_SECS", DEFAULT_RESYNC_INTERVAL_SECS)?;
        if resync_secs < 1 {
            return Err(ControllerError::InvalidConfig(
                "RESYNC_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        let patch_interval_ms = parse_number(
            &var,
            "ANNOTATION_PATCH_INTERVAL_MS",
            DEFAULT_ANNOTATION_PATCH_INTERVAL_MS,
        )?;
        if patch_interval_ms < 1 {
            return Err(ControllerError::InvalidConfig(
                "ANNOTATION_PATCH_INTERVAL_MS must be at least 1".to_string(),
            ));
        }

        let wanted_selector = match var("WANTED_SELECTOR") {
            Some(s) => LabelFilter::parse(&s)?,
            None => defaults.wanted_selector,
        };
        let pod_selector = match var("POD_SELECTOR") {
            Some(s) => LabelFilter::parse(&s)?,
            None => defaults.pod_selector,
        };

        Ok(Self {
            resync_interval: Duration::from_secs(resync_secs),
            namespace: var("WATCH_NAMESPACE"),
            configmap_name: var("CONFIGMAP_NAME").unwrap_or(defaults.configmap_name),
            configmap_namespace: var("CONFIGMAP_NAMESPACE").unwrap_or(defaults.configmap_namespace),
            floatingip_key: var("FLOATINGIP_KEY").unwrap_or(defaults.floatingip_key),
            second_floatingip_key: var("SECOND_FLOATINGIP_KEY").unwrap_or(defaults.second_floatingip_key),
            wanted_selector,
            pod_selector,
            annotation_patch_interval: Duration::from_millis(patch_interval_ms),
            annotation_patch_timeout: Duration::from_secs(parse_number(
                &var,
                "ANNOTATION_PATCH_TIMEOUT_SECS",
                DEFAULT_ANNOTATION_PATCH_TIMEOUT_SECS,
            )?),
        })
    }
}

/// Parses the floating IP ranges stored under a ConfigMap key.
///
/// Accepts YAML or JSON. A blank value yields no ranges.
pub fn parse_ranges(raw: &str) -> Result<Vec<FloatingIpRange>, ControllerError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let ranges: Vec<FloatingIpRange> = serde_yaml::from_str(raw)?;
    for range in &ranges {
        range.validate()?;
    }
    Ok(ranges)
}

fn parse_number<F>(var: &F, name: &str, default: u64) -> Result<u64, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{} must be a number, got {:?}: {}", name, raw, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.resync_interval, Duration::from_secs(60));
        assert_eq!(config.namespace, None);
        assert_eq!(config.configmap_name, "floatingip-config");
        assert_eq!(config.configmap_namespace, "kube-system");
        assert_eq!(config.floatingip_key, "floatingips");
        assert_eq!(config.second_floatingip_key, "second_floatingips");
        assert_eq!(config.wanted_selector, LabelFilter::floating_ip());
        assert_eq!(config.annotation_patch_interval, Duration::from_millis(500));
        assert_eq!(config.annotation_patch_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("RESYNC_INTERVAL_SECS", "5"),
            ("WATCH_NAMESPACE", "team-a"),
            ("SECOND_FLOATINGIP_KEY", "eni"),
            ("POD_SELECTOR", "app=web, tier==front"),
            ("ANNOTATION_PATCH_INTERVAL_MS", "10"),
        ]))
        .unwrap();
        assert_eq!(config.resync_interval, Duration::from_secs(5));
        assert_eq!(config.namespace.as_deref(), Some("team-a"));
        assert_eq!(config.second_floatingip_key, "eni");
        assert_eq!(config.pod_selector.to_string(), "app=web,tier=front");
        assert_eq!(config.annotation_patch_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::from_lookup(lookup(&[("RESYNC_INTERVAL_SECS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("RESYNC_INTERVAL_SECS", "soon")])).is_err());
        assert!(matches!(
            Config::from_lookup(lookup(&[("ANNOTATION_PATCH_INTERVAL_MS", "0")])),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(Config::from_lookup(lookup(&[("WANTED_SELECTOR", "novalue")])).is_err());
        // blank values fall back to defaults
        assert!(Config::from_lookup(lookup(&[("WATCH_NAMESPACE", " ")])).unwrap().namespace.is_none());
    }

    #[test]
    fn test_label_filter_matches() {
        let filter = LabelFilter::parse("a=1,b=2").unwrap();
        let mut labels = BTreeMap::new();
        labels.insert("a".to_string(), "1".to_string());
        assert!(!filter.matches(Some(&labels)));
        labels.insert("b".to_string(), "2".to_string());
        assert!(filter.matches(Some(&labels)));
        assert!(!filter.matches(None));

        let empty = LabelFilter::parse("").unwrap();
        assert!(empty.is_empty());
        assert!(empty.matches(None));
    }

    #[test]
    fn test_parse_ranges() {
        let ranges = parse_ranges(
            r#"
- routableSubnet: 10.49.27.0/24
  ips: ["10.49.27.205", "10.49.27.216~10.49.27.218"]
  subnet: 10.49.27.0/24
  gateway: 10.49.27.1
  vlan: 2
"#,
        )
        .unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].vlan, 2);
        assert_eq!(ranges[0].ips.len(), 2);
        assert!(ranges[0].contains("10.49.27.217".parse().unwrap()));
        assert!(!ranges[0].contains("10.49.27.219".parse().unwrap()));

        // the same document as JSON
        let json = r#"[{"routableSubnet":"10.0.0.0/24","ips":["10.0.0.10~10.0.0.20"],"subnet":"10.0.0.0/24"}]"#;
        assert_eq!(parse_ranges(json).unwrap()[0].vlan, 0);

        assert!(parse_ranges("  ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_ranges_rejects_invalid() {
        assert!(matches!(parse_ranges("not: [a list"), Err(ControllerError::InvalidRanges(_))));
        let outside = r#"[{"routableSubnet":"10.0.0.0/24","ips":["10.0.1.1"],"subnet":"10.0.0.0/24"}]"#;
        assert!(matches!(parse_ranges(outside), Err(ControllerError::Ipam(_))));
        let bad_span = r#"[{"routableSubnet":"10.0.0.0/24","ips":["10.0.0.x"],"subnet":"10.0.0.0/24"}]"#;
        assert!(parse_ranges(bad_span).is_err());
    }
}
