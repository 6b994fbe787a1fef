//! Allocation store data models

use crds::ReleasePolicy;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::error::IpamError;

/// One `key -> IP` binding held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatingIpRecord {
    pub key: String,
    pub ip: IpAddr,
    pub policy: ReleasePolicy,
    /// Routable (node) subnet of the IP
    pub subnet: String,
    pub attribute: String,
    pub update_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Allocation info written into the pod annotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpInfo {
    /// The IP together with its subnet prefix length, e.g. `10.0.0.5/24`
    pub ip: IpNet,
    #[serde(default)]
    pub vlan: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    /// The node subnet
    pub routable_subnet: IpNet,
}

/// A configured floating IP range.
///
/// Loaded from the floating IP ConfigMap, e.g.
///
/// ```yaml
/// - routableSubnet: 10.49.27.0/24
///   ips: ["10.49.27.205", "10.49.27.216~10.49.27.218"]
///   subnet: 10.49.27.0/24
///   gateway: 10.49.27.1
///   vlan: 2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FloatingIpRange {
    /// Node subnet whose pods may use these IPs
    pub routable_subnet: IpNet,
    /// Allocatable addresses
    pub ips: Vec<IpSpan>,
    /// Subnet the floating IPs live in
    pub subnet: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    #[serde(default)]
    pub vlan: u16,
}

impl FloatingIpRange {
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.subnet.contains(&ip) && self.ips.iter().any(|span| span.contains(ip))
    }

    /// Allocation info for an IP of this range.
    pub fn ip_info(&self, ip: IpAddr) -> Result<IpInfo, IpamError> {
        let ip_net = IpNet::new(ip, self.subnet.prefix_len())
            .map_err(|e| IpamError::InvalidConfig(format!("{}/{}: {}", ip, self.subnet.prefix_len(), e)))?;
        Ok(IpInfo {
            ip: ip_net,
            vlan: self.vlan,
            gateway: self.gateway,
            routable_subnet: self.routable_subnet,
        })
    }

    pub fn validate(&self) -> Result<(), IpamError> {
        if self.ips.is_empty() {
            return Err(IpamError::InvalidConfig(format!("range {} has no ips", self.subnet)));
        }
        for span in &self.ips {
            if !self.subnet.contains(&span.first) || !self.subnet.contains(&span.last) {
                return Err(IpamError::InvalidConfig(format!("{} is outside subnet {}", span, self.subnet)));
            }
        }
        if let Some(gateway) = self.gateway {
            if !self.subnet.contains(&gateway) {
                return Err(IpamError::InvalidConfig(format!(
                    "gateway {} is outside subnet {}",
                    gateway, self.subnet
                )));
            }
        }
        Ok(())
    }
}

/// Finds the range an IP belongs to.
pub fn find_range(ranges: &[FloatingIpRange], ip: IpAddr) -> Option<&FloatingIpRange> {
    ranges.iter().find(|range| range.contains(ip))
}

/// An inclusive run of addresses, written `a` or `a~b`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct IpSpan {
    pub first: IpAddr,
    pub last: IpAddr,
}

impl IpSpan {
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.first <= ip && ip <= self.last
    }
}

impl TryFrom<String> for IpSpan {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parse = |s: &str| {
            s.trim()
                .parse::<IpAddr>()
                .map_err(|e| format!("invalid ip {:?}: {}", s, e))
        };
        let (first, last) = match value.split_once('~') {
            Some((first, last)) => (parse(first)?, parse(last)?),
            None => {
                let ip = parse(&value)?;
                (ip, ip)
            }
        };
        if first.is_ipv4() != last.is_ipv4() || first > last {
            return Err(format!("invalid ip range {:?}", value));
        }
        Ok(Self { first, last })
    }
}

impl From<IpSpan> for String {
    fn from(span: IpSpan) -> Self {
        span.to_string()
    }
}

impl fmt::Display for IpSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}~{}", self.first, self.last)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> FloatingIpRange {
        serde_json::from_value(serde_json::json!({
            "routableSubnet": "10.49.27.0/24",
            "ips": ["10.49.27.205", "10.49.27.216~10.49.27.218"],
            "subnet": "10.49.27.0/24",
            "gateway": "10.49.27.1",
            "vlan": 2
        }))
        .unwrap()
    }

    #[test]
    fn test_range_contains() {
        let range = range();
        assert!(range.validate().is_ok());
        assert!(range.contains("10.49.27.205".parse().unwrap()));
        assert!(range.contains("10.49.27.217".parse().unwrap()));
        assert!(!range.contains("10.49.27.206".parse().unwrap()));
        assert!(!range.contains("10.49.28.216".parse().unwrap()));
    }

    #[test]
    fn test_ip_span_rejects_reversed_range() {
        assert!(IpSpan::try_from("10.0.0.9~10.0.0.1".to_string()).is_err());
        assert!(IpSpan::try_from("10.0.0.1~fd00::1".to_string()).is_err());
        assert!(IpSpan::try_from("not-an-ip".to_string()).is_err());
        assert_eq!(
            IpSpan::try_from("10.0.0.1~10.0.0.3".to_string()).unwrap().to_string(),
            "10.0.0.1~10.0.0.3"
        );
    }

    #[test]
    fn test_validate_rejects_span_outside_subnet() {
        let mut range = range();
        range.ips.push(IpSpan::try_from("10.50.0.1".to_string()).unwrap());
        assert!(matches!(range.validate(), Err(IpamError::InvalidConfig(_))));
    }

    #[test]
    fn test_ip_info_annotation_format() {
        let info = range().ip_info("10.49.27.216".parse().unwrap()).unwrap();
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["ip"], "10.49.27.216/24");
        assert_eq!(value["gateway"], "10.49.27.1");
        assert_eq!(value["vlan"], 2);
        assert_eq!(value["routable_subnet"], "10.49.27.0/24");
    }

    #[test]
    fn test_find_range() {
        let ranges: Vec<FloatingIpRange> = serde_json::from_str(
            r#"[{"routableSubnet":"10.0.0.0/16","ips":["10.0.1.2~10.0.1.9"],"subnet":"10.0.1.0/24"}]"#,
        )
        .unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].gateway, None);
        assert!(find_range(&ranges, "10.0.1.5".parse().unwrap()).is_some());
        assert!(find_range(&ranges, "10.0.1.10".parse().unwrap()).is_none());
    }
}
