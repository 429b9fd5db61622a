/*!
Connection parameter bundle

Parses the flat key/value bundle the VPN client passes to the script on
every lifecycle event, including:
- the event tag (`reason`)
- tunnel interface identifiers
- internal IPv4/IPv6 addresses, netmasks and MTU
- DNS and WINS server lists
- indexed split-include / split-exclude route arrays
*/

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::ParamError;

/// Netmask used when the server does not send one
pub const DEFAULT_IP4_NETMASK: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Lifecycle event tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    PreInit,
    Connect,
    Disconnect,
    /// Any other tag the client may send (`reconnect`, `attempt-reconnect`, ...)
    Other(String),
}

impl Reason {
    pub fn as_str(&self) -> &str {
        match self {
            Reason::PreInit => "pre-init",
            Reason::Connect => "connect",
            Reason::Disconnect => "disconnect",
            Reason::Other(tag) => tag,
        }
    }
}

impl From<&str> for Reason {
    fn from(tag: &str) -> Self {
        match tag.trim() {
            "pre-init" => Reason::PreInit,
            "connect" => Reason::Connect,
            "disconnect" => Reason::Disconnect,
            other => Reason::Other(other.to_string()),
        }
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legacy IP network with both mask notations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ipv4Route {
    pub network: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Route {
    pub fn new(network: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self {
            network,
            netmask,
            prefix_len: mask_to_prefix(netmask),
        }
    }
}

impl fmt::Display for Ipv4Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// IPv6 network in `addr/len` form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ipv6Route {
    pub network: Ipv6Addr,
    pub prefix_len: u8,
}

impl Ipv6Route {
    pub fn new(network: Ipv6Addr, prefix_len: u8) -> Self {
        Self { network, prefix_len }
    }

    pub fn is_host(&self) -> bool {
        self.prefix_len == 128
    }
}

impl fmt::Display for Ipv6Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Ipv6Route {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s.split_once('/').ok_or(())?;
        let network = addr.parse().map_err(|_| ())?;
        let prefix_len: u8 = len.parse().map_err(|_| ())?;
        if prefix_len > 128 {
            return Err(());
        }
        Ok(Self::new(network, prefix_len))
    }
}

/// Number of leading one bits in a netmask
pub fn mask_to_prefix(mask: Ipv4Addr) -> u8 {
    u32::from(mask).leading_ones() as u8
}

/// Netmask with `len` leading one bits
pub fn prefix_to_mask(len: u8) -> Ipv4Addr {
    match len {
        0 => Ipv4Addr::UNSPECIFIED,
        l if l >= 32 => Ipv4Addr::BROADCAST,
        l => Ipv4Addr::from(u32::MAX << (32 - u32::from(l))),
    }
}

/// Everything the VPN handshake delivered for one lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionParameters {
    pub tunnel_device: Option<String>,
    pub tunnel_index: u32,
    pub vpn_gateway: Option<IpAddr>,
    pub internal_ip4_address: Option<Ipv4Addr>,
    pub internal_ip4_netmask: Ipv4Addr,
    pub internal_ip6_address: Option<Ipv6Addr>,
    pub internal_ip6_netmask: Option<Ipv6Route>,
    pub mtu: Option<u32>,
    pub dns_servers: Vec<IpAddr>,
    pub wins_servers: Vec<Ipv4Addr>,
    pub split_include: Vec<Ipv4Route>,
    pub split_exclude: Vec<Ipv4Route>,
    pub ipv6_split_include: Vec<Ipv6Route>,
    pub ipv6_split_exclude: Vec<Ipv6Route>,
    pub banner: Option<String>,
    /// Entries that could not be read; each one is left out of the fields above
    #[serde(skip)]
    pub rejected: Vec<ParamError>,
}

impl ConnectionParameters {
    /// Bundle with only the tunnel index set
    pub fn for_tunnel(tunnel_index: u32) -> Self {
        Self {
            tunnel_device: None,
            tunnel_index,
            vpn_gateway: None,
            internal_ip4_address: None,
            internal_ip4_netmask: DEFAULT_IP4_NETMASK,
            internal_ip6_address: None,
            internal_ip6_netmask: None,
            mtu: None,
            dns_servers: Vec::new(),
            wins_servers: Vec::new(),
            split_include: Vec::new(),
            split_exclude: Vec::new(),
            ipv6_split_include: Vec::new(),
            ipv6_split_exclude: Vec::new(),
            banner: None,
            rejected: Vec::new(),
        }
    }

    /// Read the bundle from the current process environment
    pub fn from_env() -> Result<Self, ParamError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Read the bundle from a flat key/value map.
    ///
    /// Only a missing or malformed `TUNIDX` fails; any other bad entry is
    /// dropped and listed in `rejected`.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ParamError> {
        let mut bundle = Bundle::new(vars);

        let tunnel_index = bundle
            .try_parsed::<u32>("TUNIDX")?
            .ok_or_else(|| ParamError::Missing("TUNIDX".to_string()))?;

        // Some servers hand out the address with its prefix attached
        let internal_ip6_address = bundle.parsed_with("INTERNAL_IP6_ADDRESS", |raw| {
            raw.split('/').next().unwrap_or(raw).parse::<Ipv6Addr>().ok()
        });
        let internal_ip6_netmask =
            bundle.parsed_with("INTERNAL_IP6_NETMASK", |raw| raw.parse::<Ipv6Route>().ok());

        let mut dns_servers: Vec<IpAddr> = bundle.list("INTERNAL_IP4_DNS");
        for server in bundle.list::<IpAddr>("INTERNAL_IP6_DNS") {
            if !dns_servers.contains(&server) {
                dns_servers.push(server);
            }
        }

        let mut params = Self {
            tunnel_device: bundle.get("TUNDEV").map(str::to_string),
            tunnel_index,
            vpn_gateway: bundle.parsed("VPNGATEWAY"),
            internal_ip4_address: bundle.parsed("INTERNAL_IP4_ADDRESS"),
            internal_ip4_netmask: bundle
                .parsed("INTERNAL_IP4_NETMASK")
                .unwrap_or(DEFAULT_IP4_NETMASK),
            internal_ip6_address,
            internal_ip6_netmask,
            mtu: bundle.parsed("INTERNAL_IP4_MTU"),
            dns_servers,
            wins_servers: bundle.list("INTERNAL_IP4_NBNS"),
            split_include: bundle.ipv4_routes("CISCO_SPLIT_INC"),
            split_exclude: bundle.ipv4_routes("CISCO_SPLIT_EXC"),
            ipv6_split_include: bundle.ipv6_routes("CISCO_IPV6_SPLIT_INC"),
            ipv6_split_exclude: bundle.ipv6_routes("CISCO_IPV6_SPLIT_EXC"),
            banner: bundle.get("CISCO_BANNER").map(str::to_string),
            rejected: Vec::new(),
        };
        params.rejected = bundle.rejected;
        Ok(params)
    }

    /// Interface label used in log lines: `"tun0" / 12`
    pub fn interface_label(&self) -> String {
        format!(
            "\"{}\" / {}",
            self.tunnel_device.as_deref().unwrap_or(""),
            self.tunnel_index
        )
    }
}

/// Typed accessors over the raw map; empty values count as absent.
/// The lenient accessors collect what they could not read in `rejected`.
struct Bundle<'a> {
    vars: &'a HashMap<String, String>,
    rejected: Vec<ParamError>,
}

impl<'a> Bundle<'a> {
    fn new(vars: &'a HashMap<String, String>) -> Self {
        Self {
            vars,
            rejected: Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn try_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, ParamError> {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ParamError::invalid(key, raw)),
            None => Ok(None),
        }
    }

    fn required<T: FromStr>(&self, key: &str) -> Result<T, ParamError> {
        self.try_parsed(key)?
            .ok_or_else(|| ParamError::Missing(key.to_string()))
    }

    fn reject<T>(&mut self, err: ParamError) -> Option<T> {
        self.rejected.push(err);
        None
    }

    fn parsed<T: FromStr>(&mut self, key: &str) -> Option<T> {
        match self.try_parsed(key) {
            Ok(value) => value,
            Err(e) => self.reject(e),
        }
    }

    fn parsed_with<T>(&mut self, key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let raw = self.get(key)?;
        match parse(raw) {
            Some(value) => Some(value),
            None => self.reject(ParamError::invalid(key, raw)),
        }
    }

    /// Whitespace-separated list; bad items are skipped
    fn list<T: FromStr>(&mut self, key: &str) -> Vec<T> {
        let Some(raw) = self.get(key) else {
            return Vec::new();
        };
        let mut items = Vec::new();
        for item in raw.split_whitespace() {
            match item.parse() {
                Ok(value) => items.push(value),
                Err(_) => self.rejected.push(ParamError::invalid(key, item)),
            }
        }
        items
    }

    /// Indexed `<prefix>_<i>_ADDR/MASK/MASKLEN` entries.
    ///
    /// A count of `0` is read as no list at all, so the redirect method applies.
    /// An entry with a bad mask is skipped; the list ends at the first index
    /// with no usable address.
    fn ipv4_routes(&mut self, prefix: &str) -> Vec<Ipv4Route> {
        let count: usize = self.parsed(prefix).unwrap_or(0);
        let mut routes = Vec::new();
        for i in 0..count {
            let network: Ipv4Addr = match self.required(&format!("{prefix}_{i}_ADDR")) {
                Ok(network) => network,
                Err(e) => {
                    self.rejected.push(e);
                    break;
                }
            };
            match self.ipv4_netmask(prefix, i) {
                Ok(netmask) => routes.push(Ipv4Route::new(network, netmask)),
                Err(e) => self.rejected.push(e),
            }
        }
        routes
    }

    fn ipv4_netmask(&self, prefix: &str, i: usize) -> Result<Ipv4Addr, ParamError> {
        let mask_key = format!("{prefix}_{i}_MASK");
        let len_key = format!("{prefix}_{i}_MASKLEN");
        match (self.try_parsed::<Ipv4Addr>(&mask_key)?, self.try_parsed::<u8>(&len_key)?) {
            (Some(mask), _) => Ok(mask),
            (None, Some(len)) if len <= 32 => Ok(prefix_to_mask(len)),
            (None, Some(len)) => Err(ParamError::invalid(&len_key, &len.to_string())),
            (None, None) => Err(ParamError::Missing(mask_key)),
        }
    }

    /// Indexed `<prefix>_<i>_ADDR/MASKLEN` entries, read like `ipv4_routes`
    fn ipv6_routes(&mut self, prefix: &str) -> Vec<Ipv6Route> {
        let count: usize = self.parsed(prefix).unwrap_or(0);
        let mut routes = Vec::new();
        for i in 0..count {
            let network: Ipv6Addr = match self.required(&format!("{prefix}_{i}_ADDR")) {
                Ok(network) => network,
                Err(e) => {
                    self.rejected.push(e);
                    break;
                }
            };
            let len_key = format!("{prefix}_{i}_MASKLEN");
            match self.required::<u8>(&len_key) {
                Ok(len) if len <= 128 => routes.push(Ipv6Route::new(network, len)),
                Ok(len) => self.rejected.push(ParamError::invalid(&len_key, &len.to_string())),
                Err(e) => self.rejected.push(e),
            }
        }
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn reason_tags() {
        assert_eq!(Reason::from("pre-init"), Reason::PreInit);
        assert_eq!(Reason::from("connect"), Reason::Connect);
        assert_eq!(Reason::from("disconnect"), Reason::Disconnect);
        assert_eq!(Reason::from("reconnect"), Reason::Other("reconnect".into()));
        assert_eq!(Reason::from("reconnect").to_string(), "reconnect");
    }

    #[test]
    fn reason_serializes_as_its_tag() {
        assert_eq!(serde_json::to_value(Reason::PreInit).unwrap(), "pre-init");
        assert_eq!(
            serde_json::to_value(Reason::from("attempt-reconnect")).unwrap(),
            "attempt-reconnect"
        );
    }

    #[test]
    fn mask_conversions() {
        assert_eq!(mask_to_prefix(Ipv4Addr::new(255, 255, 255, 0)), 24);
        assert_eq!(mask_to_prefix(Ipv4Addr::new(255, 240, 0, 0)), 12);
        assert_eq!(mask_to_prefix(Ipv4Addr::UNSPECIFIED), 0);
        assert_eq!(prefix_to_mask(0), Ipv4Addr::UNSPECIFIED);
        assert_eq!(prefix_to_mask(1), Ipv4Addr::new(128, 0, 0, 0));
        assert_eq!(prefix_to_mask(32), Ipv4Addr::BROADCAST);
    }

    #[test]
    fn missing_tunnel_index_is_rejected() {
        let err = ConnectionParameters::from_vars(&vars(&[("TUNDEV", "tun0")])).unwrap_err();
        assert_eq!(err, ParamError::Missing("TUNIDX".into()));
    }

    #[test]
    fn minimal_bundle_uses_defaults() {
        let params = ConnectionParameters::from_vars(&vars(&[("TUNIDX", "7")])).unwrap();
        assert_eq!(params, ConnectionParameters::for_tunnel(7));
        assert_eq!(params.internal_ip4_netmask, DEFAULT_IP4_NETMASK);
    }

    #[test]
    fn full_bundle() {
        let params = ConnectionParameters::from_vars(&vars(&[
            ("TUNDEV", "oc-tun"),
            ("TUNIDX", "12"),
            ("VPNGATEWAY", "203.0.113.9"),
            ("INTERNAL_IP4_ADDRESS", "10.1.2.3"),
            ("INTERNAL_IP4_NETMASK", "255.255.255.0"),
            ("INTERNAL_IP4_MTU", "1400"),
            ("INTERNAL_IP4_DNS", "10.0.0.53 fd00::53"),
            ("INTERNAL_IP6_DNS", "fd00::53 fd00::54"),
            ("INTERNAL_IP4_NBNS", "10.0.0.137"),
            ("INTERNAL_IP6_ADDRESS", "fd00::1234/64"),
            ("INTERNAL_IP6_NETMASK", "fd00::/64"),
            ("CISCO_SPLIT_INC", "2"),
            ("CISCO_SPLIT_INC_0_ADDR", "10.0.0.0"),
            ("CISCO_SPLIT_INC_0_MASK", "255.0.0.0"),
            ("CISCO_SPLIT_INC_0_MASKLEN", "8"),
            ("CISCO_SPLIT_INC_1_ADDR", "172.16.0.0"),
            ("CISCO_SPLIT_INC_1_MASKLEN", "12"),
            ("CISCO_IPV6_SPLIT_INC", "1"),
            ("CISCO_IPV6_SPLIT_INC_0_ADDR", "fd01::"),
            ("CISCO_IPV6_SPLIT_INC_0_MASKLEN", "48"),
            ("CISCO_BANNER", "Welcome"),
        ]))
        .unwrap();

        assert_eq!(params.interface_label(), "\"oc-tun\" / 12");
        assert_eq!(params.vpn_gateway, Some("203.0.113.9".parse().unwrap()));
        assert_eq!(params.mtu, Some(1400));
        assert_eq!(params.internal_ip6_address, Some("fd00::1234".parse().unwrap()));
        assert_eq!(params.internal_ip6_netmask.unwrap().to_string(), "fd00::/64");
        let dns: Vec<String> = params.dns_servers.iter().map(|d| d.to_string()).collect();
        assert_eq!(dns, ["10.0.0.53", "fd00::53", "fd00::54"]);
        assert_eq!(params.wins_servers, [Ipv4Addr::new(10, 0, 0, 137)]);
        assert_eq!(params.split_include.len(), 2);
        assert_eq!(params.split_include[0].to_string(), "10.0.0.0/8");
        assert_eq!(params.split_include[1].netmask, Ipv4Addr::new(255, 240, 0, 0));
        assert_eq!(params.ipv6_split_include[0].to_string(), "fd01::/48");
        assert_eq!(params.banner.as_deref(), Some("Welcome"));
    }

    #[test]
    fn malformed_tunnel_index_is_rejected() {
        let err = ConnectionParameters::from_vars(&vars(&[("TUNIDX", "tun0")])).unwrap_err();
        assert_eq!(err, ParamError::invalid("TUNIDX", "tun0"));
    }

    #[test]
    fn split_entry_gap_keeps_earlier_entries() {
        let params = ConnectionParameters::from_vars(&vars(&[
            ("TUNIDX", "3"),
            ("CISCO_SPLIT_EXC", "2"),
            ("CISCO_SPLIT_EXC_0_ADDR", "192.168.1.0"),
            ("CISCO_SPLIT_EXC_0_MASK", "255.255.255.0"),
        ]))
        .unwrap();
        assert_eq!(params.split_exclude, [Ipv4Route::new(
            Ipv4Addr::new(192, 168, 1, 0),
            Ipv4Addr::new(255, 255, 255, 0),
        )]);
        assert_eq!(params.rejected, [ParamError::Missing("CISCO_SPLIT_EXC_1_ADDR".into())]);
    }

    #[test]
    fn split_entry_without_mask_is_skipped() {
        let params = ConnectionParameters::from_vars(&vars(&[
            ("TUNIDX", "3"),
            ("CISCO_SPLIT_EXC", "2"),
            ("CISCO_SPLIT_EXC_0_ADDR", "192.168.1.0"),
            ("CISCO_SPLIT_EXC_1_ADDR", "172.16.0.0"),
            ("CISCO_SPLIT_EXC_1_MASKLEN", "12"),
        ]))
        .unwrap();
        assert_eq!(params.split_exclude.len(), 1);
        assert_eq!(params.split_exclude[0].to_string(), "172.16.0.0/12");
        assert_eq!(params.rejected, [ParamError::Missing("CISCO_SPLIT_EXC_0_MASK".into())]);
    }

    #[test]
    fn malformed_entries_are_dropped_and_listed() {
        let params = ConnectionParameters::from_vars(&vars(&[
            ("TUNIDX", "3"),
            ("INTERNAL_IP4_ADDRESS", "10.1.2"),
            ("INTERNAL_IP4_NETMASK", "255.255.255.0"),
            ("INTERNAL_IP4_DNS", "10.0.0.53 corp.example"),
            ("INTERNAL_IP6_ADDRESS", "not-an-address"),
        ]))
        .unwrap();
        assert_eq!(params.internal_ip4_address, None);
        assert_eq!(params.internal_ip4_netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(params.dns_servers, [IpAddr::V4(Ipv4Addr::new(10, 0, 0, 53))]);
        assert_eq!(params.internal_ip6_address, None);
        assert_eq!(
            params.rejected,
            [
                ParamError::invalid("INTERNAL_IP6_ADDRESS", "not-an-address"),
                ParamError::invalid("INTERNAL_IP4_DNS", "corp.example"),
                ParamError::invalid("INTERNAL_IP4_ADDRESS", "10.1.2"),
            ]
        );
    }

    #[test]
    fn zero_split_count_means_no_list() {
        let params = ConnectionParameters::from_vars(&vars(&[
            ("TUNIDX", "3"),
            ("CISCO_SPLIT_INC", "0"),
        ]))
        .unwrap();
        assert!(params.split_include.is_empty());
        assert!(params.rejected.is_empty());
    }

    #[test]
    fn empty_values_count_as_absent() {
        let params = ConnectionParameters::from_vars(&vars(&[
            ("TUNIDX", "3"),
            ("INTERNAL_IP4_MTU", ""),
            ("CISCO_SPLIT_INC", " "),
        ]))
        .unwrap();
        assert_eq!(params.mtu, None);
        assert!(params.split_include.is_empty());
    }
}
