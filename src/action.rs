/*!
Configuration actions

One variant per OS-level mutation the engine performs on the tunnel
interface. Each action carries already-typed arguments and is turned into
a `netsh` / `route` command line only when it reaches the executor.
*/

use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::executor::OsCommand;
use crate::params::{Ipv4Route, Ipv6Route};
use crate::DEFAULT_ROUTE_METRIC;

/// Address family selector for the `netsh interface <family>` context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    fn netsh_context(self) -> &'static str {
        match self {
            IpFamily::V4 => "ipv4",
            IpFamily::V6 => "ipv6",
        }
    }
}

/// Coarse classification, used for reports and connect/disconnect pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    SetMtu,
    SetMetric,
    SetAddress,
    DeleteAddress,
    AddRoute,
    DeleteRoute,
    ClearWins,
    AddWins,
    ClearDns,
    AddDns,
}

/// A single mutation of the host network configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ConfigurationAction {
    SetMtu {
        family: IpFamily,
        interface: u32,
        mtu: u32,
    },
    SetInterfaceMetric {
        interface: u32,
        metric: u32,
    },
    /// Static Legacy IP address; with a gateway the OS installs the default route itself
    SetAddress4 {
        interface: u32,
        address: Ipv4Addr,
        netmask: Ipv4Addr,
        gateway: Option<Ipv4Addr>,
    },
    /// Also drops any gateway installed with the address
    DeleteAddress4 {
        interface: u32,
        address: Ipv4Addr,
    },
    SetAddress6 {
        interface: u32,
        address: Ipv6Addr,
    },
    DeleteAddress6 {
        interface: u32,
        address: Ipv6Addr,
    },
    AddRoute4 {
        destination: Ipv4Route,
        gateway: Ipv4Addr,
        interface: Option<u32>,
        metric: Option<u32>,
    },
    DeleteRoute4 {
        destination: Ipv4Route,
        gateway: Option<Ipv4Addr>,
    },
    AddRoute6 {
        destination: Ipv6Route,
        interface: u32,
        next_hop: Option<Ipv6Addr>,
    },
    DeleteRoute6 {
        destination: Ipv6Route,
        interface: u32,
        next_hop: Option<Ipv6Addr>,
    },
    ClearWins {
        interface: u32,
    },
    AddWins {
        interface: u32,
        server: Ipv4Addr,
    },
    ClearDns {
        family: IpFamily,
        interface: u32,
    },
    AddDns {
        interface: u32,
        server: IpAddr,
    },
}

impl ConfigurationAction {
    pub fn kind(&self) -> ActionKind {
        use ConfigurationAction::*;
        match self {
            SetMtu { .. } => ActionKind::SetMtu,
            SetInterfaceMetric { .. } => ActionKind::SetMetric,
            SetAddress4 { .. } | SetAddress6 { .. } => ActionKind::SetAddress,
            DeleteAddress4 { .. } | DeleteAddress6 { .. } => ActionKind::DeleteAddress,
            AddRoute4 { .. } | AddRoute6 { .. } => ActionKind::AddRoute,
            DeleteRoute4 { .. } | DeleteRoute6 { .. } => ActionKind::DeleteRoute,
            ClearWins { .. } => ActionKind::ClearWins,
            AddWins { .. } => ActionKind::AddWins,
            ClearDns { .. } => ActionKind::ClearDns,
            AddDns { .. } => ActionKind::AddDns,
        }
    }

    /// Interface the action is bound to, if the command names one
    pub fn interface(&self) -> Option<u32> {
        use ConfigurationAction::*;
        match self {
            SetMtu { interface, .. }
            | SetInterfaceMetric { interface, .. }
            | SetAddress4 { interface, .. }
            | DeleteAddress4 { interface, .. }
            | SetAddress6 { interface, .. }
            | DeleteAddress6 { interface, .. }
            | AddRoute6 { interface, .. }
            | DeleteRoute6 { interface, .. }
            | ClearWins { interface }
            | AddWins { interface, .. }
            | ClearDns { interface, .. }
            | AddDns { interface, .. } => Some(*interface),
            AddRoute4 { interface, .. } => *interface,
            DeleteRoute4 { .. } => None,
        }
    }

    /// The action that undoes this one, for addresses and routes
    pub fn inverse(&self) -> Option<ConfigurationAction> {
        use ConfigurationAction::*;
        match *self {
            SetAddress4 {
                interface, address, ..
            } => Some(DeleteAddress4 { interface, address }),
            SetAddress6 { interface, address } => Some(DeleteAddress6 { interface, address }),
            AddRoute4 {
                destination,
                gateway,
                ..
            } => Some(DeleteRoute4 {
                destination,
                gateway: Some(gateway),
            }),
            AddRoute6 {
                destination,
                interface,
                next_hop,
            } => Some(DeleteRoute6 {
                destination,
                interface,
                next_hop,
            }),
            _ => None,
        }
    }

    /// Render the platform command line
    pub fn to_command(&self) -> OsCommand {
        use ConfigurationAction::*;
        match self {
            SetMtu {
                family,
                interface,
                mtu,
            } => netsh(family.netsh_context())
                .args(["set", "subinterface"])
                .arg(interface)
                .arg(format!("mtu={mtu}"))
                .arg("store=active"),
            SetInterfaceMetric { interface, metric } => netsh("ip")
                .args(["set", "interface"])
                .arg(interface)
                .arg(format!("metric={metric}"))
                .arg("store=active"),
            SetAddress4 {
                interface,
                address,
                netmask,
                gateway,
            } => {
                let cmd = netsh("ip")
                    .args(["set", "address"])
                    .arg(interface)
                    .arg("static")
                    .arg(address)
                    .arg(netmask);
                match gateway {
                    Some(gw) => cmd
                        .arg(gw)
                        .arg(format!("gwmetric={DEFAULT_ROUTE_METRIC}"))
                        .arg("store=active"),
                    None => cmd.arg("store=active"),
                }
            }
            DeleteAddress4 { interface, address } => netsh("ipv4")
                .args(["delete", "address"])
                .arg(interface)
                .arg(address)
                .arg("gateway=all"),
            SetAddress6 { interface, address } => netsh("ipv6")
                .args(["set", "address"])
                .arg(interface)
                .arg(address)
                .arg("store=active"),
            DeleteAddress6 { interface, address } => netsh("ipv6")
                .args(["delete", "address"])
                .arg(interface)
                .arg(address)
                .arg("store=active"),
            AddRoute4 {
                destination,
                gateway,
                interface,
                metric,
            } => {
                let mut cmd = OsCommand::new("route")
                    .arg("add")
                    .arg(destination.network)
                    .arg("mask")
                    .arg(destination.netmask)
                    .arg(gateway);
                if let Some(metric) = metric {
                    cmd = cmd.arg("metric").arg(metric);
                }
                if let Some(interface) = interface {
                    cmd = cmd.arg("if").arg(interface);
                }
                cmd
            }
            DeleteRoute4 {
                destination,
                gateway,
            } => {
                let cmd = OsCommand::new("route")
                    .arg("delete")
                    .arg(destination.network)
                    .arg("mask")
                    .arg(destination.netmask);
                match gateway {
                    Some(gw) => cmd.arg(gw),
                    None => cmd,
                }
            }
            AddRoute6 {
                destination,
                interface,
                next_hop,
            } => {
                let cmd = netsh("ipv6")
                    .args(["add", "route"])
                    .arg(destination)
                    .arg(interface);
                match next_hop {
                    Some(hop) => cmd.arg(hop).arg("store=active"),
                    None => cmd.arg("store=active"),
                }
            }
            DeleteRoute6 {
                destination,
                interface,
                next_hop,
            } => {
                let cmd = netsh("ipv6")
                    .args(["delete", "route"])
                    .arg(destination)
                    .arg(interface);
                match next_hop {
                    Some(hop) => cmd.arg(hop),
                    None => cmd,
                }
            }
            ClearWins { interface } => netsh("ipv4")
                .args(["delete", "winsservers"])
                .arg(interface)
                .arg("all"),
            AddWins { interface, server } => netsh("ipv4")
                .args(["add", "winsservers"])
                .arg(interface)
                .arg(server),
            ClearDns { family, interface } => netsh(family.netsh_context())
                .args(["delete", "dnsservers"])
                .arg(interface)
                .arg("all"),
            // validate=no: probing the server before the tunnel is up only times out
            AddDns { interface, server } => netsh(IpFamily::of(server).netsh_context())
                .args(["add", "dnsservers"])
                .arg(interface)
                .arg(server)
                .arg("validate=no"),
        }
    }
}

impl fmt::Display for ConfigurationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_command())
    }
}

fn netsh(context: &str) -> OsCommand {
    OsCommand::new("netsh").arg("interface").arg(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route4(net: [u8; 4], mask: [u8; 4]) -> Ipv4Route {
        Ipv4Route::new(Ipv4Addr::from(net), Ipv4Addr::from(mask))
    }

    #[test]
    fn address_with_interface_gateway() {
        let action = ConfigurationAction::SetAddress4 {
            interface: 12,
            address: Ipv4Addr::new(10, 1, 2, 3),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Some(Ipv4Addr::new(10, 1, 2, 3)),
        };
        assert_eq!(
            action.to_string(),
            "netsh interface ip set address 12 static 10.1.2.3 255.255.255.0 10.1.2.3 gwmetric=1 store=active"
        );
    }

    #[test]
    fn routes_render_in_route_syntax() {
        let add = ConfigurationAction::AddRoute4 {
            destination: route4([10, 0, 0, 0], [255, 0, 0, 0]),
            gateway: Ipv4Addr::new(10, 1, 2, 3),
            interface: Some(12),
            metric: None,
        };
        assert_eq!(add.to_string(), "route add 10.0.0.0 mask 255.0.0.0 10.1.2.3 if 12");

        let default = ConfigurationAction::AddRoute4 {
            destination: route4([0, 0, 0, 0], [0, 0, 0, 0]),
            gateway: Ipv4Addr::new(10, 1, 2, 3),
            interface: None,
            metric: Some(1),
        };
        assert_eq!(default.to_string(), "route add 0.0.0.0 mask 0.0.0.0 10.1.2.3 metric 1");

        let delete = ConfigurationAction::DeleteRoute4 {
            destination: route4([192, 168, 1, 0], [255, 255, 255, 0]),
            gateway: None,
        };
        assert_eq!(delete.to_string(), "route delete 192.168.1.0 mask 255.255.255.0");
    }

    #[test]
    fn dns_family_follows_server_address() {
        let v4 = ConfigurationAction::AddDns {
            interface: 4,
            server: "10.0.0.53".parse().unwrap(),
        };
        let v6 = ConfigurationAction::AddDns {
            interface: 4,
            server: "fd00::53".parse().unwrap(),
        };
        assert_eq!(v4.to_string(), "netsh interface ipv4 add dnsservers 4 10.0.0.53 validate=no");
        assert_eq!(v6.to_string(), "netsh interface ipv6 add dnsservers 4 fd00::53 validate=no");
    }

    #[test]
    fn inverse_of_routes_and_addresses() {
        let add = ConfigurationAction::AddRoute6 {
            destination: crate::IPV6_GLOBAL_UNICAST,
            interface: 9,
            next_hop: Some(crate::TUNNEL_IPV6_NEXT_HOP),
        };
        let undo = add.inverse().unwrap();
        assert_eq!(undo.kind(), ActionKind::DeleteRoute);
        assert_eq!(undo.interface(), Some(9));
        assert_eq!(undo.to_string(), "netsh interface ipv6 delete route 2000::/3 9 fe80::8");

        let set = ConfigurationAction::SetAddress4 {
            interface: 9,
            address: Ipv4Addr::new(10, 1, 2, 3),
            netmask: Ipv4Addr::BROADCAST,
            gateway: None,
        };
        assert_eq!(
            set.inverse().unwrap().to_string(),
            "netsh interface ipv4 delete address 9 10.1.2.3 gateway=all"
        );

        assert!(ConfigurationAction::ClearWins { interface: 9 }.inverse().is_none());
    }
}
