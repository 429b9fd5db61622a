/*!
Configuration planner

Turns a connection parameter bundle plus the pre-existing gateways into the
ordered list of steps for one phase:
- `plan_connect`: MTU, VPN gateway host route, addresses, WINS, DNS,
  internal routes, split-exclude routes, IPv6
- `plan_disconnect`: the matching removals

Planning never touches the system. Steps are executed in order by the
dispatcher.
*/

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::action::{ConfigurationAction, IpFamily};
use crate::gateway::{GatewaySnapshot, Ipv6Gateway};
use crate::logging::LogLevel;
use crate::params::{ConnectionParameters, Ipv4Route, Ipv6Route};
use crate::{DEFAULT_ROUTE_METRIC, IPV6_GLOBAL_UNICAST, TUNNEL_IPV6_NEXT_HOP};

/// How unmatched traffic is sent into the tunnel when there is no split-include list.
/// Fixed per deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedirectMethod {
    /// Address is assigned with a gateway; the OS installs the default route
    #[default]
    InterfaceGateway,
    /// Explicit `0.0.0.0/0` route at metric 1
    LowMetricDefault,
    /// `0.0.0.0/1` + `128.0.0.0/1`, leaving the real default route in place
    SplitDefaultPair,
}

/// One planned step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Log(LogLevel, String),
    Apply(ConfigurationAction),
    /// Required parameter missing; recorded as a failure, the phase goes on
    Violation(String),
}

/// Ordered steps for one phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    fn info(&mut self, message: impl Into<String>) {
        self.steps.push(Step::Log(LogLevel::Info, message.into()));
    }

    fn debug(&mut self, message: impl Into<String>) {
        self.steps.push(Step::Log(LogLevel::Debug, message.into()));
    }

    fn apply(&mut self, action: ConfigurationAction) {
        self.steps.push(Step::Apply(action));
    }

    fn violation(&mut self, message: impl Into<String>) {
        self.steps.push(Step::Violation(message.into()));
    }

    /// Only the actions, in execution order
    pub fn actions(&self) -> impl Iterator<Item = &ConfigurationAction> {
        self.steps.iter().filter_map(|step| match step {
            Step::Apply(action) => Some(action),
            _ => None,
        })
    }

    pub fn violations(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|step| match step {
            Step::Violation(message) => Some(message.as_str()),
            _ => None,
        })
    }
}

fn host_route4(addr: Ipv4Addr) -> Ipv4Route {
    Ipv4Route::new(addr, Ipv4Addr::BROADCAST)
}

fn host_route6(addr: Ipv6Addr) -> Ipv6Route {
    Ipv6Route::new(addr, 128)
}

/// Default-route replacement for `method` via `gateway`, if it needs explicit routes
fn redirect_routes(method: RedirectMethod, gateway: Ipv4Addr) -> Vec<ConfigurationAction> {
    let route = |network: [u8; 4], mask: [u8; 4], metric| ConfigurationAction::AddRoute4 {
        destination: Ipv4Route::new(Ipv4Addr::from(network), Ipv4Addr::from(mask)),
        gateway,
        interface: None,
        metric,
    };
    match method {
        RedirectMethod::InterfaceGateway => Vec::new(),
        RedirectMethod::LowMetricDefault => {
            vec![route([0, 0, 0, 0], [0, 0, 0, 0], Some(DEFAULT_ROUTE_METRIC))]
        }
        RedirectMethod::SplitDefaultPair => vec![
            route([0, 0, 0, 0], [128, 0, 0, 0], None),
            route([128, 0, 0, 0], [128, 0, 0, 0], None),
        ],
    }
}

/// Routes that send internal networks into the tunnel
fn internal_routes4(
    params: &ConnectionParameters,
    method: RedirectMethod,
    gateway: Ipv4Addr,
) -> Vec<ConfigurationAction> {
    if params.split_include.is_empty() {
        return redirect_routes(method, gateway);
    }
    params
        .split_include
        .iter()
        .map(|route| ConfigurationAction::AddRoute4 {
            destination: *route,
            gateway,
            interface: Some(params.tunnel_index),
            metric: None,
        })
        .collect()
}

/// IPv6 routes on the tunnel, besides the VPN gateway host route
fn internal_routes6(params: &ConnectionParameters) -> Vec<ConfigurationAction> {
    let interface = params.tunnel_index;
    let mut routes = Vec::new();

    if let Some(netmask) = params.internal_ip6_netmask.filter(|n| !n.is_host()) {
        routes.push(ConfigurationAction::AddRoute6 {
            destination: netmask,
            interface,
            next_hop: None,
        });
    }

    if params.ipv6_split_include.is_empty() {
        // The virtual adapter answers on this link-local next hop
        routes.push(ConfigurationAction::AddRoute6 {
            destination: IPV6_GLOBAL_UNICAST,
            interface,
            next_hop: Some(TUNNEL_IPV6_NEXT_HOP),
        });
    } else {
        routes.extend(
            params
                .ipv6_split_include
                .iter()
                .map(|route| ConfigurationAction::AddRoute6 {
                    destination: *route,
                    interface,
                    next_hop: None,
                }),
        );
    }
    routes
}

fn note_ipv6_split_exclude(plan: &mut Plan, params: &ConnectionParameters) {
    if !params.ipv6_split_exclude.is_empty() {
        let nets: Vec<String> = params
            .ipv6_split_exclude
            .iter()
            .map(|r| r.to_string())
            .collect();
        plan.debug(format!(
            "IPv6 split-exclude routes are not applied: {}",
            nets.join(" ")
        ));
    }
}

/// Unreadable bundle entries fail the phase without stopping it
fn note_rejected(plan: &mut Plan, params: &ConnectionParameters) {
    for err in &params.rejected {
        plan.violation(format!("Ignoring connection parameter: {err}"));
    }
}

fn display_or_empty<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Steps for the `connect` event
pub fn plan_connect(
    params: &ConnectionParameters,
    gateways: &GatewaySnapshot,
    method: RedirectMethod,
) -> Plan {
    let mut plan = Plan::default();
    let tunidx = params.tunnel_index;
    let label = params.interface_label();
    let internal_gw = params.internal_ip4_address;
    let has_split_include = !params.split_include.is_empty();

    note_rejected(&mut plan, params);

    plan.info(format!("Legacy IP Internet gateway: {}", display_or_empty(gateways.ipv4)));
    plan.info(format!("IPv6 Internet gateway     : {}", display_or_empty(gateways.ipv6)));
    plan.info(format!("VPN Interface Identifiers : {label}"));
    plan.info(format!("Public VPN Gateway Address: {}", display_or_empty(params.vpn_gateway)));
    plan.info(format!("Internal Legacy IP Address: {}", display_or_empty(internal_gw)));
    plan.info(format!("Internal Legacy IP Netmask: {}", params.internal_ip4_netmask));

    if let Some(mtu) = params.mtu {
        plan.info(format!("MTU: {mtu}"));
        plan.apply(ConfigurationAction::SetMtu {
            family: IpFamily::V4,
            interface: tunidx,
            mtu,
        });
        if params.internal_ip6_address.is_some() {
            plan.apply(ConfigurationAction::SetMtu {
                family: IpFamily::V6,
                interface: tunidx,
                mtu,
            });
        }
    }

    // Keep the tunnel's own packets off the routes installed below
    match params.vpn_gateway {
        Some(IpAddr::V6(vpngw)) => match gateways.ipv6 {
            Some(Ipv6Gateway {
                interface,
                next_hop,
            }) => {
                plan.info(format!("Configuring explicit route to IPv6 VPN gateway {vpngw}"));
                plan.apply(ConfigurationAction::AddRoute6 {
                    destination: host_route6(vpngw),
                    interface,
                    next_hop: Some(next_hop),
                });
            }
            None => plan.info(format!(
                "No IPv6 default route found, not adding explicit route to VPN gateway {vpngw}"
            )),
        },
        Some(IpAddr::V4(vpngw)) => match gateways.ipv4 {
            Some(gw4) => {
                plan.info(format!("Configuring explicit route to IPv4 VPN gateway {vpngw}"));
                plan.apply(ConfigurationAction::AddRoute4 {
                    destination: host_route4(vpngw),
                    gateway: gw4,
                    interface: None,
                    metric: None,
                });
            }
            None => plan.info(format!(
                "No Legacy IP default gateway found, not adding explicit route to VPN gateway {vpngw}"
            )),
        },
        None => plan.violation("VPNGATEWAY is missing, no explicit route to the VPN gateway"),
    }
    plan.info("done.");

    plan.info(format!("Configuring {label} interface for Legacy IP..."));

    // A metric-1 route needs a metric-1 interface
    if !has_split_include && method != RedirectMethod::SplitDefaultPair {
        plan.apply(ConfigurationAction::SetInterfaceMetric {
            interface: tunidx,
            metric: DEFAULT_ROUTE_METRIC,
        });
    }

    match internal_gw {
        Some(address) => {
            let gateway = if has_split_include || method != RedirectMethod::InterfaceGateway {
                None
            } else {
                Some(address)
            };
            plan.apply(ConfigurationAction::SetAddress4 {
                interface: tunidx,
                address,
                netmask: params.internal_ip4_netmask,
                gateway,
            });
        }
        None => plan.violation(
            "INTERNAL_IP4_ADDRESS is missing, Legacy IP address and internal routes are not configured",
        ),
    }

    plan.apply(ConfigurationAction::ClearWins { interface: tunidx });
    for server in &params.wins_servers {
        plan.apply(ConfigurationAction::AddWins {
            interface: tunidx,
            server: *server,
        });
    }
    if !params.wins_servers.is_empty() {
        let list: Vec<String> = params.wins_servers.iter().map(|s| s.to_string()).collect();
        plan.info(format!(
            "Configured {} WINS servers: {}",
            list.len(),
            list.join(" ")
        ));
    }

    plan.apply(ConfigurationAction::ClearDns {
        family: IpFamily::V4,
        interface: tunidx,
    });
    plan.apply(ConfigurationAction::ClearDns {
        family: IpFamily::V6,
        interface: tunidx,
    });
    for server in &params.dns_servers {
        plan.apply(ConfigurationAction::AddDns {
            interface: tunidx,
            server: *server,
        });
    }
    if !params.dns_servers.is_empty() {
        let list: Vec<String> = params.dns_servers.iter().map(|s| s.to_string()).collect();
        plan.info(format!(
            "Configured {} DNS servers: {}",
            list.len(),
            list.join(" ")
        ));
    }
    plan.info("done.");

    plan.info("Configuring Legacy IP networks:");
    if let Some(gateway) = internal_gw {
        for action in internal_routes4(params, method, gateway) {
            let destination = match &action {
                ConfigurationAction::AddRoute4 { destination, .. } => Some(*destination),
                _ => None,
            };
            plan.apply(action);
            if let (true, Some(destination)) = (has_split_include, destination) {
                plan.info(format!("Configured Legacy IP split-include route: {destination}"));
            }
        }
        match (has_split_include, method) {
            (false, RedirectMethod::LowMetricDefault) => {
                plan.info("Configured Legacy IP default route.")
            }
            (false, RedirectMethod::SplitDefaultPair) => {
                plan.info("Configured Legacy IP default route pair (0.0.0.0/1, 128.0.0.0/1)")
            }
            _ => {}
        }
    }

    if !params.split_exclude.is_empty() {
        match gateways.ipv4 {
            Some(gw4) => {
                for route in &params.split_exclude {
                    plan.apply(ConfigurationAction::AddRoute4 {
                        destination: *route,
                        gateway: gw4,
                        interface: None,
                        metric: None,
                    });
                    plan.info(format!("Configured Legacy IP split-exclude route: {route}"));
                }
            }
            None => plan.info(
                "No Legacy IP default gateway found, split-exclude routes are not configured",
            ),
        }
    }
    plan.info("Legacy IP route configuration done.");

    if let Some(address) = params.internal_ip6_address {
        plan.info(format!("Configuring {label} interface for IPv6..."));
        plan.apply(ConfigurationAction::SetAddress6 {
            interface: tunidx,
            address,
        });
        plan.info("done.");

        plan.info("Configuring IPv6 networks:");
        if params.ipv6_split_include.is_empty() {
            plan.info("Setting default IPv6 route through VPN.");
        }
        for action in internal_routes6(params) {
            if let ConfigurationAction::AddRoute6 { destination, .. } = &action {
                if params.ipv6_split_include.contains(destination) {
                    plan.info(format!("Configured IPv6 split-include route: {destination}"));
                }
            }
            plan.apply(action);
        }
        note_ipv6_split_exclude(&mut plan, params);
        plan.info("IPv6 route configuration done.");
    }

    plan
}

/// Steps for the `disconnect` event.
///
/// `current_ipv6` is the IPv6 default gateway as queried now, not at connect
/// time; the host route to an IPv6 VPN gateway is removed through it.
pub fn plan_disconnect(
    params: &ConnectionParameters,
    current_ipv6: Option<Ipv6Gateway>,
    method: RedirectMethod,
) -> Plan {
    let mut plan = Plan::default();
    let tunidx = params.tunnel_index;

    note_rejected(&mut plan, params);
    plan.info(format!("Deconfiguring {} interface...", params.interface_label()));

    match params.vpn_gateway {
        Some(IpAddr::V6(vpngw)) => match current_ipv6 {
            Some(Ipv6Gateway {
                interface,
                next_hop,
            }) => {
                plan.info(format!("Removing explicit route to IPv6 VPN gateway {vpngw}"));
                plan.apply(ConfigurationAction::DeleteRoute6 {
                    destination: host_route6(vpngw),
                    interface,
                    next_hop: Some(next_hop),
                });
            }
            None => plan.info(format!(
                "No IPv6 default route found, not removing explicit route to VPN gateway {vpngw}"
            )),
        },
        Some(IpAddr::V4(vpngw)) => {
            plan.info(format!("Removing explicit route to IPv4 VPN gateway {vpngw}"));
            plan.apply(ConfigurationAction::DeleteRoute4 {
                destination: host_route4(vpngw),
                gateway: None,
            });
        }
        None => plan.violation("VPNGATEWAY is missing, explicit route to the VPN gateway not removed"),
    }

    // Routes through the internal gateway go before the address they depend on
    if let Some(gateway) = params.internal_ip4_address {
        let removals: Vec<_> = internal_routes4(params, method, gateway)
            .iter()
            .filter_map(ConfigurationAction::inverse)
            .collect();
        if !removals.is_empty() {
            plan.info("Removing Legacy IP internal routes");
        }
        for action in removals {
            plan.apply(action);
        }
    }

    let has_ipv6 = params.internal_ip6_address.is_some();
    plan.info(format!(
        "Removing{} Legacy IP addresses",
        if has_ipv6 { " IPv6 and" } else { "" }
    ));
    match params.internal_ip4_address {
        Some(address) => plan.apply(ConfigurationAction::DeleteAddress4 {
            interface: tunidx,
            address,
        }),
        None => plan.violation("INTERNAL_IP4_ADDRESS is missing, Legacy IP address not removed"),
    }
    if let Some(address) = params.internal_ip6_address {
        plan.apply(ConfigurationAction::DeleteAddress6 {
            interface: tunidx,
            address,
        });
    }

    if has_ipv6 {
        if params.ipv6_split_include.is_empty() {
            plan.info("Removing default IPv6 route through VPN.");
        } else {
            plan.info("Removing IPv6 split-include routes");
        }
        for action in internal_routes6(params).iter().filter_map(ConfigurationAction::inverse) {
            plan.apply(action);
        }
    }

    if !params.split_exclude.is_empty() {
        plan.info("Removing Legacy IP split-exclude routes");
        for route in &params.split_exclude {
            plan.apply(ConfigurationAction::DeleteRoute4 {
                destination: *route,
                gateway: None,
            });
        }
    }
    note_ipv6_split_exclude(&mut plan, params);

    plan.info("done.");
    plan
}
