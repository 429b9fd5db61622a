/*!
tunconf - routing, address and DNS configuration for VPN tunnel interfaces

Invoked by the VPN client on every tunnel lifecycle event, this library
reconciles the host configuration with what the VPN handshake delivered:
- interface addresses and MTU
- explicit route to the VPN gateway and internal/split routes
- DNS and WINS resolver lists
- the matching cleanup on disconnect
*/

use std::net::Ipv6Addr;

pub mod action;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod logging;
pub mod params;
pub mod planner;
pub mod session;

pub use action::{ActionKind, ConfigurationAction, IpFamily};
pub use dispatcher::Dispatcher;
pub use error::{LogError, ParamError};
pub use executor::{CommandOutput, CommandRunner, DryRunRunner, Executor, OsCommand, SystemRunner};
pub use gateway::{GatewaySnapshot, Ipv6Gateway};
pub use logging::{LogDestination, LogLevel, LogSettings};
pub use params::{ConnectionParameters, Ipv4Route, Ipv6Route, Reason};
pub use planner::{plan_connect, plan_disconnect, Plan, RedirectMethod, Step};
pub use session::{ActionOutcome, OutcomeKind, SessionResult};

/// tunconf version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Metric for the tunnel interface and the routes that must win over the real default route
pub const DEFAULT_ROUTE_METRIC: u32 = 1;

/// Link-local next hop the virtual tunnel adapter answers on
pub const TUNNEL_IPV6_NEXT_HOP: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 8);

/// Global unicast space, routed through the tunnel when there is no IPv6 split-include list
pub const IPV6_GLOBAL_UNICAST: Ipv6Route = Ipv6Route {
    network: Ipv6Addr::new(0x2000, 0, 0, 0, 0, 0, 0, 0),
    prefix_len: 3,
};
