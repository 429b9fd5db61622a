/*!
Gateway discovery

Reads the pre-existing default routes before anything is changed:
- Legacy IP: first default gateway in `route print`
- IPv6: interface index and next hop of the `::/0` entry in
  `netsh interface ipv6 show route`

Nothing found is not an error; callers get `None` and pick another path.
*/

use serde::Serialize;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::executor::{Executor, OsCommand};
use crate::session::OutcomeKind;

/// IPv6 default route: where it leaves and which router it points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ipv6Gateway {
    pub interface: u32,
    pub next_hop: Ipv6Addr,
}

impl fmt::Display for Ipv6Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.interface, self.next_hop)
    }
}

/// Default routes as they were before this event touched anything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewaySnapshot {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Gateway>,
}

impl GatewaySnapshot {
    /// Query both route tables
    pub fn capture(exec: &mut Executor<'_>) -> Self {
        Self {
            ipv4: snapshot_ipv4(exec),
            ipv6: snapshot_ipv6(exec),
        }
    }
}

pub fn snapshot_ipv4(exec: &mut Executor<'_>) -> Option<Ipv4Addr> {
    let table = exec.run(OutcomeKind::Query, &OsCommand::new("route").arg("print"));
    parse_ipv4_default_gateway(&table)
}

pub fn snapshot_ipv6(exec: &mut Executor<'_>) -> Option<Ipv6Gateway> {
    let table = exec.run(
        OutcomeKind::Query,
        &OsCommand::new("netsh").args(["interface", "ipv6", "show", "route"]),
    );
    parse_ipv6_default_gateway(&table)
}

/// First `0.0.0.0` entry with a `0.0.0.0` or `128.0.0.0` mask, or the
/// upper half of a split default pair
pub fn parse_ipv4_default_gateway(table: &str) -> Option<Ipv4Addr> {
    table.lines().find_map(|line| {
        let mut cols = line.split_whitespace();
        let dest = cols.next()?;
        let mask = cols.next()?;
        let is_default = matches!(
            (dest, mask),
            ("0.0.0.0", "0.0.0.0") | ("0.0.0.0", "128.0.0.0") | ("128.0.0.0", "128.0.0.0")
        );
        if !is_default {
            return None;
        }
        // On-link entries have no gateway address
        cols.next()?.parse().ok()
    })
}

/// The `::/0` row: `Publish Type Met Prefix Idx Gateway/Interface`
pub fn parse_ipv6_default_gateway(table: &str) -> Option<Ipv6Gateway> {
    table.lines().find_map(|line| {
        let mut cols = line.split_whitespace().skip_while(|c| *c != "::/0");
        cols.next()?;
        let interface = cols.next()?.parse().ok()?;
        let next_hop = cols.next()?.parse().ok()?;
        Some(Ipv6Gateway {
            interface,
            next_hop,
        })
    })
}
