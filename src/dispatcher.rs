/*!
Event dispatcher

Drives one lifecycle event from start to end:
- `pre-init`: no changes, always succeeds
- `connect`: snapshot gateways, plan, execute every step in order
- `disconnect`: re-query the IPv6 gateway, plan removals, execute

No failing step stops the phase; exit codes accumulate in the session.
*/

use crate::executor::{CommandRunner, Executor, OsCommand};
use crate::gateway::{self, GatewaySnapshot};
use crate::params::{ConnectionParameters, Reason};
use crate::planner::{self, Plan, RedirectMethod, Step};
use crate::session::SessionResult;
use std::net::IpAddr;

/// Runs lifecycle events against a command runner
pub struct Dispatcher<'r> {
    runner: &'r mut dyn CommandRunner,
    method: RedirectMethod,
}

impl<'r> Dispatcher<'r> {
    pub fn new(runner: &'r mut dyn CommandRunner, method: RedirectMethod) -> Self {
        Self { runner, method }
    }

    /// Process one event. `params` is required for `connect` and `disconnect`.
    pub fn dispatch(
        &mut self,
        reason: &Reason,
        params: Option<&ConnectionParameters>,
    ) -> SessionResult {
        let method = self.method;
        let mut exec = Executor::new(&mut *self.runner, reason.clone());

        // Known output encoding for the logs
        exec.run_silent(&OsCommand::new("cmd").args(["/C", "chcp 65001"]));

        match (reason, params) {
            (Reason::PreInit, _) => {}
            (Reason::Connect, Some(params)) => connect(&mut exec, params, method),
            (Reason::Disconnect, Some(params)) => disconnect(&mut exec, params, method),
            (Reason::Connect | Reason::Disconnect, None) => {
                exec.violation(&format!("No connection parameters for {reason}, nothing configured"))
            }
            (Reason::Other(tag), _) => log::debug!("Ignoring reason {tag:?}"),
        }

        let session = exec.finish();
        if session.is_success() {
            log::debug!("{} finished", reason);
        } else {
            log::error!(
                "{} finished with status {} ({} failed steps)",
                reason,
                session.status,
                session.failures().count()
            );
        }
        session
    }
}

fn connect(exec: &mut Executor<'_>, params: &ConnectionParameters, method: RedirectMethod) {
    if let Some(banner) = &params.banner {
        log::info!("--------------------- BANNER ---------------------");
        log::info!("{}", banner);
        log::info!("------------------- BANNER end -------------------");
    }

    let gateways = GatewaySnapshot::capture(exec);
    let plan = planner::plan_connect(params, &gateways, method);
    execute(exec, &plan);
}

fn disconnect(exec: &mut Executor<'_>, params: &ConnectionParameters, method: RedirectMethod) {
    // The IPv6 default route may have moved since connect
    let current_ipv6 = match params.vpn_gateway {
        Some(IpAddr::V6(_)) => gateway::snapshot_ipv6(exec),
        _ => None,
    };
    let plan = planner::plan_disconnect(params, current_ipv6, method);
    execute(exec, &plan);
}

fn execute(exec: &mut Executor<'_>, plan: &Plan) {
    for step in &plan.steps {
        match step {
            Step::Log(level, message) => log::log!(log::Level::from(*level), "{}", message),
            Step::Apply(action) => {
                exec.apply(action);
            }
            Step::Violation(message) => exec.violation(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::executor::testing::ScriptedRunner;
    use crate::session::OutcomeKind;
    use std::net::Ipv4Addr;

    const ROUTE_PRINT: &str =
        "          0.0.0.0          0.0.0.0      192.168.1.1     192.168.1.20     25\n";
    const IPV6_ROUTES: &str = "No       Manual    256  ::/0       7  fe80::1\n";

    fn params() -> ConnectionParameters {
        let mut params = ConnectionParameters::for_tunnel(4);
        params.vpn_gateway = Some("203.0.113.9".parse().unwrap());
        params.internal_ip4_address = Some(Ipv4Addr::new(10, 1, 2, 3));
        params
    }

    #[test]
    fn pre_init_changes_nothing() {
        let mut runner = ScriptedRunner::default();
        let session = Dispatcher::new(&mut runner, RedirectMethod::default())
            .dispatch(&Reason::PreInit, None);
        assert!(session.is_success());
        assert!(session.outcomes.is_empty());
        assert!(runner.commands.is_empty());
    }

    #[test]
    fn unknown_reason_is_a_no_op() {
        let mut runner = ScriptedRunner::default();
        let session = Dispatcher::new(&mut runner, RedirectMethod::default())
            .dispatch(&Reason::from("attempt-reconnect"), Some(&params()));
        assert!(session.is_success());
        assert!(runner.commands.is_empty());
    }

    #[test]
    fn connect_snapshots_before_mutating() {
        let mut runner = ScriptedRunner::default()
            .respond("route print", ROUTE_PRINT)
            .respond("netsh interface ipv6 show route", IPV6_ROUTES);
        let session = Dispatcher::new(&mut runner, RedirectMethod::LowMetricDefault)
            .dispatch(&Reason::Connect, Some(&params()));

        assert!(session.is_success());
        assert_eq!(session.outcomes[0].kind, OutcomeKind::Query);
        assert_eq!(session.outcomes[1].kind, OutcomeKind::Query);
        assert_eq!(
            runner.commands[2],
            "route add 203.0.113.9 mask 255.255.255.255 192.168.1.1"
        );
        assert_eq!(runner.silent, ["cmd /C chcp 65001"]);
    }

    #[test]
    fn failures_do_not_abort_the_phase() {
        // Queries get canned answers; the first two actions fail
        let mut runner = ScriptedRunner::default()
            .respond("route print", ROUTE_PRINT)
            .respond("netsh interface ipv6 show route", IPV6_ROUTES)
            .exit_codes(&[1, 2]);
        let session = Dispatcher::new(&mut runner, RedirectMethod::LowMetricDefault)
            .dispatch(&Reason::Connect, Some(&params()));

        assert_eq!(session.status, 3);
        assert_eq!(session.failures().count(), 2);
        let last = session.outcomes.last().unwrap();
        assert_eq!(last.kind, OutcomeKind::Apply(ActionKind::AddRoute));
        assert_eq!(last.command, "route add 0.0.0.0 mask 0.0.0.0 10.1.2.3 metric 1");
    }

    #[test]
    fn disconnect_requeries_ipv6_gateway() {
        let mut runner = ScriptedRunner::default()
            .respond("netsh interface ipv6 show route", IPV6_ROUTES);
        let mut p = params();
        p.vpn_gateway = Some("2001:db8::9".parse().unwrap());
        let session = Dispatcher::new(&mut runner, RedirectMethod::default())
            .dispatch(&Reason::Disconnect, Some(&p));

        assert!(session.is_success());
        assert_eq!(
            runner.commands[..2],
            [
                "netsh interface ipv6 show route".to_string(),
                "netsh interface ipv6 delete route 2001:db8::9/128 7 fe80::1".to_string(),
            ]
        );
    }

    #[test]
    fn disconnect_ipv4_gateway_does_not_query() {
        let mut runner = ScriptedRunner::default();
        Dispatcher::new(&mut runner, RedirectMethod::default())
            .dispatch(&Reason::Disconnect, Some(&params()));
        assert_eq!(runner.commands[0], "route delete 203.0.113.9 mask 255.255.255.255");
    }

    #[test]
    fn missing_parameters_fail_the_event() {
        let mut runner = ScriptedRunner::default();
        let session = Dispatcher::new(&mut runner, RedirectMethod::default())
            .dispatch(&Reason::Connect, None);
        assert_eq!(session.status, 1);
        assert_eq!(session.outcomes[0].kind, OutcomeKind::Precondition);
        assert!(runner.commands.is_empty());
    }
}
