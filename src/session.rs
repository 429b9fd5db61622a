/*!
Session result

Accumulated status and ordered outcome log for one lifecycle event.
*/

use serde::Serialize;

use crate::action::ActionKind;
use crate::params::Reason;

/// Why a step was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    /// Read-only routing table query
    Query,
    Apply(ActionKind),
    /// A required parameter was missing; nothing was run
    Precondition,
}

/// One executed (or refused) step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub kind: OutcomeKind,
    pub command: String,
    pub exit_code: i32,
    pub output: String,
}

/// Status total plus everything that happened, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionResult {
    pub reason: Reason,
    /// Sum of all exit codes, each read as unsigned; zero means every step succeeded
    pub status: u64,
    pub outcomes: Vec<ActionOutcome>,
}

impl SessionResult {
    pub fn new(reason: Reason) -> Self {
        Self {
            reason,
            status: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, kind: OutcomeKind, command: String, exit_code: i32, output: String) {
        // Windows codes above i32::MAX come back negative
        self.status += u64::from(exit_code as u32);
        self.outcomes.push(ActionOutcome {
            kind,
            command,
            exit_code,
            output,
        });
    }

    pub fn record_violation(&mut self, message: &str) {
        self.record(OutcomeKind::Precondition, String::new(), 1, message.to_string());
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|o| o.exit_code != 0)
    }

    /// Status as a process exit code
    pub fn exit_code(&self) -> i32 {
        self.status.min(i32::MAX as u64) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_and_status() {
        let mut session = SessionResult::new(Reason::Connect);
        session.record(OutcomeKind::Query, "route print".into(), 0, String::new());
        session.record(
            OutcomeKind::Apply(ActionKind::AddRoute),
            "route add 10.0.0.0 mask 255.0.0.0 10.1.2.3 if 4".into(),
            1,
            "The route addition failed".into(),
        );
        session.record_violation("VPNGATEWAY is missing");

        assert_eq!(session.status, 2);
        assert_eq!(session.exit_code(), 2);
        let failed: Vec<_> = session.failures().map(|o| o.kind).collect();
        assert_eq!(failed, [OutcomeKind::Apply(ActionKind::AddRoute), OutcomeKind::Precondition]);
    }

    #[test]
    fn exit_code_saturates() {
        let mut session = SessionResult::new(Reason::Disconnect);
        session.record(OutcomeKind::Query, "a".into(), i32::MAX, String::new());
        session.record(OutcomeKind::Query, "b".into(), i32::MAX, String::new());
        assert_eq!(session.exit_code(), i32::MAX);
    }

    #[test]
    fn negative_codes_do_not_cancel_failures() {
        let mut session = SessionResult::new(Reason::Connect);
        session.record(OutcomeKind::Query, "a".into(), 1, String::new());
        // 0xC0000005, as reported by ExitStatus::code()
        session.record(OutcomeKind::Query, "b".into(), -1073741819, String::new());
        session.record(OutcomeKind::Query, "c".into(), -1, String::new());

        assert!(!session.is_success());
        assert_eq!(session.status, 1 + 0xC000_0005 + 0xFFFF_FFFF);
        assert_eq!(session.exit_code(), i32::MAX);
        assert_eq!(session.failures().count(), 3);
    }

    #[test]
    fn serializes_for_the_caller() {
        let mut session = SessionResult::new(Reason::Connect);
        session.record(
            OutcomeKind::Apply(ActionKind::ClearDns),
            "netsh interface ipv4 delete dnsservers 4 all".into(),
            0,
            String::new(),
        );
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["reason"], "connect");
        assert_eq!(json["status"], 0);
        assert_eq!(json["outcomes"][0]["kind"]["apply"], "clear-dns");
    }
}
