use std::collections::HashMap;

use crate::protocol::messages::ACTION_RESULT_OK;

/// Outcome of a fully-resolved two-way command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The synchronous JSON-RPC reply carried a non-zero `result`.
    Rejected,
    /// The synchronous reply was fine but the asynchronous
    /// `RemoteActionResult` reported a non-OK status.
    ActionFailed,
}

/// One outstanding two-way command: a JSON-RPC reply keyed by `idd` and an
/// asynchronous `RemoteActionResult` event keyed by `uid` must both arrive
/// before the command is considered complete. Neither implies the other.
#[derive(Debug, Clone)]
struct Pending {
    idd: u64,
    expected_ok: i32,
    jsonrpc_ack_seen: bool,
    jsonrpc_ok: bool,
    remote_action_seen: bool,
    remote_action_ok: bool,
    param_ret: Option<serde_json::Value>,
}

/// Tracks outstanding two-way commands. The UUID is the stable correlation
/// handle; `idd` is an auxiliary index into the same table since both
/// namespaces are populated per send and neither is reused across commands.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    by_uid: HashMap<String, Pending>,
    idd_to_uid: HashMap<u64, String>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, uid: String, idd: u64, expected_ok: i32) {
        self.idd_to_uid.insert(idd, uid.clone());
        self.by_uid.insert(uid, Pending {
            idd,
            expected_ok,
            jsonrpc_ack_seen: false,
            jsonrpc_ok: false,
            remote_action_seen: false,
            remote_action_ok: false,
            param_ret: None,
        });
    }

    /// Records a synchronous JSON-RPC reply. Returns `false` if `idd`
    /// matches no pending command (caller should log and ignore).
    pub fn record_jsonrpc_reply(&mut self, idd: u64, result_is_ok: bool) -> bool {
        let Some(uid) = self.idd_to_uid.get(&idd).cloned() else { return false };
        let Some(pending) = self.by_uid.get_mut(&uid) else { return false };
        pending.jsonrpc_ack_seen = true;
        pending.jsonrpc_ok = result_is_ok;
        true
    }

    /// Records an asynchronous `RemoteActionResult`, along with whatever
    /// `ParamRet` payload accompanied it (commands like
    /// `RemoteMountStatusGetInfo` return data this way rather than in the
    /// synchronous jsonrpc reply). Returns `false` if `uid` matches no
    /// pending command.
    pub fn record_remote_action(&mut self, uid: &str, action_result_int: i32, param_ret: Option<serde_json::Value>) -> bool {
        let Some(pending) = self.by_uid.get_mut(uid) else { return false };
        pending.remote_action_seen = true;
        pending.remote_action_ok = action_result_int == pending.expected_ok;
        pending.param_ret = param_ret;
        true
    }

    /// If the command for `uid` has reached a final outcome, removes it from
    /// the table and returns that outcome plus any `ParamRet` payload the
    /// `RemoteActionResult` carried.
    pub fn take_if_resolved(&mut self, uid: &str) -> Option<(Outcome, Option<serde_json::Value>)> {
        let pending = self.by_uid.get(uid)?;
        if pending.jsonrpc_ack_seen && !pending.jsonrpc_ok {
            let idd = pending.idd;
            self.by_uid.remove(uid);
            self.idd_to_uid.remove(&idd);
            return Some((Outcome::Rejected, None));
        }
        if pending.jsonrpc_ack_seen && pending.remote_action_seen {
            let outcome = if pending.remote_action_ok { Outcome::Completed } else { Outcome::ActionFailed };
            let idd = pending.idd;
            let param_ret = pending.param_ret.clone();
            self.by_uid.remove(uid);
            self.idd_to_uid.remove(&idd);
            return Some((outcome, param_ret));
        }
        None
    }

    pub fn contains_idd(&self, idd: u64) -> bool {
        self.idd_to_uid.contains_key(&idd)
    }

    pub fn contains_uid(&self, uid: &str) -> bool {
        self.by_uid.contains_key(uid)
    }
}

pub const DEFAULT_EXPECTED_OK: i32 = ACTION_RESULT_OK;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_only_once_both_acks_arrive() {
        let mut table = CorrelationTable::new();
        table.register("u1".to_string(), 1, ACTION_RESULT_OK);

        assert!(table.take_if_resolved("u1").is_none());

        table.record_jsonrpc_reply(1, true);
        assert!(table.take_if_resolved("u1").is_none());

        table.record_remote_action("u1", ACTION_RESULT_OK, None);
        assert_eq!(table.take_if_resolved("u1"), Some((Outcome::Completed, None)));
        assert!(!table.contains_uid("u1"));
    }

    #[test]
    fn rejected_jsonrpc_resolves_immediately() {
        let mut table = CorrelationTable::new();
        table.register("u2".to_string(), 2, ACTION_RESULT_OK);
        table.record_jsonrpc_reply(2, false);
        assert_eq!(table.take_if_resolved("u2"), Some((Outcome::Rejected, None)));
    }

    #[test]
    fn unrelated_idd_and_uid_are_ignored() {
        let mut table = CorrelationTable::new();
        table.register("u3".to_string(), 3, ACTION_RESULT_OK);
        assert!(!table.record_jsonrpc_reply(999, true));
        assert!(!table.record_remote_action("unknown-uid", ACTION_RESULT_OK, None));
    }

    #[test]
    fn param_ret_is_returned_alongside_completion() {
        let mut table = CorrelationTable::new();
        table.register("u4".to_string(), 4, ACTION_RESULT_OK);
        table.record_jsonrpc_reply(4, true);
        let payload = serde_json::json!({"FlipStatus": 2});
        table.record_remote_action("u4", ACTION_RESULT_OK, Some(payload.clone()));
        assert_eq!(table.take_if_resolved("u4"), Some((Outcome::Completed, Some(payload))));
    }
}
