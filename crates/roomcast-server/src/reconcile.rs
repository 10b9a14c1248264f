//! Rebuild the session registry from the host after a room restarts.

use roomcast_core::ConnectionId;
use tracing::{info, warn};

use crate::attachment;
use crate::host::Host;
use crate::registry::SessionRegistry;

/// What a reconciliation pass found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Sockets whose attachment was restored into the registry.
    pub restored: usize,
    /// Open sockets left out because their attachment was missing or bad.
    pub skipped: Vec<ConnectionId>,
}

/// Replace the registry contents with one entry per open socket that
/// carries a valid attachment.
///
/// The host is authoritative: entries for sockets it no longer reports are
/// dropped. Bad attachments are logged and skipped; they never abort the
/// pass. Running twice against the same host yields the same registry.
pub fn reconcile(host: &dyn Host, registry: &mut SessionRegistry) -> ReconcileReport {
    registry.clear();
    let mut report = ReconcileReport::default();

    for conn in host.open_connections() {
        match attachment::restore(host, &conn) {
            Ok(meta) => {
                let _ = registry.register(conn, meta);
                report.restored += 1;
            }
            Err(error) => {
                warn!(conn_id = %conn, %error, "skipping socket without usable attachment");
                report.skipped.push(conn);
            }
        }
    }

    info!(
        restored = report.restored,
        skipped = report.skipped.len(),
        "session registry reconciled"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MockHost;
    use roomcast_core::ConnectionMeta;
    use roomcast_core::logging::capture_logs;
    use tracing::Level;

    fn bytes(user: &str) -> Vec<u8> {
        attachment::encode(&ConnectionMeta::new(user, format!("{user}-c"), ["lobby"])).unwrap()
    }

    fn host_with(entries: Vec<(&'static str, Option<Vec<u8>>)>) -> MockHost {
        let mut host = MockHost::new();
        let ids: Vec<ConnectionId> = entries.iter().map(|(id, _)| ConnectionId::from(*id)).collect();
        let _ = host.expect_open_connections().return_const(ids);
        let _ = host
            .expect_read_attachment()
            .returning(move |conn| {
                entries
                    .iter()
                    .find(|(id, _)| *id == conn.as_str())
                    .and_then(|(_, b)| b.clone())
            });
        host
    }

    #[test]
    fn restores_valid_and_skips_bad() {
        let host = host_with(vec![
            ("k1", Some(bytes("alice"))),
            ("k2", Some(b"garbage".to_vec())),
            ("k3", None),
            ("k4", Some(bytes("bob"))),
        ]);
        let (logs, _guard) = capture_logs();
        let mut registry = SessionRegistry::new();
        let report = reconcile(&host, &mut registry);

        assert_eq!(report.restored, 2);
        assert_eq!(
            report.skipped,
            vec![ConnectionId::from("k2"), ConnectionId::from("k3")]
        );
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.get(&"k4".into()).unwrap().user_id, "bob");
        assert_eq!(logs.count_at_level(Level::WARN), 2);
    }

    #[test]
    fn drops_entries_for_closed_sockets() {
        let host = host_with(vec![("k1", Some(bytes("alice")))]);
        let mut registry = SessionRegistry::new();
        let _ = registry.register("stale".into(), ConnectionMeta::new("ghost", "g", ["x"]));
        let _ = reconcile(&host, &mut registry);
        assert!(!registry.contains(&"stale".into()));
        assert!(registry.contains(&"k1".into()));
    }

    #[test]
    fn idempotent() {
        let host = host_with(vec![("k1", Some(bytes("alice"))), ("k2", Some(bytes("bob")))]);
        let mut registry = SessionRegistry::new();
        let first = reconcile(&host, &mut registry);
        let snapshot = registry.snapshot();
        let second = reconcile(&host, &mut registry);
        assert_eq!(first, second);
        assert_eq!(snapshot, registry.snapshot());
    }
}
