//! Integration tests for iscsi-agent
//!
//! These tests verify the session orchestration and gRPC service behavior
//! without requiring a real initiator toolchain. An in-memory executor
//! stands in for iscsiadm, recording every invocation and failing on
//! demand, so the best-effort fan-out and first-error policies can be
//! checked end to end.

use std::collections::{HashMap, HashSet};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use iscsi_agent::iscsi::{IscsiAdm, IscsiError, SessionManager};
use iscsi_agent::service::AgentService;
use iscsi_agent::service::proto::iscsi_agent_server::IscsiAgent;
use iscsi_agent::service::proto::{LoginRequest, LogoutRequest};

/// In-memory stand-in for iscsiadm.
#[derive(Default)]
struct FakeAdm {
    /// Discovery output per portal.
    discovery: HashMap<String, String>,
    /// Portals whose discovery invocation fails.
    fail_discovery: HashSet<String>,
    /// IQNs whose login invocation fails.
    fail_login: HashSet<String>,
    /// IQNs whose logout invocation fails.
    fail_logout: HashSet<String>,
    /// Every invocation's argument vector, in call order.
    calls: Mutex<Vec<Vec<String>>>,
    /// Delay applied to every invocation (for interleaving tests).
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeAdm {
    fn with_discovery(mut self, portal: &str, output: &str) -> Self {
        self.discovery.insert(portal.to_string(), output.to_string());
        self
    }

    fn failing_discovery(mut self, portal: &str) -> Self {
        self.fail_discovery.insert(portal.to_string());
        self
    }

    fn failing_login(mut self, iqn: &str) -> Self {
        self.fail_login.insert(iqn.to_string());
        self
    }

    fn failing_logout(mut self, iqn: &str) -> Self {
        self.fail_logout.insert(iqn.to_string());
        self
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_with_flag(&self, flag: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|args| args.iter().any(|a| a == flag))
            .collect()
    }

    fn delete_calls_for(&self, iqn: &str) -> usize {
        self.calls()
            .iter()
            .filter(|args| {
                args.windows(2).any(|w| w[0] == "-o" && w[1] == "delete")
                    && args.iter().any(|a| a == iqn)
            })
            .count()
    }
}

fn arg_after(args: &[&str], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].to_string())
}

fn command_failed(output: &str) -> IscsiError {
    IscsiError::CommandFailed {
        status: ExitStatus::from_raw(21 << 8),
        output: output.to_string(),
    }
}

#[async_trait]
impl IscsiAdm for FakeAdm {
    async fn run(&self, args: &[&str]) -> Result<String, IscsiError> {
        self.calls
            .lock()
            .unwrap()
            .push(args.iter().map(|a| a.to_string()).collect());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if args.contains(&"--discover") {
            let portal = arg_after(args, "--portal").unwrap_or_default();
            if self.fail_discovery.contains(&portal) {
                return Err(command_failed("discovery failed"));
            }
            return Ok(self.discovery.get(&portal).cloned().unwrap_or_default());
        }

        let iqn = arg_after(args, "--targetname").unwrap_or_default();
        if args.contains(&"--login") && self.fail_login.contains(&iqn) {
            return Err(command_failed("login failed"));
        }
        if args.contains(&"--logout") && self.fail_logout.contains(&iqn) {
            return Err(command_failed("logout failed"));
        }
        Ok(String::new())
    }
}

fn manager(fake: FakeAdm) -> (Arc<FakeAdm>, SessionManager) {
    let adm = Arc::new(fake);
    let sessions = SessionManager::new(adm.clone());
    (adm, sessions)
}

// ============================================================================
// Single-portal fan-out
// ============================================================================

/// A failing target does not stop the remaining targets from being
/// attempted, and its error is the one reported.
#[tokio::test]
async fn login_attempts_every_target_and_returns_first_error() {
    let fake = FakeAdm::default()
        .with_discovery("9.9.9.9", "9.9.9.9:3260,1 iqn.t1\n9.9.9.9:3260,1 iqn.t2\n")
        .failing_login("iqn.t1");
    let (adm, sessions) = manager(fake);

    let err = sessions.discover_and_login("9.9.9.9").await.unwrap_err();
    assert!(err.to_string().contains("login failed"));

    let logins = adm.calls_with_flag("--login");
    assert_eq!(logins.len(), 2, "both targets must be attempted");
    assert!(logins[0].contains(&"iqn.t1".to_string()));
    assert!(logins[1].contains(&"iqn.t2".to_string()));
}

/// Login invocations carry the exact endpoint from the discovery line.
#[tokio::test]
async fn login_uses_discovered_endpoint() {
    let fake = FakeAdm::default().with_discovery("9.9.9.9", "10.0.0.1:3261,2 iqn.t1\n");
    let (adm, sessions) = manager(fake);

    sessions.discover_and_login("9.9.9.9").await.unwrap();

    let logins = adm.calls_with_flag("--login");
    let args: Vec<&str> = logins[0].iter().map(|s| s.as_str()).collect();
    assert_eq!(arg_after(&args, "--portal").unwrap(), "10.0.0.1:3261");
}

/// A portal that discovers nothing is a success, not an error.
#[tokio::test]
async fn login_with_no_targets_is_ok() {
    let fake = FakeAdm::default().with_discovery("9.9.9.9", "");
    let (adm, sessions) = manager(fake);

    sessions.discover_and_login("9.9.9.9").await.unwrap();
    assert!(adm.calls_with_flag("--login").is_empty());
}

/// Discovery failure returns immediately without attempting any login.
#[tokio::test]
async fn discovery_failure_skips_logins() {
    let fake = FakeAdm::default().failing_discovery("9.9.9.9");
    let (adm, sessions) = manager(fake);

    let err = sessions.discover_and_login("9.9.9.9").await.unwrap_err();
    assert!(err.to_string().contains("discovery failed"));
    assert!(adm.calls_with_flag("--login").is_empty());
}

/// The node record is deleted exactly once per clean logout, and never for
/// a target whose logout failed.
#[tokio::test]
async fn logout_deletes_records_only_after_success() {
    let fake = FakeAdm::default()
        .with_discovery("9.9.9.9", "9.9.9.9:3260,1 iqn.good\n9.9.9.9:3260,1 iqn.bad\n")
        .failing_logout("iqn.bad");
    let (adm, sessions) = manager(fake);

    let err = sessions.discover_and_logout("9.9.9.9").await.unwrap_err();
    assert!(err.to_string().contains("logout failed"));

    assert_eq!(adm.calls_with_flag("--logout").len(), 2);
    assert_eq!(adm.delete_calls_for("iqn.good"), 1);
    assert_eq!(adm.delete_calls_for("iqn.bad"), 0);
}

// ============================================================================
// Portal batches
// ============================================================================

/// A failing portal never prevents the remaining portals from being fully
/// processed, and the returned error corresponds to the failed portal.
#[tokio::test]
async fn portal_batch_continues_past_failures() {
    let fake = FakeAdm::default()
        .with_discovery("a", "1.1.1.1:3260,1 iqn.a\n")
        .failing_discovery("b")
        .with_discovery("c", "3.3.3.3:3260,1 iqn.c\n");
    let (adm, sessions) = manager(fake);

    let portals = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let err = sessions.login_portals(&portals).await.unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("[b]"), "error should name the failed portal: {msg}");
    assert!(msg.contains("discovery failed"), "got: {msg}");

    let logins = adm.calls_with_flag("--login");
    assert_eq!(logins.len(), 2, "portals a and c must still log in");
    assert!(logins[0].contains(&"iqn.a".to_string()));
    assert!(logins[1].contains(&"iqn.c".to_string()));
}

/// All portals succeeding yields Ok.
#[tokio::test]
async fn portal_batch_all_success() {
    let fake = FakeAdm::default()
        .with_discovery("a", "1.1.1.1:3260,1 iqn.a\n")
        .with_discovery("b", "2.2.2.2:3260,1 iqn.b\n");
    let (_, sessions) = manager(fake);

    let portals = vec!["a".to_string(), "b".to_string()];
    sessions.login_portals(&portals).await.unwrap();
}

// ============================================================================
// Lock table
// ============================================================================

/// Two concurrent logins against the same target must not overlap inside
/// the executor; the lock table serializes them.
#[tokio::test]
async fn concurrent_logins_to_same_target_serialize() {
    let fake = FakeAdm {
        delay: Some(Duration::from_millis(20)),
        ..FakeAdm::default()
    };
    let (adm, sessions) = manager(fake);
    let sessions = Arc::new(sessions);

    let futures: Vec<_> = (0..4)
        .map(|_| {
            let sessions = sessions.clone();
            async move { sessions.login("iqn.shared", "1.2.3.4:3260").await }
        })
        .collect();
    for result in futures::future::join_all(futures).await {
        result.unwrap();
    }

    assert_eq!(adm.calls_with_flag("--login").len(), 4);
    assert_eq!(
        adm.max_in_flight.load(Ordering::SeqCst),
        1,
        "same-target logins must hold the lock one at a time"
    );
}

// ============================================================================
// gRPC service
// ============================================================================

/// A clean batch maps to an empty success payload.
#[tokio::test]
async fn service_login_returns_empty_response_on_success() {
    let fake = FakeAdm::default().with_discovery("a", "1.1.1.1:3260,1 iqn.a\n");
    let (adm, sessions) = manager(fake);
    let service = AgentService::new(Arc::new(sessions));

    let request = tonic::Request::new(LoginRequest {
        targets: vec!["a".to_string()],
    });
    service.login(request).await.unwrap();
    assert_eq!(adm.calls_with_flag("--login").len(), 1);
}

/// Any batch failure maps to one generic Internal status carrying the
/// first error's message.
#[tokio::test]
async fn service_maps_batch_failure_to_internal_status() {
    let fake = FakeAdm::default().failing_discovery("a");
    let (_, sessions) = manager(fake);
    let service = AgentService::new(Arc::new(sessions));

    let request = tonic::Request::new(LogoutRequest {
        targets: vec!["a".to_string()],
    });
    let status = service.logout(request).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::Internal);
    assert!(status.message().contains("discovery failed"));
}
