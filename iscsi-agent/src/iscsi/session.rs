//! iSCSI session orchestration: discovery, login, logout, and node record
//! cleanup against the initiator's session database.
//!
//! Fan-out operations here are best-effort by contract: every target and
//! every portal is always attempted, failures are accumulated, and only
//! the first one is reported to the caller. The remaining failures stay
//! observable through logging and [`BatchOutcome`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};

use super::admin::IscsiAdm;
use super::discovery::{Target, parse_targets};
use super::error::{IscsiError, Result};

/// Accumulates per-unit failures from a best-effort fan-out.
///
/// Records every failure while exposing "first error" as a derived view,
/// so partial failures are not discarded at the point of occurrence.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    failures: Vec<(String, IscsiError)>,
}

impl BatchOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed unit (a target IQN or a portal address).
    pub fn record(&mut self, unit: impl Into<String>, error: IscsiError) {
        self.failures.push((unit.into(), error));
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Every failed unit, in the order the failures occurred.
    pub fn failed_units(&self) -> Vec<&str> {
        self.failures.iter().map(|(unit, _)| unit.as_str()).collect()
    }

    pub fn failures(&self) -> &[(String, IscsiError)] {
        &self.failures
    }

    /// The first failure encountered, if any.
    pub fn into_first_error(self) -> Option<IscsiError> {
        self.failures.into_iter().next().map(|(_, error)| error)
    }

    pub fn into_result(self) -> Result<()> {
        match self.into_first_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Per-key mutex table serializing conflicting iscsiadm invocations.
///
/// iscsiadm's node database is shared mutable state across every caller on
/// the host, and the agent serves gRPC calls concurrently. Each
/// database-mutating invocation holds the lock for its key: login/logout
/// lock the (endpoint, iqn) pair, record deletion locks the iqn, discovery
/// locks the portal.
#[derive(Default)]
struct TargetLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TargetLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            Arc::clone(map.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Orchestrates discovery and session lifecycle for one host.
///
/// Holds no per-call state beyond the lock table; all durable session
/// state lives in iscsiadm's own database.
pub struct SessionManager {
    admin: Arc<dyn IscsiAdm>,
    locks: TargetLocks,
}

impl SessionManager {
    pub fn new(admin: Arc<dyn IscsiAdm>) -> Self {
        Self {
            admin,
            locks: TargetLocks::default(),
        }
    }

    /// Log in to the target with the given IQN.
    ///
    /// `endpoint` is an address with port (`host:port`).
    pub async fn login(&self, iqn: &str, endpoint: &str) -> Result<()> {
        let _guard = self.locks.acquire(&session_key(endpoint, iqn)).await;
        self.admin
            .run(&[
                "--mode", "node", "--targetname", iqn, "--portal", endpoint, "--login",
            ])
            .await?;
        Ok(())
    }

    /// Log out of the target with the given IQN.
    ///
    /// `endpoint` is an address with port (`host:port`).
    pub async fn logout(&self, iqn: &str, endpoint: &str) -> Result<()> {
        let _guard = self.locks.acquire(&session_key(endpoint, iqn)).await;
        self.admin
            .run(&[
                "--mode", "node", "--targetname", iqn, "--portal", endpoint, "--logout",
            ])
            .await?;
        Ok(())
    }

    /// Delete the node database record for the given IQN.
    ///
    /// Only meaningful after a successful logout; the fan-out paths never
    /// call it on its own.
    pub async fn delete_record(&self, iqn: &str) -> Result<()> {
        let _guard = self.locks.acquire(iqn).await;
        self.admin
            .run(&["--mode", "node", "--targetname", iqn, "-o", "delete"])
            .await?;
        Ok(())
    }

    /// Query a discovery portal for the targets it exposes.
    ///
    /// `portal` is an address without port.
    pub async fn discover(&self, portal: &str) -> Result<Vec<Target>> {
        let _guard = self.locks.acquire(portal).await;
        let output = self
            .admin
            .run(&[
                "--mode",
                "discoverydb",
                "--type",
                "sendtargets",
                "--portal",
                portal,
                "--discover",
            ])
            .await?;
        Ok(parse_targets(&output))
    }

    /// Discover every target behind `portal` and log in to all of them.
    ///
    /// A discovery failure returns immediately. Login failures never stop
    /// the remaining targets from being attempted; the first one (in
    /// target order) becomes the result.
    pub async fn discover_and_login(&self, portal: &str) -> Result<()> {
        let targets = self.discover(portal).await?;

        let mut outcome = BatchOutcome::new();
        for target in &targets {
            if let Err(e) = self.login(&target.iqn, &target.endpoint()).await {
                error!(target = %target.iqn, error = %e, "Failed to log in to target");
                outcome.record(target.iqn.clone(), e);
            }
        }
        outcome.into_result()
    }

    /// Discover every target behind `portal` and log out of all of them.
    ///
    /// A target's node record is deleted only once its logout succeeded;
    /// cleanup failures are logged but never reported upward.
    pub async fn discover_and_logout(&self, portal: &str) -> Result<()> {
        let targets = self.discover(portal).await?;

        let mut outcome = BatchOutcome::new();
        for target in &targets {
            match self.logout(&target.iqn, &target.endpoint()).await {
                Ok(()) => {
                    if let Err(e) = self.delete_record(&target.iqn).await {
                        warn!(
                            target = %target.iqn,
                            error = %e,
                            "Failed to delete node record after logout"
                        );
                    }
                }
                Err(e) => {
                    error!(target = %target.iqn, error = %e, "Failed to log out of target");
                    outcome.record(target.iqn.clone(), e);
                }
            }
        }
        outcome.into_result()
    }

    /// Discover and log in across a batch of portals, best-effort.
    pub async fn login_portals(&self, portals: &[String]) -> Result<()> {
        info!(portals = %portals.join(", "), "Starting to login portals");

        let mut outcome = BatchOutcome::new();
        for portal in portals {
            if let Err(e) = self.discover_and_login(portal).await {
                error!(portal = %portal, error = %e, "Failed to login portal");
                outcome.record(portal.clone(), e);
            }
        }

        info!("Finished to login portals");
        into_portal_result(outcome)
    }

    /// Discover and log out across a batch of portals, best-effort.
    pub async fn logout_portals(&self, portals: &[String]) -> Result<()> {
        info!(portals = %portals.join(", "), "Starting to logout portals");

        let mut outcome = BatchOutcome::new();
        for portal in portals {
            if let Err(e) = self.discover_and_logout(portal).await {
                error!(portal = %portal, error = %e, "Failed to logout portal");
                outcome.record(portal.clone(), e);
            }
        }

        info!("Finished to logout portals");
        into_portal_result(outcome)
    }
}

fn session_key(endpoint: &str, iqn: &str) -> String {
    format!("{endpoint}/{iqn}")
}

/// Wrap the first batch failure with the full list of failed portals, so
/// callers see which portals failed even though only one error propagates.
fn into_portal_result(outcome: BatchOutcome) -> Result<()> {
    if outcome.is_ok() {
        return Ok(());
    }
    let portals = outcome.failed_units().join(", ");
    match outcome.into_first_error() {
        Some(first) => Err(IscsiError::FailedPortals {
            portals,
            source: Box::new(first),
        }),
        None => Ok(()),
    }
}
