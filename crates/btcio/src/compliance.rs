//! Restricted-address screening.

use std::collections::HashSet;

use btcobs_common::logging::COMPLIANCE_LOG_TARGET;
#[cfg(test)]
use mockall::automock;
use tracing::*;

/// Decides whether any of a set of addresses is restricted.
#[cfg_attr(test, automock)]
pub trait ComplianceChecker: Send + Sync + 'static {
    fn contains_restricted_address(&self, addrs: &[String]) -> bool;
}

/// Fixed list of restricted addresses, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct RestrictedAddresses {
    addrs: HashSet<String>,
}

impl RestrictedAddresses {
    pub fn new<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addrs = addrs
            .into_iter()
            .map(|a| a.as_ref().trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        Self { addrs }
    }
}

impl ComplianceChecker for RestrictedAddresses {
    fn contains_restricted_address(&self, addrs: &[String]) -> bool {
        addrs
            .iter()
            .filter(|a| !a.is_empty())
            .any(|a| self.addrs.contains(&a.to_lowercase()))
    }
}

/// Logs a restricted transfer to the compliance target.
pub fn log_restricted(outbound: bool, chain_id: i64, tx_hash: &str, sender: &str, receiver: &str) {
    let kind = if outbound { "outbound" } else { "inbound" };
    warn!(
        target: COMPLIANCE_LOG_TARGET,
        %chain_id,
        %tx_hash,
        %sender,
        %receiver,
        "restricted address detected in {kind}"
    );
}
