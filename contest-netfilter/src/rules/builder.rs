//! Applying and removing a user's chain pair

use super::rule::{binding_args, ChainNames, Family, RuleSet};
use crate::error::Result;
use crate::gateway::{Invocation, SystemGateway};
use std::sync::Arc;

/// Outcome of one rule application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Rules appended successfully, both families
    pub rules_added: usize,
    /// Failed invocations with their error text
    pub failures: Vec<String>,
}

impl ApplyReport {
    /// True when every invocation succeeded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, failure: String) {
        tracing::warn!("{}", failure);
        self.failures.push(failure);
    }
}

/// What the live tables say about one family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyStatus {
    pub family: Family,
    pub chains_present: bool,
    /// Jumps from `OUTPUT` into the user's OUT chain
    pub bindings: usize,
    /// Rules in the OUT chain
    pub rule_count: usize,
}

impl FamilyStatus {
    pub fn is_active(&self) -> bool {
        self.chains_present && self.bindings > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallStatus {
    pub v4: FamilyStatus,
    pub v6: FamilyStatus,
}

impl FirewallStatus {
    /// Restriction is in force when the IPv4 chain is bound
    pub fn is_active(&self) -> bool {
        self.v4.is_active()
    }
}

/// Builds, binds and tears down one user's chains through the gateway
pub struct RuleBuilder {
    gateway: Arc<dyn SystemGateway>,
    chains: ChainNames,
}

impl RuleBuilder {
    pub fn new(gateway: Arc<dyn SystemGateway>, chains: ChainNames) -> Self {
        Self { gateway, chains }
    }

    pub fn chains(&self) -> &ChainNames {
        &self.chains
    }

    /// Replace whatever is installed with `rules`, bound to `uid`.
    ///
    /// Only IPv4 chain creation failure aborts; every other failure is
    /// counted in the report and the apply goes on. Nothing is rolled back.
    pub fn apply(&self, uid: u32, rules: &RuleSet) -> Result<ApplyReport> {
        self.teardown();

        let mut report = ApplyReport::default();
        for family in Family::ALL {
            if !self.setup_chains(family, &mut report)? {
                continue;
            }
            self.install_rules(family, rules, &mut report);
            self.bind(family, uid, &mut report);
        }

        tracing::info!(
            "Installed {} rules in {} ({} failures)",
            report.rules_added,
            self.chains.output,
            report.failures.len()
        );
        Ok(report)
    }

    /// Create the chain pair. Returns false when the family is unusable.
    fn setup_chains(&self, family: Family, report: &mut ApplyReport) -> Result<bool> {
        for chain in self.chains.both() {
            let create = Invocation::new(family.program(), ["-N", chain]);
            match self.gateway.run_checked(&create) {
                Ok(_) => {}
                Err(e) if family == Family::V4 => return Err(e),
                Err(e) => {
                    report.record(format!("{} rules skipped: {}", family, e));
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn install_rules(&self, family: Family, rules: &RuleSet, report: &mut ApplyReport) {
        for rule in rules.rules(family) {
            let args = ["-A".to_string(), self.chains.output.clone()]
                .into_iter()
                .chain(rule.to_args(family));
            match self.gateway.run_checked(&Invocation::new(family.program(), args)) {
                Ok(_) => report.rules_added += 1,
                Err(e) => report.record(e.to_string()),
            }
        }
    }

    /// Jump from `OUTPUT` for `uid`, appended only when not already there
    fn bind(&self, family: Family, uid: u32, report: &mut ApplyReport) {
        let binding = binding_args(uid, &self.chains.output);
        let check = Invocation::new(
            family.program(),
            ["-C".to_string(), "OUTPUT".to_string()].into_iter().chain(binding.clone()),
        );
        if self.gateway.run(&check).is_ok_and(|out| out.is_success()) {
            tracing::debug!("{} binding for uid {} already present", family, uid);
            return;
        }

        let append = Invocation::new(
            family.program(),
            ["-A".to_string(), "OUTPUT".to_string()].into_iter().chain(binding),
        );
        if let Err(e) = self.gateway.run_checked(&append) {
            report.record(e.to_string());
        }
    }

    /// Remove every `OUTPUT` jump into the user's chain, then flush and
    /// delete both chains in both families. Absent state is not an error.
    /// Returns the number of jumps removed.
    pub fn teardown(&self) -> usize {
        let mut removed = 0;
        for family in Family::ALL {
            for rule in self.output_jumps(family) {
                let delete = Invocation::new(
                    family.program(),
                    ["-D".to_string(), "OUTPUT".to_string()].into_iter().chain(rule),
                );
                if self.gateway.run_logged(&delete) {
                    removed += 1;
                }
            }

            for op in ["-F", "-X"] {
                for chain in self.chains.both() {
                    let inv = Invocation::new(family.program(), [op, chain]);
                    if let Ok(out) = self.gateway.run(&inv) {
                        if !out.is_success() {
                            tracing::debug!("{}: {}", inv, out.stderr.trim());
                        }
                    }
                }
            }
        }
        removed
    }

    /// Rule specs in `OUTPUT` that jump to the OUT chain, as `-S` prints them
    fn output_jumps(&self, family: Family) -> Vec<Vec<String>> {
        let listing = Invocation::new(family.program(), ["-S", "OUTPUT"]);
        let Ok(out) = self.gateway.run(&listing) else {
            return Vec::new();
        };
        if !out.is_success() {
            return Vec::new();
        }

        out.stdout
            .lines()
            .filter_map(|line| {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                let jumps_to_chain = tokens
                    .windows(2)
                    .any(|w| w[0] == "-j" && w[1] == self.chains.output);
                match tokens.as_slice() {
                    ["-A", "OUTPUT", rest @ ..] if jumps_to_chain => {
                        Some(rest.iter().map(|t| t.to_string()).collect())
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// Derive the live state from the rule tables
    pub fn status(&self) -> FirewallStatus {
        FirewallStatus {
            v4: self.family_status(Family::V4),
            v6: self.family_status(Family::V6),
        }
    }

    fn family_status(&self, family: Family) -> FamilyStatus {
        let listing = Invocation::new(family.program(), ["-S", self.chains.output.as_str()]);
        let (chains_present, rule_count) = match self.gateway.run(&listing) {
            Ok(out) if out.is_success() => {
                (true, out.stdout.lines().filter(|l| l.starts_with("-A ")).count())
            }
            _ => (false, 0),
        };

        FamilyStatus {
            family,
            chains_present,
            bindings: self.output_jumps(family).len(),
            rule_count,
        }
    }
}
