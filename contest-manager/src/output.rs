//! User-facing listings on stdout

use contest_core::{Change, DependencyReport, RestrictReport, StatusReport};
use contest_netfilter::rules::FamilyStatus;
use contest_netfilter::{Domain, Username};

fn mark(ok: bool) -> &'static str {
    if ok {
        "yes"
    } else {
        "no"
    }
}

pub fn print_change(domain: &Domain, change: Change) {
    match change {
        Change::Added => println!("Added {} to the whitelist", domain),
        Change::AlreadyPresent => println!("{} is already whitelisted", domain),
        Change::Removed => println!("Removed {} from the whitelist", domain),
        Change::NotPresent => println!("{} is not whitelisted", domain),
    }
}

pub fn print_list(domains: &[Domain]) {
    if domains.is_empty() {
        println!("Whitelist is empty");
        return;
    }
    println!("Whitelisted domains ({}):", domains.len());
    for domain in domains {
        println!("  {}", domain);
    }
}

pub fn print_dependencies(report: &DependencyReport) {
    println!("Dependency cache (updated {})", report.updated_display());
    println!(
        "{} of {} whitelisted domains analyzed",
        report.analyzed, report.whitelisted
    );
    println!();

    for (domain, deps) in &report.domains {
        match deps {
            None => println!("{} (not analyzed)", domain),
            Some(deps) if deps.is_empty() => println!("{} (no dependencies)", domain),
            Some(deps) => {
                println!("{} ({}):", domain, deps.len());
                for dep in deps {
                    println!("  {}", dep);
                }
            }
        }
    }

    println!();
    println!("{} unique dependencies", report.unique.len());
}

fn print_family(status: &FamilyStatus) {
    println!(
        "  {}: chains {}, {} OUTPUT bindings, {} rules",
        status.family,
        if status.chains_present { "present" } else { "absent" },
        status.bindings,
        status.rule_count
    );
}

pub fn print_status(status: &StatusReport) {
    println!("User:          {}", status.user);
    match status.uid {
        Some(uid) => println!("UID:           {}", uid),
        None => println!("UID:           (account missing)"),
    }
    println!("Restricted:    {}", mark(status.is_restricted()));
    println!("Firewall:      {}", mark(status.firewall.is_active()));
    print_family(&status.firewall.v4);
    print_family(&status.firewall.v6);
    println!("Boot restore:  {}", mark(status.persistence_enabled));
    println!("USB blocked:   {}", mark(status.usb_active));
    println!("Whitelisted:   {} domains", status.whitelisted);
    match status.cache_updated {
        Some(t) => println!("Dependencies:  analyzed {}", t.format("%Y-%m-%d %H:%M:%S")),
        None => println!("Dependencies:  never analyzed"),
    }
}

pub fn print_restrict(user: &Username, report: &RestrictReport) {
    println!(
        "Restrictions applied for '{}': {} domains, {} addresses, {} rules",
        user, report.allowed_domains, report.addresses, report.rules.rules_added
    );
    if !report.unresolved.is_empty() {
        let names: Vec<&str> = report.unresolved.iter().map(Domain::as_str).collect();
        println!("Unresolved: {}", names.join(", "));
    }
    for failure in &report.rules.failures {
        println!("Failed: {}", failure);
    }
    if report.partial_snapshot {
        println!("The ruleset restored at boot is incomplete, re-run restrict after fixing the failures");
    }
    if report.persistence_failures > 0 {
        println!("Rules may not survive a reboot ({} persistence steps failed)", report.persistence_failures);
    }
    if report.usb_failures > 0 {
        println!("USB restriction incomplete ({} steps failed)", report.usb_failures);
    }
}

pub fn print_setup(user: &Username, failures: usize) {
    if failures == 0 {
        println!("User '{}' is set up", user);
    } else {
        println!("User '{}' is set up with {} failed steps, see the log", user, failures);
    }
}

pub fn print_reset(user: &Username, failures: usize) {
    if failures == 0 {
        println!("User '{}' has been reset", user);
    } else {
        println!("User '{}' has been reset with {} failed steps, see the log", user, failures);
    }
}
