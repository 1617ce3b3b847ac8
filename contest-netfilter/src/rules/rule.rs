//! Firewall rule values and the per-user rule plan

use crate::dns::ResolvedIpSet;
use crate::user::Username;
use ipnet::IpNet;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// Address family, one rule table each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub const ALL: [Family; 2] = [Family::V4, Family::V6];

    /// Rule tool for this family
    pub fn program(self) -> &'static str {
        match self {
            Family::V4 => "iptables",
            Family::V6 => "ip6tables",
        }
    }

    pub fn save_program(self) -> &'static str {
        match self {
            Family::V4 => "iptables-save",
            Family::V6 => "ip6tables-save",
        }
    }

    pub fn restore_program(self) -> &'static str {
        match self {
            Family::V4 => "iptables-restore",
            Family::V6 => "ip6tables-restore",
        }
    }

    fn loopback(self) -> &'static str {
        match self {
            Family::V4 => "127.0.0.0/8",
            Family::V6 => "::1/128",
        }
    }

    fn reject_with(self) -> &'static str {
        match self {
            Family::V4 => "icmp-host-unreachable",
            Family::V6 => "icmp6-adm-prohibited",
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => f.write_str("IPv4"),
            Family::V6 => f.write_str("IPv6"),
        }
    }
}

/// Transport for DNS accept rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

/// One rule in a user's OUT chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    AcceptEstablished,
    AcceptLoopback,
    AcceptDns(Protocol),
    AcceptDestination(IpNet),
    Reject,
}

impl Rule {
    /// Match and target arguments, without the `-A <chain>` head
    pub fn to_args(&self, family: Family) -> Vec<String> {
        let args: Vec<String> = match self {
            Rule::AcceptEstablished => vec![
                "-m".into(),
                "state".into(),
                "--state".into(),
                "ESTABLISHED,RELATED".into(),
            ],
            Rule::AcceptLoopback => vec!["-d".into(), family.loopback().into()],
            Rule::AcceptDns(proto) => vec![
                "-p".into(),
                proto.as_str().into(),
                "--dport".into(),
                "53".into(),
            ],
            Rule::AcceptDestination(net) => vec!["-d".into(), render_net(net)],
            Rule::Reject => {
                return vec![
                    "-j".into(),
                    "REJECT".into(),
                    "--reject-with".into(),
                    family.reject_with().into(),
                ]
            }
        };
        args.into_iter()
            .chain(["-j".to_string(), "ACCEPT".to_string()])
            .collect()
    }
}

/// Single hosts are written as a bare address
fn render_net(net: &IpNet) -> String {
    if net.prefix_len() == net.max_prefix_len() {
        net.addr().to_string()
    } else {
        net.to_string()
    }
}

/// Names of a user's chain pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainNames {
    pub input: String,
    pub output: String,
}

impl ChainNames {
    pub fn new(prefix: &str, user: &Username) -> Self {
        let token = user.chain_token();
        Self {
            input: format!("{}_{}_IN", prefix, token),
            output: format!("{}_{}_OUT", prefix, token),
        }
    }

    pub fn both(&self) -> [&str; 2] {
        [&self.input, &self.output]
    }
}

/// Owner match that sends a user's outbound traffic into `chain`
pub fn binding_args(uid: u32, chain: &str) -> Vec<String> {
    vec![
        "-m".into(),
        "owner".into(),
        "--uid-owner".into(),
        uid.to_string(),
        "-j".into(),
        chain.to_string(),
    ]
}

/// The ordered OUT-chain rules for both families
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub v4: Vec<Rule>,
    pub v6: Vec<Rule>,
}

impl RuleSet {
    /// Defaults, one accept per destination, then the catch-all reject.
    ///
    /// Destinations are deduplicated and emitted in sorted order.
    pub fn build(resolved: &ResolvedIpSet, extra_ranges: &[IpNet]) -> Self {
        let mut destinations: BTreeSet<IpNet> = resolved.addresses().into_iter().map(IpNet::from).collect();
        destinations.extend(extra_ranges.iter().map(IpNet::trunc));

        let mut set = Self {
            v4: Self::defaults(),
            v6: Self::defaults(),
        };
        for net in destinations {
            set.rules_mut(Family::of(&net.addr()))
                .push(Rule::AcceptDestination(net));
        }
        set.v4.push(Rule::Reject);
        set.v6.push(Rule::Reject);
        set
    }

    fn defaults() -> Vec<Rule> {
        vec![
            Rule::AcceptEstablished,
            Rule::AcceptLoopback,
            Rule::AcceptDns(Protocol::Udp),
            Rule::AcceptDns(Protocol::Tcp),
        ]
    }

    pub fn rules(&self, family: Family) -> &[Rule] {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }

    fn rules_mut(&mut self, family: Family) -> &mut Vec<Rule> {
        match family {
            Family::V4 => &mut self.v4,
            Family::V6 => &mut self.v6,
        }
    }

    /// Number of destination accepts across both families
    pub fn destination_count(&self) -> usize {
        self.v4
            .iter()
            .chain(&self.v6)
            .filter(|r| matches!(r, Rule::AcceptDestination(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    fn ips(list: &[&str]) -> BTreeSet<IpAddr> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_rule_args() {
        assert_eq!(
            Rule::AcceptEstablished.to_args(Family::V4).join(" "),
            "-m state --state ESTABLISHED,RELATED -j ACCEPT"
        );
        assert_eq!(Rule::AcceptLoopback.to_args(Family::V6).join(" "), "-d ::1/128 -j ACCEPT");
        assert_eq!(
            Rule::AcceptDns(Protocol::Tcp).to_args(Family::V4).join(" "),
            "-p tcp --dport 53 -j ACCEPT"
        );
        let host: IpNet = "203.0.113.5/32".parse().unwrap();
        assert_eq!(
            Rule::AcceptDestination(host).to_args(Family::V4).join(" "),
            "-d 203.0.113.5 -j ACCEPT"
        );
        assert_eq!(
            Rule::Reject.to_args(Family::V6).join(" "),
            "-j REJECT --reject-with icmp6-adm-prohibited"
        );
    }

    #[test]
    fn test_chain_names() {
        let user = Username::parse("team-7").unwrap();
        let chains = ChainNames::new("CONTEST", &user);
        assert_eq!(chains.input, "CONTEST_TEAM_7_IN");
        assert_eq!(chains.output, "CONTEST_TEAM_7_OUT");

        let longest = Username::parse(&"x".repeat(16)).unwrap();
        assert!(ChainNames::new("CONTEST", &longest).output.len() <= 28);
    }

    #[test]
    fn test_rule_set_order_and_dedup() {
        let mut resolved = ResolvedIpSet::new();
        resolved.insert(Domain::parse("b.example").unwrap(), ips(&["198.51.100.9", "2001:db8::2"]));
        resolved.insert(Domain::parse("a.example").unwrap(), ips(&["203.0.113.1", "198.51.100.9"]));

        let set = RuleSet::build(&resolved, &["10.20.0.0/16".parse().unwrap()]);

        let v4: Vec<String> = set.v4.iter().map(|r| r.to_args(Family::V4).join(" ")).collect();
        assert_eq!(
            v4,
            vec![
                "-m state --state ESTABLISHED,RELATED -j ACCEPT",
                "-d 127.0.0.0/8 -j ACCEPT",
                "-p udp --dport 53 -j ACCEPT",
                "-p tcp --dport 53 -j ACCEPT",
                "-d 10.20.0.0/16 -j ACCEPT",
                "-d 198.51.100.9 -j ACCEPT",
                "-d 203.0.113.1 -j ACCEPT",
                "-j REJECT --reject-with icmp-host-unreachable",
            ]
        );
        assert_eq!(set.v6.len(), 6);
        assert_eq!(set.v6[4], Rule::AcceptDestination("2001:db8::2/128".parse().unwrap()));
        assert_eq!(set.destination_count(), 4);
    }

    #[test]
    fn test_reject_is_last() {
        let set = RuleSet::build(&ResolvedIpSet::new(), &[]);
        for family in Family::ALL {
            assert_eq!(set.rules(family).last(), Some(&Rule::Reject));
            assert_eq!(set.rules(family).len(), 5);
        }
    }
}
