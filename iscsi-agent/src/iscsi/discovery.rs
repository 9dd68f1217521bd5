//! Parsing of sendtargets discovery output.

use tracing::warn;

/// One discoverable iSCSI endpoint, parsed from a single discovery
/// response line. Uniquely identified by (portal:port, iqn).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub portal: String,
    pub port: String,
    pub iqn: String,
}

impl Target {
    /// The `<host>:<port>` endpoint string that node-mode login/logout
    /// invocations expect.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.portal, self.port)
    }
}

/// Parse discovery output into targets, in line order.
///
/// A well-formed record looks like `1.2.3.4:3260,1 iqn.2005-10.org.example:disk1`:
/// endpoint and IQN separated by a single space, with a trailing portal
/// group tag after the comma. iscsiadm mixes warnings and progress
/// messages into discovery output on some versions, so lines that do not
/// match are skipped rather than failing the whole discovery.
pub fn parse_targets(raw: &str) -> Vec<Target> {
    let mut targets = Vec::new();

    for line in raw.lines() {
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() != 2 {
            skip(line);
            continue;
        }

        // Drop the ",<tag>" suffix, then split host from port.
        let endpoint = fields[0].split(',').next().unwrap_or(fields[0]);
        let Some((portal, port)) = endpoint.split_once(':') else {
            skip(line);
            continue;
        };

        targets.push(Target {
            portal: portal.to_string(),
            port: port.to_string(),
            iqn: fields[1].to_string(),
        });
    }

    targets
}

fn skip(line: &str) {
    if !line.trim().is_empty() {
        warn!(line = %line, "Skipping unrecognized discovery line");
    }
}
