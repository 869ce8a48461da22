use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::error::{Result, WebshotError};

/// domain -> set of command names, built once from `/json/protocol` at
/// startup. Mirrors `webcap.browser.Browser._commands`.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    domains: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Deserialize)]
struct ProtocolDescriptor {
    domains: Vec<DomainDescriptor>,
}

#[derive(Debug, Deserialize)]
struct DomainDescriptor {
    domain: String,
    #[serde(default)]
    commands: Vec<CommandDescriptor>,
}

#[derive(Debug, Deserialize)]
struct CommandDescriptor {
    name: String,
}

impl CapabilityTable {
    pub fn from_protocol_json(body: &str) -> Result<Self> {
        let descriptor: ProtocolDescriptor = serde_json::from_str(body)?;
        let mut domains = HashMap::new();
        for domain in descriptor.domains {
            let commands = domain.commands.into_iter().map(|c| c.name).collect();
            domains.insert(domain.domain, commands);
        }
        Ok(CapabilityTable { domains })
    }

    /// Validates `Domain.command` before it ever touches the wire.
    pub fn check(&self, method: &str) -> Result<()> {
        let (domain, subcommand) = method
            .split_once('.')
            .ok_or_else(|| WebshotError::protocol(format!("malformed command: {method}")))?;
        let commands = self.domains.get(domain).ok_or_else(|| {
            WebshotError::protocol(format!(
                "domain {domain} not supported (supported domains: {})",
                self.domains.keys().cloned().collect::<Vec<_>>().join(",")
            ))
        })?;
        if !commands.contains(subcommand) {
            return Err(WebshotError::protocol(format!(
                "command {subcommand} not supported for domain {domain} (supported commands: {})",
                commands.iter().cloned().collect::<Vec<_>>().join(",")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "domains": [
            {"domain": "Page", "commands": [{"name": "navigate"}, {"name": "enable"}]},
            {"domain": "Network", "commands": [{"name": "enable"}]}
        ]
    }"#;

    #[test]
    fn accepts_known_command() {
        let table = CapabilityTable::from_protocol_json(SAMPLE).unwrap();
        assert!(table.check("Page.navigate").is_ok());
    }

    #[test]
    fn rejects_unknown_domain() {
        let table = CapabilityTable::from_protocol_json(SAMPLE).unwrap();
        let err = table.check("BogusDomain.foo").unwrap_err();
        assert!(err.to_string().contains("BogusDomain"));
    }

    #[test]
    fn rejects_unknown_command_in_known_domain() {
        let table = CapabilityTable::from_protocol_json(SAMPLE).unwrap();
        assert!(table.check("Page.bogusCommand").is_err());
    }
}
