// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use regex::Regex;

const PATTERN: &str = r"Endpoint=sb://(?P<namespace>[^;]*?)\.servicebus\.windows\.net/?;SharedAccessKeyName=(?P<key_name>[^;]*);SharedAccessKey=(?P<key>[^;]*)(?:;EntityPath=(?P<entity_path>[^;]*))?";

/// Parts of an Event Hub connection string, as copied from the Azure portal:
/// `Endpoint=sb://<ns>.servicebus.windows.net/;SharedAccessKeyName=<name>;SharedAccessKey=<key>[;EntityPath=<hub>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub namespace: String,
    pub key_name: String,
    pub key: String,
    pub entity_path: Option<String>,
}

impl ConnectionString {
    /// Returns `None` when `value` is not a recognizable connection string.
    pub fn parse(value: &str) -> Option<Self> {
        let pattern = Regex::new(PATTERN).ok()?;
        let captures = pattern.captures(value)?;
        let group = |name: &str| captures.name(name).map(|m| m.as_str().to_string());

        Some(Self {
            namespace: group("namespace")?,
            key_name: group("key_name")?,
            key: group("key")?,
            entity_path: group("entity_path").filter(|path| !path.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_entity_path() {
        let parsed = ConnectionString::parse(
            "Endpoint=sb://my-ns.servicebus.windows.net/;SharedAccessKeyName=send;\
             SharedAccessKey=a2V5PQ==;EntityPath=logs",
        )
        .expect("connection string");
        assert_eq!(
            parsed,
            ConnectionString {
                namespace: "my-ns".to_string(),
                key_name: "send".to_string(),
                key: "a2V5PQ==".to_string(),
                entity_path: Some("logs".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_without_entity_path() {
        let parsed = ConnectionString::parse(
            "Endpoint=sb://my-ns.servicebus.windows.net;SharedAccessKeyName=send;SharedAccessKey=k",
        )
        .expect("connection string");
        assert_eq!(parsed.namespace, "my-ns");
        assert_eq!(parsed.entity_path, None);
    }

    #[test]
    fn test_parse_rejects_other_strings() {
        assert_eq!(ConnectionString::parse("https://example.com"), None);
        assert_eq!(
            ConnectionString::parse("Endpoint=sb://my-ns.servicebus.windows.net/;SharedAccessKey=k"),
            None
        );
    }
}
