use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

const SCHEME: &str = "msds:";

/// How a DataSet behaves.
///
/// Every field has a default, so hosts can embed this in their own configuration and only
/// spell out what they change.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSetOptions {
    /// Commit after every mutating call
    pub autocommit: bool,

    /// Reject every mutating call
    pub read_only: bool,

    pub name: Option<String>,
}

impl Default for DataSetOptions {
    fn default() -> Self {
        Self {
            autocommit: true,
            read_only: false,
            name: None,
        }
    }
}

/// A parsed open string: `msds:<provider>[?key=value&...]`.
///
/// The keys `autocommit`, `readonly` and `name` set `options`. Everything else is left for the
/// provider in `parameters`.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataSetUri {
    pub provider: String,
    pub options: DataSetOptions,
    pub parameters: IndexMap<String, String>,
}

impl DataSetUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::Uri(format!("{uri}: expected to start with {SCHEME}")))?;
        let (provider, query) = match rest.split_once('?') {
            Some((provider, query)) => (provider, Some(query)),
            None => (rest, None),
        };
        if provider.is_empty() {
            return Err(Error::Uri(format!("{uri}: missing provider name")));
        }

        let mut options = DataSetOptions::default();
        let mut parameters = IndexMap::new();
        for pair in query.into_iter().flat_map(|query| query.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Uri(format!("{uri}: expected key=value, got {pair}")))?;
            match key {
                "autocommit" => options.autocommit = parse_bool(uri, key, value)?,
                "readonly" => options.read_only = parse_bool(uri, key, value)?,
                "name" => options.name = Some(value.to_string()),
                _ => {
                    parameters.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(Self {
            provider: provider.to_string(),
            options,
            parameters,
        })
    }
}

fn parse_bool(uri: &str, key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::Uri(format!(
            "{uri}: {key} must be true or false, got {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() -> Result<()> {
        let uri = DataSetUri::parse("msds:memory?autocommit=false&name=scratch&path=/tmp/x")?;
        assert_eq!(uri.provider, "memory");
        assert!(!uri.options.autocommit);
        assert!(!uri.options.read_only);
        assert_eq!(uri.options.name.as_deref(), Some("scratch"));
        assert_eq!(uri.parameters.get("path").map(String::as_str), Some("/tmp/x"));

        let plain = DataSetUri::parse("msds:memory")?;
        assert_eq!(plain.options, DataSetOptions::default());
        assert!(plain.parameters.is_empty());

        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        for uri in [
            "memory",
            "msds:",
            "msds:memory?autocommit",
            "msds:memory?readonly=maybe",
        ] {
            assert!(matches!(DataSetUri::parse(uri), Err(Error::Uri(_))), "{uri}");
        }
    }

    #[test]
    fn test_options_defaults_from_config() {
        let options: DataSetOptions = serde_json::from_str(r#"{"read_only": true}"#).unwrap();
        assert!(options.autocommit);
        assert!(options.read_only);
        assert_eq!(options.name, None);
    }
}
