//! Extensions the connection knows how to talk to.
//!
//! Extension requests, events and errors use codes that the server assigns at runtime, so they
//! can only be used after the extension has been queried on the connection.

use std::collections::HashMap;

pub mod big_requests;
pub mod randr;

/// Codes assigned to an extension by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub major_opcode: u8,
    /// `0` if the extension has no events
    pub first_event: u8,
    /// `0` if the extension has no errors
    pub first_error: u8,
}

/// Results of `QueryExtension` on a connection, keyed by extension name
#[derive(Debug, Clone, Default)]
pub struct Extensions {
    queried: HashMap<String, Option<ExtensionInfo>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if the extension was not queried yet, `Some(None)` if the server does not have it
    pub fn get(&self, name: &str) -> Option<Option<ExtensionInfo>> {
        self.queried.get(name).copied()
    }

    pub fn insert(&mut self, name: &str, info: Option<ExtensionInfo>) {
        self.queried.insert(name.to_string(), info);
    }

    pub fn present(&self, name: &str) -> Option<ExtensionInfo> {
        self.get(name).flatten()
    }

    /// Extension that owns event `code`, together with the code relative to its first event
    pub fn for_event(&self, code: u8) -> Option<(&str, u8)> {
        self.queried
            .iter()
            .filter_map(|(name, info)| info.map(|info| (name, info.first_event)))
            .filter(|(_, first_event)| *first_event != 0 && *first_event <= code)
            .max_by_key(|(_, first_event)| *first_event)
            .map(|(name, first_event)| (name.as_str(), code - first_event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_map_to_extension() {
        let mut extensions = Extensions::new();
        extensions.insert(
            randr::EXTENSION_NAME,
            Some(ExtensionInfo {
                major_opcode: 140,
                first_event: 89,
                first_error: 147,
            }),
        );
        extensions.insert(
            "XFIXES",
            Some(ExtensionInfo {
                major_opcode: 138,
                first_event: 87,
                first_error: 140,
            }),
        );
        extensions.insert("NOT-THERE", None);

        assert_eq!(extensions.for_event(89), Some((randr::EXTENSION_NAME, 0)));
        assert_eq!(extensions.for_event(90), Some((randr::EXTENSION_NAME, 1)));
        assert_eq!(extensions.for_event(88), Some(("XFIXES", 1)));
        assert_eq!(extensions.for_event(22), None);
        assert_eq!(extensions.get("NOT-THERE"), Some(None));
        assert_eq!(extensions.get("SHAPE"), None);
    }
}
