use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(RequestId, "chatcmpl");
branded_id!(ToolCallId, "call");
branded_id!(TabId, "tab");
branded_id!(ConversationId, "conv");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_has_prefix() {
        let id = RequestId::new();
        assert!(id.as_str().starts_with("chatcmpl_"), "got: {id}");
    }

    #[test]
    fn tool_call_id_has_prefix() {
        let id = ToolCallId::new();
        assert!(id.as_str().starts_with("call_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = TabId::new();
        let s = id.to_string();
        let parsed: TabId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_roundtrip() {
        let id = ConversationId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ConversationId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = TabId::from_raw("tab-77-left");
        assert_eq!(id.as_str(), "tab-77-left");
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<RequestId> = (0..100).map(|_| RequestId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0] < w[1], "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
