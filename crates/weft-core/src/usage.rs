use serde::{Deserialize, Serialize};

/// Usage counters as they appear on the wire in `message_start` and
/// `message_delta` frames. Every field is optional; the vendor sends
/// whichever it has.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UsagePayload {
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
}

/// Cumulative per-message usage. `message_delta` carries running totals, so
/// absorbing a payload overwrites rather than adds.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn absorb(&mut self, payload: &UsagePayload) {
        if let Some(n) = payload.input_tokens {
            self.input_tokens = n;
        }
        if let Some(n) = payload.output_tokens {
            self.output_tokens = n;
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_overwrites_present_fields_only() {
        let mut usage = TokenUsage::default();
        usage.absorb(&UsagePayload {
            input_tokens: Some(120),
            output_tokens: None,
        });
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.output_tokens, 0);

        usage.absorb(&UsagePayload {
            input_tokens: None,
            output_tokens: Some(33),
        });
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.output_tokens, 33);

        // Running totals replace, not accumulate.
        usage.absorb(&UsagePayload {
            input_tokens: None,
            output_tokens: Some(60),
        });
        assert_eq!(usage.output_tokens, 60);
        assert_eq!(usage.total_tokens(), 180);
    }

    #[test]
    fn payload_decodes_with_missing_fields() {
        let payload: UsagePayload = serde_json::from_str(r#"{"input_tokens":7}"#).unwrap();
        assert_eq!(payload.input_tokens, Some(7));
        assert_eq!(payload.output_tokens, None);
    }
}
