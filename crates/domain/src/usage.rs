use serde::{Deserialize, Serialize};

/// Token usage for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Which part of the system issued an LLM call. Recorded on every usage
/// row so costs can be attributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageComponent {
    Agent,
    Router,
    Delegate,
    Summarizer,
    Compressor,
}

impl UsageComponent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Router => "router",
            Self::Delegate => "delegate",
            Self::Summarizer => "summarizer",
            Self::Compressor => "compressor",
        }
    }
}

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Dollars per 1 million input (prompt) tokens.
    pub input_per_1m: f64,
    /// Dollars per 1 million output (completion) tokens.
    pub output_per_1m: f64,
}

impl ModelPricing {
    /// Estimated cost in USD for the given token counts.
    pub fn estimate_cost(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 * self.input_per_1m
            + usage.completion_tokens as f64 * self.output_per_1m)
            / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_and_add() {
        let mut a = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
        };
        let b = TokenUsage {
            prompt_tokens: 50,
            completion_tokens: 5,
        };
        a.add(&b);
        assert_eq!(a.prompt_tokens, 150);
        assert_eq!(a.completion_tokens, 25);
        assert_eq!(a.total(), 175);
    }

    #[test]
    fn pricing_estimate() {
        let pricing = ModelPricing {
            input_per_1m: 3.0,
            output_per_1m: 15.0,
        };
        let usage = TokenUsage {
            prompt_tokens: 1_000_000,
            completion_tokens: 200_000,
        };
        let cost = pricing.estimate_cost(&usage);
        assert!((cost - 6.0).abs() < 1e-9);
    }

    #[test]
    fn component_tags_snake_case() {
        assert_eq!(
            serde_json::to_string(&UsageComponent::Summarizer).unwrap(),
            "\"summarizer\""
        );
        assert_eq!(UsageComponent::Router.as_str(), "router");
    }
}
