use crate::protocol::{ChatRequest, ContentBlock, Usage};
use std::time::Duration;
use tracing::info;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimate the input tokens of a chat request from its text blocks.
#[must_use]
pub fn estimate_request_tokens(request: &ChatRequest) -> u64 {
    let mut total: u64 = 0;
    for message in &request.messages {
        for block in &message.blocks {
            match block {
                ContentBlock::Text(text) => total += estimate_tokens(text),
                ContentBlock::Image { .. } => {
                    // Images are not counted via text tokenization
                }
            }
        }
    }
    total
}

/// Merge server-reported usage with local estimates.
///
/// Non-zero server values always win; zero or missing fields are filled from
/// the estimates and the total is recomputed when absent.
#[must_use]
pub fn merge_usage(upstream: Option<&Usage>, estimated_input: u64, estimated_output: u64) -> Usage {
    let upstream = upstream.copied().unwrap_or_default();
    let prompt_tokens = if upstream.prompt_tokens > 0 {
        upstream.prompt_tokens
    } else {
        estimated_input
    };
    let completion_tokens = if upstream.completion_tokens > 0 {
        upstream.completion_tokens
    } else {
        estimated_output
    };
    let total_tokens = if upstream.total_tokens > 0 {
        upstream.total_tokens
    } else {
        prompt_tokens + completion_tokens
    };
    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    }
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(model: &str, usage: &Usage, duration: Duration) {
    info!(
        model = model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChatMessage, Role};

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_estimate_request_tokens_ignores_images() {
        let request = ChatRequest::new(
            "qwen-vl-max",
            vec![ChatMessage::blocks(
                Role::User,
                vec![
                    ContentBlock::text("12345678"),
                    ContentBlock::image("https://x/y.png", "image/png"),
                ],
            )],
        );
        assert_eq!(estimate_request_tokens(&request), 2);
    }

    #[test]
    fn test_merge_usage_prefers_upstream() {
        let upstream = Usage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
        };
        let merged = merge_usage(Some(&upstream), 999, 999);
        assert_eq!(merged, upstream);
    }

    #[test]
    fn test_merge_usage_fills_missing() {
        let merged = merge_usage(None, 40, 20);
        assert_eq!(merged.prompt_tokens, 40);
        assert_eq!(merged.completion_tokens, 20);
        assert_eq!(merged.total_tokens, 60);
    }

    #[test]
    fn test_merge_usage_partial_upstream() {
        let upstream = Usage {
            prompt_tokens: 100,
            completion_tokens: 0,
            total_tokens: 0,
        };
        let merged = merge_usage(Some(&upstream), 50, 25);
        assert_eq!(merged.prompt_tokens, 100);
        assert_eq!(merged.completion_tokens, 25);
        assert_eq!(merged.total_tokens, 125);
    }
}
