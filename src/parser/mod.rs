//! Free-text model reply parser.
//!
//! A reply is loosely structured: an optional `<think>` block, an optional
//! `status:` line, and an action span (`<act>`/`<answer>` tags, or the whole
//! text). The span is run through a fixed battery of independent pattern
//! matchers; all matches are collected and ordered by source offset, so
//! multi-action replies execute in the order the model wrote them. When the
//! battery finds nothing, a narrower legacy fallback is tried before giving
//! up with a parse error.

pub mod fallback;
pub mod matchers;

use std::sync::OnceLock;

use crate::errors::{SeeTapError, SeeTapResult};
use crate::model::action::{AIResponse, Action};
use crate::model::coords::ScreenSize;
use crate::parser::matchers::ActionMatcher;

const RAW_TEXT_LIMIT: usize = 1000;
const EXCERPT_LIMIT: usize = 200;

fn battery() -> &'static [Box<dyn ActionMatcher>] {
    static BATTERY: OnceLock<Vec<Box<dyn ActionMatcher>>> = OnceLock::new();
    BATTERY.get_or_init(matchers::battery)
}

/// Parse one raw model reply into an ordered action list.
pub fn parse_response(content: &str, screen: &ScreenSize) -> SeeTapResult<AIResponse> {
    let thinking_text = extract_thinking(content);
    let status_text = extract_status(content).unwrap_or_default();
    let span = action_span(content);

    let mut located: Vec<(usize, Action)> = Vec::new();
    for matcher in battery() {
        let found = matcher.try_parse(span, screen);
        if !found.is_empty() {
            tracing::debug!(matcher = matcher.name(), matches = found.len(), "pattern matched");
        }
        located.extend(found);
    }
    located.sort_by_key(|(offset, _)| *offset);
    let mut actions: Vec<Action> = located.into_iter().map(|(_, a)| a).collect();

    if actions.is_empty() {
        tracing::warn!("no structured action matched, trying legacy fallback");
        if let Some(a) = fallback::keyword_action(span) {
            actions.push(a);
        }
        if actions.is_empty() {
            if let Some(a) = fallback::trailing_coordinate(span, screen) {
                actions.push(a);
            }
        }
        if actions.is_empty() {
            if let Some(a) = fallback::json_action(content, screen) {
                actions.push(a);
            }
        }
    }

    let Some(primary_action) = actions.first().cloned() else {
        return Err(SeeTapError::Parse(format!(
            "no recoverable action in reply: {}",
            excerpt(content, EXCERPT_LIMIT)
        )));
    };

    Ok(AIResponse {
        primary_action,
        actions,
        status_text,
        thinking_text,
        raw_text: excerpt(content, RAW_TEXT_LIMIT),
    })
}

/// Reasoning block: a `<think>` pair, or everything before the first
/// recognized action token for models that skip the tags.
fn extract_thinking(content: &str) -> Option<String> {
    let think = regex::Regex::new(r"(?s)<think>\s*(.*?)\s*</think>").unwrap();
    if let Some(caps) = think.captures(content) {
        return Some(caps[1].trim().to_string());
    }

    let lower = content.to_lowercase();
    let first_token = ["<act>", "do(", "<answer>"]
        .into_iter()
        .filter_map(|t| lower.find(t))
        .min()?;
    if first_token > 0 && content.is_char_boundary(first_token) {
        let head = content[..first_token].trim();
        if !head.is_empty() {
            return Some(head.to_string());
        }
    }
    None
}

fn extract_status(content: &str) -> Option<String> {
    let re = regex::Regex::new(r"(?i)status:\s*([^\n]+)").unwrap();
    re.captures(content)
        .map(|caps| caps[1].trim().to_string())
}

/// The action-bearing slice of the reply.
fn action_span(content: &str) -> &str {
    let act = regex::Regex::new(r"(?s)<act>\s*(.*?)\s*</act>").unwrap();
    if let Some(caps) = act.captures(content) {
        return &content[caps.get(1).unwrap().range()];
    }
    let answer = regex::Regex::new(r"(?s)<answer>\s*(.*?)\s*</answer>").unwrap();
    if let Some(caps) = answer.captures(content) {
        return &content[caps.get(1).unwrap().range()];
    }
    content
}

fn excerpt(content: &str, limit: usize) -> String {
    content.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: ScreenSize = ScreenSize { width: 1080, height: 2400 };

    #[test]
    fn tap_mark_reply_parses() {
        let resp = parse_response(
            "<think>mark 5 is the target</think>\n<act>do(action=\"Tap\", mark=5)</act>",
            &SCREEN,
        )
        .unwrap();
        assert_eq!(resp.actions, vec![Action::TapMark { mark_id: 5 }]);
        assert_eq!(resp.thinking_text.as_deref(), Some("mark 5 is the target"));
    }

    #[test]
    fn untagged_reasoning_is_taken_from_the_head() {
        let resp = parse_response(
            "The search box sits at the top.\ndo(action=\"Tap\", element=[500,100])",
            &SCREEN,
        )
        .unwrap();
        assert_eq!(
            resp.thinking_text.as_deref(),
            Some("The search box sits at the top.")
        );
        assert_eq!(resp.actions, vec![Action::Tap { x: 540, y: 240 }]);
    }

    #[test]
    fn multi_action_reply_preserves_source_order() {
        let text = "<act>\n\
                    do(action=\"Tap\", mark=3)\n\
                    do(action=\"Type\", text=\"weather\")\n\
                    do(action=\"Enter\")\n\
                    </act>";
        let resp = parse_response(text, &SCREEN).unwrap();
        assert_eq!(
            resp.actions,
            vec![
                Action::TapMark { mark_id: 3 },
                Action::Input { text: "weather".into() },
                Action::Enter,
            ]
        );
        assert_eq!(resp.primary_action, Action::TapMark { mark_id: 3 });
    }

    #[test]
    fn source_order_beats_matcher_registration_order() {
        // The simple matcher registers after tap, yet Back leads here.
        let text = "<act>do(action=\"Back\")\ndo(action=\"Tap\", mark=1)</act>";
        let resp = parse_response(text, &SCREEN).unwrap();
        assert_eq!(resp.actions, vec![Action::Back, Action::TapMark { mark_id: 1 }]);
    }

    #[test]
    fn malformed_mark_pair_becomes_coordinate_tap() {
        let resp =
            parse_response("do(action=\"Tap\", mark=[500,500])", &SCREEN).unwrap();
        assert_eq!(resp.actions, vec![Action::Tap { x: 540, y: 1200 }]);
    }

    #[test]
    fn swipe_with_pixel_range_skips_normalization() {
        let resp = parse_response(
            "do(action=\"Swipe\", start=[500,500], end=[1200,800])",
            &SCREEN,
        )
        .unwrap();
        assert_eq!(
            resp.actions,
            vec![Action::Swipe { x1: 500, y1: 500, x2: 1200, y2: 800, duration_ms: 300 }]
        );
    }

    #[test]
    fn ask_user_with_suggestion() {
        let resp = parse_response(
            "ask_user(reason=\"payment screen\", suggestion=\"enter the PIN\")",
            &SCREEN,
        )
        .unwrap();
        assert_eq!(
            resp.actions,
            vec![Action::AskUser {
                reason: "payment screen".into(),
                suggestion: "enter the PIN".into()
            }]
        );
    }

    #[test]
    fn finish_carries_its_message() {
        let resp = parse_response("finish(message=\"battery is 81%\")", &SCREEN).unwrap();
        assert_eq!(resp.actions, vec![Action::Done { message: "battery is 81%".into() }]);
    }

    #[test]
    fn wait_defaults_to_one_second() {
        let resp = parse_response("do(action=\"Wait\")", &SCREEN).unwrap();
        assert_eq!(resp.actions, vec![Action::Wait { ms: 1000 }]);
        let resp = parse_response("do(action=\"Wait\", duration=250)", &SCREEN).unwrap();
        assert_eq!(resp.actions, vec![Action::Wait { ms: 250 }]);
    }

    #[test]
    fn status_line_is_extracted() {
        let resp = parse_response(
            "status: opening settings\ndo(action=\"Tap\", mark=2)",
            &SCREEN,
        )
        .unwrap();
        assert_eq!(resp.status_text, "opening settings");
    }

    #[test]
    fn answer_tags_also_delimit_the_span() {
        let resp = parse_response(
            "<answer>do(action=\"Launch\", app=\"Settings\")</answer>",
            &SCREEN,
        )
        .unwrap();
        assert_eq!(resp.actions, vec![Action::Launch { app_name: "Settings".into() }]);
    }

    #[test]
    fn bare_coordinate_fallback_taps_the_last_pair() {
        let resp = parse_response("I would click at [250, 250] or maybe [300, 400]", &SCREEN)
            .unwrap();
        assert_eq!(resp.actions, vec![Action::Tap { x: 324, y: 960 }]);
    }

    #[test]
    fn gibberish_is_a_parse_error() {
        let err = parse_response("I am not sure what to do here.", &SCREEN).unwrap_err();
        assert!(matches!(err, SeeTapError::Parse(_)));
    }

    #[test]
    fn parse_error_excerpt_is_truncated() {
        let long = "x".repeat(5000);
        let err = parse_response(&long, &SCREEN).unwrap_err();
        assert!(err.to_string().len() < 300);
    }
}
