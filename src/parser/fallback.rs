/// Last-resort parsing for replies that carry no `do(...)` style command.
///
/// Three stages, narrowest intent first: keyword cues, a trailing
/// bracket-delimited coordinate pair, and finally a structured JSON object
/// for older model formats that emit one explicit action object.
use crate::model::action::{Action, DEFAULT_WAIT_MS};
use crate::model::coords::ScreenSize;

pub const DEFAULT_DONE_MESSAGE: &str = "task complete";

/// Keyword cues scanned over the action span.
pub fn keyword_action(span: &str) -> Option<Action> {
    let lower = span.to_lowercase();
    if lower.contains("task complete") || lower.contains("finish") {
        Some(Action::Done { message: DEFAULT_DONE_MESSAGE.into() })
    } else if lower.contains("go back") {
        Some(Action::Back)
    } else if lower.contains("home screen") || lower.contains("main screen") {
        Some(Action::Home)
    } else {
        None
    }
}

/// The LAST `[x,y]` / `(x,y)` pair in the span, read as a tap target.
pub fn trailing_coordinate(span: &str, screen: &ScreenSize) -> Option<Action> {
    let re = regex::Regex::new(r"[\[(]\s*(\d+)\s*,\s*(\d+)\s*[\])]").unwrap();
    let caps = re.captures_iter(span).last()?;
    let x: i32 = caps[1].parse().ok()?;
    let y: i32 = caps[2].parse().ok()?;
    let (px, py) = screen.resolve_tap(x, y);
    Some(Action::Tap { x: px, y: py })
}

/// A single structured action object embedded in the reply, e.g.
/// `{"action": "tap", "x": 500, "y": 500}`.
pub fn json_action(content: &str, screen: &ScreenSize) -> Option<Action> {
    let candidate = extract_json(content);
    if !candidate.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&candidate).ok()?;
    let action_type = value.get("action")?.as_str()?;

    match action_type.to_lowercase().as_str() {
        "tap" | "click" => {
            let x = value.get("x").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
            let y = value.get("y").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
            let (px, py) = screen.resolve_tap(x, y);
            Some(Action::Tap { x: px, y: py })
        }
        "input" | "type" => Some(Action::Input {
            text: value
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        "back" => Some(Action::Back),
        "home" => Some(Action::Home),
        "wait" => Some(Action::Wait {
            ms: value
                .get("duration")
                .and_then(|v| v.as_u64())
                .unwrap_or(DEFAULT_WAIT_MS),
        }),
        "done" | "finish" => Some(Action::Done { message: DEFAULT_DONE_MESSAGE.into() }),
        _ => None,
    }
}

/// Pull the most plausible JSON object out of free text: a fenced code block
/// first, then the first balanced brace span, then a loose first-to-last
/// brace slice.
fn extract_json(content: &str) -> String {
    let fence = regex::Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?```").unwrap();
    if let Some(caps) = fence.captures(content) {
        let extracted = caps[1].trim();
        if extracted.starts_with('{') {
            return extracted.to_string();
        }
    }

    let mut depth = 0i32;
    let mut start = None;
    for (i, ch) in content.char_indices() {
        match ch {
            '{' => {
                if start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return content[s..=i].to_string();
                    }
                }
            }
            _ => {}
        }
    }

    if let (Some(s), Some(e)) = (content.find('{'), content.rfind('}')) {
        if e > s {
            return content[s..=e].to_string();
        }
    }

    content.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: ScreenSize = ScreenSize { width: 1000, height: 1000 };

    #[test]
    fn keyword_done_wins_over_back() {
        let action = keyword_action("I will finish now and go back").unwrap();
        assert!(matches!(action, Action::Done { .. }));
    }

    #[test]
    fn trailing_pair_takes_the_last_match() {
        let action = trailing_coordinate("ignore [100,100], tap [500, 600]", &SCREEN).unwrap();
        assert_eq!(action, Action::Tap { x: 500, y: 600 });
    }

    #[test]
    fn json_action_from_fenced_block() {
        let text = "here you go\n```json\n{\"action\": \"tap\", \"x\": 400, \"y\": 300}\n```";
        let action = json_action(text, &SCREEN).unwrap();
        assert_eq!(action, Action::Tap { x: 400, y: 300 });
    }

    #[test]
    fn json_action_from_bare_object() {
        let text = "result: {\"action\": \"input\", \"text\": \"hello\"}";
        let action = json_action(text, &SCREEN).unwrap();
        assert_eq!(action, Action::Input { text: "hello".into() });
    }

    #[test]
    fn unknown_json_action_is_rejected() {
        assert!(json_action("{\"action\": \"teleport\"}", &SCREEN).is_none());
    }
}
