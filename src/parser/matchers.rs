/// The fixed battery of action-pattern matchers.
///
/// Each matcher is independent and non-exclusive: a reply may contain several
/// matches across several matchers. Every matcher reports all of its matches
/// together with their byte offset in the action span, so the caller can
/// rebuild the model's intended source order across matcher boundaries.
use regex::Regex;

use crate::model::action::{
    Action, DEFAULT_LONG_PRESS_MS, DEFAULT_SWIPE_MS, DEFAULT_WAIT_MS,
};
use crate::model::coords::ScreenSize;

pub trait ActionMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    /// All matches in `span`, as (byte offset, action).
    fn try_parse(&self, span: &str, screen: &ScreenSize) -> Vec<(usize, Action)>;
}

/// `do(action="Tap", mark=N)`
pub struct TapMark {
    re: Regex,
}

impl TapMark {
    pub fn new() -> Self {
        Self {
            re: Regex::new(r#"(?i)do\s*\(\s*action\s*=\s*"Tap"\s*,\s*mark\s*=\s*(\d+)\s*\)"#)
                .unwrap(),
        }
    }
}

impl ActionMatcher for TapMark {
    fn name(&self) -> &'static str {
        "tap_mark"
    }

    fn try_parse(&self, span: &str, _screen: &ScreenSize) -> Vec<(usize, Action)> {
        self.re
            .captures_iter(span)
            .filter_map(|c| {
                let mark_id = c[1].parse().ok()?;
                Some((c.get(0)?.start(), Action::TapMark { mark_id }))
            })
            .collect()
    }
}

/// `do(action="Tap", element=[x,y])`, tolerating parentheses and a trailing
/// `message="..."` argument some models append.
pub struct TapCoord {
    re: Regex,
}

impl TapCoord {
    pub fn new() -> Self {
        Self {
            re: Regex::new(
                r#"(?i)do\s*\(\s*action\s*=\s*"Tap"\s*,\s*element\s*=\s*[\[(]\s*(\d+)\s*,\s*(\d+)\s*[\])]\s*(?:,\s*message\s*=\s*"[^"]*")?\s*\)"#,
            )
            .unwrap(),
        }
    }
}

impl ActionMatcher for TapCoord {
    fn name(&self) -> &'static str {
        "tap_coord"
    }

    fn try_parse(&self, span: &str, screen: &ScreenSize) -> Vec<(usize, Action)> {
        self.re
            .captures_iter(span)
            .filter_map(|c| {
                let x = c[1].parse().ok()?;
                let y = c[2].parse().ok()?;
                let (px, py) = screen.resolve_tap(x, y);
                Some((c.get(0)?.start(), Action::Tap { x: px, y: py }))
            })
            .collect()
    }
}

/// Malformed variant where the mark argument holds a coordinate pair:
/// `do(action="Tap", mark=[x,y])`. Treated as a coordinate tap.
pub struct TapMarkCoord {
    re: Regex,
}

impl TapMarkCoord {
    pub fn new() -> Self {
        Self {
            re: Regex::new(
                r#"(?i)do\s*\(\s*action\s*=\s*"Tap"\s*,\s*mark\s*=\s*[\[(](\d+)\s*,\s*(\d+)[\])]\s*\)"#,
            )
            .unwrap(),
        }
    }
}

impl ActionMatcher for TapMarkCoord {
    fn name(&self) -> &'static str {
        "tap_mark_coord"
    }

    fn try_parse(&self, span: &str, screen: &ScreenSize) -> Vec<(usize, Action)> {
        self.re
            .captures_iter(span)
            .filter_map(|c| {
                let x = c[1].parse().ok()?;
                let y = c[2].parse().ok()?;
                let (px, py) = screen.resolve_tap(x, y);
                Some((c.get(0)?.start(), Action::Tap { x: px, y: py }))
            })
            .collect()
    }
}

/// `do(action="Swipe", start=[x1,y1], end=[x2,y2])` with optional duration.
pub struct Swipe {
    re: Regex,
}

impl Swipe {
    pub fn new() -> Self {
        Self {
            re: Regex::new(
                r#"(?i)do\s*\(\s*action\s*=\s*"Swipe"\s*,\s*start\s*=\s*[\[(](\d+)\s*,\s*(\d+)[\])]\s*,\s*end\s*=\s*[\[(](\d+)\s*,\s*(\d+)[\])](?:\s*,\s*duration\s*=\s*"?(\d+)"?)?"#,
            )
            .unwrap(),
        }
    }
}

impl ActionMatcher for Swipe {
    fn name(&self) -> &'static str {
        "swipe"
    }

    fn try_parse(&self, span: &str, screen: &ScreenSize) -> Vec<(usize, Action)> {
        self.re
            .captures_iter(span)
            .filter_map(|c| {
                let x1 = c[1].parse().ok()?;
                let y1 = c[2].parse().ok()?;
                let x2 = c[3].parse().ok()?;
                let y2 = c[4].parse().ok()?;
                let duration_ms = c
                    .get(5)
                    .and_then(|m| m.as_str().parse().ok())
                    .filter(|&d: &u32| d > 0)
                    .unwrap_or(DEFAULT_SWIPE_MS);
                let (px1, py1, px2, py2) = screen.resolve_swipe(x1, y1, x2, y2);
                Some((
                    c.get(0)?.start(),
                    Action::Swipe { x1: px1, y1: py1, x2: px2, y2: py2, duration_ms },
                ))
            })
            .collect()
    }
}

/// `do(action="LongPress", element=[x,y])` with optional duration.
pub struct LongPress {
    re: Regex,
}

impl LongPress {
    pub fn new() -> Self {
        Self {
            re: Regex::new(
                r#"(?i)do\s*\(\s*action\s*=\s*"LongPress"\s*,\s*element\s*=\s*[\[(]\s*(\d+)\s*,\s*(\d+)\s*[\])](?:\s*,\s*duration\s*=\s*"?(\d+)"?)?\s*\)"#,
            )
            .unwrap(),
        }
    }
}

impl ActionMatcher for LongPress {
    fn name(&self) -> &'static str {
        "long_press"
    }

    fn try_parse(&self, span: &str, screen: &ScreenSize) -> Vec<(usize, Action)> {
        self.re
            .captures_iter(span)
            .filter_map(|c| {
                let x = c[1].parse().ok()?;
                let y = c[2].parse().ok()?;
                let duration_ms = c
                    .get(3)
                    .and_then(|m| m.as_str().parse().ok())
                    .filter(|&d: &u32| d > 0)
                    .unwrap_or(DEFAULT_LONG_PRESS_MS);
                let (px, py) = screen.resolve_tap(x, y);
                Some((c.get(0)?.start(), Action::LongPress { x: px, y: py, duration_ms }))
            })
            .collect()
    }
}

/// `do(action="Type", text="...")`; some models emit `Type_Name`.
pub struct TypeText {
    re: Regex,
}

impl TypeText {
    pub fn new() -> Self {
        Self {
            re: Regex::new(
                r#"(?i)do\s*\(\s*action\s*=\s*"Type(?:_Name)?"\s*,\s*text\s*=\s*"([^"]*)"\s*\)"#,
            )
            .unwrap(),
        }
    }
}

impl ActionMatcher for TypeText {
    fn name(&self) -> &'static str {
        "type_text"
    }

    fn try_parse(&self, span: &str, _screen: &ScreenSize) -> Vec<(usize, Action)> {
        self.re
            .captures_iter(span)
            .filter_map(|c| Some((c.get(0)?.start(), Action::Input { text: c[1].to_string() })))
            .collect()
    }
}

/// `do(action="Launch", app="...")`
pub struct Launch {
    re: Regex,
}

impl Launch {
    pub fn new() -> Self {
        Self {
            re: Regex::new(r#"(?i)do\s*\(\s*action\s*=\s*"Launch"\s*,\s*app\s*=\s*"([^"]*)"\s*\)"#)
                .unwrap(),
        }
    }
}

impl ActionMatcher for Launch {
    fn name(&self) -> &'static str {
        "launch"
    }

    fn try_parse(&self, span: &str, _screen: &ScreenSize) -> Vec<(usize, Action)> {
        self.re
            .captures_iter(span)
            .filter_map(|c| {
                Some((c.get(0)?.start(), Action::Launch { app_name: c[1].to_string() }))
            })
            .collect()
    }
}

/// `finish(message="...")`
pub struct Finish {
    re: Regex,
}

impl Finish {
    pub fn new() -> Self {
        Self {
            re: Regex::new(r#"(?i)finish\s*\(\s*message\s*=\s*"([^"]*)"\s*\)"#).unwrap(),
        }
    }
}

impl ActionMatcher for Finish {
    fn name(&self) -> &'static str {
        "finish"
    }

    fn try_parse(&self, span: &str, _screen: &ScreenSize) -> Vec<(usize, Action)> {
        self.re
            .captures_iter(span)
            .filter_map(|c| Some((c.get(0)?.start(), Action::Done { message: c[1].to_string() })))
            .collect()
    }
}

/// `ask_user(reason="..."[, suggestion="..."])`
pub struct AskUser {
    re: Regex,
}

impl AskUser {
    pub fn new() -> Self {
        Self {
            re: Regex::new(
                r#"(?i)ask_user\s*\(\s*reason\s*=\s*"([^"]*)"(?:\s*,\s*suggestion\s*=\s*"([^"]*)")?\s*\)"#,
            )
            .unwrap(),
        }
    }
}

impl ActionMatcher for AskUser {
    fn name(&self) -> &'static str {
        "ask_user"
    }

    fn try_parse(&self, span: &str, _screen: &ScreenSize) -> Vec<(usize, Action)> {
        self.re
            .captures_iter(span)
            .filter_map(|c| {
                Some((
                    c.get(0)?.start(),
                    Action::AskUser {
                        reason: c[1].to_string(),
                        suggestion: c.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
                    },
                ))
            })
            .collect()
    }
}

/// Zero-argument actions: `do(action="Back|Home|Enter|Wait")`, Wait taking an
/// optional duration in either spelling.
pub struct Simple {
    re: Regex,
}

impl Simple {
    pub fn new() -> Self {
        Self {
            re: Regex::new(
                r#"(?i)do\s*\(\s*action\s*=\s*"(Back|Home|Enter|Wait)"(?:\s*,\s*(?:duration|milliseconds)\s*=\s*"?(\d+)"?)?\s*\)"#,
            )
            .unwrap(),
        }
    }
}

impl ActionMatcher for Simple {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn try_parse(&self, span: &str, _screen: &ScreenSize) -> Vec<(usize, Action)> {
        self.re
            .captures_iter(span)
            .filter_map(|c| {
                let action = match c[1].to_ascii_lowercase().as_str() {
                    "back" => Action::Back,
                    "home" => Action::Home,
                    "enter" => Action::Enter,
                    "wait" => Action::Wait {
                        ms: c
                            .get(2)
                            .and_then(|m| m.as_str().parse().ok())
                            .unwrap_or(DEFAULT_WAIT_MS),
                    },
                    _ => return None,
                };
                Some((c.get(0)?.start(), action))
            })
            .collect()
    }
}

/// Battery construction order. Source offsets, not this order, decide the
/// final action sequence.
pub fn battery() -> Vec<Box<dyn ActionMatcher>> {
    vec![
        Box::new(TapMark::new()),
        Box::new(TapCoord::new()),
        Box::new(TapMarkCoord::new()),
        Box::new(Swipe::new()),
        Box::new(LongPress::new()),
        Box::new(TypeText::new()),
        Box::new(Launch::new()),
        Box::new(Finish::new()),
        Box::new(AskUser::new()),
        Box::new(Simple::new()),
    ]
}
