/// Prompt assembly for the analysis call.
///
/// The system prompt teaches the command grammar the response parser
/// understands; the user message carries the task plus recent action history
/// so the model knows what has already been tried.

/// Number of history lines echoed back to the model.
const HISTORY_WINDOW: usize = 3;

pub fn system_prompt() -> String {
    "\
# On-screen task assistant

## Core rules
1. **Prefer marks**: first check whether the screenshot contains pink \
numbered badges. If marks are present you MUST act through them \
(`do(action=\"Tap\", mark=5)`) and must not use coordinates. If no marks \
are present, use normalized coordinates in the 0-1000 grid \
(`do(action=\"Tap\", element=[500,500])`).
2. **Swipes always use coordinates**: `start=[x1,y1], end=[x2,y2]`.
3. **Think, then act**: put a short analysis in `<think>` and one command \
per line inside `<act>`. Every reply must contain both blocks and at least \
one command.
4. To open an app, prefer `Launch`; fall back to tapping its icon only \
after a launch has failed.

## Commands
| Intent | Format |
| :--- | :--- |
| Tap a mark | `do(action=\"Tap\", mark=N)` |
| Tap coordinates | `do(action=\"Tap\", element=[x,y])` |
| Swipe | `do(action=\"Swipe\", start=[x1,y1], end=[x2,y2])` |
| Long press | `do(action=\"LongPress\", element=[x,y])` |
| Type text | `do(action=\"Type\", text=\"...\")` |
| Key press | `do(action=\"Enter\"/\"Back\"/\"Home\")` |
| Wait | `do(action=\"Wait\", duration=ms)` |
| Open app | `do(action=\"Launch\", app=\"name\")` |
| Need the user | `ask_user(reason=\"...\")` |
| Task finished | `finish(message=\"...\")` |

## Guidance
- Launch failed before -> tap the app icon instead.
- Unrelated screen -> `Back`.
- Target not visible -> `Swipe` to scroll and look.
- Passwords, verification codes or payments -> `ask_user`.

Perform the next step for the current screenshot."
        .to_string()
}

pub fn user_message(task: &str, history: &[String]) -> String {
    let mut msg = format!("Task: {task}\n");

    if !history.is_empty() {
        let start = history.len().saturating_sub(HISTORY_WINDOW);
        let recent = &history[start..];
        msg.push_str(&format!("Executed: {}\n", recent.join(" -> ")));

        let home_presses = recent.iter().filter(|line| line.contains("Home")).count();
        if home_presses >= 2 {
            msg.push_str("[Do not press Home again!]\n");
        }
        if history.iter().any(|line| line.contains("[launch failed]")) {
            msg.push_str("[Launch has failed before; tap the app icon instead]\n");
        }
    }

    msg.push_str(
        "Analyze the screenshot and perform the next step. \
         If pink numbered marks are visible, prefer mark=N.",
    );
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_echoes_recent_history_only() {
        let history: Vec<String> = (1..=5).map(|i| format!("Tap ({i}, {i})")).collect();
        let msg = user_message("open settings", &history);
        assert!(msg.contains("Tap (3, 3) -> Tap (4, 4) -> Tap (5, 5)"));
        assert!(!msg.contains("Tap (1, 1)"));
    }

    #[test]
    fn repeated_home_presses_trigger_the_guard() {
        let history = vec!["Home".to_string(), "Tap (5, 5)".to_string(), "Home".to_string()];
        let msg = user_message("t", &history);
        assert!(msg.contains("Do not press Home again"));
    }

    #[test]
    fn launch_failure_hint_survives_outside_the_window() {
        let mut history = vec!["[launch failed] no app named 'Setings'".to_string()];
        history.extend((0..5).map(|i| format!("Tap ({i}, 0)")));
        let msg = user_message("t", &history);
        assert!(msg.contains("tap the app icon instead"));
    }
}
