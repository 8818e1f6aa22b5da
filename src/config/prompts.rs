//! Prompts for the reasoning model.

use chrono::Local;

use crate::actions::Plan;

/// How many past actions are echoed back to the model.
pub const HISTORY_WINDOW: usize = 10;

/// Date header prepended to every prompt.
pub fn date_header() -> String {
    format!("Today's date is: {}", Local::now().format("%B %d, %Y"))
}

/// Prompt for vision perception: the screenshot is attached separately.
pub fn vision_prompt(goal: &str, history: &[Plan]) -> String {
    format!(
        "{}\n{}\nGOAL: {}\n{}\n{}",
        date_header(),
        VISION_ROLE,
        quote(goal),
        history_section(history),
        VISION_CONTRACT
    )
}

/// Prompt for structural perception.
pub fn structural_prompt(
    goal: &str,
    url: &str,
    title: &str,
    elements_json: &str,
    site_note: &str,
    history: &[Plan],
) -> String {
    format!(
        "{}\n{}\nGOAL: {}\nURL: {}\nTITLE: {}\nMEMORY NOTE: {}\n{}\nELEMENTS: {}\n{}",
        date_header(),
        STRUCTURAL_ROLE,
        quote(goal),
        quote(url),
        quote(title),
        site_note,
        history_section(history),
        elements_json,
        STRUCTURAL_CONTRACT
    )
}

/// JSON-quote user-controlled text so it cannot break out of its field.
fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text.replace('"', "'")))
}

fn history_section(history: &[Plan]) -> String {
    if history.is_empty() {
        return "ACTIONS SO FAR: none".to_string();
    }
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let lines: Vec<String> = history[start..]
        .iter()
        .enumerate()
        .map(|(i, plan)| format!("{}. {}", start + i + 1, plan))
        .collect();
    format!("ACTIONS SO FAR:\n{}", lines.join("\n"))
}

const VISION_ROLE: &str = "ROLE: You are a vision-based autonomous web agent.\n\
Look at the attached screenshot of the web browser and find the interactive element \
(button, link, input field) needed to make progress towards the goal.";

const VISION_CONTRACT: &str = r#"INSTRUCTIONS:
1. If the goal is fully achieved on this screen, return {"action": "finish"}.
2. Otherwise, find the target element and return its approximate center coordinates.
3. Normalize the coordinates to a 0-1000 scale, where (0,0) is the top-left corner and (1000,1000) is the bottom-right corner.
4. To open a different address directly, return {"action": "navigate", "url": "https://..."}.

RETURN EXACTLY ONE JSON OBJECT AND NOTHING ELSE:
{"action": "click", "x": 500, "y": 150, "description": "Login button"}
OR
{"action": "type", "x": 500, "y": 300, "value": "test@mail.com", "description": "Email input"}
OR
{"action": "navigate", "url": "https://example.com"}
OR
{"action": "finish", "message": "What was achieved"}"#;

const STRUCTURAL_ROLE: &str = "ROLE: You are an autonomous web navigator.\n\
You are given the interactive elements of the current page as a JSON list of \
{tag, text, selector} objects.";

const STRUCTURAL_CONTRACT: &str = r#"INSTRUCTIONS:
1. If the goal is fully achieved on this page, return {"action": "finish"}.
2. To act on an element, copy its "selector" exactly from ELEMENTS. For "click", put the element's visible text in "value" so it can be found again if the selector is ambiguous. For "type", "value" is the text to enter.
3. Do not invent coordinates; this page is described by selectors only.

RETURN EXACTLY ONE JSON OBJECT AND NOTHING ELSE:
{"action": "click", "selector": "button#submit", "value": "Sign in"}
OR
{"action": "type", "selector": "input#search", "value": "text to enter"}
OR
{"action": "navigate", "url": "https://example.com"}
OR
{"action": "finish", "message": "What was achieved"}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Target;

    #[test]
    fn test_vision_prompt() {
        let prompt = vision_prompt("open \"mail\"", &[]);
        assert!(prompt.starts_with("Today's date is"));
        assert!(prompt.contains(r#"GOAL: "open \"mail\"""#));
        assert!(prompt.contains("0-1000 scale"));
        assert!(prompt.contains("ACTIONS SO FAR: none"));
    }

    #[test]
    fn test_structural_prompt() {
        let prompt = structural_prompt(
            "buy socks",
            "https://shop.test/",
            "Shop",
            r#"[{"tag":"A","text":"Socks","selector":"a.nav"}]"#,
            "New site.",
            &[],
        );
        assert!(prompt.contains("MEMORY NOTE: New site."));
        assert!(prompt.contains(r#"URL: "https://shop.test/""#));
        assert!(prompt.contains(r#""selector":"a.nav""#));
        assert!(!prompt.contains("0-1000 scale"));
    }

    #[test]
    fn test_history_window() {
        let history: Vec<Plan> = (0..15)
            .map(|i| Plan::Click {
                target: Target::Selector(format!("a#l{}", i)),
                value: None,
                description: None,
            })
            .collect();
        let section = history_section(&history);
        assert!(!section.contains("a#l4\n"));
        assert!(section.contains("6. click a#l5"));
        assert!(section.contains("15. click a#l14"));
        assert_eq!(section.lines().count(), HISTORY_WINDOW + 1);
    }
}
