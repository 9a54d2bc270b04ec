use serde_json::json;

use crate::browser::PageElement;

pub const AUDITOR_INSTRUCTION: &str = "You are a strict WCAG 2.2 accessibility auditor. \
Analyze the screenshot and the element list of a web page and report every accessibility \
violation you can substantiate. Focus on visual contrast, text alternatives, ARIA roles, \
keyboard operability, labels and structure. Each violation needs a rule id (the WCAG success \
criterion, e.g. \"1.4.3\"), a description, an impact (critical, serious, moderate or minor) \
and the affected nodes. Every node must carry the `html` snippet and the `target` CSS selectors \
exactly as they appear in the element list, so the node can be located on the live page.";

/// Spelled-out output shape for vendors without schema-constrained decoding.
pub const JSON_SHAPE_INSTRUCTION: &str = "Return only a JSON object with this exact structure: \
{\"violations\": [{\"id\": \"string\", \"description\": \"string\", \"impact\": \"string\", \
\"nodes\": [{\"html\": \"string\", \"target\": [\"string\"], \"failureSummary\": \"string\"}]}]}. \
Return {\"violations\": []} when the page has no violations.";

pub const SCREENSHOT_CAPTION: &str = "Here is the screenshot of the page:";

/// Condensed WCAG 2.2 success criteria, used when no other reference is configured.
const WCAG_RULES: &[(&str, &str)] = &[
    ("1.1.1", "Non-text content has a text alternative serving the same purpose."),
    ("1.2.2", "Prerecorded audio in synchronized media has captions."),
    ("1.3.1", "Structure and relationships shown visually are programmatically determinable."),
    ("1.3.2", "Reading order that affects meaning is programmatically determinable."),
    ("1.3.5", "The purpose of input fields collecting user data can be identified."),
    ("1.4.1", "Color is not the only visual means of conveying information."),
    ("1.4.3", "Text contrast is at least 4.5:1, or 3:1 for large text."),
    ("1.4.4", "Text can be resized to 200% without loss of content or function."),
    ("1.4.5", "Real text is used instead of images of text where possible."),
    ("1.4.10", "Content reflows at 400% zoom without horizontal scrolling."),
    ("1.4.11", "UI components and meaningful graphics have 3:1 contrast with neighbours."),
    ("1.4.12", "No content is lost when text spacing is increased."),
    ("1.4.13", "Content shown on hover or focus is dismissible, hoverable and persistent."),
    ("2.1.1", "All functionality is operable from a keyboard."),
    ("2.1.2", "Keyboard focus is never trapped."),
    ("2.4.1", "A mechanism exists to bypass repeated blocks of content."),
    ("2.4.2", "Pages have titles describing topic or purpose."),
    ("2.4.3", "Focus order preserves meaning and operability."),
    ("2.4.4", "Link purpose is clear from the link text or its context."),
    ("2.4.6", "Headings and labels describe topic or purpose."),
    ("2.4.7", "Keyboard focus is visible."),
    ("2.4.11", "Focused components are not entirely hidden by author content."),
    ("2.5.3", "The accessible name of a labelled component contains its visible label."),
    ("2.5.8", "Pointer targets are at least 24 by 24 CSS pixels or adequately spaced."),
    ("3.1.1", "The default human language of the page is programmatically determinable."),
    ("3.2.6", "Help mechanisms repeated across pages appear in a consistent order."),
    ("3.3.1", "Detected input errors are identified and described in text."),
    ("3.3.2", "Labels or instructions are provided for user input."),
    ("3.3.7", "Information already entered is not requested again in the same process."),
    ("3.3.8", "Authentication does not rely on a cognitive function test."),
    ("4.1.2", "UI components expose name, role, state and value to assistive technology."),
    ("4.1.3", "Status messages are programmatically determinable without focus."),
];

pub fn default_rule_reference() -> String {
    let mut out = String::from("WCAG 2.2 success criteria:\n");
    for (id, desc) in WCAG_RULES {
        out.push_str(&format!("- {}: {}\n", id, desc));
    }
    out
}

/// System prompt: caller instruction (or the default) followed by the rule reference.
pub fn system_prompt(system_instruction: Option<&str>, rule_reference: &str) -> String {
    let instruction = system_instruction.unwrap_or(AUDITOR_INSTRUCTION);
    if rule_reference.trim().is_empty() {
        instruction.to_string()
    } else {
        format!("{}\n\nUse this rule reference to guide the audit:\n{}", instruction, rule_reference)
    }
}

pub fn elements_text(elements: &[PageElement]) -> String {
    let listing = serde_json::to_string(elements).unwrap_or_else(|_| "[]".to_string());
    format!("Here are the elements on the page:\n\n{}", listing)
}

/// JSON schema for strict structured output. Optional fields are nullable
/// because strict mode requires every property to be listed as required.
pub fn violation_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["violations"],
        "properties": {
            "violations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["id", "description", "impact", "nodes"],
                    "properties": {
                        "id": {"type": "string"},
                        "description": {"type": "string"},
                        "impact": {"type": ["string", "null"]},
                        "nodes": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "additionalProperties": false,
                                "required": ["html", "target", "failureSummary"],
                                "properties": {
                                    "html": {"type": "string"},
                                    "target": {"type": "array", "items": {"type": "string"}},
                                    "failureSummary": {"type": ["string", "null"]}
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_appends_reference() {
        let prompt = system_prompt(None, "- 1.1.1: alt text");
        assert!(prompt.starts_with(AUDITOR_INSTRUCTION));
        assert!(prompt.ends_with("- 1.1.1: alt text"));

        assert_eq!(system_prompt(Some("custom"), "  "), "custom");
    }

    #[test]
    fn test_default_reference_lists_criteria() {
        let reference = default_rule_reference();
        assert!(reference.contains("- 1.4.3: "));
        assert_eq!(reference.lines().count(), WCAG_RULES.len() + 1);
    }
}
