//! Error classification table.
//!
//! Each rule pairs an error-text pattern with a debugging hint. Rules are
//! evaluated in declaration order and every matching rule is reported.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionCategory {
    Syntax,
    Runtime,
    Dom,
    Security,
    Performance,
}

impl SuggestionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Runtime => "runtime",
            Self::Dom => "dom",
            Self::Security => "security",
            Self::Performance => "performance",
        }
    }
}

/// One entry of the classification table.
#[derive(Debug)]
pub struct SuggestionRule {
    pub pattern: Regex,
    pub suggestion: &'static str,
    pub category: SuggestionCategory,
}

static RULES: LazyLock<Vec<SuggestionRule>> = LazyLock::new(|| {
    use SuggestionCategory::*;

    [
        (
            r"(?i)unexpected token",
            "Check for missing or extra brackets, parentheses or commas near the reported position",
            Syntax,
        ),
        (
            r"(?i)unexpected end of input|unterminated",
            "A block, string or template literal is never closed",
            Syntax,
        ),
        (
            r"(?i)missing \) after argument list",
            "A function call is missing its closing parenthesis",
            Syntax,
        ),
        (
            r"(?i)invalid or unexpected token|syntax ?error",
            "The parser rejected the code; check quotes and pasted characters",
            Syntax,
        ),
        (
            r"(?i)is not defined",
            "The variable or function does not exist on this page; check the spelling or wait for the page script that defines it",
            Runtime,
        ),
        (
            r"(?i)cannot read propert(y|ies) of (null|undefined)",
            "A value is null or undefined; guard the access with optional chaining (?.) or an existence check",
            Runtime,
        ),
        (
            r"(?i)is not a function",
            "The called value is not a function; check the method name and the object it is called on",
            Runtime,
        ),
        (
            r"(?i)reading '(style|textContent|innerHTML|innerText|classList|addEventListener|appendChild|remove|value)'",
            "The element was not found; verify the selector or run the snippet after the page has loaded",
            Dom,
        ),
        (
            r"(?i)failed to execute '\w+' on '(Node|Element|Document)'",
            "A DOM operation was rejected; check that the node exists and is attached to the document",
            Dom,
        ),
        (
            r"(?i)cross-origin|blocked a frame",
            "The page is on a different origin and cannot be scripted from this context",
            Security,
        ),
        (
            r"(?i)securityerror|content security policy|refused to",
            "The page's security policy blocked the operation",
            Security,
        ),
        (
            r"(?i)maximum call stack size exceeded|too much recursion",
            "Infinite recursion detected; make sure recursive functions have a base case",
            Performance,
        ),
        (
            r"(?i)timed out|timeout",
            "The snippet exceeded its time budget; look for unbounded loops or long-running awaits",
            Performance,
        ),
    ]
    .into_iter()
    .map(|(pattern, suggestion, category)| SuggestionRule {
        pattern: Regex::new(pattern).unwrap(),
        suggestion,
        category,
    })
    .collect()
});

static POSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m):(\d+):(\d+)\)?\s*$").unwrap());

/// The full classification table, in evaluation order.
pub fn rules() -> &'static [SuggestionRule] {
    &RULES
}

/// Every rule matching `error_text`, in table order.
pub fn get_suggestions(error_text: &str) -> Vec<&'static SuggestionRule> {
    RULES
        .iter()
        .filter(|rule| rule.pattern.is_match(error_text))
        .collect()
}

/// Category of the first matching rule.
pub fn categorize(error_text: &str) -> Option<SuggestionCategory> {
    RULES
        .iter()
        .find(|rule| rule.pattern.is_match(error_text))
        .map(|rule| rule.category)
}

/// Best-effort `(line, column)` from the first stack frame that carries one.
pub fn extract_position(stack: &str) -> Option<(u32, u32)> {
    let caps = POSITION_RE.captures(stack)?;
    let line = caps.get(1)?.as_str().parse().ok()?;
    let column = caps.get(2)?.as_str().parse().ok()?;
    Some((line, column))
}
