//! Pre-flight validation of snippet source.
//!
//! Syntax errors block execution so invalid code never reaches the host.
//! Risky-but-legal constructs only produce warnings that travel with the
//! execution result.

use std::sync::LazyLock;

use oxc_allocator::Allocator;
use oxc_parser::Parser;
use oxc_span::SourceType;
use regex::Regex;
use serde::Serialize;

/// Maximum bracket nesting accepted before parsing.
const MAX_NESTING_DEPTH: usize = 256;

/// Heuristic risk patterns and the warning each one produces.
static RISK_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"while\s*\(\s*true\s*\)",
            "Possible infinite loop detected: while(true)",
        ),
        (
            r"for\s*\(\s*;\s*;\s*\)",
            "Possible infinite loop detected: for(;;)",
        ),
        (
            r"\bsetInterval\s*\(",
            "setInterval keeps running after the snippet finishes",
        ),
        (
            r"\bsetTimeout\s*\([^;]*,\s*0\s*\)",
            "Zero-delay setTimeout detected",
        ),
        (r"\beval\s*\(", "Dynamic code evaluation detected: eval()"),
        (
            r"\bnew\s+Function\s*\(",
            "Dynamic code evaluation detected: new Function()",
        ),
        (
            r"document\.write(ln)?\s*\(",
            "document.write() may replace the whole document",
        ),
        (
            r"document\.(documentElement|body)\.(inner|outer)HTML\s*=",
            "Whole-document rewrite via innerHTML/outerHTML",
        ),
    ]
    .into_iter()
    .map(|(pattern, warning)| (Regex::new(pattern).unwrap(), warning))
    .collect()
});

/// Outcome of validating one snippet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn invalid(error: String) -> Self {
        Self {
            is_valid: false,
            errors: vec![error],
            warnings: Vec::new(),
        }
    }

    /// The blocking error, if any.
    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(String::as_str)
    }
}

/// Validate snippet source before execution.
pub fn validate_code(code: &str, max_size: usize) -> ValidationReport {
    if code.trim().is_empty() {
        return ValidationReport::invalid("Code cannot be empty".to_string());
    }

    if code.len() > max_size {
        return ValidationReport::invalid(format!(
            "Code exceeds maximum size of {} bytes (got {})",
            max_size,
            code.len()
        ));
    }

    if let Err(depth) = check_nesting_depth(code) {
        return ValidationReport::invalid(format!(
            "Nesting depth {} exceeds maximum {}",
            depth, MAX_NESTING_DEPTH
        ));
    }

    if let Err(message) = check_syntax(code) {
        return ValidationReport::invalid(format!("Syntax error: {}", message));
    }

    ValidationReport {
        is_valid: true,
        errors: Vec::new(),
        warnings: scan_risks(code),
    }
}

/// Heuristic warnings for `code`, in table order.
pub fn scan_risks(code: &str) -> Vec<String> {
    RISK_PATTERNS
        .iter()
        .filter(|(re, _)| re.is_match(code))
        .map(|(_, warning)| warning.to_string())
        .collect()
}

/// Reject pathological bracket nesting before handing code to the parser.
/// Brackets inside string, template and comment spans are not counted.
/// Returns the offending depth on failure.
fn check_nesting_depth(code: &str) -> Result<(), usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Span {
        Code,
        Quoted(char),
        LineComment,
        BlockComment,
    }

    let mut depth: usize = 0;
    let mut span = Span::Code;
    let mut chars = code.chars().peekable();

    while let Some(ch) = chars.next() {
        match span {
            Span::Code => match ch {
                '\'' | '"' | '`' => span = Span::Quoted(ch),
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    span = Span::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    span = Span::BlockComment;
                }
                '{' | '[' | '(' => {
                    depth += 1;
                    if depth > MAX_NESTING_DEPTH {
                        return Err(depth);
                    }
                }
                '}' | ']' | ')' => depth = depth.saturating_sub(1),
                _ => {}
            },
            Span::Quoted(quote) => match ch {
                '\\' => {
                    chars.next();
                }
                c if c == quote => span = Span::Code,
                // Unterminated plain strings end at the line; the parser reports them.
                '\n' if quote != '`' => span = Span::Code,
                _ => {}
            },
            Span::LineComment => {
                if ch == '\n' {
                    span = Span::Code;
                }
            }
            Span::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    span = Span::Code;
                }
            }
        }
    }
    Ok(())
}

/// Parse `code` as the body of a plain (non-module) function.
fn check_syntax(code: &str) -> Result<(), String> {
    let source = format!("(function () {{\n{}\n}});", code);
    let allocator = Allocator::default();
    let source_type = SourceType::mjs().with_module(false);
    let ret = Parser::new(&allocator, &source, source_type).parse();

    if ret.panicked && ret.errors.is_empty() {
        return Err("parser could not recover from malformed input".to_string());
    }

    match ret.errors.first() {
        Some(err) => Err(err.to_string()),
        None => Ok(()),
    }
}
