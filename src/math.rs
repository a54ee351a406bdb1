//! Protect LaTeX from the Markdown parser.
//!
//! Math spans are swapped for `@@N@@` placeholders before parsing so that
//! `_`, `*` and `\` inside formulas reach the page untouched, then put back
//! (HTML-escaped) into the generated HTML. Typesetting itself happens in the
//! browser.

use regex::Regex;
use std::sync::LazyLock;

use crate::markdown::html_escape;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@@(\d+)@@").expect("placeholder regex"));
static LEADING_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@\d+@@").expect("leading placeholder regex"));

/// Replace math in `text` with placeholders.
///
/// Recognized: `$...$`, `$$...$$`, `\(...\)`, `\[...\]` and
/// `\begin{env}...\end{env}`. Code spans and fenced code blocks are copied
/// verbatim. A literal `@@N@@` already in the text is captured too, so it
/// survives the round trip unchanged.
pub fn remove_math(text: &str) -> (String, Vec<String>) {
    let mut out = String::with_capacity(text.len());
    let mut math = Vec::new();
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];
        let at_line_start = i == 0 || text[..i].ends_with('\n');

        if at_line_start {
            if let Some(len) = fenced_block_len(rest) {
                out.push_str(&rest[..len]);
                i += len;
                continue;
            }
        }

        let span = if rest.starts_with('`') {
            let len = code_span_len(rest);
            out.push_str(&rest[..len]);
            i += len;
            continue;
        } else if rest.starts_with("\\$") {
            out.push_str("\\$");
            i += 2;
            continue;
        } else if rest.starts_with("@@") {
            LEADING_PLACEHOLDER.find(rest).map(|m| m.end())
        } else if rest.starts_with("$$") {
            find_unescaped(&rest[2..], "$$").map(|end| end + 4)
        } else if rest.starts_with('$') {
            inline_dollar_len(rest)
        } else if rest.starts_with("\\[") {
            rest[2..].find("\\]").map(|end| end + 4)
        } else if rest.starts_with("\\(") {
            rest[2..].find("\\)").map(|end| end + 4)
        } else if rest.starts_with("\\begin{") {
            environment_len(rest)
        } else {
            None
        };

        match span {
            Some(len) => {
                out.push_str(&format!("@@{}@@", math.len()));
                math.push(rest[..len].to_string());
                i += len;
            }
            None => {
                let ch = rest.chars().next().map(char::len_utf8).unwrap_or(1);
                out.push_str(&rest[..ch]);
                i += ch;
            }
        }
    }

    (out, math)
}

/// Put math back into rendered HTML.
pub fn replace_math(html: &str, math: &[String]) -> String {
    if math.is_empty() {
        return html.to_string();
    }
    PLACEHOLDER
        .replace_all(html, |caps: &regex::Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|n| math.get(n))
                .map(|m| html_escape(m))
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn fenced_block_len(rest: &str) -> Option<usize> {
    let trimmed = rest.trim_start_matches(' ');
    let indent = rest.len() - trimmed.len();
    if indent > 3 {
        return None;
    }
    let fence_char = trimmed.chars().next()?;
    if fence_char != '`' && fence_char != '~' {
        return None;
    }
    let fence_len = trimmed.chars().take_while(|c| *c == fence_char).count();
    if fence_len < 3 {
        return None;
    }

    // Skip the opening line, then look for a closing fence of at least the same length.
    let mut pos = match rest.find('\n') {
        Some(nl) => nl + 1,
        None => return Some(rest.len()),
    };
    while pos < rest.len() {
        let line_end = rest[pos..].find('\n').map(|n| pos + n + 1).unwrap_or(rest.len());
        let line = rest[pos..line_end].trim();
        if line.len() >= fence_len && line.chars().all(|c| c == fence_char) {
            return Some(line_end);
        }
        pos = line_end;
    }
    Some(rest.len())
}

fn code_span_len(rest: &str) -> usize {
    let ticks = rest.chars().take_while(|c| *c == '`').count();
    let fence = &rest[..ticks];
    let mut search = ticks;
    while let Some(found) = rest[search..].find(fence) {
        let start = search + found;
        let run = rest[start..].chars().take_while(|c| *c == '`').count();
        if run == ticks {
            return start + ticks;
        }
        search = start + run;
    }
    // Unmatched opener: only the backticks themselves are literal.
    ticks
}

fn inline_dollar_len(rest: &str) -> Option<usize> {
    let body = &rest[1..];
    let end = find_unescaped(body, "$")?;
    let inner = &body[..end];
    if inner.is_empty() || inner.contains("\n\n") {
        return None;
    }
    Some(end + 2)
}

fn environment_len(rest: &str) -> Option<usize> {
    let name_start = "\\begin{".len();
    let name_end = rest[name_start..].find('}')? + name_start;
    let name = &rest[name_start..name_end];
    let closing = format!("\\end{{{}}}", name);
    let end = rest[name_end..].find(&closing)? + name_end;
    Some(end + closing.len())
}

/// Position of `pat` in `hay`, skipping occurrences preceded by a backslash.
fn find_unescaped(hay: &str, pat: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(found) = hay[from..].find(pat) {
        let pos = from + found;
        if pos > 0 && hay.as_bytes()[pos - 1] == b'\\' {
            from = pos + pat.len();
            continue;
        }
        return Some(pos);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_math_is_extracted() {
        let (text, math) = remove_math(r"Euler: $e^{i\pi}+1=0$ done");
        assert_eq!(text, "Euler: @@0@@ done");
        assert_eq!(math, vec![r"$e^{i\pi}+1=0$".to_string()]);
    }

    #[test]
    fn test_display_and_environment_math() {
        let src = "$$a_1 * b_2$$\n\n\\begin{align}x &= y\\end{align}\n\\[z\\]";
        let (text, math) = remove_math(src);
        assert_eq!(text, "@@0@@\n\n@@1@@\n@@2@@");
        assert_eq!(math[0], "$$a_1 * b_2$$");
        assert_eq!(math[1], "\\begin{align}x &= y\\end{align}");
        assert_eq!(math[2], "\\[z\\]");
    }

    #[test]
    fn test_code_is_left_alone() {
        let src = "`$x$` and\n```\n$y$\n```\n";
        let (text, math) = remove_math(src);
        assert_eq!(text, src);
        assert!(math.is_empty());
    }

    #[test]
    fn test_escaped_and_unclosed_dollars() {
        let (text, math) = remove_math(r"costs \$5 and $3");
        assert_eq!(text, r"costs \$5 and $3");
        assert!(math.is_empty());
    }

    #[test]
    fn test_inline_math_does_not_cross_paragraphs() {
        let (_, math) = remove_math("$a\n\nb$");
        assert!(math.is_empty());
    }

    #[test]
    fn test_literal_placeholder_round_trips() {
        let (text, math) = remove_math("see @@7@@");
        assert_eq!(text, "see @@0@@");
        assert_eq!(replace_math(&text, &math), "see @@7@@");
    }

    #[test]
    fn test_stray_at_signs_are_not_placeholders() {
        let (text, math) = remove_math("@@ loose @@ and @@3@@");
        assert_eq!(text, "@@ loose @@ and @@0@@");
        assert_eq!(math, vec!["@@3@@".to_string()]);

        let many = "@@ ".repeat(20_000);
        let (text, math) = remove_math(&many);
        assert_eq!(text, many);
        assert!(math.is_empty());
    }

    #[test]
    fn test_replace_escapes_html() {
        let (text, math) = remove_math("$a<b$");
        assert_eq!(replace_math(&format!("<p>{}</p>", text), &math), "<p>$a&lt;b$</p>");
    }
}
