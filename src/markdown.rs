//! Markdown rendering for notebook cells.
//!
//! The pipeline is:
//! 1. swap math for placeholders ([`crate::math`])
//! 2. Markdown to HTML with pulldown-cmark (GFM tables, hard line breaks,
//!    headings without a space after `#`)
//! 3. put the math back
//! 4. sanitize with ammonia
//! 5. post-process the sanitized HTML: heading anchors, external links,
//!    `attachment:` image sources

use percent_encoding::percent_decode_str;
use pulldown_cmark::{html, Alignment, CowStr, Event, Options, Parser, Tag, TagEnd};
use regex::Regex;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;
use tracing::debug;

use crate::attachments::AttachmentStore;
use crate::math::{remove_math, replace_math};

static ATX_WITHOUT_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^( {0,3}#{1,6})([^#\s])").expect("atx regex"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<h([1-6])>(.*?)</h[1-6]>").expect("heading regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<a\s([^>]*)>").expect("link regex"));
static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bhref="([^"]*)""#).expect("href regex"));
static ATTACHMENT_IMG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(<img\b[^>]*?\bsrc=")attachment:([^"]*)""#).expect("attachment regex")
});

// ============================================================================
// Rendering
// ============================================================================

/// Render a markdown cell's source to display HTML.
///
/// `attachment:<key>` images are inlined as data URIs from `attachments`;
/// unknown keys get an empty `src` so the browser does not try to fetch them.
pub fn render_markdown(text: &str, attachments: &AttachmentStore) -> String {
    let (stripped, math) = remove_math(text);
    let html = markdown_to_html(&stripped);
    let html = replace_math(&html, &math);
    let html = sanitize_html(&html);
    let html = add_heading_anchors(&html);
    let html = open_external_links_in_new_tab(&html);
    substitute_attachments(&html, attachments)
}

/// Keys of every `attachment:` image the source refers to, whether written
/// as `![](attachment:key)` or as a raw `<img>` tag.
pub fn referenced_attachments(text: &str) -> BTreeSet<String> {
    let html = sanitize_html(&markdown_to_html(text));
    ATTACHMENT_IMG
        .captures_iter(&html)
        .flat_map(|caps| {
            let (key, decoded) = key_forms(&caps[2]);
            [key, decoded]
        })
        .collect()
}

/// Raw (unsanitized) HTML for a markdown string.
pub fn markdown_to_html(text: &str) -> String {
    let text = normalize_atx_headings(text);

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(&text, options);

    // Table cells carry only a text-align style; single newlines become <br>.
    let mut alignments: Vec<Alignment> = Vec::new();
    let mut in_head = false;
    let mut column = 0;
    let events = parser.map(|event| match event {
        Event::Start(Tag::Table(aligns)) => {
            alignments = aligns.clone();
            Event::Start(Tag::Table(aligns))
        }
        Event::Start(Tag::TableHead) => {
            in_head = true;
            column = 0;
            event
        }
        Event::End(TagEnd::TableHead) => {
            in_head = false;
            event
        }
        Event::Start(Tag::TableRow) => {
            column = 0;
            event
        }
        Event::Start(Tag::TableCell) => {
            Event::Html(CowStr::from(open_table_cell(in_head, alignments.get(column))))
        }
        Event::End(TagEnd::TableCell) => {
            column += 1;
            Event::Html(CowStr::from(if in_head { "</th>\n" } else { "</td>\n" }))
        }
        Event::SoftBreak => Event::HardBreak,
        other => other,
    });

    let mut html_output = String::new();
    html::push_html(&mut html_output, events);
    html_output
}

fn open_table_cell(header: bool, align: Option<&Alignment>) -> String {
    let tag = if header { "th" } else { "td" };
    let align = match align {
        Some(Alignment::Left) => Some("left"),
        Some(Alignment::Center) => Some("center"),
        Some(Alignment::Right) => Some("right"),
        Some(Alignment::None) | None => None,
    };
    match align {
        Some(align) => format!(r#"<{} style="text-align: {}">"#, tag, align),
        None => format!("<{}>", tag),
    }
}

/// `#Title` is accepted as a heading, as notebook users expect.
fn normalize_atx_headings(text: &str) -> Cow<'_, str> {
    if !text.contains('#') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 8);
    let mut fence: Option<&str> = None;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let marker = ["```", "~~~"].into_iter().find(|m| trimmed.starts_with(*m));
        match (fence, marker) {
            (None, Some(m)) => fence = Some(m),
            (Some(open), Some(m)) if open == m => fence = None,
            _ => {}
        }
        if fence.is_none() && marker.is_none() {
            out.push_str(&ATX_WITHOUT_SPACE.replace(line, "$1 $2"));
        } else {
            out.push_str(line);
        }
    }
    Cow::Owned(out)
}

// ============================================================================
// Sanitizing
// ============================================================================

pub fn sanitize_html(html: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder
        .add_url_schemes(&["attachment", "data"])
        .add_tag_attributes("th", &["style"])
        .add_tag_attributes("td", &["style"])
        .filter_style_properties(HashSet::from(["text-align"]));
    builder.clean(html).to_string()
}

// ============================================================================
// Post-processing
// ============================================================================

/// Give every heading an id made from its text and append a `¶` link to it.
pub fn add_heading_anchors(html: &str) -> String {
    HEADING
        .replace_all(html, |caps: &regex::Captures| {
            let level = &caps[1];
            let inner = &caps[2];
            let text = TAG.replace_all(inner, "");
            let id = text.replace(' ', "-").replace('"', "&quot;");
            format!(
                r##"<h{level} id="{id}">{inner}<a class="anchor-link" href="#{id}">¶</a></h{level}>"##,
                level = level,
                id = id,
                inner = inner,
            )
        })
        .into_owned()
}

/// Links leaving the document open in a new tab; `#fragment` links do not.
pub fn open_external_links_in_new_tab(html: &str) -> String {
    LINK.replace_all(html, |caps: &regex::Captures| {
        let attrs = &caps[1];
        let external = HREF
            .captures(attrs)
            .map(|href| !href[1].starts_with('#'))
            .unwrap_or(false);
        if external && !attrs.contains("target=") {
            format!(r#"<a {} target="_blank">"#, attrs)
        } else {
            caps[0].to_string()
        }
    })
    .into_owned()
}

pub fn substitute_attachments(html: &str, attachments: &AttachmentStore) -> String {
    ATTACHMENT_IMG
        .replace_all(html, |caps: &regex::Captures| {
            let (key, decoded) = key_forms(&caps[2]);
            let src = match attachments.get(&key).or_else(|| attachments.get(&decoded)) {
                Some(att) => html_escape(&att.data_uri()),
                None => {
                    debug!(key = %key, "image refers to a missing attachment");
                    String::new()
                }
            };
            format!(r#"{}{}""#, &caps[1], src)
        })
        .into_owned()
}

fn unescape_attribute(value: &str) -> String {
    value.replace("&quot;", "\"").replace("&amp;", "&")
}

/// A key as it appears in the `src` attribute, and percent-decoded.
///
/// pulldown-cmark percent-encodes non-ASCII characters and spaces in image
/// destinations, so `![](attachment:图.png)` arrives as `%E5%9B%BE.png`.
/// Keys are stored as written, which may itself be encoded, so both forms
/// are tried.
fn key_forms(src: &str) -> (String, String) {
    let key = unescape_attribute(src);
    let decoded = percent_decode_str(&key).decode_utf8_lossy().into_owned();
    (key, decoded)
}

// ============================================================================
// Text Escaping
// ============================================================================

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(text: &str) -> String {
        render_markdown(text, &AttachmentStore::new())
    }

    #[test]
    fn test_heading_gets_id_and_anchor() {
        let html = render("# Title");
        assert!(html.contains(r#"<h1 id="Title">"#), "{}", html);
        assert!(html.contains(r##"<a class="anchor-link" href="#Title">¶</a></h1>"##), "{}", html);
    }

    #[test]
    fn test_heading_id_replaces_spaces() {
        let html = render("## Getting started *now*");
        assert!(html.contains(r#"id="Getting-started-now""#), "{}", html);
        assert!(html.contains(r##"href="#Getting-started-now""##), "{}", html);
    }

    #[test]
    fn test_heading_without_space() {
        let html = render("#Title");
        assert!(html.contains(r#"<h1 id="Title">"#), "{}", html);
    }

    #[test]
    fn test_hash_in_code_fence_is_not_a_heading() {
        let html = render("```\n#include <stdio.h>\n```");
        assert!(!html.contains("<h1"), "{}", html);
        assert!(html.contains("#include"), "{}", html);
    }

    #[test]
    fn test_external_links_open_new_tab() {
        let html = render("[x](http://example.com)");
        assert!(html.contains(r#"target="_blank""#), "{}", html);
    }

    #[test]
    fn test_fragment_links_stay_in_page() {
        let html = render("[x](#sec)");
        assert!(html.contains(r##"href="#sec""##), "{}", html);
        assert!(!html.contains("target="), "{}", html);
    }

    #[test]
    fn test_table_cells_use_alignment_style() {
        let html = render("| a | b |\n|:-:|---|\n| 1 | 2 |");
        assert!(html.contains("<th"), "{}", html);
        assert!(html.contains("text-align"), "{}", html);
        assert!(html.contains("<td>2</td>"), "{}", html);
    }

    #[test]
    fn test_single_newline_is_a_break() {
        let html = render("one\ntwo");
        assert!(html.contains("<br>"), "{}", html);
    }

    #[test]
    fn test_math_survives_markdown() {
        let html = render(r"Let $a_1 * b_1$ and $c_2 * d_2$");
        assert!(html.contains(r"$a_1 * b_1$"), "{}", html);
        assert!(!html.contains("<em>"), "{}", html);
    }

    #[test]
    fn test_attachment_image_is_inlined() {
        let mut store = AttachmentStore::new();
        store.add("dot.png", "image/png", "iVBORw0KGgo=");
        let html = render_markdown("![dot](attachment:dot.png)", &store);
        assert!(html.contains(r#"src="data:image/png;base64,iVBORw0KGgo=""#), "{}", html);
        assert!(!html.contains("attachment:"), "{}", html);
    }

    #[test]
    fn test_non_ascii_attachment_key() {
        let mut store = AttachmentStore::new();
        store.add("图.png", "image/png", "AAAA");
        let html = render_markdown("![fig](attachment:图.png)", &store);
        assert!(html.contains(r#"src="data:image/png;base64,AAAA""#), "{}", html);

        let used = referenced_attachments("![fig](attachment:图.png)");
        assert!(used.contains("图.png"), "{:?}", used);
    }

    #[test]
    fn test_encoded_attachment_key_still_matches() {
        let mut store = AttachmentStore::new();
        store.add("my%20plot.png", "image/png", "AAAA");
        let html = render_markdown("![p](attachment:my%20plot.png)", &store);
        assert!(html.contains("base64,AAAA"), "{}", html);
        assert!(referenced_attachments("![p](attachment:my%20plot.png)").contains("my%20plot.png"));
    }

    #[test]
    fn test_missing_attachment_clears_src() {
        let html = render("![gone](attachment:gone.png)");
        assert!(html.contains(r#"src="""#), "{}", html);
        assert!(!html.contains("attachment:"), "{}", html);
    }

    #[test]
    fn test_scripts_are_stripped() {
        let html = render("hello <script>alert(1)</script>");
        assert!(!html.contains("<script"), "{}", html);
    }

    #[test]
    fn test_referenced_attachments_markdown_and_html() {
        let used = referenced_attachments(
            "![a](attachment:a.png)\n\n<img src=\"attachment:b.png\">\n\n![c](c.png)",
        );
        assert_eq!(
            used,
            BTreeSet::from(["a.png".to_string(), "b.png".to_string()])
        );
    }
}
