//! HTML minifier.
//!
//! Splits the document into markup and text pieces, collapses whitespace in
//! text and tags, and hands inline `<script>` / `<style>` bodies to the JS and
//! CSS minifiers. `<pre>` and `<textarea>` contents are copied untouched.

use super::{css, js, MinifyError};

const BLOCK_TAGS: &[&str] = &[
    "!doctype", "html", "head", "body", "title", "meta", "link", "script", "style", "base",
    "div", "p", "ul", "ol", "li", "dl", "dt", "dd", "table", "thead", "tbody", "tfoot", "tr",
    "td", "th", "caption", "section", "article", "header", "footer", "nav", "main", "aside",
    "h1", "h2", "h3", "h4", "h5", "h6", "form", "fieldset", "legend", "hr", "blockquote",
    "figure", "figcaption", "address", "details", "summary", "template", "noscript", "option",
];

const RAW_TEXT_TAGS: &[&str] = &["pre", "textarea", "script", "style"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Markup { text: String, block: bool },
}

/// Minified document plus messages for inline code that had to be kept as is
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlOutput {
    pub code: String,
    pub warnings: Vec<String>,
}

fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .to_ascii_lowercase()
        .find(needle)
        .map(|pos| pos + from)
}

/// End of the tag starting at `start` (index just past `>`), quotes respected
fn tag_end(source: &str, start: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (offset, c) in source[start..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(start + offset + 1),
            _ => {}
        }
    }
    None
}

fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('<')
        .trim_start_matches('/')
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '>' && *c != '/')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Collapse whitespace between attributes, leaving quoted values alone
fn collapse_tag(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;
    for c in tag.chars() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        let self_closing_after_quote = c == '/' && out.ends_with(['"', '\'']);
        if pending_space && c != '>' && !self_closing_after_quote {
            out.push(' ');
        }
        pending_space = false;
        if c == '"' || c == '\'' {
            quote = Some(c);
        }
        out.push(c);
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else {
            if pending_space {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }
    if pending_space {
        out.push(' ');
    }
    out
}

fn script_is_javascript(open_tag: &str) -> bool {
    let lower = open_tag.to_ascii_lowercase();
    let Some(pos) = lower.find("type=") else { return true };
    let value = lower[pos + 5..].trim_start_matches(['"', '\'']);
    value.starts_with("module") || value.starts_with("text/javascript") || value.starts_with("application/javascript")
}

fn push_text(pieces: &mut Vec<Piece>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Piece::Text(last)) = pieces.last_mut() {
        last.push_str(text);
    } else {
        pieces.push(Piece::Text(text.to_string()));
    }
}

fn minify_inline(
    tag: &str,
    open_tag: &str,
    body: &str,
    warnings: &mut Vec<String>,
) -> String {
    if body.trim().is_empty() {
        return String::new();
    }
    let result = match tag {
        "script" if script_is_javascript(open_tag) => js::minify(body),
        "style" => css::minify(body),
        _ => return body.to_string(),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            warnings.push(format!("inline <{}> kept unminified: {}", tag, e));
            body.to_string()
        }
    }
}

fn split(source: &str, warnings: &mut Vec<String>) -> Result<Vec<Piece>, MinifyError> {
    let mut pieces = Vec::new();
    let mut i = 0;
    while i < source.len() {
        let Some(rel) = source[i..].find('<') else {
            push_text(&mut pieces, &source[i..]);
            break;
        };
        let lt = i + rel;
        push_text(&mut pieces, &source[i..lt]);

        let rest = &source[lt..];
        if rest.starts_with("<!--") {
            let end = rest
                .find("-->")
                .ok_or_else(|| MinifyError("unterminated comment".to_string()))?;
            let comment = &rest[..end + 3];
            if comment.starts_with("<!--[if") || comment.starts_with("<!--<![endif]") {
                pieces.push(Piece::Markup {
                    text: comment.to_string(),
                    block: false,
                });
            }
            i = lt + end + 3;
            continue;
        }

        let starts_tag = rest[1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!');
        if !starts_tag {
            push_text(&mut pieces, "<");
            i = lt + 1;
            continue;
        }

        let end = tag_end(source, lt).ok_or_else(|| MinifyError("unterminated tag".to_string()))?;
        let raw_tag = &source[lt..end];
        let name = tag_name(raw_tag);
        let closing = raw_tag.starts_with("</");
        pieces.push(Piece::Markup {
            text: collapse_tag(raw_tag),
            block: BLOCK_TAGS.contains(&name.as_str()),
        });
        i = end;

        if !closing && RAW_TEXT_TAGS.contains(&name.as_str()) && !raw_tag.ends_with("/>") {
            let close = find_ci(source, &format!("</{}", name), i)
                .ok_or_else(|| MinifyError(format!("unclosed <{}>", name)))?;
            let body = &source[i..close];
            let text = match name.as_str() {
                "script" | "style" => minify_inline(&name, raw_tag, body, warnings),
                _ => body.to_string(),
            };
            if !text.is_empty() {
                pieces.push(Piece::Markup { text, block: false });
            }
            i = close;
        }
    }
    Ok(pieces)
}

pub fn minify(source: &str) -> Result<HtmlOutput, MinifyError> {
    let mut warnings = Vec::new();
    let pieces = split(source, &mut warnings)?;

    let is_block = |piece: Option<&Piece>| match piece {
        None => true,
        Some(Piece::Markup { block, .. }) => *block,
        Some(Piece::Text(_)) => false,
    };

    let mut code = String::with_capacity(source.len());
    for (idx, piece) in pieces.iter().enumerate() {
        match piece {
            Piece::Markup { text, .. } => code.push_str(text),
            Piece::Text(text) => {
                let mut collapsed = collapse_whitespace(text);
                let before = if idx == 0 { None } else { pieces.get(idx - 1) };
                if is_block(before) {
                    collapsed = collapsed.trim_start().to_string();
                }
                if is_block(pieces.get(idx + 1)) {
                    collapsed = collapsed.trim_end().to_string();
                }
                code.push_str(&collapsed);
            }
        }
    }
    Ok(HtmlOutput { code, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn min(source: &str) -> String {
        minify(source).unwrap().code
    }

    #[test]
    fn test_document_whitespace_and_comments() {
        let source = "<!DOCTYPE html>\n<html>\n  <head>\n    <title> Hi  there </title>\n  </head>\n  <body>\n    <!-- note -->\n    <p>Hello   <b>world</b> !</p>\n  </body>\n</html>\n";
        assert_eq!(
            min(source),
            "<!DOCTYPE html><html><head><title>Hi there</title></head><body><p>Hello <b>world</b> !</p></body></html>"
        );
    }

    #[test]
    fn test_keeps_conditional_comments() {
        let source = "<div>\n<!--[if IE]><p>old</p><![endif]-->\n</div>";
        assert_eq!(min(source), "<div><!--[if IE]><p>old</p><![endif]--></div>");
    }

    #[test]
    fn test_pre_and_textarea_are_verbatim() {
        assert_eq!(min("<div>\n<pre>  a\n   b </pre>\n</div>"), "<div><pre>  a\n   b </pre></div>");
        assert_eq!(min("<textarea>  x  </textarea>"), "<textarea>  x  </textarea>");
    }

    #[test]
    fn test_minifies_inline_script_and_style() {
        let source = "<script>\n  const  a = 1 + 2;\n</script>\n<style> a { color : red ; } </style>";
        assert_eq!(min(source), "<script>const a=3;</script><style>a{color:red}</style>");
    }

    #[test]
    fn test_non_javascript_script_is_untouched() {
        let source = "<script type=\"application/ld+json\">{ \"a\" : 1 }</script>";
        assert_eq!(min(source), source);
    }

    #[test]
    fn test_broken_inline_script_is_kept_with_warning() {
        let out = minify("<script>let s = 'open</script>").unwrap();
        assert_eq!(out.code, "<script>let s = 'open</script>");
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_collapses_attribute_whitespace() {
        assert_eq!(
            min("<a   href=\"x  y\"\n   class=c >t</a>"),
            "<a href=\"x  y\" class=c>t</a>"
        );
        assert_eq!(min("<br  />"), "<br />");
        assert_eq!(min("<img src=\"a.png\"  />"), "<img src=\"a.png\"/>");
    }

    #[test]
    fn test_unterminated_markup_fails() {
        assert!(minify("<p>a <!-- open").is_err());
        assert!(minify("<p class=\"x>").is_err());
        assert!(minify("<script>let a = 1;").is_err());
    }
}
