//! CSS minifier: a single character scan that tracks strings, comments,
//! parentheses and rule blocks.

use super::MinifyError;

/// Characters that never need surrounding whitespace outside parentheses
fn is_structural(c: char) -> bool {
    matches!(c, '{' | '}' | ';' | ':' | ',' | '>' | '~' | '+')
}

/// `#aabbcc` -> `#abc` when every pair repeats
fn shorten_hex(digits: &str) -> Option<String> {
    let bytes = digits.as_bytes();
    if bytes.len() != 6 || !bytes.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let pairs_repeat = bytes
        .chunks(2)
        .all(|pair| pair[0].eq_ignore_ascii_case(&pair[1]));
    pairs_repeat.then(|| bytes.chunks(2).map(|pair| pair[0] as char).collect())
}

pub fn minify(source: &str) -> Result<String, MinifyError> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut pending_space = false;
    let mut parens = 0usize;
    // out positions where the current statement of each open block started
    let mut rule_starts: Vec<usize> = Vec::new();
    let mut statement_start = 0usize;
    let mut in_value = false;
    let mut after_comment = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let body_start = i + 2;
            let end = (body_start..chars.len().saturating_sub(1))
                .find(|&j| chars[j] == '*' && chars[j + 1] == '/')
                .ok_or_else(|| MinifyError("unterminated comment".to_string()))?;
            if chars.get(body_start) == Some(&'!') {
                out.extend(&chars[i..end + 2]);
                statement_start = out.len();
                after_comment = true;
            } else {
                pending_space = true;
            }
            i = end + 2;
            continue;
        }

        if c.is_whitespace() {
            pending_space = true;
            i += 1;
            continue;
        }

        let structural = parens == 0 && is_structural(c);
        // `a :hover` and `a:hover` differ in selectors
        let keeps_space_before = c == ':' && rule_starts.is_empty();
        if pending_space && !out.is_empty() && !after_comment {
            let after_structural = parens == 0 && out.chars().last().is_some_and(is_structural);
            if !after_structural && (!structural || keeps_space_before) {
                out.push(' ');
            }
        }
        pending_space = false;
        after_comment = false;

        match c {
            '"' | '\'' => {
                let start = i;
                i += 1;
                loop {
                    match chars.get(i) {
                        None | Some('\n') => return Err(MinifyError("unterminated string".to_string())),
                        Some('\\') => i += 2,
                        Some(&q) if q == c => break,
                        Some(_) => i += 1,
                    }
                }
                out.extend(&chars[start..=i]);
            }
            '(' => {
                parens += 1;
                out.push(c);
            }
            ')' => {
                parens = parens
                    .checked_sub(1)
                    .ok_or_else(|| MinifyError("unbalanced parentheses".to_string()))?;
                out.push(c);
            }
            '{' if parens == 0 => {
                rule_starts.push(statement_start);
                out.push(c);
                statement_start = out.len();
                in_value = false;
            }
            '}' if parens == 0 => {
                let start = rule_starts
                    .pop()
                    .ok_or_else(|| MinifyError("unbalanced braces".to_string()))?;
                if out.ends_with(';') {
                    out.pop();
                }
                if out.ends_with('{') {
                    out.truncate(start);
                } else {
                    out.push(c);
                }
                statement_start = out.len();
                in_value = false;
            }
            ';' if parens == 0 => {
                out.push(c);
                statement_start = out.len();
                in_value = false;
            }
            ':' if parens == 0 => {
                out.push(c);
                in_value = !rule_starts.is_empty();
            }
            '#' if in_value => {
                let digits: String = chars[i + 1..]
                    .iter()
                    .take_while(|ch| ch.is_ascii_alphanumeric() || **ch == '-' || **ch == '_')
                    .collect();
                out.push('#');
                match shorten_hex(&digits) {
                    Some(short) => out.push_str(&short),
                    None => out.push_str(&digits),
                }
                i += digits.chars().count();
            }
            _ => out.push(c),
        }
        i += 1;
    }

    if parens != 0 || !rule_starts.is_empty() {
        return Err(MinifyError("unbalanced block".to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_whitespace_and_last_semicolon() {
        assert_eq!(minify("a { color : red ; }\n").unwrap(), "a{color:red}");
        assert_eq!(
            minify("a > b + c ~ d , e {\n  margin : 0 auto ;\n  padding: 0\n}").unwrap(),
            "a>b+c~d,e{margin:0 auto;padding:0}"
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(minify("/* note */ a{top:0}").unwrap(), "a{top:0}");
        assert_eq!(minify("/*! keep */\na { top: 0 }").unwrap(), "/*! keep */a{top:0}");
        assert!(minify("a{top:0} /* open").is_err());
    }

    #[test]
    fn test_removes_empty_rules() {
        assert_eq!(minify("a { } b { color: blue; }").unwrap(), "b{color:blue}");
        assert_eq!(minify("@media print { a { } }").unwrap(), "");
    }

    #[test]
    fn test_shortens_hex_colors_in_declarations() {
        assert_eq!(minify("b { color: #ffffff; border-color: #AABBCC }").unwrap(), "b{color:#fff;border-color:#ABC}");
        assert_eq!(minify("b { color: #abcdef }").unwrap(), "b{color:#abcdef}");
        assert_eq!(minify("#aabbcc { top: 0 }").unwrap(), "#aabbcc{top:0}");
    }

    #[test]
    fn test_parentheses_keep_spacing() {
        assert_eq!(minify("a { width: calc(100% - 10px) }").unwrap(), "a{width:calc(100% - 10px)}");
        assert_eq!(
            minify("@media (max-width: 600px) {\n a { color: red; }\n}").unwrap(),
            "@media (max-width: 600px){a{color:red}}"
        );
    }

    #[test]
    fn test_selectors_keep_descendant_pseudo_classes() {
        assert_eq!(minify("a :hover { top: 0 }").unwrap(), "a :hover{top:0}");
        assert_eq!(minify("a:hover { top: 0 }").unwrap(), "a:hover{top:0}");
    }

    #[test]
    fn test_strings_are_verbatim() {
        assert_eq!(minify("a::after { content: \"  {x}  \" }").unwrap(), "a::after{content:\"  {x}  \"}");
    }

    #[test]
    fn test_unbalanced_input_fails() {
        assert!(minify("a { color: red").is_err());
        assert!(minify("a } b").is_err());
    }
}
