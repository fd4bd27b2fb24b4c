//! Stylesheet minification.

/// Whitespace before these is dropped.
const TIGHT_BEFORE: &[char] = &['{', '}', ';', ',', '>'];
/// Whitespace after these is dropped.
const TIGHT_AFTER: &[char] = &['{', '}', ';', ',', '>', ':'];

/// Minify stylesheet text.
///
/// Strips comments, collapses whitespace, removes separators next to
/// braces and the last `;` of each block, and drops empty rules. String
/// literals are copied untouched. Declarations are tightened to
/// `property:value`.
pub fn minify(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    // Output offsets where each open block's prelude starts.
    let mut blocks: Vec<usize> = Vec::new();
    let mut prelude_start = 0;
    let mut pending_space = false;
    // Output offset of a space kept before the current statement's first `:`.
    let mut colon_gap: Option<usize> = None;
    let mut chars = css.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            c if c.is_whitespace() => pending_space = true,
            '"' | '\'' => {
                flush_space(&mut out, &mut pending_space, c);
                out.push(c);
                let mut escaped = false;
                for s in chars.by_ref() {
                    out.push(s);
                    if escaped {
                        escaped = false;
                    } else if s == '\\' {
                        escaped = true;
                    } else if s == c {
                        break;
                    }
                }
            }
            '{' => {
                pending_space = false;
                colon_gap = None;
                trim_trailing_space(&mut out);
                blocks.push(prelude_start);
                out.push('{');
                prelude_start = out.len();
            }
            '}' => {
                pending_space = false;
                close_declaration(&mut out, &mut colon_gap);
                trim_trailing_space(&mut out);
                if out.ends_with(';') {
                    out.pop();
                }
                let start = blocks.pop();
                match start {
                    Some(start) if out.ends_with('{') => out.truncate(start),
                    _ => out.push('}'),
                }
                prelude_start = out.len();
            }
            ';' => {
                pending_space = false;
                close_declaration(&mut out, &mut colon_gap);
                trim_trailing_space(&mut out);
                // Collapse `;;` and drop a `;` directly after `{`.
                if !(out.ends_with(';') || out.ends_with('{')) {
                    out.push(';');
                }
                prelude_start = out.len();
            }
            // Removed once the statement ends in `;` or `}`; a nested
            // selector such as `a :hover` ends in `{` and keeps it.
            ':' if !blocks.is_empty() && colon_gap.is_none() => {
                let before = out.len();
                flush_space(&mut out, &mut pending_space, ':');
                if out.len() > before {
                    colon_gap = Some(before);
                }
                out.push(':');
            }
            c => {
                flush_space(&mut out, &mut pending_space, c);
                out.push(c);
            }
        }
    }

    out.trim().to_string()
}

fn flush_space(out: &mut String, pending: &mut bool, next: char) {
    if std::mem::take(pending) {
        let after_tight = out.chars().last().map_or(true, |l| TIGHT_AFTER.contains(&l));
        if !after_tight && !TIGHT_BEFORE.contains(&next) {
            out.push(' ');
        }
    }
}

fn close_declaration(out: &mut String, colon_gap: &mut Option<usize>) {
    if let Some(at) = colon_gap.take() {
        out.remove(at);
    }
}

fn trim_trailing_space(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn collapses_whitespace_and_comments() {
        let css = "/* header */\nbody  {\n  margin : 0 ;\n  padding: 0 4px;\n}\n\n.a > .b , .c {\n  color: red; /* inline */\n}\n";
        assert_eq!(minify(css), "body{margin:0;padding:0 4px}.a>.b,.c{color:red}");
    }

    #[test]
    fn drops_empty_rules_recursively() {
        let css = "a { } @media (max-width: 600px) { .x { ; } } b { color: blue }";
        assert_eq!(minify(css), "b{color:blue}");
    }

    #[test]
    fn preserves_strings() {
        let css = r#"a::before { content: "  /* not a comment */ { } "; }"#;
        assert_eq!(minify(css), r#"a::before{content:"  /* not a comment */ { } "}"#);

        let escaped = r#"q { quotes: '\'' "\"" }"#;
        assert_eq!(minify(escaped), r#"q{quotes:'\'' "\""}"#);
    }

    #[test]
    fn keeps_descendant_selectors_and_calc() {
        assert_eq!(minify("div   p :hover { width: calc(100% - 2px) }"), "div p :hover{width:calc(100% - 2px)}");
    }

    #[test]
    fn nested_selector_keeps_space_before_pseudo_class() {
        assert_eq!(
            minify("@media print { a :hover { color : red } .b { top : 0 ; left :1px } }"),
            "@media print{a :hover{color:red}.b{top:0;left:1px}}"
        );
    }

    #[test]
    fn unterminated_comment_is_dropped() {
        assert_eq!(minify("a{color:red} /* dangling"), "a{color:red}");
    }
}
