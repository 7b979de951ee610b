//! `@foreach` block unrolling.

use std::iter::Enumerate;
use std::str::SplitInclusive;

use kiln_core::Result;

use super::source_map::MappedSource;
use super::token::{Segment, directive, is_identifier, segments};

const KEYWORDS: &[&str] = &["foreach", "endforeach"];

type Lines<'a> = Enumerate<SplitInclusive<'a, char>>;

enum Node<'a> {
    Line(usize, &'a str),
    Foreach {
        var: &'a str,
        items: &'a str,
        body: Vec<Node<'a>>,
    },
}

/// Parse lines until EOF (top level) or the `@endforeach` closing `open_idx`.
///
/// `enclosing` holds the loop variables bound around the current block.
fn parse_block<'a>(
    lines: &mut Lines<'a>,
    source: &MappedSource,
    open_idx: Option<usize>,
    enclosing: &mut Vec<&'a str>,
) -> Result<Vec<Node<'a>>> {
    let mut nodes = Vec::new();

    while let Some((idx, line)) = lines.next() {
        let Some(d) = directive(line, KEYWORDS) else {
            nodes.push(Node::Line(idx, line));
            continue;
        };

        if d.keyword == "endforeach" {
            if open_idx.is_none() {
                return Err(source.parse_error(idx, "@endforeach without matching @foreach"));
            }
            if !d.args.is_empty() {
                return Err(source.parse_error(
                    idx,
                    format!("unexpected text after @endforeach: {}", d.args),
                ));
            }
            return Ok(nodes);
        }

        let (var, items) = d
            .args
            .split_once(char::is_whitespace)
            .map_or((d.args, ""), |(v, rest)| (v, rest.trim()));
        let var = var.strip_prefix('@').unwrap_or(var);
        if !is_identifier(var) {
            return Err(source.parse_error(idx, "@foreach expects a loop variable name"));
        }
        // defines are not known yet, only loop variables can be expanded here
        if let Some(unbound) = segments(items).find_map(|segment| match segment {
            Segment::Token(name) if !enclosing.contains(&name) => Some(name),
            _ => None,
        }) {
            return Err(source.parse_error(
                idx,
                format!(
                    "@foreach items must be literals or enclosing loop variables, found @{unbound}"
                ),
            ));
        }

        enclosing.push(var);
        let body = parse_block(lines, source, Some(idx), enclosing)?;
        enclosing.pop();
        nodes.push(Node::Foreach { var, items, body });
    }

    match open_idx {
        Some(idx) => Err(source.parse_error(idx, "@foreach without matching @endforeach")),
        None => Ok(nodes),
    }
}

/// Copy `text`, replacing tokens bound to loop variables (innermost wins).
fn substitute_bound(text: &str, bindings: &[(&str, String)], out: &mut String) {
    if bindings.is_empty() {
        out.push_str(text);
        return;
    }
    for segment in segments(text) {
        match segment {
            Segment::Text(t) => out.push_str(t),
            Segment::Escaped => out.push_str("@@"),
            Segment::Stray => out.push('@'),
            Segment::Token(name) => {
                match bindings.iter().rev().find(|(var, _)| *var == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('@');
                        out.push_str(name);
                    }
                }
            }
        }
    }
}

fn emit<'a>(
    nodes: &[Node<'a>],
    source: &MappedSource,
    bindings: &mut Vec<(&'a str, String)>,
    out: &mut MappedSource,
) {
    for node in nodes {
        match node {
            Node::Line(idx, line) => {
                substitute_bound(line, bindings, out.line_buf(source.origin(*idx)));
            }
            Node::Foreach { var, items, body } => {
                let mut list = String::new();
                substitute_bound(items, bindings, &mut list);
                if list.trim().is_empty() {
                    continue;
                }
                for item in list.split(',') {
                    bindings.push((*var, item.trim().to_string()));
                    emit(body, source, bindings, out);
                    bindings.pop();
                }
            }
        }
    }
}

/// Unroll every `@foreach` block in `source`.
///
/// ```text
/// @foreach i 0,1,2
/// uniform sampler2D shadowTexture@i;
/// @endforeach
/// ```
///
/// The body is emitted once per comma-separated item with each whole `@i`
/// token replaced by the item. Blocks nest, and an inner item list may use an
/// outer loop variable; any other `@token` in an item list is an error.
/// All other `@` tokens are left for define substitution. Unrolled lines
/// keep the origin of the line they were copied from.
pub fn expand_directives(source: &MappedSource) -> Result<MappedSource> {
    let mut lines = source.lines();
    let nodes = parse_block(&mut lines, source, None, &mut Vec::new())?;

    let mut out = MappedSource::empty(source.template().into(), source.text().len());
    emit(&nodes, source, &mut Vec::new(), &mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use kiln_core::KilnError;

    use super::*;

    fn expand(src: &str, template: &str) -> Result<String> {
        expand_directives(&MappedSource::new(src, template)).map(MappedSource::into_text)
    }

    #[test]
    fn unrolls_block_per_item() {
        let src = "a\n@foreach i 0, 1 ,2\nx@i;\n@endforeach\nb\n";
        assert_eq!(expand(src, "t").unwrap(), "a\nx0;\nx1;\nx2;\nb\n");
    }

    #[test]
    fn leaves_unbound_tokens_and_escapes_alone() {
        let src = "@foreach n 1\nv = @n * @scale; // @@\n@endforeach\n";
        assert_eq!(expand(src, "t").unwrap(), "v = 1 * @scale; // @@\n");
    }

    #[test]
    fn only_whole_tokens_are_replaced() {
        let src = "@foreach i 7\n@i @index\n@endforeach\n";
        assert_eq!(expand(src, "t").unwrap(), "7 @index\n");
    }

    #[test]
    fn nested_loops_see_outer_variable() {
        let src = "@foreach a x,y\n@foreach b @a,z\n[@b]\n@endforeach\n@endforeach\n";
        assert_eq!(expand(src, "t").unwrap(), "[x]\n[z]\n[y]\n[z]\n");
    }

    #[test]
    fn empty_list_emits_nothing() {
        let src = "@foreach i\nnever\n@endforeach\nend";
        assert_eq!(expand(src, "t").unwrap(), "end");
    }

    #[test]
    fn unclosed_foreach_reports_opening_line() {
        let err = expand("ok\n@foreach i 0\nbody\n", "lights.frag").unwrap_err();
        assert!(
            matches!(err, KilnError::DirectiveParse { ref template, line: 2, .. } if template == "lights.frag")
        );
    }

    #[test]
    fn stray_endforeach_is_an_error() {
        let err = expand("@endforeach\n", "t").unwrap_err();
        assert!(matches!(err, KilnError::DirectiveParse { line: 1, .. }));
    }

    #[test]
    fn foreach_requires_variable() {
        let err = expand("@foreach\n@endforeach\n", "t").unwrap_err();
        assert!(matches!(err, KilnError::DirectiveParse { line: 1, .. }));
    }

    #[test]
    fn text_without_directives_is_unchanged() {
        let src = "void main() { gl_Position = @pos; }";
        assert_eq!(expand(src, "t").unwrap(), src);
    }

    #[test]
    fn unbound_item_token_is_rejected() {
        let err = expand("x\n@foreach i @lights\nL@i\n@endforeach\n", "t").unwrap_err();
        assert!(matches!(err, KilnError::DirectiveParse { line: 2, ref message, .. } if message.contains("@lights")));
    }

    #[test]
    fn unrolled_lines_keep_their_origin() {
        let src = "@foreach i 0,1,2,3\na@i\nb@i\n@endforeach\nlast\n";
        let out = expand_directives(&MappedSource::new(src, "t.frag")).unwrap();

        assert_eq!(out.origin(0).line, 2);
        assert_eq!(out.origin(7).line, 3);
        assert_eq!(out.origin(8).line, 5);
    }
}
