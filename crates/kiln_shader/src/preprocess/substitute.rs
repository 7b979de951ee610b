//! Define substitution and `@if` conditional evaluation.

use std::iter::Enumerate;
use std::str::SplitInclusive;

use kiln_core::{DefineMap, Result};

use super::source_map::MappedSource;
use super::token::{Segment, directive, is_identifier, segments};

const KEYWORDS: &[&str] = &["if", "elif", "else", "endif"];

type Lines<'a> = Enumerate<SplitInclusive<'a, char>>;

/// Merged lookup where call-site defines shadow global ones.
#[derive(Debug, Clone, Copy)]
pub struct DefineView<'a> {
    local: &'a DefineMap,
    global: &'a DefineMap,
}

impl<'a> DefineView<'a> {
    #[must_use]
    pub fn new(local: &'a DefineMap, global: &'a DefineMap) -> Self {
        Self { local, global }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.local.get(name).or_else(|| self.global.get(name))
    }
}

// ─── Conditions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand<'a> {
    Define(&'a str),
    Literal(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition<'a> {
    Truthy { operand: Operand<'a>, negate: bool },
    Compare {
        lhs: Operand<'a>,
        op: CompareOp,
        rhs: Operand<'a>,
    },
}

fn parse_operand<'a>(text: &'a str, source: &MappedSource, idx: usize) -> Result<Operand<'a>> {
    if let Some(quoted) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Ok(Operand::Literal(quoted));
    }
    if text.starts_with(|c: char| c.is_ascii_digit() || c == '-')
        && !text.contains(char::is_whitespace)
    {
        return Ok(Operand::Literal(text));
    }
    let name = text.strip_prefix('@').unwrap_or(text);
    if is_identifier(name) {
        Ok(Operand::Define(name))
    } else {
        Err(source.parse_error(idx, format!("invalid operand in condition: {text}")))
    }
}

fn parse_condition<'a>(text: &'a str, source: &MappedSource, idx: usize) -> Result<Condition<'a>> {
    if text.is_empty() {
        return Err(source.parse_error(idx, "empty condition"));
    }

    let comparison = [("==", CompareOp::Eq), ("!=", CompareOp::Ne)]
        .into_iter()
        .filter_map(|(token, op)| text.find(token).map(|pos| (pos, op)))
        .min_by_key(|(pos, _)| *pos);

    if let Some((pos, op)) = comparison {
        let lhs = text[..pos].trim();
        let rhs = text[pos + 2..].trim();
        if lhs.is_empty() || rhs.is_empty() {
            return Err(source.parse_error(idx, format!("incomplete comparison: {text}")));
        }
        return Ok(Condition::Compare {
            lhs: parse_operand(lhs, source, idx)?,
            op,
            rhs: parse_operand(rhs, source, idx)?,
        });
    }

    match text.strip_prefix('!') {
        Some(rest) => Ok(Condition::Truthy {
            operand: parse_operand(rest.trim(), source, idx)?,
            negate: true,
        }),
        None => Ok(Condition::Truthy {
            operand: parse_operand(text, source, idx)?,
            negate: false,
        }),
    }
}

fn is_truthy(value: &str) -> bool {
    !(value.is_empty() || value == "0" || value == "false")
}

impl Condition<'_> {
    fn evaluate(&self, view: &DefineView<'_>, source: &MappedSource, idx: usize) -> Result<bool> {
        let resolve = |operand: &Operand<'_>| -> Result<String> {
            match *operand {
                Operand::Literal(text) => Ok(text.to_string()),
                Operand::Define(name) => view
                    .get(name)
                    .map(str::to_string)
                    .ok_or_else(|| source.undefined(idx, name)),
            }
        };

        match self {
            Self::Truthy { operand, negate } => Ok(is_truthy(&resolve(operand)?) != *negate),
            Self::Compare { lhs, op, rhs } => {
                let equal = resolve(lhs)? == resolve(rhs)?;
                Ok(match op {
                    CompareOp::Eq => equal,
                    CompareOp::Ne => !equal,
                })
            }
        }
    }
}

// ─── Block structure ─────────────────────────────────────────────────────────

struct Branch<'a> {
    /// `None` for the `@else` branch.
    condition: Option<Condition<'a>>,
    /// Line index of the opening directive.
    idx: usize,
    body: Vec<Node<'a>>,
}

enum Node<'a> {
    Line { text: &'a str, idx: usize },
    If(Vec<Branch<'a>>),
}

/// How a nested block ended.
enum Terminator<'a> {
    Elif { args: &'a str, idx: usize },
    Else { idx: usize },
    Endif,
    Eof,
}

fn parse_block<'a>(
    lines: &mut Lines<'a>,
    source: &MappedSource,
    nested: bool,
) -> Result<(Vec<Node<'a>>, Terminator<'a>)> {
    let mut nodes = Vec::new();

    while let Some((idx, text)) = lines.next() {
        let Some(d) = directive(text, KEYWORDS) else {
            nodes.push(Node::Line { text, idx });
            continue;
        };

        let terminator = match d.keyword {
            "if" => {
                let condition = parse_condition(d.args, source, idx)?;
                nodes.push(parse_if(lines, source, idx, condition)?);
                continue;
            }
            "elif" => Terminator::Elif { args: d.args, idx },
            "else" => Terminator::Else { idx },
            _ => Terminator::Endif,
        };

        if !nested {
            return Err(source.parse_error(idx, format!("@{} without matching @if", d.keyword)));
        }
        if !matches!(terminator, Terminator::Elif { .. }) && !d.args.is_empty() {
            return Err(source.parse_error(
                idx,
                format!("unexpected text after @{}: {}", d.keyword, d.args),
            ));
        }
        return Ok((nodes, terminator));
    }

    Ok((nodes, Terminator::Eof))
}

fn parse_if<'a>(
    lines: &mut Lines<'a>,
    source: &MappedSource,
    if_idx: usize,
    first: Condition<'a>,
) -> Result<Node<'a>> {
    let mut branches = Vec::new();
    let mut condition = Some(first);
    let mut branch_idx = if_idx;

    loop {
        let (body, terminator) = parse_block(lines, source, true)?;
        let in_else = condition.is_none();
        branches.push(Branch {
            condition: condition.take(),
            idx: branch_idx,
            body,
        });

        match terminator {
            Terminator::Endif => return Ok(Node::If(branches)),
            Terminator::Eof => {
                return Err(source.parse_error(if_idx, "@if without matching @endif"));
            }
            Terminator::Elif { idx, .. } | Terminator::Else { idx } if in_else => {
                return Err(source.parse_error(idx, "branch after @else"));
            }
            Terminator::Elif { args, idx } => {
                condition = Some(parse_condition(args, source, idx)?);
                branch_idx = idx;
            }
            Terminator::Else { idx } => branch_idx = idx,
        }
    }
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

fn substitute_line(
    text: &str,
    idx: usize,
    view: &DefineView<'_>,
    source: &MappedSource,
    out: &mut String,
) -> Result<()> {
    for segment in segments(text) {
        match segment {
            Segment::Text(t) => out.push_str(t),
            Segment::Escaped => out.push('@'),
            Segment::Stray => {
                return Err(source.parse_error(idx, "expected a define name after '@'"));
            }
            Segment::Token(name) => {
                let value = view
                    .get(name)
                    .ok_or_else(|| source.undefined(idx, name))?;
                out.push_str(value);
            }
        }
    }
    Ok(())
}

fn emit(
    nodes: &[Node<'_>],
    view: &DefineView<'_>,
    source: &MappedSource,
    out: &mut String,
) -> Result<()> {
    for node in nodes {
        match node {
            Node::Line { text, idx } => substitute_line(text, *idx, view, source, out)?,
            Node::If(branches) => {
                for branch in branches {
                    let taken = match &branch.condition {
                        Some(condition) => condition.evaluate(view, source, branch.idx)?,
                        None => true,
                    };
                    if taken {
                        emit(&branch.body, view, source, out)?;
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Resolve every `@name` token and `@if` block in `source`.
///
/// Values are looked up in `local_defines` first, then `global_defines`.
///
/// ```text
/// @if shadows
/// uniform sampler2D shadowMap;
/// @elif quality == "high"
/// ...
/// @else
/// ...
/// @endif
/// float gamma = @gamma;
/// ```
///
/// A condition is a define name (true unless its value is empty, `0` or
/// `false`), its negation `!name`, or a comparison `a == b` / `a != b` whose
/// operands are define names or literals (quoted, or starting with a digit or
/// `-`). Only the first true branch is emitted; its siblings are neither
/// evaluated nor substituted. `@@` produces a literal `@`.
///
/// Errors name the template and line each offending line originated from.
pub fn substitute_defines(
    source: &MappedSource,
    local_defines: &DefineMap,
    global_defines: &DefineMap,
) -> Result<String> {
    let mut lines = source.lines();
    let (nodes, _) = parse_block(&mut lines, source, false)?;

    let view = DefineView::new(local_defines, global_defines);
    let mut out = String::with_capacity(source.text().len());
    emit(&nodes, &view, source, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use kiln_core::KilnError;

    use super::*;

    fn run(src: &str, local: &[(&str, &str)], global: &[(&str, &str)]) -> Result<String> {
        substitute_defines(
            &MappedSource::new(src, "test.glsl"),
            &DefineMap::from(local),
            &DefineMap::from(global),
        )
    }

    #[test]
    fn local_overrides_global() {
        assert_eq!(run("@X", &[("X", "1")], &[("X", "0")]).unwrap(), "1");
        assert_eq!(run("@X", &[], &[("X", "0")]).unwrap(), "0");
    }

    #[test]
    fn undefined_symbol_names_symbol_and_template() {
        let err = run("float a = @unknown;", &[], &[]).unwrap_err();
        assert!(matches!(
            err,
            KilnError::UndefinedSymbol { ref symbol, ref template }
                if symbol == "unknown" && template == "test.glsl"
        ));
    }

    #[test]
    fn substitutes_inside_expressions() {
        let out = run(
            "vec3 c = texture(@map, uv).rgb * @scale;\n",
            &[("map", "diffuseMap"), ("scale", "2.0")],
            &[],
        )
        .unwrap();
        assert_eq!(out, "vec3 c = texture(diffuseMap, uv).rgb * 2.0;\n");
    }

    #[test]
    fn escape_produces_at_sign() {
        assert_eq!(run("a @@ b", &[], &[]).unwrap(), "a @ b");
    }

    #[test]
    fn stray_at_is_a_parse_error() {
        let err = run("x\ny = @;\n", &[], &[]).unwrap_err();
        assert!(matches!(err, KilnError::DirectiveParse { line: 2, .. }));
    }

    #[test]
    fn if_else_selects_branch() {
        let src = "@if shadows\nS\n@else\nN\n@endif\nend\n";
        assert_eq!(run(src, &[("shadows", "1")], &[]).unwrap(), "S\nend\n");
        assert_eq!(run(src, &[("shadows", "0")], &[]).unwrap(), "N\nend\n");
        assert_eq!(run(src, &[("shadows", "false")], &[]).unwrap(), "N\nend\n");
    }

    #[test]
    fn elif_chain_and_comparisons() {
        let src = "@if quality == \"high\"\nH\n@elif quality != \"low\"\nM\n@else\nL\n@endif\n";
        assert_eq!(run(src, &[("quality", "high")], &[]).unwrap(), "H\n");
        assert_eq!(run(src, &[("quality", "medium")], &[]).unwrap(), "M\n");
        assert_eq!(run(src, &[("quality", "low")], &[]).unwrap(), "L\n");
    }

    #[test]
    fn bare_words_in_comparisons_are_define_names() {
        let src = "@if a == b\nsame\n@endif\n";
        assert_eq!(run(src, &[("a", "1"), ("b", "1")], &[]).unwrap(), "same\n");
        let err = run(src, &[("a", "1")], &[]).unwrap_err();
        assert!(matches!(err, KilnError::UndefinedSymbol { ref symbol, .. } if symbol == "b"));
    }

    #[test]
    fn numeric_literals_compare_as_text() {
        let src = "@if count == 3\nthree\n@endif\n";
        assert_eq!(run(src, &[], &[("count", "3")]).unwrap(), "three\n");
        assert_eq!(run(src, &[], &[("count", "4")]).unwrap(), "");
    }

    #[test]
    fn negation_and_at_prefixed_operand() {
        let src = "@if !@fog\nclear\n@endif\n";
        assert_eq!(run(src, &[("fog", "0")], &[]).unwrap(), "clear\n");
        assert_eq!(run(src, &[("fog", "1")], &[]).unwrap(), "");
    }

    #[test]
    fn inactive_branches_are_not_substituted() {
        let src = "@if enabled\n@missing\n@endif\nok\n";
        assert_eq!(run(src, &[("enabled", "0")], &[]).unwrap(), "ok\n");
        assert!(run(src, &[("enabled", "1")], &[]).is_err());
    }

    #[test]
    fn undefined_condition_symbol_fails() {
        let err = run("@if nope\nx\n@endif\n", &[], &[]).unwrap_err();
        assert!(matches!(err, KilnError::UndefinedSymbol { ref symbol, .. } if symbol == "nope"));
    }

    #[test]
    fn nested_conditionals() {
        let src = "@if a\n@if b\nAB\n@else\nA\n@endif\n@endif\n";
        assert_eq!(run(src, &[("a", "1"), ("b", "1")], &[]).unwrap(), "AB\n");
        assert_eq!(run(src, &[("a", "1"), ("b", "0")], &[]).unwrap(), "A\n");
        assert_eq!(run(src, &[("a", "0")], &[]).unwrap(), "");
    }

    #[test]
    fn structural_errors() {
        for (src, line) in [
            ("@if a\nx\n", 1),
            ("x\n@endif\n", 2),
            ("@else\n", 1),
            ("@if a\n@else\n@else\n@endif\n", 3),
            ("@if a\n@else\n@elif b\n@endif\n", 3),
            ("@if\n@endif\n", 1),
            ("@if a ==\n@endif\n", 1),
        ] {
            let err = run(src, &[("a", "1"), ("b", "1")], &[]).unwrap_err();
            assert!(
                matches!(err, KilnError::DirectiveParse { line: l, .. } if l == line),
                "{src:?} -> {err}"
            );
        }
    }

    #[test]
    fn glsl_preprocessor_lines_pass_through() {
        let src = "#if @shadows\n#define SHADOWS\n#endif\n";
        assert_eq!(
            run(src, &[("shadows", "1")], &[]).unwrap(),
            "#if 1\n#define SHADOWS\n#endif\n"
        );
    }
}
