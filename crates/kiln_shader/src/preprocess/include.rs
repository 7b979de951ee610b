//! `#include "name"` expansion.

use std::sync::Arc;

use kiln_core::{KilnError, Result};

use super::source_map::{LineOrigin, MappedSource};

fn include_target<'a>(line: &'a str, template: &str, line_no: usize) -> Result<Option<&'a str>> {
    let Some(rest) = line.trim_start().strip_prefix("#include") else {
        return Ok(None);
    };
    // `#include_guard` and friends are other identifiers
    if !rest.starts_with(|c: char| c.is_whitespace() || c == '"') {
        return Ok(None);
    }
    let rest = rest.trim();
    let malformed = || KilnError::parse(template, line_no, format!("malformed #include: {rest}"));

    let quoted = rest.strip_prefix('"').ok_or_else(malformed)?;
    let (name, tail) = quoted.split_once('"').ok_or_else(malformed)?;
    let tail = tail.trim_start();
    if name.is_empty() || !(tail.is_empty() || tail.starts_with("//")) {
        return Err(malformed());
    }
    Ok(Some(name))
}

fn expand_into(
    source: &str,
    stack: &mut Vec<Arc<str>>,
    loader: &mut dyn FnMut(&str) -> Result<Arc<str>>,
    out: &mut MappedSource,
) -> Result<()> {
    let Some(current) = stack.last().cloned() else {
        return Ok(());
    };

    for (idx, line) in source.split_inclusive('\n').enumerate() {
        let Some(name) = include_target(line, &current, idx + 1)? else {
            out.line_buf(LineOrigin {
                template: Arc::clone(&current),
                line: idx + 1,
            })
            .push_str(line);
            continue;
        };

        if stack.iter().any(|open| &**open == name) {
            return Err(KilnError::IncludeCycle {
                template: current.to_string(),
                include: name.to_string(),
            });
        }

        let included = loader(name)?;
        stack.push(name.into());
        expand_into(&included, stack, loader, out)?;
        stack.pop();

        if line.ends_with('\n') {
            out.end_line();
        }
    }
    Ok(())
}

/// Replace every `#include "name"` line with the expanded text of `name`.
///
/// `loader` resolves include names (normally through the template store).
/// Includes nest; re-entering a template that is still being expanded fails
/// with [`KilnError::IncludeCycle`]. Including the same file twice from
/// different branches is allowed. A trailing `//` comment after the name is
/// ignored.
///
/// Every output line remembers the template and line it was read from.
pub fn expand_includes(
    source: &str,
    template_name: &str,
    loader: &mut dyn FnMut(&str) -> Result<Arc<str>>,
) -> Result<MappedSource> {
    let root: Arc<str> = template_name.into();
    let mut out = MappedSource::empty(Arc::clone(&root), source.len());
    let mut stack = vec![root];
    expand_into(source, &mut stack, loader, &mut out)?;
    Ok(out)
}
