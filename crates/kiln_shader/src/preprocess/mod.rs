//! Shader Template Preprocessor
//!
//! Turns template text into compilable source in three pure passes, always in
//! this order:
//!
//! | Pass | Function | Markers |
//! |------|----------|---------|
//! | 1. includes   | [`expand_includes`]    | `#include "name"` |
//! | 2. directives | [`expand_directives`]  | `@foreach var a,b,c` … `@endforeach` |
//! | 3. defines    | [`substitute_defines`] | `@name`, `@if` / `@elif` / `@else` / `@endif`, `@@` |
//!
//! Directive expansion runs before substitution because unrolled bodies carry
//! `@name` tokens of their own; after pass 2 the only `@` markers left are
//! define references, conditionals and escapes.
//!
//! Includes are resolved before any `@if` is evaluated. An `#include` inside
//! an inactive branch is still loaded, so the file must exist; guard optional
//! code inside the included file instead.
//!
//! A token is `@` followed by `[A-Za-z0-9_]+`. Directive keywords are only
//! recognized at the start of a line (leading whitespace allowed) and the
//! directive occupies the whole line.
//!
//! Passes 1 and 2 produce a [`MappedSource`] that remembers where every line
//! was written, so each diagnostic names the template and 1-based line the
//! author actually wrote, even inside an included file or an unrolled loop.

mod directives;
mod include;
mod source_map;
mod substitute;
mod token;

pub use directives::expand_directives;
pub use include::expand_includes;
pub use source_map::{LineOrigin, MappedSource};
pub use substitute::{DefineView, substitute_defines};

use kiln_core::{DefineMap, Result};

/// Run the directive and define passes on already include-expanded `source`.
pub fn preprocess(
    source: &MappedSource,
    local_defines: &DefineMap,
    global_defines: &DefineMap,
) -> Result<String> {
    let expanded = expand_directives(source)?;
    substitute_defines(&expanded, local_defines, global_defines)
}
