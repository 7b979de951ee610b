//! Line origins carried through the preprocessing passes.
//!
//! Includes splice other templates in and `@foreach` repeats lines, so a
//! line number in processed text says little about where the author wrote
//! it. [`MappedSource`] keeps, for every line of its text, the template and
//! 1-based line it came from. Diagnostics are reported against that origin.

use std::sync::Arc;

use kiln_core::KilnError;

/// Template and 1-based line a processed line was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOrigin {
    pub template: Arc<str>,
    pub line: usize,
}

/// Text with one [`LineOrigin`] per line.
#[derive(Debug, Clone)]
pub struct MappedSource {
    template: Arc<str>,
    text: String,
    origins: Vec<LineOrigin>,
}

impl MappedSource {
    /// Unprocessed text of `template`: line `n` maps to itself.
    pub fn new(text: &str, template: &str) -> Self {
        let template: Arc<str> = template.into();
        let origins = text
            .split_inclusive('\n')
            .enumerate()
            .map(|(idx, _)| LineOrigin {
                template: Arc::clone(&template),
                line: idx + 1,
            })
            .collect();
        Self {
            template,
            text: text.to_string(),
            origins,
        }
    }

    pub(crate) fn empty(template: Arc<str>, capacity: usize) -> Self {
        Self {
            template,
            text: String::with_capacity(capacity),
            origins: Vec::new(),
        }
    }

    /// Template the whole text is being built for.
    #[inline]
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }

    /// Origin of the line at 0-based `idx`.
    #[must_use]
    pub fn origin(&self, idx: usize) -> LineOrigin {
        self.origins.get(idx).cloned().unwrap_or_else(|| LineOrigin {
            template: Arc::clone(&self.template),
            line: idx + 1,
        })
    }

    pub(crate) fn lines(&self) -> std::iter::Enumerate<std::str::SplitInclusive<'_, char>> {
        self.text.split_inclusive('\n').enumerate()
    }

    /// Start a new output line from `origin`; the caller writes exactly one line.
    pub(crate) fn line_buf(&mut self, origin: LineOrigin) -> &mut String {
        self.origins.push(origin);
        &mut self.text
    }

    /// Terminate a spliced-in last line that had no newline of its own.
    pub(crate) fn end_line(&mut self) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    pub(crate) fn parse_error(&self, idx: usize, message: impl Into<String>) -> KilnError {
        let origin = self.origin(idx);
        KilnError::parse(&origin.template, origin.line, message)
    }

    pub(crate) fn undefined(&self, idx: usize, symbol: &str) -> KilnError {
        KilnError::undefined(&self.origin(idx).template, symbol)
    }
}
