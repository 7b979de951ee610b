//! Token scanning shared by the preprocessing stages.
//!
//! A token is `@` followed by one or more identifier characters
//! (`[A-Za-z0-9_]`). `@@` is an escaped `@`. A lone `@` is kept as
//! [`Segment::Stray`] so each stage can decide whether it is an error.

/// One piece of a scanned line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Text(&'a str),
    /// Token name without the leading `@`.
    Token(&'a str),
    /// `@@`
    Escaped,
    /// `@` not followed by an identifier character.
    Stray,
}

#[inline]
pub(crate) fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[must_use]
pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_ident_byte)
}

/// Iterator over the [`Segment`]s of a string.
pub(crate) struct Segments<'a> {
    rest: &'a str,
}

pub(crate) fn segments(text: &str) -> Segments<'_> {
    Segments { rest: text }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        match self.rest.find('@') {
            None => {
                let text = self.rest;
                self.rest = "";
                Some(Segment::Text(text))
            }
            Some(0) => {
                let bytes = self.rest.as_bytes();
                if bytes.get(1) == Some(&b'@') {
                    self.rest = &self.rest[2..];
                    return Some(Segment::Escaped);
                }
                let len = bytes[1..].iter().take_while(|&&b| is_ident_byte(b)).count();
                if len == 0 {
                    self.rest = &self.rest[1..];
                    Some(Segment::Stray)
                } else {
                    let name = &self.rest[1..=len];
                    self.rest = &self.rest[1 + len..];
                    Some(Segment::Token(name))
                }
            }
            Some(idx) => {
                let text = &self.rest[..idx];
                self.rest = &self.rest[idx..];
                Some(Segment::Text(text))
            }
        }
    }
}

/// A line whose first non-blank content is `@keyword`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Directive<'a> {
    pub keyword: &'a str,
    /// Everything after the keyword, trimmed.
    pub args: &'a str,
}

/// Recognize a directive line for one of `keywords`.
pub(crate) fn directive<'a>(line: &'a str, keywords: &[&str]) -> Option<Directive<'a>> {
    let body = line.trim_start().strip_prefix('@')?;
    let len = body.bytes().take_while(|&b| is_ident_byte(b)).count();
    let keyword = &body[..len];
    if !keywords.contains(&keyword) {
        return None;
    }
    let rest = &body[len..];
    // `@endif;` is not a directive, `@endif   ` is.
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(Directive {
        keyword,
        args: rest.trim(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_tokens_text_and_escapes() {
        let segs: Vec<_> = segments("x = @a_1 + @@b;@").collect();
        assert_eq!(
            segs,
            [
                Segment::Text("x = "),
                Segment::Token("a_1"),
                Segment::Text(" + "),
                Segment::Escaped,
                Segment::Text("b;"),
                Segment::Stray,
            ]
        );
    }

    #[test]
    fn token_ends_at_non_identifier() {
        let segs: Vec<_> = segments("@lights[@i].rgb").collect();
        assert_eq!(
            segs,
            [
                Segment::Token("lights"),
                Segment::Text("["),
                Segment::Token("i"),
                Segment::Text("].rgb"),
            ]
        );
    }

    #[test]
    fn recognizes_directive_lines() {
        let d = directive("   @foreach i 0,1\n", &["foreach"]).unwrap();
        assert_eq!(d.keyword, "foreach");
        assert_eq!(d.args, "i 0,1");

        assert!(directive("@endif\n", &["endif"]).is_some());
        assert!(directive("@endif;\n", &["endif"]).is_none());
        assert!(directive("x = @endif\n", &["endif"]).is_none());
        assert!(directive("@iffy\n", &["if"]).is_none());
    }
}
