//! Source location tracking for stub files

use serde::{Deserialize, Serialize};

/// Byte range of a clause or sub-formula inside a stub file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Span used for nodes synthesized by rewriting (e.g. the implicit `true` guard)
    pub const SYNTHETIC: Span = Span { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// 1-based line and column of the span start
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let upto = &source[..self.start.min(source.len())];
        let line = upto.matches('\n').count() + 1;
        let col = upto.rfind('\n').map_or(upto.len(), |nl| upto.len() - nl - 1) + 1;
        (line, col)
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl From<Span> for std::ops::Range<usize> {
    fn from(span: Span) -> Self {
        span.start..span.end
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span::new(range.start, range.end)
    }
}

/// A value with source location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn synthetic(node: T) -> Self {
        Self::new(node, Span::SYNTHETIC)
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Spanned<U> {
        Spanned {
            node: f(self.node),
            span: self.span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge_disjoint() {
        let merged = Span::new(10, 20).merge(Span::new(0, 5));
        assert_eq!(merged, Span::new(0, 20));
    }

    #[test]
    fn test_span_merge_contained() {
        let merged = Span::new(0, 100).merge(Span::new(20, 30));
        assert_eq!(merged, Span::new(0, 100));
    }

    #[test]
    fn test_span_display() {
        assert_eq!(format!("{}", Span::new(42, 99)), "42..99");
    }

    #[test]
    fn test_span_range_conversions() {
        let range: std::ops::Range<usize> = Span::new(5, 15).into();
        assert_eq!(range, 5..15);
        let span: Span = (10..20usize).into();
        assert_eq!(span, Span::new(10, 20));
    }

    #[test]
    fn test_line_col_first_line() {
        assert_eq!(Span::new(4, 6).line_col("fn f();"), (1, 5));
    }

    #[test]
    fn test_line_col_after_newlines() {
        let source = "resource R;\n\nfn close(int fd) {\n  free: fd;\n}";
        let offset = source.find("free").unwrap();
        assert_eq!(Span::new(offset, offset + 4).line_col(source), (4, 3));
    }

    #[test]
    fn test_spanned_map_keeps_span() {
        let s = Spanned::new(21, Span::new(1, 3)).map(|n| n * 2);
        assert_eq!(s.node, 42);
        assert_eq!(s.span, Span::new(1, 3));
    }

    #[test]
    fn test_synthetic_span() {
        let s = Spanned::synthetic(true);
        assert_eq!(s.span, Span::SYNTHETIC);
    }
}
