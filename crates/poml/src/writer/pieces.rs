//! Output built from pieces that remember where they came from.
//!
//! An exact piece is verbatim source text, so offsets inside it map
//! linearly. Every other piece maps to its whole source range.

use std::ops::Range;

use poml_syntax::Span;

use super::RichPart;
use crate::ir::WhiteSpace;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Piece {
    pub text: String,
    pub span: Span,
    pub exact: bool,
    /// Non-text content carried through layout for rich output.
    pub part: Option<Box<RichPart>>,
}

impl Piece {
    pub fn new(text: impl Into<String>, span: Span, exact: bool) -> Self {
        Self {
            text: text.into(),
            span,
            exact,
            part: None,
        }
    }

    fn is_linear(&self) -> bool {
        self.exact && self.span.len() == self.text.len()
    }

    /// The sub-piece covering `range` of the text.
    fn slice(&self, range: Range<usize>) -> Piece {
        let span = if self.is_linear() {
            Span::new(self.span.start + range.start, self.span.start + range.end)
        } else {
            self.span
        };
        Piece::new(&self.text[range], span, self.exact)
    }
}

/// A rendered region of output.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Fragment {
    pub pieces: Vec<Piece>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn synthetic(text: impl Into<String>, span: Span) -> Self {
        let mut fragment = Self::new();
        fragment.push_synthetic(text, span);
        fragment
    }

    pub fn push(&mut self, piece: Piece) {
        if piece.text.is_empty() && piece.part.is_none() {
            return;
        }
        self.pieces.push(piece);
    }

    pub fn push_synthetic(&mut self, text: impl Into<String>, span: Span) {
        self.push(Piece::new(text, span, false));
    }

    pub fn push_part(&mut self, part: RichPart, fallback: impl Into<String>, span: Span) {
        self.pieces.push(Piece {
            text: fallback.into(),
            span,
            exact: false,
            part: Some(Box::new(part)),
        });
    }

    pub fn append(&mut self, other: Fragment) {
        self.pieces.extend(other.pieces);
    }

    pub fn text(&self) -> String {
        self.pieces.iter().map(|p| p.text.as_str()).collect()
    }

    pub fn is_blank(&self) -> bool {
        self.pieces
            .iter()
            .all(|p| p.part.is_none() && p.text.trim().is_empty())
    }

    /// Join fragments with a synthetic separator.
    pub fn join(fragments: Vec<Fragment>, separator: &str, span: Span) -> Fragment {
        let mut out = Fragment::new();
        for (i, fragment) in fragments.into_iter().enumerate() {
            if i > 0 {
                out.push_synthetic(separator, span);
            }
            out.append(fragment);
        }
        out
    }

    /// Remove leading characters matching `start` and trailing ones
    /// matching `end`, across piece boundaries. Parts stop the trim.
    pub fn trim_by(&mut self, start: fn(char) -> bool, end: fn(char) -> bool) {
        while let Some(first) = self.pieces.first_mut() {
            if first.part.is_some() {
                break;
            }
            let removed = first.text.len() - first.text.trim_start_matches(start).len();
            if first.is_linear() {
                first.span.start += removed;
            }
            first.text.replace_range(..removed, "");
            if !first.text.is_empty() {
                break;
            }
            self.pieces.remove(0);
        }
        while let Some(last) = self.pieces.last_mut() {
            if last.part.is_some() {
                break;
            }
            let kept = last.text.trim_end_matches(end).len();
            if last.is_linear() {
                last.span.end -= last.text.len() - kept;
            }
            last.text.truncate(kept);
            if !last.text.is_empty() {
                break;
            }
            self.pieces.pop();
        }
    }

    pub fn trim(&mut self) {
        self.trim_by(char::is_whitespace, char::is_whitespace);
    }

    /// Indent every line after the first.
    pub fn indent(&mut self, indent: &str, span: Span) {
        let mut out = Vec::with_capacity(self.pieces.len());
        let mut pending = false;
        for piece in std::mem::take(&mut self.pieces) {
            if piece.part.is_some() {
                out.push(piece);
                continue;
            }
            let mut start = 0;
            let bytes = piece.text.as_bytes();
            while start < bytes.len() {
                let end = piece.text[start..]
                    .find('\n')
                    .map_or(bytes.len(), |i| start + i + 1);
                let segment = piece.slice(start..end);
                if pending && segment.text != "\n" {
                    out.push(Piece::new(indent, span, false));
                }
                pending = segment.text.ends_with('\n');
                out.push(segment);
                start = end;
            }
        }
        self.pieces = out;
    }
}

/// A piece inside a paragraph run, with the whitespace policy of the text
/// it came from. Markup added by the writer has no policy.
#[derive(Debug, Clone)]
pub(crate) struct InlinePiece {
    pub piece: Piece,
    pub policy: Option<WhiteSpace>,
}

/// Split text into alternating runs of whitespace and non-whitespace.
fn whitespace_runs(text: &str) -> Vec<(Range<usize>, bool)> {
    let mut runs: Vec<(Range<usize>, bool)> = Vec::new();
    for (i, ch) in text.char_indices() {
        let is_space = ch.is_whitespace();
        let end = i + ch.len_utf8();
        match runs.last_mut() {
            Some((range, space)) if *space == is_space => range.end = end,
            _ => runs.push((i..end, is_space)),
        }
    }
    runs
}

/// Apply whitespace policies to a paragraph run. `filter` text collapses
/// whitespace to single spaces, also across piece boundaries; the run is
/// trimmed unless the container preserves whitespace.
pub(crate) fn normalize_run(run: Vec<InlinePiece>, container: WhiteSpace) -> Fragment {
    let mut out = Fragment::new();
    let mut at_space = true;
    for InlinePiece { piece, policy } in run {
        match policy {
            Some(WhiteSpace::Filter) => {
                for (range, is_space) in whitespace_runs(&piece.text) {
                    if !is_space {
                        out.push(piece.slice(range));
                        at_space = false;
                    } else if !at_space {
                        let span = piece.slice(range).span;
                        out.push(Piece::new(" ", span, false));
                        at_space = true;
                    }
                }
            }
            _ => {
                if piece.text.is_empty() && piece.part.is_none() {
                    continue;
                }
                at_space = piece.text.ends_with(char::is_whitespace);
                out.push(piece);
            }
        }
    }
    if container != WhiteSpace::Pre {
        out.trim();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(value: &str, start: usize, policy: WhiteSpace) -> InlinePiece {
        InlinePiece {
            piece: Piece::new(value, Span::new(start, start + value.len()), true),
            policy: Some(policy),
        }
    }

    #[test]
    fn test_filter_collapses_across_pieces() {
        let run = vec![
            text("  hello   ", 0, WhiteSpace::Filter),
            text("  world \n", 10, WhiteSpace::Filter),
        ];
        let fragment = normalize_run(run, WhiteSpace::Filter);
        assert_eq!(fragment.text(), "hello world");
        assert_eq!(fragment.pieces[0].span, Span::new(2, 7));
        assert!(!fragment.pieces[1].exact);
        assert_eq!(fragment.pieces[2].span, Span::new(12, 17));
    }

    #[test]
    fn test_pre_is_untouched() {
        let fragment = normalize_run(vec![text("  a\n  b ", 0, WhiteSpace::Pre)], WhiteSpace::Pre);
        assert_eq!(fragment.text(), "  a\n  b ");
    }

    #[test]
    fn test_trim_adjusts_exact_spans() {
        let mut fragment = Fragment::new();
        fragment.push(Piece::new("\n  code  \n", Span::new(5, 15), true));
        fragment.trim_by(|c| c == '\n', char::is_whitespace);
        assert_eq!(fragment.text(), "  code");
        assert_eq!(fragment.pieces[0].span, Span::new(6, 12));
    }

    #[test]
    fn test_indent_continuation_lines() {
        let mut fragment = Fragment::new();
        fragment.push(Piece::new("one\ntwo\n\nthree", Span::new(0, 14), true));
        fragment.indent("  ", Span::new(0, 20));
        assert_eq!(fragment.text(), "one\n  two\n\n  three");
        let last = fragment.pieces.last().unwrap();
        assert_eq!(last.span, Span::new(9, 14));
    }
}
