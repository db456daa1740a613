//! Source spans, the program text index used to compute them, and the span
//! table keyed by node identity.

use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::identity::NodeId;

/// Half-open line/column range of a node in the program text.
///
/// Lines and columns are 1-based and the end column is exclusive. Equality and
/// hashing consider only the four bounds; the document reference is carried
/// for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpan {
    pub document: SmolStr,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl SourceSpan {
    pub fn new(
        document: impl Into<SmolStr>,
        start_line: u32,
        start_column: u32,
        end_line: u32,
        end_column: u32,
    ) -> Self {
        Self {
            document: document.into(),
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    #[must_use]
    pub fn bounds(&self) -> (u32, u32, u32, u32) {
        (
            self.start_line,
            self.start_column,
            self.end_line,
            self.end_column,
        )
    }
}

impl PartialEq for SourceSpan {
    fn eq(&self, other: &Self) -> bool {
        self.bounds() == other.bounds()
    }
}

impl Eq for SourceSpan {}

impl Hash for SourceSpan {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bounds().hash(state);
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}-{}:{}",
            self.document, self.start_line, self.start_column, self.end_line, self.end_column
        )
    }
}

/// Snapshot of the program text with a line index.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    name: SmolStr,
    text: String,
    line_starts: Vec<usize>,
}

impl SourceDocument {
    pub fn new(name: impl Into<SmolStr>, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0];
        line_starts.extend(
            text.char_indices()
                .filter(|(_, ch)| *ch == '\n')
                .map(|(idx, _)| idx + 1),
        );
        Self {
            name: name.into(),
            text,
            line_starts,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// 1-based line and column of a byte offset. Columns count characters.
    #[must_use]
    pub fn line_col(&self, offset: usize) -> (u32, u32) {
        let offset = offset.min(self.text.len());
        let line_idx = self
            .line_starts
            .partition_point(|start| *start <= offset)
            .saturating_sub(1);
        let line_start = self.line_starts[line_idx];
        let column = self.text[line_start..offset].chars().count() + 1;
        (line_idx as u32 + 1, column as u32)
    }

    #[must_use]
    pub fn span(&self, start: usize, end: usize) -> SourceSpan {
        let (start_line, start_column) = self.line_col(start);
        let (end_line, end_column) = self.line_col(end);
        SourceSpan::new(
            self.name.clone(),
            start_line,
            start_column,
            end_line,
            end_column,
        )
    }

    /// Locates `marker` at or after byte offset `from`, falling back to its
    /// first occurrence in the whole document.
    ///
    /// Only whole-token occurrences outside comment lines count. Returns the
    /// span and the byte offset where the marker starts. When the rest of the
    /// marker's line opens a `{` block the span runs to the matching `}`,
    /// otherwise it ends with the line's last visible character.
    #[must_use]
    pub fn locate(&self, marker: &str, from: usize) -> Option<(SourceSpan, usize)> {
        if marker.is_empty() {
            return None;
        }
        let from = from.min(self.text.len());
        let start = self
            .find_anchor(marker, from)
            .or_else(|| self.find_anchor(marker, 0))?;
        let marker_end = start + marker.len();
        let line_end = self.line_end(marker_end);
        let end = self.text[marker_end..line_end]
            .find('{')
            .and_then(|idx| self.matching_close(marker_end + idx))
            .unwrap_or_else(|| self.trimmed_line_end(marker_end, line_end));
        Some((self.span(start, end), start))
    }

    fn find_anchor(&self, marker: &str, from: usize) -> Option<usize> {
        self.text
            .get(from..)?
            .match_indices(marker)
            .map(|(idx, _)| from + idx)
            .find(|start| {
                self.on_token_boundary(*start, start + marker.len())
                    && !self.is_comment_line(*start)
            })
    }

    fn on_token_boundary(&self, start: usize, end: usize) -> bool {
        let marker = &self.text[start..end];
        let joined_before = marker.chars().next().is_some_and(is_ident)
            && self.text[..start].chars().next_back().is_some_and(is_ident);
        let joined_after = marker.chars().next_back().is_some_and(is_ident)
            && self.text[end..].chars().next().is_some_and(is_ident);
        !joined_before && !joined_after
    }

    /// Whether the line holding `offset` is a `//` or `#` comment.
    fn is_comment_line(&self, offset: usize) -> bool {
        let line_idx = self
            .line_starts
            .partition_point(|start| *start <= offset)
            .saturating_sub(1);
        let line_start = self.line_starts[line_idx];
        let line = self.text[line_start..self.line_end(line_start)].trim_start();
        line.starts_with("//") || line.starts_with('#')
    }

    fn line_end(&self, offset: usize) -> usize {
        self.text[offset..]
            .find('\n')
            .map(|idx| offset + idx)
            .unwrap_or(self.text.len())
    }

    fn trimmed_line_end(&self, floor: usize, line_end: usize) -> usize {
        let trimmed = self.text[floor..line_end].trim_end();
        floor + trimmed.len()
    }

    /// Offset just past the `}` closing the block opened at `open`. Braces in
    /// strings and on comment lines do not count.
    fn matching_close(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut skip_until = open;
        for (idx, ch) in self.text[open..].char_indices() {
            let offset = open + idx;
            if offset < skip_until {
                continue;
            }
            if ch == '\n' {
                in_string = false;
                let next = offset + 1;
                if next < self.text.len() && self.is_comment_line(next) {
                    skip_until = self.line_end(next);
                }
                continue;
            }
            if in_string {
                match ch {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match ch {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(offset + ch.len_utf8());
                    }
                }
                _ => {}
            }
        }
        None
    }
}

fn is_ident(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Node identity to span mapping for one document snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpanTable {
    entries: IndexMap<NodeId, SourceSpan>,
}

impl SpanTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a span; an identity that is already present keeps its first span.
    pub fn insert(&mut self, id: NodeId, span: SourceSpan) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, span);
        true
    }

    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&SourceSpan> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.entries.contains_key(id)
    }

    /// First node recorded at `span`.
    #[must_use]
    pub fn node_at(&self, span: &SourceSpan) -> Option<&NodeId> {
        self.entries
            .iter()
            .find(|(_, candidate)| *candidate == span)
            .map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &SourceSpan)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "sequence Main {\n    step Fetch {\n        url = \"{x}\"\n    }\n    log Done;\n}\n";

    #[test]
    fn spans_compare_by_bounds_only() {
        let a = SourceSpan::new("a.flux", 2, 5, 4, 6);
        let b = SourceSpan::new("b.flux", 2, 5, 4, 6);
        let c = SourceSpan::new("a.flux", 2, 5, 4, 7);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn line_col_is_one_based() {
        let doc = SourceDocument::new("main.flux", TEXT);
        assert_eq!(doc.line_col(0), (1, 1));
        let fetch = TEXT.find("step Fetch").expect("anchor");
        assert_eq!(doc.line_col(fetch), (2, 5));
        assert_eq!(doc.line_count(), 7);
    }

    #[test]
    fn locate_extends_through_brace_block_and_skips_string_braces() {
        let doc = SourceDocument::new("main.flux", TEXT);
        let (span, start) = doc.locate("step Fetch", 0).expect("located");
        assert_eq!(start, TEXT.find("step Fetch").expect("anchor"));
        assert_eq!(span.bounds(), (2, 5, 4, 6));
    }

    #[test]
    fn locate_without_block_ends_at_line() {
        let doc = SourceDocument::new("main.flux", TEXT);
        let (span, _) = doc.locate("log Done", 0).expect("located");
        assert_eq!(span.bounds(), (5, 5, 5, 14));
    }

    #[test]
    fn locate_prefers_occurrence_after_cursor() {
        let text = "step A;\nstep A;\n";
        let doc = SourceDocument::new("dup.flux", text);
        let (first, first_start) = doc.locate("step A", 0).expect("first");
        let (second, _) = doc
            .locate("step A", first_start + "step A".len())
            .expect("second");
        assert_eq!(first.start_line, 1);
        assert_eq!(second.start_line, 2);
        let (wrapped, _) = doc.locate("step A", text.len()).expect("fallback");
        assert_eq!(wrapped.start_line, 1);
    }

    #[test]
    fn locate_ignores_mentions_in_comment_lines() {
        let text = "sequence Main {\n    step Fetch;\n    // then step Charge runs\n    step Charge;\n}\n";
        let doc = SourceDocument::new("m.flux", text);
        let (span, _) = doc.locate("step Charge", 0).expect("located");
        assert_eq!(span.bounds(), (4, 5, 4, 17));
    }

    #[test]
    fn locate_skips_braces_on_comment_lines() {
        let text = "sequence Main {\n    step Fetch {\n        // closes on }\n        url = \"x\"\n    }\n}\n";
        let doc = SourceDocument::new("m.flux", text);
        let (span, _) = doc.locate("step Fetch", 0).expect("located");
        assert_eq!(span.bounds(), (2, 5, 5, 6));
    }

    #[test]
    fn locate_matches_whole_tokens_only() {
        let text = "step Fetcher;\nstep Fetch;\n";
        let doc = SourceDocument::new("m.flux", text);
        let (span, _) = doc.locate("step Fetch", 0).expect("located");
        assert_eq!(span.start_line, 2);
    }

    #[test]
    fn locate_missing_marker_is_none() {
        let doc = SourceDocument::new("main.flux", TEXT);
        assert!(doc.locate("step Missing", 0).is_none());
        assert!(doc.locate("", 0).is_none());
    }

    #[test]
    fn span_table_keeps_first_span_and_reverse_lookup() {
        let mut table = SpanTable::new();
        let span = SourceSpan::new("main.flux", 1, 1, 1, 5);
        assert!(table.insert(NodeId::new("1"), span.clone()));
        assert!(!table.insert(NodeId::new("1"), SourceSpan::new("main.flux", 9, 1, 9, 2)));
        assert_eq!(table.get(&NodeId::new("1")), Some(&span));
        assert_eq!(table.node_at(&span), Some(&NodeId::new("1")));
        assert_eq!(table.len(), 1);
    }
}
