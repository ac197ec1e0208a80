use std::ops::Range;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use miette::SourceSpan;

type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Location within source
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Span {
    offs: usize,
    len: usize,
}

impl Span {
    pub fn new(offs: usize, len: usize) -> Self {
        Span { offs, len }
    }

    pub fn range(&self) -> Range<usize> {
        self.offs..self.offs + self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn offs(&self) -> usize {
        self.offs
    }

    pub fn end(&self) -> usize {
        self.offs + self.len
    }
}

impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs().into(), value.len())
    }
}

impl From<Span> for Range<usize> {
    fn from(value: Span) -> Self {
        value.range()
    }
}

/// Use of a label as an operand, resolved once every declaration is known.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LabelRef {
    pub name: String,
    /// 1-based source line
    pub line: usize,
    pub span: Span,
}

/// Label name -> byte offset in the output image, in declaration order.
#[derive(Clone, Default, Debug)]
pub struct LabelTable {
    labels: FxMap<String, usize>,
}

impl LabelTable {
    pub fn new() -> Self {
        LabelTable::default()
    }

    /// Declare a label. Returns `false` and leaves the table untouched if the name exists.
    pub fn insert(&mut self, name: &str, offset: usize) -> bool {
        if self.labels.contains_key(name) {
            return false;
        }
        self.labels.insert(name.to_owned(), offset);
        true
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.labels.iter().map(|(name, offs)| (name.as_str(), *offs))
    }
}
