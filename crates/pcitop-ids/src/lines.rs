use std::ops::Range;

/// One database line. `start..end` excludes the trailing newline; `next` is the offset of
/// the following line.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Line<'a> {
    pub text: &'a [u8],
    pub start: usize,
    pub end: usize,
    pub next: usize,
}

impl Line<'_> {
    /// `prefix` followed by `id` followed by a separator (or end of line).
    pub fn starts_with_id(&self, prefix: &[u8], id: &[u8]) -> bool {
        let Some(rest) = self.text.strip_prefix(prefix) else {
            return false;
        };
        let Some(rest) = rest.strip_prefix(id) else {
            return false;
        };
        matches!(rest.first(), None | Some(b' ' | b'\t' | b'\r'))
    }
}

/// Iterates the lines starting at `pos`, stopping at `limit`.
pub(crate) struct Lines<'a> {
    db: &'a [u8],
    pos: usize,
    limit: usize,
}

impl<'a> Lines<'a> {
    pub fn new(db: &'a [u8], pos: usize, limit: usize) -> Self {
        Self {
            db,
            pos,
            limit: limit.min(db.len()),
        }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = Line<'a>;

    fn next(&mut self) -> Option<Line<'a>> {
        if self.pos >= self.limit {
            return None;
        }
        let start = self.pos;
        let rest = &self.db[start..self.limit];
        let (end, next) = match rest.iter().position(|&b| b == b'\n') {
            Some(nl) => (start + nl, start + nl + 1),
            None => (self.limit, self.limit),
        };
        self.pos = next;
        Some(Line {
            text: &self.db[start..end],
            start,
            end,
            next,
        })
    }
}

/// Span of the name that follows an ID: leading separators skipped, trailing whitespace
/// trimmed.
pub(crate) fn name_span(db: &[u8], mut from: usize, mut end: usize) -> Range<usize> {
    end = end.min(db.len());
    while from < end && matches!(db[from], b' ' | b'\t') {
        from += 1;
    }
    while end > from && db[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    from..end
}

const HEX: &[u8; 16] = b"0123456789abcdef";

pub(crate) fn hex4(v: u16) -> [u8; 4] {
    [
        HEX[usize::from(v >> 12)],
        HEX[usize::from((v >> 8) & 0xf)],
        HEX[usize::from((v >> 4) & 0xf)],
        HEX[usize::from(v & 0xf)],
    ]
}

pub(crate) fn hex2(v: u8) -> [u8; 2] {
    [HEX[usize::from(v >> 4)], HEX[usize::from(v & 0xf)]]
}
