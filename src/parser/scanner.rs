//! Marker scanner
//!
//! A small state machine over the raw model text. It recognises the six
//! markers and nothing else; any other `<` is ordinary text.
//!
//! ```text
//!            open(tag)                    close(tag)
//!   Outside ───────────► Inside(tag) ───────────────► Outside
//!      │                     │
//!      │ close(any)          │ open(any) / close(other)
//!      ▼                     ▼
//!   Unopened            Nested / Nested
//!
//!   end of input while Inside(tag) → Unterminated(tag)
//! ```

use std::fmt;

use super::TagFault;

/// The three segment kinds of the output grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Think,
    Python,
    Reply,
}

impl Tag {
    pub const ALL: [Tag; 3] = [Tag::Think, Tag::Python, Tag::Reply];

    pub fn name(self) -> &'static str {
        match self {
            Tag::Think => "think",
            Tag::Python => "python",
            Tag::Reply => "reply",
        }
    }

    pub fn open(self) -> &'static str {
        match self {
            Tag::Think => "<think>",
            Tag::Python => "<python>",
            Tag::Reply => "<reply>",
        }
    }

    pub fn close(self) -> &'static str {
        match self {
            Tag::Think => "</think>",
            Tag::Python => "</python>",
            Tag::Reply => "</reply>",
        }
    }

    fn index(self) -> usize {
        match self {
            Tag::Think => 0,
            Tag::Python => 1,
            Tag::Reply => 2,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Open(Tag),
    Close(Tag),
}

impl Marker {
    fn text(self) -> &'static str {
        match self {
            Marker::Open(tag) => tag.open(),
            Marker::Close(tag) => tag.close(),
        }
    }
}

fn marker_at(text: &str) -> Option<Marker> {
    Tag::ALL.iter().find_map(|&tag| {
        if text.starts_with(tag.open()) {
            Some(Marker::Open(tag))
        } else if text.starts_with(tag.close()) {
            Some(Marker::Close(tag))
        } else {
            None
        }
    })
}

enum State {
    Outside,
    Inside { tag: Tag, start: usize },
}

/// Raw segment contents, indexed by tag. `None` means the marker pair never appeared.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Segments {
    slots: [Option<String>; 3],
}

impl Segments {
    pub fn get(&self, tag: Tag) -> Option<&str> {
        self.slots[tag.index()].as_deref()
    }

    pub fn take(&mut self, tag: Tag) -> Option<String> {
        self.slots[tag.index()].take()
    }
}

/// Split `text` into marker-delimited segments, enforcing that each marker
/// pair appears at most once and that segments do not nest.
pub fn scan(text: &str) -> Result<Segments, TagFault> {
    let mut segments = Segments::default();
    let mut state = State::Outside;
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('<') {
        let at = pos + offset;
        let Some(marker) = marker_at(&text[at..]) else {
            pos = at + 1;
            continue;
        };
        let after = at + marker.text().len();

        state = match (state, marker) {
            (State::Outside, Marker::Open(tag)) => {
                if segments.get(tag).is_some() {
                    return Err(TagFault::Duplicated(tag));
                }
                State::Inside { tag, start: after }
            }
            (State::Outside, Marker::Close(tag)) => return Err(TagFault::Unopened(tag)),
            (State::Inside { tag, start }, Marker::Close(closing)) if closing == tag => {
                segments.slots[tag.index()] = Some(text[start..at].to_string());
                State::Outside
            }
            (State::Inside { tag, .. }, Marker::Open(inner))
            | (State::Inside { tag, .. }, Marker::Close(inner)) => {
                return Err(TagFault::Nested { outer: tag, inner });
            }
        };

        pos = after;
    }

    match state {
        State::Inside { tag, .. } => Err(TagFault::Unterminated(tag)),
        State::Outside => Ok(segments),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scans_all_segments() {
        let segments = scan("<think>a</think>\n<python>x = 1</python>").unwrap();
        assert_eq!(segments.get(Tag::Think), Some("a"));
        assert_eq!(segments.get(Tag::Python), Some("x = 1"));
        assert_eq!(segments.get(Tag::Reply), None);
    }

    #[test]
    fn test_less_than_is_plain_text() {
        let segments = scan("<think>a < b</think><python>if a < b:\n    x = 1</python>").unwrap();
        assert_eq!(segments.get(Tag::Think), Some("a < b"));
        assert!(segments.get(Tag::Python).unwrap().contains("a < b"));
    }

    #[test]
    fn test_partial_marker_at_truncation_is_text() {
        let segments = scan("<think>x</think><reply>done</reply><pyth").unwrap();
        assert_eq!(segments.get(Tag::Reply), Some("done"));
    }

    #[test]
    fn test_unterminated() {
        assert_eq!(
            scan("<think>x</think><python>x = 1"),
            Err(TagFault::Unterminated(Tag::Python))
        );
    }

    #[test]
    fn test_duplicated() {
        assert_eq!(
            scan("<think>a</think><think>b</think><reply>r</reply>"),
            Err(TagFault::Duplicated(Tag::Think))
        );
    }

    #[test]
    fn test_nested() {
        assert_eq!(
            scan("<think>a<reply>r</reply></think>"),
            Err(TagFault::Nested { outer: Tag::Think, inner: Tag::Reply })
        );
    }

    #[test]
    fn test_mismatched_close_is_nested() {
        assert_eq!(
            scan("<python>x</reply>"),
            Err(TagFault::Nested { outer: Tag::Python, inner: Tag::Reply })
        );
    }

    #[test]
    fn test_unopened_close() {
        assert_eq!(scan("hello</reply>"), Err(TagFault::Unopened(Tag::Reply)));
    }
}
