//! Bounded capture of snippet output

/// Appended once when output is cut off.
pub const TRUNCATION_MARKER: &str = "\n... [output truncated] ...\n";

/// Text buffer that stops growing at `limit` bytes.
///
/// A limit of 0 means unlimited. Cuts always land on a char boundary.
#[derive(Debug, Clone, Default)]
pub struct LimitedBuffer {
    buffer: String,
    limit: usize,
    truncated: bool,
}

impl LimitedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: String::new(),
            limit,
            truncated: false,
        }
    }

    /// Append as much of `data` as fits. Returns whether all of it fit.
    pub fn push(&mut self, data: &str) -> bool {
        if self.truncated {
            return false;
        }
        if self.limit == 0 {
            self.buffer.push_str(data);
            return true;
        }

        let remaining = self.limit.saturating_sub(self.buffer.len());
        if data.len() <= remaining {
            self.buffer.push_str(data);
            return true;
        }

        let mut cut = remaining;
        while !data.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buffer.push_str(&data[..cut]);
        self.buffer.push_str(TRUNCATION_MARKER);
        self.truncated = true;
        false
    }

    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_limit() {
        let mut buffer = LimitedBuffer::new(100);
        assert!(buffer.push("hello world"));
        assert!(!buffer.was_truncated());
        assert_eq!(buffer.as_str(), "hello world");
    }

    #[test]
    fn test_over_limit_truncates_once() {
        let mut buffer = LimitedBuffer::new(5);
        assert!(!buffer.push("hello world"));
        assert!(!buffer.push("more"));
        assert!(buffer.was_truncated());
        assert_eq!(buffer.into_string(), format!("hello{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_cut_respects_char_boundary() {
        let mut buffer = LimitedBuffer::new(2);
        buffer.push("héllo");
        assert!(buffer.as_str().starts_with('h'));
        assert!(!buffer.as_str().starts_with("hé"));
    }

    #[test]
    fn test_zero_is_unlimited() {
        let mut buffer = LimitedBuffer::new(0);
        assert!(buffer.push(&"x".repeat(10_000)));
        assert_eq!(buffer.as_str().len(), 10_000);
    }
}
