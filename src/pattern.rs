use bytes::Bytes;
use std::fmt;

/// A glob-style topic pattern, compiled once when the subscription is created.
///
/// Supports `*` (any sequence), `?` (any single byte), `[abc]`, `[a-z]` and `[^abc]` classes,
/// and `\x` escapes. Matching works on raw bytes, so topics need not be UTF-8. An unterminated
/// `[` is taken literally.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: Bytes,
    tokens: Vec<Token>,
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Literal(u8),
    AnyByte,
    AnySequence,
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ClassItem {
    Byte(u8),
    Range(u8, u8),
}

impl ClassItem {
    fn contains(&self, byte: u8) -> bool {
        match *self {
            ClassItem::Byte(b) => b == byte,
            ClassItem::Range(lo, hi) => lo <= byte && byte <= hi,
        }
    }
}

impl Token {
    fn matches(&self, byte: u8) -> bool {
        match self {
            Token::Literal(b) => *b == byte,
            Token::AnyByte => true,
            Token::AnySequence => true,
            Token::Class { negated, items } => {
                items.iter().any(|item| item.contains(byte)) != *negated
            }
        }
    }
}

impl Pattern {
    pub fn compile(source: impl Into<Bytes>) -> Pattern {
        let source = source.into();
        let tokens = tokenize(&source);
        Pattern { source, tokens }
    }

    /// The pattern as the subscriber wrote it.
    pub fn source(&self) -> &Bytes {
        &self.source
    }

    pub fn matches(&self, topic: &[u8]) -> bool {
        let tokens = &self.tokens;
        let (mut ti, mut si) = (0, 0);
        // Position after the last `*` and the topic offset it is currently absorbing up to.
        let mut backtrack: Option<(usize, usize)> = None;

        while si < topic.len() {
            match tokens.get(ti) {
                Some(Token::AnySequence) => {
                    backtrack = Some((ti + 1, si));
                    ti += 1;
                    continue;
                }
                Some(token) if token.matches(topic[si]) => {
                    ti += 1;
                    si += 1;
                    continue;
                }
                _ => {}
            }

            match backtrack {
                Some((resume, absorbed)) => {
                    ti = resume;
                    si = absorbed + 1;
                    backtrack = Some((resume, absorbed + 1));
                }
                None => return false,
            }
        }

        tokens[ti..]
            .iter()
            .all(|token| *token == Token::AnySequence)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source.escape_ascii())
    }
}

fn tokenize(src: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(src.len());
    let mut i = 0;

    while i < src.len() {
        match src[i] {
            b'\\' if i + 1 < src.len() => {
                tokens.push(Token::Literal(src[i + 1]));
                i += 2;
            }
            b'*' => {
                if tokens.last() != Some(&Token::AnySequence) {
                    tokens.push(Token::AnySequence);
                }
                i += 1;
            }
            b'?' => {
                tokens.push(Token::AnyByte);
                i += 1;
            }
            b'[' => match parse_class(src, i + 1) {
                Some((token, next)) => {
                    tokens.push(token);
                    i = next;
                }
                None => {
                    tokens.push(Token::Literal(b'['));
                    i += 1;
                }
            },
            byte => {
                tokens.push(Token::Literal(byte));
                i += 1;
            }
        }
    }

    tokens
}

/// Parses a class body starting right after `[`. Returns the token and the index after `]`,
/// or `None` when the class is never closed.
fn parse_class(src: &[u8], mut i: usize) -> Option<(Token, usize)> {
    let negated = src.get(i) == Some(&b'^');
    if negated {
        i += 1;
    }

    let mut items = Vec::new();
    loop {
        let byte = match *src.get(i)? {
            b']' => return Some((Token::Class { negated, items }, i + 1)),
            b'\\' => {
                i += 1;
                *src.get(i)?
            }
            byte => byte,
        };

        if src.get(i + 1) == Some(&b'-') && src.get(i + 2).is_some_and(|&b| b != b']') {
            let end = src[i + 2];
            let (lo, hi) = if byte <= end { (byte, end) } else { (end, byte) };
            items.push(ClassItem::Range(lo, hi));
            i += 3;
        } else {
            items.push(ClassItem::Byte(byte));
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, topic: &str) -> bool {
        Pattern::compile(Bytes::copy_from_slice(pattern.as_bytes())).matches(topic.as_bytes())
    }

    #[test]
    fn star_matches_any_sequence() {
        assert!(matches("news.*", "news.sport"));
        assert!(matches("news.*", "news."));
        assert!(matches("*", ""));
        assert!(matches("a*b*c", "aXXbYYc"));
        assert!(matches("a**c", "abc"));
        assert!(!matches("news.*", "weather.today"));
        assert!(!matches("a*b", "aXXbYYc"));
    }

    #[test]
    fn question_mark_matches_one_byte() {
        assert!(matches("h?llo", "hello"));
        assert!(matches("h?llo", "hallo"));
        assert!(!matches("h?llo", "hllo"));
    }

    #[test]
    fn classes_and_ranges() {
        assert!(matches("h[ae]llo", "hello"));
        assert!(!matches("h[ae]llo", "hillo"));
        assert!(matches("h[^e]llo", "hallo"));
        assert!(!matches("h[^e]llo", "hello"));
        assert!(matches("h[a-b]llo", "hbllo"));
        assert!(matches("h[b-a]llo", "hallo"));
        assert!(!matches("h[a-b]llo", "hcllo"));
    }

    #[test]
    fn escapes_are_literal() {
        assert!(matches("h\\*llo", "h*llo"));
        assert!(!matches("h\\*llo", "hello"));
        assert!(matches("\\[x]", "[x]"));
    }

    #[test]
    fn unterminated_class_is_literal() {
        assert!(matches("a[b", "a[b"));
        assert!(!matches("a[b", "ab"));
    }

    #[test]
    fn binary_topics() {
        let pattern = Pattern::compile(Bytes::from_static(b"\xff*"));
        assert!(pattern.matches(b"\xff\x00\x01"));
        assert!(!pattern.matches(b"\x00"));
    }
}
