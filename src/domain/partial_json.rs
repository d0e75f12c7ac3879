//! Incremental parsing of streamed JSON argument buffers.
//!
//! Action arguments arrive as a growing text buffer that is syntactically
//! incomplete until the final chunk. [`parse_partial`] turns any prefix of a
//! JSON document into the best structure consistent with it:
//!
//! - unterminated objects and arrays are returned with the members seen so far;
//! - an unterminated string is returned with the characters seen so far;
//! - a member whose key or value has not started (or is a truncated number or
//!   literal) is left out rather than guessed.
//!
//! The function is pure, so the same buffer always yields the same value, and
//! a longer continuation of a buffer refines the shorter parse: resolved
//! members stay equal, a still-growing string only gets longer.

use serde_json::{Map, Number, Value};

const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// Nothing usable yet (empty buffer, whitespace, or a truncated scalar).
    Pending,
    /// A truncated but consistent prefix.
    Partial(Value),
    /// The buffer holds exactly one complete document.
    Complete(Value),
}

impl ParseOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            ParseOutcome::Pending => None,
            ParseOutcome::Partial(v) | ParseOutcome::Complete(v) => Some(v),
        }
    }
}

/// The buffer can never become valid JSON, whatever is appended.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("malformed JSON at byte {offset}: {reason}")]
pub struct MalformedJson {
    pub offset: usize,
    pub reason: &'static str,
}

pub fn parse_partial(buffer: &str) -> Result<ParseOutcome, MalformedJson> {
    let mut parser = Parser {
        src: buffer,
        bytes: buffer.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let node = parser.value()?;
    match node {
        Node::Done(value) => {
            parser.skip_ws();
            if parser.pos < parser.bytes.len() {
                return Err(parser.fail("trailing characters after document"));
            }
            Ok(ParseOutcome::Complete(value))
        }
        Node::Open(Some(value)) => Ok(ParseOutcome::Partial(value)),
        Node::Open(None) => Ok(ParseOutcome::Pending),
    }
}

/// Strict parse used once the final chunk has arrived.
pub fn parse_complete(buffer: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(buffer)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

enum Node {
    /// Fully terminated value.
    Done(Value),
    /// Input ended inside this value; carries the partial value if any.
    Open(Option<Value>),
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn fail(&self, reason: &'static str) -> MalformedJson {
        MalformedJson {
            offset: self.pos,
            reason,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(b' ' | b'\n' | b'\r' | b'\t') = self.peek() {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Result<Node, MalformedJson> {
        self.skip_ws();
        match self.peek() {
            None => Ok(Node::Open(None)),
            Some(b'{') => self.nested(Self::object),
            Some(b'[') => self.nested(Self::array),
            Some(b'"') => self.string(),
            Some(b't') => self.literal("true", Value::Bool(true)),
            Some(b'f') => self.literal("false", Value::Bool(false)),
            Some(b'n') => self.literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(_) => Err(self.fail("unexpected character")),
        }
    }

    fn nested(
        &mut self,
        f: fn(&mut Self) -> Result<Node, MalformedJson>,
    ) -> Result<Node, MalformedJson> {
        if self.depth >= MAX_DEPTH {
            return Err(self.fail("nesting too deep"));
        }
        self.depth += 1;
        let node = f(self);
        self.depth -= 1;
        node
    }

    fn object(&mut self) -> Result<Node, MalformedJson> {
        self.pos += 1; // '{'
        let mut map = Map::new();
        let open = |map: Map<String, Value>| Ok(Node::Open(Some(Value::Object(map))));

        self.skip_ws();
        match self.peek() {
            None => return open(map),
            Some(b'}') => {
                self.pos += 1;
                return Ok(Node::Done(Value::Object(map)));
            }
            _ => {}
        }

        loop {
            self.skip_ws();
            match self.peek() {
                None => return open(map),
                Some(b'"') => {}
                Some(_) => return Err(self.fail("expected object key")),
            }
            let key = match self.string()? {
                Node::Done(Value::String(key)) => key,
                // a key still being typed contributes nothing
                _ => return open(map),
            };

            self.skip_ws();
            match self.peek() {
                None => return open(map),
                Some(b':') => self.pos += 1,
                Some(_) => return Err(self.fail("expected ':' after object key")),
            }

            match self.value()? {
                Node::Done(value) => {
                    map.insert(key, value);
                }
                Node::Open(partial) => {
                    if let Some(value) = partial {
                        map.insert(key, value);
                    }
                    return open(map);
                }
            }

            self.skip_ws();
            match self.peek() {
                None => return open(map),
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Node::Done(Value::Object(map)));
                }
                Some(_) => return Err(self.fail("expected ',' or '}' in object")),
            }
        }
    }

    fn array(&mut self) -> Result<Node, MalformedJson> {
        self.pos += 1; // '['
        let mut items = Vec::new();

        self.skip_ws();
        match self.peek() {
            None => return Ok(Node::Open(Some(Value::Array(items)))),
            Some(b']') => {
                self.pos += 1;
                return Ok(Node::Done(Value::Array(items)));
            }
            _ => {}
        }

        loop {
            match self.value()? {
                Node::Done(value) => items.push(value),
                Node::Open(partial) => {
                    items.extend(partial);
                    return Ok(Node::Open(Some(Value::Array(items))));
                }
            }

            self.skip_ws();
            match self.peek() {
                None => return Ok(Node::Open(Some(Value::Array(items)))),
                Some(b',') => {
                    self.pos += 1;
                    self.skip_ws();
                    if self.peek() == Some(b']') {
                        return Err(self.fail("trailing comma in array"));
                    }
                }
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Node::Done(Value::Array(items)));
                }
                Some(_) => return Err(self.fail("expected ',' or ']' in array")),
            }
        }
    }

    fn string(&mut self) -> Result<Node, MalformedJson> {
        self.pos += 1; // opening quote
        let mut out = String::new();
        let open = |out: String| Ok(Node::Open(Some(Value::String(out))));

        loop {
            let start = self.pos;
            while let Some(b) = self.peek() {
                if b == b'"' || b == b'\\' || b < 0x20 {
                    break;
                }
                self.pos += 1;
            }
            // '"', '\\' and control bytes are ASCII, so `pos` is a char boundary
            out.push_str(&self.src[start..self.pos]);

            match self.peek() {
                None => return open(out),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(Node::Done(Value::String(out)));
                }
                Some(b'\\') => match self.escape()? {
                    Some(c) => out.push(c),
                    None => return open(out),
                },
                Some(_) => return Err(self.fail("control character in string")),
            }
        }
    }

    /// Returns `None` when the input ends inside the escape sequence.
    fn escape(&mut self) -> Result<Option<char>, MalformedJson> {
        self.pos += 1; // '\\'
        let Some(b) = self.peek() else {
            return Ok(None);
        };
        self.pos += 1;
        let c = match b {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{8}',
            b'f' => '\u{c}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => return self.unicode_escape(),
            _ => return Err(self.fail("invalid escape")),
        };
        Ok(Some(c))
    }

    fn unicode_escape(&mut self) -> Result<Option<char>, MalformedJson> {
        let Some(high) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xD800..0xDC00).contains(&high) {
            return char::from_u32(high as u32)
                .map(Some)
                .ok_or_else(|| self.fail("lone surrogate in string"));
        }

        // high surrogate: a `\uXXXX` low surrogate must follow
        match (self.peek(), self.bytes.get(self.pos + 1)) {
            (None, _) | (Some(b'\\'), None) => return Ok(None),
            (Some(b'\\'), Some(b'u')) => self.pos += 2,
            _ => return Err(self.fail("lone surrogate in string")),
        }
        let Some(low) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xDC00..0xE000).contains(&low) {
            return Err(self.fail("lone surrogate in string"));
        }
        let code = 0x10000 + (((high as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
        char::from_u32(code)
            .map(Some)
            .ok_or_else(|| self.fail("invalid unicode escape"))
    }

    fn hex4(&mut self) -> Result<Option<u16>, MalformedJson> {
        let mut code: u16 = 0;
        for _ in 0..4 {
            let Some(b) = self.peek() else {
                return Ok(None);
            };
            let digit = (b as char)
                .to_digit(16)
                .ok_or_else(|| self.fail("invalid unicode escape"))?;
            code = code * 16 + digit as u16;
            self.pos += 1;
        }
        Ok(Some(code))
    }

    fn literal(&mut self, word: &'static str, value: Value) -> Result<Node, MalformedJson> {
        let rest = &self.bytes[self.pos..];
        let n = rest.len().min(word.len());
        if rest[..n] != word.as_bytes()[..n] {
            return Err(self.fail("invalid literal"));
        }
        self.pos += n;
        if n < word.len() {
            return Ok(Node::Open(None));
        }
        Ok(Node::Done(value))
    }

    fn number(&mut self) -> Result<Node, MalformedJson> {
        let start = self.pos;
        while let Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') = self.peek() {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        if self.pos == self.bytes.len() {
            // may still grow ("1" -> "12", "1." -> "1.5"), so it is not resolved yet
            return Ok(Node::Open(None));
        }
        serde_json::from_str::<Number>(text)
            .map(|n| Node::Done(Value::Number(n)))
            .map_err(|_| MalformedJson {
                offset: start,
                reason: "invalid number",
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn partial(buffer: &str) -> Value {
        match parse_partial(buffer).unwrap() {
            ParseOutcome::Partial(v) => v,
            other => panic!("expected partial for {buffer:?}, got {other:?}"),
        }
    }

    /// `shorter` is consistent with `longer`: resolved members are equal,
    /// strings may only have grown, containers may only have gained members.
    fn refines(shorter: &Value, longer: &Value) -> bool {
        match (shorter, longer) {
            (Value::Object(a), Value::Object(b)) => a
                .iter()
                .all(|(k, v)| b.get(k).is_some_and(|w| refines(v, w))),
            (Value::Array(a), Value::Array(b)) => {
                a.len() <= b.len() && a.iter().zip(b).all(|(v, w)| refines(v, w))
            }
            (Value::String(a), Value::String(b)) => b.starts_with(a.as_str()),
            (a, b) => a == b,
        }
    }

    #[test]
    fn open_string_inside_nested_object() {
        assert_eq!(
            partial(r#"{"tweet":{"title":"Hi"#),
            json!({"tweet": {"title": "Hi"}})
        );
    }

    #[test]
    fn members_not_yet_visible_are_absent() {
        assert_eq!(partial(r#"{"tweet":{"title":"Hi","#), json!({"tweet": {"title": "Hi"}}));
        assert_eq!(partial(r#"{"tweet":{"title":"Hi","con"#), json!({"tweet": {"title": "Hi"}}));
        assert_eq!(partial(r#"{"tweet":{"title":"Hi","content""#), json!({"tweet": {"title": "Hi"}}));
        assert_eq!(partial(r#"{"tweet":{"title":"Hi","content":"#), json!({"tweet": {"title": "Hi"}}));
        assert_eq!(
            partial(r#"{"tweet":{"title":"Hi","content":""#),
            json!({"tweet": {"title": "Hi", "content": ""}})
        );
    }

    #[test]
    fn truncated_scalars_are_not_guessed() {
        assert_eq!(partial(r#"{"n":12"#), json!({}));
        assert_eq!(partial(r#"{"ok":tr"#), json!({}));
        assert_eq!(partial(r#"{"n":12,"ok":true"#), json!({"n": 12, "ok": true}));
        assert_eq!(parse_partial("12").unwrap(), ParseOutcome::Pending);
        assert_eq!(parse_partial("nu").unwrap(), ParseOutcome::Pending);
    }

    #[test]
    fn open_arrays_keep_completed_items() {
        assert_eq!(partial(r#"{"logs":["a","b"#), json!({"logs": ["a", "b"]}));
        assert_eq!(partial(r#"{"logs":["a",{"x":1"#), json!({"logs": ["a", {}]}));
        assert_eq!(partial(r#"{"logs":["a",{"x":1,"#), json!({"logs": ["a", {"x": 1}]}));
        assert_eq!(partial("[1, 2, 3"), json!([1, 2]));
    }

    #[test]
    fn escapes_decode_and_truncated_escape_is_dropped() {
        assert_eq!(partial(r#"{"s":"a\"b\n"#), json!({"s": "a\"b\n"}));
        assert_eq!(partial(r#"{"s":"ab\"#), json!({"s": "ab"}));
        assert_eq!(partial(r#"{"s":"caf\u00e"#), json!({"s": "caf"}));
        assert_eq!(partial(r#"{"s":"café"#), json!({"s": "café"}));
        assert_eq!(partial(r#"{"s":"😀"#), json!({"s": "😀"}));
        assert_eq!(partial(r#"{"s":"x\ud83d"#), json!({"s": "x"}));
    }

    #[test]
    fn empty_and_whitespace_are_pending() {
        assert_eq!(parse_partial("").unwrap(), ParseOutcome::Pending);
        assert_eq!(parse_partial("  \n").unwrap(), ParseOutcome::Pending);
        assert_eq!(partial("{"), json!({}));
    }

    #[test]
    fn complete_document_is_complete() {
        let outcome = parse_partial(r#" {"a":[1,2.5,-3e2],"b":null} "#).unwrap();
        assert_eq!(
            outcome,
            ParseOutcome::Complete(json!({"a": [1, 2.5, -300.0], "b": null}))
        );
    }

    #[test]
    fn malformed_input_is_distinguished_from_partial() {
        assert!(parse_partial(r#"{"a" 1"#).is_err());
        assert!(parse_partial(r#"{a:1}"#).is_err());
        assert!(parse_partial(r#"[1,]"#).is_err());
        assert!(parse_partial(r#"{"a":1}}"#).is_err());
        assert!(parse_partial(r#"{"a":trux"#).is_err());
        assert!(parse_partial(r#"{"a":"\q"#).is_err());
        assert!(parse_partial("{\"a\":\"line\nbreak").is_err());
        let err = parse_partial(r#"{"a":1.2.3,"#).unwrap_err();
        assert_eq!(err.reason, "invalid number");
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let buffer = "[".repeat(MAX_DEPTH + 1);
        assert_eq!(
            parse_partial(&buffer).unwrap_err().reason,
            "nesting too deep"
        );
    }

    #[test]
    fn reparsing_same_buffer_is_identical() {
        let buffer = r#"{"tweet":{"title":"Hello","content":"Wor"#;
        assert_eq!(parse_partial(buffer).unwrap(), parse_partial(buffer).unwrap());
    }

    #[test]
    fn every_prefix_refines_toward_full_parse() {
        let full = json!({
            "tweet": {"title": "T1", "content": "Ship it 🚀 \"today\""},
            "linkedIn": {"title": "T2", "content": "C2", "tags": ["rust", "ai"]},
            "count": 42,
            "draft": false,
            "meta": null
        });
        let text = serde_json::to_string(&full).unwrap();

        let mut previous: Option<Value> = None;
        for (end, _) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
            let prefix = &text[..end];
            let outcome = parse_partial(prefix)
                .unwrap_or_else(|e| panic!("prefix {prefix:?} rejected: {e}"));
            let Some(value) = outcome.value().cloned() else {
                continue;
            };
            assert!(refines(&value, &full), "prefix {prefix:?} gave {value}");
            if let Some(prev) = &previous {
                assert!(refines(prev, &value), "{prev} does not refine into {value}");
            }
            previous = Some(value);
        }
        assert_eq!(previous, Some(full));
    }

    #[test]
    fn strict_parse_rejects_truncated_buffer() {
        assert!(parse_complete(r#"{"tweet":{"title":"Hi"#).is_err());
        assert_eq!(parse_complete(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
    }
}
