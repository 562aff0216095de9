//! Locating the two values the console embeds in its markup.
//!
//! The console pages are not a versioned contract, so extraction sits behind
//! the [`TokenLocator`] trait. [`MarkupTokenLocator`] is the default: a
//! forward-only scan over a lightweight tag/text token stream, with no DOM.
//!
//! - xsrf token: text immediately following `<span id="_xsrfToken">`
//! - SSO exchange token: first `repostParams = { "token": ["<value>"` match in
//!   an inline `<script type="text/javascript">` block

use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// `id` attribute value marking the xsrf token element.
pub const XSRF_MARKER_ID: &str = "_xsrfToken";

/// Script `type` attribute value of the block holding the repost parameters.
pub const SSO_SCRIPT_TYPE: &str = "text/javascript";

const XSRF_ELEMENT: &str = "span";

/// Elements whose content is raw text up to the matching end tag.
const RAW_TEXT_ELEMENTS: [&str; 4] = ["script", "style", "textarea", "title"];

fn repost_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\brepostParams\s*=\s*\{\s*"token"\s*:\s*\[\s*"([^"]+)""#)
            .expect("repost pattern is a valid regex")
    })
}

macro_rules! opaque_token {
    ($name:ident) => {
        /// Single-run console token. Never empty; `Debug` hides the value.
        #[derive(Clone, PartialEq, Eq)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let value = value.into();
                if value.is_empty() {
                    None
                } else {
                    Some(Self(value))
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "(<{} chars>)"), self.0.len())
            }
        }
    };
}

opaque_token!(XsrfToken);
opaque_token!(SsoToken);

/// Pluggable strategy for finding console tokens in page bodies.
pub trait TokenLocator: Send + Sync {
    fn xsrf_token(&self, html: &str) -> Option<XsrfToken>;
    fn sso_token(&self, html: &str) -> Option<SsoToken>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupTokenLocator;

impl TokenLocator for MarkupTokenLocator {
    fn xsrf_token(&self, html: &str) -> Option<XsrfToken> {
        extract_xsrf_token(html)
    }

    fn sso_token(&self, html: &str) -> Option<SsoToken> {
        extract_sso_token(html)
    }
}

/// Text content directly after the xsrf marker element.
pub fn extract_xsrf_token(html: &str) -> Option<XsrfToken> {
    let mut tokens = Tokenizer::new(html);

    while let Some(token) = tokens.next() {
        let Token::StartTag { name, attrs, .. } = token else {
            continue;
        };
        if name != XSRF_ELEMENT {
            continue;
        }
        if attrs.iter().any(|(k, v)| k == "id" && v == XSRF_MARKER_ID) {
            return match tokens.next() {
                Some(Token::Text(text)) => XsrfToken::new(decode_entities(text).into_owned()),
                _ => None,
            };
        }
    }

    None
}

/// First repost token found in an inline script block.
///
/// Input without any markup is treated as a bare script body.
pub fn extract_sso_token(html: &str) -> Option<SsoToken> {
    let mut tokens = Tokenizer::new(html);
    let mut saw_markup = false;

    while let Some(token) = tokens.next() {
        let Token::StartTag { name, attrs, .. } = token else {
            continue;
        };
        saw_markup = true;
        if name != "script" {
            continue;
        }
        let is_inline_js = attrs
            .iter()
            .any(|(k, v)| k == "type" && v.eq_ignore_ascii_case(SSO_SCRIPT_TYPE));
        if !is_inline_js {
            continue;
        }
        if let Some(Token::RawText(script)) = tokens.next() {
            if let Some(token) = match_repost_token(script) {
                return Some(token);
            }
        }
    }

    if saw_markup {
        None
    } else {
        match_repost_token(html)
    }
}

fn match_repost_token(script: &str) -> Option<SsoToken> {
    repost_pattern()
        .captures(script)
        .and_then(|caps| caps.get(1))
        .and_then(|m| SsoToken::new(m.as_str()))
}

// ============================================================================
// Token stream
// ============================================================================

// End tag names and self-closing flags are only inspected by tests
#[allow(dead_code)]
#[derive(Debug, PartialEq)]
enum Token<'a> {
    StartTag {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    EndTag {
        name: String,
    },
    /// Character data, entities still encoded.
    Text(&'a str),
    /// Content of a raw text element such as `<script>`.
    RawText(&'a str),
}

/// Forward-only tokenizer. Stops (yields `None`) at the first incomplete
/// construct, so truncated markup simply ends the stream.
struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
    raw_text_of: Option<String>,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            raw_text_of: None,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn raw_text(&mut self, element: &str) -> Option<Token<'a>> {
        let rest = self.rest();
        let closing = format!("</{}", element);
        let end = find_ignore_ascii_case(rest, &closing).unwrap_or(rest.len());
        self.pos += end;
        if end == 0 {
            None
        } else {
            Some(Token::RawText(&rest[..end]))
        }
    }

    fn text(&mut self) -> Token<'a> {
        let rest = self.rest();
        // A leading '<' reaching here is literal text
        let first = rest.chars().next().map_or(0, char::len_utf8);
        let end = rest[first..]
            .find('<')
            .map(|i| i + first)
            .unwrap_or(rest.len());
        self.pos += end;
        Token::Text(&rest[..end])
    }

    /// Skip past `terminator`, or end the stream if it never appears.
    fn skip_past(&mut self, from: usize, terminator: &str) -> Option<()> {
        let rest = &self.input[self.pos + from..];
        let found = rest.find(terminator)?;
        self.pos += from + found + terminator.len();
        Some(())
    }

    fn end_tag(&mut self) -> Option<Token<'a>> {
        let rest = self.rest();
        let bytes = rest.as_bytes();
        let mut i = 2;
        while i < bytes.len() && !is_tag_name_end(bytes[i]) {
            i += 1;
        }
        let name = rest[2..i].to_ascii_lowercase();
        let close = rest[i..].find('>')?;
        self.pos += i + close + 1;
        Some(Token::EndTag { name })
    }

    fn start_tag(&mut self) -> Option<Token<'a>> {
        let rest = self.rest();
        let bytes = rest.as_bytes();
        let mut i = 1;
        while i < bytes.len() && !is_tag_name_end(bytes[i]) {
            i += 1;
        }
        let name = rest[1..i].to_ascii_lowercase();
        let mut attrs = Vec::new();
        let mut self_closing = false;

        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            match bytes.get(i)? {
                b'>' => {
                    i += 1;
                    break;
                }
                b'/' => {
                    if bytes.get(i + 1) == Some(&b'>') {
                        self_closing = true;
                        i += 2;
                        break;
                    }
                    i += 1;
                    continue;
                }
                _ => {}
            }

            let name_start = i;
            while i < bytes.len()
                && !bytes[i].is_ascii_whitespace()
                && !matches!(bytes[i], b'=' | b'>' | b'/')
            {
                i += 1;
            }
            let attr_name = rest[name_start..i].to_ascii_lowercase();

            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if bytes.get(i) != Some(&b'=') {
                attrs.push((attr_name, String::new()));
                continue;
            }
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }

            let value = match *bytes.get(i)? {
                quote @ (b'"' | b'\'') => {
                    let start = i + 1;
                    let len = rest[start..].find(quote as char)?;
                    i = start + len + 1;
                    &rest[start..start + len]
                }
                _ => {
                    let start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    &rest[start..i]
                }
            };
            attrs.push((attr_name, decode_entities(value).into_owned()));
        }

        self.pos += i;
        if !self_closing && RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            self.raw_text_of = Some(name.clone());
        }
        Some(Token::StartTag {
            name,
            attrs,
            self_closing,
        })
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        loop {
            if self.pos >= self.input.len() {
                return None;
            }

            if let Some(element) = self.raw_text_of.take() {
                if let Some(token) = self.raw_text(&element) {
                    return Some(token);
                }
                continue;
            }

            let rest = self.rest();
            if !rest.starts_with('<') {
                return Some(self.text());
            }

            let next = rest.as_bytes().get(1).copied();
            if rest.starts_with("<!--") {
                self.skip_past(4, "-->")?;
            } else if matches!(next, Some(b'!') | Some(b'?')) {
                self.skip_past(2, ">")?;
            } else if next == Some(b'/') {
                match rest.as_bytes().get(2) {
                    Some(c) if c.is_ascii_alphabetic() => return self.end_tag(),
                    Some(b'>') => self.pos += 3,
                    None => return None,
                    _ => self.skip_past(2, ">")?,
                }
            } else if next.is_some_and(|c| c.is_ascii_alphabetic()) {
                return self.start_tag();
            } else {
                return Some(self.text());
            }
        }
    }
}

fn is_tag_name_end(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b'>' || b == b'/'
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

/// Decode the handful of character references the console emits.
fn decode_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_reference(&rest[1..semi]).map(|c| (c, semi)));

        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_reference(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
