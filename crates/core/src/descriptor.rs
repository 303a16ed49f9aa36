//! Hardware descriptor document parser.
//!
//! A descriptor is a hierarchical, attribute-bearing element document
//! (an XML subset) describing one microcontroller: memory sizes, register
//! blocks, interrupt vectors, and peripheral wiring. This module only
//! parses the text into an [`Element`] tree; interpretation happens in
//! [`crate::builder`].
//!
//! Supported syntax: `<?..?>` prolog, `<!-- -->` comments, nested elements
//! with double-quoted attributes, and self-closing tags. Text content is
//! ignored (descriptors carry data in attributes only).

use crate::error::BuildError;

/// One element of a descriptor document: tag, attributes in document
/// order, child elements in document order.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
}

impl Element {
    /// Attribute value by name, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Integer attribute accepting standard base prefixes (0x, 0b, 0o).
    ///
    /// A malformed value is reported as absent and logged, per the
    /// degraded-build policy: the element is still processed.
    pub fn attr_uint(&self, name: &str) -> Option<u32> {
        let raw = self.attr(name)?;
        match parse_uint(raw) {
            Some(v) => Some(v),
            None => {
                log::warn!("<{}> attribute {}=\"{}\": not a number, ignored", self.tag, name, raw);
                None
            }
        }
    }

    /// Binary-mask attribute (`"00000001"`), as used by port masks and
    /// register write masks. A `0x` prefix switches to hex.
    pub fn attr_mask(&self, name: &str) -> Option<u8> {
        let raw = self.attr(name)?;
        if raw.starts_with("0x") || raw.starts_with("0X") {
            return match parse_uint(raw) {
                Some(v) => Some(v as u8),
                None => {
                    log::warn!("<{}> attribute {}=\"{}\": not a mask, ignored", self.tag, name, raw);
                    None
                }
            };
        }
        let digits = raw.strip_prefix("0b").unwrap_or(raw);
        match u8::from_str_radix(digits, 2) {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("<{}> attribute {}=\"{}\": not a binary mask, ignored", self.tag, name, raw);
                None
            }
        }
    }
}

/// Parse an unsigned integer with an optional base prefix.
pub fn parse_uint(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        u32::from_str_radix(bin, 2).ok()
    } else if let Some(oct) = s.strip_prefix("0o") {
        u32::from_str_radix(oct, 8).ok()
    } else {
        s.parse().ok()
    }
}

/// Split a comma-separated name list, dropping empties and whitespace.
pub fn name_list(s: &str) -> Vec<&str> {
    s.split(',').map(str::trim).filter(|n| !n.is_empty()).collect()
}

/// Parse a full descriptor document and return its root element.
pub fn parse_document(text: &str) -> Result<Element, BuildError> {
    let mut p = Parser { text: text.as_bytes(), pos: 0, line: 1 };
    p.skip_misc();
    let root = p.element()?;
    p.skip_misc();
    if p.pos < p.text.len() {
        return Err(p.err("trailing content after root element"));
    }
    Ok(root)
}

struct Parser<'a> {
    text: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Parser<'a> {
    fn err(&self, msg: &str) -> BuildError {
        BuildError::Parse { line: self.line, msg: msg.into() }
    }

    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn starts_with(&self, pat: &str) -> bool {
        self.text[self.pos..].starts_with(pat.as_bytes())
    }

    fn skip_until(&mut self, pat: &str) -> Result<(), BuildError> {
        while self.pos < self.text.len() {
            if self.starts_with(pat) {
                for _ in 0..pat.len() {
                    self.bump();
                }
                return Ok(());
            }
            self.bump();
        }
        Err(self.err(&format!("unterminated construct, expected {pat}")))
    }

    /// Skip whitespace, comments, prolog and any stray text content.
    fn skip_misc(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'<') if self.starts_with("<!--") => {
                    if self.skip_until("-->").is_err() {
                        self.pos = self.text.len();
                        return;
                    }
                }
                Some(b'<') if self.starts_with("<?") => {
                    if self.skip_until("?>").is_err() {
                        self.pos = self.text.len();
                        return;
                    }
                }
                Some(b'<') => return,
                Some(_) => {
                    // Text content between elements carries no data.
                    self.bump();
                }
                None => return,
            }
        }
    }

    fn name(&mut self) -> Result<String, BuildError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'-' || c == b':' || c == b'.' {
                self.bump();
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.err("expected a name"));
        }
        Ok(String::from_utf8_lossy(&self.text[start..self.pos]).into_owned())
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.bump();
        }
    }

    fn element(&mut self) -> Result<Element, BuildError> {
        if self.bump() != Some(b'<') {
            return Err(self.err("expected '<'"));
        }
        let tag = self.name()?;
        let mut el = Element { tag, ..Element::default() };

        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'/') => {
                    self.bump();
                    if self.bump() != Some(b'>') {
                        return Err(self.err("expected '>' after '/'"));
                    }
                    return Ok(el); // self-closing
                }
                Some(b'>') => {
                    self.bump();
                    break;
                }
                Some(_) => {
                    let key = self.name()?;
                    self.skip_ws();
                    if self.bump() != Some(b'=') {
                        return Err(self.err("expected '=' in attribute"));
                    }
                    self.skip_ws();
                    if self.bump() != Some(b'"') {
                        return Err(self.err("expected '\"' opening attribute value"));
                    }
                    let start = self.pos;
                    while let Some(c) = self.peek() {
                        if c == b'"' {
                            break;
                        }
                        self.bump();
                    }
                    let val = String::from_utf8_lossy(&self.text[start..self.pos]).into_owned();
                    if self.bump() != Some(b'"') {
                        return Err(self.err("unterminated attribute value"));
                    }
                    el.attrs.push((key, val));
                }
                None => return Err(self.err("unexpected end of document in tag")),
            }
        }

        // Children until the matching close tag.
        loop {
            self.skip_misc();
            if self.starts_with("</") {
                self.bump();
                self.bump();
                let close = self.name()?;
                if close != el.tag {
                    return Err(self.err(&format!("mismatched close tag </{}> for <{}>", close, el.tag)));
                }
                self.skip_ws();
                if self.bump() != Some(b'>') {
                    return Err(self.err("expected '>' in close tag"));
                }
                return Ok(el);
            }
            if self.peek().is_none() {
                return Err(self.err(&format!("unclosed element <{}>", el.tag)));
            }
            el.children.push(self.element()?);
        }
    }
}
