use crate::error::{Error, Result};
use crate::Element;

pub(crate) struct Reader<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        // A leading byte order mark is not part of the document.
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        Self { input, pos: 0 }
    }

    pub(crate) fn document(mut self) -> Result<Element> {
        self.skip_misc()?;
        if self.at_end() {
            return Err(Error::NoRoot);
        }
        let root = self.element()?;
        self.skip_misc()?;
        if !self.at_end() {
            return Err(Error::TrailingContent(self.pos));
        }
        Ok(root)
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self, what: &'static str) -> Result<char> {
        let c = self.peek().ok_or(Error::UnexpectedEof(what))?;
        self.pos += c.len_utf8();
        Ok(c)
    }

    fn expect(&mut self, want: char, what: &'static str) -> Result<()> {
        let pos = self.pos;
        let c = self.bump(what)?;
        if c != want {
            return Err(Error::Unexpected {
                pos,
                found: c,
                expected: what,
            });
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    /// Consumes input up to and including `terminator`, returning what precedes it.
    fn take_until(&mut self, terminator: &str, what: &'static str) -> Result<&'a str> {
        let rest = self.rest();
        let idx = rest.find(terminator).ok_or(Error::UnexpectedEof(what))?;
        self.pos += idx + terminator.len();
        Ok(&rest[..idx])
    }

    /// Skips whitespace, comments, processing instructions and doctype declarations.
    fn skip_misc(&mut self) -> Result<()> {
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("<?") {
                self.take_until("?>", "processing instruction")?;
            } else if rest.starts_with("<!--") {
                self.take_until("-->", "comment")?;
            } else if rest.starts_with("<!DOCTYPE") || rest.starts_with("<!doctype") {
                self.take_until(">", "doctype")?;
            } else {
                return Ok(());
            }
        }
    }

    fn name(&mut self, what: &'static str) -> Result<String> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '/' | '>' | '=' | '<'))
            .unwrap_or(rest.len());
        if len == 0 {
            return match self.peek() {
                Some(found) => Err(Error::Unexpected {
                    pos: self.pos,
                    found,
                    expected: what,
                }),
                None => Err(Error::UnexpectedEof(what)),
            };
        }
        self.pos += len;
        Ok(rest[..len].to_string())
    }

    fn element(&mut self) -> Result<Element> {
        self.expect('<', "start tag")?;
        let mut elem = Element::new(self.name("element name")?);

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('/') => {
                    self.bump("empty element tag")?;
                    self.expect('>', "`>` closing an empty element tag")?;
                    return Ok(elem);
                }
                Some('>') => {
                    self.bump("start tag")?;
                    break;
                }
                Some(_) => {
                    let key = self.name("attribute name")?;
                    self.skip_whitespace();
                    self.expect('=', "`=` after attribute name")?;
                    self.skip_whitespace();
                    let pos = self.pos;
                    let quote = self.bump("attribute value")?;
                    if quote != '"' && quote != '\'' {
                        return Err(Error::Unexpected {
                            pos,
                            found: quote,
                            expected: "quoted attribute value",
                        });
                    }
                    let raw = match quote {
                        '"' => self.take_until("\"", "attribute value")?,
                        _ => self.take_until("'", "attribute value")?,
                    };
                    elem.attrs.insert(key, unescape(raw)?);
                }
                None => return Err(Error::UnexpectedEof("start tag")),
            }
        }

        let mut text = String::new();
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Err(Error::UnexpectedEof("element content"));
            } else if rest.starts_with("</") {
                self.pos += 2;
                let name = self.name("closing tag name")?;
                self.skip_whitespace();
                self.expect('>', "`>` ending a closing tag")?;
                if name != elem.name {
                    return Err(Error::MismatchedTag {
                        expected: elem.name,
                        found: name,
                    });
                }
                break;
            } else if rest.starts_with("<!--") {
                self.take_until("-->", "comment")?;
            } else if rest.starts_with("<![CDATA[") {
                self.pos += "<![CDATA[".len();
                text.push_str(self.take_until("]]>", "CDATA section")?);
            } else if rest.starts_with("<?") {
                self.take_until("?>", "processing instruction")?;
            } else if rest.starts_with('<') {
                elem.children.push(self.element()?);
            } else {
                let len = rest.find('<').unwrap_or(rest.len());
                text.push_str(&unescape(&rest[..len])?);
                self.pos += len;
            }
        }

        if !text.trim().is_empty() {
            // Formatting whitespace around child elements is not content.
            elem.text = Some(if elem.children.is_empty() {
                text
            } else {
                text.trim().to_string()
            });
        }
        Ok(elem)
    }
}

pub(crate) fn unescape(raw: &str) -> Result<String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx + 1..];
        let end = rest
            .find(';')
            .ok_or_else(|| Error::Entity(rest.chars().take(8).collect()))?;
        let entity = &rest[..end];
        let c = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32)
                    .ok_or_else(|| Error::Entity(entity.to_string()))?
            }
        };
        out.push(c);
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
