//! Parser for the JavaScript expression subset found in config files.
//!
//! Config files are never executed. Instead the default export is parsed into
//! a [`JsValue`] tree and the fields devgate understands are evaluated
//! statically (see [`super::config`]).
//!
//! Supported: object literals (quoted, bare, and shorthand keys, trailing
//! commas), arrays, strings without interpolation, numbers, booleans, `null`,
//! `undefined`, regex literals, identifiers and member chains, calls and
//! `new` calls, arrow functions with an expression or `{ return expr }` body,
//! and TypeScript `as` / `satisfies` suffixes.

/// A parsed JavaScript expression.
#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Regex {
        source: String,
        flags: String,
    },
    Array(Vec<JsValue>),
    /// Object entries in source order. Duplicate keys are kept.
    Object(Vec<(String, JsValue)>),
    Ident(String),
    Member {
        object: Box<JsValue>,
        property: String,
    },
    Call {
        callee: Box<JsValue>,
        args: Vec<JsValue>,
        new: bool,
    },
    Arrow {
        params: Vec<String>,
        body: Box<JsValue>,
    },
}

impl JsValue {
    /// Look up an object property. The last duplicate wins, as in JS.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsValue> {
        match self {
            Self::Object(entries) => entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// `false`, `null`, and `undefined`.
    #[must_use]
    pub fn is_falsy(&self) -> bool {
        matches!(self, Self::Bool(false) | Self::Null | Self::Undefined)
    }

    /// Dotted name of an identifier or member chain (`path.resolve`,
    /// `import.meta.url`). `None` for anything else.
    #[must_use]
    pub fn path_name(&self) -> Option<String> {
        match self {
            Self::Ident(name) => Some(name.clone()),
            Self::Member { object, property } => {
                object.path_name().map(|base| format!("{base}.{property}"))
            }
            _ => None,
        }
    }

    /// Short description used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Regex { .. } => "regular expression",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Ident(_) | Self::Member { .. } => "identifier",
            Self::Call { .. } => "call expression",
            Self::Arrow { .. } => "function",
        }
    }
}

/// Parse one expression from the start of `input`.
///
/// Returns the value and the number of characters consumed. Trailing input
/// is left for the caller.
pub fn parse_expression(input: &str) -> Result<(JsValue, usize), String> {
    let mut parser = ExprParser::new(input);
    let value = parser.parse_expression()?;
    Ok((value, parser.pos))
}

/// Strip single-line (//) and multi-line (/* */) comments from JS source.
///
/// String and regex literal contents are preserved. Newlines inside block
/// comments are kept so line structure survives.
#[must_use]
pub fn strip_comments(source: &str) -> String {
    let mut result = String::with_capacity(source.len());
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut i = 0;
    let mut in_string: Option<char> = None;
    // Last significant character emitted, for regex-vs-division detection.
    let mut last_significant = '\0';

    while i < len {
        let ch = chars[i];
        if let Some(quote) = in_string {
            result.push(ch);
            if ch == '\\' && i + 1 < len {
                result.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if ch == quote {
                in_string = None;
            }
            i += 1;
        } else if ch == '/' && i + 1 < len && chars[i + 1] == '/' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
        } else if ch == '/' && i + 1 < len && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                if chars[i] == '\n' {
                    result.push('\n');
                }
                i += 1;
            }
            i += 2;
        } else if ch == '/' && regex_can_start(last_significant) {
            // Copy the regex literal verbatim so `//` inside it is not a comment.
            let mut in_class = false;
            result.push(ch);
            i += 1;
            while i < len {
                let c = chars[i];
                result.push(c);
                i += 1;
                match c {
                    '\\' if i < len => {
                        result.push(chars[i]);
                        i += 1;
                    }
                    '[' => in_class = true,
                    ']' => in_class = false,
                    '/' if !in_class => break,
                    '\n' => break,
                    _ => {}
                }
            }
            last_significant = '/';
        } else {
            if matches!(ch, '"' | '\'' | '`') {
                in_string = Some(ch);
            }
            if !ch.is_whitespace() {
                last_significant = ch;
            }
            result.push(ch);
            i += 1;
        }
    }

    result
}

/// Whether a `/` following `prev` starts a regex literal rather than a division.
fn regex_can_start(prev: char) -> bool {
    matches!(
        prev,
        '\0' | '(' | ',' | '=' | ':' | '[' | '!' | '&' | '|' | '?' | '{' | '}' | ';' | '>'
    )
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

struct ExprParser {
    chars: Vec<char>,
    pos: usize,
}

impl ExprParser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        let mut idx = self.pos;
        for expected in s.chars() {
            if self.chars.get(idx) != Some(&expected) {
                return false;
            }
            idx += 1;
        }
        true
    }

    /// Whether the keyword `word` is at the cursor and is not a prefix of a longer identifier.
    fn at_keyword(&self, word: &str) -> bool {
        self.starts_with(word)
            && !self
                .chars
                .get(self.pos + word.chars().count())
                .is_some_and(|c| is_ident_char(*c))
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        self.skip_whitespace();
        match self.advance() {
            Some(ch) if ch == expected => Ok(()),
            Some(ch) => Err(format!(
                "Expected '{}' at position {}, got '{}'",
                expected,
                self.pos - 1,
                ch
            )),
            None => Err(format!("Expected '{expected}', got end of input")),
        }
    }

    fn parse_expression(&mut self) -> Result<JsValue, String> {
        self.skip_whitespace();
        if self.arrow_ahead() {
            return self.parse_arrow();
        }

        let mut value = self.parse_primary()?;
        value = self.parse_postfix(value, true)?;
        self.skip_type_suffix();
        Ok(value)
    }

    /// Member accesses and calls following a primary expression.
    fn parse_postfix(&mut self, mut value: JsValue, allow_calls: bool) -> Result<JsValue, String> {
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('.') if self.peek_at(1) != Some('.') => {
                    self.advance();
                    let property = self.parse_identifier()?;
                    value = JsValue::Member {
                        object: Box::new(value),
                        property,
                    };
                }
                Some('?') if self.peek_at(1) == Some('.') => {
                    self.pos += 2;
                    let property = self.parse_identifier()?;
                    value = JsValue::Member {
                        object: Box::new(value),
                        property,
                    };
                }
                // TypeScript non-null assertion
                Some('!') if self.peek_at(1) != Some('=') => {
                    self.advance();
                }
                Some('(') if allow_calls => {
                    let args = self.parse_arguments()?;
                    value = JsValue::Call {
                        callee: Box::new(value),
                        args,
                        new: false,
                    };
                }
                _ => return Ok(value),
            }
        }
    }

    /// Skip `as Type` / `satisfies Type` suffixes.
    fn skip_type_suffix(&mut self) {
        loop {
            self.skip_whitespace();
            let keyword_len = if self.at_keyword("as") {
                2
            } else if self.at_keyword("satisfies") {
                9
            } else {
                return;
            };
            self.pos += keyword_len;
            self.skip_type();
        }
    }

    /// Skip a type annotation up to the next delimiter at depth zero.
    fn skip_type(&mut self) {
        let mut depth = 0usize;
        while let Some(ch) = self.peek() {
            match ch {
                '<' | '(' | '[' | '{' => depth += 1,
                '>' | ')' | ']' | '}' if depth > 0 => depth -= 1,
                ',' | ')' | ']' | '}' | ';' | '=' if depth == 0 => return,
                _ => {}
            }
            self.advance();
        }
    }

    fn parse_primary(&mut self) -> Result<JsValue, String> {
        self.skip_whitespace();
        match self.peek() {
            Some('{') => self.parse_object(),
            Some('[') => self.parse_array(),
            Some('"' | '\'' | '`') => self.parse_string().map(JsValue::String),
            Some('/') => self.parse_regex(),
            Some('(') => {
                self.advance();
                let value = self.parse_expression()?;
                self.expect(')')?;
                Ok(value)
            }
            Some('-') if self.peek_at(1).is_some_and(|c| c.is_ascii_digit() || c == '.') => {
                self.parse_number()
            }
            Some('.') if self.peek_at(1) == Some('.') => {
                Err(format!("Spread syntax is not supported (position {})", self.pos))
            }
            Some(ch) if ch.is_ascii_digit() || ch == '.' => self.parse_number(),
            Some(ch) if is_ident_start(ch) => self.parse_word(),
            Some(ch) => Err(format!(
                "Unexpected character '{}' at position {}",
                ch, self.pos
            )),
            None => Err("Unexpected end of input".to_string()),
        }
    }

    fn parse_word(&mut self) -> Result<JsValue, String> {
        let start = self.pos;
        let word = self.parse_identifier()?;
        match word.as_str() {
            "true" => Ok(JsValue::Bool(true)),
            "false" => Ok(JsValue::Bool(false)),
            "null" => Ok(JsValue::Null),
            "undefined" => Ok(JsValue::Undefined),
            "new" => {
                let callee = self.parse_primary()?;
                let callee = self.parse_postfix(callee, false)?;
                self.skip_whitespace();
                let args = if self.peek() == Some('(') {
                    self.parse_arguments()?
                } else {
                    Vec::new()
                };
                Ok(JsValue::Call {
                    callee: Box::new(callee),
                    args,
                    new: true,
                })
            }
            "function" => Err(format!(
                "Function expressions are not supported (position {start}); use an arrow function"
            )),
            _ => Ok(JsValue::Ident(word)),
        }
    }

    fn parse_identifier(&mut self) -> Result<String, String> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if is_ident_start(ch) => {}
            other => return Err(format!("Expected identifier, got {other:?}")),
        }
        let mut name = String::new();
        while let Some(ch) = self.peek() {
            if is_ident_char(ch) {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn parse_arguments(&mut self) -> Result<Vec<JsValue>, String> {
        self.expect('(')?;
        let mut args = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(')') => {
                    self.advance();
                    return Ok(args);
                }
                None => return Err("Unterminated argument list".to_string()),
                _ => {}
            }

            args.push(self.parse_expression()?);

            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                }
                Some(')') => {}
                None => return Err("Unterminated argument list".to_string()),
                Some(ch) => {
                    return Err(format!(
                        "Expected ',' or ')' in argument list, got '{}' at position {}",
                        ch, self.pos
                    ))
                }
            }
        }
    }

    /// Look ahead for `ident =>` or `( ... ) =>` without consuming input.
    fn arrow_ahead(&self) -> bool {
        let mut idx = self.pos;
        if self.at_keyword("async") {
            idx += 5;
            while self.chars.get(idx).is_some_and(|c| c.is_whitespace()) {
                idx += 1;
            }
        }

        match self.chars.get(idx) {
            Some('(') => {
                let mut depth = 0usize;
                while let Some(&ch) = self.chars.get(idx) {
                    match ch {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                idx += 1;
                                break;
                            }
                        }
                        _ => {}
                    }
                    idx += 1;
                }
                if depth != 0 {
                    return false;
                }
            }
            Some(&ch) if is_ident_start(ch) => {
                while self.chars.get(idx).is_some_and(|c| is_ident_char(*c)) {
                    idx += 1;
                }
            }
            _ => return false,
        }

        // Optional return type annotation: `(p: string): string =>`
        while self.chars.get(idx).is_some_and(|c| c.is_whitespace()) {
            idx += 1;
        }
        if self.chars.get(idx) == Some(&':') {
            while let Some(&ch) = self.chars.get(idx) {
                if ch == '=' && self.chars.get(idx + 1) == Some(&'>') {
                    break;
                }
                if matches!(ch, ',' | '}' | ';') {
                    return false;
                }
                idx += 1;
            }
        }

        self.chars.get(idx) == Some(&'=') && self.chars.get(idx + 1) == Some(&'>')
    }

    fn parse_arrow(&mut self) -> Result<JsValue, String> {
        if self.at_keyword("async") {
            self.pos += 5;
            self.skip_whitespace();
        }

        let params = if self.peek() == Some('(') {
            self.advance();
            let mut params = Vec::new();
            let mut current = String::new();
            let mut depth = 0usize;
            loop {
                match self.advance() {
                    Some(')') if depth == 0 => break,
                    Some(',') if depth == 0 => {
                        params.push(std::mem::take(&mut current));
                    }
                    Some(ch) => {
                        match ch {
                            '(' | '{' | '[' | '<' => depth += 1,
                            ')' | '}' | ']' | '>' => depth = depth.saturating_sub(1),
                            _ => {}
                        }
                        current.push(ch);
                    }
                    None => return Err("Unterminated parameter list".to_string()),
                }
            }
            params.push(current);
            params
                .into_iter()
                .map(|p| param_name(&p))
                .filter(|p| !p.is_empty())
                .collect()
        } else {
            vec![self.parse_identifier()?]
        };

        // Return type annotation
        self.skip_whitespace();
        while !self.starts_with("=>") {
            if self.advance().is_none() {
                return Err("Expected '=>' in arrow function".to_string());
            }
        }
        self.pos += 2;
        self.skip_whitespace();

        let body = if self.peek() == Some('{') {
            self.advance();
            self.skip_whitespace();
            if !self.at_keyword("return") {
                return Err(format!(
                    "Only `{{ return <expr> }}` function bodies are supported (position {})",
                    self.pos
                ));
            }
            self.pos += 6;
            let value = self.parse_expression()?;
            self.skip_whitespace();
            if self.peek() == Some(';') {
                self.advance();
            }
            self.expect('}')?;
            value
        } else {
            self.parse_expression()?
        };

        Ok(JsValue::Arrow {
            params,
            body: Box::new(body),
        })
    }

    fn parse_object(&mut self) -> Result<JsValue, String> {
        self.advance(); // skip '{'
        let mut entries = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('}') => {
                    self.advance();
                    return Ok(JsValue::Object(entries));
                }
                None => return Err("Unterminated object".to_string()),
                Some('.') if self.starts_with("...") => {
                    return Err(format!(
                        "Spread syntax is not supported (position {})",
                        self.pos
                    ));
                }
                _ => {}
            }

            let (key, bare) = self.parse_key()?;
            self.skip_whitespace();

            let value = match self.peek() {
                Some(':') => {
                    self.advance();
                    self.parse_expression()?
                }
                // Shorthand property: `{ vue }`
                Some(',' | '}') if bare => JsValue::Ident(key.clone()),
                Some('(') => {
                    return Err(format!(
                        "Method definitions are not supported (key '{key}'); use an arrow function"
                    ))
                }
                other => return Err(format!("Expected ':' after key '{key}', got {other:?}")),
            };
            entries.push((key, value));

            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                }
                Some('}') => {}
                None => return Err("Unterminated object".to_string()),
                Some(ch) => {
                    return Err(format!(
                        "Expected ',' or '}}' in object, got '{}' at position {}",
                        ch, self.pos
                    ))
                }
            }
        }
    }

    /// Parse an object key. The flag is true for bare identifiers.
    fn parse_key(&mut self) -> Result<(String, bool), String> {
        self.skip_whitespace();
        match self.peek() {
            Some('"' | '\'') => Ok((self.parse_string()?, false)),
            Some(ch) if ch.is_ascii_digit() => {
                let mut key = String::new();
                while let Some(ch) = self.peek() {
                    if ch.is_ascii_digit() || ch == '.' {
                        key.push(ch);
                        self.advance();
                    } else {
                        break;
                    }
                }
                Ok((key, false))
            }
            Some(ch) if is_ident_start(ch) => Ok((self.parse_identifier()?, true)),
            Some('[') => Err(format!(
                "Computed keys are not supported (position {})",
                self.pos
            )),
            other => Err(format!("Expected object key, got {other:?}")),
        }
    }

    fn parse_array(&mut self) -> Result<JsValue, String> {
        self.advance(); // skip '['
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(']') => {
                    self.advance();
                    return Ok(JsValue::Array(items));
                }
                None => return Err("Unterminated array".to_string()),
                _ => {}
            }

            items.push(self.parse_expression()?);

            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                }
                Some(']') => {}
                None => return Err("Unterminated array".to_string()),
                Some(ch) => {
                    return Err(format!(
                        "Expected ',' or ']' in array, got '{}' at position {}",
                        ch, self.pos
                    ))
                }
            }
        }
    }

    fn parse_string(&mut self) -> Result<String, String> {
        let start = self.pos;
        let Some(quote) = self.advance() else {
            return Err("Expected string".to_string());
        };
        let mut s = String::new();

        loop {
            match self.advance() {
                Some(ch) if ch == quote => return Ok(s),
                Some('$') if quote == '`' && self.peek() == Some('{') => {
                    return Err(format!(
                        "Template literal interpolation is not supported (position {start})"
                    ));
                }
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('0') => s.push('\0'),
                    Some('u') => s.push(self.parse_unicode_escape()?),
                    Some('\n') => {}
                    Some(ch) => s.push(ch),
                    None => return Err("Unterminated string escape".to_string()),
                },
                Some(ch) => s.push(ch),
                None => return Err(format!("Unterminated string starting at position {start}")),
            }
        }
    }

    fn parse_unicode_escape(&mut self) -> Result<char, String> {
        let braced = self.peek() == Some('{');
        if braced {
            self.advance();
        }
        let mut hex = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_hexdigit() && (braced || hex.len() < 4) {
                hex.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        if braced {
            self.expect('}')?;
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| format!("Invalid unicode escape '\\u{hex}'"))
    }

    fn parse_regex(&mut self) -> Result<JsValue, String> {
        let start = self.pos;
        self.advance(); // skip '/'
        let mut source = String::new();
        let mut in_class = false;

        loop {
            match self.advance() {
                Some('\\') => {
                    source.push('\\');
                    match self.advance() {
                        Some(ch) => source.push(ch),
                        None => break,
                    }
                }
                Some('/') if !in_class => {
                    let mut flags = String::new();
                    while let Some(ch) = self.peek() {
                        if ch.is_ascii_alphabetic() {
                            flags.push(ch);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    return Ok(JsValue::Regex { source, flags });
                }
                Some('\n') | None => break,
                Some(ch) => {
                    match ch {
                        '[' => in_class = true,
                        ']' => in_class = false,
                        _ => {}
                    }
                    source.push(ch);
                }
            }
        }

        Err(format!("Unterminated regular expression at position {start}"))
    }

    fn parse_number(&mut self) -> Result<JsValue, String> {
        let mut num_str = String::new();

        if self.peek() == Some('-') {
            num_str.push('-');
            self.advance();
        }

        while let Some(ch) = self.peek() {
            let exponent_sign = matches!(ch, '+' | '-') && num_str.ends_with(|c| c == 'e' || c == 'E');
            if ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E') || exponent_sign {
                num_str.push(ch);
                self.advance();
            } else if ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        num_str
            .parse::<f64>()
            .map(JsValue::Number)
            .map_err(|e| format!("Invalid number '{num_str}': {e}"))
    }
}

/// Parameter name from a raw parameter: strips type annotations and defaults.
fn param_name(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with('{') || raw.starts_with('[') {
        return raw.to_string();
    }
    raw.split(|c| matches!(c, ':' | '=' | '?'))
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}
