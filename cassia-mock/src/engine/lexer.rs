use uuid::Uuid;

use super::{syntax_error, EngineResult};

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    /// Unquoted identifier or keyword, lower-cased.
    Ident(String),
    /// Double-quoted identifier, case preserved.
    QuotedIdent(String),
    Str(String),
    Number(String),
    Uuid(Uuid),
    Blob(Vec<u8>),
    /// `?`
    Marker,
    /// `:name`
    NamedMarker(String),
    Symbol(&'static str),
}

const SYMBOLS: &[&str] = &[
    "<=", ">=", "!=", "(", ")", ",", ";", ".", "*", "=", "<", ">", "{", "}", "[", "]", ":", "+",
    "-",
];

pub(super) fn tokenize(text: &str) -> EngineResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let rest = &chars[i..];

        if c.is_whitespace() {
            i += 1;
        } else if starts_with(rest, "--") || starts_with(rest, "//") {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if let Some(uuid) = uuid_at(rest) {
            tokens.push(Token::Uuid(uuid));
            i += 36;
        } else if starts_with(rest, "0x") || starts_with(rest, "0X") {
            let len = rest[2..].iter().take_while(|c| c.is_ascii_hexdigit()).count();
            let hex: String = rest[2..2 + len].iter().collect();
            tokens.push(Token::Blob(decode_hex(&hex)?));
            i += 2 + len;
        } else if c.is_ascii_digit() {
            let len = number_len(rest);
            tokens.push(Token::Number(rest[..len].iter().collect()));
            i += len;
        } else if c.is_alphabetic() || c == '_' {
            let len = rest
                .iter()
                .take_while(|c| c.is_alphanumeric() || **c == '_')
                .count();
            let ident: String = rest[..len].iter().collect();
            tokens.push(Token::Ident(ident.to_lowercase()));
            i += len;
        } else if c == '\'' || c == '"' {
            let (content, len) = quoted(rest, c)?;
            tokens.push(if c == '\'' {
                Token::Str(content)
            } else {
                Token::QuotedIdent(content)
            });
            i += len;
        } else if c == '?' {
            tokens.push(Token::Marker);
            i += 1;
        } else if c == ':' && rest.get(1).is_some_and(|c| c.is_alphabetic() || *c == '_') {
            let len = rest[1..]
                .iter()
                .take_while(|c| c.is_alphanumeric() || **c == '_')
                .count();
            let name: String = rest[1..1 + len].iter().collect();
            tokens.push(Token::NamedMarker(name.to_lowercase()));
            i += 1 + len;
        } else if c == ':' && rest.get(1) == Some(&'"') {
            let (name, len) = quoted(&rest[1..], '"')?;
            tokens.push(Token::NamedMarker(name));
            i += 1 + len;
        } else if let Some(symbol) = SYMBOLS.iter().copied().find(|s| starts_with(rest, s)) {
            tokens.push(Token::Symbol(symbol));
            i += symbol.len();
        } else {
            return Err(syntax_error(format!("line 1:{} no viable alternative at character '{}'", i, c)));
        }
    }

    Ok(tokens)
}

fn starts_with(chars: &[char], prefix: &str) -> bool {
    prefix.chars().enumerate().all(|(i, p)| chars.get(i) == Some(&p))
}

fn number_len(chars: &[char]) -> usize {
    let mut len = chars.iter().take_while(|c| c.is_ascii_digit()).count();
    if chars.get(len) == Some(&'.') && chars.get(len + 1).is_some_and(|c| c.is_ascii_digit()) {
        len += 1;
        len += chars[len..].iter().take_while(|c| c.is_ascii_digit()).count();
    }
    if matches!(chars.get(len), Some('e' | 'E')) {
        let sign = usize::from(matches!(chars.get(len + 1), Some('+' | '-')));
        if chars.get(len + 1 + sign).is_some_and(|c| c.is_ascii_digit()) {
            len += 1 + sign;
            len += chars[len..].iter().take_while(|c| c.is_ascii_digit()).count();
        }
    }
    len
}

/// Reads a quoted string or identifier; the quote character is escaped by doubling it.
/// Returns the content and the number of characters consumed.
fn quoted(chars: &[char], quote: char) -> EngineResult<(String, usize)> {
    let mut content = String::new();
    let mut i = 1;
    loop {
        match chars.get(i) {
            Some(c) if *c == quote => {
                if chars.get(i + 1) == Some(&quote) {
                    content.push(quote);
                    i += 2;
                } else {
                    return Ok((content, i + 1));
                }
            }
            Some(c) => {
                content.push(*c);
                i += 1;
            }
            None => return Err(syntax_error("unterminated quoted literal")),
        }
    }
}

fn uuid_at(chars: &[char]) -> Option<Uuid> {
    const DASHES: [usize; 4] = [8, 13, 18, 23];
    if chars.len() < 36 {
        return None;
    }
    let candidate = &chars[..36];
    let well_formed = candidate.iter().enumerate().all(|(i, c)| {
        if DASHES.contains(&i) {
            *c == '-'
        } else {
            c.is_ascii_hexdigit()
        }
    });
    let terminated = chars
        .get(36)
        .map_or(true, |c| !(c.is_alphanumeric() || *c == '_'));
    if !(well_formed && terminated) {
        return None;
    }
    Uuid::parse_str(&candidate.iter().collect::<String>()).ok()
}

fn decode_hex(hex: &str) -> EngineResult<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(syntax_error(format!("odd-length blob literal 0x{}", hex)));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| syntax_error(format!("bad blob literal 0x{}", hex)))
        })
        .collect()
}
