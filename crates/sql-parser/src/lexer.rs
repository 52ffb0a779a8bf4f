use crate::ParseError;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Long(i64),
    Double(f64),
    Str(String),
    Comma,
    LParen,
    RParen,
    Eq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    Plus,
    Minus,
    Star,
    Semi,
}

/// A token plus its byte offset into the raw input, so parse errors can
/// report the unconsumed tail.
#[derive(Clone, Debug)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn err(input: &str, offset: usize, message: impl Into<String>) -> ParseError {
    ParseError {
        message: message.into(),
        tail: input[offset..].to_owned(),
    }
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>, ParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let c = bytes[i];
        let token = match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                Token::Ident(input[start..i].to_owned())
            }
            b'0'..=b'9' => {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                    let raw = &input[start..i];
                    Token::Double(raw.parse().map_err(|_| {
                        err(input, start, format!("malformed float literal `{raw}`"))
                    })?)
                } else {
                    let raw = &input[start..i];
                    Token::Long(raw.parse().map_err(|_| {
                        err(input, start, format!("integer literal `{raw}` out of range"))
                    })?)
                }
            }
            b'\'' | b'"' => {
                i += 1;
                let body = i;
                while i < bytes.len() && bytes[i] != c {
                    i += 1;
                }
                if i == bytes.len() {
                    return Err(err(input, start, "unterminated string literal"));
                }
                let token = Token::Str(input[body..i].to_owned());
                i += 1;
                token
            }
            b',' => {
                i += 1;
                Token::Comma
            }
            b'(' => {
                i += 1;
                Token::LParen
            }
            b')' => {
                i += 1;
                Token::RParen
            }
            b'=' => {
                i += 1;
                Token::Eq
            }
            b'*' => {
                i += 1;
                Token::Star
            }
            b';' => {
                i += 1;
                Token::Semi
            }
            b'+' => {
                i += 1;
                Token::Plus
            }
            b'-' => {
                i += 1;
                Token::Minus
            }
            b'>' => {
                i += 1;
                if i < bytes.len() && bytes[i] == b'=' {
                    i += 1;
                    Token::GtEq
                } else {
                    Token::Gt
                }
            }
            b'<' => {
                i += 1;
                if i < bytes.len() && bytes[i] == b'=' {
                    i += 1;
                    Token::LtEq
                } else {
                    Token::Lt
                }
            }
            _ => {
                let c = input[start..].chars().next().unwrap();
                return Err(err(input, start, format!("unexpected character `{c}`")));
            }
        };
        tokens.push(Spanned {
            token,
            offset: start,
        });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn scans_operators_and_literals() {
        assert_eq!(
            kinds("ts >= 10, value = 1.5"),
            vec![
                Token::Ident("ts".into()),
                Token::GtEq,
                Token::Long(10),
                Token::Comma,
                Token::Ident("value".into()),
                Token::Eq,
                Token::Double(1.5),
            ]
        );
    }

    #[test]
    fn splits_now_deltas() {
        assert_eq!(
            kinds("NOW-1h"),
            vec![
                Token::Ident("NOW".into()),
                Token::Minus,
                Token::Long(1),
                Token::Ident("h".into()),
            ]
        );
    }

    #[test]
    fn quoted_strings_keep_spaces() {
        assert_eq!(kinds("'john doe'"), vec![Token::Str("john doe".into())]);
        assert_eq!(kinds("\"x\""), vec![Token::Str("x".into())]);
    }

    #[test]
    fn reports_offsets() {
        let error = tokenize("name = ?").unwrap_err();
        assert_eq!(error.tail, "?");
        let error = tokenize("x = 'oops").unwrap_err();
        assert_eq!(error.tail, "'oops");
    }
}
