//! Tokenizer for the binding language.

use crate::error::{ExprError, ExprResult};

/// A raw piece of a template literal, before its expressions are parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTemplatePart {
    Str(String),
    /// Source text between `${` and the matching `}` plus its offset.
    Expr(String, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(String),
    Template(Vec<RawTemplatePart>),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Punctuators, longest first so that greedy matching picks `===` over `==`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "...", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "+=", "-=", "++",
    "--", "+", "-", "*", "/", "%", "<", ">", "!", "=", "?", ":", ".", ",", ";", "(", ")", "[",
    "]", "{", "}",
];

/// Split source text into tokens. The last token is always [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> ExprResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        // Comments
        if c == '/' && chars.get(pos + 1) == Some(&'/') {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
            }
            continue;
        }
        if c == '/' && chars.get(pos + 1) == Some(&'*') {
            pos += 2;
            while pos < chars.len() && !(chars[pos] == '*' && chars.get(pos + 1) == Some(&'/')) {
                pos += 1;
            }
            pos += 2;
            continue;
        }

        let start = pos;

        if c.is_ascii_digit() || (c == '.' && chars.get(pos + 1).is_some_and(|n| n.is_ascii_digit()))
        {
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                pos += 1;
            }
            if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
                pos += 1;
                if pos < chars.len() && (chars[pos] == '+' || chars[pos] == '-') {
                    pos += 1;
                }
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
            }
            let text: String = chars[start..pos].iter().collect();
            let number = text.parse::<f64>().map_err(|_| ExprError::Parse {
                offset: start,
                message: format!("invalid number literal '{text}'"),
            })?;
            tokens.push(Token {
                kind: TokenKind::Number(number),
                offset: start,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            while pos < chars.len()
                && (chars[pos].is_alphanumeric() || chars[pos] == '_' || chars[pos] == '$')
            {
                pos += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(chars[start..pos].iter().collect()),
                offset: start,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            let (text, next) = read_string(&chars, pos, c)?;
            tokens.push(Token {
                kind: TokenKind::String(text),
                offset: start,
            });
            pos = next;
            continue;
        }

        if c == '`' {
            let (parts, next) = read_template(&chars, pos)?;
            tokens.push(Token {
                kind: TokenKind::Template(parts),
                offset: start,
            });
            pos = next;
            continue;
        }

        let punct = PUNCTUATORS.iter().find(|p| {
            let len = p.chars().count();
            pos + len <= chars.len() && p.chars().eq(chars[pos..pos + len].iter().copied())
        });

        match punct {
            // `a?.5:1` is a conditional followed by a number, not optional chaining
            Some(&"?.") if chars.get(pos + 2).is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(Token {
                    kind: TokenKind::Punct("?"),
                    offset: start,
                });
                pos += 1;
            }
            Some(p) => {
                tokens.push(Token {
                    kind: TokenKind::Punct(*p),
                    offset: start,
                });
                pos += p.chars().count();
            }
            None => return Err(ExprError::UnexpectedChar { ch: c, offset: pos }),
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: chars.len(),
    });
    Ok(tokens)
}

fn read_escape(chars: &[char], pos: usize) -> (char, usize) {
    match chars.get(pos) {
        Some('n') => ('\n', pos + 1),
        Some('t') => ('\t', pos + 1),
        Some('r') => ('\r', pos + 1),
        Some('0') => ('\0', pos + 1),
        Some('u') => {
            let hex: String = chars.iter().skip(pos + 1).take(4).collect();
            match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                Some(ch) if hex.len() == 4 => (ch, pos + 5),
                _ => ('u', pos + 1),
            }
        }
        Some(other) => (*other, pos + 1),
        None => ('\\', pos),
    }
}

fn read_string(chars: &[char], start: usize, quote: char) -> ExprResult<(String, usize)> {
    let mut pos = start + 1;
    let mut text = String::new();
    while pos < chars.len() {
        match chars[pos] {
            c if c == quote => return Ok((text, pos + 1)),
            '\\' => {
                let (ch, next) = read_escape(chars, pos + 1);
                text.push(ch);
                pos = next;
            }
            c => {
                text.push(c);
                pos += 1;
            }
        }
    }
    Err(ExprError::UnterminatedString(start))
}

fn read_template(chars: &[char], start: usize) -> ExprResult<(Vec<RawTemplatePart>, usize)> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut pos = start + 1;

    while pos < chars.len() {
        match chars[pos] {
            '`' => {
                if !current.is_empty() {
                    parts.push(RawTemplatePart::Str(current));
                }
                return Ok((parts, pos + 1));
            }
            '\\' => {
                let (ch, next) = read_escape(chars, pos + 1);
                current.push(ch);
                pos = next;
            }
            '$' if chars.get(pos + 1) == Some(&'{') => {
                if !current.is_empty() {
                    parts.push(RawTemplatePart::Str(std::mem::take(&mut current)));
                }
                let expr_start = pos + 2;
                let mut depth = 1;
                let mut end = expr_start;
                while end < chars.len() {
                    match chars[end] {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(ExprError::UnterminatedString(start));
                }
                parts.push(RawTemplatePart::Expr(
                    chars[expr_start..end].iter().collect(),
                    expr_start,
                ));
                pos = end + 1;
            }
            c => {
                current.push(c);
                pos += 1;
            }
        }
    }

    Err(ExprError::UnterminatedString(start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_member_chain() {
        assert_eq!(
            kinds("state.a.b"),
            vec![
                TokenKind::Ident("state".into()),
                TokenKind::Punct("."),
                TokenKind::Ident("a".into()),
                TokenKind::Punct("."),
                TokenKind::Ident("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn prefers_longest_punctuator() {
        assert_eq!(
            kinds("a !== b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct("!=="),
                TokenKind::Ident("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn splits_template_literals() {
        let tokens = kinds("`Hi ${state.name}!`");
        assert_eq!(
            tokens[0],
            TokenKind::Template(vec![
                RawTemplatePart::Str("Hi ".into()),
                RawTemplatePart::Expr("state.name".into(), 6),
                RawTemplatePart::Str("!".into()),
            ])
        );
    }

    #[test]
    fn conditional_before_decimal_is_not_optional_chain() {
        assert_eq!(kinds("a?.5:1")[1], TokenKind::Punct("?"));
    }

    #[test]
    fn skips_comments_and_decodes_escapes() {
        assert_eq!(
            kinds("// note\n'a\\'b' /* x */"),
            vec![TokenKind::String("a'b".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn rejects_unterminated_string() {
        assert_eq!(tokenize("'abc"), Err(ExprError::UnterminatedString(0)));
    }
}
