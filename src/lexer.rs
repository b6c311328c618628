use crate::error::{Error, Result};
use crate::preprocess::{preprocess, PreprocessOptions};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Text,

    NumericLiteral,
    BooleanLiteral,
    NullLiteral,
    StringLiteral,
    Identifier,

    Equals,       // =
    OpenParen,    // (
    CloseParen,   // )
    OpenStatement,  // {%
    CloseStatement, // %}
    OpenExpression,  // {{
    CloseExpression, // }}
    OpenSquareBracket,  // [
    CloseSquareBracket, // ]
    OpenCurlyBracket,   // {
    CloseCurlyBracket,  // }
    Comma, // ,
    Dot,   // .
    Colon, // :
    Pipe,  // |

    AdditiveBinaryOperator,
    MultiplicativeBinaryOperator,
    ComparisonBinaryOperator,
    UnaryOperator,

    // Keywords
    Set,
    If,
    For,
    In,
    Is,
    NotIn,
    Else,
    EndIf,
    ElseIf,
    EndFor,
    And,
    Or,
    Not,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub kind: TokenKind,
}

impl Token {
    pub fn new(value: impl Into<String>, kind: TokenKind) -> Self {
        Self {
            value: value.into(),
            kind,
        }
    }
}

// Order matters: two-character tokens must be tried before their one-character prefixes.
const PUNCTUATION: &[(&str, TokenKind)] = &[
    ("{%", TokenKind::OpenStatement),
    ("%}", TokenKind::CloseStatement),
    ("{{", TokenKind::OpenExpression),
    ("}}", TokenKind::CloseExpression),
    ("(", TokenKind::OpenParen),
    (")", TokenKind::CloseParen),
    ("{", TokenKind::OpenCurlyBracket),
    ("}", TokenKind::CloseCurlyBracket),
    ("[", TokenKind::OpenSquareBracket),
    ("]", TokenKind::CloseSquareBracket),
    (",", TokenKind::Comma),
    (".", TokenKind::Dot),
    (":", TokenKind::Colon),
    ("|", TokenKind::Pipe),
    ("<=", TokenKind::ComparisonBinaryOperator),
    (">=", TokenKind::ComparisonBinaryOperator),
    ("==", TokenKind::ComparisonBinaryOperator),
    ("!=", TokenKind::ComparisonBinaryOperator),
    ("<", TokenKind::ComparisonBinaryOperator),
    (">", TokenKind::ComparisonBinaryOperator),
    ("+", TokenKind::AdditiveBinaryOperator),
    ("-", TokenKind::AdditiveBinaryOperator),
    ("*", TokenKind::MultiplicativeBinaryOperator),
    ("/", TokenKind::MultiplicativeBinaryOperator),
    ("%", TokenKind::MultiplicativeBinaryOperator),
    ("=", TokenKind::Equals),
];

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "set" => TokenKind::Set,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "is" => TokenKind::Is,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "endif" => TokenKind::EndIf,
        "elif" => TokenKind::ElseIf,
        "endfor" => TokenKind::EndFor,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "true" | "false" => TokenKind::BooleanLiteral,
        "none" => TokenKind::NullLiteral,
        _ => return None,
    })
}

fn unescape(c: char) -> Option<char> {
    Some(match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        'b' => '\u{0008}',
        'f' => '\u{000C}',
        'v' => '\u{000B}',
        '\'' => '\'',
        '"' => '"',
        '\\' => '\\',
        _ => return None,
    })
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Preprocess `source` and split it into tokens.
pub fn tokenize(source: &str, options: PreprocessOptions) -> Result<Vec<Token>> {
    let src = preprocess(source, options);
    Tokenizer::new(&src).run()
}

struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
    tokens: Vec<Token>,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            cursor: 0,
            tokens: Vec::new(),
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn advance(&mut self, n: usize) {
        self.cursor += n;
    }

    fn last_kind(&self) -> Option<TokenKind> {
        self.tokens.last().map(|t| t.kind)
    }

    fn push(&mut self, value: impl Into<String>, kind: TokenKind) {
        self.tokens.push(Token::new(value, kind));
    }

    fn consume_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let rest = self.remaining();
        let len = rest.find(|c: char| !pred(c)).unwrap_or(rest.len());
        self.advance(len);
        &rest[..len]
    }

    fn run(mut self) -> Result<Vec<Token>> {
        while self.cursor < self.input.len() {
            if matches!(
                self.last_kind(),
                None | Some(TokenKind::CloseStatement) | Some(TokenKind::CloseExpression)
            ) {
                let rest = self.remaining();
                let end = rest
                    .find("{%")
                    .into_iter()
                    .chain(rest.find("{{"))
                    .min()
                    .unwrap_or(rest.len());
                if end > 0 {
                    self.push(&rest[..end], TokenKind::Text);
                    self.advance(end);
                    continue;
                }
            }

            self.consume_while(char::is_whitespace);
            let Some(c) = self.remaining().chars().next() else {
                // Unclosed tag; the parser reports the missing delimiter.
                break;
            };

            if (c == '-' || c == '+') && self.lex_sign(c)? {
                continue;
            }
            if self.lex_punctuation() {
                continue;
            }
            if c == '\'' || c == '"' {
                self.lex_string(c)?;
                continue;
            }
            if c.is_ascii_digit() {
                self.lex_number();
                continue;
            }
            if is_word(c) {
                self.lex_word();
                continue;
            }

            return Err(Error::syntax(format!("Unexpected character: {}", c)));
        }

        Ok(self.tokens)
    }

    /// A sign directly after something that cannot end an operand is part of
    /// a literal (`-1`) or a unary operator. Returns false when it should be
    /// lexed as a binary operator instead.
    fn lex_sign(&mut self, sign: char) -> Result<bool> {
        match self.last_kind() {
            None | Some(TokenKind::Text) => {
                Err(Error::syntax(format!("Unexpected character: {}", sign)))
            }
            Some(
                TokenKind::Identifier
                | TokenKind::NumericLiteral
                | TokenKind::BooleanLiteral
                | TokenKind::NullLiteral
                | TokenKind::StringLiteral
                | TokenKind::CloseParen
                | TokenKind::CloseSquareBracket,
            ) => Ok(false),
            Some(_) => {
                self.advance(1);
                let digits = self.consume_while(|c| c.is_ascii_digit());
                if digits.is_empty() {
                    self.push(sign.to_string(), TokenKind::UnaryOperator);
                } else {
                    let fraction = self.lex_fraction();
                    self.push(format!("{}{}{}", sign, digits, fraction), TokenKind::NumericLiteral);
                }
                Ok(true)
            }
        }
    }

    fn lex_punctuation(&mut self) -> bool {
        let rest = self.remaining();
        for (text, kind) in PUNCTUATION {
            if rest.starts_with(text) {
                self.push(*text, *kind);
                self.advance(text.len());
                return true;
            }
        }
        false
    }

    fn lex_string(&mut self, quote: char) -> Result<()> {
        self.advance(1);
        let mut s = String::new();
        let mut chars = self.remaining().char_indices();
        while let Some((i, c)) = chars.next() {
            if c == quote {
                self.advance(i + 1);
                self.push(s, TokenKind::StringLiteral);
                return Ok(());
            }
            if c == '\\' {
                let Some((_, esc)) = chars.next() else {
                    break;
                };
                let unescaped = unescape(esc).ok_or_else(|| {
                    Error::syntax(format!("Unexpected escaped character: {}", esc))
                })?;
                s.push(unescaped);
            } else {
                s.push(c);
            }
        }
        Err(Error::syntax("Unexpected end of input: unterminated string literal"))
    }

    fn lex_number(&mut self) {
        let digits = self.consume_while(|c| c.is_ascii_digit());
        let fraction = self.lex_fraction();
        self.push(format!("{}{}", digits, fraction), TokenKind::NumericLiteral);
    }

    /// `.digits` following an integer, if any. A dot not followed by a digit
    /// is left alone so that it can start a member access.
    fn lex_fraction(&mut self) -> String {
        let rest = self.remaining();
        let mut chars = rest.chars();
        if chars.next() == Some('.') && chars.next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance(1);
            let digits = self.consume_while(|c| c.is_ascii_digit());
            format!(".{}", digits)
        } else {
            String::new()
        }
    }

    fn lex_word(&mut self) {
        let word = self.consume_while(is_word);
        match keyword(word) {
            Some(TokenKind::In) if self.last_kind() == Some(TokenKind::Not) => {
                self.tokens.pop();
                self.push("not in", TokenKind::NotIn);
            }
            Some(kind) => self.push(word, kind),
            None => self.push(word, TokenKind::Identifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn lex(src: &str) -> Vec<Token> {
        tokenize(src, PreprocessOptions::default()).unwrap()
    }

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn plain_text_is_one_token() {
        assert_eq!(lex("Hello world!"), vec![Token::new("Hello world!", Text)]);
    }

    #[test]
    fn text_nodes_alternate_with_expressions() {
        let tokens = lex("0{{ 'A' }}1{{ 'B' }}{{ 'C' }}2{{ 'D' }}3");
        let expected = vec![
            Token::new("0", Text),
            Token::new("{{", OpenExpression),
            Token::new("A", StringLiteral),
            Token::new("}}", CloseExpression),
            Token::new("1", Text),
            Token::new("{{", OpenExpression),
            Token::new("B", StringLiteral),
            Token::new("}}", CloseExpression),
            Token::new("{{", OpenExpression),
            Token::new("C", StringLiteral),
            Token::new("}}", CloseExpression),
            Token::new("2", Text),
            Token::new("{{", OpenExpression),
            Token::new("D", StringLiteral),
            Token::new("}}", CloseExpression),
            Token::new("3", Text),
        ];
        assert_eq!(tokens, expected);
    }

    #[test]
    fn logical_and_keywords() {
        assert_eq!(
            kinds("{{ true and false }}"),
            vec![OpenExpression, BooleanLiteral, And, BooleanLiteral, CloseExpression]
        );
    }

    #[test]
    fn not_in_is_fused() {
        let tokens = lex("{{ 'a' not in b }}");
        assert_eq!(tokens[2], Token::new("not in", NotIn));
        assert_eq!(tokens.len(), 5);
    }

    #[test]
    fn sign_after_operand_is_an_operator() {
        assert_eq!(
            kinds("{{ a - 1 }}"),
            vec![OpenExpression, Identifier, AdditiveBinaryOperator, NumericLiteral, CloseExpression]
        );
        let tokens = lex("{{ x[-1] }}");
        assert_eq!(tokens[3], Token::new("-1", NumericLiteral));
        let tokens = lex("{{ -x }}");
        assert_eq!(tokens[1], Token::new("-", UnaryOperator));
    }

    #[test]
    fn two_character_operators_win() {
        assert_eq!(
            kinds("{{ a <= b }}"),
            vec![OpenExpression, Identifier, ComparisonBinaryOperator, Identifier, CloseExpression]
        );
        assert_eq!(lex("{{ a != b }}")[2].value, "!=");
    }

    #[test]
    fn string_escapes() {
        let tokens = lex(r#"{{ 'a\nb\'c' + "\"" }}"#);
        assert_eq!(tokens[1], Token::new("a\nb'c", StringLiteral));
        assert_eq!(tokens[3], Token::new("\"", StringLiteral));
    }

    #[test]
    fn decimal_literals_keep_their_fraction() {
        assert_eq!(lex("{{ 1.5 }}")[1], Token::new("1.5", NumericLiteral));
        assert_eq!(kinds("{{ 1.x }}")[1..4], [NumericLiteral, Dot, Identifier]);
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let err = tokenize("{{ 'abc }}", PreprocessOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
    }

    #[test]
    fn unknown_escape_is_a_syntax_error() {
        let err = tokenize(r"{{ '\q' }}", PreprocessOptions::default()).unwrap_err();
        assert_eq!(err, Error::syntax("Unexpected escaped character: q"));
    }

    #[test]
    fn unexpected_character_is_a_syntax_error() {
        let err = tokenize("{{ a ; b }}", PreprocessOptions::default()).unwrap_err();
        assert_eq!(err, Error::syntax("Unexpected character: ;"));
    }
}
