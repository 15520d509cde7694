//! The lexer.

use regex::Regex;

/// Tokens in the program.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
}

impl std::fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kind: '{}', part of input: '{}'", self.kind, self.text)
    }
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TokenKind {
    Id,
    Num,
    Str,
    KwInt,
    KwBool,
    KwString,
    KwVoid,
    KwClass,
    KwNew,
    KwNull,
    KwTrue,
    KwFalse,
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwBreak,
    KwContinue,
    KwReturn,
    KwThis,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Dot,
    Assign,
    EqEq,
    Ne,
    Le,
    Shl,
    Lt,
    Ge,
    Shr,
    Gt,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    AndAnd,
    Amp,
    OrOr,
    Pipe,
    Caret,
    Bang,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use TokenKind::*;
        let s = match self {
            Id => "id",
            Num => "num",
            Str => "str",
            KwInt => "int",
            KwBool => "bool",
            KwString => "string",
            KwVoid => "void",
            KwClass => "class",
            KwNew => "new",
            KwNull => "null",
            KwTrue => "true",
            KwFalse => "false",
            KwIf => "if",
            KwElse => "else",
            KwWhile => "while",
            KwFor => "for",
            KwBreak => "break",
            KwContinue => "continue",
            KwReturn => "return",
            KwThis => "this",
            LParen => "(",
            RParen => ")",
            LBrace => "{",
            RBrace => "}",
            LBracket => "[",
            RBracket => "]",
            Comma => ",",
            Semi => ";",
            Dot => ".",
            Assign => "=",
            EqEq => "==",
            Ne => "!=",
            Le => "<=",
            Shl => "<<",
            Lt => "<",
            Ge => ">=",
            Shr => ">>",
            Gt => ">",
            Plus => "+",
            Minus => "-",
            Star => "*",
            Slash => "/",
            Percent => "%",
            AndAnd => "&&",
            Amp => "&",
            OrOr => "||",
            Pipe => "|",
            Caret => "^",
            Bang => "!",
        };
        write!(f, "{s}")
    }
}

static KEYWORDS: &[(&str, TokenKind)] = &[
    ("int", TokenKind::KwInt),
    ("bool", TokenKind::KwBool),
    ("string", TokenKind::KwString),
    ("void", TokenKind::KwVoid),
    ("class", TokenKind::KwClass),
    ("new", TokenKind::KwNew),
    ("null", TokenKind::KwNull),
    ("true", TokenKind::KwTrue),
    ("false", TokenKind::KwFalse),
    ("if", TokenKind::KwIf),
    ("else", TokenKind::KwElse),
    ("while", TokenKind::KwWhile),
    ("for", TokenKind::KwFor),
    ("break", TokenKind::KwBreak),
    ("continue", TokenKind::KwContinue),
    ("return", TokenKind::KwReturn),
    ("this", TokenKind::KwThis),
];

/// Symbolic (non-identifier, non-literal) token patterns, longest operators
/// first so e.g. `<=` is not lexed as `<` followed by `=`.
static SYMBOLS: &[(&str, TokenKind)] = &[
    (r"\(", TokenKind::LParen),
    (r"\)", TokenKind::RParen),
    (r"\{", TokenKind::LBrace),
    (r"\}", TokenKind::RBrace),
    (r"\[", TokenKind::LBracket),
    (r"\]", TokenKind::RBracket),
    (r",", TokenKind::Comma),
    (r";", TokenKind::Semi),
    (r"\.", TokenKind::Dot),
    (r"==", TokenKind::EqEq),
    (r"=", TokenKind::Assign),
    (r"!=", TokenKind::Ne),
    (r"<=", TokenKind::Le),
    (r"<<", TokenKind::Shl),
    (r"<", TokenKind::Lt),
    (r">=", TokenKind::Ge),
    (r">>", TokenKind::Shr),
    (r">", TokenKind::Gt),
    (r"\+", TokenKind::Plus),
    (r"-", TokenKind::Minus),
    (r"\*", TokenKind::Star),
    (r"/", TokenKind::Slash),
    (r"%", TokenKind::Percent),
    (r"&&", TokenKind::AndAnd),
    (r"&", TokenKind::Amp),
    (r"\|\|", TokenKind::OrOr),
    (r"\|", TokenKind::Pipe),
    (r"\^", TokenKind::Caret),
    (r"!", TokenKind::Bang),
];

pub struct LexError(pub usize, pub char);

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    ident: Regex,
    num: Regex,
    string: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        Lexer {
            input,
            pos: 0,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|(?://[^\n]*)|(?:/\*(?s:.)*?\*/))*").unwrap(),
            ident: Regex::new(r"\A[A-Za-z_][A-Za-z0-9_]*").unwrap(),
            num: Regex::new(r"\A[0-9]+").unwrap(),
            string: Regex::new(r#"\A"(?:[^"\\\n]|\\.)*""#).unwrap(),
            matchers: SYMBOLS
                .iter()
                .map(|(pat, kind)| (Regex::new(&format!(r"\A{pat}")).unwrap(), *kind))
                .collect(),
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.skip_whitespace_peek() == self.input.len()
    }

    fn skip_whitespace_peek(&self) -> usize {
        match self.whitespace.find(&self.input[self.pos..]) {
            Some(m) => self.pos + m.end(),
            None => self.pos,
        }
    }

    fn skip_whitespace(&mut self) {
        self.pos = self.skip_whitespace_peek();
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.pos == self.input.len() {
            return Ok(None);
        }
        let rest = &self.input[self.pos..];

        if let Some(m) = self.string.find(rest) {
            let text = m.as_str();
            self.pos += m.end();
            return Ok(Some(Token { kind: TokenKind::Str, text }));
        }
        if let Some(m) = self.num.find(rest) {
            let text = m.as_str();
            self.pos += m.end();
            return Ok(Some(Token { kind: TokenKind::Num, text }));
        }
        if let Some(m) = self.ident.find(rest) {
            let text = m.as_str();
            self.pos += m.end();
            let kind = KEYWORDS
                .iter()
                .find(|(kw, _)| *kw == text)
                .map(|(_, kind)| *kind)
                .unwrap_or(TokenKind::Id);
            return Ok(Some(Token { kind, text }));
        }
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                let text = m.as_str();
                self.pos += m.end();
                return Ok(Some(Token { kind: *kind, text }));
            }
        }

        let bad = rest.chars().next().unwrap();
        Err(LexError(self.pos, bad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = vec![];
        while let Some(tok) = lexer.next().unwrap() {
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn keywords_are_not_identifiers() {
        assert_eq!(kinds("if while"), vec![TokenKind::KwIf, TokenKind::KwWhile]);
    }

    #[test]
    fn keyword_prefix_is_an_identifier() {
        assert_eq!(kinds("iffy"), vec![TokenKind::Id]);
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(kinds("<= < <<"), vec![TokenKind::Le, TokenKind::Lt, TokenKind::Shl]);
    }

    #[test]
    fn skips_line_and_block_comments() {
        assert_eq!(kinds("1 // comment\n2 /* block */ 3"), vec![TokenKind::Num; 3]);
    }

    #[test]
    fn string_literal_with_escape() {
        let mut lexer = Lexer::new(r#""a\"b""#);
        let tok = lexer.next().unwrap().unwrap();
        assert_eq!(tok.kind, TokenKind::Str);
        assert_eq!(tok.text, r#""a\"b""#);
    }

    #[test]
    fn unexpected_character_is_an_error() {
        let mut lexer = Lexer::new("@");
        assert!(lexer.next().is_err());
    }
}
