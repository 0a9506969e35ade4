//! Parser for the XPath 1.0 subset used for element locators.
//!
//! Covers location paths with any axis, node tests, predicates, filter
//! expressions such as `(//a)[2]`, function calls, string and number
//! literals, boolean, comparison, arithmetic and union operators. Variables
//! are not supported.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid path expression at offset {offset}: {message}")]
pub struct XPathError {
    pub offset: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Attribute,
    SelfNode,
    Parent,
    Descendant,
    DescendantOrSelf,
    Ancestor,
    AncestorOrSelf,
    Following,
    FollowingSibling,
    Preceding,
    PrecedingSibling,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "attribute" => Axis::Attribute,
            "self" => Axis::SelfNode,
            "parent" => Axis::Parent,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "following" => Axis::Following,
            "following-sibling" => Axis::FollowingSibling,
            "preceding" => Axis::Preceding,
            "preceding-sibling" => Axis::PrecedingSibling,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    Any,
    Name(String),
    Text,
    Node,
    Comment,
    ProcessingInstruction(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Reached through `//` rather than `/`.
    pub descendant: bool,
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    pub absolute: bool,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    Arith(Box<Expr>, ArithOp, Box<Expr>),
    Negate(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Path(LocationPath),
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
    Literal(String),
    Number(f64),
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Pipe,
    Dot,
    DotDot,
    ColonColon,
    Star,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Literal(String),
    Number(f64),
    Name(String),
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, XPathError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let err = |offset: usize, message: &str| XPathError {
        offset,
        message: message.to_string(),
    };

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);
        let (token, width) = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '/' if next == Some('/') => (Token::DoubleSlash, 2),
            '/' => (Token::Slash, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '@' => (Token::At, 1),
            ',' => (Token::Comma, 1),
            '|' => (Token::Pipe, 1),
            '*' => (Token::Star, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '=' => (Token::Eq, 1),
            '!' if next == Some('=') => (Token::NotEq, 2),
            '<' if next == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if next == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            ':' if next == Some(':') => (Token::ColonColon, 2),
            '.' if next == Some('.') => (Token::DotDot, 2),
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => (Token::Dot, 1),
            '\'' | '"' => {
                let quote = c;
                let mut j = i + 1;
                let mut value = String::new();
                while j < chars.len() && chars[j].1 != quote {
                    value.push(chars[j].1);
                    j += 1;
                }
                if j == chars.len() {
                    return Err(err(offset, "unterminated string literal"));
                }
                tokens.push((offset, Token::Literal(value)));
                i = j + 1;
                continue;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut j = i;
                let mut text = String::new();
                while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
                    text.push(chars[j].1);
                    j += 1;
                }
                let number = text.parse().map_err(|_| err(offset, "malformed number"))?;
                tokens.push((offset, Token::Number(number)));
                i = j;
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i;
                let mut name = String::new();
                while j < chars.len() {
                    let ch = chars[j].1;
                    let is_name_char = ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.');
                    let is_prefix_colon =
                        ch == ':' && chars.get(j + 1).is_some_and(|&(_, n)| n != ':') && !name.is_empty();
                    if !(is_name_char || is_prefix_colon) {
                        break;
                    }
                    name.push(ch);
                    j += 1;
                }
                tokens.push((offset, Token::Name(name)));
                i = j;
                continue;
            }
            other => return Err(err(offset, &format!("unexpected character `{other}`"))),
        };
        tokens.push((offset, token));
        i += width;
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(self.end)
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, XPathError> {
        Err(XPathError {
            offset: self.offset(),
            message: message.into(),
        })
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), XPathError> {
        if self.eat(&token) {
            Ok(())
        } else {
            self.error(format!("expected {what}"))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Name(n)) if n == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.parse_comparison()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CompareOp::Eq,
                Some(Token::NotEq) => CompareOp::NotEq,
                Some(Token::Lt) => CompareOp::Lt,
                Some(Token::Le) => CompareOp::Le,
                Some(Token::Gt) => CompareOp::Gt,
                Some(Token::Ge) => CompareOp::Ge,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Expr::Compare(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Arith(Box::new(lhs), op, Box::new(rhs));
        }
    }

    /// After an operand, `*` multiplies and `div`/`mod` are operators, never
    /// node tests.
    fn parse_multiplicative(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Name(n)) if n == "div" => ArithOp::Div,
                Some(Token::Name(n)) if n == "mod" => ArithOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Arith(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, XPathError> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Negate(Box::new(self.parse_unary()?)));
        }
        let mut lhs = self.parse_path()?;
        while self.eat(&Token::Pipe) {
            let rhs = self.parse_path()?;
            lhs = Expr::Union(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn starts_primary(&self) -> bool {
        match self.peek() {
            Some(Token::Literal(_) | Token::Number(_) | Token::LParen) => true,
            Some(Token::Name(name)) => {
                self.peek_at(1) == Some(&Token::LParen) && !matches!(name.as_str(), "text" | "node" | "comment" | "processing-instruction")
            }
            _ => false,
        }
    }

    fn parse_path(&mut self) -> Result<Expr, XPathError> {
        if self.starts_primary() {
            let primary = self.parse_primary()?;
            let predicates = self.parse_predicates()?;
            let steps = match self.peek() {
                Some(Token::Slash | Token::DoubleSlash) => self.parse_steps_after_separator()?,
                _ => Vec::new(),
            };
            if predicates.is_empty() && steps.is_empty() {
                return Ok(primary);
            }
            return Ok(Expr::Filter {
                primary: Box::new(primary),
                predicates,
                steps,
            });
        }

        match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                let steps = if self.starts_step() {
                    self.parse_relative(false)?
                } else {
                    Vec::new()
                };
                Ok(Expr::Path(LocationPath { absolute: true, steps }))
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                let steps = self.parse_relative(true)?;
                Ok(Expr::Path(LocationPath { absolute: true, steps }))
            }
            _ if self.starts_step() => {
                let steps = self.parse_relative(false)?;
                Ok(Expr::Path(LocationPath { absolute: false, steps }))
            }
            Some(_) => self.error("expected a path, literal or function call"),
            None => self.error("unexpected end of expression"),
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Dot | Token::DotDot | Token::At | Token::Star | Token::Name(_))
        )
    }

    fn parse_steps_after_separator(&mut self) -> Result<Vec<Step>, XPathError> {
        let descendant = match self.peek() {
            Some(Token::DoubleSlash) => true,
            Some(Token::Slash) => false,
            _ => return self.error("expected `/` or `//`"),
        };
        self.pos += 1;
        self.parse_relative(descendant)
    }

    fn parse_relative(&mut self, first_descendant: bool) -> Result<Vec<Step>, XPathError> {
        let mut steps = vec![self.parse_step(first_descendant)?];
        loop {
            let descendant = match self.peek() {
                Some(Token::DoubleSlash) => true,
                Some(Token::Slash) => false,
                _ => return Ok(steps),
            };
            self.pos += 1;
            steps.push(self.parse_step(descendant)?);
        }
    }

    fn parse_step(&mut self, descendant: bool) -> Result<Step, XPathError> {
        let step = |axis, test| Step {
            descendant,
            axis,
            test,
            predicates: Vec::new(),
        };
        if self.eat(&Token::Dot) {
            return Ok(step(Axis::SelfNode, NodeTest::Node));
        }
        if self.eat(&Token::DotDot) {
            return Ok(step(Axis::Parent, NodeTest::Node));
        }

        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else if let (Some(Token::Name(name)), Some(Token::ColonColon)) = (self.peek(), self.peek_at(1)) {
            let Some(axis) = Axis::from_name(name) else {
                return self.error(format!("unknown axis `{name}`"));
            };
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };

        let test = self.parse_node_test()?;
        let predicates = self.parse_predicates()?;
        Ok(Step {
            predicates,
            ..step(axis, test)
        })
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, XPathError> {
        match self.peek().cloned() {
            Some(Token::Star) => {
                self.pos += 1;
                Ok(NodeTest::Any)
            }
            Some(Token::Name(name)) => {
                self.pos += 1;
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let test = match name.as_str() {
                        "text" => NodeTest::Text,
                        "node" => NodeTest::Node,
                        "comment" => NodeTest::Comment,
                        "processing-instruction" => match self.peek().cloned() {
                            Some(Token::Literal(target)) => {
                                self.pos += 1;
                                NodeTest::ProcessingInstruction(Some(target))
                            }
                            _ => NodeTest::ProcessingInstruction(None),
                        },
                        _ => return self.error(format!("`{name}()` is not a node test")),
                    };
                    self.expect(Token::RParen, "`)`")?;
                    Ok(test)
                } else {
                    Ok(NodeTest::Name(name))
                }
            }
            _ => self.error("expected a node test"),
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, XPathError> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.parse_expr()?);
            self.expect(Token::RBracket, "`]`")?;
        }
        Ok(predicates)
    }

    fn parse_primary(&mut self) -> Result<Expr, XPathError> {
        match self.peek().cloned() {
            Some(Token::Literal(value)) => {
                self.pos += 1;
                Ok(Expr::Literal(value))
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "`)`")?;
                Ok(inner)
            }
            Some(Token::Name(name)) => {
                self.pos += 2;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(Token::RParen, "`)` or `,`")?;
                        break;
                    }
                }
                Ok(Expr::Call { name, args })
            }
            _ => self.error("expected a primary expression"),
        }
    }
}

/// Parse a complete expression. Trailing input is an error.
pub fn parse(input: &str) -> Result<Expr, XPathError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(XPathError {
            offset: 0,
            message: "empty expression".to_string(),
        });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
    };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return parser.error("unexpected trailing input");
    }
    Ok(expr)
}

/// Parse an expression that must select elements: a location path, a
/// filtered path or a union of them.
pub fn parse_locator(input: &str) -> Result<Expr, XPathError> {
    let expr = parse(input)?;
    if selects_nodes(&expr) {
        Ok(expr)
    } else {
        Err(XPathError {
            offset: 0,
            message: "expression does not select elements".to_string(),
        })
    }
}

fn selects_nodes(expr: &Expr) -> bool {
    match expr {
        Expr::Path(_) => true,
        Expr::Union(a, b) => selects_nodes(a) && selects_nodes(b),
        Expr::Filter { primary, .. } => selects_nodes(primary),
        _ => false,
    }
}
