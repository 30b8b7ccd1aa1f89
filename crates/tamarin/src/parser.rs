//! Pratt parser: token stream → AST.
//!
//! Top-down operator precedence over the lexer's token stream. Parsing fails
//! fast: the first syntax error aborts with [`Error::Parse`] carrying the
//! offending token.

use crate::ast::{BlockStatement, Expression, Program, Statement};
use crate::error::{Error, Result};
use crate::lexer::Lexer;
use crate::token::Token;

/// Binding power of infix operators, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

fn precedence_of(token: &Token) -> Precedence {
    match token {
        Token::Eq | Token::NotEq => Precedence::Equals,
        Token::Lt | Token::Gt => Precedence::LessGreater,
        Token::Plus | Token::Minus => Precedence::Sum,
        Token::Slash | Token::Asterisk => Precedence::Product,
        Token::Lparen => Precedence::Call,
        Token::Lbracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

pub struct Parser {
    lexer: Lexer,
    current: Token,
    peek: Token,
}

impl Parser {
    pub fn new(mut lexer: Lexer) -> Self {
        let current = lexer.next_token();
        let peek = lexer.next_token();
        Parser {
            lexer,
            current,
            peek,
        }
    }

    /// Convenience entry point: lex and parse `source` in one go.
    pub fn parse(source: &str) -> Result<Program> {
        Parser::new(Lexer::new(source)).parse_program()
    }

    pub fn parse_program(&mut self) -> Result<Program> {
        let mut program = Program::default();
        while self.current != Token::Eof {
            program.statements.push(self.parse_statement()?);
            self.next_token();
        }
        Ok(program)
    }

    fn next_token(&mut self) {
        self.current = std::mem::replace(&mut self.peek, self.lexer.next_token());
    }

    fn expect_peek(&mut self, expected: Token) -> Result<()> {
        if self.peek == expected {
            self.next_token();
            Ok(())
        } else {
            Err(Error::Parse(format!(
                "expected {:?}, got {:?}",
                expected, self.peek
            )))
        }
    }

    fn current_ident(&self) -> Result<String> {
        match &self.current {
            Token::Ident(name) => Ok(name.clone()),
            other => Err(Error::Parse(format!("expected identifier, got {other:?}"))),
        }
    }

    /// Source text of the current operator token.
    fn operator_text(&self) -> String {
        let text = match &self.current {
            Token::Bang => "!",
            Token::Minus => "-",
            Token::Plus => "+",
            Token::Asterisk => "*",
            Token::Slash => "/",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Eq => "==",
            Token::NotEq => "!=",
            other => unreachable!("operator_text on non-operator token {other:?}"),
        };
        text.to_string()
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.current {
            Token::Let => self.parse_let_statement(),
            Token::Return => self.parse_return_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> Result<Statement> {
        let name = match &self.peek {
            Token::Ident(name) => name.clone(),
            other => return Err(Error::Parse(format!("expected identifier, got {other:?}"))),
        };
        self.next_token();
        self.expect_peek(Token::Assign)?;
        self.next_token();

        let mut value = self.parse_expression(Precedence::Lowest)?;
        // Record the bound name on function literals so the compiler can
        // resolve recursive self-references.
        if let Expression::FunctionLiteral { name: fn_name, .. } = &mut value {
            *fn_name = Some(name.clone());
        }

        if self.peek == Token::Semicolon {
            self.next_token();
        }
        Ok(Statement::Let { name, value })
    }

    fn parse_return_statement(&mut self) -> Result<Statement> {
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;
        if self.peek == Token::Semicolon {
            self.next_token();
        }
        Ok(Statement::Return(value))
    }

    fn parse_expression_statement(&mut self) -> Result<Statement> {
        let expression = self.parse_expression(Precedence::Lowest)?;
        if self.peek == Token::Semicolon {
            self.next_token();
        }
        Ok(Statement::Expression(expression))
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn parse_expression(&mut self, precedence: Precedence) -> Result<Expression> {
        let mut left = self.parse_prefix()?;

        while self.peek != Token::Semicolon && precedence < precedence_of(&self.peek) {
            left = match self.peek {
                Token::Plus
                | Token::Minus
                | Token::Slash
                | Token::Asterisk
                | Token::Eq
                | Token::NotEq
                | Token::Lt
                | Token::Gt => {
                    self.next_token();
                    self.parse_infix_expression(left)?
                }
                Token::Lparen => {
                    self.next_token();
                    self.parse_call_expression(left)?
                }
                Token::Lbracket => {
                    self.next_token();
                    self.parse_index_expression(left)?
                }
                _ => break,
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expression> {
        match &self.current {
            Token::Ident(name) => Ok(Expression::Identifier(name.clone())),
            Token::Int(literal) => literal
                .parse::<i64>()
                .map(Expression::IntegerLiteral)
                .map_err(|_| Error::Parse(format!("could not parse {literal:?} as integer"))),
            Token::Str(value) => Ok(Expression::StringLiteral(value.clone())),
            Token::True => Ok(Expression::BooleanLiteral(true)),
            Token::False => Ok(Expression::BooleanLiteral(false)),
            Token::Bang | Token::Minus => self.parse_prefix_expression(),
            Token::Lparen => self.parse_grouped_expression(),
            Token::If => self.parse_if_expression(),
            Token::Function => self.parse_function_literal(),
            Token::Lbracket => {
                let elements = self.parse_expression_list(Token::Rbracket)?;
                Ok(Expression::ArrayLiteral(elements))
            }
            Token::Lbrace => self.parse_hash_literal(),
            other => Err(Error::Parse(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_prefix_expression(&mut self) -> Result<Expression> {
        let operator = self.operator_text();
        self.next_token();
        let right = self.parse_expression(Precedence::Prefix)?;
        Ok(Expression::Prefix {
            operator,
            right: Box::new(right),
        })
    }

    fn parse_infix_expression(&mut self, left: Expression) -> Result<Expression> {
        let operator = self.operator_text();
        let precedence = precedence_of(&self.current);
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Ok(Expression::Infix {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_grouped_expression(&mut self) -> Result<Expression> {
        self.next_token();
        let expression = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(Token::Rparen)?;
        Ok(expression)
    }

    fn parse_if_expression(&mut self) -> Result<Expression> {
        self.expect_peek(Token::Lparen)?;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(Token::Rparen)?;
        self.expect_peek(Token::Lbrace)?;
        let consequence = self.parse_block_statement()?;

        let alternative = if self.peek == Token::Else {
            self.next_token();
            self.expect_peek(Token::Lbrace)?;
            Some(self.parse_block_statement()?)
        } else {
            None
        };

        Ok(Expression::If {
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    fn parse_block_statement(&mut self) -> Result<BlockStatement> {
        let mut block = BlockStatement::default();
        self.next_token();
        while self.current != Token::Rbrace {
            if self.current == Token::Eof {
                return Err(Error::Parse("unexpected end of input in block".to_string()));
            }
            block.statements.push(self.parse_statement()?);
            self.next_token();
        }
        Ok(block)
    }

    fn parse_function_literal(&mut self) -> Result<Expression> {
        self.expect_peek(Token::Lparen)?;
        let parameters = self.parse_function_parameters()?;
        self.expect_peek(Token::Lbrace)?;
        let body = self.parse_block_statement()?;
        Ok(Expression::FunctionLiteral {
            parameters,
            body,
            name: None,
        })
    }

    fn parse_function_parameters(&mut self) -> Result<Vec<String>> {
        let mut parameters = Vec::new();
        if self.peek == Token::Rparen {
            self.next_token();
            return Ok(parameters);
        }

        self.next_token();
        parameters.push(self.current_ident()?);
        while self.peek == Token::Comma {
            self.next_token();
            self.next_token();
            parameters.push(self.current_ident()?);
        }
        self.expect_peek(Token::Rparen)?;
        Ok(parameters)
    }

    fn parse_call_expression(&mut self, function: Expression) -> Result<Expression> {
        let arguments = self.parse_expression_list(Token::Rparen)?;
        Ok(Expression::Call {
            function: Box::new(function),
            arguments,
        })
    }

    fn parse_expression_list(&mut self, end: Token) -> Result<Vec<Expression>> {
        let mut list = Vec::new();
        if self.peek == end {
            self.next_token();
            return Ok(list);
        }

        self.next_token();
        list.push(self.parse_expression(Precedence::Lowest)?);
        while self.peek == Token::Comma {
            self.next_token();
            self.next_token();
            list.push(self.parse_expression(Precedence::Lowest)?);
        }
        self.expect_peek(end)?;
        Ok(list)
    }

    fn parse_index_expression(&mut self, left: Expression) -> Result<Expression> {
        self.next_token();
        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(Token::Rbracket)?;
        Ok(Expression::Index {
            left: Box::new(left),
            index: Box::new(index),
        })
    }

    fn parse_hash_literal(&mut self) -> Result<Expression> {
        let mut pairs = Vec::new();
        while self.peek != Token::Rbrace {
            self.next_token();
            let key = self.parse_expression(Precedence::Lowest)?;
            self.expect_peek(Token::Colon)?;
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));
            if self.peek != Token::Rbrace {
                self.expect_peek(Token::Comma)?;
            }
        }
        self.next_token();
        Ok(Expression::HashLiteral(pairs))
    }
}
