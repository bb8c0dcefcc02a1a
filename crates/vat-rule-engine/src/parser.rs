//! 表达式解析器
//!
//! 将中缀表达式文本切分为词法单元，再用调度场算法转换为后缀记号序列，
//! 求值器因此不需要处理优先级和括号。
//!
//! 解析器只做语法检查，不校验参数名：同一表达式解析一次后，
//! 可以针对不同参数包多次求值。

use crate::error::{Result, RuleError};
use crate::operators::{ArithmeticOperator, BuiltinFunction, ExpressionToken};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::iter::Peekable;
use std::str::{CharIndices, FromStr};

/// 解析后的表达式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    pub source: String,
    pub tokens: Vec<ExpressionToken>,
}

impl Expression {
    /// 表达式引用的所有参数名
    pub fn variables(&self) -> BTreeSet<&str> {
        self.tokens
            .iter()
            .filter_map(|token| match token {
                ExpressionToken::Variable(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// 词法单元
#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Number(String),
    Identifier(String),
    Operator(char),
    LeftParen,
    RightParen,
    Comma,
}

/// 调度场算法中暂存在操作符栈上的元素
#[derive(Debug)]
enum Pending {
    Operator(ArithmeticOperator),
    /// 普通括号
    Group { position: usize },
    /// 函数调用的左括号，记录已完成的参数个数
    Call {
        function: BuiltinFunction,
        position: usize,
        completed_args: usize,
    },
}

/// 表达式解析器
pub struct ExpressionParser;

impl ExpressionParser {
    /// 解析表达式文本
    pub fn parse(text: &str) -> Result<Expression> {
        if text.trim().is_empty() {
            return Err(RuleError::syntax(0, "表达式不能为空"));
        }

        let lexemes = Self::tokenize(text)?;
        let tokens = Self::to_postfix(lexemes, text.len())?;

        Ok(Expression {
            source: text.to_string(),
            tokens,
        })
    }

    /// 仅检查表达式能否解析
    pub fn validate_expression(text: &str) -> bool {
        Self::parse(text).is_ok()
    }

    fn tokenize(text: &str) -> Result<Vec<(usize, Lexeme)>> {
        let mut lexemes = Vec::new();
        let mut chars = text.char_indices().peekable();

        while let Some(&(position, ch)) = chars.peek() {
            let lexeme = match ch {
                c if c.is_whitespace() => {
                    chars.next();
                    continue;
                }
                '0'..='9' | '.' => {
                    let literal = Self::take_while(&mut chars, |c| c.is_ascii_digit() || c == '.');
                    let well_formed = literal.chars().any(|c| c.is_ascii_digit())
                        && literal.matches('.').count() <= 1;
                    if !well_formed || Decimal::from_str(&literal).is_err() {
                        return Err(RuleError::syntax(
                            position,
                            format!("无效的数字字面量 '{}'", literal),
                        ));
                    }
                    Lexeme::Number(literal)
                }
                c if c.is_ascii_alphabetic() || c == '_' => Lexeme::Identifier(Self::take_while(
                    &mut chars,
                    |c| c.is_ascii_alphanumeric() || c == '_',
                )),
                '+' | '-' | '*' | '/' | '^' => {
                    chars.next();
                    Lexeme::Operator(ch)
                }
                '(' => {
                    chars.next();
                    Lexeme::LeftParen
                }
                ')' => {
                    chars.next();
                    Lexeme::RightParen
                }
                ',' => {
                    chars.next();
                    Lexeme::Comma
                }
                other => {
                    return Err(RuleError::syntax(position, format!("无法识别的字符 '{}'", other)));
                }
            };
            lexemes.push((position, lexeme));
        }

        Ok(lexemes)
    }

    fn take_while(chars: &mut Peekable<CharIndices<'_>>, accept: impl Fn(char) -> bool) -> String {
        let mut buf = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if !accept(c) {
                break;
            }
            buf.push(c);
            chars.next();
        }
        buf
    }

    /// 调度场算法
    fn to_postfix(lexemes: Vec<(usize, Lexeme)>, end: usize) -> Result<Vec<ExpressionToken>> {
        let mut output = Vec::with_capacity(lexemes.len());
        let mut stack: Vec<Pending> = Vec::new();
        // 当前位置期待操作数（表达式开头、操作符、左括号、逗号之后）
        let mut expect_operand = true;
        let mut lexemes = lexemes.into_iter().peekable();

        while let Some((position, lexeme)) = lexemes.next() {
            match lexeme {
                Lexeme::Number(literal) => {
                    if !expect_operand {
                        return Err(RuleError::syntax(position, format!("缺少操作符: '{}'", literal)));
                    }
                    output.push(ExpressionToken::Number(literal));
                    expect_operand = false;
                }
                Lexeme::Identifier(name) => {
                    if !expect_operand {
                        return Err(RuleError::syntax(position, format!("缺少操作符: '{}'", name)));
                    }
                    if matches!(lexemes.peek(), Some((_, Lexeme::LeftParen))) {
                        let function = BuiltinFunction::from_name(&name).ok_or_else(|| {
                            RuleError::syntax(position, format!("未知函数 '{}'", name))
                        })?;
                        lexemes.next();
                        stack.push(Pending::Call {
                            function,
                            position,
                            completed_args: 0,
                        });
                    } else {
                        output.push(ExpressionToken::Variable(name));
                        expect_operand = false;
                    }
                }
                Lexeme::Operator(symbol) => {
                    if expect_operand {
                        match symbol {
                            // 前缀操作符不弹出栈中任何元素
                            '-' => stack.push(Pending::Operator(ArithmeticOperator::Negate)),
                            '+' => {}
                            other => {
                                return Err(RuleError::syntax(
                                    position,
                                    format!("操作符 '{}' 缺少左操作数", other),
                                ));
                            }
                        }
                        continue;
                    }

                    let operator = ArithmeticOperator::from_symbol(symbol).ok_or_else(|| {
                        RuleError::syntax(position, format!("无法识别的操作符 '{}'", symbol))
                    })?;
                    Self::pop_bound_operators(&mut stack, &mut output, operator);
                    stack.push(Pending::Operator(operator));
                    expect_operand = true;
                }
                Lexeme::LeftParen => {
                    if !expect_operand {
                        return Err(RuleError::syntax(position, "括号前缺少操作符"));
                    }
                    stack.push(Pending::Group { position });
                }
                Lexeme::RightParen => {
                    if expect_operand {
                        return Err(RuleError::syntax(position, "右括号前缺少操作数"));
                    }
                    Self::pop_until_paren(&mut stack, &mut output);
                    match stack.pop() {
                        Some(Pending::Group { .. }) => {}
                        Some(Pending::Call {
                            function,
                            position: call_position,
                            completed_args,
                        }) => {
                            let supplied = completed_args + 1;
                            if supplied != function.arity() {
                                return Err(RuleError::syntax(
                                    call_position,
                                    format!(
                                        "函数 '{}' 需要 {} 个参数，实际 {} 个",
                                        function.name(),
                                        function.arity(),
                                        supplied
                                    ),
                                ));
                            }
                            output.push(ExpressionToken::Function(function));
                        }
                        _ => return Err(RuleError::syntax(position, "括号不匹配: 多余的 ')'")),
                    }
                    expect_operand = false;
                }
                Lexeme::Comma => {
                    if expect_operand {
                        return Err(RuleError::syntax(position, "逗号前缺少参数"));
                    }
                    Self::pop_until_paren(&mut stack, &mut output);
                    match stack.last_mut() {
                        Some(Pending::Call { completed_args, .. }) => *completed_args += 1,
                        _ => return Err(RuleError::syntax(position, "逗号只能出现在函数参数中")),
                    }
                    expect_operand = true;
                }
            }
        }

        if expect_operand {
            return Err(RuleError::syntax(end, "表达式不完整"));
        }

        while let Some(pending) = stack.pop() {
            match pending {
                Pending::Operator(op) => output.push(ExpressionToken::Operator(op)),
                Pending::Group { position } | Pending::Call { position, .. } => {
                    return Err(RuleError::syntax(position, "括号不匹配: 缺少 ')'"));
                }
            }
        }

        Ok(output)
    }

    /// 弹出所有比新操作符结合更紧的操作符
    fn pop_bound_operators(
        stack: &mut Vec<Pending>,
        output: &mut Vec<ExpressionToken>,
        incoming: ArithmeticOperator,
    ) {
        while let Some(Pending::Operator(top)) = stack.last() {
            let top = *top;
            let binds_tighter = top.precedence() > incoming.precedence()
                || (top.precedence() == incoming.precedence() && !incoming.is_right_associative());
            if !binds_tighter {
                break;
            }
            stack.pop();
            output.push(ExpressionToken::Operator(top));
        }
    }

    fn pop_until_paren(stack: &mut Vec<Pending>, output: &mut Vec<ExpressionToken>) {
        while let Some(Pending::Operator(op)) = stack.last() {
            output.push(ExpressionToken::Operator(*op));
            stack.pop();
        }
    }
}
