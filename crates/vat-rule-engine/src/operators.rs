//! 表达式操作符、内置函数与后缀记号定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 算术操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    /// 一元负号，由解析器在前缀 `-` 处生成
    Negate,
}

impl ArithmeticOperator {
    /// 从二元操作符字符解析
    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '+' => Some(Self::Add),
            '-' => Some(Self::Subtract),
            '*' => Some(Self::Multiply),
            '/' => Some(Self::Divide),
            '^' => Some(Self::Power),
            _ => None,
        }
    }

    /// 优先级，数值越大越先结合
    pub fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Subtract => 1,
            Self::Multiply | Self::Divide => 2,
            Self::Negate => 3,
            Self::Power => 4,
        }
    }

    pub fn is_right_associative(self) -> bool {
        matches!(self, Self::Power | Self::Negate)
    }

    /// 操作数个数
    pub fn operand_count(self) -> usize {
        match self {
            Self::Negate => 1,
            _ => 2,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Power => "^",
            Self::Negate => "neg",
        }
    }
}

impl fmt::Display for ArithmeticOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// 内置函数，参数个数固定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinFunction {
    Min,
    Max,
    Abs,
    Round,
    Floor,
    Ceiling,
    Sqrt,
    If,
}

impl BuiltinFunction {
    /// 按名称查找内置函数（不区分大小写）
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "abs" => Some(Self::Abs),
            "round" => Some(Self::Round),
            "floor" => Some(Self::Floor),
            "ceiling" => Some(Self::Ceiling),
            "sqrt" => Some(Self::Sqrt),
            "if" => Some(Self::If),
            _ => None,
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Self::Min | Self::Max => 2,
            Self::Abs | Self::Round | Self::Floor | Self::Ceiling | Self::Sqrt => 1,
            Self::If => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Abs => "abs",
            Self::Round => "round",
            Self::Floor => "floor",
            Self::Ceiling => "ceiling",
            Self::Sqrt => "sqrt",
            Self::If => "if",
        }
    }
}

impl fmt::Display for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name(), self.arity())
    }
}

/// 后缀记号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExpressionToken {
    /// 十进制字面量原文
    Number(String),
    /// 参数引用
    Variable(String),
    Operator(ArithmeticOperator),
    Function(BuiltinFunction),
}

impl fmt::Display for ExpressionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(text) => write!(f, "{}", text),
            Self::Variable(name) => write!(f, "{}", name),
            Self::Operator(op) => write!(f, "{}", op),
            Self::Function(func) => write!(f, "{}", func),
        }
    }
}
