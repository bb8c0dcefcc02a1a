//! 参数包
//!
//! 调用方每次计算传入的一组命名参数。参数值是动态类型的，
//! 在进入求值器前通过 [`ParameterValue::to_decimal`] 统一转换为十进制数。

use crate::error::{Result, RuleError};
use rust_decimal::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// 可转换为数值的文本：十进制写法，不接受科学计数法和分隔符
static NUMERIC_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d+(\.\d+)?$").expect("numeric text pattern"));

/// 货币参数的约定名称
pub const CURRENCY_PARAMETER: &str = "currency";

/// 动态类型的参数值
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Decimal(Decimal),
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Null,
}

impl ParameterValue {
    /// 转换为十进制数
    ///
    /// 转换表：Decimal 原样返回，Integer 拓宽，Float 转换（NaN/无穷拒绝），
    /// 数字文本按不变区域格式解析，Boolean 为 1/0，其余一律失败。
    pub fn to_decimal(&self, name: &str) -> Result<Decimal> {
        let converted = match self {
            Self::Decimal(d) => Some(*d),
            Self::Integer(i) => Some(Decimal::from(*i)),
            Self::Float(f) => Decimal::from_f64(*f),
            Self::Text(s) => {
                let text = s.trim();
                NUMERIC_TEXT
                    .is_match(text)
                    .then(|| Decimal::from_str(text).ok())
                    .flatten()
            }
            Self::Boolean(b) => Some(if *b { Decimal::ONE } else { Decimal::ZERO }),
            Self::Null => None,
        };

        converted.ok_or_else(|| RuleError::TypeConversion {
            name: name.to_string(),
            value_type: self.type_name().to_string(),
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 获取值的类型名称
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Decimal(_) => "decimal",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Boolean(_) => "boolean",
            Self::Null => "null",
        }
    }
}

impl TryFrom<Value> for ParameterValue {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Boolean(b)),
            Value::String(s) => Ok(Self::Text(s)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Self::Integer(i));
                }
                // 以数字原文解析，避免经过 f64 损失精度
                let text = n.to_string();
                match Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)) {
                    Ok(d) => Ok(Self::Decimal(d)),
                    Err(_) => n
                        .as_f64()
                        .map(Self::Float)
                        .ok_or_else(|| format!("无法表示的数值: {}", text)),
                }
            }
            Value::Array(_) => Err("参数值不支持数组".to_string()),
            Value::Object(_) => Err("参数值不支持对象".to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ParameterValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        ParameterValue::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl From<Decimal> for ParameterValue {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// 参数查找接口，求值器通过它读取变量
pub trait ParameterSource {
    fn lookup(&self, name: &str) -> Option<&ParameterValue>;
}

/// 参数包
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterBag {
    values: HashMap<String, ParameterValue>,
}

impl ParameterBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 对象创建
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 链式添加参数
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// 读取并转换为十进制数
    pub fn get_decimal(&self, name: &str) -> Result<Decimal> {
        self.get(name)
            .ok_or_else(|| RuleError::ParameterMissing {
                name: name.to_string(),
            })?
            .to_decimal(name)
    }

    /// 调用方指定的货币代码
    ///
    /// 未提供时返回 `None`；提供了非文本值时报错，而不是回退到默认币种。
    pub fn currency(&self) -> Result<Option<&str>> {
        match self.get(CURRENCY_PARAMETER) {
            None => Ok(None),
            Some(value) => value
                .as_text()
                .map(Some)
                .ok_or_else(|| RuleError::InvalidCurrency {
                    value: format!("<{}>", value.type_name()),
                }),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ParameterSource for ParameterBag {
    fn lookup(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }
}

impl<K, V> FromIterator<(K, V)> for ParameterBag
where
    K: Into<String>,
    V: Into<ParameterValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut bag = Self::new();
        for (name, value) in iter {
            bag.insert(name, value);
        }
        bag
    }
}

/// 在参数包之上叠加规则声明的默认值，参数包中的值优先
pub struct WithDefaults<'a> {
    bag: &'a ParameterBag,
    defaults: &'a HashMap<String, ParameterValue>,
}

impl<'a> WithDefaults<'a> {
    pub fn new(bag: &'a ParameterBag, defaults: &'a HashMap<String, ParameterValue>) -> Self {
        Self { bag, defaults }
    }
}

impl ParameterSource for WithDefaults<'_> {
    fn lookup(&self, name: &str) -> Option<&ParameterValue> {
        self.bag.lookup(name).or_else(|| self.defaults.get(name))
    }
}
