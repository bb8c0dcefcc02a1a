//! 金额值对象
//!
//! 金额使用精确十进制数，不做任何货币换算：不同货币的金额相加直接报错，
//! 换算必须由调用方在汇总之前完成。

use crate::error::{Result, RuleError};
use rust_decimal::Decimal;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static CURRENCY_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{3}$").expect("currency code pattern"));

/// 校验 ISO 4217 三字母货币代码，返回大写形式
pub fn currency_code(code: &str) -> Result<String> {
    if !CURRENCY_CODE.is_match(code) {
        return Err(RuleError::InvalidCurrency {
            value: code.to_string(),
        });
    }
    Ok(code.to_ascii_uppercase())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into().to_ascii_uppercase(),
        }
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// 相加，货币不一致时失败
    pub fn checked_add(&self, other: &Money) -> Result<Money> {
        self.ensure_same_currency(other)?;
        let amount = self.amount.checked_add(other.amount).ok_or_else(|| {
            RuleError::arithmetic("+", format!("金额溢出: {} + {}", self.amount, other.amount))
        })?;
        Ok(Money::new(amount, self.currency.clone()))
    }

    /// 累加一个同币种的数额
    pub fn add_amount(&mut self, amount: Decimal) -> Result<()> {
        self.amount = self.amount.checked_add(amount).ok_or_else(|| {
            RuleError::arithmetic("+", format!("金额溢出: {} + {}", self.amount, amount))
        })?;
        Ok(())
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<()> {
        if self.currency != other.currency {
            return Err(RuleError::CurrencyMismatch {
                expected: self.currency.clone(),
                actual: other.currency.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}
