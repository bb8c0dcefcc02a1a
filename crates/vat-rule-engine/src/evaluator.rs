//! 表达式求值器
//!
//! 对后缀记号序列做一次从左到右的扫描，使用显式的十进制操作数栈。
//! 除乘方和开方需要临时转换为浮点数外，全部运算都是精确十进制运算。

use crate::error::{Result, RuleError};
use crate::operators::{ArithmeticOperator, BuiltinFunction, ExpressionToken};
use crate::parameters::ParameterSource;
use rust_decimal::prelude::*;

/// 表达式求值器
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    /// 对后缀记号序列求值
    pub fn evaluate<P>(tokens: &[ExpressionToken], parameters: &P) -> Result<Decimal>
    where
        P: ParameterSource + ?Sized,
    {
        let mut stack: Vec<Decimal> = Vec::with_capacity(tokens.len());

        for (index, token) in tokens.iter().enumerate() {
            let value = match token {
                ExpressionToken::Number(literal) => Self::parse_number(literal, index)?,
                ExpressionToken::Variable(name) => Self::resolve_variable(name, parameters)?,
                ExpressionToken::Operator(op) => {
                    let operands = Self::pop_operands(&mut stack, op.operand_count(), index, op)?;
                    Self::apply_operator(*op, &operands)?
                }
                ExpressionToken::Function(func) => {
                    let args = Self::pop_operands(&mut stack, func.arity(), index, func)?;
                    Self::apply_function(*func, &args)?
                }
            };
            stack.push(value);
        }

        match stack.len() {
            1 => Ok(stack[0]),
            0 => Err(RuleError::structural(tokens.len(), "求值结束时栈为空")),
            n => Err(RuleError::structural(
                tokens.len(),
                format!("求值结束时栈中剩余 {} 个值", n),
            )),
        }
    }

    fn parse_number(literal: &str, index: usize) -> Result<Decimal> {
        Decimal::from_str(literal)
            .map_err(|e| RuleError::syntax(index, format!("无效的数字字面量 '{}': {}", literal, e)))
    }

    fn resolve_variable<P>(name: &str, parameters: &P) -> Result<Decimal>
    where
        P: ParameterSource + ?Sized,
    {
        parameters
            .lookup(name)
            .ok_or_else(|| RuleError::ParameterMissing {
                name: name.to_string(),
            })?
            .to_decimal(name)
    }

    /// 弹出 `count` 个操作数，按原始从左到右的顺序返回
    fn pop_operands(
        stack: &mut Vec<Decimal>,
        count: usize,
        index: usize,
        token: &dyn std::fmt::Display,
    ) -> Result<Vec<Decimal>> {
        if stack.len() < count {
            return Err(RuleError::structural(
                index,
                format!("'{}' 需要 {} 个操作数，栈中只有 {} 个", token, count, stack.len()),
            ));
        }
        Ok(stack.split_off(stack.len() - count))
    }

    fn apply_operator(op: ArithmeticOperator, operands: &[Decimal]) -> Result<Decimal> {
        if op == ArithmeticOperator::Negate {
            return Ok(-operands[0]);
        }

        let (left, right) = (operands[0], operands[1]);
        let result = match op {
            ArithmeticOperator::Add => left.checked_add(right),
            ArithmeticOperator::Subtract => left.checked_sub(right),
            ArithmeticOperator::Multiply => left.checked_mul(right),
            ArithmeticOperator::Divide => {
                if right.is_zero() {
                    return Err(RuleError::arithmetic(
                        format!("{} / {}", left, right),
                        "除数为零",
                    ));
                }
                left.checked_div(right)
            }
            ArithmeticOperator::Power => {
                return Self::via_f64(&format!("{} ^ {}", left, right), left, |base| {
                    right.to_f64().map(|exp| base.powf(exp))
                });
            }
            ArithmeticOperator::Negate => unreachable!(),
        };

        result.ok_or_else(|| {
            RuleError::arithmetic(format!("{} {} {}", left, op, right), "十进制运算溢出")
        })
    }

    fn apply_function(func: BuiltinFunction, args: &[Decimal]) -> Result<Decimal> {
        let value = match func {
            BuiltinFunction::Min => args[0].min(args[1]),
            BuiltinFunction::Max => args[0].max(args[1]),
            BuiltinFunction::Abs => args[0].abs(),
            // 银行家舍入：中点取偶数
            BuiltinFunction::Round => {
                args[0].round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
            }
            BuiltinFunction::Floor => args[0].floor(),
            BuiltinFunction::Ceiling => args[0].ceil(),
            BuiltinFunction::Sqrt => {
                let operand = args[0];
                if operand.is_sign_negative() && !operand.is_zero() {
                    return Err(RuleError::arithmetic(
                        format!("sqrt({})", operand),
                        "负数不能开平方",
                    ));
                }
                return Self::via_f64(&format!("sqrt({})", operand), operand, |x| Some(x.sqrt()));
            }
            // 两个分支都已求值，这里只做选择
            BuiltinFunction::If => {
                if args[0] > Decimal::ZERO {
                    args[1]
                } else {
                    args[2]
                }
            }
        };
        Ok(value)
    }

    /// 经浮点数计算后立即转换回十进制数
    fn via_f64(
        operation: &str,
        operand: Decimal,
        compute: impl FnOnce(f64) -> Option<f64>,
    ) -> Result<Decimal> {
        let result = operand
            .to_f64()
            .and_then(compute)
            .filter(|r| r.is_finite())
            .ok_or_else(|| RuleError::arithmetic(operation, "结果不是有限数"))?;

        Decimal::from_f64(result)
            .ok_or_else(|| RuleError::arithmetic(operation, "结果超出十进制数范围"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ParameterBag;
    use crate::parser::ExpressionParser;
    use rust_decimal_macros::dec;

    fn eval(text: &str, bag: &ParameterBag) -> Result<Decimal> {
        let expr = ExpressionParser::parse(text).unwrap();
        ExpressionEvaluator::evaluate(&expr.tokens, bag)
    }

    fn eval_const(text: &str) -> Decimal {
        eval(text, &ParameterBag::new()).unwrap()
    }

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(eval_const("2 + 3 * 4"), dec!(14));
        assert_eq!(eval_const("(2 + 3) * 4"), dec!(20));
        assert_eq!(eval_const("10 - 4 - 3"), dec!(3));
        assert_eq!(eval_const("100 / 4 / 5"), dec!(5));
    }

    #[test]
    fn test_exact_decimal_arithmetic() {
        assert_eq!(eval_const("0.1 + 0.2"), dec!(0.3));
        assert_eq!(eval_const("1000 * 0.19"), dec!(190));
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(eval_const("-5 + 2"), dec!(-3));
        assert_eq!(eval_const("-2 ^ 2"), dec!(-4));
        assert_eq!(eval_const("10 / -4"), dec!(-2.5));
    }

    #[test]
    fn test_power() {
        assert_eq!(eval_const("2 ^ 10"), dec!(1024));
        assert_eq!(eval_const("2 ^ 3 ^ 2"), dec!(512));
        assert_eq!(eval_const("2 ^ -1"), dec!(0.5));
    }

    #[test]
    fn test_power_non_finite() {
        let err = eval("0 ^ -1", &ParameterBag::new()).unwrap_err();
        assert!(matches!(err, RuleError::Arithmetic { .. }));
    }

    #[test]
    fn test_divide_by_zero() {
        let bag = ParameterBag::new().with("a", 10).with("b", 0);
        let err = eval("a / b", &bag).unwrap_err();
        assert!(matches!(err, RuleError::Arithmetic { ref message, .. } if message == "除数为零"));
    }

    #[test]
    fn test_if_truthiness() {
        for (x, expected) in [(1, dec!(100)), (0, dec!(50)), (-1, dec!(50))] {
            let bag = ParameterBag::new().with("x", x);
            assert_eq!(eval("if(x, 100, 50)", &bag).unwrap(), expected, "x = {}", x);
        }
    }

    #[test]
    fn test_if_evaluates_both_branches() {
        let bag = ParameterBag::new().with("x", 1).with("d", 0);
        let err = eval("if(x, 100, 1 / d)", &bag).unwrap_err();
        assert!(matches!(err, RuleError::Arithmetic { .. }));
    }

    #[test]
    fn test_sqrt() {
        assert_eq!(eval_const("sqrt(16)"), dec!(4));
        assert_eq!(eval_const("sqrt(0)"), dec!(0));

        let bag = ParameterBag::new().with("x", -4);
        let err = eval("sqrt(x)", &bag).unwrap_err();
        assert!(matches!(err, RuleError::Arithmetic { .. }));
    }

    #[test]
    fn test_round_uses_bankers_rounding() {
        assert_eq!(eval_const("round(2.5)"), dec!(2));
        assert_eq!(eval_const("round(3.5)"), dec!(4));
        assert_eq!(eval_const("round(-2.5)"), dec!(-2));
        assert_eq!(eval_const("round(2.51)"), dec!(3));
    }

    #[test]
    fn test_other_functions() {
        assert_eq!(eval_const("min(3, 7)"), dec!(3));
        assert_eq!(eval_const("max(3, 7)"), dec!(7));
        assert_eq!(eval_const("abs(-3.5)"), dec!(3.5));
        assert_eq!(eval_const("floor(-2.5)"), dec!(-3));
        assert_eq!(eval_const("ceiling(2.1)"), dec!(3));
    }

    #[test]
    fn test_function_argument_order() {
        // 参数必须保持从左到右的顺序
        assert_eq!(eval_const("if(0, 1, 2)"), dec!(2));
        assert_eq!(eval_const("if(5 - 10, 1, 2)"), dec!(2));
    }

    #[test]
    fn test_variable_coercion() {
        let bag = ParameterBag::new()
            .with("d", dec!(1.5))
            .with("i", 2)
            .with("f", 0.5)
            .with("s", "3")
            .with("b", true);
        assert_eq!(eval("d + i + f + s + b", &bag).unwrap(), dec!(8));
    }

    #[test]
    fn test_missing_parameter() {
        let err = eval("turnover * 0.01", &ParameterBag::new()).unwrap_err();
        assert!(matches!(err, RuleError::ParameterMissing { ref name } if name == "turnover"));
    }

    #[test]
    fn test_type_conversion_error() {
        let bag = ParameterBag::new().with("country", "DE");
        let err = eval("country + 1", &bag).unwrap_err();
        assert!(matches!(err, RuleError::TypeConversion { ref name, .. } if name == "country"));
    }

    #[test]
    fn test_overflow() {
        let bag = ParameterBag::new().with("big", Decimal::MAX);
        let err = eval("big * 2", &bag).unwrap_err();
        assert!(matches!(err, RuleError::Arithmetic { .. }));
    }

    #[test]
    fn test_structural_errors() {
        let bag = ParameterBag::new();

        let underflow = [ExpressionToken::Number("1".into()), ExpressionToken::Operator(ArithmeticOperator::Add)];
        assert!(matches!(
            ExpressionEvaluator::evaluate(&underflow, &bag),
            Err(RuleError::Structural { token_index: 1, .. })
        ));

        let leftover = [ExpressionToken::Number("1".into()), ExpressionToken::Number("2".into())];
        assert!(matches!(
            ExpressionEvaluator::evaluate(&leftover, &bag),
            Err(RuleError::Structural { .. })
        ));

        assert!(matches!(
            ExpressionEvaluator::evaluate(&[], &bag),
            Err(RuleError::Structural { .. })
        ));

        let short_call = [ExpressionToken::Number("1".into()), ExpressionToken::Function(BuiltinFunction::If)];
        assert!(matches!(
            ExpressionEvaluator::evaluate(&short_call, &bag),
            Err(RuleError::Structural { .. })
        ));
    }

    #[test]
    fn test_bad_literal_in_token_stream() {
        let tokens = [ExpressionToken::Number("1,5".into())];
        assert!(matches!(
            ExpressionEvaluator::evaluate(&tokens, &ParameterBag::new()),
            Err(RuleError::Syntax { position: 0, .. })
        ));
    }

    #[test]
    fn test_deterministic() {
        let expr = ExpressionParser::parse("round(1234.5678 * 0.19) + sqrt(2) / 3").unwrap();
        let bag = ParameterBag::new();
        let first = ExpressionEvaluator::evaluate(&expr.tokens, &bag).unwrap();
        let second = ExpressionEvaluator::evaluate(&expr.tokens, &bag).unwrap();
        assert_eq!(first.serialize(), second.serialize());
    }
}
