//! VAT 申报费用规则引擎
//!
//! 按国家规则估算 VAT 申报费用，支持：
//! - 带优先级和生效期的规则筛选
//! - 算术表达式解析（中缀转后缀）和精确十进制求值
//! - 规则条件检查和按国家汇总金额
//! - JSON 规则定义和编译缓存

pub mod aggregator;
pub mod cli;
pub mod compiler;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod models;
pub mod money;
pub mod operators;
pub mod parameters;
pub mod parser;
pub mod selector;
pub mod store;

pub use aggregator::CostAggregator;
pub use compiler::{CompiledRule, RuleCompiler};
pub use error::{EvaluationPhase, Result, RuleError};
pub use evaluator::ExpressionEvaluator;
pub use executor::RuleExecutor;
pub use models::{
    AppliedRule, CostEstimate, CountryCostResult, ParameterDeclaration, ParameterType, Rule,
    RuleOutcome, RuleType,
};
pub use money::Money;
pub use operators::{ArithmeticOperator, BuiltinFunction, ExpressionToken};
pub use parameters::{ParameterBag, ParameterSource, ParameterValue};
pub use parser::{Expression, ExpressionParser};
pub use selector::{RuleQuery, RuleSelector};
pub use store::{BatchLoadReport, RuleStore, RuleStoreStats};
