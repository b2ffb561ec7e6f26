//! Reducers that collapse a group's child results into one value.
//!
//! Aggregate records only store the reducer's *name*, so a group stays
//! resumable after a restart as long as the same reducers are registered
//! again. Each [`TaskLedger`](crate::core::TaskLedger) owns its own
//! [`ReducerRegistry`]; there is no process-wide registry.
//!
//! # Examples
//!
//! ```rust
//! use taskledger::prelude::*;
//! use serde_json::{Value, json};
//!
//! # async fn example() {
//! let registry = ReducerRegistry::with_builtins();
//!
//! registry
//!     .register(FnReducer::new("max", |results: &[Value]| {
//!         results
//!             .iter()
//!             .filter_map(Value::as_i64)
//!             .max()
//!             .map(Value::from)
//!             .ok_or_else(|| "no integer results".to_string())
//!     }))
//!     .await;
//!
//! let max = registry.get("max").await.unwrap();
//! assert_eq!(max.reduce(&[json!(3), json!(9)]), Ok(json!(9)));
//! # }
//! ```

use serde_json::{Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Name of the built-in numeric sum reducer
pub const SUM: &str = "sum";
/// Name of the built-in reducer that returns all results as an array
pub const COLLECT: &str = "collect";

/// Collapses child results, given in submission order, into one value.
///
/// An `Err` carries a human-readable reason and finalizes the group as
/// `REDUCER_FAILED`.
pub trait Reducer: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Reduce the results
    fn reduce(&self, results: &[Value]) -> Result<Value, String>;
}

/// Sums numeric results.
///
/// Stays in integers while every input is an integer and the sum fits in
/// `i64` or `u64`; otherwise falls back to `f64`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SumReducer;

impl Reducer for SumReducer {
    fn name(&self) -> &str {
        SUM
    }

    fn reduce(&self, results: &[Value]) -> Result<Value, String> {
        let mut int_sum: Option<i128> = Some(0);
        let mut float_sum = 0.0_f64;

        for (index, value) in results.iter().enumerate() {
            let Value::Number(number) = value else {
                return Err(format!("result #{index} is not a number: {value}"));
            };

            let int = number
                .as_i64()
                .map(i128::from)
                .or_else(|| number.as_u64().map(i128::from));
            int_sum = int_sum.zip(int).and_then(|(acc, n)| acc.checked_add(n));
            float_sum += number.as_f64().unwrap_or_default();
        }

        if let Some(sum) = int_sum {
            if let Ok(sum) = i64::try_from(sum) {
                return Ok(Value::from(sum));
            }
            if let Ok(sum) = u64::try_from(sum) {
                return Ok(Value::from(sum));
            }
        }

        Number::from_f64(float_sum)
            .map(Value::Number)
            .ok_or_else(|| "sum is not a finite number".to_string())
    }
}

/// Returns every result as a JSON array.
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectReducer;

impl Reducer for CollectReducer {
    fn name(&self) -> &str {
        COLLECT
    }

    fn reduce(&self, results: &[Value]) -> Result<Value, String> {
        Ok(Value::Array(results.to_vec()))
    }
}

/// Adapts a closure into a named [`Reducer`].
pub struct FnReducer<F> {
    name: String,
    reduce: F,
}

impl<F> FnReducer<F>
where
    F: Fn(&[Value]) -> Result<Value, String> + Send + Sync,
{
    /// Wrap `reduce` under `name`
    pub fn new(name: impl Into<String>, reduce: F) -> Self {
        Self {
            name: name.into(),
            reduce,
        }
    }
}

impl<F> fmt::Debug for FnReducer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnReducer").field("name", &self.name).finish()
    }
}

impl<F> Reducer for FnReducer<F>
where
    F: Fn(&[Value]) -> Result<Value, String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn reduce(&self, results: &[Value]) -> Result<Value, String> {
        (self.reduce)(results)
    }
}

/// Named reducers available to a ledger.
#[derive(Default)]
pub struct ReducerRegistry {
    reducers: RwLock<HashMap<String, Arc<dyn Reducer>>>,
}

impl ReducerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the `sum` and `collect` reducers
    pub fn with_builtins() -> Self {
        let mut reducers: HashMap<String, Arc<dyn Reducer>> = HashMap::new();
        reducers.insert(SUM.to_string(), Arc::new(SumReducer));
        reducers.insert(COLLECT.to_string(), Arc::new(CollectReducer));
        Self {
            reducers: RwLock::new(reducers),
        }
    }

    /// Register a reducer, replacing any previous one with the same name.
    pub async fn register<R: Reducer + 'static>(&self, reducer: R) {
        let name = reducer.name().to_string();
        tracing::debug!(reducer = %name, "Registering reducer");
        self.reducers.write().await.insert(name, Arc::new(reducer));
    }

    /// Look up a reducer by name
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Reducer>> {
        self.reducers.read().await.get(name).cloned()
    }

    /// Check if a reducer is registered
    pub async fn contains(&self, name: &str) -> bool {
        self.reducers.read().await.contains_key(name)
    }

    /// Get all registered names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.reducers.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ReducerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducerRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sum_reducer() {
        assert_eq!(SumReducer.reduce(&[json!(3), json!(5)]), Ok(json!(8)));
        assert_eq!(SumReducer.reduce(&[]), Ok(json!(0)));
        assert_eq!(SumReducer.reduce(&[json!(1), json!(0.5)]), Ok(json!(1.5)));
        assert_eq!(
            SumReducer.reduce(&[json!(i64::MAX), json!(1)]),
            Ok(json!(i64::MAX as u64 + 1))
        );
        assert_eq!(
            SumReducer.reduce(&[json!(u64::MAX - 1), json!(1)]),
            Ok(json!(u64::MAX))
        );
        assert_eq!(
            SumReducer.reduce(&[json!(u64::MAX), json!(-5), json!(2)]),
            Ok(json!(u64::MAX - 3))
        );
        assert_eq!(
            SumReducer.reduce(&[json!(u64::MAX), json!(1)]),
            Ok(json!(u64::MAX as f64 + 1.0))
        );

        let err = SumReducer.reduce(&[json!(1), json!("two")]).unwrap_err();
        assert!(err.contains("#1"));
    }

    #[test]
    fn test_collect_reducer_keeps_order() {
        assert_eq!(
            CollectReducer.reduce(&[json!("a"), json!({"b": 1})]),
            Ok(json!(["a", {"b": 1}]))
        );
    }

    #[tokio::test]
    async fn test_registry() {
        let registry = ReducerRegistry::with_builtins();
        assert_eq!(registry.names().await, vec!["collect", "sum"]);
        assert!(registry.get("concat").await.is_none());

        registry
            .register(FnReducer::new("concat", |results: &[Value]| {
                Ok(Value::String(
                    results.iter().filter_map(Value::as_str).collect::<String>(),
                ))
            }))
            .await;

        assert!(registry.contains("concat").await);
        let concat = registry.get("concat").await.unwrap();
        assert_eq!(concat.reduce(&[json!("ab"), json!("cd")]), Ok(json!("abcd")));
        assert!(ReducerRegistry::new().names().await.is_empty());
    }
}
