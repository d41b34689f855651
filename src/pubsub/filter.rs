//! Фильтры подписок.
//!
//! Фильтр — предикат `(message, topic, meta, subscription) -> bool`. Его можно
//! передать напрямую или описать декларативно (JSON-дескриптор) и отдать
//! [`FilterCompiler`], который внедряется в брокер.
//!
//! Стратегии:
//! - [`PredicateOnly`] (по умолчанию) принимает только готовые предикаты;
//! - [`QueryCompiler`] понимает дескрипторы вида `{"foo": {"$gt": 7}}`.

use std::{cmp::Ordering, fmt, rc::Rc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Meta, Payload, Subscription};
use crate::error::{PubSubError, PubSubResult};

/// Предикат фильтра.
pub type Predicate = Rc<dyn Fn(&Payload, &str, &Meta, &Subscription) -> bool>;

/// Что можно передать в [`Subscription::set_filter`].
#[derive(Clone)]
pub enum FilterSpec {
    Predicate(Predicate),
    Descriptor(Value),
}

impl FilterSpec {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Payload, &str, &Meta, &Subscription) -> bool + 'static,
    {
        FilterSpec::Predicate(Rc::new(f))
    }
}

impl From<Value> for FilterSpec {
    fn from(descriptor: Value) -> Self {
        FilterSpec::Descriptor(descriptor)
    }
}

impl From<Predicate> for FilterSpec {
    fn from(predicate: Predicate) -> Self {
        FilterSpec::Predicate(predicate)
    }
}

impl fmt::Debug for FilterSpec {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            FilterSpec::Predicate(_) => f.write_str("FilterSpec::Predicate(..)"),
            FilterSpec::Descriptor(d) => write!(f, "FilterSpec::Descriptor({d})"),
        }
    }
}

/// Установленный фильтр: предикат и, если он получен компиляцией,
/// исходный дескриптор (для сериализации подписки).
#[derive(Clone)]
pub(crate) struct Filter {
    pub(crate) predicate: Predicate,
    pub(crate) descriptor: Option<Value>,
}

/// Компиляция декларативного дескриптора в предикат.
pub trait FilterCompiler {
    /// Имя стратегии (для логов).
    fn name(&self) -> &'static str;

    /// Ошибка компиляции должна быть [`PubSubError::InvalidConfiguration`].
    fn compile(
        &self,
        descriptor: &Value,
    ) -> PubSubResult<Predicate>;
}

/// Стратегия по умолчанию: дескрипторы не поддерживаются.
#[derive(Debug, Default, Clone, Copy)]
pub struct PredicateOnly;

impl FilterCompiler for PredicateOnly {
    fn name(&self) -> &'static str {
        "predicate_only"
    }

    fn compile(
        &self,
        descriptor: &Value,
    ) -> PubSubResult<Predicate> {
        Err(PubSubError::InvalidConfiguration(format!(
            "filter descriptors are not supported, got {descriptor}"
        )))
    }
}

/// Выбор стратегии компиляции фильтров из конфигурации.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilerKind {
    #[default]
    PredicateOnly,
    Query,
}

impl CompilerKind {
    pub fn build(self) -> Rc<dyn FilterCompiler> {
        match self {
            CompilerKind::PredicateOnly => Rc::new(PredicateOnly),
            CompilerKind::Query => Rc::new(QueryCompiler),
        }
    }
}

/// Компилятор запросов в стиле документных БД.
///
/// Дескриптор — объект `{ "<путь>": <условие>, ... }`, все поля должны
/// совпасть. Путь — поля сообщения через точку (`user.age`), числовой
/// сегмент индексирует массив. Условие — литерал (равенство) или объект
/// операторов: `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`,
/// `$exists`.
///
/// Числа сравниваются как `f64`, строки лексикографически; операторы
/// порядка для разных типов всегда ложны.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryCompiler;

#[derive(Debug, Clone)]
enum Condition {
    Eq(Value),
    Ne(Value),
    Cmp(Ordering, bool, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
}

#[derive(Debug, Clone)]
struct FieldQuery {
    path: Vec<String>,
    conditions: Vec<Condition>,
}

impl FilterCompiler for QueryCompiler {
    fn name(&self) -> &'static str {
        "query"
    }

    fn compile(
        &self,
        descriptor: &Value,
    ) -> PubSubResult<Predicate> {
        let fields = descriptor
            .as_object()
            .ok_or_else(|| invalid(format!("filter descriptor must be an object, got {descriptor}")))?;

        let mut queries = Vec::with_capacity(fields.len());
        for (path, condition) in fields {
            if path.is_empty() || path.starts_with('$') {
                return Err(invalid(format!("unsupported filter field {path:?}")));
            }
            queries.push(FieldQuery {
                path: path.split('.').map(str::to_string).collect(),
                conditions: parse_conditions(condition)?,
            });
        }

        Ok(Rc::new(move |message: &Payload, _: &str, _: &Meta, _: &Subscription| {
            queries.iter().all(|q| q.matches(message))
        }))
    }
}

fn invalid(msg: String) -> PubSubError {
    PubSubError::InvalidConfiguration(msg)
}

fn parse_conditions(condition: &Value) -> PubSubResult<Vec<Condition>> {
    let operators = match condition.as_object() {
        Some(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
        _ => return Ok(vec![Condition::Eq(condition.clone())]),
    };

    operators
        .iter()
        .map(|(op, arg)| {
            let parsed = match op.as_str() {
                "$eq" => Condition::Eq(arg.clone()),
                "$ne" => Condition::Ne(arg.clone()),
                "$gt" => Condition::Cmp(Ordering::Greater, false, arg.clone()),
                "$gte" => Condition::Cmp(Ordering::Greater, true, arg.clone()),
                "$lt" => Condition::Cmp(Ordering::Less, false, arg.clone()),
                "$lte" => Condition::Cmp(Ordering::Less, true, arg.clone()),
                "$in" | "$nin" => {
                    let items = arg
                        .as_array()
                        .ok_or_else(|| invalid(format!("{op} expects an array, got {arg}")))?
                        .clone();
                    if op == "$in" {
                        Condition::In(items)
                    } else {
                        Condition::Nin(items)
                    }
                }
                "$exists" => Condition::Exists(
                    arg.as_bool()
                        .ok_or_else(|| invalid(format!("$exists expects a boolean, got {arg}")))?,
                ),
                other => return Err(invalid(format!("unknown filter operator {other:?}"))),
            };
            Ok(parsed)
        })
        .collect()
}

impl FieldQuery {
    fn matches(
        &self,
        message: &Payload,
    ) -> bool {
        let found = lookup(message, &self.path);
        self.conditions.iter().all(|c| c.holds(found))
    }
}

impl Condition {
    fn holds(
        &self,
        found: Option<&Value>,
    ) -> bool {
        match self {
            Condition::Eq(expected) => found.is_some_and(|v| loose_eq(v, expected)),
            Condition::Ne(expected) => !found.is_some_and(|v| loose_eq(v, expected)),
            Condition::Cmp(want, or_equal, bound) => match found.and_then(|v| compare(v, bound)) {
                Some(Ordering::Equal) => *or_equal,
                Some(ord) => ord == *want,
                None => false,
            },
            Condition::In(items) => found.is_some_and(|v| items.iter().any(|i| loose_eq(v, i))),
            Condition::Nin(items) => !found.is_some_and(|v| items.iter().any(|i| loose_eq(v, i))),
            Condition::Exists(expected) => found.is_some() == *expected,
        }
    }
}

fn lookup<'a>(
    value: &'a Value,
    path: &[String],
) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn loose_eq(
    a: &Value,
    b: &Value,
) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(
    a: &Value,
    b: &Value,
) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pubsub::{Broker, MessageBus};

    fn eval(
        descriptor: Value,
        message: Value,
    ) -> bool {
        let predicate = QueryCompiler.compile(&descriptor).unwrap();
        let broker = Broker::new();
        let sub = broker.subscribe("t").unwrap();
        predicate(&message, "t", &Meta::new(), &sub)
    }

    #[test]
    fn test_predicate_only_rejects_descriptors() {
        let err = PredicateOnly.compile(&json!({"a": 1})).err().unwrap();
        assert!(matches!(err, PubSubError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_equality_and_nested_paths() {
        assert!(eval(json!({"hello": "world"}), json!({"hello": "world"})));
        assert!(!eval(json!({"hello": "NOPE"}), json!({"hello": "world"})));
        assert!(eval(json!({"user.age": 30}), json!({"user": {"age": 30.0}})));
        assert!(eval(json!({"items.1": "b"}), json!({"items": ["a", "b"]})));
        assert!(!eval(json!({"user.age": 30}), json!("not an object")));
    }

    #[test]
    fn test_ordering_operators() {
        let d = json!({"foo": {"$gt": 7}});
        assert!(eval(d.clone(), json!({"foo": 8})));
        assert!(!eval(d.clone(), json!({"foo": 7})));
        assert!(!eval(d, json!({"foo": "8"})));

        let range = json!({"foo": {"$gte": 1, "$lt": 3}});
        assert!(eval(range.clone(), json!({"foo": 1})));
        assert!(eval(range.clone(), json!({"foo": 2.5})));
        assert!(!eval(range, json!({"foo": 3})));

        assert!(eval(json!({"name": {"$lte": "m"}}), json!({"name": "alice"})));
    }

    #[test]
    fn test_membership_and_existence() {
        assert!(eval(json!({"k": {"$in": [1, 2]}}), json!({"k": 2})));
        assert!(!eval(json!({"k": {"$in": [1, 2]}}), json!({"k": 3})));
        assert!(eval(json!({"k": {"$nin": [1, 2]}}), json!({})));
        assert!(eval(json!({"k": {"$exists": false}}), json!({"j": 1})));
        assert!(!eval(json!({"k": {"$exists": true}}), json!({"j": 1})));
        assert!(eval(json!({"k": {"$ne": 1}}), json!({})));
    }

    /// Тест проверяет, что некорректные дескрипторы дают
    /// `InvalidConfiguration`.
    #[test]
    fn test_invalid_descriptors() {
        for bad in [
            json!("string"),
            json!({"a": {"$regex": "x"}}),
            json!({"a": {"$in": 1}}),
            json!({"a": {"$exists": "yes"}}),
            json!({"$or": []}),
        ] {
            let err = QueryCompiler.compile(&bad).err();
            assert!(
                matches!(err, Some(PubSubError::InvalidConfiguration(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_compiler_kind_build() {
        assert_eq!(CompilerKind::default().build().name(), "predicate_only");
        assert_eq!(CompilerKind::Query.build().name(), "query");
        let kind: CompilerKind = serde_json::from_value(json!("query")).unwrap();
        assert_eq!(kind, CompilerKind::Query);
    }
}
