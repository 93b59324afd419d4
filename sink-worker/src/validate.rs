use serde_json::Value;

use crate::error::ProcessingError;
use crate::event::Event;
use crate::meter::{MeterAggregation, MeterDefinition};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathStep<'a> {
    Key(&'a str),
    Index(usize),
}

/// Parses the JSON path subset meters use: `$`, `.field`, `['field']`,
/// `["field"]` and `[index]`. Returns None for anything else.
fn parse_path(path: &str) -> Option<Vec<PathStep<'_>>> {
    let mut rest = path.trim().strip_prefix('$')?;
    let mut steps = Vec::new();

    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            let end = after_dot
                .find(['.', '['])
                .unwrap_or(after_dot.len());
            if end == 0 {
                return None;
            }
            steps.push(PathStep::Key(&after_dot[..end]));
            rest = &after_dot[end..];
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let close = after_bracket.find(']')?;
            let inner = &after_bracket[..close];
            let quoted = inner
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
            match quoted {
                Some(key) => steps.push(PathStep::Key(key)),
                None => steps.push(PathStep::Index(inner.trim().parse().ok()?)),
            }
            rest = &after_bracket[close + 1..];
        } else {
            return None;
        }
    }

    Some(steps)
}

/// Looks up `path` in `doc`. None means the path is malformed or does not
/// resolve; an explicit JSON null resolves to `Some(Value::Null)`.
pub fn lookup<'v>(doc: &'v Value, path: &str) -> Option<&'v Value> {
    parse_path(path)?
        .into_iter()
        .try_fold(doc, |current, step| match step {
            PathStep::Key(key) => current.as_object()?.get(key),
            PathStep::Index(i) => current.as_array()?.get(i),
        })
}

fn check_value(meter: &MeterDefinition, value: &Value) -> Result<(), ProcessingError> {
    match (meter.aggregation, value) {
        (_, Value::Null) => Err(ProcessingError::dead_letter("value cannot be null")),
        (MeterAggregation::UniqueCount, Value::String(_) | Value::Number(_)) => Ok(()),
        (MeterAggregation::UniqueCount, _) => Err(ProcessingError::dead_letter(
            "value property must be string or number for unique count",
        )),
        (_, Value::Number(_)) => Ok(()),
        (_, Value::String(s)) if s.parse::<f64>().is_ok() => Ok(()),
        (_, Value::String(_)) => Err(ProcessingError::dead_letter(
            "value property cannot be parsed as float64",
        )),
        _ => Err(ProcessingError::dead_letter(
            "value property must be a number",
        )),
    }
}

/// Checks one event against one meter. Events are only looked inside when the
/// meter aggregates on a value or groups by a property.
pub fn validate_meter(meter: &MeterDefinition, event: &Event) -> Result<(), ProcessingError> {
    if !meter.needs_event_data() {
        return Ok(());
    }

    let data: Value = serde_json::from_str(&event.data)
        .map_err(|_| ProcessingError::dead_letter("cannot unmarshal event data as json"))?;

    if meter.aggregation != MeterAggregation::Count {
        let value = lookup(&data, &meter.value_property).ok_or_else(|| {
            ProcessingError::dead_letter(format!(
                "missing value property at {}",
                meter.value_property
            ))
        })?;
        check_value(meter, value)?;
    }

    for (key, path) in &meter.group_by {
        match lookup(&data, path) {
            None => {
                return Err(ProcessingError::dead_letter(format!(
                    "missing group by property {key} at {path}"
                )))
            }
            Some(Value::Null) => {
                return Err(ProcessingError::dead_letter(format!(
                    "group by property {key} cannot be null"
                )))
            }
            Some(_) => {}
        }
    }

    Ok(())
}
