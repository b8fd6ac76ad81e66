//! Pure functions over parameter values used by format negotiation.

use crate::{Choice, ChoiceType, Object, Property, Value};

/// Collapse every choice in the value to its default.
///
/// # Examples
///
/// ```
/// use pod::{fixate, Choice, Value};
///
/// let value = Value::choice(Choice::enumeration(
///     Value::Int(48000),
///     [Value::Int(44100), Value::Int(96000)],
/// ));
///
/// assert_eq!(fixate(&value), Value::Int(48000));
/// ```
pub fn fixate(value: &Value) -> Value {
    match value {
        Value::Choice(choice) => match choice.default() {
            Some(default) => fixate(default),
            None => Value::None,
        },
        Value::Object(object) => {
            let properties = object
                .properties
                .iter()
                .map(|p| Property {
                    key: p.key,
                    flags: p.flags,
                    value: fixate(&p.value),
                })
                .collect();

            Value::Object(Object {
                object_type: object.object_type,
                object_id: object.object_id,
                properties,
            })
        }
        Value::Struct(fields) => Value::Struct(fields.iter().map(fixate).collect()),
        value => value.clone(),
    }
}

/// Intersect a value with a filter.
///
/// Properties present on only one side pass through unchanged; properties
/// present on both sides must have a non-empty intersection or the whole
/// filter fails. The result prefers defaults from the left-hand side.
///
/// # Examples
///
/// ```
/// use pod::{filter, Choice, Value};
///
/// let a = Value::choice(Choice::enumeration(
///     Value::Int(48000),
///     [Value::Int(44100), Value::Int(96000)],
/// ));
///
/// assert_eq!(filter(&a, &Value::Int(44100)), Some(Value::Int(44100)));
/// assert_eq!(filter(&a, &Value::Int(8000)), None);
/// ```
pub fn filter(value: &Value, filter: &Value) -> Option<Value> {
    match (value, filter) {
        (Value::Object(a), Value::Object(b)) => {
            if a.object_type != b.object_type {
                return None;
            }

            let mut properties = Vec::new();

            for p in &a.properties {
                let value = match b.property(p.key) {
                    Some(other) => intersect(&p.value, other)?,
                    None => p.value.clone(),
                };

                properties.push(Property {
                    key: p.key,
                    flags: p.flags,
                    value,
                });
            }

            // Restrictions only present in the filter narrow the result.
            for p in &b.properties {
                if a.property(p.key).is_none() {
                    properties.push(p.clone());
                }
            }

            Some(Value::Object(Object {
                object_type: a.object_type,
                object_id: a.object_id,
                properties,
            }))
        }
        (a, b) => intersect(a, b),
    }
}

fn intersect(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Choice(a), Value::Choice(b)) => intersect_choices(a, b),
        (Value::Choice(choice), plain) => narrow(choice, plain),
        (plain, Value::Choice(choice)) => narrow(choice, plain),
        (a, b) => {
            if a == b {
                Some(a.clone())
            } else {
                None
            }
        }
    }
}

/// Narrow a choice against a plain value.
fn narrow(choice: &Choice, plain: &Value) -> Option<Value> {
    match choice.kind {
        ChoiceType::NONE => {
            let default = choice.default()?;
            intersect(default, plain)
        }
        ChoiceType::ENUM | ChoiceType::FLAGS => {
            if choice.values.contains(plain) {
                Some(plain.clone())
            } else {
                None
            }
        }
        ChoiceType::RANGE | ChoiceType::STEP => {
            let min = choice.values.get(1)?;
            let max = choice.values.get(2)?;

            if in_range(plain, min, max) {
                Some(plain.clone())
            } else {
                None
            }
        }
        _ => None,
    }
}

fn intersect_choices(a: &Choice, b: &Choice) -> Option<Value> {
    match (a.kind, b.kind) {
        (ChoiceType::ENUM, ChoiceType::ENUM) => {
            let common: Vec<Value> = a
                .values
                .iter()
                .filter(|v| b.values.contains(v))
                .cloned()
                .collect();

            let default = common.first()?.clone();

            if common.len() == 1 {
                return Some(default);
            }

            let alternatives = common.into_iter().skip(1);
            Some(Value::choice(Choice::enumeration(default, alternatives)))
        }
        (ChoiceType::RANGE, ChoiceType::RANGE) => {
            let (a_def, a_min, a_max) = range_of(a)?;
            let (_, b_min, b_max) = range_of(b)?;

            let min = if value_cmp(a_min, b_min)? == core::cmp::Ordering::Less {
                b_min
            } else {
                a_min
            };

            let max = if value_cmp(a_max, b_max)? == core::cmp::Ordering::Greater {
                b_max
            } else {
                a_max
            };

            if value_cmp(min, max)? == core::cmp::Ordering::Greater {
                return None;
            }

            let default = if in_range(a_def, min, max) {
                a_def.clone()
            } else {
                min.clone()
            };

            Some(Value::choice(Choice::range(
                default,
                min.clone(),
                max.clone(),
            )))
        }
        (ChoiceType::ENUM, _) => {
            let default = a.default()?;
            narrow(b, default).or_else(|| {
                a.values
                    .iter()
                    .find_map(|v| narrow(b, v))
            })
        }
        (_, ChoiceType::ENUM) => {
            let default = b.default()?;
            narrow(a, default).or_else(|| {
                b.values
                    .iter()
                    .find_map(|v| narrow(a, v))
            })
        }
        _ => None,
    }
}

fn range_of(choice: &Choice) -> Option<(&Value, &Value, &Value)> {
    match &choice.values[..] {
        [default, min, max, ..] => Some((default, min, max)),
        _ => None,
    }
}

fn in_range(value: &Value, min: &Value, max: &Value) -> bool {
    matches!(
        (value_cmp(value, min), value_cmp(value, max)),
        (
            Some(core::cmp::Ordering::Greater | core::cmp::Ordering::Equal),
            Some(core::cmp::Ordering::Less | core::cmp::Ordering::Equal),
        )
    )
}

fn value_cmp(a: &Value, b: &Value) -> Option<core::cmp::Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Long(a), Value::Long(b)) => Some(a.cmp(b)),
        (Value::Id(a), Value::Id(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        (Value::Fraction(a), Value::Fraction(b)) => {
            let left = u64::from(a.num) * u64::from(b.denom);
            let right = u64::from(b.num) * u64::from(a.denom);
            Some(left.cmp(&right))
        }
        _ => None,
    }
}
