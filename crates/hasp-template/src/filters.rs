//! Filters and functions available to plate templates
//!
//! Kept to what widget properties and service data commonly need: number
//! coercion, rounding, JSON and clock access.

use chrono::{DateTime, Local, Utc};
use minijinja::value::{Kwargs, Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind, State};
use std::fmt;
use std::sync::Arc;

fn value_to_f64(value: &Value) -> Option<f64> {
    f64::try_from(value.clone())
        .ok()
        .or_else(|| value.as_i64().map(|i| i as f64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn is_missing(value: &Value) -> bool {
    value.is_undefined() || value.is_none() || value.as_str() == Some("")
}

/// `| int(default)`: strings like `"23.7"` truncate to `23`
pub fn to_int(value: Value, default: Option<Value>) -> Value {
    let parsed = if is_missing(&value) {
        None
    } else if let Some(i) = value.as_i64() {
        Some(i)
    } else if let Some(s) = value.as_str() {
        s.trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64))
    } else {
        value_to_f64(&value).map(|f| f as i64)
    };

    match parsed {
        Some(i) => Value::from(i),
        None => default.unwrap_or(Value::from(0)),
    }
}

/// `| float(default)`
pub fn to_float(value: Value, default: Option<Value>) -> Value {
    let parsed = if is_missing(&value) {
        None
    } else {
        value_to_f64(&value)
    };

    match parsed {
        Some(f) => Value::from(f),
        None => default.unwrap_or(Value::from(0.0)),
    }
}

/// `| bool`: HA truthy strings (`on`, `true`, `yes`, `1`) are true
pub fn to_bool(value: Value) -> bool {
    match value.as_str() {
        Some(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "on" | "true" | "yes" | "1" | "enable"
        ),
        None => value.is_true(),
    }
}

/// `| round(precision, method='common'|'ceil'|'floor'|'half')`
pub fn round_filter(value: f64, precision: Option<i32>, kwargs: Kwargs) -> Result<f64, Error> {
    let multiplier = 10_f64.powi(precision.unwrap_or(0));
    let method: Option<String> = kwargs.get("method")?;
    kwargs.assert_all_used()?;

    let scaled = value * multiplier;
    let rounded = match method.as_deref() {
        None | Some("common") => scaled.round(),
        Some("ceil") => scaled.ceil(),
        Some("floor") => scaled.floor(),
        Some("half") => (scaled * 2.0).round() / 2.0,
        Some(other) => {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("unknown rounding method '{other}'"),
            ))
        }
    };

    Ok(rounded / multiplier)
}

pub fn abs_filter(value: f64) -> f64 {
    value.abs()
}

pub fn to_json(value: Value) -> Result<String, Error> {
    serde_json::to_string(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("JSON error: {e}")))
}

pub fn from_json(value: &str) -> Result<Value, Error> {
    let json: serde_json::Value = serde_json::from_str(value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("invalid JSON: {e}")))?;
    Ok(Value::from_serialize(&json))
}

/// `is number` test, also true for numeric strings
pub fn is_number(value: Value) -> bool {
    value.as_i64().is_some()
        || f64::try_from(value.clone()).is_ok()
        || value
            .as_str()
            .is_some_and(|s| s.trim().parse::<f64>().is_ok())
}

/// Inline if: `iif(cond, if_true, if_false, if_none)`
pub fn iif(
    condition: Value,
    if_true: Option<Value>,
    if_false: Option<Value>,
    if_none: Option<Value>,
) -> Value {
    if condition.is_none() || condition.is_undefined() {
        if_none.unwrap_or_else(|| if_false.clone().unwrap_or(Value::from(false)))
    } else if condition.is_true() {
        if_true.unwrap_or(Value::from(true))
    } else {
        if_false.unwrap_or(Value::from(false))
    }
}

pub fn now() -> Value {
    Value::from_object(DateTimeWrapper(Local::now().fixed_offset()))
}

pub fn utcnow() -> Value {
    Value::from_object(DateTimeWrapper(Utc::now().fixed_offset()))
}

/// Datetime exposed to templates, e.g. `now().hour` or `now().strftime('%H:%M')`
#[derive(Debug)]
pub struct DateTimeWrapper(pub DateTime<chrono::FixedOffset>);

impl Object for DateTimeWrapper {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        use chrono::{Datelike, Timelike};

        let dt = &self.0;
        let value = match key.as_str()? {
            "year" => dt.year() as i64,
            "month" => dt.month() as i64,
            "day" => dt.day() as i64,
            "hour" => dt.hour() as i64,
            "minute" => dt.minute() as i64,
            "second" => dt.second() as i64,
            "weekday" => dt.weekday().num_days_from_monday() as i64,
            _ => return None,
        };
        Some(Value::from(value))
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "strftime" => {
                let format = args.first().and_then(|v| v.as_str()).ok_or_else(|| {
                    Error::new(ErrorKind::MissingArgument, "strftime requires a format")
                })?;
                Ok(Value::from(self.0.format(format).to_string()))
            }
            "timestamp" => Ok(Value::from(self.0.timestamp())),
            "isoformat" => Ok(Value::from(self.0.to_rfc3339())),
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("datetime has no method '{method}'"),
            )),
        }
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.6f%:z"))
    }
}
