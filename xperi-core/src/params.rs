// Request parameter map and the numeric coercion applied on merge

use serde_json::{Map, Number, Value};

/// Per-request parameter map. Keys are unique; the last write wins.
pub type Params = Map<String, Value>;

/// Coerce a raw captured value: numbers become JSON numbers, anything else
/// stays a string.
pub fn coerce(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    let numeric_chars = raw
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if numeric_chars && raw.chars().any(|c| c.is_ascii_digit()) {
        if let Some(n) = raw
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .and_then(Number::from_f64)
        {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

/// Merge `incoming` into `target`. String values go through [`coerce`];
/// objects, arrays and other values are stored as given.
pub fn merge(target: &mut Params, incoming: Params) {
    for (key, value) in incoming {
        let value = match value {
            Value::String(s) => coerce(&s),
            other => other,
        };
        target.insert(key, value);
    }
}

/// Build a [`Params`] map from `(name, raw)` pairs without coercion.
pub fn from_pairs<I, K, V>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), Value::String(v.into())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_integers_and_strings() {
        assert_eq!(coerce("42"), json!(42));
        assert_eq!(coerce("-7"), json!(-7));
        assert_eq!(coerce("0"), json!(0));
        assert_eq!(coerce("abc"), json!("abc"));
        assert_eq!(coerce("12abc"), json!("12abc"));
        assert_eq!(coerce("my-slug"), json!("my-slug"));
    }

    #[test]
    fn test_coerce_floats() {
        assert_eq!(coerce("1.5"), json!(1.5));
        assert_eq!(coerce("1e3"), json!(1000.0));
        // words f64::from_str would otherwise accept
        assert_eq!(coerce("inf"), json!("inf"));
        assert_eq!(coerce("NaN"), json!("NaN"));
        assert_eq!(coerce("-"), json!("-"));
        assert_eq!(coerce("e"), json!("e"));
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let mut params = from_pairs([("id", "1")]);
        merge(&mut params, from_pairs([("id", "2"), ("name", "bob")]));
        assert_eq!(params["id"], json!(2));
        assert_eq!(params["name"], json!("bob"));
    }

    #[test]
    fn test_merge_keeps_structured_values() {
        let mut params = Params::new();
        let mut incoming = Params::new();
        incoming.insert("filter".into(), json!({"active": true}));
        incoming.insert("flag".into(), json!(false));
        merge(&mut params, incoming);
        assert_eq!(params["filter"], json!({"active": true}));
        assert_eq!(params["flag"], json!(false));
    }
}
