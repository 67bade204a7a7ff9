use std::time::Duration;

use crate::{
    bson::{Bson, Document},
    error::{Error, Result},
};

/// Any BSON number with an integral value as an `i64`. `2.0` qualifies, `2.5` and non-numbers
/// do not.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn get_int(val: &Bson) -> Option<i64> {
    match *val {
        Bson::Int32(n) => Some(n.into()),
        Bson::Int64(n) => Some(n),
        Bson::Double(x) if x.fract() == 0.0 && x.is_finite() => Some(x as i64),
        _ => None,
    }
}

/// Interprets a server "truthy" value: booleans as-is, numbers as non-zero.
pub(crate) fn get_truthy(val: &Bson) -> bool {
    match val {
        Bson::Boolean(b) => *b,
        other => get_int(other).map(|i| i != 0).unwrap_or(false),
    }
}

pub(crate) fn to_bson_array(documents: &[Document]) -> Bson {
    documents.iter().cloned().map(Bson::Document).collect::<Vec<_>>().into()
}

pub(crate) fn first_key(document: &Document) -> Option<&str> {
    document.keys().next().map(String::as_str)
}

/// Update documents are made of operators; a plain document would replace the target instead.
pub(crate) fn update_document_check(update: &Document) -> Result<()> {
    if first_key(update).is_some_and(|key| key.starts_with('$')) {
        return Ok(());
    }
    Err(Error::invalid_argument(
        "an update document must consist of update operators such as $set",
    ))
}

/// Milliseconds as a BSON integer, widening to `Int64` when needed.
pub(crate) fn duration_to_millis_bson(duration: Duration) -> Bson {
    let millis = duration.as_millis();
    if millis > i32::MAX as u128 {
        Bson::Int64(i64::try_from(millis).unwrap_or(i64::MAX))
    } else {
        Bson::Int32(millis as i32)
    }
}

#[cfg(test)]
mod test {
    use crate::bson::{doc, Bson};

    use super::{first_key, get_int, get_truthy};

    #[test]
    fn coerces_numeric_values() {
        assert_eq!(get_int(&Bson::Int32(5)), Some(5));
        assert_eq!(get_int(&Bson::Double(5.0)), Some(5));
        assert_eq!(get_int(&Bson::Double(5.5)), None);
        assert_eq!(get_int(&Bson::String("5".into())), None);
    }

    #[test]
    fn truthiness_follows_server_conventions() {
        assert!(get_truthy(&Bson::Boolean(true)));
        assert!(get_truthy(&Bson::Double(1.0)));
        assert!(!get_truthy(&Bson::Int32(0)));
        assert!(!get_truthy(&Bson::Null));
    }

    #[test]
    fn first_key_respects_insertion_order() {
        let doc = doc! { "find": "coll", "filter": {} };
        assert_eq!(first_key(&doc), Some("find"));
    }
}
