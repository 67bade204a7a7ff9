use crate::{
    bson::{Bson, Document},
    bson_util,
    error::{Error, Result},
};

/// A sort clause in any of the shapes callers pass.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum SortSpec {
    /// A sort document, used as is.
    Document(Document),

    /// A single field sorted ascending.
    Field(String),

    /// `(field, direction)` pairs in order. Directions are `1`, `-1`, `"asc"`, `"ascending"`,
    /// `"desc"` or `"descending"`.
    Pairs(Vec<(String, Bson)>),
}

impl From<Document> for SortSpec {
    fn from(document: Document) -> Self {
        Self::Document(document)
    }
}

impl From<&str> for SortSpec {
    fn from(field: &str) -> Self {
        Self::Field(field.to_string())
    }
}

impl From<String> for SortSpec {
    fn from(field: String) -> Self {
        Self::Field(field)
    }
}

impl<K: Into<String>, V: Into<Bson>> From<Vec<(K, V)>> for SortSpec {
    fn from(pairs: Vec<(K, V)>) -> Self {
        Self::Pairs(
            pairs
                .into_iter()
                .map(|(field, direction)| (field.into(), direction.into()))
                .collect(),
        )
    }
}

impl SortSpec {
    /// Converts the clause into the sort document sent to the server.
    pub(crate) fn normalize(self) -> Result<Document> {
        match self {
            Self::Document(document) => Ok(document),
            Self::Field(field) => {
                let mut document = Document::new();
                document.insert(field, 1);
                Ok(document)
            }
            Self::Pairs(pairs) => {
                let mut document = Document::new();
                for (field, direction) in pairs {
                    let direction = normalize_direction(&direction).ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "Illegal sort clause, must be of the form [['field1', '(ascending|descending)'], ['field2', '(ascending|descending)']]; got direction {} for field {}",
                            direction, field
                        ))
                    })?;
                    document.insert(field, direction);
                }
                Ok(document)
            }
        }
    }
}

fn normalize_direction(direction: &Bson) -> Option<i32> {
    if let Bson::String(ref s) = direction {
        return match s.to_lowercase().as_str() {
            "asc" | "ascending" | "1" => Some(1),
            "desc" | "descending" | "-1" => Some(-1),
            _ => None,
        };
    }

    match bson_util::get_int(direction) {
        Some(1) => Some(1),
        Some(-1) => Some(-1),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::SortSpec;
    use crate::bson::doc;

    #[test]
    fn field_names_sort_ascending() {
        assert_eq!(SortSpec::from("age").normalize().unwrap(), doc! { "age": 1 });
    }

    #[test]
    fn documents_pass_through() {
        let sort = doc! { "a": -1, "b": { "$meta": "textScore" } };
        assert_eq!(SortSpec::from(sort.clone()).normalize().unwrap(), sort);
    }

    #[test]
    fn pair_directions_are_normalized_in_order() {
        let spec = SortSpec::from(vec![
            ("a", crate::bson::Bson::from("ASC")),
            ("b", "descending".into()),
            ("c", (-1_i64).into()),
            ("d", 1.0.into()),
        ]);
        let sorted = spec.normalize().unwrap();

        assert_eq!(sorted, doc! { "a": 1, "b": -1, "c": -1, "d": 1 });
        assert_eq!(sorted.keys().collect::<Vec<_>>(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn unknown_directions_are_rejected() {
        let error = SortSpec::from(vec![("a", "sideways")]).normalize().unwrap_err();
        assert!(error.is_usage_error());

        let error = SortSpec::from(vec![("a", 2)]).normalize().unwrap_err();
        assert!(error.to_string().contains("Illegal sort clause"));
    }
}
