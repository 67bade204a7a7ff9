use std::{fmt, str::FromStr};

use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// `<database>.<collection>`, the full name of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    #[allow(missing_docs)]
    pub db: String,

    #[allow(missing_docs)]
    pub coll: String,
}

impl Namespace {
    #[allow(missing_docs)]
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// The namespace generic commands are addressed to, i.e. `<db>.$cmd`.
    pub fn command(db: impl Into<String>) -> Self {
        Self::new(db, "$cmd")
    }

    /// Whether this namespace addresses the database rather than a collection.
    pub fn is_command(&self) -> bool {
        self.coll == "$cmd"
    }
}

impl FromStr for Namespace {
    type Err = Error;

    /// Splits on the first `.`; collection names may contain further dots.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(Error::invalid_argument(format!(
                "invalid namespace {:?}: expected \"<database>.<collection>\"",
                s
            ))),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| D::Error::custom("Missing one or more fields in namespace"))
    }
}

impl Serialize for Namespace {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::Namespace;

    #[test]
    fn splits_on_first_dot() {
        let ns: Namespace = "app.system.views".parse().unwrap();
        assert_eq!(ns, Namespace::new("app", "system.views"));
        assert_eq!(ns.to_string(), "app.system.views");
    }

    #[test]
    fn rejects_missing_parts() {
        assert!("app".parse::<Namespace>().is_err());
        assert!(".coll".parse::<Namespace>().is_err());
        assert!("app.".parse::<Namespace>().is_err());
    }
}
