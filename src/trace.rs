use crate::{
    bson::{Bson, Document},
    options::ServerAddress,
    selection_criteria::SelectionCriteria,
};

pub(crate) mod command;
pub(crate) mod topology;

pub(crate) const COMMAND_TRACING_EVENT_TARGET: &str = "mongodb_core::command";
pub(crate) const CONNECTION_TRACING_EVENT_TARGET: &str = "mongodb_core::connection";
pub(crate) const CURSOR_TRACING_EVENT_TARGET: &str = "mongodb_core::cursor";
pub(crate) const TOPOLOGY_TRACING_EVENT_TARGET: &str = "mongodb_core::topology";

/// Commands and replies longer than this are truncated in log output.
pub(crate) const DEFAULT_MAX_DOCUMENT_LENGTH_BYTES: usize = 1000;

pub(crate) trait TracingRepresentation {
    type Representation;

    fn tracing_representation(&self) -> Self::Representation;
}

impl TracingRepresentation for Document {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        Bson::Document(self.clone())
            .into_relaxed_extjson()
            .to_string()
    }
}

impl TracingRepresentation for crate::error::Error {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}

impl TracingRepresentation for SelectionCriteria {
    type Representation = String;

    fn tracing_representation(&self) -> Self::Representation {
        self.to_string()
    }
}

impl TracingRepresentation for ServerAddress {
    type Representation = String;

    fn tracing_representation(&self) -> Self::Representation {
        self.to_string()
    }
}

/// Serializes a document to extended JSON, truncated to at most `max_length_bytes` bytes on a
/// character boundary.
pub(crate) fn serialize_command_or_reply(doc: &Document, max_length_bytes: usize) -> String {
    let mut serialized = doc.tracing_representation();
    truncate_on_char_boundary(&mut serialized, max_length_bytes);
    serialized
}

/// Cuts `s` down to at most `max_len` bytes, backing off to the previous character boundary,
/// and marks the cut with `...`.
pub(crate) fn truncate_on_char_boundary(s: &mut String, max_len: usize) {
    if s.len() <= max_len {
        return;
    }
    let end = (0..=max_len)
        .rev()
        .find(|&index| s.is_char_boundary(index))
        .unwrap_or(0);
    s.truncate(end);
    s.push_str("...");
}

#[cfg(test)]
mod test {
    use super::truncate_on_char_boundary;

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut s = "héllo".to_string();
        truncate_on_char_boundary(&mut s, 2);
        assert_eq!(s, "h...");

        let mut short = "abc".to_string();
        truncate_on_char_boundary(&mut short, 10);
        assert_eq!(short, "abc");
    }
}
