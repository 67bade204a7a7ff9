//! Contains all of the types needed to specify options to topology methods.
//!
//! Most of the options structs in this module use the
//! [`typed-builder`](https://crates.io/crates/typed-builder) crate to derive a type-safe builder
//! API on them.

pub use crate::{
    auth::Credential,
    client_options::{ClientOptions, ServerAddress, TlsOptions},
    concern::{Acknowledgment, ReadConcern, ReadConcernLevel, WriteConcern},
    cursor::{
        options::{
            AggregateOptions,
            CountOptions,
            CursorFlag,
            CursorOption,
            FindOptions,
            Hint,
            ListCollectionsOptions,
        },
        sort::SortSpec,
    },
    operation::{DeleteModel, UpdateModel},
    router::{CommandOptions, OperationScope, ReadPreferenceSpec, ScopeDefaults, WriteOptions},
    selection_criteria::{Predicate, ReadPreference, ReadPreferenceOptions, SelectionCriteria, TagSet},
};
