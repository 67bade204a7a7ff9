use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Bson},
    options::{Acknowledgment, ReadConcern, WriteConcern},
};

#[test]
fn write_concern_is_acknowledged() {
    let w_1 = WriteConcern::builder()
        .w(Acknowledgment::Nodes(1))
        .journal(false)
        .build();
    assert!(w_1.is_acknowledged());

    let w_0 = WriteConcern::builder().w(Acknowledgment::Nodes(0)).build();
    assert!(!w_0.is_acknowledged());

    let w_0_fsync = WriteConcern::builder()
        .w(Acknowledgment::Nodes(0))
        .fsync(true)
        .build();
    assert!(w_0_fsync.is_acknowledged());

    let empty = WriteConcern::builder().build();
    assert!(empty.is_acknowledged());
    assert!(empty.is_empty());
}

#[test]
fn write_concern_deserialize() {
    let wc: WriteConcern = bson::from_bson(Bson::Document(doc! { "w": 1 })).unwrap();
    assert_eq!(wc, WriteConcern::nodes(1));

    let wc: WriteConcern =
        bson::from_bson(Bson::Document(doc! { "w": "majority", "wtimeout": 100, "j": true }))
            .unwrap();
    assert_eq!(
        wc,
        WriteConcern::builder()
            .w(Acknowledgment::Majority)
            .w_timeout(Duration::from_millis(100))
            .journal(true)
            .build()
    );

    let wc: WriteConcern = bson::from_bson(Bson::Document(doc! { "w": "tagged" })).unwrap();
    assert_eq!(wc.w, Some(Acknowledgment::Custom("tagged".to_string())));
}

#[test]
fn write_concern_document_shape() {
    let wc = WriteConcern::builder()
        .w(Acknowledgment::Majority)
        .w_timeout(Duration::from_millis(250))
        .journal(true)
        .fsync(false)
        .build();
    assert_eq!(
        wc.to_document(),
        doc! { "w": "majority", "wtimeout": 250, "j": true, "fsync": false }
    );
}

#[test]
fn write_concern_or_prefers_the_more_specific_scope() {
    let call = WriteConcern::builder().w(Acknowledgment::Nodes(2)).build();
    let database = WriteConcern::builder()
        .w(Acknowledgment::Majority)
        .journal(true)
        .build();

    let merged = call.or(&database);
    assert_eq!(merged.w, Some(Acknowledgment::Nodes(2)));
    assert_eq!(merged.journal, Some(true));
    assert_eq!(merged.w_timeout, None);
}

#[test]
fn write_concern_validation() {
    assert!(WriteConcern::nodes(-1).validate().is_err());
    assert!(WriteConcern::builder()
        .w(Acknowledgment::Nodes(0))
        .journal(true)
        .build()
        .validate()
        .is_err());
    assert!(WriteConcern::majority().validate().is_ok());
}

#[test]
fn read_concern_document() {
    assert_eq!(ReadConcern::majority().to_document(), doc! { "level": "majority" });
    assert_eq!(ReadConcern::custom("snapshot").to_document(), doc! { "level": "snapshot" });
}
