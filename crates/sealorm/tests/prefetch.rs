mod common;

use common::{assert_violation, pk, pks, strict};
use sealorm::{Prefetch, Record, prefetch_related_objects, row};
use serde_json::json;

fn single(f: &common::Fixture, record: &Record, name: &str) -> Record {
    record
        .related(&f.session, name)
        .unwrap()
        .unwrap_or_else(|| panic!("{name} is empty"))
}

fn members(f: &common::Fixture, record: &Record, name: &str) -> Vec<Record> {
    record
        .related_set(&f.session, name)
        .unwrap()
        .fetch_all(&f.session)
        .unwrap()
}

#[test]
fn prefetched_foreign_key_is_sealed() {
    let f = strict();
    let (sea_lion, fetches) = f.fetches(|| {
        f.session
            .objects("SeaLion")
            .unwrap()
            .prefetch_related(["location"])
            .seal()
            .unwrap()
            .get(&f.session)
            .unwrap()
    });
    assert_eq!(fetches, 2);

    let (location, fetches) = f.fetches(|| single(&f, &sea_lion, "location"));
    assert_eq!(fetches, 0);
    assert!(location.is_sealed());
    assert_violation(
        location.related_set(&f.session, "climates").unwrap().fetch_all(&f.session),
        "Attempt to fetch many-to-many field \"climates\" on sealed <Location instance>",
    );
}

#[test]
fn nested_prefetch_fetches_once_per_hop() {
    let f = strict();
    let (sea_lion, fetches) = f.fetches(|| {
        f.session
            .objects("SeaLion")
            .unwrap()
            .prefetch_related(["location__climates"])
            .seal()
            .unwrap()
            .get(&f.session)
            .unwrap()
    });
    assert_eq!(fetches, 3);

    let (climates, fetches) = f.fetches(|| {
        let location = single(&f, &sea_lion, "location");
        members(&f, &location, "climates")
    });
    assert_eq!(fetches, 0);
    assert_eq!(pks(&climates), vec![json!(1)]);
    assert!(climates[0].is_sealed());
    assert_eq!(climates[0].value(&f.session, "temperature").unwrap(), json!(100));
    assert!(f.log.is_empty());
}

#[test]
fn prefetch_through_eager_join() {
    let f = strict();
    let (sea_lion, fetches) = f.fetches(|| {
        f.session
            .objects("SeaLion")
            .unwrap()
            .select_related(["location"])
            .prefetch_related(["location__climates"])
            .seal()
            .unwrap()
            .get(&f.session)
            .unwrap()
    });
    assert_eq!(fetches, 2);

    let location = single(&f, &sea_lion, "location");
    assert!(location.is_sealed());
    let climates = members(&f, &location, "climates");
    assert_eq!(pks(&climates), vec![json!(1)]);
    assert!(climates[0].is_sealed());
    assert!(f.log.is_empty());
}

#[test]
fn lookups_sharing_a_head_are_combined() {
    let f = strict();
    let (sea_lion, fetches) = f.fetches(|| {
        f.session
            .objects("SeaLion")
            .unwrap()
            .prefetch_related([
                "location",
                "location__climates",
                "location__previous_visitors__location",
                "location__previous_visitors__previous_locations",
            ])
            .seal()
            .unwrap()
            .get(&f.session)
            .unwrap()
    });
    assert_eq!(fetches, 6);

    let (_, fetches) = f.fetches(|| {
        let location = single(&f, &sea_lion, "location");
        assert_eq!(pks(&members(&f, &location, "climates")), vec![json!(1)]);
        let visitors = members(&f, &location, "previous_visitors");
        assert_eq!(pks(&visitors), vec![json!(1)]);
        let visitor = &visitors[0];
        assert!(visitor.is_sealed());
        assert_eq!(pk(&single(&f, visitor, "location")), json!(1));
        assert_eq!(pks(&members(&f, visitor, "previous_locations")), vec![json!(1)]);
    });
    assert_eq!(fetches, 0);
    assert!(f.log.is_empty());
}

#[test]
fn collections_are_prefetched_with_one_fetch() {
    let f = strict();

    let (location, fetches) = f.fetches(|| {
        f.session
            .objects("Location")
            .unwrap()
            .prefetch_related(["visitors"])
            .seal()
            .unwrap()
            .get(&f.session)
            .unwrap()
    });
    assert_eq!(fetches, 2);
    let visitors = members(&f, &location, "visitors");
    assert_eq!(pks(&visitors), vec![json!(1)]);
    assert!(visitors[0].is_sealed());
    let (owner, fetches) = f.fetches(|| single(&f, &visitors[0], "location"));
    assert_eq!(fetches, 0);
    assert!(owner.ptr_eq(&location));

    let (sea_lion, fetches) = f.fetches(|| {
        f.session
            .objects("SeaLion")
            .unwrap()
            .prefetch_related(["previous_locations"])
            .seal()
            .unwrap()
            .get(&f.session)
            .unwrap()
    });
    assert_eq!(fetches, 2);
    assert_eq!(pks(&members(&f, &sea_lion, "previous_locations")), vec![json!(1)]);

    let (gull, fetches) = f.fetches(|| {
        f.session
            .objects("SeaGull")
            .unwrap()
            .prefetch_related(["nicknames"])
            .seal()
            .unwrap()
            .get(&f.session)
            .unwrap()
    });
    assert_eq!(fetches, 2);
    let nicknames = members(&f, &gull, "nicknames");
    assert_eq!(
        nicknames[0].value(&f.session, "name").unwrap(),
        json!("Jonathan Livingston")
    );
    assert!(f.log.is_empty());
}

#[test]
fn prefetched_generic_foreign_key() {
    let f = strict();
    let (nickname, fetches) = f.fetches(|| {
        f.session
            .objects("Nickname")
            .unwrap()
            .prefetch_related(["content_object"])
            .seal()
            .unwrap()
            .get(&f.session)
            .unwrap()
    });
    assert_eq!(fetches, 2);

    let (gull, fetches) = f.fetches(|| single(&f, &nickname, "content_object"));
    assert_eq!(fetches, 0);
    assert_eq!(gull.model(), "SeaGull");
    assert!(gull.is_sealed());
    assert_violation(
        gull.related(&f.session, "sealion"),
        "Attempt to fetch related field \"sealion\" on sealed <SeaGull instance>",
    );
}

#[test]
fn prefetched_reverse_one_to_one() {
    let f = strict();
    let (sea_lion, fetches) = f.fetches(|| {
        f.session
            .objects("SeaLion")
            .unwrap()
            .prefetch_related(["gull"])
            .seal()
            .unwrap()
            .get(&f.session)
            .unwrap()
    });
    assert_eq!(fetches, 2);
    let (gull, fetches) = f.fetches(|| single(&f, &sea_lion, "gull"));
    assert_eq!(fetches, 0);
    assert!(gull.is_sealed());

    let (owner, fetches) = f.fetches(|| single(&f, &gull, "sealion"));
    assert_eq!(fetches, 0);
    assert!(owner.ptr_eq(&sea_lion));
    assert!(f.log.is_empty());
}

#[test]
fn lookups_added_after_seal_are_sealed_too() {
    let f = strict();
    let (sea_lion, fetches) = f.fetches(|| {
        f.session
            .objects("SeaLion")
            .unwrap()
            .seal()
            .unwrap()
            .select_related(["location"])
            .prefetch_related(["location__climates"])
            .get(&f.session)
            .unwrap()
    });
    assert_eq!(fetches, 2);

    let (climates, fetches) = f.fetches(|| {
        let location = single(&f, &sea_lion, "location");
        assert!(location.is_sealed());
        members(&f, &location, "climates")
    });
    assert_eq!(fetches, 0);
    assert_eq!(pks(&climates), vec![json!(1)]);
    assert!(climates[0].is_sealed());
    assert_violation(
        climates[0].related_set(&f.session, "locations").unwrap().fetch_all(&f.session),
        "Attempt to fetch many-to-many field \"locations\" on sealed <Climate instance>",
    );
}

#[test]
fn plain_targets_are_prefetched_unsealed() {
    let f = strict();
    f.backend()
        .insert("Island", row! { "location_id" => 1 })
        .unwrap();
    let location = f
        .session
        .objects("Location")
        .unwrap()
        .prefetch_related(["island_set"])
        .seal()
        .unwrap()
        .get(&f.session)
        .unwrap();

    let islands = members(&f, &location, "island_set");
    assert_eq!(islands.len(), 1);
    assert!(!islands[0].is_sealed());
}

#[test]
fn to_attr_stores_results_aside() {
    let f = strict();
    let sea_lion = f
        .session
        .objects("SeaLion")
        .unwrap()
        .prefetch_related([Prefetch::new("previous_locations").to_attr("haunts")])
        .seal()
        .unwrap()
        .get(&f.session)
        .unwrap();

    let haunts = sea_lion.prefetched("haunts").expect("haunts");
    assert_eq!(pks(&haunts), vec![json!(1)]);
    assert!(haunts[0].is_sealed());
    assert!(
        sea_lion
            .related_set(&f.session, "previous_locations")
            .unwrap()
            .is_restricted()
    );
}

#[test]
fn explicitly_unsealed_prefetch_stays_unsealed() {
    let f = strict();
    let unsealed = f.session.objects("Location").unwrap().unsealed();
    let sea_lion = f
        .session
        .objects("SeaLion")
        .unwrap()
        .prefetch_related([Prefetch::with_query("previous_locations", unsealed)])
        .seal()
        .unwrap()
        .get(&f.session)
        .unwrap();

    let locations = members(&f, &sea_lion, "previous_locations");
    assert!(!locations[0].is_sealed());
    let (climates, fetches) = f.fetches(|| members(&f, &locations[0], "climates"));
    assert_eq!(fetches, 1);
    assert_eq!(climates.len(), 1);
}

#[test]
fn unsealed_query_prefetches_unsealed_records() {
    let f = strict();
    let (sea_lion, fetches) = f.fetches(|| {
        f.session
            .objects("SeaLion")
            .unwrap()
            .prefetch_related(["location"])
            .get(&f.session)
            .unwrap()
    });
    assert_eq!(fetches, 2);
    assert!(!sea_lion.is_sealed());
    assert!(!single(&f, &sea_lion, "location").is_sealed());
}

#[test]
fn prefetch_on_loaded_records() {
    let f = strict();
    f.backend()
        .insert("SeaLion", row! { "height" => 2, "location_id" => 1 })
        .unwrap();
    let sea_lions = f.session.objects("SeaLion").unwrap().fetch_all(&f.session).unwrap();
    assert_eq!(sea_lions.len(), 2);

    let (_, fetches) = f.fetches(|| {
        prefetch_related_objects(&f.session, &sea_lions, &[Prefetch::new("location")], false).unwrap()
    });
    assert_eq!(fetches, 1);
    let first = single(&f, &sea_lions[0], "location");
    let second = single(&f, &sea_lions[1], "location");
    assert!(first.ptr_eq(&second));

    // Already cached: nothing left to fetch.
    let (_, fetches) = f.fetches(|| {
        prefetch_related_objects(&f.session, &sea_lions, &[Prefetch::new("location")], false).unwrap()
    });
    assert_eq!(fetches, 0);
}

#[test]
fn only_through_eager_joins() {
    let f = strict();
    let sea_lion = f
        .session
        .objects("SeaLion")
        .unwrap()
        .select_related(["location"])
        .only(["height", "location__latitude"])
        .seal()
        .unwrap()
        .get(&f.session)
        .unwrap();

    let location = single(&f, &sea_lion, "location");
    assert_eq!(location.value(&f.session, "latitude").unwrap(), json!(51.585474));
    assert_violation(
        location.value(&f.session, "longitude"),
        "Attempt to fetch deferred field \"longitude\" on sealed <Location instance>",
    );

    let err = f
        .session
        .objects("SeaLion")
        .unwrap()
        .only(["location__latitude"])
        .get(&f.session)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Usage error: Invalid field name given in only(): 'location__latitude'"
    );
}

#[test]
fn prefetched_collections_snapshot_without_fetching() {
    let f = strict();
    let location = f
        .session
        .objects("Location")
        .unwrap()
        .prefetch_related(["climates"])
        .seal()
        .unwrap()
        .get(&f.session)
        .unwrap();

    let climates = location.related_set(&f.session, "climates").unwrap();
    let snapshot = climates.snapshot().unwrap();
    assert_eq!(snapshot.name, "climates");
    let restored = snapshot.restore();
    assert_eq!(pks(&restored), vec![json!(1)]);
    assert!(restored[0].is_sealed());

    let restored = Record::from_json(&location.to_json().unwrap()).unwrap();
    let (climates, fetches) = f.fetches(|| members(&f, &restored, "climates"));
    assert_eq!(fetches, 0);
    assert_eq!(climates.len(), 1);

    let visitors = location.related_set(&f.session, "visitors").unwrap();
    assert!(visitors.snapshot().unwrap_err().is_usage());
}
