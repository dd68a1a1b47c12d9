use super::*;
use crate::model::{ForeignKey, GenericForeignKey, GenericRelation, ManyToMany, OneToOne};

fn relation<'a>(registry: &'a Registry, model: &str, name: &str) -> &'a RelationDescriptor {
    registry.relation(model, name).expect("relation")
}

fn guarded(registry: &Registry, model: &str, name: &str) -> bool {
    registry.accessor(model, name).expect("accessor").is_guarded()
}

// ==================== Declaration order ====================

#[test]
fn forward_references_resolve_in_any_order() {
    let registry = Registry::builder()
        .model(
            ModelDef::new("SeaLion")
                .sealable()
                .foreign_key(ForeignKey::new("location", "Location").null().related_name("visitors")),
        )
        .model(ModelDef::new("Location").sealable().field("latitude"))
        .build()
        .unwrap();

    let visitors = relation(&registry, "Location", "visitors");
    assert_eq!(visitors.kind, RelationKind::ReverseManyToOne);
    assert_eq!(visitors.target.as_deref(), Some("SeaLion"));
    assert_eq!(visitors.column, "location_id");
    assert_eq!(registry.model("Location").unwrap().related_objects(), ["visitors"]);
}

#[test]
fn undeclared_targets_are_rejected() {
    let err = Registry::builder()
        .model(ModelDef::new("SeaLion").foreign_key(ForeignKey::new("home", "Nowhere")))
        .build()
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Configuration error: Related model 'Nowhere' referenced by 'SeaLion.home' is not declared"
    );
}

#[test]
fn duplicate_models_and_clashing_accessors_are_rejected() {
    let err = Registry::builder()
        .model(ModelDef::new("Leak"))
        .model(ModelDef::new("Leak"))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("declared more than once"));

    let err = Registry::builder()
        .model(ModelDef::new("Location"))
        .model(
            ModelDef::new("SeaLion")
                .field("location")
                .foreign_key(ForeignKey::new("location", "Location")),
        )
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("clashes"));
}

#[test]
fn two_relations_to_one_target_need_a_related_name() {
    let sea_lion = || {
        ModelDef::new("SeaLion")
            .foreign_key(ForeignKey::new("location", "Location").null())
    };

    let err = Registry::builder()
        .model(ModelDef::new("Location"))
        .model(sea_lion().many_to_many(ManyToMany::new("previous_locations", "Location")))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("Location.sealion_set"));

    let registry = Registry::builder()
        .model(ModelDef::new("Location"))
        .model(sea_lion().many_to_many(
            ManyToMany::new("previous_locations", "Location").related_name("previous_visitors"),
        ))
        .build()
        .unwrap();
    assert!(registry.accessor("Location", "sealion_set").is_ok());
    assert!(registry.accessor("Location", "previous_visitors").is_ok());
}

// ==================== Accessor naming ====================

#[test]
fn default_and_hidden_reverse_names() {
    let registry = Registry::builder()
        .model(ModelDef::new("Location"))
        .model(ModelDef::new("Leak"))
        .model(
            ModelDef::new("SeaLion")
                .foreign_key(ForeignKey::new("location", "Location"))
                .one_to_one(OneToOne::new("leak", "Leak").null())
                .many_to_many(ManyToMany::new("haunts", "Location").related_name("+")),
        )
        .build()
        .unwrap();

    assert_eq!(
        relation(&registry, "Location", "sealion_set").kind,
        RelationKind::ReverseManyToOne
    );
    assert_eq!(relation(&registry, "Leak", "sealion").kind, RelationKind::ReverseOneToOne);
    assert_eq!(relation(&registry, "SeaLion", "haunts").reverse_accessor, None);
    assert_eq!(registry.model("Location").unwrap().related_objects(), ["sealion_set"]);
}

#[test]
fn pk_is_an_alias_for_the_primary_key() {
    let registry = Registry::builder()
        .model(ModelDef::new("Climate").primary_key("code").field("temperature"))
        .build()
        .unwrap();
    let field = registry
        .accessor("Climate", "pk")
        .unwrap()
        .descriptor()
        .as_field()
        .cloned()
        .unwrap();
    assert_eq!(field.column, "code");
    assert!(field.primary_key);
    assert_eq!(registry.columns("Climate").unwrap(), ["code", "temperature"]);
}

#[test]
fn many_to_many_link_tables() {
    let registry = Registry::builder()
        .model(
            ModelDef::new("Location")
                .many_to_many(ManyToMany::new("neighbours", "self"))
                .many_to_many(ManyToMany::new("climates", "Climate").related_name("locations")),
        )
        .model(ModelDef::new("Climate"))
        .build()
        .unwrap();

    let neighbours = relation(&registry, "Location", "neighbours");
    assert!(neighbours.symmetrical);
    assert_eq!(neighbours.reverse_accessor, None);
    let link = neighbours.link.clone().unwrap();
    assert_eq!(link.table, "location_neighbours");
    assert_eq!(link.source, "from_location_id");
    assert_eq!(link.target, "to_location_id");

    let locations = relation(&registry, "Climate", "locations");
    assert_eq!(locations.kind, RelationKind::ManyToMany);
    let link = locations.link.clone().unwrap();
    assert_eq!(link.table, "location_climates");
    assert_eq!(link.source, "climate_id");
    assert_eq!(link.target, "location_id");
}

#[test]
fn generic_relations_need_matching_columns() {
    let err = Registry::builder()
        .model(ModelDef::new("Nickname").field("name"))
        .model(ModelDef::new("SeaLion").generic_relation(GenericRelation::new("nicknames", "Nickname")))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("needs column 'content_type' on 'Nickname'"));

    let registry = Registry::builder()
        .model(
            ModelDef::new("Nickname")
                .field("name")
                .generic_foreign_key(GenericForeignKey::new("content_object")),
        )
        .model(ModelDef::new("SeaLion").generic_relation(GenericRelation::new("nicknames", "Nickname")))
        .build()
        .unwrap();
    let gfk = relation(&registry, "Nickname", "content_object");
    assert_eq!(gfk.target, None);
    assert_eq!(
        registry.columns("Nickname").unwrap(),
        ["id", "name", "content_type", "object_id"]
    );
}

// ==================== Inheritance ====================

#[test]
fn multi_table_inheritance_links_parent_and_child() {
    let registry = Registry::builder()
        .model(ModelDef::new("SeaLion").sealable().fields(&["height", "weight"]))
        .model(ModelDef::new("GreatSeaLion").parent("SeaLion").field("roar"))
        .build()
        .unwrap();

    let child = registry.model("GreatSeaLion").unwrap();
    assert_eq!(child.pk(), "sealion_ptr_id");
    assert_eq!(child.parent(), Some("SeaLion"));
    assert_eq!(child.parent_link(), Some("sealion_ptr"));
    assert!(child.is_sealable());
    assert!(child.is_registered());

    let link = relation(&registry, "GreatSeaLion", "sealion_ptr");
    assert!(link.parent_link);
    assert_eq!(link.kind, RelationKind::ForwardOneToOne);
    assert_eq!(
        relation(&registry, "SeaLion", "greatsealion").kind,
        RelationKind::ReverseOneToOne
    );

    assert!(guarded(&registry, "GreatSeaLion", "height"));
    assert_eq!(
        registry.columns("GreatSeaLion").unwrap(),
        ["id", "height", "weight", "sealion_ptr_id", "roar"]
    );
    let ancestors: Vec<_> = registry
        .ancestors("GreatSeaLion")
        .unwrap()
        .into_iter()
        .map(ModelMeta::name)
        .collect();
    assert_eq!(ancestors, ["SeaLion"]);
}

#[test]
fn proxies_share_storage_and_opt_in() {
    let registry = Registry::builder()
        .model(ModelDef::new("SeaLion").sealable().field("height"))
        .model(ModelDef::new("SealionProxy").proxy_of("SeaLion"))
        .build()
        .unwrap();

    let proxy = registry.model("SealionProxy").unwrap();
    assert!(proxy.is_proxy());
    assert_eq!(proxy.concrete_model(), "SeaLion");
    assert_eq!(proxy.pk(), "id");
    assert!(proxy.is_sealable());
    assert!(!proxy.is_registered());
    assert!(guarded(&registry, "SealionProxy", "height"));

    let err = Registry::builder()
        .model(ModelDef::new("SeaLion"))
        .model(ModelDef::new("SealionProxy").proxy_of("SeaLion").field("extra"))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("cannot declare fields"));
}

#[test]
fn abstract_bases_are_folded_in() {
    let registry = Registry::builder()
        .model(ModelDef::new("Animal").abstract_model().sealable().field("weight"))
        .model(ModelDef::new("SeaGull").extends("Animal").field("wingspan"))
        .build()
        .unwrap();

    assert!(matches!(registry.model("Animal"), Err(SealError::UnknownModel(_))));
    let gull = registry.model("SeaGull").unwrap();
    assert!(gull.is_sealable());
    assert_eq!(registry.columns("SeaGull").unwrap(), ["id", "weight", "wingspan"]);

    let err = Registry::builder()
        .model(ModelDef::new("Animal").field("weight"))
        .model(ModelDef::new("SeaGull").extends("Animal"))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("can only extend abstract models"));
}

// ==================== Registration ====================

#[test]
fn opted_in_models_get_guarded_accessors() {
    let registry = Registry::builder()
        .model(ModelDef::new("Location").sealable().field("latitude"))
        .model(ModelDef::new("Leak").field("description"))
        .model(
            ModelDef::new("SeaLion")
                .sealable()
                .field("weight")
                .foreign_key(ForeignKey::new("location", "Location").related_name("visitors"))
                .foreign_key(ForeignKey::new("leak", "Leak").null()),
        )
        .build()
        .unwrap();

    assert!(guarded(&registry, "SeaLion", "weight"));
    assert!(guarded(&registry, "SeaLion", "location"));
    assert!(guarded(&registry, "SeaLion", "leak"));
    assert!(guarded(&registry, "Location", "visitors"));
    assert!(!guarded(&registry, "Leak", "description"));
    assert!(!guarded(&registry, "Leak", "sealion_set"));
    assert!(!registry.model("Leak").unwrap().is_registered());
}

#[test]
fn explicit_registration_guards_plain_models() {
    let registry = Registry::builder()
        .model(ModelDef::new("Leak").field("description"))
        .model(ModelDef::new("SeaLion").foreign_key(ForeignKey::new("leak", "Leak").null()))
        .make_sealable("Leak")
        .build()
        .unwrap();

    let leak = registry.model("Leak").unwrap();
    assert!(leak.is_registered());
    assert!(!leak.is_sealable());
    assert!(guarded(&registry, "Leak", "description"));
    assert!(guarded(&registry, "Leak", "sealion_set"));
    assert!(!guarded(&registry, "SeaLion", "leak"));

    let err = Registry::builder()
        .model(ModelDef::new("Leak"))
        .make_sealable("Nowhere")
        .build()
        .unwrap_err();
    assert!(matches!(err, SealError::UnknownModel(_)));
}

// ==================== Managers ====================

#[test]
fn managers_and_default_sealing() {
    let registry = Registry::builder()
        .model(ModelDef::new("Leak"))
        .model(ModelDef::new("SeaLion").sealable())
        .model(
            ModelDef::new("Location")
                .sealable_with(true)
                .manager(Manager::sealable("objects"))
                .manager(Manager::sealable_with("unsealed", false)),
        )
        .build()
        .unwrap();

    assert_eq!(
        registry.model("Leak").unwrap().default_manager().kind(),
        ManagerKind::Plain
    );
    assert!(registry.model("SeaLion").unwrap().default_manager().is_sealable());
    assert!(!registry.objects("SeaLion").unwrap().is_sealed());

    assert!(registry.model("Location").unwrap().seals_queries());
    assert!(registry.objects("Location").unwrap().is_sealed());
    assert!(!registry.manager("Location", "unsealed").unwrap().is_sealed());
    assert!(registry.manager("Location", "missing").is_err());
}

#[test]
fn instantiate_builds_records_without_fetching() {
    let registry = Registry::builder()
        .model(ModelDef::new("SeaLion").sealable().field("height"))
        .model(ModelDef::new("SealionProxy").proxy_of("SeaLion"))
        .build()
        .unwrap();
    let mut row = Row::new();
    row.insert("id".into(), 7.into());
    let record = registry.instantiate("SealionProxy", row).unwrap();
    assert_eq!(record.model(), "SealionProxy");
    assert_eq!(record.concrete_model(), "SeaLion");
    assert_eq!(record.pk(), Some(7.into()));
    assert!(!record.is_sealed());
}
