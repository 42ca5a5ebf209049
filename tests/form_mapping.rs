use std::collections::HashMap;

use regex::Regex;
use serde_json::json;

use rxforms::cache::{StaticSource, TemplateCache};
use rxforms::mapper::{
    build_from_form, generate_display_html, generate_form_html, FormMapper, MarkupTemplates, ValueTree, NO_DATA_MARKER,
};
use rxforms::schema::{ConfigRow, RowLevel, SchemaTree};
use rxforms::template::{RenderMode, Renderer};

fn setup() -> SchemaTree {
    SchemaTree::from_rows(&[
        ConfigRow::new(RowLevel::Category, "brand", "Brand", 1, None),
        ConfigRow::new(RowLevel::Subcategory, "retail", "Retail", 1, Some("brand")),
        ConfigRow::new(RowLevel::Subcategory, "mail", "Mail <90>", 2, Some("brand")),
        ConfigRow::new(RowLevel::Field, "awp_discount", "AWP Discount", 1, Some("retail")),
        ConfigRow::new(RowLevel::Field, "dispensing_fee", "Dispensing Fee", 2, Some("retail")),
        ConfigRow::new(RowLevel::Field, "awp_discount", "AWP Discount", 1, Some("mail")),
        ConfigRow::new(RowLevel::Category, "generic", "Generic", 2, None),
        ConfigRow::new(RowLevel::Field, "mac", "MAC %", 1, Some("generic")),
        ConfigRow::new(RowLevel::Field, "admin_fee", "Admin Fee", 2, Some("generic")),
    ])
}

fn input_pairs(html: &str) -> Vec<(String, String)> {
    let re = Regex::new(r#"name="([^"]+)" value="([^"]*)""#).expect("valid regex");
    re.captures_iter(html)
        .map(|c| {
            let name = html_escape::decode_html_entities(&c[1]).into_owned();
            let value = html_escape::decode_html_entities(&c[2]).into_owned();
            (name, value)
        })
        .collect()
}

fn input_names(html: &str) -> Vec<String> {
    let re = Regex::new(r#"name="([^"]+)""#).expect("valid regex");
    re.captures_iter(html).map(|c| c[1].to_string()).collect()
}

#[test]
fn form_names_round_trip_through_submission() {
    let schema = setup();
    let html = generate_form_html(&schema, &ValueTree::new());
    let names = input_names(&html);
    assert_eq!(names.len(), schema.leaves().len());
    let form: HashMap<String, String> = names.iter().enumerate().map(|(i, n)| (n.clone(), format!("{}.5", i))).collect();
    let values = build_from_form(&form, &schema);
    for (i, leaf) in schema.leaves().iter().enumerate() {
        assert_eq!(values.get(&leaf.path), Some(i as f64 + 0.5), "value for {}", leaf.path);
    }
}

#[test]
fn prefilled_form_resubmits_to_the_same_values() {
    let schema = SchemaTree::from_rows(&[
        ConfigRow::new(RowLevel::Category, "c__x", "C", 1, None),
        ConfigRow::new(RowLevel::Subcategory, "s__y", "S", 1, Some("c__x")),
        ConfigRow::new(RowLevel::Field, "f__z", "F Discount", 1, Some("s__y")),
        ConfigRow::new(RowLevel::Field, "g", "G", 2, Some("s__y")),
        ConfigRow::new(RowLevel::Category, "d", "D", 2, None),
        ConfigRow::new(RowLevel::Field, "h", "H", 1, Some("d")),
    ]);
    let values = ValueTree::from_json(json!({"c__x": {"s__y": {"f__z": 1e300}}, "d": {"h": -0.1}}));
    let pairs = input_pairs(&generate_form_html(&schema, &values));
    let names: Vec<&str> = pairs.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["c__x__s__y__f__z", "c__x__s__y__g", "d__h"]);
    let resubmitted = build_from_form(&pairs, &schema);
    assert_eq!(resubmitted.to_json(), values.conform(&schema).to_json());
    assert_eq!(resubmitted.to_json()["c__x"]["s__y"]["f__z"], json!(1e300));
}

#[test]
fn partial_resubmission_leaves_the_rest_null() {
    let schema = setup();
    let names = input_names(&generate_form_html(&schema, &ValueTree::new()));
    let form: Vec<(String, String)> = names.iter().step_by(2).map(|n| (n.clone(), "-4.75".to_string())).collect();
    let values = build_from_form(&form, &schema);
    for (i, leaf) in schema.leaves().iter().enumerate() {
        let expected = if i % 2 == 0 { Some(-4.75) } else { None };
        assert_eq!(values.get(&leaf.path), expected, "value for {}", leaf.path);
    }
}

#[test]
fn every_leaf_is_present_after_submission() {
    let schema = setup();
    let form: Vec<(String, String)> = vec![
        ("brand__retail__awp_discount".into(), "17".into()),
        ("brand__mail__awp_discount".into(), "  ".into()),
        ("generic__mac".into(), "abc".into()),
        ("unrelated".into(), "1".into()),
    ];
    let values = build_from_form(&form, &schema);
    assert_eq!(
        values.to_json(),
        json!({
            "brand": {
                "retail": {"awp_discount": 17.0, "dispensing_fee": null},
                "mail": {"awp_discount": null}
            },
            "generic": {"mac": null, "admin_fee": null}
        })
    );
}

#[test]
fn form_is_prefilled_and_escaped() {
    let schema = setup();
    let values = ValueTree::from_json(json!({"generic": {"mac": 12.5, "admin_fee": 3}}));
    let html = generate_form_html(&schema, &values);
    assert!(html.contains("name=\"generic__mac\" value=\"12.5\""));
    assert!(html.contains("name=\"generic__admin_fee\" value=\"3\""));
    assert!(html.contains("name=\"brand__retail__awp_discount\" value=\"\""));
    assert!(html.contains("Mail &lt;90&gt;"));
    assert!(!html.contains("Mail <90>"));
    assert!(html.contains("data-unit=\"percent\""));
    assert!(html.contains("data-unit=\"currency\""));
}

#[test]
fn display_omits_empty_groups() {
    let schema = setup();
    let values = ValueTree::from_json(json!({
        "brand": {"retail": {"awp_discount": 18, "dispensing_fee": null}, "mail": {"awp_discount": null}},
        "generic": {"mac": null, "admin_fee": null}
    }));
    let html = generate_display_html(&schema, &values);
    assert!(html.contains("AWP Discount: 18%"));
    assert!(!html.contains("Dispensing Fee"));
    assert!(!html.contains("Mail"));
    assert!(!html.contains("Generic"));
}

#[test]
fn display_formats_currency() {
    let schema = setup();
    let values = ValueTree::from_json(json!({"generic": {"admin_fee": 1.5}}));
    assert!(generate_display_html(&schema, &values).contains("Admin Fee: $1.50"));
}

#[test]
fn display_without_values_shows_marker() {
    let schema = setup();
    assert_eq!(generate_display_html(&schema, &ValueTree::new()), NO_DATA_MARKER);
    assert_eq!(generate_display_html(&schema, &ValueTree::from_json(json!([1, 2]))), NO_DATA_MARKER);
    assert_eq!(generate_display_html(&SchemaTree::default(), &ValueTree::new()), NO_DATA_MARKER);
}

#[test]
fn conform_keeps_only_schema_leaves() {
    let schema = setup();
    let stored = ValueTree::from_json(json!({"generic": {"mac": 4, "retired": 9}, "legacy": {"x": 1}}));
    let conformed = stored.conform(&schema);
    assert_eq!(conformed.to_json()["generic"], json!({"mac": 4.0, "admin_fee": null}));
    assert!(conformed.to_json().get("legacy").is_none());
}

#[test]
fn engines_produce_the_same_markup() {
    let schema = setup();
    let values = ValueTree::from_json(json!({"brand": {"retail": {"awp_discount": 18}}, "generic": {"admin_fee": 2}}));
    let unbounded = FormMapper::default();
    let fixed = FormMapper::new(Renderer::new(RenderMode::FixedPoint, 10), MarkupTemplates::default());
    assert_eq!(unbounded.form_html(&schema, &values), fixed.form_html(&schema, &values));
    assert_eq!(unbounded.display_html(&schema, &values), fixed.display_html(&schema, &values));
}

#[tokio::test]
async fn fragments_load_from_template_source() {
    let source = StaticSource::new().with("display_field.html", "<li>{{LABEL}}={{VALUE}}</li>");
    let cache = TemplateCache::new(source, 1024);
    let templates = MarkupTemplates::load(&cache).await.expect("templates load");
    assert_eq!(templates.form_field, MarkupTemplates::default().form_field);
    let mapper = FormMapper::new(Renderer::default(), templates);
    let values = ValueTree::from_json(json!({"generic": {"mac": 5}}));
    assert!(mapper.display_html(&setup(), &values).contains("<li>MAC %=5%</li>"));
}

#[tokio::test]
async fn every_fragment_loads_into_its_own_slot() {
    let source = MarkupTemplates::KEYS
        .iter()
        .fold(StaticSource::new(), |source, key| source.with(*key, format!("<{key}>")))
        .with("unknown.html", "<unknown>");
    let cache = TemplateCache::new(source, 4096);
    let templates = MarkupTemplates::load(&cache).await.expect("templates load");
    assert_eq!(templates.form_category, "<form_category.html>");
    assert_eq!(templates.form_subcategory, "<form_subcategory.html>");
    assert_eq!(templates.form_field, "<form_field.html>");
    assert_eq!(templates.display_category, "<display_category.html>");
    assert_eq!(templates.display_subcategory, "<display_subcategory.html>");
    assert_eq!(templates.display_field, "<display_field.html>");
}
