use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::NaiveDate;

use rxforms::naming::{
    compose_base_name, generate_unique_name, ExhaustionPolicy, FnRegistry, MemoryNameRegistry, NameGenerator,
    MAX_NAME_LENGTH,
};
use rxforms::{Result, RxformsError};

fn date() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(2025, 1, 1)
}

fn setup() -> MemoryNameRegistry {
    let registry = MemoryNameRegistry::new();
    registry.insert("1", "X").expect("insert");
    registry.insert("2", "X (2)").expect("insert");
    registry
}

#[test]
fn base_name_joins_labels_with_year() {
    let name = compose_base_name(&["CVS", "Standard", "<10K", "1 Year"], date());
    assert_eq!(name, "CVS | Standard | <10K | 1 Year - 2025");
    assert_eq!(compose_base_name::<&str>(&[], date()), " - 2025");
}

#[test]
fn many_long_labels_keep_first_and_last_two() {
    let labels: Vec<String> = ["a", "b", "c", "d", "e", "f"].iter().map(|c| c.repeat(50)).collect();
    let name = compose_base_name(&labels, date());
    let expected = format!("{} | {} | ... | {} | {} - 2025", labels[0], labels[1], labels[4], labels[5]);
    assert_eq!(name, expected);
    assert!(name.chars().count() <= MAX_NAME_LENGTH);
}

#[test]
fn oversized_kept_labels_are_cut_but_keep_the_year() {
    let labels: Vec<String> = ["a", "b", "c", "d", "e", "f"].iter().map(|c| c.repeat(100)).collect();
    let name = compose_base_name(&labels, date());
    assert_eq!(name.chars().count(), MAX_NAME_LENGTH);
    assert!(name.starts_with(&labels[0]));
    assert!(name.ends_with("... - 2025"));
}

#[test]
fn few_long_labels_are_cut_with_ellipsis() {
    let labels = ["é".repeat(200), "b".repeat(200)];
    let name = compose_base_name(&labels, date());
    assert_eq!(name.chars().count(), MAX_NAME_LENGTH);
    assert!(name.ends_with("..."));
    assert!(name.starts_with("éé"));
}

#[tokio::test]
async fn composed_name_is_kept_when_nothing_collides() {
    let base = compose_base_name(&["CVS", "Standard", "<10K", "1 Year"], date());
    let registry = FnRegistry(|_: &str, _: Option<&str>| -> Result<bool> { Ok(false) });
    assert_eq!(generate_unique_name(&base, &registry, None).await.expect("lookup"), base);
}

#[tokio::test]
async fn free_name_is_returned_as_is() {
    let registry = setup();
    assert_eq!(generate_unique_name("Y", &registry, None).await.expect("lookup"), "Y");
}

#[tokio::test]
async fn counters_skip_taken_names() {
    let registry = setup();
    assert_eq!(generate_unique_name("X", &registry, None).await.expect("lookup"), "X (3)");
    // lookups ignore case
    assert_eq!(generate_unique_name("x", &registry, None).await.expect("lookup"), "x (3)");
}

#[tokio::test]
async fn excluded_record_does_not_collide_with_itself() {
    let registry = setup();
    assert_eq!(generate_unique_name("X", &registry, Some("1")).await.expect("lookup"), "X");
    registry.remove("2").expect("remove");
    assert_eq!(generate_unique_name("X", &registry, None).await.expect("lookup"), "X (2)");
}

#[tokio::test]
async fn registry_errors_propagate() {
    let registry = FnRegistry(|_: &str, _: Option<&str>| -> Result<bool> { Err(RxformsError::Registry("store offline".into())) });
    let err = generate_unique_name("X", &registry, None).await.unwrap_err();
    assert!(matches!(err, RxformsError::Registry(_)));
}

#[tokio::test]
async fn exhaustion_policies() {
    let calls = AtomicUsize::new(0);
    let registry = FnRegistry(|_: &str, _: Option<&str>| -> Result<bool> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    });
    let accepted = NameGenerator::new(3, ExhaustionPolicy::Accept).unique_name("X", &registry, None).await.expect("accepted");
    assert_eq!(accepted, "X (4)");
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let err = NameGenerator::new(3, ExhaustionPolicy::Reject).unique_name("X", &registry, None).await.unwrap_err();
    assert!(matches!(err, RxformsError::NameExhausted { attempts: 3, .. }));
}

#[tokio::test]
async fn default_generator_tries_one_hundred_counters() {
    let calls = AtomicUsize::new(0);
    let registry = FnRegistry(|_: &str, _: Option<&str>| -> Result<bool> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    });
    let name = generate_unique_name("X", &registry, None).await.expect("accepted");
    assert_eq!(name, "X (101)");
    assert_eq!(calls.load(Ordering::SeqCst), 101);
}

#[tokio::test]
async fn counters_never_push_names_past_the_cap() {
    let base = "n".repeat(MAX_NAME_LENGTH);
    let registry = MemoryNameRegistry::new();
    registry.insert("1", &base).expect("insert");
    let name = generate_unique_name(&base, &registry, None).await.expect("lookup");
    assert_eq!(name.chars().count(), MAX_NAME_LENGTH);
    assert!(name.ends_with(" (2)"));
}
