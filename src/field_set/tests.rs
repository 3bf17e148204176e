use super::*;
use rstest::rstest;

#[test]
fn order_and_duplicates_do_not_matter() {
    let a = FieldSet::new(["lastName", "firstName", "email"]);
    let b = FieldSet::new(["email", "firstName", "lastName", "email"]);
    assert_eq!(a, b);
    assert_eq!(a.key(), b.key());
    assert_eq!(a.len(), 3);
}

#[test]
fn key_is_sorted_and_joined() {
    let fields = FieldSet::new(["b", "c", "a"]);
    assert_eq!(fields.key(), "a⁞b⁞c");
    assert_eq!(FieldSet::default().key(), "");
}

#[rstest]
#[case(&["a"], &["a", "b"], true)]
#[case(&["a", "b"], &["a", "b"], true)]
#[case(&[], &["a"], true)]
#[case(&["a", "c"], &["a", "b"], false)]
#[case(&["a"], &[], false)]
fn subset(#[case] a: &[&str], #[case] b: &[&str], #[case] expected: bool) {
    assert_eq!(FieldSet::new(a).is_subset(&FieldSet::new(b)), expected);
}

#[test]
fn without_strips_names() {
    let fields = FieldSet::new(["id", "firstName"]);
    let pk = FieldSet::new(["id"]);
    assert_eq!(fields.without(&pk), FieldSet::new(["firstName"]));
    assert!(FieldSet::new(["id"]).without(&pk).is_empty());
}
