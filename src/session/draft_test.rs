use super::*;

#[test]
fn edit_accepts_text_up_to_limit() {
    let mut draft = Draft::default();
    let text = "x".repeat(100);
    draft.edit(text.clone()).unwrap();
    assert_eq!(draft.as_str(), text);
}

#[test]
fn edit_rejects_text_over_limit_and_keeps_previous() {
    let mut draft = Draft::default();
    draft.edit("keep me").unwrap();
    let err = draft.edit("y".repeat(101)).unwrap_err();
    assert_eq!(err, DraftError::TooLong { limit: 100, len: 101 });
    assert_eq!(draft.as_str(), "keep me");
}

#[test]
fn limit_counts_characters_not_bytes() {
    let mut draft = Draft::new(3);
    draft.edit("äöü").unwrap();
    assert!(draft.edit("äöüß").is_err());
}

#[test]
fn clear_empties_text() {
    let mut draft = Draft::new(10);
    draft.edit("hello").unwrap();
    draft.clear();
    assert_eq!(draft.as_str(), "");
    assert_eq!(draft.limit(), 10);
}
