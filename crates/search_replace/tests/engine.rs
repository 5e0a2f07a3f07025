use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use search_replace::{
    apply_blocks, apply_diff, apply_diff_to_file, parse_blocks, validate_diff, PatchBlock,
    SearchReplaceError,
};
use tempfile::tempdir;

fn block(search: &str, replace: &str) -> String {
    format!("<<<<<<< SEARCH\n{search}\n=======\n{replace}\n>>>>>>> REPLACE\n")
}

#[test]
fn single_block_replaces_first_occurrence_only() {
    let content = "x = 1\nx = 1\n";
    let patched = apply_diff(content, &block("x = 1", "x = 2")).expect("apply");

    assert_eq!(patched, "x = 2\nx = 1\n");
}

#[test]
fn later_block_sees_edit_of_earlier_block() {
    let content = "def greet():\n    return 'hi'\n";
    let diff = format!(
        "{}{}",
        block("return 'hi'", "return 'hello'"),
        block("return 'hello'", "return 'hello, world'")
    );

    let patched = apply_diff(content, &diff).expect("apply in order");
    assert_eq!(patched, "def greet():\n    return 'hello, world'\n");
}

#[test]
fn deletion_block_removes_text_and_leaves_later_blocks_intact() {
    let content = "keep\nremove me\nold\n";
    let diff = "<<<<<<< SEARCH\nremove me\n=======\n>>>>>>> REPLACE\n<<<<<<< SEARCH\nold\n=======\nnew\n>>>>>>> REPLACE\n";

    let patched = apply_diff(content, diff).expect("apply");
    assert_eq!(patched, "keep\n\nnew\n");
    assert!(!patched.contains(">>>>>>>"));
}

#[test]
fn lone_deletion_block_applies() {
    let diff = "<<<<<<< SEARCH\ndebug()\n\n=======\n>>>>>>> REPLACE";

    let patched = apply_diff("debug()\nrun()\n", diff).expect("apply");
    assert_eq!(patched, "run()\n");
}

#[test]
fn reversed_block_order_fails_on_the_first_block() {
    let content = "def greet():\n    return 'hi'\n";
    let diff = format!(
        "{}{}",
        block("return 'hello'", "return 'hello, world'"),
        block("return 'hi'", "return 'hello'")
    );

    let error = apply_diff(content, &diff).expect_err("reverse order should fail");
    assert_matches!(
        error,
        SearchReplaceError::BlockNotFound { index: 1, ref search } if search == "return 'hello'"
    );
}

#[test]
fn missing_search_text_error_names_block_and_text() {
    let content = "alpha\nbeta\n";
    let diff = format!("{}{}", block("alpha", "ALPHA"), block("gamma", "GAMMA"));

    let error = apply_diff(content, &diff).expect_err("second block should fail");
    let message = error.to_string();

    assert_matches!(error, SearchReplaceError::BlockNotFound { index: 2, .. });
    assert!(message.contains("block 2"));
    assert!(message.contains("gamma"));
}

#[test]
fn diff_without_blocks_is_rejected() {
    let error = parse_blocks("just some prose").expect_err("no blocks");
    assert_matches!(error, SearchReplaceError::NoBlocks);
}

#[test]
fn apply_blocks_does_not_mutate_input_on_failure() {
    let content = String::from("one two");
    let blocks = vec![
        PatchBlock {
            search: "one".to_string(),
            replace: "1".to_string(),
        },
        PatchBlock {
            search: "three".to_string(),
            replace: "3".to_string(),
        },
    ];

    assert!(apply_blocks(&content, &blocks).is_err());
    assert_eq!(content, "one two");
}

#[test]
fn validate_diff_reports_applicability_without_side_effects() {
    assert!(validate_diff("a b c", &block("b", "B")));
    assert!(!validate_diff("a b c", &block("z", "Z")));
    assert!(!validate_diff("a b c", "no markers"));
}

#[test]
fn file_is_untouched_when_any_block_fails() {
    let dir = tempdir().expect("tempdir");
    let file = dir.path().join("main.py");
    std::fs::write(&file, "print('a')\nprint('b')\n").expect("seed file");

    let diff = format!(
        "{}{}",
        block("print('a')", "print('A')"),
        block("print('missing')", "print('M')")
    );
    let error = apply_diff_to_file(&file, &diff).expect_err("second block should fail");

    assert_matches!(error, SearchReplaceError::BlockNotFound { index: 2, .. });
    assert_eq!(
        std::fs::read_to_string(&file).expect("read"),
        "print('a')\nprint('b')\n"
    );
}

#[test]
fn file_is_written_once_all_blocks_apply() {
    let dir = tempdir().expect("tempdir");
    let file = dir.path().join("main.py");
    std::fs::write(&file, "print('a')\nprint('b')\n").expect("seed file");

    let diff = format!(
        "{}{}",
        block("print('a')", "print('A')"),
        block("print('b')", "print('B')")
    );
    let summary = apply_diff_to_file(&file, &diff).expect("apply");

    assert_eq!(summary.blocks_applied, 2);
    assert_eq!(
        std::fs::read_to_string(&file).expect("read"),
        "print('A')\nprint('B')\n"
    );
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempdir().expect("tempdir");
    let error = apply_diff_to_file(&dir.path().join("nope.txt"), &block("a", "b"))
        .expect_err("missing file");

    assert_matches!(error, SearchReplaceError::Read { .. });
}
