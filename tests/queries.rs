use leafdb::engine::{Database, EngineError, StatementOutput};
use leafdb::storage::{Storage, StorageError};
use tempfile::TempDir;

fn temp_db() -> (Database, TempDir) {
    let dir = TempDir::new().expect("create temp dir");
    let db = Database::open(dir.path().join("data")).expect("open database");
    (db, dir)
}

fn run(db: &mut Database, sql: &str) -> StatementOutput {
    db.run_statement(sql)
        .unwrap_or_else(|err| panic!("statement '{}' failed: {}", sql, err))
}

fn rows(db: &mut Database, sql: &str) -> Vec<Vec<String>> {
    match run(db, sql) {
        StatementOutput::Rows(rows) => rows,
        StatementOutput::Complete => panic!("statement '{}' returned no rows", sql),
    }
}

fn users_db() -> (Database, TempDir) {
    let (mut db, dir) = temp_db();
    run(&mut db, "create table users (id integer, name text)");
    run(&mut db, "insert into users (id, name) values (1, 'a')");
    run(&mut db, "insert into users (id, name) values (2, 'b')");
    (db, dir)
}

#[test]
fn create_table_and_insert_complete_silently() {
    let (mut db, _dir) = temp_db();
    assert_eq!(
        run(&mut db, "create table users (id integer, name text)"),
        StatementOutput::Complete
    );
    assert_eq!(
        run(&mut db, "insert into users (id, name) values (1, 'a')"),
        StatementOutput::Complete
    );
}

#[test]
fn select_returns_rows_in_insertion_order() {
    let (mut db, _dir) = users_db();
    assert_eq!(
        rows(&mut db, "select * from users"),
        vec![
            vec!["1".to_string(), "a".to_string()],
            vec!["2".to_string(), "b".to_string()],
        ]
    );
}

#[test]
fn where_filters_rows() {
    let (mut db, _dir) = users_db();
    assert_eq!(
        rows(&mut db, "select * from users where id > 1"),
        vec![vec!["2".to_string(), "b".to_string()]]
    );
}

#[test]
fn order_by_desc_reverses_rows() {
    let (mut db, _dir) = users_db();
    assert_eq!(
        rows(&mut db, "select * from users order by id desc"),
        vec![
            vec!["2".to_string(), "b".to_string()],
            vec!["1".to_string(), "a".to_string()],
        ]
    );
}

#[test]
fn order_by_is_stable_for_equal_keys() {
    let (mut db, _dir) = temp_db();
    run(&mut db, "create table t (id integer, tag text)");
    for id in 1..=4 {
        run(
            &mut db,
            &format!("insert into t (id, tag) values ({}, 'same')", id),
        );
    }
    let result = rows(&mut db, "select id from t order by tag");
    assert_eq!(
        result,
        vec![
            vec!["1".to_string()],
            vec!["2".to_string()],
            vec!["3".to_string()],
            vec!["4".to_string()],
        ]
    );
}

#[test]
fn group_by_with_count() {
    let (mut db, _dir) = users_db();
    run(&mut db, "insert into users (id, name) values (1, 'c')");
    let mut result = rows(&mut db, "select id, count from users group by id");
    result.sort();
    assert_eq!(
        result,
        vec![
            vec!["1".to_string(), "2".to_string()],
            vec!["2".to_string(), "1".to_string()],
        ]
    );
}

#[test]
fn group_by_without_aggregates_yields_distinct_groups() {
    let (mut db, _dir) = temp_db();
    run(&mut db, "create table t (id integer, tag text)");
    for (id, tag) in [(1, "x"), (2, "x"), (3, "y"), (4, "x"), (5, "y")] {
        run(
            &mut db,
            &format!("insert into t (id, tag) values ({}, '{}')", id, tag),
        );
    }
    let result = rows(&mut db, "select tag from t group by tag");
    assert_eq!(result.len(), 2);
}

#[test]
fn grouped_projection_reflects_last_row_of_group() {
    let (mut db, _dir) = temp_db();
    run(&mut db, "create table t (id integer, tag text)");
    run(&mut db, "insert into t (id, tag) values (1, 'first')");
    run(&mut db, "insert into t (id, tag) values (1, 'last')");
    assert_eq!(
        rows(&mut db, "select id, tag from t group by id"),
        vec![vec!["1".to_string(), "last".to_string()]]
    );
}

#[test]
fn count_without_group_by_counts_all_rows() {
    let (mut db, _dir) = users_db();
    assert_eq!(
        rows(&mut db, "select count from users"),
        vec![vec!["2".to_string()]]
    );
}

#[test]
fn count_respects_where_filter() {
    let (mut db, _dir) = users_db();
    assert_eq!(
        rows(&mut db, "select count from users where id > 1"),
        vec![vec!["1".to_string()]]
    );
}

#[test]
fn select_from_unknown_table_fails() {
    let (mut db, _dir) = temp_db();
    let err = db.run_statement("select * from u").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Storage(StorageError::UnknownTable(name)) if name == "u"
    ));
    // the database stays usable afterwards
    run(&mut db, "create table u (id integer)");
}

#[test]
fn unknown_column_in_select_fails() {
    let (mut db, _dir) = users_db();
    let err = db.run_statement("select missing from users").unwrap_err();
    assert!(matches!(err, EngineError::UnknownColumn(name) if name == "missing"));
}

#[test]
fn insert_arity_mismatch_fails() {
    let (mut db, _dir) = users_db();
    let err = db
        .run_statement("insert into users (id, name) values (3)")
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ArityMismatch {
            columns: 2,
            values: 1
        }
    ));
}

#[test]
fn insert_unknown_column_fails() {
    let (mut db, _dir) = users_db();
    let err = db
        .run_statement("insert into users (id, extra) values (3, 4)")
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownColumn(name) if name == "extra"));
}

#[test]
fn insert_mismatched_value_type_fails() {
    let (mut db, _dir) = users_db();
    let err = db
        .run_statement("insert into users (id, name) values ('three', 'c')")
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Storage(StorageError::TypeMismatch { .. })
    ));
}

#[test]
fn duplicate_create_table_fails() {
    let (mut db, _dir) = users_db();
    let err = db
        .run_statement("create table users (id integer)")
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Storage(StorageError::DuplicateTable(_))
    ));
}

#[test]
fn limit_is_an_end_index_into_the_result() {
    let (mut db, _dir) = temp_db();
    run(&mut db, "create table nums (n integer)");
    for n in 1..=5 {
        run(&mut db, &format!("insert into nums (n) values ({})", n));
    }
    // limit 3 offset 1 slices rows [1..3], not three rows starting at 1
    assert_eq!(
        rows(&mut db, "select n from nums limit 3 offset 1"),
        vec![vec!["2".to_string()], vec!["3".to_string()]]
    );
}

#[test]
fn limit_beyond_result_returns_everything() {
    let (mut db, _dir) = users_db();
    assert_eq!(rows(&mut db, "select * from users limit 10").len(), 2);
}

#[test]
fn offset_beyond_result_is_empty() {
    let (mut db, _dir) = users_db();
    assert_eq!(rows(&mut db, "select * from users offset 9"), Vec::<Vec<String>>::new());
}

#[test]
fn select_on_empty_table_returns_no_rows() {
    let (mut db, _dir) = temp_db();
    run(&mut db, "create table t (id integer)");
    assert_eq!(rows(&mut db, "select * from t"), Vec::<Vec<String>>::new());
}

#[test]
fn bare_limit_stops_reading_before_corrupt_rows() {
    let (mut db, dir) = temp_db();
    run(&mut db, "create table t (id integer, name text)");
    for n in 1..=3 {
        run(
            &mut db,
            &format!("insert into t (id, name) values ({}, 'r{}')", n, n),
        );
    }
    // corrupt the tail of the data page: a row whose text field claims
    // two bytes of invalid utf-8
    let storage = Storage::open(dir.path().join("data")).unwrap();
    let page = *storage.pages_for("t").unwrap().first().unwrap();
    storage
        .append_to_page(&[0, 0, 0, 9, 0, 2, 0xff, 0xfe], page)
        .unwrap();

    // a full scan reaches the corrupt row and fails
    assert!(db.run_statement("select * from t").is_err());
    // a bare limit stops after three rows and never decodes it
    assert_eq!(rows(&mut db, "select * from t limit 3").len(), 3);
}

#[test]
fn inserts_spill_across_pages_in_order() {
    let (mut db, dir) = temp_db();
    run(&mut db, "create table t (id integer, name text)");
    let filler = "x".repeat(1000);
    for n in 0..40 {
        run(
            &mut db,
            &format!("insert into t (id, name) values ({}, '{}')", n, filler),
        );
    }
    let storage = Storage::open(dir.path().join("data")).unwrap();
    assert!(storage.pages_for("t").unwrap().len() > 1);

    let result = rows(&mut db, "select id from t");
    assert_eq!(result.len(), 40);
    for (expected, row) in result.iter().enumerate() {
        assert_eq!(row[0], expected.to_string());
    }
}

#[test]
fn omitted_insert_columns_become_sentinels() {
    let (mut db, _dir) = temp_db();
    run(&mut db, "create table t (id integer, name text)");
    run(&mut db, "insert into t (id) values (1)");
    // the absent text decodes as an empty string; the absent integer
    // would decode as the sentinel value itself
    assert_eq!(
        rows(&mut db, "select * from t"),
        vec![vec!["1".to_string(), String::new()]]
    );
}

#[test]
fn literal_projection_repeats_per_row() {
    let (mut db, _dir) = users_db();
    assert_eq!(
        rows(&mut db, "select 7, 'tag' from users"),
        vec![
            vec!["7".to_string(), "tag".to_string()],
            vec!["7".to_string(), "tag".to_string()],
        ]
    );
}

#[test]
fn arithmetic_operators_have_no_defined_result() {
    let (mut db, _dir) = users_db();
    assert_eq!(
        rows(&mut db, "select id + 1 from users"),
        vec![vec!["?".to_string()], vec!["?".to_string()]]
    );
}

#[test]
fn where_must_evaluate_to_boolean_true() {
    let (mut db, _dir) = users_db();
    // an aggregate outside a grouped projection evaluates to the unknown
    // sentinel, which is not boolean true
    assert_eq!(
        rows(&mut db, "select id from users where count = 1"),
        Vec::<Vec<String>>::new()
    );
}

#[test]
fn equality_across_types_is_simply_false() {
    let (mut db, _dir) = users_db();
    assert_eq!(
        rows(&mut db, "select id from users where id = 'a'"),
        Vec::<Vec<String>>::new()
    );
}

#[test]
fn ordered_comparison_across_types_fails() {
    let (mut db, _dir) = users_db();
    let err = db
        .run_statement("select id from users where id > 'a'")
        .unwrap_err();
    assert!(matches!(err, EngineError::TypeMismatch(_, _)));
}

#[test]
fn order_by_boolean_key_fails() {
    let (mut db, _dir) = users_db();
    let err = db
        .run_statement("select id from users order by id > 1")
        .unwrap_err();
    assert!(matches!(err, EngineError::TypeMismatch(_, _)));
}

#[test]
fn grouped_query_with_order_by_sorts_groups() {
    let (mut db, _dir) = users_db();
    run(&mut db, "insert into users (id, name) values (1, 'c')");
    assert_eq!(
        rows(
            &mut db,
            "select id, count from users group by id order by id desc"
        ),
        vec![
            vec!["2".to_string(), "1".to_string()],
            vec!["1".to_string(), "2".to_string()],
        ]
    );
}

#[test]
fn data_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data");
    {
        let mut db = Database::open(&path).unwrap();
        run(&mut db, "create table t (id integer)");
        run(&mut db, "insert into t (id) values (1)");
    }
    let mut db = Database::open(&path).unwrap();
    assert_eq!(rows(&mut db, "select * from t"), vec![vec!["1".to_string()]]);
}
