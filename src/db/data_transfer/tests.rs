use super::*;
use crate::db_sync::models::LogStatus;
use crate::db_types::SqlValue;
use crate::testing::MemoryDatabase;

fn shop(label: &str) -> MemoryDatabase {
    MemoryDatabase::new(label, "shop")
        .with_table("products", &[("id", "int"), ("title", "varchar(100)"), ("image", "varchar(255)")], &["id"])
        .with_table("categories", &[("id", "int"), ("name", "varchar(50)")], &["id"])
        .with_row("products", &[("id", SqlValue::Int(2)), ("title", "Cap".into()), ("image", "http://localhost:8080/cap.png".into())])
        .with_row("products", &[("id", SqlValue::Int(1)), ("title", "Mug's".into()), ("image", SqlValue::Null)])
        .with_row("categories", &[("id", SqlValue::Int(1)), ("name", "Kitchen".into())])
}

fn insert(id: i64) -> SqlStatement {
    SqlStatement::data("categories", format!("INSERT INTO `categories` (`id`, `name`) VALUES\n({}, 'c{}');", id, id))
}

#[tokio::test]
async fn dump_orders_structure_before_data() {
    let statements = dump_database(&shop("local"), None, DumpOptions::for_sync(SyncMode::Full))
        .await
        .unwrap();

    let phases = statements.iter().map(|s| s.phase).collect::<Vec<_>>();
    let first_data = phases.iter().position(|p| *p == StatementPhase::Data).unwrap();
    assert_eq!(first_data, 4);
    assert!(phases[first_data..].iter().all(|p| *p == StatementPhase::Data));
    assert_eq!(statements[0].sql, "DROP TABLE IF EXISTS `categories`;");
    assert!(statements[1].sql.starts_with("CREATE TABLE `categories`"));
    assert!(statements[5].sql.contains("(1, 'Mug''s', NULL),\n(2, 'Cap'"));
}

#[tokio::test]
async fn structure_only_dump_has_no_inserts() {
    let statements = dump_database(&shop("local"), None, DumpOptions::for_sync(SyncMode::StructureOnly))
        .await
        .unwrap();
    assert_eq!(statements.len(), 4);
    assert!(statements.iter().all(|s| s.phase == StatementPhase::Structure));
}

#[tokio::test]
async fn inserts_are_batched() {
    let db = MemoryDatabase::new("local", "shop").with_table("hits", &[("id", "int")], &["id"]);
    for id in 0..1203 {
        db.insert_row("hits", &[("id", SqlValue::Int(id))]);
    }
    let options = DumpOptions {
        include_structure: false,
        include_data: true,
        add_drop_statements: false,
    };

    let statements = dump_database(&db, None, options).await.unwrap();
    assert_eq!(statements.len(), 3);
    assert_eq!(statements[2].sql.matches("),\n(").count(), 202);
}

#[tokio::test]
async fn generated_columns_are_left_out_of_inserts() {
    let db = MemoryDatabase::new("local", "shop")
        .with_table("orders", &[("id", "int"), ("qty", "int")], &["id"])
        .with_generated_column("orders", "total", "int")
        .with_row("orders", &[("id", SqlValue::Int(1)), ("qty", SqlValue::Int(3)), ("total", SqlValue::Int(30))]);

    let statements = dump_database(&db, None, DumpOptions::for_sync(SyncMode::Full))
        .await
        .unwrap();

    let inserts = statements
        .iter()
        .filter(|s| s.phase == StatementPhase::Data)
        .collect::<Vec<_>>();
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].sql, "INSERT INTO `orders` (`id`, `qty`) VALUES\n(1, 3);");
    assert!(statements[1].sql.contains("`total` int"));
}

#[tokio::test]
async fn dump_then_replay_reproduces_tables_and_counts() {
    let source = shop("local");
    let target = MemoryDatabase::new("cpanel", "shop");
    let statements = dump_database(&source, None, DumpOptions::for_sync(SyncMode::Full))
        .await
        .unwrap();

    let mut log = SyncOperationLog::new("op-test");
    let stats = replay_statements(&target, &statements, &mut log, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.errors, 0);
    assert_eq!(stats.executed, statements.len());
    assert_eq!(target.table_names(), source.table_names());
    assert_eq!(target.row_count("products"), 2);
    assert_eq!(target.row_count("categories"), 1);
    assert_eq!(target.rows("products"), {
        let mut rows = source.rows("products");
        rows.sort_by(|a, b| a["id"].cmp(&b["id"]));
        rows
    });
}

#[tokio::test]
async fn failing_statement_is_logged_and_replay_continues() {
    let target = MemoryDatabase::new("cpanel", "shop").with_table("categories", &[("id", "int"), ("name", "varchar(50)")], &["id"]);
    let statements = vec![insert(1), insert(1), insert(2)];

    let mut log = SyncOperationLog::new("op-test");
    let stats = replay_statements(&target, &statements, &mut log, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.executed, 2);
    assert_eq!(stats.errors, 1);
    assert_eq!(target.row_count("categories"), 2);

    let errors = log
        .entries()
        .iter()
        .filter(|e| e.status == LogStatus::Error)
        .collect::<Vec<_>>();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.starts_with("Statement 2/3 (categories) failed"));
    assert!(errors[0].message.contains("Duplicate entry"));
    assert!(log
        .entries()
        .iter()
        .any(|e| e.status == LogStatus::Success && e.message.starts_with("Statement 3/3")));

    let executed = target.executed_statements();
    assert_eq!(executed.first().map(String::as_str), Some("SET FOREIGN_KEY_CHECKS=0"));
    assert_eq!(executed.last().map(String::as_str), Some("SET FOREIGN_KEY_CHECKS=1"));
}

#[tokio::test]
async fn replay_clears_backslash_sensitive_sql_mode_around_statements() {
    let target = MemoryDatabase::new("cpanel", "shop").with_table("categories", &[("id", "int"), ("name", "varchar(50)")], &["id"]);
    let statement = SqlStatement::data(
        "categories",
        "INSERT INTO `categories` (`id`, `name`) VALUES\n(1, 'C:\\\\temp');".to_string(),
    );

    let mut log = SyncOperationLog::new("op-test");
    replay_statements(&target, &[statement], &mut log, &CancellationToken::new())
        .await
        .unwrap();

    let executed = target.executed_statements();
    let set_mode = executed.iter().position(|s| s == SET_SQL_MODE).unwrap();
    let insert = executed.iter().position(|s| s.starts_with("INSERT")).unwrap();
    let restore = executed.iter().position(|s| s == RESTORE_SQL_MODE).unwrap();
    assert!(set_mode < insert && insert < restore);
    assert!(!SET_SQL_MODE.contains("NO_BACKSLASH_ESCAPES"));
    assert_eq!(
        target.rows("categories")[0]["name"],
        SqlValue::Text("C:\\temp".to_string())
    );
}

#[tokio::test]
async fn cancelling_a_running_statement_interrupts_it() {
    let target = MemoryDatabase::new("cpanel", "shop").with_table("categories", &[("id", "int"), ("name", "varchar(50)")], &["id"]);
    target.block_statements_containing("(2, 'c2')");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let mut log = SyncOperationLog::new("op-test");
    let stats = replay_statements(&target, &[insert(1), insert(2), insert(3)], &mut log, &cancel)
        .await
        .unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.executed, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(target.interrupt_count(), 1);
    assert_eq!(target.row_count("categories"), 1);
    let executed = target.executed_statements();
    assert!(!executed.iter().any(|s| s.contains("(3, 'c3')")));
    assert_eq!(executed.last().map(String::as_str), Some("SET FOREIGN_KEY_CHECKS=1"));
    assert!(log
        .entries()
        .iter()
        .any(|e| e.status == LogStatus::Warning && e.message.starts_with("Cancelled during Statement 2/3")));
}

#[tokio::test]
async fn cancelled_replay_stops_but_restores_foreign_keys() {
    let target = MemoryDatabase::new("cpanel", "shop").with_table("categories", &[("id", "int"), ("name", "varchar(50)")], &["id"]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut log = SyncOperationLog::new("op-test");
    let stats = replay_statements(&target, &[insert(1)], &mut log, &cancel).await.unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.executed, 0);
    assert_eq!(target.row_count("categories"), 0);
    assert_eq!(
        target.executed_statements().last().map(String::as_str),
        Some("SET FOREIGN_KEY_CHECKS=1")
    );
}

#[test]
fn rewrite_urls_replaces_localhost_in_data_only() {
    let mut statements = vec![
        SqlStatement::structure("posts", "CREATE TABLE `posts` (`body` text DEFAULT 'http://localhost:8080')".to_string()),
        SqlStatement::data("posts", "INSERT INTO `posts` (`body`) VALUES\n('http://localhost:8080/img.png');".to_string()),
    ];
    let patterns = vec!["http://localhost:8080".to_string(), "http://localhost:8000/".to_string()];

    let changed = rewrite_urls(&mut statements, &patterns, "https://example.com/");
    assert_eq!(changed, 1);
    assert!(statements[0].sql.contains("http://localhost:8080"));
    assert_eq!(
        statements[1].sql,
        "INSERT INTO `posts` (`body`) VALUES\n('https://example.com/img.png');"
    );
}

#[test]
fn rewrite_urls_without_target_is_a_no_op() {
    let mut statements = vec![SqlStatement::data("t", "('http://localhost:8000/a')".to_string())];
    assert_eq!(rewrite_urls(&mut statements, &["http://localhost:8000".to_string()], "  "), 0);
    assert_eq!(statements[0].sql, "('http://localhost:8000/a')");
}

#[test]
fn uploaded_script_is_split_and_classified() {
    let script = "-- dump\nDROP TABLE IF EXISTS `a`;\nCREATE TABLE `a` (`id` int);\n/* note; here */\nINSERT INTO `a` VALUES (1),('x;y');\n";
    let statements = statements_from_script(script);

    assert_eq!(statements.len(), 3);
    assert_eq!(statements[0].phase, StatementPhase::Structure);
    assert_eq!(statements[1].table.as_deref(), Some("a"));
    assert_eq!(statements[2].phase, StatementPhase::Data);
    assert!(statements[2].sql.ends_with("('x;y')"));
}

#[test]
fn rendered_script_wraps_statements_with_foreign_key_toggles() {
    let statements = vec![
        SqlStatement::structure("a", "CREATE TABLE `a` (`id` int)".to_string()),
        SqlStatement::data("a", "INSERT INTO `a` (`id`) VALUES\n(1);".to_string()),
    ];
    let script = render_sql_script("shop", &statements, DumpOptions::for_sync(SyncMode::Full));

    assert!(script.starts_with("-- sitesync SQL dump\n-- Database: shop\n"));
    assert!(script.contains(
        "SET FOREIGN_KEY_CHECKS=0;\nSET @OLD_SQL_MODE=@@SQL_MODE, SQL_MODE='NO_AUTO_VALUE_ON_ZERO';\n\n-- Table: a\nCREATE TABLE `a` (`id` int);\n"
    ));
    assert!(script.trim_end().ends_with("SET SQL_MODE=@OLD_SQL_MODE;\nSET FOREIGN_KEY_CHECKS=1;"));
    assert_eq!(statements_from_script(&script).len(), 6);
}
