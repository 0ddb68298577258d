//! Integration tests for coordinator and loader behavior
//!
//! These tests use SQLite in-memory databases and real schedule files to test
//! end to end scenarios of the loader.

#[cfg(test)]
mod tests {
    use crate::{
        coordination::{Coordinator, FileStatus, LoadConfig},
        db::{Pool, pool::PoolConnection},
        formats::RecordErrorPolicy,
        runner::{LoadArgs, RunReport, export_sql, run_load},
    };
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use tokio::fs::File;
    use tokio::io::AsyncWriteExt;
    use tokio_util::sync::CancellationToken;

    // ============ Test Helpers ============

    const HEADER: &str = "BETRIEBSTAG;FAHRT_BEZEICHNER;BETREIBER_ID;BETREIBER_ABK;BETREIBER_NAME;PRODUKT_ID;LINIEN_ID;LINIEN_TEXT;UMLAUF_ID;VERKEHRSMITTEL_TEXT;ZUSATZFAHRT_TF;FAELLT_AUS_TF;BPUIC;HALTESTELLEN_NAME;ANKUNFTSZEIT;AN_PROGNOSE;AN_PROGNOSE_STATUS;ABFAHRTSZEIT;AB_PROGNOSE;AB_PROGNOSE_STATUS;DURCHFAHRT_TF\n";

    /// A data line for stop `stop_id`, following the layout of the export
    fn schedule_line(stop_id: usize) -> String {
        format!(
            "01.03.2021;85:11:{stop_id}:001;85:11;SBB;Schweizerische Bundesbahnen SBB;Zug;{stop_id};IC1;;IC;false;false;{stop_id};Stop {stop_id};01.03.2021 08:00;01.03.2021 08:02;PROGNOSE;01.03.2021 08:05;;;false\n"
        )
    }

    /// Helper to create a schedule file with `num_rows` data lines
    async fn create_schedule_file(dir: &TempDir, filename: &str, num_rows: usize) -> String {
        let lines: Vec<String> = (0..num_rows).map(schedule_line).collect();
        let mut content = vec![HEADER.to_string()];
        content.extend(lines);
        create_file_with_content(dir, filename, &content).await
    }

    /// Helper to create a file with custom content (rows include header)
    async fn create_file_with_content(dir: &TempDir, filename: &str, content: &[String]) -> String {
        let path = dir.path().join(filename);
        let mut file = File::create(&path).await.unwrap();
        for line in content {
            file.write_all(line.as_bytes()).await.unwrap();
        }
        file.flush().await.unwrap();
        path.to_str().unwrap().to_string()
    }

    fn load_args(pool: &Pool, source: &str) -> LoadArgs {
        LoadArgs {
            host: "test".to_string(),
            port: 5432,
            username: "test".to_string(),
            password: None,
            database: "test".to_string(),
            source: source.to_string(),
            batch_size: 10,
            worker_count: 1,
            on_bad_record: RecordErrorPolicy::Abort,
            report_path: None,
            dry_run: false,
            quiet: true,
            test_pool: Some(pool.clone()),
        }
    }

    async fn run(args: LoadArgs) -> RunReport {
        run_load(args, CancellationToken::new()).await.unwrap()
    }

    /// Helper to run a single-value query against the SQLite test pool
    async fn query_scalar<T>(pool: &Pool, sql: &str) -> T
    where
        T: Send + Unpin + for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        let mut conn = pool.acquire().await.unwrap();
        match conn {
            PoolConnection::Sqlite(ref mut sqlite_conn) => {
                let (value,): (T,) = sqlx::query_as(sql)
                    .fetch_one(&mut **sqlite_conn)
                    .await
                    .unwrap();
                value
            }
            PoolConnection::Postgres(_) => unreachable!("tests run against SQLite"),
        }
    }

    async fn get_table_count(pool: &Pool) -> i64 {
        query_scalar(pool, "SELECT COUNT(*) FROM \"SbbData\"").await
    }

    /// Column names and types of `SbbData`, plus its index names
    async fn schema_snapshot(pool: &Pool) -> (Vec<(String, String)>, Vec<String>) {
        let mut conn = pool.acquire().await.unwrap();
        let PoolConnection::Sqlite(ref mut sqlite_conn) = conn else {
            unreachable!("tests run against SQLite");
        };

        let columns: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM pragma_table_info('SbbData') ORDER BY cid")
                .fetch_all(&mut **sqlite_conn)
                .await
                .unwrap();
        let indexes: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_index_list('SbbData') ORDER BY name")
                .fetch_all(&mut **sqlite_conn)
                .await
                .unwrap();

        (columns, indexes.into_iter().map(|(name,)| name).collect())
    }

    // ============ Tests ============

    #[tokio::test]
    async fn test_basic_load_single_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_schedule_file(&temp_dir, "2021-03-01.csv", 25).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let report = run(load_args(&pool, &path)).await;

        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].status, FileStatus::Loaded);
        assert_eq!(report.files[0].batches, 3);
        assert_eq!(report.records_loaded(), 25);
        assert!(!report.has_failures());
        assert_eq!(get_table_count(&pool).await, 25);
    }

    #[tokio::test]
    async fn test_concrete_record_values() {
        let temp_dir = TempDir::new().unwrap();
        let content = vec![
            HEADER.to_string(),
            "01.03.2021;R1;C1;CS;CN;P1;42;LT;C2;V;true;false;99;Stop A;01.03.2021 08:00;01.03.2021 08:02;OK;01.03.2021 08:05;;;false\n".to_string(),
        ];
        let path = create_file_with_content(&temp_dir, "scenario.csv", &content).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        run(load_args(&pool, &path)).await;

        let stop_id: i64 = query_scalar(&pool, "SELECT stop_id FROM \"SbbData\"").await;
        let line_id: i64 = query_scalar(&pool, "SELECT line_id FROM \"SbbData\"").await;
        let add_ride: bool = query_scalar(&pool, "SELECT add_ride FROM \"SbbData\"").await;
        let trip_canc: bool = query_scalar(&pool, "SELECT trip_canc FROM \"SbbData\"").await;
        let stop_name: String = query_scalar(&pool, "SELECT stop_name FROM \"SbbData\"").await;
        let est_stat: String = query_scalar(&pool, "SELECT est_stat FROM \"SbbData\"").await;
        let nulls: i64 = query_scalar(
            &pool,
            "SELECT COUNT(*) FROM \"SbbData\" WHERE dep_est IS NULL AND dep_estat IS NULL",
        )
        .await;
        let arr_est_set: i64 = query_scalar(
            &pool,
            "SELECT COUNT(*) FROM \"SbbData\" WHERE arr_est IS NOT NULL AND day IS NOT NULL",
        )
        .await;

        assert_eq!(stop_id, 99);
        assert_eq!(line_id, 42);
        assert!(add_ride);
        assert!(!trip_canc);
        assert_eq!(stop_name, "Stop A");
        assert_eq!(est_stat, "OK");
        assert_eq!(nulls, 1);
        assert_eq!(arr_est_set, 1);
    }

    #[tokio::test]
    async fn test_directory_load_continues_after_bad_file() {
        let temp_dir = TempDir::new().unwrap();
        create_schedule_file(&temp_dir, "a.csv", 12).await;
        let bad_content = vec![
            HEADER.to_string(),
            schedule_line(1),
            "01.03.2021;only;three\n".to_string(),
            schedule_line(2),
        ];
        create_file_with_content(&temp_dir, "b.csv", &bad_content).await;
        create_schedule_file(&temp_dir, "c.csv", 7).await;
        create_file_with_content(&temp_dir, "notes.txt", &["ignored\n".to_string()]).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let report = run(load_args(&pool, temp_dir.path().to_str().unwrap())).await;

        let statuses: Vec<FileStatus> = report.files.iter().map(|f| f.status).collect();
        assert_eq!(
            statuses,
            vec![FileStatus::Loaded, FileStatus::Failed, FileStatus::Loaded]
        );
        assert_eq!(report.files[1].error_kind.as_deref(), Some("malformed_record"));
        assert!(report.files[1].error.as_ref().unwrap().contains("line 3"));
        assert!(report.has_failures());

        // The bad file commits nothing, its neighbours commit everything
        assert_eq!(report.records_loaded(), 19);
        assert_eq!(get_table_count(&pool).await, 19);
    }

    #[tokio::test]
    async fn test_skip_policy_loads_good_lines() {
        let temp_dir = TempDir::new().unwrap();
        let content = vec![
            HEADER.to_string(),
            schedule_line(1),
            "01.03.2021;only;three\n".to_string(),
            schedule_line(2),
            schedule_line(3).replace(";3;IC1;", ";x3;IC1;"),
        ];
        let path = create_file_with_content(&temp_dir, "mixed.csv", &content).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let mut args = load_args(&pool, &path);
        args.on_bad_record = RecordErrorPolicy::Skip;
        let report = run(args).await;

        assert_eq!(report.files[0].status, FileStatus::Loaded);
        assert_eq!(report.files[0].records_loaded, 2);
        assert_eq!(report.files[0].records_skipped, 2);
        let skipped: Vec<u64> = report.files[0].skipped_lines.iter().map(|s| s.line).collect();
        assert_eq!(skipped, vec![3, 5]);
        assert_eq!(get_table_count(&pool).await, 2);
    }

    #[tokio::test]
    async fn test_multiple_workers() {
        let temp_dir = TempDir::new().unwrap();
        for (i, rows) in [30, 0, 17, 41, 5].into_iter().enumerate() {
            create_schedule_file(&temp_dir, &format!("day-{}.csv", i), rows).await;
        }
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let mut args = load_args(&pool, temp_dir.path().to_str().unwrap());
        args.worker_count = 3;
        let report = run(args).await;

        assert_eq!(report.files.len(), 5);
        assert!(report.files.iter().all(|f| f.status == FileStatus::Loaded));
        let per_file: Vec<u64> = report.files.iter().map(|f| f.records_loaded).collect();
        assert_eq!(per_file, vec![30, 0, 17, 41, 5]);
        assert_eq!(get_table_count(&pool).await, 93);
    }

    #[tokio::test]
    async fn test_parallel_workers_on_fresh_schema() {
        let temp_dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for i in 0..8 {
            paths.push(create_schedule_file(&temp_dir, &format!("day-{}.csv", i), 12).await);
        }
        let pool = Pool::sqlite_in_memory().await.unwrap();
        assert!(schema_snapshot(&pool).await.0.is_empty());

        let coordinator = Coordinator::new(pool.clone(), CancellationToken::new());
        let config = LoadConfig {
            source: temp_dir.path().display().to_string(),
            batch_size: 5,
            worker_count: 4,
            policy: RecordErrorPolicy::Abort,
            quiet: true,
        };
        let report = coordinator
            .run_load(paths.iter().map(PathBuf::from).collect(), &config)
            .await
            .unwrap();

        assert_eq!(report.settings.workers, 4);
        assert!(
            report
                .files
                .iter()
                .all(|f| f.status == FileStatus::Loaded && f.records_loaded == 12),
            "{:?}",
            report.files
        );
        assert!(report.index_error.is_none());
        assert!(!report.has_failures());

        let (columns, indexes) = schema_snapshot(&pool).await;
        assert_eq!(columns.len(), 21);
        assert_eq!(indexes, vec!["SbbData_stop_id_idx".to_string()]);
        assert_eq!(get_table_count(&pool).await, 96);
    }

    #[tokio::test]
    async fn test_run_without_files_leaves_schema_alone() {
        let temp_dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let report = run(load_args(&pool, temp_dir.path().to_str().unwrap())).await;

        assert!(report.files.is_empty());
        assert!(report.index_error.is_none());
        assert!(schema_snapshot(&pool).await.0.is_empty());
    }

    #[tokio::test]
    async fn test_schema_and_index_are_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_schedule_file(&temp_dir, "day.csv", 4).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        run(load_args(&pool, &path)).await;
        let first = schema_snapshot(&pool).await;
        run(load_args(&pool, &path)).await;
        let second = schema_snapshot(&pool).await;

        assert_eq!(first, second);
        assert_eq!(first.0.len(), 21);
        assert_eq!(first.0[0], ("day".to_string(), "DATE".to_string()));
        assert_eq!(first.1, vec!["SbbData_stop_id_idx".to_string()]);
        // Loading the same file twice appends, there is no deduplication
        assert_eq!(get_table_count(&pool).await, 8);
    }

    #[tokio::test]
    async fn test_empty_file_still_creates_schema() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_schedule_file(&temp_dir, "empty.csv", 0).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let report = run(load_args(&pool, &path)).await;

        assert_eq!(report.files[0].status, FileStatus::Loaded);
        assert_eq!(report.files[0].batches, 0);
        let (columns, indexes) = schema_snapshot(&pool).await;
        assert_eq!(columns.len(), 21);
        assert_eq!(indexes.len(), 1);
        assert_eq!(get_table_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_loads_nothing() {
        let temp_dir = TempDir::new().unwrap();
        create_schedule_file(&temp_dir, "a.csv", 10).await;
        create_schedule_file(&temp_dir, "b.csv", 10).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = run_load(load_args(&pool, temp_dir.path().to_str().unwrap()), cancel)
            .await
            .unwrap();

        assert!(
            report
                .files
                .iter()
                .all(|f| f.status == FileStatus::NotStarted)
        );
        assert_eq!(report.records_loaded(), 0);
    }

    #[tokio::test]
    async fn test_coordinator_report_order_matches_input() {
        let temp_dir = TempDir::new().unwrap();
        let a = create_schedule_file(&temp_dir, "a.csv", 3).await;
        let b = create_schedule_file(&temp_dir, "b.csv", 2).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let coordinator = Coordinator::new(pool.clone(), CancellationToken::new());
        let config = LoadConfig {
            source: temp_dir.path().display().to_string(),
            batch_size: 2,
            worker_count: 2,
            policy: RecordErrorPolicy::Abort,
            quiet: true,
        };
        let report = coordinator
            .run_load(vec![b.clone().into(), a.clone().into()], &config)
            .await
            .unwrap();

        assert_eq!(report.files[0].path, Path::new(&b));
        assert_eq!(report.files[1].path, Path::new(&a));
        assert_eq!(report.files[0].batches, 1);
        assert_eq!(report.files[1].batches, 2);
        assert_eq!(report.settings.workers, 2);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_touch_database() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_schedule_file(&temp_dir, "day.csv", 6).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let report_path = temp_dir.path().join("report.json");

        let mut args = load_args(&pool, &path);
        args.dry_run = true;
        args.report_path = Some(report_path.clone());
        let report = run(args).await;

        assert_eq!(report.files[0].status, FileStatus::Parsed);
        assert_eq!(report.records_parsed(), 6);
        assert_eq!(report.records_loaded(), 0);

        let (columns, _) = schema_snapshot(&pool).await;
        assert!(columns.is_empty(), "dry run must not create the table");

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(json["settings"]["dry_run"], true);
        assert_eq!(json["files"][0]["status"], "parsed");
    }

    #[tokio::test]
    async fn test_report_written_for_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_schedule_file(&temp_dir, "day.csv", 3).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let report_path = temp_dir.path().join("out").join("report.json");

        let mut args = load_args(&pool, &path);
        args.report_path = Some(report_path.clone());
        let report = run(args).await;

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(json["run_id"], report.run_id.as_str());
        assert_eq!(json["files"][0]["records_loaded"], 3);
        assert_eq!(json["settings"]["on_bad_record"], "abort");
    }

    #[tokio::test]
    async fn test_missing_source_is_an_error() {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let result = run_load(
            load_args(&pool, "/nonexistent/istdaten"),
            CancellationToken::new(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_export_sql() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_schedule_file(&temp_dir, "day.csv", 3).await;

        let mut out = Vec::new();
        let summary = export_sql(&path, RecordErrorPolicy::Abort, &mut out)
            .await
            .unwrap();
        let sql = String::from_utf8(out).unwrap();

        assert_eq!(summary.statements, 3);
        assert!(summary.failed_files.is_empty());
        assert_eq!(sql.lines().count(), 3);
        assert!(sql.lines().all(|l| l.starts_with("INSERT INTO \"SbbData\" (")));
        assert!(sql.lines().all(|l| l.ends_with("NULL, NULL, FALSE);")));
    }

    #[tokio::test]
    async fn test_export_sql_leaves_out_bad_file() {
        let temp_dir = TempDir::new().unwrap();
        let content = vec![HEADER.to_string(), "a;b;c\n".to_string()];
        let path = create_file_with_content(&temp_dir, "bad.csv", &content).await;

        let mut out = Vec::new();
        let summary = export_sql(&path, RecordErrorPolicy::Abort, &mut out)
            .await
            .unwrap();

        assert_eq!(summary.statements, 0);
        assert_eq!(summary.failed_files.len(), 1);
        assert!(summary.failed_files[0].contains("bad.csv"));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_export_sql_continues_after_bad_file() {
        let temp_dir = TempDir::new().unwrap();
        create_schedule_file(&temp_dir, "a.csv", 2).await;
        let mut bad = vec![HEADER.to_string(), schedule_line(1)];
        bad.push("a;b;c\n".to_string());
        create_file_with_content(&temp_dir, "b.csv", &bad).await;
        create_schedule_file(&temp_dir, "c.csv", 3).await;

        let mut out = Vec::new();
        let summary = export_sql(
            temp_dir.path().to_str().unwrap(),
            RecordErrorPolicy::Abort,
            &mut out,
        )
        .await
        .unwrap();
        let sql = String::from_utf8(out).unwrap();

        // b.csv has one good line, but nothing of it is written
        assert_eq!(summary.statements, 5);
        assert_eq!(sql.lines().count(), 5);
        assert_eq!(summary.failed_files.len(), 1);
        assert!(summary.failed_files[0].contains("b.csv"));
    }
}
