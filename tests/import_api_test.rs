// ==========================================
// ImportApi 集成测试
// ==========================================
// 覆盖: 动作分发（JSON 入口）、映射方案、运行查询、错误报告
//       在线表格（公开 / 私有 + 凭据）
// ==========================================


use lead_intake::api::{ApiError, ImportApi, SourceDescriptor};
use lead_intake::config::ConfigManager;
use lead_intake::domain::{ImportContext, ImportRunStatus};
use lead_intake::repository::{ConnectorCredential, PROVIDER_GOOGLE_SHEETS};
use serde_json::{json, Value};
use std::sync::Arc;
use test_helpers::*;

fn create_api(db_path: &str, sheets: StubSheetsClient) -> ImportApi {
    ImportApi::with_sheets_client(open_shared_conn(db_path), Arc::new(sheets))
        .expect("Failed to create api")
}

fn import_request(data: &str, mapping: Value) -> String {
    json!({
        "action": "import",
        "source_type": "csv",
        "data": data,
        "file_name": "leads.csv",
        "mapping": mapping,
    })
    .to_string()
}

#[tokio::test]
async fn test_dispatch_preview_and_import() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let api = create_api(&db_path, StubSheetsClient::default());
    let ctx = ctx();

    let preview = api
        .dispatch_json(
            &ctx,
            &json!({ "action": "preview", "source_type": "csv", "data": E2E_CSV_INITIAL }).to_string(),
        )
        .await;
    assert_eq!(preview["total_rows"], 1);
    assert_eq!(preview["suggested_mapping"]["Email"], "home_email");
    assert_eq!(preview["suggested_mapping"]["Loan Amount"], "loan_amount");
    assert_eq!(preview["would_create"], 1);
    assert_eq!(api.list_import_runs(&ctx, 10).await.unwrap().len(), 0);

    let mapping = serde_json::to_value(e2e_mapping()).unwrap();
    let result = api.dispatch_json(&ctx, &import_request(E2E_CSV_INITIAL, mapping)).await;
    assert_eq!(result["success"], true);
    assert_eq!(result["imported"], 1);

    let run_id = result["import_run_id"].as_str().unwrap().to_string();
    let run = api
        .dispatch_json(
            &ctx,
            &json!({ "action": "get_import_run", "import_run_id": run_id }).to_string(),
        )
        .await;
    assert_eq!(run["status"], "completed");
    assert_eq!(run["source_type"], "csv");
    assert_eq!(run["source_reference"], "leads.csv");
    assert_eq!(run["counters"]["imported_count"], 1);
}

#[tokio::test]
async fn test_dispatch_rejects_unknown_action_and_conflicts() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let api = create_api(&db_path, StubSheetsClient::default());

    let body = api.dispatch_json(&ctx(), r#"{"action":"launch_rockets"}"#).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "invalid_input");

    let body = api
        .dispatch_json(
            &ctx(),
            &import_request(
                "Email,Work Email\na@x.com,b@x.com\n",
                json!({ "Email": "home_email", "Work Email": "home_email" }),
            ),
        )
        .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "mapping_conflict");
    assert!(api.list_import_runs(&ctx(), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mapping_profiles_lifecycle() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let api = create_api(&db_path, StubSheetsClient::default());
    let ctx = ctx();

    // 对象形式
    let saved = api
        .dispatch_json(
            &ctx,
            &json!({
                "action": "save_mapping",
                "name": "crm export",
                "mapping_json": { "Col A": "notes", "Mail": "home_email" },
                "is_default": true
            })
            .to_string(),
        )
        .await;
    assert_eq!(saved["name"], "crm export");
    assert_eq!(saved["is_default"], true);

    // 字符串形式
    let saved = api
        .dispatch_json(
            &ctx,
            &json!({
                "action": "save_mapping",
                "name": "vendor",
                "mapping_json": "{\"Phone #\": \"mobile_phone\"}"
            })
            .to_string(),
        )
        .await;
    assert_eq!(saved["mapping"]["Phone #"], "mobile_phone");

    let list = api
        .dispatch_json(&ctx, r#"{"action":"list_mappings"}"#)
        .await;
    assert_eq!(list.as_array().unwrap().len(), 2);

    // 默认方案预填预览建议
    let preview = api
        .preview(&ctx, SourceDescriptor::csv_text("Col A,Mail\nhello,a@x.com\n"), None)
        .await
        .unwrap();
    assert_eq!(preview.suggested_mapping.len(), 2);
    assert_eq!(preview.suggested_mapping.to_raw()["Col A"], "notes");
    assert_eq!(preview.suggested_mapping.to_raw()["Mail"], "home_email");

    let deleted = api
        .dispatch_json(&ctx, r#"{"action":"delete_mapping","name":"vendor"}"#)
        .await;
    assert_eq!(deleted["deleted"], true);
    assert_eq!(api.list_mappings(&ctx).await.unwrap().len(), 1);

    // 其他组织不可见
    let other = ImportContext::new("org-other");
    assert!(api.list_mappings(&other).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_save_mapping_rejects_conflict_and_empty() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let api = create_api(&db_path, StubSheetsClient::default());

    let err = api
        .save_mapping(
            &ctx(),
            "bad",
            raw_mapping(&[("A", "first_name"), ("B", "first_name")]),
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::MappingConflict(_)));

    let err = api
        .save_mapping(&ctx(), "empty", raw_mapping(&[("A", ""), ("B", "__skip__")]), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));
}

#[tokio::test]
async fn test_error_report_export() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let api = create_api(&db_path, StubSheetsClient::default());
    let ctx = ctx();

    let data = "Email,First Name,City\nbad-email,Ann,Austin\n,,Dallas\n";
    let result = api
        .import(
            &ctx,
            SourceDescriptor::csv_text(data),
            raw_mapping(&[("Email", "home_email"), ("First Name", "first_name"), ("City", "property_city")]),
            false,
        )
        .await
        .unwrap();
    assert_eq!(result.errors, 2);

    let report = api
        .dispatch_json(
            &ctx,
            &json!({ "action": "export_error_report", "import_run_id": result.import_run_id }).to_string(),
        )
        .await;
    let csv = report["csv"].as_str().unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("Row,Error"));
    assert!(lines.next().unwrap().starts_with("2,"));
    assert!(lines.next().unwrap().starts_with("3,"));
    assert!(report["file_name"].as_str().unwrap().ends_with(".csv"));

    // 无错误的运行不提供报告
    let clean = api
        .import(&ctx, SourceDescriptor::csv_text(E2E_CSV_INITIAL), e2e_mapping(), false)
        .await
        .unwrap();
    let err = api.export_error_report(&ctx, &clean.import_run_id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    // 其他组织无法读取
    let other = ImportContext::new("org-other");
    let err = api.get_import_run(&other, &result.import_run_id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn test_list_import_runs_newest_first() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let api = create_api(&db_path, StubSheetsClient::default());
    let ctx = ctx();

    let mut run_ids = Vec::new();
    for _ in 0..3 {
        let result = api
            .import(&ctx, SourceDescriptor::csv_text(E2E_CSV_INITIAL), e2e_mapping(), false)
            .await
            .unwrap();
        run_ids.push(result.import_run_id);
    }

    let runs = api
        .dispatch_json(&ctx, r#"{"action":"list_import_runs","limit":2}"#)
        .await;
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["run_id"], run_ids[2].as_str());
    assert_eq!(runs[1]["run_id"], run_ids[1].as_str());
}

#[tokio::test]
async fn test_private_sheet_requires_credential() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let sheets = StubSheetsClient {
        public_csv: None,
        values: vec![
            vec!["Email".into(), "First Name".into()],
            vec!["sheet@x.com".into(), "Sue".into()],
        ],
    };
    let api = create_api(&db_path, sheets);
    let ctx = ctx();

    let source = SourceDescriptor {
        source_type: "google_sheets".to_string(),
        spreadsheet_id: Some("sheet-123".to_string()),
        sheet_name: Some("Leads".to_string()),
        ..SourceDescriptor::default()
    };
    let mapping = raw_mapping(&[("Email", "home_email"), ("First Name", "first_name")]);

    // 无凭据: 运行失败并记录原因
    let err = api
        .import(&ctx, source.clone(), mapping.clone(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::SourceUnauthorized(_)));
    let runs = api.list_import_runs(&ctx, 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, ImportRunStatus::Failed);
    assert!(runs[0].failure_reason.is_some());

    api.set_connector_credential(&ConnectorCredential {
        org_id: ctx.org_id.clone(),
        provider: PROVIDER_GOOGLE_SHEETS.to_string(),
        access_token: "token-abc".to_string(),
        expires_at: None,
    })
    .unwrap();

    let result = api.import(&ctx, source, mapping, false).await.unwrap();
    assert_eq!(result.imported, 1);
}

#[tokio::test]
async fn test_public_sheet_sources() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let ctx = ctx();
    let source = SourceDescriptor {
        source_type: "google_sheets".to_string(),
        sheet_url: Some("https://docs.google.com/spreadsheets/d/abc123/edit#gid=0".to_string()),
        ..SourceDescriptor::default()
    };

    // 未公开分享
    let api = create_api(&db_path, StubSheetsClient::default());
    let err = api.preview(&ctx, source.clone(), None).await.unwrap_err();
    assert_eq!(err.code(), "source_unavailable");

    let api = create_api(
        &db_path,
        StubSheetsClient {
            public_csv: Some(E2E_CSV_INITIAL.to_string()),
            values: Vec::new(),
        },
    );
    let result = api.import(&ctx, source, e2e_mapping(), false).await.unwrap();
    assert_eq!(result.imported, 1);

    let run = api.get_import_run(&ctx, &result.import_run_id).await.unwrap();
    assert_eq!(
        run.source_reference.as_deref(),
        Some("https://docs.google.com/spreadsheets/d/abc123/edit#gid=0")
    );
}

#[tokio::test]
async fn test_invalid_source_descriptor() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let api = create_api(&db_path, StubSheetsClient::default());

    let body = api
        .dispatch_json(&ctx(), r#"{"action":"preview","source_type":"pdf","data":"x"}"#)
        .await;
    assert_eq!(body["code"], "invalid_input");

    let body = api
        .dispatch_json(&ctx(), r#"{"action":"preview","source_type":"google_sheets"}"#)
        .await;
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn test_unreadable_file_records_failed_run() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let api = create_api(&db_path, StubSheetsClient::default());
    let ctx = ctx();

    let source = SourceDescriptor {
        source_type: "csv".to_string(),
        file_path: Some("/nonexistent/dir/leads.csv".to_string()),
        ..SourceDescriptor::default()
    };
    let err = api
        .import(&ctx, source, e2e_mapping(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::SourceUnavailable(_)));

    let runs = api.list_import_runs(&ctx, 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, ImportRunStatus::Failed);
    assert_eq!(runs[0].source_reference.as_deref(), Some("leads.csv"));
    assert!(runs[0]
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("/nonexistent/dir/leads.csv"));

    // 文件可读时正常导入
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), E2E_CSV_INITIAL).unwrap();
    let source = SourceDescriptor {
        source_type: "csv".to_string(),
        file_path: Some(file.path().to_string_lossy().into_owned()),
        file_name: Some("upload.csv".to_string()),
        ..SourceDescriptor::default()
    };
    let result = api.import(&ctx, source, e2e_mapping(), false).await.unwrap();
    assert_eq!(result.imported, 1);
    let run = api.get_import_run(&ctx, &result.import_run_id).await.unwrap();
    assert_eq!(run.source_reference.as_deref(), Some("upload.csv"));
}

#[tokio::test]
async fn test_error_report_states_omitted_rows() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    ConfigManager::from_connection(open_shared_conn(&db_path))
        .unwrap()
        .set_global_config_value("error_sample_cap", "2")
        .unwrap();
    let api = create_api(&db_path, StubSheetsClient::default());
    let ctx = ctx();

    let data = "Email,City
,Austin
,Dallas
,Houston
,Waco
";
    let result = api
        .import(
            &ctx,
            SourceDescriptor::csv_text(data),
            raw_mapping(&[("Email", "home_email"), ("City", "property_city")]),
            false,
        )
        .await
        .unwrap();
    assert_eq!(result.errors, 4);

    let report = api.export_error_report(&ctx, &result.import_run_id).await.unwrap();
    assert_eq!(report.listed_errors, 2);
    assert_eq!(report.omitted_errors, 2);
    let lines: Vec<&str> = report.csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[3].starts_with(",另有 2 条错误未列出"));
}
