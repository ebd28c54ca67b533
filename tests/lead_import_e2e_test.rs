// ==========================================
// 线索导入端到端测试
// ==========================================
// 覆盖: 首次导入 / 再次导入更新 / 幂等 / 去重优先级 / 批内合并
//       标识字段规则 / 数值清洗 / 自动映射 / 映射冲突
// ==========================================


use lead_intake::domain::{CanonicalField, ImportRunStatus};
use lead_intake::importer::{ImportError, ImportOptions, LeadImporter};
use lead_intake::logging;
use lead_intake::repository::LeadImportRepository;
use std::time::Duration;
use test_helpers::*;

#[tokio::test]
async fn test_e2e_import_then_reimport_updates_same_lead() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let importer = create_test_importer(&db_path);
    let ctx = ctx();

    // 首次导入
    let first = importer
        .execute(&ctx, &csv_source(E2E_CSV_INITIAL), &e2e_mapping(), &ImportOptions::default())
        .await
        .expect("首次导入应成功");
    assert!(first.success);
    assert_eq!(first.imported, 1);
    assert_eq!(first.updated, 0);
    assert_eq!(first.errors, 0);

    let leads = importer.repository().list_leads(TEST_ORG).await.unwrap();
    assert_eq!(leads.len(), 1);
    let original = leads[0].clone();
    assert_eq!(original.number(CanonicalField::LoanAmount), Some(600000.0));
    assert_eq!(original.text(CanonicalField::MobilePhone), Some("5559999"));

    tokio::time::sleep(Duration::from_millis(10)).await;

    // 再次导入（同邮箱）
    let second = importer
        .execute(&ctx, &csv_source(E2E_CSV_UPDATED), &e2e_mapping(), &ImportOptions::default())
        .await
        .expect("再次导入应成功");
    assert_eq!(second.imported, 0);
    assert_eq!(second.updated, 1);

    let leads = importer.repository().list_leads(TEST_ORG).await.unwrap();
    assert_eq!(leads.len(), 1);
    let updated = &leads[0];
    assert_eq!(updated.lead_id, original.lead_id);
    assert_eq!(updated.text(CanonicalField::LastName), Some("UserUpdated"));
    assert_eq!(updated.number(CanonicalField::LoanAmount), Some(700000.0));
    assert_eq!(updated.created_date, original.created_date);
    assert!(updated.updated_date > original.updated_date);
    assert_eq!(updated.last_import_run_id.as_deref(), Some(second.import_run_id.as_str()));

    // 两次运行都有审计记录
    let runs = importer.repository().list_runs(TEST_ORG, 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == ImportRunStatus::Completed));
    assert!(runs.iter().all(|r| r.finished_at.is_some()));
    assert_eq!(runs[0].created_by.as_deref(), Some("tester"));
}

#[tokio::test]
async fn test_reimport_same_file_is_idempotent() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let importer = create_test_importer(&db_path);
    let ctx = ctx();

    let data = "Email,Phone,First Name,Last Name,Address\n\
                a@x.com,,Ann,,\n\
                ,555-0001,,,\n\
                ,,Carl,Cole,1 Main St\n\
                ,,,,2 Elm St\n";
    let mapping = raw_mapping(&[
        ("Email", "home_email"),
        ("Phone", "mobile_phone"),
        ("First Name", "first_name"),
        ("Last Name", "last_name"),
        ("Address", "property_street"),
    ]);

    let first = importer
        .execute(&ctx, &csv_source(data), &mapping, &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(first.imported, 3);
    assert_eq!(first.skipped, 1);

    let second = importer
        .execute(&ctx, &csv_source(data), &mapping, &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(second.imported, 0);
    assert_eq!(second.updated, 3);
    assert_eq!(second.skipped, 1);

    assert_eq!(importer.repository().count_leads(TEST_ORG).await.unwrap(), 3);
}

#[tokio::test]
async fn test_email_match_wins_over_phone_and_name() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let importer = create_test_importer(&db_path);
    let ctx = ctx();

    let data = "Email,Phone,First Name\n\
                same@x.com,555-0001,Ann\n\
                SAME@x.com ,555-0002,Bea\n";
    let result = importer
        .execute(
            &ctx,
            &csv_source(data),
            &raw_mapping(&[("Email", "home_email"), ("Phone", "mobile_phone"), ("First Name", "first_name")]),
            &ImportOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.imported, 1);
    assert_eq!(result.updated, 1);

    let leads = importer.repository().list_leads(TEST_ORG).await.unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].text(CanonicalField::FirstName), Some("Bea"));
    assert_eq!(leads[0].text(CanonicalField::MobilePhone), Some("5550002"));
}

#[tokio::test]
async fn test_phone_fallback_when_email_absent() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let importer = create_test_importer(&db_path);
    let ctx = ctx();
    let mapping = raw_mapping(&[("Phone", "mobile_phone"), ("Notes", "notes")]);

    importer
        .execute(&ctx, &csv_source("Phone,Notes\n(555) 123-4567,first\n"), &mapping, &ImportOptions::default())
        .await
        .unwrap();
    let second = importer
        .execute(&ctx, &csv_source("Phone,Notes\n555.123.4567,second\n"), &mapping, &ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(second.updated, 1);
    let leads = importer.repository().list_leads(TEST_ORG).await.unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].text(CanonicalField::Notes), Some("second"));
}

#[tokio::test]
async fn test_within_batch_duplicates_collapse_to_one_lead() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let importer = create_test_importer(&db_path);

    let data = "Email,First Name,Loan Amount,City\n\
                dup@x.com,Ann,100,Austin\n\
                dup@x.com,,200,\n";
    let result = importer
        .execute(
            &ctx(),
            &csv_source(data),
            &raw_mapping(&[
                ("Email", "home_email"),
                ("First Name", "first_name"),
                ("Loan Amount", "loan_amount"),
                ("City", "property_city"),
            ]),
            &ImportOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.imported, 1);
    assert_eq!(result.updated, 1);

    let leads = importer.repository().list_leads(TEST_ORG).await.unwrap();
    assert_eq!(leads.len(), 1);
    // 第二行的非空字段覆盖，空字段保留首行值
    assert_eq!(leads[0].number(CanonicalField::LoanAmount), Some(200.0));
    assert_eq!(leads[0].text(CanonicalField::FirstName), Some("Ann"));
    assert_eq!(leads[0].text(CanonicalField::PropertyCity), Some("Austin"));
}

#[tokio::test]
async fn test_row_without_identifier_is_skipped() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let importer = create_test_importer(&db_path);

    let data = "First Name,Last Name,Email,Phone,City\n\
                ,,,,Austin\n\
                Ann,,,,Dallas\n";
    let result = importer
        .execute(
            &ctx(),
            &csv_source(data),
            &raw_mapping(&[
                ("First Name", "first_name"),
                ("Last Name", "last_name"),
                ("Email", "home_email"),
                ("Phone", "mobile_phone"),
                ("City", "property_city"),
            ]),
            &ImportOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.imported, 1);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.errors, 1);
    assert_eq!(result.error_details[0].row_index, 2);
    assert_eq!(result.error_details[0].code(), "missing_identifier");

    let leads = importer.repository().list_leads(TEST_ORG).await.unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].text(CanonicalField::PropertyCity), Some("Dallas"));
}

#[tokio::test]
async fn test_invalid_email_imports_with_warning() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let importer = create_test_importer(&db_path);
    let mapping = raw_mapping(&[("Email", "home_email"), ("First Name", "first_name")]);
    let data = "Email,First Name\nnot-an-email,Ann\n";

    let result = importer
        .execute(&ctx(), &csv_source(data), &mapping, &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(result.imported, 1);
    assert_eq!(result.errors, 1);
    assert_eq!(result.error_details[0].code(), "invalid_email");

    let run = importer
        .repository()
        .get_run(&result.import_run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.error_sample.len(), 1);
    assert!(run.error_report_ref.is_some());

    // skip_validation 时不记录邮箱警告
    let result = importer
        .execute(
            &ctx(),
            &csv_source(data),
            &mapping,
            &ImportOptions {
                skip_validation: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(result.updated, 1);
    assert_eq!(result.errors, 0);
}

#[tokio::test]
async fn test_currency_values_are_normalized() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let importer = create_test_importer(&db_path);

    let data = "Email,Loan Amount,FICO\na@x.com,\"$1,234.50\",n/a\n";
    importer
        .execute(
            &ctx(),
            &csv_source(data),
            &raw_mapping(&[("Email", "home_email"), ("Loan Amount", "loan_amount"), ("FICO", "fico_score")]),
            &ImportOptions::default(),
        )
        .await
        .unwrap();

    let leads = importer.repository().list_leads(TEST_ORG).await.unwrap();
    assert_eq!(leads[0].number(CanonicalField::LoanAmount), Some(1234.50));
    assert_eq!(leads[0].number(CanonicalField::FicoScore), None);
}

#[tokio::test]
async fn test_preview_suggests_common_headers() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let importer = create_test_importer(&db_path);

    let preview = importer
        .preview(&ctx(), &csv_source("E-Mail,First Name,Shoe Size\na@x.com,Ann,9\n"), None)
        .await
        .unwrap();

    assert_eq!(preview.suggested_mapping.get("E-Mail"), Some(CanonicalField::HomeEmail));
    assert_eq!(preview.suggested_mapping.get("First Name"), Some(CanonicalField::FirstName));
    assert_eq!(preview.suggested_mapping.get("Shoe Size"), None);
    assert_eq!(preview.would_create, 1);
}

#[tokio::test]
async fn test_mapping_conflict_rejected_before_rows() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let importer = create_test_importer(&db_path);

    let mapping = raw_mapping(&[("Email", "home_email"), ("Work Email", "home_email")]);
    let data = "Email,Work Email\na@x.com,b@x.com\n";

    let err = importer
        .execute(&ctx(), &csv_source(data), &mapping, &ImportOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::MappingConflict { field: CanonicalField::HomeEmail, .. }));

    let err = importer
        .preview(&ctx(), &csv_source(data), Some(&mapping))
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::MappingConflict { .. }));

    assert_eq!(importer.repository().count_leads(TEST_ORG).await.unwrap(), 0);
    assert!(importer.repository().list_runs(TEST_ORG, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_orgs_are_isolated() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let importer = create_test_importer(&db_path);
    let other = lead_intake::domain::ImportContext::new("org-other");

    importer
        .execute(&ctx(), &csv_source(E2E_CSV_INITIAL), &e2e_mapping(), &ImportOptions::default())
        .await
        .unwrap();
    let result = importer
        .execute(&other, &csv_source(E2E_CSV_INITIAL), &e2e_mapping(), &ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(result.imported, 1);
    assert_eq!(importer.repository().count_leads(TEST_ORG).await.unwrap(), 1);
    assert_eq!(importer.repository().count_leads("org-other").await.unwrap(), 1);
}

#[tokio::test]
async fn test_reimport_name_only_rows_updates_existing_lead() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let importer = create_test_importer(&db_path);
    let mapping = raw_mapping(&[
        ("First Name", "first_name"),
        ("Last Name", "last_name"),
        ("Notes", "notes"),
    ]);

    let first = importer
        .execute(&ctx(), &csv_source("First Name,Last Name,Notes\nAnn,Lee,first\n"), &mapping, &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(first.imported, 1);

    // 大小写不同视为同一人
    let second = importer
        .execute(&ctx(), &csv_source("First Name,Last Name,Notes\nANN, lee ,second\n"), &mapping, &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(second.imported, 0);
    assert_eq!(second.updated, 1);
    assert_eq!(second.errors, 0);

    let leads = importer.repository().list_leads(TEST_ORG).await.unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].text(CanonicalField::Notes), Some("second"));
}

#[tokio::test]
async fn test_update_never_takes_contact_of_another_lead() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let importer = create_test_importer(&db_path);
    let mapping = raw_mapping(&[("Email", "home_email"), ("Phone", "mobile_phone"), ("Notes", "notes")]);

    let data = "Email,Phone,Notes\n\
                a@x.com,111-111-1111,\n\
                b@x.com,222-222-2222,\n";
    let first = importer
        .execute(&ctx(), &csv_source(data), &mapping, &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(first.imported, 2);

    // a@x.com 的行携带 b@x.com 的电话
    let second = importer
        .execute(
            &ctx(),
            &csv_source("Email,Phone,Notes\na@x.com,222-222-2222,moved\n"),
            &mapping,
            &ImportOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(second.updated, 1);
    assert_eq!(second.errors, 1);
    assert_eq!(second.error_details[0].code(), "contact_conflict");
    assert_eq!(second.error_details[0].row_index, 2);

    let leads = importer.repository().list_leads(TEST_ORG).await.unwrap();
    assert_eq!(leads.len(), 2);
    let with_phone: Vec<_> = leads
        .iter()
        .filter(|l| l.text(CanonicalField::MobilePhone) == Some("2222222222"))
        .collect();
    assert_eq!(with_phone.len(), 1);
    assert_eq!(with_phone[0].text(CanonicalField::HomeEmail), Some("b@x.com"));

    let a = leads
        .iter()
        .find(|l| l.text(CanonicalField::HomeEmail) == Some("a@x.com"))
        .unwrap();
    assert_eq!(a.text(CanonicalField::MobilePhone), Some("1111111111"));
    assert_eq!(a.text(CanonicalField::Notes), Some("moved"));
}
