// ==========================================
// 并发导入测试
// ==========================================
// 测试目标: 两个导入同时处理相同邮箱时，不产生重复线索
//           落败方的写入按更新处理
// ==========================================


use lead_intake::importer::{ImportOptions, LeadImporter};
use lead_intake::logging;
use lead_intake::repository::LeadImportRepository;
use std::sync::Arc;
use test_helpers::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_imports_do_not_duplicate_leads() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");

    const ROWS: usize = 40;
    let data = distinct_email_csv(ROWS);
    let mapping = raw_mapping(&[
        ("Email", "home_email"),
        ("First Name", "first_name"),
        ("Loan Amount", "loan_amount"),
    ]);

    // 每个导入器使用独立连接
    let importer_a = Arc::new(create_test_importer(&db_path));
    let importer_b = Arc::new(create_test_importer(&db_path));

    let spawn_import = |importer: Arc<TestImporter>| {
        let data = data.clone();
        let mapping = mapping.clone();
        tokio::spawn(async move {
            importer
                .execute(&ctx(), &csv_source(&data), &mapping, &ImportOptions::default())
                .await
        })
    };

    let handle_a = spawn_import(importer_a.clone());
    let handle_b = spawn_import(importer_b.clone());

    let result_a = handle_a.await.unwrap().expect("导入 A 应成功");
    let result_b = handle_b.await.unwrap().expect("导入 B 应成功");

    assert!(result_a.success && result_b.success);
    assert_eq!(result_a.errors + result_b.errors, 0);
    assert_eq!(result_a.imported + result_b.imported, ROWS);
    assert_eq!(result_a.updated + result_b.updated, ROWS);

    let repo = importer_a.repository();
    assert_eq!(repo.count_leads(TEST_ORG).await.unwrap(), ROWS);
    assert_eq!(repo.list_runs(TEST_ORG, 10).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_imports_for_different_orgs() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let data = distinct_email_csv(10);
    let mapping = raw_mapping(&[("Email", "home_email"), ("First Name", "first_name")]);

    let mut handles = Vec::new();
    for i in 0..4 {
        let importer = create_test_importer(&db_path);
        let data = data.clone();
        let mapping = mapping.clone();
        handles.push(tokio::spawn(async move {
            let ctx = lead_intake::domain::ImportContext::new(format!("org-{}", i));
            importer
                .execute(&ctx, &csv_source(&data), &mapping, &ImportOptions::default())
                .await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.imported, 10);
        assert_eq!(result.updated, 0);
    }

    let importer = create_test_importer(&db_path);
    for i in 0..4 {
        assert_eq!(
            importer
                .repository()
                .count_leads(&format!("org-{}", i))
                .await
                .unwrap(),
            10
        );
    }
}
