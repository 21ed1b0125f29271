//! End-to-end pipeline properties over CSV fixtures in a temp directory.

use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use medallion_etl::config::PipelineConfig;
use medallion_etl::domain::Value;
use medallion_etl::pipeline::aggregate::{AggregateColumn, AggregateFn, AggregateSpec, GroupKey};
use medallion_etl::pipeline::coordinator::CLEANED_FACT_TABLE;
use medallion_etl::pipeline::{PipelineCoordinator, RunState, SpecOutcome};
use medallion_etl::storage::{InMemoryTierStore, Tier, TierStore};

fn write_file(dir: &Path, name: &str, body: &str) {
    let mut file = std::fs::File::create(dir.join(name)).unwrap();
    file.write_all(body.as_bytes()).unwrap();
}

/// Standard fixture: three customers, two categories, one duplicated order
/// line, one negative price, one null customer id, one unparsable price.
fn write_fixtures(dir: &Path) {
    write_file(
        dir,
        "customers.csv",
        "customer_id,name,city,country\n\
         C1,Ada, London ,UK\n\
         C2,Grace,NYC,US\n\
         C3,Edsger,Austin,US\n",
    );
    write_file(
        dir,
        "products.csv",
        "product_id,product_name,category\n\
         P1,Laptop, Electronics \n\
         P2,Mug,Kitchen\n",
    );
    write_file(
        dir,
        "order_headers.csv",
        "order_id,customer_id,status,order_ts\n\
         O1,C1, Shipped ,2024-01-05T10:00:00Z\n\
         O2,C2,shipped,2024-01-20 09:30:00\n\
         O3,C3,pending,2024-02-01\n\
         O4,,shipped,2024-02-02T00:00:00Z\n",
    );
    write_file(
        dir,
        "order_lines.csv",
        "order_id,product_id,price,quantity\n\
         O1,P1,100.0,1\n\
         O1,P1,100.0,1\n\
         O1,P2,20.0,2\n\
         O2,P1,100.0,1\n\
         O2,P2,-5.0,1\n\
         O3,P2,7.5,3\n\
         O3,P2,oops,1\n\
         O4,P1,50.0,1\n",
    );
}

fn coordinator_for(dir: &Path) -> (Arc<InMemoryTierStore>, PipelineCoordinator) {
    let store = Arc::new(InMemoryTierStore::new());
    let config = PipelineConfig::with_extract_dir(dir);
    let coordinator = PipelineCoordinator::new(Arc::clone(&store) as Arc<dyn TierStore>, config);
    (store, coordinator)
}

#[tokio::test]
async fn full_run_reaches_done_with_expected_counts() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let (store, coordinator) = coordinator_for(dir.path());

    let report = coordinator.run().await;
    assert_eq!(report.state, RunState::Done, "errors: {:?}", report.errors);

    // Raw row counts equal extract row counts.
    assert_eq!(report.stage_counts["raw.customers"], 3);
    assert_eq!(report.stage_counts["raw.products"], 2);
    assert_eq!(report.stage_counts["raw.order_headers"], 4);
    assert_eq!(report.stage_counts["raw.order_lines"], 8);
    for name in ["customers", "products", "order_headers", "order_lines"] {
        let raw = store.read(Tier::Raw, name).await.unwrap().unwrap();
        assert_eq!(raw.len(), report.stage_counts[&format!("raw.{name}")]);
    }

    // 8 lines in; the unparsable price, the negative price, the null
    // customer, and the exact duplicate are gone.
    assert_eq!(report.stage_counts["cleaned.order_facts"], 4);

    // All four metric tables published.
    for table in [
        "sales_by_category",
        "customer_lifetime_value",
        "monthly_sales",
        "top_customers",
    ] {
        assert!(
            matches!(report.specs[table], SpecOutcome::Published { .. }),
            "{table} not published"
        );
        assert!(store
            .read(Tier::Aggregated, table)
            .await
            .unwrap()
            .is_some());
    }
}

#[tokio::test]
async fn cleaned_table_invariants_hold() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let (store, coordinator) = coordinator_for(dir.path());
    let report = coordinator.run().await;
    assert_eq!(report.state, RunState::Done);

    let cleaned = store
        .read(Tier::Cleaned, CLEANED_FACT_TABLE)
        .await
        .unwrap()
        .unwrap();

    let mut fingerprints = std::collections::HashSet::new();
    for row in &cleaned.rows {
        // Non-negative typed price.
        let price = row.get("price").and_then(Value::as_f64).unwrap();
        assert!(price >= 0.0);
        // Non-null keys.
        assert!(!row.get("order_id").unwrap().is_null());
        assert!(!row.get("customer_id").unwrap().is_null());
        // Categorical text lower-cased and trimmed.
        if let Some(Value::Str(category)) = row.get("category") {
            assert_eq!(category, &category.trim().to_lowercase());
        }
        if let Some(Value::Str(status)) = row.get("status") {
            assert_eq!(status, &status.trim().to_lowercase());
        }
        // No two rows identical across all columns.
        assert!(fingerprints.insert(medallion_etl::domain::row_fingerprint(row)));
    }
}

#[tokio::test]
async fn quality_report_counts_each_drop() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let (_store, coordinator) = coordinator_for(dir.path());
    let report = coordinator.run().await;

    let quality = report.quality.unwrap();
    let by_rule: std::collections::HashMap<_, _> = quality
        .rules
        .iter()
        .map(|r| (r.rule.clone(), r.dropped()))
        .collect();
    assert_eq!(by_rule["cast(price:float)"], 1); // "oops"
    assert_eq!(by_rule["drop_null_in(order_id,customer_id)"], 1); // O4 header null
    assert_eq!(by_rule["filter_range(price)"], 1); // -5.0
    // Rule order is declaration order.
    assert!(quality.rules[0].rule.starts_with("cast("));
}

#[tokio::test]
async fn reruns_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    let mut fingerprints = Vec::new();
    for _ in 0..2 {
        let (store, coordinator) = coordinator_for(dir.path());
        let report = coordinator.run().await;
        assert_eq!(report.state, RunState::Done);

        let mut run = Vec::new();
        for (tier, table) in [
            (Tier::Cleaned, CLEANED_FACT_TABLE),
            (Tier::Aggregated, "sales_by_category"),
            (Tier::Aggregated, "customer_lifetime_value"),
            (Tier::Aggregated, "monthly_sales"),
            (Tier::Aggregated, "top_customers"),
        ] {
            let snapshot = store.read(tier, table).await.unwrap().unwrap();
            // ingested_at differs between runs by construction; it is
            // metadata, not content, and the cleaned fact table carries the
            // canonical copy. Fingerprint content columns only.
            let mut content = (*snapshot).clone();
            medallion_etl::pipeline::dedupe::strip_metadata(&mut content);
            run.push(content.fingerprint());
        }
        fingerprints.push(run);
    }
    assert_eq!(fingerprints[0], fingerprints[1]);
}

#[tokio::test]
async fn empty_source_fails_unless_incremental() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    write_file(dir.path(), "order_lines.csv", "order_id,product_id,price,quantity\n");

    let (_store, coordinator) = coordinator_for(dir.path());
    let report = coordinator.run().await;
    assert_eq!(report.state, RunState::Failed);
    assert!(report
        .errors
        .iter()
        .any(|e| e.contains("order_lines") && e.contains("absent or empty")));

    // Incremental mode legitimately processes zero new rows.
    let store = Arc::new(InMemoryTierStore::new());
    let mut config = PipelineConfig::with_extract_dir(dir.path());
    config.incremental = true;
    let coordinator = PipelineCoordinator::new(Arc::clone(&store) as Arc<dyn TierStore>, config);
    let report = coordinator.run().await;
    assert_eq!(report.state, RunState::Done, "errors: {:?}", report.errors);
    assert_eq!(report.stage_counts["cleaned.order_facts"], 0);
}

#[tokio::test]
async fn missing_required_column_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    write_file(dir.path(), "products.csv", "product_id,product_name\nP1,Laptop\n");

    let (_store, coordinator) = coordinator_for(dir.path());
    let report = coordinator.run().await;
    assert_eq!(report.state, RunState::Failed);
    assert!(report.errors.iter().any(|e| e.contains("'category'")));
    // The stages before the failure are still reported.
    assert!(report.stage_counts.contains_key("raw.customers"));
}

#[tokio::test]
async fn failing_spec_does_not_take_down_siblings() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let (store, coordinator) = coordinator_for(dir.path());

    // Sabotage monthly_sales with an undefined column, keep the others.
    let mut specs = medallion_etl::pipeline::aggregate::default_specs(10);
    for spec in &mut specs {
        if spec.table == "monthly_sales" {
            spec.aggregates.push(AggregateColumn {
                source: "no_such_column".to_string(),
                function: AggregateFn::Sum,
                output: "broken".to_string(),
            });
        }
    }
    let coordinator = coordinator.with_specs(specs);

    let report = coordinator.run().await;
    assert_eq!(report.state, RunState::Failed);
    assert!(matches!(
        report.specs["monthly_sales"],
        SpecOutcome::Failed { .. }
    ));
    for table in ["sales_by_category", "customer_lifetime_value", "top_customers"] {
        assert!(
            matches!(report.specs[table], SpecOutcome::Published { .. }),
            "{table} should have published"
        );
        assert!(store
            .read(Tier::Aggregated, table)
            .await
            .unwrap()
            .is_some());
    }
    assert!(store
        .read(Tier::Aggregated, "monthly_sales")
        .await
        .unwrap()
        .is_none());
}

/// Tier store that refuses to publish one named aggregated table, for
/// exercising publish failures during the fan-out.
struct RejectingStore {
    inner: InMemoryTierStore,
    reject: String,
}

#[async_trait]
impl TierStore for RejectingStore {
    async fn write(
        &self,
        tier: Tier,
        table: medallion_etl::domain::Table,
        overwrite_schema: bool,
    ) -> medallion_etl::Result<()> {
        if tier == Tier::Aggregated && table.name == self.reject {
            return Err(medallion_etl::PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected publish failure",
            )));
        }
        self.inner.write(tier, table, overwrite_schema).await
    }

    async fn read(
        &self,
        tier: Tier,
        table_name: &str,
    ) -> medallion_etl::Result<Option<Arc<medallion_etl::domain::Table>>> {
        self.inner.read(tier, table_name).await
    }

    async fn table_names(&self, tier: Tier) -> medallion_etl::Result<Vec<String>> {
        self.inner.table_names(tier).await
    }
}

#[tokio::test]
async fn publish_failure_in_one_spec_still_attempts_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let store = Arc::new(RejectingStore {
        inner: InMemoryTierStore::new(),
        reject: "monthly_sales".to_string(),
    });
    let config = PipelineConfig::with_extract_dir(dir.path());
    let coordinator = PipelineCoordinator::new(Arc::clone(&store) as Arc<dyn TierStore>, config);

    let report = coordinator.run().await;
    assert_eq!(report.state, RunState::Failed);
    assert!(matches!(
        report.specs["monthly_sales"],
        SpecOutcome::Failed { .. }
    ));
    assert!(report
        .errors
        .iter()
        .any(|e| e.contains("injected publish failure")));

    // All four specs were attempted despite the failed publish.
    assert_eq!(report.specs.len(), 4);
    for table in ["sales_by_category", "customer_lifetime_value", "top_customers"] {
        assert!(
            matches!(report.specs[table], SpecOutcome::Published { .. }),
            "{table} should have published"
        );
        assert!(store.read(Tier::Aggregated, table).await.unwrap().is_some());
    }
    assert!(store
        .read(Tier::Aggregated, "monthly_sales")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn failed_run_leaves_previous_publications_readable() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    // First run publishes everything.
    let (store, coordinator) = coordinator_for(dir.path());
    let report = coordinator.run().await;
    assert_eq!(report.state, RunState::Done);
    let previous = store
        .read(Tier::Aggregated, "sales_by_category")
        .await
        .unwrap()
        .unwrap();
    let previous_fingerprint = previous.fingerprint();

    // Second run over the same store fails in sales_by_category only.
    let config = PipelineConfig::with_extract_dir(dir.path());
    let coordinator = PipelineCoordinator::new(Arc::clone(&store) as Arc<dyn TierStore>, config)
        .with_specs(vec![AggregateSpec {
            table: "sales_by_category".to_string(),
            group_by: vec![GroupKey::Column {
                name: "no_such_column".to_string(),
            }],
            aggregates: vec![],
            rank: None,
        }]);
    let report = coordinator.run().await;
    assert_eq!(report.state, RunState::Failed);

    // The previously published table is unchanged and still readable, both
    // through the held snapshot and through a fresh read.
    assert_eq!(previous.fingerprint(), previous_fingerprint);
    let current = store
        .read(Tier::Aggregated, "sales_by_category")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.fingerprint(), previous_fingerprint);
}

#[tokio::test]
async fn top_customers_is_stable_under_ties() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "customers.csv",
        "customer_id,name,city,country\nC1,A,X,Y\nC2,B,X,Y\nC3,C,X,Y\n",
    );
    write_file(
        dir.path(),
        "products.csv",
        "product_id,product_name,category\nP1,Thing,stuff\n",
    );
    write_file(
        dir.path(),
        "order_headers.csv",
        "order_id,customer_id,status,order_ts\n\
         O1,C3,shipped,2024-01-01\n\
         O2,C1,shipped,2024-01-02\n\
         O3,C2,shipped,2024-01-03\n",
    );
    // C3 and C1 tie on lifetime value; C2 is below both.
    write_file(
        dir.path(),
        "order_lines.csv",
        "order_id,product_id,price,quantity\n\
         O1,P1,40.0,1\n\
         O2,P1,40.0,1\n\
         O3,P1,10.0,1\n",
    );

    let mut orders: Vec<Vec<String>> = Vec::new();
    for _ in 0..3 {
        let store = Arc::new(InMemoryTierStore::new());
        let mut config = PipelineConfig::with_extract_dir(dir.path());
        config.top_customers_limit = 2;
        let coordinator =
            PipelineCoordinator::new(Arc::clone(&store) as Arc<dyn TierStore>, config);
        let report = coordinator.run().await;
        assert_eq!(report.state, RunState::Done);

        let top = store
            .read(Tier::Aggregated, "top_customers")
            .await
            .unwrap()
            .unwrap();
        orders.push(
            top.rows
                .iter()
                .map(|r| r.get("customer_id").unwrap().to_string())
                .collect(),
        );
    }
    // Tie broken by customer id ascending, identically every run.
    assert_eq!(orders[0], vec!["C1".to_string(), "C3".to_string()]);
    assert_eq!(orders[0], orders[1]);
    assert_eq!(orders[1], orders[2]);
}

#[tokio::test]
async fn inner_join_drops_orphaned_fact_rows() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    // An order line whose order has no header.
    write_file(
        dir.path(),
        "order_lines.csv",
        "order_id,product_id,price,quantity\n\
         O1,P1,100.0,1\n\
         O99,P1,100.0,1\n",
    );

    let store = Arc::new(InMemoryTierStore::new());
    let mut config = PipelineConfig::with_extract_dir(dir.path());
    config.join_type = medallion_etl::config::JoinType::Inner;
    let coordinator = PipelineCoordinator::new(Arc::clone(&store) as Arc<dyn TierStore>, config);
    let report = coordinator.run().await;
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.stage_counts["joined.order_facts"], 1);
}
