use sqlx::PgPool;
use tracing::{debug, warn};

use super::repo_types::{Dataset, DatasetDescriptor, DatasetRef, StorageMode};
use crate::db;
use crate::error::{ApiError, ApiResult};

/// The service's own bookkeeping tables. Never served as data.
pub const INTERNAL_TABLES: &[&str] = &[
    "users",
    "datasets",
    "data_records",
    "usage_logs",
    "transactions",
    "admin_audit_logs",
    "_sqlx_migrations",
];

/// Unregistered physical tables are only reachable when their name marks
/// them as survey data.
const SURVEY_TABLE_KEYWORDS: &[&str] = &["survey", "plfs", "census"];

pub fn is_internal_table(table: &str) -> bool {
    INTERNAL_TABLES.iter().any(|t| t.eq_ignore_ascii_case(table))
}

pub fn is_survey_table(table: &str) -> bool {
    let lower = table.to_lowercase();
    SURVEY_TABLE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Storage mode follows the catalogue: a dataset whose `table_name` exists
/// as a physical table is dedicated, anything else lives in `data_records`.
pub fn describe(dataset: &Dataset, has_table: bool) -> DatasetDescriptor {
    let (storage_mode, physical_name) = if has_table {
        (StorageMode::DedicatedTable, dataset.table_name.clone())
    } else {
        (StorageMode::GenericRecords, "data_records".to_string())
    };
    DatasetDescriptor {
        dataset_id: Some(dataset.id),
        name: dataset.name.clone(),
        storage_mode,
        physical_name,
    }
}

/// Finds a dataset by id, exact name, or name prefix (`PLFS` matches `PLFS Household`).
pub async fn lookup(db: &PgPool, reference: &DatasetRef) -> ApiResult<Dataset> {
    let found = match reference {
        DatasetRef::Id(id) => Dataset::find_by_id(db, *id).await?,
        DatasetRef::Name(name) => match Dataset::find_by_name(db, name).await? {
            Some(d) => Some(d),
            None => Dataset::find_by_name_prefix(db, name).await?,
        },
    };
    found.ok_or_else(|| ApiError::not_found("dataset", reference))
}

pub async fn resolve(db: &PgPool, reference: &DatasetRef) -> ApiResult<DatasetDescriptor> {
    let dataset = lookup(db, reference).await?;
    let has_table = db::table_exists(db, &dataset.table_name).await?;
    let descriptor = describe(&dataset, has_table);
    debug!(
        dataset = %descriptor.name,
        mode = ?descriptor.storage_mode,
        physical = %descriptor.physical_name,
        "dataset resolved"
    );
    Ok(descriptor)
}

/// Descriptor for a physical table addressed directly by name. Only
/// catalogue tables and survey tables resolve; everything else, internal
/// tables included, reads as missing.
pub async fn resolve_table(db: &PgPool, table: &str) -> ApiResult<DatasetDescriptor> {
    if is_internal_table(table) {
        warn!(table, "internal table requested");
        return Err(ApiError::not_found("table", table));
    }
    if !db::table_exists(db, table).await? {
        return Err(ApiError::not_found("table", table));
    }
    let registered = Dataset::by_table_name(db).await?.remove(table);
    if registered.is_none() && !is_survey_table(table) {
        return Err(ApiError::not_found("table", table));
    }
    Ok(DatasetDescriptor {
        dataset_id: registered.as_ref().map(|d| d.id),
        name: table.to_string(),
        storage_mode: StorageMode::DedicatedTable,
        physical_name: table.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn dataset(id: i64, name: &str, table: &str) -> Dataset {
        Dataset {
            id,
            name: name.into(),
            description: None,
            table_name: table.into(),
            config: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: None,
        }
    }

    #[test]
    fn describe_picks_mode_from_table_presence() {
        let d = dataset(4, "PLFS Household", "household_survey");
        let dedicated = describe(&d, true);
        assert_eq!(dedicated.storage_mode, StorageMode::DedicatedTable);
        assert_eq!(dedicated.physical_name, "household_survey");

        let generic = describe(&d, false);
        assert_eq!(generic.storage_mode, StorageMode::GenericRecords);
        assert_eq!(generic.physical_name, "data_records");
        assert_eq!(generic.dataset_id, Some(4));
    }

    #[test]
    fn internal_tables_are_recognised() {
        assert!(is_internal_table("users"));
        assert!(is_internal_table("Users"));
        assert!(is_internal_table("_sqlx_migrations"));
        assert!(is_internal_table("admin_audit_logs"));
        assert!(!is_internal_table("household_survey"));
    }

    #[test]
    fn survey_tables_are_recognised() {
        assert!(is_survey_table("household_survey"));
        assert!(is_survey_table("PLFS_2023"));
        assert!(is_survey_table("census_districts"));
        assert!(!is_survey_table("users"));
        assert!(!is_survey_table("data_records"));
    }

    #[tokio::test]
    async fn internal_tables_never_resolve() {
        // The lazy pool never connects, so the denylist must answer first.
        let state = crate::state::AppState::fake();
        for table in INTERNAL_TABLES {
            let err = resolve_table(&state.db, table).await.unwrap_err();
            assert_eq!(err.kind(), "not_found", "{table}");
        }
    }

    #[tokio::test]
    async fn unregistered_non_survey_tables_are_hidden() {
        let Ok(url) = std::env::var("DATABASE_URL") else { return };
        let pool = PgPool::connect(&url).await.expect("connect");
        sqlx::migrate!("./migrations").run(&pool).await.expect("migrate");
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let hidden = format!("scratch_{tag}");
        let visible = format!("survey_{tag}");
        for t in [&hidden, &visible] {
            sqlx::query(&format!("CREATE TABLE {t} (id INT PRIMARY KEY)"))
                .execute(&pool)
                .await
                .expect("create");
        }

        let err = resolve_table(&pool, &hidden).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
        let ok = resolve_table(&pool, &visible).await.expect("survey table");
        assert_eq!(ok.physical_name, visible);

        for t in [&hidden, &visible] {
            sqlx::query(&format!("DROP TABLE {t}")).execute(&pool).await.expect("drop");
        }
    }

    #[tokio::test]
    async fn resolve_is_stable_across_calls() {
        let Ok(url) = std::env::var("DATABASE_URL") else { return };
        let pool = PgPool::connect(&url).await.expect("connect");
        sqlx::migrate!("./migrations").run(&pool).await.expect("migrate");

        let tag = uuid::Uuid::new_v4().simple().to_string();
        let created = Dataset::create(
            &pool,
            &crate::datasets::repo_types::NewDataset {
                name: format!("District Codes {tag}"),
                description: None,
                table_name: format!("district_codes_{tag}"),
                config: None,
            },
        )
        .await
        .expect("create");

        let r = DatasetRef::Id(created.id);
        let first = resolve(&pool, &r).await.expect("first");
        let second = resolve(&pool, &r).await.expect("second");
        assert_eq!(first.storage_mode, second.storage_mode);
        assert_eq!(first.physical_name, second.physical_name);
        assert_eq!(first.storage_mode, StorageMode::GenericRecords);

        let by_prefix = resolve(&pool, &DatasetRef::Name("district codes ".to_string() + &tag[..8]))
            .await
            .expect("prefix");
        assert_eq!(by_prefix.dataset_id, Some(created.id));

        Dataset::delete(&pool, created.id).await.expect("cleanup");
    }
}
