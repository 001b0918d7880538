//! PostgreSQL storage backend
//!
//! Transactions are explicit `BEGIN`/`COMMIT` blocks on one pooled
//! connection. A transaction dropped without `commit` issues `ROLLBACK` on a
//! background task before the connection goes back to the pool.

use super::queries::*;
use super::schema::STATEMENTS;
use super::{OperatorFilter, Store, StoreTx};
use crate::config::DatabaseConfig;
use crate::error::{conflict_error, not_found_error, AppError};
use crate::models::{
    ApiMetadata, ExecuteControl, Extension, FunctionMetadata, Metadata, MetadataType,
    OperatorRecord, Release, ReleaseHistory,
};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use postgres_types::{Json, ToSql};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, info, warn};

type SqlParam = Box<dyn ToSql + Sync + Send>;

/// Pooled PostgreSQL store
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Create the pool (TLS when configured) and verify connectivity
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.dbname = Some(config.database.clone());
        cfg.pool = Some(PoolConfig::new(config.max_pool_size));
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = if config.use_tls {
            let certs = rustls_native_certs::load_native_certs();
            let mut root_store = rustls::RootCertStore::empty();
            for cert in certs.certs {
                root_store.add(cert).ok();
            }

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

            cfg.create_pool(Some(Runtime::Tokio1), tls)
                .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {}", e))?
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
                .map_err(|e| anyhow::anyhow!("Failed to create pool: {}", e))?
        };

        let client = pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get pool connection: {}", e))?;
        client
            .query_one(PING, &[])
            .await
            .map_err(|e| anyhow::anyhow!("Failed to verify database connection: {}", e))?;

        info!(
            "Database connection successful (host: {}, TLS: {})",
            config.host, config.use_tls
        );
        Ok(Self { pool })
    }

    /// Create tables and indexes if they don't exist
    pub async fn bootstrap_schema(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        for (name, sql) in STATEMENTS {
            client
                .batch_execute(sql)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", name, e))?;
            debug!("Ensured {}", name);
        }
        info!("Database tables initialized");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, AppError> {
        let client = self.pool.get().await?;
        client.batch_execute("BEGIN").await?;
        Ok(PgTx {
            client: Some(client),
        })
    }

    async fn batch_get_metadata(
        &self,
        metadata_type: MetadataType,
        versions: &[String],
    ) -> Result<Vec<Metadata>, AppError> {
        let client = self.pool.get().await?;
        fetch_metadata(&client, metadata_type, versions).await
    }

    async fn get_operators(&self, ids: &[String]) -> Result<Vec<OperatorRecord>, AppError> {
        let client = self.pool.get().await?;
        fetch_operators(&client, ids).await
    }
}

/// One open transaction
pub struct PgTx {
    client: Option<deadpool_postgres::Object>,
}

impl PgTx {
    fn client(&self) -> Result<&Client, AppError> {
        match &self.client {
            Some(object) => {
                let client: &Client = object;
                Ok(client)
            }
            None => Err(AppError::internal("transaction already finished")),
        }
    }

    async fn finish(&mut self, statement: &str) -> Result<(), AppError> {
        let client = self
            .client
            .take()
            .ok_or_else(|| AppError::internal("transaction already finished"))?;
        client.batch_execute(statement).await?;
        Ok(())
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        warn!("Rollback of abandoned transaction failed: {}", e);
                    }
                });
            }
            Err(_) => {
                // No runtime to roll back on; detach so the connection is closed
                drop(deadpool_postgres::Object::take(client));
            }
        }
    }
}

fn map_write_err(e: tokio_postgres::Error, what: &str) -> AppError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        conflict_error(format!("{} already exists", what))
    } else {
        AppError::Database(e)
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn operator_from_row(row: &Row) -> Result<OperatorRecord, AppError> {
    Ok(OperatorRecord {
        operator_id: row.try_get("operator_id")?,
        name: row.try_get("name")?,
        metadata_type: row.try_get::<_, String>("metadata_type")?.parse()?,
        metadata_version: row.try_get("metadata_version")?,
        status: row.try_get::<_, String>("status")?.parse()?,
        operator_type: row.try_get::<_, String>("operator_type")?.parse()?,
        execution_mode: row.try_get::<_, String>("execution_mode")?.parse()?,
        is_data_source: row.try_get("is_data_source")?,
        is_internal: row.try_get("is_internal")?,
        execute_control: row.try_get::<_, Json<ExecuteControl>>("execute_control")?.0,
        extension: row.try_get::<_, Json<Extension>>("extension")?.0,
        create_user: row.try_get("create_user")?,
        create_time: row.try_get("create_time")?,
        update_user: row.try_get("update_user")?,
        update_time: row.try_get("update_time")?,
    })
}

fn api_from_row(row: &Row) -> Result<Metadata, AppError> {
    Ok(Metadata::Api(ApiMetadata {
        version: row.try_get("version")?,
        summary: row.try_get("summary")?,
        description: row.try_get("description")?,
        server_url: row.try_get("server_url")?,
        path: row.try_get("path")?,
        method: row.try_get("method")?,
        api_spec: row.try_get::<_, Json<serde_json::Value>>("api_spec")?.0,
        create_user: row.try_get("create_user")?,
        create_time: row.try_get("create_time")?,
        update_user: row.try_get("update_user")?,
        update_time: row.try_get("update_time")?,
    }))
}

fn function_from_row(row: &Row) -> Result<Metadata, AppError> {
    Ok(Metadata::Function(FunctionMetadata {
        version: row.try_get("version")?,
        summary: row.try_get("summary")?,
        description: row.try_get("description")?,
        script_type: row.try_get("script_type")?,
        code: row.try_get("code")?,
        dependencies: row.try_get::<_, Json<Vec<String>>>("dependencies")?.0,
        create_user: row.try_get("create_user")?,
        create_time: row.try_get("create_time")?,
        update_user: row.try_get("update_user")?,
        update_time: row.try_get("update_time")?,
    }))
}

fn release_from_row(row: &Row) -> Result<Release, AppError> {
    Ok(Release {
        operator: row.try_get::<_, Json<OperatorRecord>>("body")?.0,
        tag: row.try_get::<_, i64>("tag")? as u64,
        release_user: row.try_get("release_user")?,
        release_time: row.try_get("release_time")?,
    })
}

fn history_from_row(row: &Row) -> Result<ReleaseHistory, AppError> {
    Ok(ReleaseHistory {
        id: row.try_get("id")?,
        operator_id: row.try_get("operator_id")?,
        metadata_version: row.try_get("metadata_version")?,
        tag: row.try_get::<_, i64>("tag")? as u64,
        release_desc: row.try_get("release_desc")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}

async fn fetch_metadata(
    client: &Client,
    metadata_type: MetadataType,
    versions: &[String],
) -> Result<Vec<Metadata>, AppError> {
    if versions.is_empty() {
        return Ok(Vec::new());
    }
    match metadata_type {
        MetadataType::Api => {
            let sql = format!(
                "SELECT {} FROM t_metadata_api WHERE version = ANY($1)",
                API_COLUMNS
            );
            let rows = client.query(sql.as_str(), &[&versions]).await?;
            rows.iter().map(api_from_row).collect()
        }
        MetadataType::Function => {
            let sql = format!(
                "SELECT {} FROM t_metadata_function WHERE version = ANY($1)",
                FUNCTION_COLUMNS
            );
            let rows = client.query(sql.as_str(), &[&versions]).await?;
            rows.iter().map(function_from_row).collect()
        }
    }
}

async fn fetch_operators(client: &Client, ids: &[String]) -> Result<Vec<OperatorRecord>, AppError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = client.query(GET_OPERATORS, &[&ids]).await?;
    rows.iter().map(operator_from_row).collect()
}

// =============================================================================
// FILTERS
// =============================================================================

fn push_clause(sql: &mut String, params: &mut Vec<SqlParam>, expr: String, op: &str, param: SqlParam) {
    params.push(param);
    sql.push_str(&format!(" AND {} {} ${}", expr, op, params.len()));
}

/// Substring pattern matching `needle` literally
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Append `AND ...` clauses for every set filter field.
///
/// `column` maps a logical field name to its SQL expression.
fn push_filter(
    sql: &mut String,
    params: &mut Vec<SqlParam>,
    filter: &OperatorFilter,
    column: impl Fn(&str) -> String,
) {
    if let Some(name) = &filter.name {
        push_clause(sql, params, column("name"), "ILIKE", Box::new(like_pattern(name)));
        sql.push_str(r" ESCAPE '\'");
    }
    if let Some(status) = filter.status {
        push_clause(sql, params, column("status"), "=", Box::new(status.as_str()));
    }
    if let Some(metadata_type) = filter.metadata_type {
        push_clause(
            sql,
            params,
            column("metadata_type"),
            "=",
            Box::new(metadata_type.as_str()),
        );
    }
    if let Some(operator_type) = filter.operator_type {
        push_clause(
            sql,
            params,
            column("operator_type"),
            "=",
            Box::new(operator_type.as_str()),
        );
    }
    if let Some(user) = &filter.create_user {
        push_clause(sql, params, column("create_user"), "=", Box::new(user.clone()));
    }
    if let Some(is_data_source) = filter.is_data_source {
        push_clause(sql, params, column("is_data_source"), "=", Box::new(is_data_source));
    }
}

fn registry_column(field: &str) -> String {
    field.to_string()
}

/// Release rows keep name and status as columns; everything else lives in `body`
fn release_column(field: &str) -> String {
    match field {
        "name" | "status" => field.to_string(),
        "is_data_source" => "(body->>'is_data_source')::boolean".to_string(),
        other => format!("body->>'{}'", other),
    }
}

async fn query_ids(
    client: &Client,
    base: &str,
    order: &str,
    filter: &OperatorFilter,
    column: impl Fn(&str) -> String,
) -> Result<Vec<String>, AppError> {
    let mut sql = base.to_string();
    let mut params: Vec<SqlParam> = Vec::new();
    push_filter(&mut sql, &mut params, filter, column);
    sql.push_str(order);

    let refs: Vec<&(dyn ToSql + Sync)> = params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect();
    let rows = client.query(sql.as_str(), &refs).await?;
    rows.iter()
        .map(|row| row.try_get::<_, String>(0).map_err(AppError::from))
        .collect()
}

// =============================================================================
// TRANSACTION
// =============================================================================

#[async_trait]
impl StoreTx for PgTx {
    async fn get_operator(&mut self, operator_id: &str) -> Result<Option<OperatorRecord>, AppError> {
        let row = self.client()?.query_opt(GET_OPERATOR, &[&operator_id]).await?;
        row.as_ref().map(operator_from_row).transpose()
    }

    async fn lock_operator(
        &mut self,
        operator_id: &str,
    ) -> Result<Option<OperatorRecord>, AppError> {
        let row = self.client()?.query_opt(LOCK_OPERATOR, &[&operator_id]).await?;
        row.as_ref().map(operator_from_row).transpose()
    }

    async fn get_operators(&mut self, ids: &[String]) -> Result<Vec<OperatorRecord>, AppError> {
        fetch_operators(self.client()?, ids).await
    }

    async fn find_published_by_name(
        &mut self,
        name: &str,
    ) -> Result<Vec<OperatorRecord>, AppError> {
        let rows = self.client()?.query(FIND_PUBLISHED_BY_NAME, &[&name]).await?;
        rows.iter().map(operator_from_row).collect()
    }

    async fn insert_operator(&mut self, record: &OperatorRecord) -> Result<(), AppError> {
        self.client()?
            .execute(
                INSERT_OPERATOR,
                &[
                    &record.operator_id,
                    &record.name,
                    &record.metadata_type.as_str(),
                    &record.metadata_version,
                    &record.status.as_str(),
                    &record.operator_type.as_str(),
                    &record.execution_mode.as_str(),
                    &record.is_data_source,
                    &record.is_internal,
                    &Json(&record.execute_control),
                    &Json(&record.extension),
                    &record.create_user,
                    &record.create_time,
                    &record.update_user,
                    &record.update_time,
                ],
            )
            .await
            .map_err(|e| map_write_err(e, &format!("Operator {}", record.operator_id)))?;
        Ok(())
    }

    async fn update_operator(&mut self, record: &OperatorRecord) -> Result<(), AppError> {
        let updated = self
            .client()?
            .execute(
                UPDATE_OPERATOR,
                &[
                    &record.operator_id,
                    &record.name,
                    &record.metadata_type.as_str(),
                    &record.metadata_version,
                    &record.status.as_str(),
                    &record.operator_type.as_str(),
                    &record.execution_mode.as_str(),
                    &record.is_data_source,
                    &record.is_internal,
                    &Json(&record.execute_control),
                    &Json(&record.extension),
                    &record.update_user,
                    &record.update_time,
                ],
            )
            .await
            .map_err(|e| map_write_err(e, &format!("Published operator name '{}'", record.name)))?;
        if updated == 0 {
            return Err(not_found_error(format!(
                "Operator {} not found",
                record.operator_id
            )));
        }
        Ok(())
    }

    async fn delete_operator(&mut self, operator_id: &str) -> Result<(), AppError> {
        self.client()?.execute(DELETE_OPERATOR, &[&operator_id]).await?;
        Ok(())
    }

    async fn list_operator_ids(&mut self, filter: &OperatorFilter) -> Result<Vec<String>, AppError> {
        query_ids(
            self.client()?,
            LIST_OPERATOR_IDS_BASE,
            LIST_OPERATOR_IDS_ORDER,
            filter,
            registry_column,
        )
        .await
    }

    async fn insert_metadata(&mut self, metadata: &Metadata) -> Result<(), AppError> {
        let client = self.client()?;
        let result = match metadata {
            Metadata::Api(m) => {
                client
                    .execute(
                        INSERT_API_METADATA,
                        &[
                            &m.version,
                            &m.summary,
                            &m.description,
                            &m.server_url,
                            &m.path,
                            &m.method,
                            &Json(&m.api_spec),
                            &m.create_user,
                            &m.create_time,
                            &m.update_user,
                            &m.update_time,
                        ],
                    )
                    .await
            }
            Metadata::Function(m) => {
                client
                    .execute(
                        INSERT_FUNCTION_METADATA,
                        &[
                            &m.version,
                            &m.summary,
                            &m.description,
                            &m.script_type,
                            &m.code,
                            &Json(&m.dependencies),
                            &m.create_user,
                            &m.create_time,
                            &m.update_user,
                            &m.update_time,
                        ],
                    )
                    .await
            }
        };
        result.map_err(|e| map_write_err(e, &format!("Metadata version {}", metadata.version())))?;
        Ok(())
    }

    async fn get_metadata(
        &mut self,
        metadata_type: MetadataType,
        version: &str,
    ) -> Result<Option<Metadata>, AppError> {
        let versions = [version.to_string()];
        let found = fetch_metadata(self.client()?, metadata_type, &versions).await?;
        Ok(found.into_iter().next())
    }

    async fn update_metadata(&mut self, metadata: &Metadata) -> Result<(), AppError> {
        let client = self.client()?;
        let updated = match metadata {
            Metadata::Api(m) => {
                client
                    .execute(
                        UPDATE_API_METADATA,
                        &[
                            &m.version,
                            &m.summary,
                            &m.description,
                            &m.server_url,
                            &m.path,
                            &m.method,
                            &Json(&m.api_spec),
                            &m.update_user,
                            &m.update_time,
                        ],
                    )
                    .await?
            }
            Metadata::Function(m) => {
                client
                    .execute(
                        UPDATE_FUNCTION_METADATA,
                        &[
                            &m.version,
                            &m.summary,
                            &m.description,
                            &m.script_type,
                            &m.code,
                            &Json(&m.dependencies),
                            &m.update_user,
                            &m.update_time,
                        ],
                    )
                    .await?
            }
        };
        if updated == 0 {
            return Err(not_found_error(format!(
                "Metadata version {} not found",
                metadata.version()
            )));
        }
        Ok(())
    }

    async fn delete_metadata(
        &mut self,
        metadata_type: MetadataType,
        versions: &[String],
    ) -> Result<(), AppError> {
        if versions.is_empty() {
            return Ok(());
        }
        let sql = match metadata_type {
            MetadataType::Api => DELETE_API_METADATA,
            MetadataType::Function => DELETE_FUNCTION_METADATA,
        };
        self.client()?.execute(sql, &[&versions]).await?;
        Ok(())
    }

    async fn batch_get_metadata(
        &mut self,
        metadata_type: MetadataType,
        versions: &[String],
    ) -> Result<Vec<Metadata>, AppError> {
        fetch_metadata(self.client()?, metadata_type, versions).await
    }

    async fn get_release(&mut self, operator_id: &str) -> Result<Option<Release>, AppError> {
        let row = self.client()?.query_opt(GET_RELEASE, &[&operator_id]).await?;
        row.as_ref().map(release_from_row).transpose()
    }

    async fn get_releases(&mut self, ids: &[String]) -> Result<Vec<Release>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.client()?.query(GET_RELEASES, &[&ids]).await?;
        rows.iter().map(release_from_row).collect()
    }

    async fn insert_release(&mut self, release: &Release) -> Result<(), AppError> {
        self.client()?
            .execute(
                INSERT_RELEASE,
                &[
                    &release.operator.operator_id,
                    &release.operator.name,
                    &release.operator.status.as_str(),
                    &release.operator.metadata_version,
                    &(release.tag as i64),
                    &release.release_user,
                    &release.release_time,
                    &Json(&release.operator),
                ],
            )
            .await
            .map_err(|e| {
                map_write_err(e, &format!("Release for operator {}", release.operator_id()))
            })?;
        Ok(())
    }

    async fn update_release(&mut self, release: &Release) -> Result<(), AppError> {
        let updated = self
            .client()?
            .execute(
                UPDATE_RELEASE,
                &[
                    &release.operator.operator_id,
                    &release.operator.name,
                    &release.operator.status.as_str(),
                    &release.operator.metadata_version,
                    &(release.tag as i64),
                    &release.release_user,
                    &release.release_time,
                    &Json(&release.operator),
                ],
            )
            .await?;
        if updated == 0 {
            return Err(not_found_error(format!(
                "Release for operator {} not found",
                release.operator_id()
            )));
        }
        Ok(())
    }

    async fn delete_release(&mut self, operator_id: &str) -> Result<(), AppError> {
        self.client()?.execute(DELETE_RELEASE, &[&operator_id]).await?;
        Ok(())
    }

    async fn list_release_ids(&mut self, filter: &OperatorFilter) -> Result<Vec<String>, AppError> {
        query_ids(
            self.client()?,
            LIST_RELEASE_IDS_BASE,
            LIST_RELEASE_IDS_ORDER,
            filter,
            release_column,
        )
        .await
    }

    async fn insert_history(&mut self, entry: &ReleaseHistory) -> Result<(), AppError> {
        self.client()?
            .execute(
                INSERT_HISTORY,
                &[
                    &entry.id,
                    &entry.operator_id,
                    &entry.metadata_version,
                    &(entry.tag as i64),
                    &entry.release_desc,
                    &entry.create_time,
                    &entry.update_time,
                ],
            )
            .await
            .map_err(|e| map_write_err(e, &format!("History entry {}", entry.id)))?;
        Ok(())
    }

    async fn update_history(&mut self, entry: &ReleaseHistory) -> Result<(), AppError> {
        let updated = self
            .client()?
            .execute(
                UPDATE_HISTORY,
                &[
                    &entry.id,
                    &entry.metadata_version,
                    &(entry.tag as i64),
                    &entry.release_desc,
                    &entry.update_time,
                ],
            )
            .await?;
        if updated == 0 {
            return Err(not_found_error(format!("History entry {} not found", entry.id)));
        }
        Ok(())
    }

    async fn list_history(&mut self, operator_id: &str) -> Result<Vec<ReleaseHistory>, AppError> {
        let rows = self.client()?.query(LIST_HISTORY, &[&operator_id]).await?;
        rows.iter().map(history_from_row).collect()
    }

    async fn delete_history(&mut self, operator_id: &str) -> Result<(), AppError> {
        self.client()?.execute(DELETE_HISTORY, &[&operator_id]).await?;
        Ok(())
    }

    async fn commit(mut self) -> Result<(), AppError> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self) -> Result<(), AppError> {
        self.finish("ROLLBACK").await
    }
}
