//! Table definitions for the PostgreSQL backend
//!
//! Applied in order by `PgStore::bootstrap_schema`; every statement is
//! idempotent.

/// Registry: one row per operator, the current working configuration
pub const CREATE_OPERATOR_REGISTRY: &str = r#"
    CREATE TABLE IF NOT EXISTS t_operator_registry (
        operator_id VARCHAR(64) PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        metadata_type VARCHAR(16) NOT NULL,
        metadata_version VARCHAR(64) NOT NULL,
        status VARCHAR(16) NOT NULL,
        operator_type VARCHAR(16) NOT NULL,
        execution_mode VARCHAR(16) NOT NULL,
        is_data_source BOOLEAN NOT NULL DEFAULT false,
        is_internal BOOLEAN NOT NULL DEFAULT false,
        execute_control JSONB NOT NULL,
        extension JSONB NOT NULL DEFAULT '{}'::jsonb,
        create_user VARCHAR(128) NOT NULL,
        create_time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        update_user VARCHAR(128) NOT NULL,
        update_time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
"#;

pub const CREATE_METADATA_API: &str = r#"
    CREATE TABLE IF NOT EXISTS t_metadata_api (
        version VARCHAR(64) PRIMARY KEY,
        summary TEXT NOT NULL,
        description TEXT NOT NULL,
        server_url TEXT NOT NULL,
        path TEXT NOT NULL,
        method VARCHAR(16) NOT NULL,
        api_spec JSONB NOT NULL DEFAULT 'null'::jsonb,
        create_user VARCHAR(128) NOT NULL,
        create_time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        update_user VARCHAR(128) NOT NULL,
        update_time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
"#;

pub const CREATE_METADATA_FUNCTION: &str = r#"
    CREATE TABLE IF NOT EXISTS t_metadata_function (
        version VARCHAR(64) PRIMARY KEY,
        summary TEXT NOT NULL,
        description TEXT NOT NULL,
        script_type VARCHAR(32) NOT NULL,
        code TEXT NOT NULL,
        dependencies JSONB NOT NULL DEFAULT '[]'::jsonb,
        create_user VARCHAR(128) NOT NULL,
        create_time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        update_user VARCHAR(128) NOT NULL,
        update_time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
"#;

/// Release: at most one row per operator; `body` holds the snapshotted record
pub const CREATE_OPERATOR_RELEASE: &str = r#"
    CREATE TABLE IF NOT EXISTS t_operator_release (
        operator_id VARCHAR(64) PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        status VARCHAR(16) NOT NULL,
        metadata_version VARCHAR(64) NOT NULL,
        tag BIGINT NOT NULL,
        release_user VARCHAR(128) NOT NULL,
        release_time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        body JSONB NOT NULL
    )
"#;

pub const CREATE_RELEASE_HISTORY: &str = r#"
    CREATE TABLE IF NOT EXISTS t_release_history (
        id VARCHAR(64) PRIMARY KEY,
        operator_id VARCHAR(64) NOT NULL,
        metadata_version VARCHAR(64) NOT NULL,
        tag BIGINT NOT NULL,
        release_desc TEXT NOT NULL,
        create_time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        update_time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
"#;

pub const CREATE_INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_operator_registry_name ON t_operator_registry(name);
    CREATE INDEX IF NOT EXISTS idx_operator_registry_status ON t_operator_registry(status);
    CREATE INDEX IF NOT EXISTS idx_operator_release_status ON t_operator_release(status);
    CREATE INDEX IF NOT EXISTS idx_release_history_operator ON t_release_history(operator_id, tag)
"#;

/// Backs the published-name rule when two publishes race on different rows
pub const CREATE_PUBLISHED_NAME_INDEX: &str = r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_operator_registry_published_name
        ON t_operator_registry(name) WHERE status = 'published'
"#;

/// Statements in application order
pub const STATEMENTS: &[(&str, &str)] = &[
    ("t_operator_registry", CREATE_OPERATOR_REGISTRY),
    ("t_metadata_api", CREATE_METADATA_API),
    ("t_metadata_function", CREATE_METADATA_FUNCTION),
    ("t_operator_release", CREATE_OPERATOR_RELEASE),
    ("t_release_history", CREATE_RELEASE_HISTORY),
    ("indexes", CREATE_INDEXES),
    ("uq_operator_registry_published_name", CREATE_PUBLISHED_NAME_INDEX),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_idempotent() {
        for (name, sql) in STATEMENTS {
            assert!(sql.contains("IF NOT EXISTS"), "{} is not idempotent", name);
        }
    }

    #[test]
    fn test_published_names_are_unique_in_the_schema() {
        let (_, sql) = STATEMENTS
            .iter()
            .find(|(name, _)| *name == "uq_operator_registry_published_name")
            .unwrap();
        assert!(sql.contains("CREATE UNIQUE INDEX"));
        assert!(sql.contains("t_operator_registry(name)"));
        assert!(sql.contains("WHERE status = 'published'"));
    }
}
