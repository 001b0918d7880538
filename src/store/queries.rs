//! SQL query constants
//!
//! Contains all SQL used by the PostgreSQL backend. Filtered listings are
//! assembled in `postgres.rs` from the `*_BASE` prefixes.

// =============================================================================
// REGISTRY
// =============================================================================

pub const GET_OPERATOR: &str = r#"
    SELECT operator_id, name, metadata_type, metadata_version, status, operator_type,
           execution_mode, is_data_source, is_internal, execute_control, extension,
           create_user, create_time, update_user, update_time
    FROM t_operator_registry
    WHERE operator_id = $1
"#;

pub const LOCK_OPERATOR: &str = r#"
    SELECT operator_id, name, metadata_type, metadata_version, status, operator_type,
           execution_mode, is_data_source, is_internal, execute_control, extension,
           create_user, create_time, update_user, update_time
    FROM t_operator_registry
    WHERE operator_id = $1
    FOR UPDATE
"#;

pub const GET_OPERATORS: &str = r#"
    SELECT operator_id, name, metadata_type, metadata_version, status, operator_type,
           execution_mode, is_data_source, is_internal, execute_control, extension,
           create_user, create_time, update_user, update_time
    FROM t_operator_registry
    WHERE operator_id = ANY($1)
"#;

pub const FIND_PUBLISHED_BY_NAME: &str = r#"
    SELECT operator_id, name, metadata_type, metadata_version, status, operator_type,
           execution_mode, is_data_source, is_internal, execute_control, extension,
           create_user, create_time, update_user, update_time
    FROM t_operator_registry
    WHERE name = $1 AND status = 'published'
"#;

pub const INSERT_OPERATOR: &str = r#"
    INSERT INTO t_operator_registry (
        operator_id, name, metadata_type, metadata_version, status, operator_type,
        execution_mode, is_data_source, is_internal, execute_control, extension,
        create_user, create_time, update_user, update_time
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
"#;

pub const UPDATE_OPERATOR: &str = r#"
    UPDATE t_operator_registry
    SET name = $2, metadata_type = $3, metadata_version = $4, status = $5,
        operator_type = $6, execution_mode = $7, is_data_source = $8, is_internal = $9,
        execute_control = $10, extension = $11, update_user = $12, update_time = $13
    WHERE operator_id = $1
"#;

pub const DELETE_OPERATOR: &str = "DELETE FROM t_operator_registry WHERE operator_id = $1";

pub const LIST_OPERATOR_IDS_BASE: &str = "SELECT operator_id FROM t_operator_registry WHERE 1 = 1";

pub const LIST_OPERATOR_IDS_ORDER: &str = " ORDER BY update_time DESC, operator_id ASC";

// =============================================================================
// METADATA
// =============================================================================

pub const API_COLUMNS: &str = "version, summary, description, server_url, path, method, \
     api_spec, create_user, create_time, update_user, update_time";

pub const FUNCTION_COLUMNS: &str = "version, summary, description, script_type, code, \
     dependencies, create_user, create_time, update_user, update_time";

pub const INSERT_API_METADATA: &str = r#"
    INSERT INTO t_metadata_api (
        version, summary, description, server_url, path, method, api_spec,
        create_user, create_time, update_user, update_time
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
"#;

pub const UPDATE_API_METADATA: &str = r#"
    UPDATE t_metadata_api
    SET summary = $2, description = $3, server_url = $4, path = $5, method = $6,
        api_spec = $7, update_user = $8, update_time = $9
    WHERE version = $1
"#;

pub const INSERT_FUNCTION_METADATA: &str = r#"
    INSERT INTO t_metadata_function (
        version, summary, description, script_type, code, dependencies,
        create_user, create_time, update_user, update_time
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
"#;

pub const UPDATE_FUNCTION_METADATA: &str = r#"
    UPDATE t_metadata_function
    SET summary = $2, description = $3, script_type = $4, code = $5,
        dependencies = $6, update_user = $7, update_time = $8
    WHERE version = $1
"#;

pub const DELETE_API_METADATA: &str = "DELETE FROM t_metadata_api WHERE version = ANY($1)";

pub const DELETE_FUNCTION_METADATA: &str =
    "DELETE FROM t_metadata_function WHERE version = ANY($1)";

// =============================================================================
// RELEASE
// =============================================================================

pub const GET_RELEASE: &str = r#"
    SELECT operator_id, tag, release_user, release_time, body
    FROM t_operator_release
    WHERE operator_id = $1
"#;

pub const GET_RELEASES: &str = r#"
    SELECT operator_id, tag, release_user, release_time, body
    FROM t_operator_release
    WHERE operator_id = ANY($1)
"#;

pub const INSERT_RELEASE: &str = r#"
    INSERT INTO t_operator_release (
        operator_id, name, status, metadata_version, tag, release_user, release_time, body
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#;

pub const UPDATE_RELEASE: &str = r#"
    UPDATE t_operator_release
    SET name = $2, status = $3, metadata_version = $4, tag = $5,
        release_user = $6, release_time = $7, body = $8
    WHERE operator_id = $1
"#;

pub const DELETE_RELEASE: &str = "DELETE FROM t_operator_release WHERE operator_id = $1";

pub const LIST_RELEASE_IDS_BASE: &str = "SELECT operator_id FROM t_operator_release WHERE 1 = 1";

pub const LIST_RELEASE_IDS_ORDER: &str = " ORDER BY release_time DESC, operator_id ASC";

// =============================================================================
// RELEASE HISTORY
// =============================================================================

pub const INSERT_HISTORY: &str = r#"
    INSERT INTO t_release_history (
        id, operator_id, metadata_version, tag, release_desc, create_time, update_time
    ) VALUES ($1, $2, $3, $4, $5, $6, $7)
"#;

pub const UPDATE_HISTORY: &str = r#"
    UPDATE t_release_history
    SET metadata_version = $2, tag = $3, release_desc = $4, update_time = $5
    WHERE id = $1
"#;

pub const LIST_HISTORY: &str = r#"
    SELECT id, operator_id, metadata_version, tag, release_desc, create_time, update_time
    FROM t_release_history
    WHERE operator_id = $1
    ORDER BY tag ASC, create_time ASC
"#;

pub const DELETE_HISTORY: &str = "DELETE FROM t_release_history WHERE operator_id = $1";

/// Connectivity check
pub const PING: &str = "SELECT 1 as ok";
