use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use neon_core::{current_unix_timestamp_ms, new_entity_id};
use neon_types::{ApiKey, ApiKeyScope, EvalError};

use super::rows::{decode_json, encode_json, from_unix_ms, map_store_error, to_unix_ms};
use super::SqliteEvalStore;

const API_KEY_COLUMNS: &str =
    "id, project_id, key_prefix, name, scopes_json, created_unix_ms, expires_unix_ms, is_active";

fn api_key_from_row(row: &Row<'_>) -> Result<ApiKey, EvalError> {
    let fail = |error: rusqlite::Error| map_store_error(error, "api key row");
    let scopes_json: String = row.get(4).map_err(fail)?;
    let scopes: Vec<ApiKeyScope> = decode_json("api key scopes", &scopes_json)?;
    Ok(ApiKey {
        id: row.get(0).map_err(fail)?,
        project_id: row.get(1).map_err(fail)?,
        key_prefix: row.get(2).map_err(fail)?,
        name: row.get(3).map_err(fail)?,
        scopes,
        created_at: from_unix_ms(row.get(5).map_err(fail)?),
        expires_at: row
            .get::<_, Option<i64>>(6)
            .map_err(fail)?
            .map(from_unix_ms),
        is_active: row.get::<_, i64>(7).map_err(fail)? != 0,
    })
}

impl SqliteEvalStore {
    /// Registers an externally issued API key. The engine only ever stores the
    /// key hash; the plaintext secret never reaches this boundary.
    pub async fn provision_api_key(
        &self,
        project_id: &str,
        name: &str,
        key_prefix: &str,
        key_hash: &str,
        scopes: &[ApiKeyScope],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ApiKey, EvalError> {
        let id = new_entity_id();
        let connection = self.connection.lock().await;
        let now = current_unix_timestamp_ms() as i64;
        connection
            .execute(
                "INSERT INTO api_keys (id, project_id, key_prefix, key_hash, name, scopes_json, \
                 created_unix_ms, expires_unix_ms, is_active) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)",
                params![
                    id,
                    project_id,
                    key_prefix,
                    key_hash,
                    name,
                    encode_json("api key scopes", &scopes)?,
                    now,
                    expires_at.map(to_unix_ms)
                ],
            )
            .map_err(|error| map_store_error(error, &format!("api key '{key_prefix}'")))?;
        connection
            .query_row(
                &format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = ?1"),
                params![id],
                |row| Ok(api_key_from_row(row)),
            )
            .map_err(|error| map_store_error(error, &format!("api key '{key_prefix}'")))?
    }

    /// Looks up an API key by secret hash. Expiry and active checks are the
    /// authenticator's responsibility.
    pub async fn find_api_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<ApiKey>, EvalError> {
        let connection = self.connection.lock().await;
        let row = connection
            .query_row(
                &format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = ?1"),
                params![key_hash],
                |row| Ok(api_key_from_row(row)),
            )
            .optional()
            .map_err(|error| map_store_error(error, "api key lookup"))?;
        row.transpose()
    }
}
