use rusqlite::{params, Connection, OptionalExtension};

use neon_core::{current_unix_timestamp_ms, new_entity_id};
use neon_types::{Case, CaseDraft, EvalError, Project, Suite, SuiteConfig, SuiteDraft};

use super::rows::{
    case_from_row, encode_json, encode_json_opt, map_store_error, project_from_row, suite_from_row,
    CASE_COLUMNS, PROJECT_COLUMNS, SUITE_COLUMNS,
};
use super::SqliteEvalStore;

impl SqliteEvalStore {
    pub async fn create_project(
        &self,
        name: &str,
        slug: &str,
        trace_tracking_uri: Option<&str>,
    ) -> Result<Project, EvalError> {
        if name.trim().is_empty() || slug.trim().is_empty() {
            return Err(EvalError::invalid("project name and slug are required"));
        }
        let connection = self.connection.lock().await;
        let now = current_unix_timestamp_ms() as i64;
        let id = new_entity_id();
        connection
            .execute(
                "INSERT INTO projects (id, name, slug, trace_tracking_uri, created_unix_ms, updated_unix_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, name, slug, trace_tracking_uri, now],
            )
            .map_err(|error| map_store_error(error, &format!("project slug '{slug}'")))?;
        drop(connection);
        self.get_project(&id).await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Project, EvalError> {
        let connection = self.connection.lock().await;
        connection
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                params![project_id],
                project_from_row,
            )
            .map_err(|error| map_store_error(error, &format!("project '{project_id}'")))
    }

    pub async fn get_project_by_slug(&self, slug: &str) -> Result<Project, EvalError> {
        let connection = self.connection.lock().await;
        connection
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE slug = ?1"),
                params![slug],
                project_from_row,
            )
            .map_err(|error| map_store_error(error, &format!("project slug '{slug}'")))
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, EvalError> {
        let connection = self.connection.lock().await;
        let mut statement = connection
            .prepare(&format!(
                "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_unix_ms DESC"
            ))
            .map_err(|error| map_store_error(error, "projects"))?;
        let rows = statement
            .query_map([], project_from_row)
            .map_err(|error| map_store_error(error, "projects"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|error| map_store_error(error, "projects"))
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<(), EvalError> {
        let connection = self.connection.lock().await;
        let deleted = connection
            .execute("DELETE FROM projects WHERE id = ?1", params![project_id])
            .map_err(|error| map_store_error(error, &format!("project '{project_id}'")))?;
        if deleted == 0 {
            return Err(EvalError::not_found(format!("project '{project_id}'")));
        }
        Ok(())
    }

    /// Creates a suite together with its cases in one transaction.
    ///
    /// Case-level defaults (scorers, min_score, timeout) that the draft omits
    /// are filled from the suite config.
    pub async fn create_suite(
        &self,
        project_id: &str,
        draft: &SuiteDraft,
    ) -> Result<Suite, EvalError> {
        if draft.name.trim().is_empty() {
            return Err(EvalError::invalid("suite name is required"));
        }
        if draft.agent_id.trim().is_empty() {
            return Err(EvalError::invalid("suite agent_id is required"));
        }
        let suite_id = new_entity_id();
        {
            let mut connection = self.connection.lock().await;
            project_exists(&connection, project_id)?;
            let transaction = connection
                .transaction()
                .map_err(|error| map_store_error(error, "suite create"))?;
            let now = current_unix_timestamp_ms() as i64;
            let config_json = encode_json("suite config", &draft.config)?;
            transaction
                .execute(
                    "INSERT INTO suites (id, project_id, name, description, agent_id, config_json, \
                     created_unix_ms, updated_unix_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    params![
                        suite_id,
                        project_id,
                        draft.name,
                        draft.description,
                        draft.agent_id,
                        config_json,
                        now
                    ],
                )
                .map_err(|error| {
                    map_store_error(error, &format!("suite name '{}'", draft.name))
                })?;
            for case_draft in &draft.cases {
                insert_case(&transaction, &suite_id, &draft.config, case_draft, now)?;
            }
            transaction
                .commit()
                .map_err(|error| map_store_error(error, "suite create"))?;
        }
        self.get_suite(project_id, &suite_id).await
    }

    pub async fn get_suite(&self, project_id: &str, suite_id: &str) -> Result<Suite, EvalError> {
        let connection = self.connection.lock().await;
        let row = connection
            .query_row(
                &format!(
                    "SELECT {SUITE_COLUMNS} FROM suites WHERE id = ?1 AND project_id = ?2"
                ),
                params![suite_id, project_id],
                |row| Ok(suite_from_row(row)),
            )
            .optional()
            .map_err(|error| map_store_error(error, &format!("suite '{suite_id}'")))?;
        row.ok_or_else(|| EvalError::not_found(format!("suite '{suite_id}'")))?
    }

    pub async fn get_suite_by_name(&self, project_id: &str, name: &str) -> Result<Suite, EvalError> {
        let connection = self.connection.lock().await;
        let row = connection
            .query_row(
                &format!(
                    "SELECT {SUITE_COLUMNS} FROM suites WHERE project_id = ?1 AND name = ?2"
                ),
                params![project_id, name],
                |row| Ok(suite_from_row(row)),
            )
            .optional()
            .map_err(|error| map_store_error(error, &format!("suite name '{name}'")))?;
        row.ok_or_else(|| EvalError::not_found(format!("suite name '{name}'")))?
    }

    pub async fn list_suites(&self, project_id: &str) -> Result<Vec<Suite>, EvalError> {
        let connection = self.connection.lock().await;
        let mut statement = connection
            .prepare(&format!(
                "SELECT {SUITE_COLUMNS} FROM suites WHERE project_id = ?1 \
                 ORDER BY created_unix_ms DESC"
            ))
            .map_err(|error| map_store_error(error, "suites"))?;
        let rows = statement
            .query_map(params![project_id], |row| Ok(suite_from_row(row)))
            .map_err(|error| map_store_error(error, "suites"))?;
        let mut suites = Vec::new();
        for row in rows {
            suites.push(row.map_err(|error| map_store_error(error, "suites"))??);
        }
        Ok(suites)
    }

    /// Updates suite metadata and config. Cases are managed through the case
    /// operations and are left untouched.
    pub async fn update_suite(
        &self,
        project_id: &str,
        suite_id: &str,
        draft: &SuiteDraft,
    ) -> Result<Suite, EvalError> {
        {
            let connection = self.connection.lock().await;
            let now = current_unix_timestamp_ms() as i64;
            let config_json = encode_json("suite config", &draft.config)?;
            let updated = connection
                .execute(
                    "UPDATE suites SET name = ?1, description = ?2, agent_id = ?3, \
                     config_json = ?4, updated_unix_ms = ?5 WHERE id = ?6 AND project_id = ?7",
                    params![
                        draft.name,
                        draft.description,
                        draft.agent_id,
                        config_json,
                        now,
                        suite_id,
                        project_id
                    ],
                )
                .map_err(|error| {
                    map_store_error(error, &format!("suite name '{}'", draft.name))
                })?;
            if updated == 0 {
                return Err(EvalError::not_found(format!("suite '{suite_id}'")));
            }
        }
        self.get_suite(project_id, suite_id).await
    }

    pub async fn delete_suite(&self, project_id: &str, suite_id: &str) -> Result<(), EvalError> {
        let connection = self.connection.lock().await;
        let deleted = connection
            .execute(
                "DELETE FROM suites WHERE id = ?1 AND project_id = ?2",
                params![suite_id, project_id],
            )
            .map_err(|error| map_store_error(error, &format!("suite '{suite_id}'")))?;
        if deleted == 0 {
            return Err(EvalError::not_found(format!("suite '{suite_id}'")));
        }
        Ok(())
    }

    pub async fn create_case(
        &self,
        project_id: &str,
        suite_id: &str,
        draft: &CaseDraft,
    ) -> Result<Case, EvalError> {
        let suite = self.get_suite(project_id, suite_id).await?;
        let case_id = {
            let mut connection = self.connection.lock().await;
            let transaction = connection
                .transaction()
                .map_err(|error| map_store_error(error, "case create"))?;
            let now = current_unix_timestamp_ms() as i64;
            let case_id = insert_case(&transaction, suite_id, &suite.config, draft, now)?;
            transaction
                .commit()
                .map_err(|error| map_store_error(error, "case create"))?;
            case_id
        };
        self.get_case(project_id, &case_id).await
    }

    pub async fn get_case(&self, project_id: &str, case_id: &str) -> Result<Case, EvalError> {
        let connection = self.connection.lock().await;
        let row = connection
            .query_row(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases c JOIN suites s ON s.id = c.suite_id \
                     WHERE c.id = ?1 AND s.project_id = ?2"
                ),
                params![case_id, project_id],
                |row| Ok(case_from_row(row)),
            )
            .optional()
            .map_err(|error| map_store_error(error, &format!("case '{case_id}'")))?;
        row.ok_or_else(|| EvalError::not_found(format!("case '{case_id}'")))?
    }

    pub async fn list_cases(
        &self,
        project_id: &str,
        suite_id: &str,
    ) -> Result<Vec<Case>, EvalError> {
        let connection = self.connection.lock().await;
        let mut statement = connection
            .prepare(&format!(
                "SELECT {CASE_COLUMNS} FROM cases c JOIN suites s ON s.id = c.suite_id \
                 WHERE c.suite_id = ?1 AND s.project_id = ?2 \
                 ORDER BY c.created_unix_ms ASC, c.rowid ASC"
            ))
            .map_err(|error| map_store_error(error, "cases"))?;
        let rows = statement
            .query_map(params![suite_id, project_id], |row| Ok(case_from_row(row)))
            .map_err(|error| map_store_error(error, "cases"))?;
        let mut cases = Vec::new();
        for row in rows {
            cases.push(row.map_err(|error| map_store_error(error, "cases"))??);
        }
        Ok(cases)
    }

    /// Cases are immutable while any run of their suite is pending or running.
    pub async fn update_case(
        &self,
        project_id: &str,
        case_id: &str,
        draft: &CaseDraft,
    ) -> Result<Case, EvalError> {
        let existing = self.get_case(project_id, case_id).await?;
        let suite = self.get_suite(project_id, &existing.suite_id).await?;
        {
            let connection = self.connection.lock().await;
            reject_when_suite_is_active(&connection, &existing.suite_id)?;
            let now = current_unix_timestamp_ms() as i64;
            let resolved = ResolvedCaseFields::resolve(&suite.config, draft)?;
            connection
                .execute(
                    "UPDATE cases SET name = ?1, description = ?2, input_json = ?3, \
                     expected_tools_json = ?4, expected_tool_sequence_json = ?5, \
                     expected_output_contains_json = ?6, expected_output_pattern = ?7, \
                     scorers_json = ?8, scorer_config_json = ?9, min_score = ?10, \
                     timeout_seconds = ?11, tags_json = ?12, updated_unix_ms = ?13 \
                     WHERE id = ?14",
                    params![
                        draft.name,
                        draft.description,
                        resolved.input_json,
                        resolved.expected_tools_json,
                        resolved.expected_tool_sequence_json,
                        resolved.expected_output_contains_json,
                        draft.expected_output_pattern,
                        resolved.scorers_json,
                        resolved.scorer_config_json,
                        resolved.min_score,
                        resolved.timeout_seconds,
                        resolved.tags_json,
                        now,
                        case_id
                    ],
                )
                .map_err(|error| map_store_error(error, &format!("case name '{}'", draft.name)))?;
        }
        self.get_case(project_id, case_id).await
    }

    /// Replaces every case of a suite in one transaction, substituting suite
    /// defaults into the new drafts. Rejected while a run is active.
    pub async fn replace_cases(
        &self,
        project_id: &str,
        suite_id: &str,
        drafts: &[CaseDraft],
    ) -> Result<Vec<Case>, EvalError> {
        let suite = self.get_suite(project_id, suite_id).await?;
        {
            let mut connection = self.connection.lock().await;
            reject_when_suite_is_active(&connection, suite_id)?;
            let transaction = connection
                .transaction()
                .map_err(|error| map_store_error(error, "case replace"))?;
            transaction
                .execute("DELETE FROM cases WHERE suite_id = ?1", params![suite_id])
                .map_err(|error| map_store_error(error, "case replace"))?;
            let now = current_unix_timestamp_ms() as i64;
            for draft in drafts {
                insert_case(&transaction, suite_id, &suite.config, draft, now)?;
            }
            transaction
                .commit()
                .map_err(|error| map_store_error(error, "case replace"))?;
        }
        self.list_cases(project_id, suite_id).await
    }

    pub async fn delete_case(&self, project_id: &str, case_id: &str) -> Result<(), EvalError> {
        let existing = self.get_case(project_id, case_id).await?;
        let connection = self.connection.lock().await;
        reject_when_suite_is_active(&connection, &existing.suite_id)?;
        connection
            .execute("DELETE FROM cases WHERE id = ?1", params![case_id])
            .map_err(|error| map_store_error(error, &format!("case '{case_id}'")))?;
        Ok(())
    }
}

/// Case fields after suite-level defaults have been substituted.
struct ResolvedCaseFields {
    input_json: String,
    expected_tools_json: Option<String>,
    expected_tool_sequence_json: Option<String>,
    expected_output_contains_json: Option<String>,
    scorers_json: String,
    scorer_config_json: Option<String>,
    min_score: f64,
    timeout_seconds: i64,
    tags_json: String,
}

impl ResolvedCaseFields {
    fn resolve(config: &SuiteConfig, draft: &CaseDraft) -> Result<Self, EvalError> {
        let min_score = draft.min_score.unwrap_or(config.default_min_score);
        if !(0.0..=1.0).contains(&min_score) {
            return Err(EvalError::invalid(format!(
                "case '{}': min_score {min_score} is outside [0, 1]",
                draft.name
            )));
        }
        let scorers = if draft.scorers.is_empty() {
            config.default_scorers.clone()
        } else {
            draft.scorers.clone()
        };
        Ok(Self {
            input_json: encode_json("case input", &draft.input)?,
            expected_tools_json: encode_json_opt("expected_tools", draft.expected_tools.as_ref())?,
            expected_tool_sequence_json: encode_json_opt(
                "expected_tool_sequence",
                draft.expected_tool_sequence.as_ref(),
            )?,
            expected_output_contains_json: encode_json_opt(
                "expected_output_contains",
                draft.expected_output_contains.as_ref(),
            )?,
            scorers_json: encode_json("case scorers", &scorers)?,
            scorer_config_json: encode_json_opt("scorer_config", draft.scorer_config.as_ref())?,
            min_score,
            timeout_seconds: draft
                .timeout_seconds
                .unwrap_or(config.default_timeout_seconds) as i64,
            tags_json: encode_json("case tags", &draft.tags)?,
        })
    }
}

fn insert_case(
    connection: &Connection,
    suite_id: &str,
    config: &SuiteConfig,
    draft: &CaseDraft,
    now: i64,
) -> Result<String, EvalError> {
    if draft.name.trim().is_empty() {
        return Err(EvalError::invalid("case name is required"));
    }
    let resolved = ResolvedCaseFields::resolve(config, draft)?;
    let case_id = new_entity_id();
    connection
        .execute(
            "INSERT INTO cases (id, suite_id, name, description, input_json, expected_tools_json, \
             expected_tool_sequence_json, expected_output_contains_json, expected_output_pattern, \
             scorers_json, scorer_config_json, min_score, timeout_seconds, tags_json, \
             created_unix_ms, updated_unix_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            params![
                case_id,
                suite_id,
                draft.name,
                draft.description,
                resolved.input_json,
                resolved.expected_tools_json,
                resolved.expected_tool_sequence_json,
                resolved.expected_output_contains_json,
                draft.expected_output_pattern,
                resolved.scorers_json,
                resolved.scorer_config_json,
                resolved.min_score,
                resolved.timeout_seconds,
                resolved.tags_json,
                now
            ],
        )
        .map_err(|error| map_store_error(error, &format!("case name '{}'", draft.name)))?;
    Ok(case_id)
}

fn project_exists(connection: &Connection, project_id: &str) -> Result<(), EvalError> {
    let found: Option<i64> = connection
        .query_row(
            "SELECT 1 FROM projects WHERE id = ?1",
            params![project_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|error| map_store_error(error, &format!("project '{project_id}'")))?;
    if found.is_none() {
        return Err(EvalError::not_found(format!("project '{project_id}'")));
    }
    Ok(())
}

fn reject_when_suite_is_active(connection: &Connection, suite_id: &str) -> Result<(), EvalError> {
    let active: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM runs WHERE suite_id = ?1 AND status IN ('pending', 'running')",
            params![suite_id],
            |row| row.get(0),
        )
        .map_err(|error| map_store_error(error, "active run check"))?;
    if active > 0 {
        return Err(EvalError::conflict(
            "suite has a pending or running run; cases are immutable until it finishes",
        ));
    }
    Ok(())
}
