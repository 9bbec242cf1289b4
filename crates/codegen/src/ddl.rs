//! Runtime support DDL emitted once per batch.
//!
//! Compiled procedures assume two fixtures exist: the job-run table the
//! enqueue statements insert into, and the `app` result convention every
//! procedure returns through. Entity table DDL is a separate collaborator
//! and is not generated here.

/// The persisted job-run schema, the contract with the external worker.
/// `identifier` uniqueness is what makes duplicate enqueues a no-op.
pub fn job_run_table_ddl() -> String {
    r#"CREATE SCHEMA IF NOT EXISTS jobs;

CREATE TABLE IF NOT EXISTS jobs.tb_job_run (
    id              BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    identifier      TEXT NOT NULL UNIQUE,
    service_name    TEXT NOT NULL,
    operation       TEXT NOT NULL,
    input_data      JSONB NOT NULL DEFAULT '{}'::jsonb,
    output_data     JSONB,
    status          TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'running', 'completed', 'failed')),
    attempts        INTEGER NOT NULL DEFAULT 0,
    max_attempts    INTEGER NOT NULL DEFAULT 3,
    timeout_seconds INTEGER NOT NULL DEFAULT 30,
    correlation_id  UUID,
    entity_type     TEXT,
    entity_pk       INTEGER,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    started_at      TIMESTAMPTZ,
    completed_at    TIMESTAMPTZ,
    error_message   TEXT
);

CREATE INDEX IF NOT EXISTS ix_job_run_pending
    ON jobs.tb_job_run (created_at)
    WHERE status = 'pending';
"#
    .to_string()
}

/// The tagged success/failure result convention: a composite result
/// type, an audit log, and the helper every compiled procedure returns
/// through.
pub fn mutation_support_ddl() -> String {
    r#"CREATE SCHEMA IF NOT EXISTS app;

CREATE TABLE IF NOT EXISTS app.tb_mutation_log (
    id         BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    mutation   TEXT NOT NULL,
    status     TEXT NOT NULL,
    payload    JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

DO $do$ BEGIN
    CREATE TYPE app.mutation_result AS (
        status  TEXT,
        payload JSONB
    );
EXCEPTION WHEN duplicate_object THEN NULL;
END $do$;

CREATE OR REPLACE FUNCTION app.log_and_return_mutation(
    p_mutation TEXT,
    p_status TEXT,
    p_payload JSONB
) RETURNS app.mutation_result
LANGUAGE plpgsql
AS $$
DECLARE
    v_result app.mutation_result;
BEGIN
    INSERT INTO app.tb_mutation_log (mutation, status, payload)
    VALUES (p_mutation, p_status, p_payload);
    v_result.status := p_status;
    v_result.payload := p_payload;
    RETURN v_result;
END;
$$;
"#
    .to_string()
}

/// Everything compiled procedures depend on, in apply order.
pub fn runtime_ddl() -> String {
    format!("{}\n{}", mutation_support_ddl(), job_run_table_ddl())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_run_columns_present() {
        let ddl = job_run_table_ddl();
        for column in [
            "identifier",
            "service_name",
            "operation",
            "input_data",
            "output_data",
            "status",
            "attempts",
            "max_attempts",
            "timeout_seconds",
            "correlation_id",
            "entity_type",
            "entity_pk",
            "created_at",
            "started_at",
            "completed_at",
            "error_message",
        ] {
            assert!(ddl.contains(column), "missing column {}", column);
        }
        assert!(ddl.contains("identifier      TEXT NOT NULL UNIQUE"));
    }

    #[test]
    fn test_runtime_ddl_orders_support_before_jobs() {
        let ddl = runtime_ddl();
        let app = ddl.find("app.mutation_result").unwrap();
        let jobs = ddl.find("jobs.tb_job_run").unwrap();
        assert!(app < jobs);
    }
}
