/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup (idempotent).
///
/// `memory_limit` is passed at runtime from `Config.duckdb_memory_limit`
/// (env `FUNNELFLOW_DUCKDB_MEMORY`, default `"512MB"`). DuckDB accepts any
/// size string it supports — e.g. `"512MB"`, `"1GB"`, `"4GB"`. Always set an
/// explicit limit; the DuckDB default (80% of system RAM) is not acceptable
/// for a server process. `SET threads = 2` bounds the background thread pool
/// for single-writer embedded use.
///
/// NOTE: DuckDB does not support deferred FK enforcement, so the schema
/// declares no FOREIGN KEYs. Cascade deletes are done manually inside one
/// transaction, child rows first (see delete_funnel / delete_website).
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- SETTINGS
-- ===========================================
-- Keys stored in this table:
--   'version'     – Database schema version (for migrations)
--   'install_id'  – Unique installation identifier
CREATE TABLE IF NOT EXISTS settings (
    key             VARCHAR PRIMARY KEY,
    value           VARCHAR NOT NULL
);

-- ===========================================
-- WEBSITES
-- ===========================================
-- `domain` is stored lowercased and must be unique: the tracking endpoint
-- accepts a domain in place of the website id and resolves through it.
CREATE TABLE IF NOT EXISTS websites (
    id              VARCHAR PRIMARY KEY,           -- 'site_' + 10 alphanumeric chars
    name            VARCHAR NOT NULL,
    domain          VARCHAR NOT NULL UNIQUE,
    timezone        VARCHAR(64) NOT NULL DEFAULT 'UTC',  -- IANA timezone string
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- ===========================================
-- SESSIONS (one row per client-reported session per website)
-- ===========================================
-- Session ids are opaque client-generated strings, so uniqueness only holds
-- per website; the composite key scopes them.
CREATE TABLE IF NOT EXISTS sessions (
    website_id      VARCHAR NOT NULL,
    session_id      VARCHAR NOT NULL,
    first_seen      TIMESTAMP NOT NULL,
    last_seen       TIMESTAMP NOT NULL,
    PRIMARY KEY (website_id, session_id)
);

-- ===========================================
-- FUNNELS
-- ===========================================
CREATE TABLE IF NOT EXISTS funnels (
    id              VARCHAR PRIMARY KEY,           -- 'fun_' + 21 alphanumeric chars
    website_id      VARCHAR NOT NULL,
    name            VARCHAR NOT NULL,
    description     VARCHAR,
    is_active       BOOLEAN NOT NULL DEFAULT true,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_funnels_website
    ON funnels(website_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_funnels_website_name
    ON funnels(website_id, name);

-- Step rows are always rewritten as a whole set on funnel update, which keeps
-- step_number contiguous from 1 without ever renumbering in place.
CREATE TABLE IF NOT EXISTS funnel_steps (
    id              VARCHAR PRIMARY KEY,           -- 'fstep_' + 21 alphanumeric chars
    funnel_id       VARCHAR NOT NULL,
    step_number     INTEGER NOT NULL,              -- 1-based, contiguous
    name            VARCHAR NOT NULL,
    step_type       VARCHAR NOT NULL,              -- 'page_view' | 'custom_event'
    url_pattern     VARCHAR,                       -- page_view only
    match_type      VARCHAR,                       -- 'exact' | 'contains' | 'starts_with' | 'regex'
    trigger_json    VARCHAR,                       -- custom_event only; serialized TriggerRule
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_funnel_steps_funnel_number
    ON funnel_steps(funnel_id, step_number);

-- ===========================================
-- STEP COMPLETIONS (the conversion ledger)
-- ===========================================
-- One row per (step, session), ever. The UNIQUE constraint is what makes
-- completion recording idempotent: INSERT OR IGNORE absorbs replays and
-- concurrent duplicates without erroring. funnel_id / step_number /
-- website_id are denormalized so progress reads and aggregation never join
-- back through funnel_steps.
CREATE TABLE IF NOT EXISTS step_completions (
    id              VARCHAR NOT NULL,              -- UUID v4
    website_id      VARCHAR NOT NULL,
    funnel_id       VARCHAR NOT NULL,
    step_id         VARCHAR NOT NULL,
    step_number     INTEGER NOT NULL,
    session_id      VARCHAR NOT NULL,
    url             VARCHAR NOT NULL,              -- the URL that triggered the completion
    completed_at    TIMESTAMP NOT NULL,
    UNIQUE (step_id, session_id)
);
-- Completed-set load at ingestion time
CREATE INDEX IF NOT EXISTS idx_completions_website_session
    ON step_completions(website_id, session_id);
-- Per-step counts over a reporting window
CREATE INDEX IF NOT EXISTS idx_completions_funnel_step_time
    ON step_completions(funnel_id, step_number, completed_at);
"#
    )
}

/// Migrations tracking table SQL.
///
/// Run before the schema init SQL. Tracks which numbered migrations have been
/// applied so restarts don't re-run them.
pub const MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    id          VARCHAR PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;
