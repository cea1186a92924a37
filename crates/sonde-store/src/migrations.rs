//! Numbered schema migrations, applied in order inside one transaction at
//! startup (spec.md §4.A). Nothing here rewrites a populated column
//! destructively; a later migration that needs to reshape data must add a
//! compensating backfill step alongside the `ALTER`/`CREATE`.

pub const MIGRATIONS: &[&str] = &[
    // 1: core entity tables.
    r#"
    CREATE TABLE agents (
        id                    TEXT PRIMARY KEY,
        name                  TEXT NOT NULL UNIQUE,
        status                TEXT NOT NULL DEFAULT 'offline',
        last_seen             TEXT,
        os                    TEXT,
        agent_version         TEXT,
        packs_json            TEXT NOT NULL DEFAULT '[]',
        cert_pem              TEXT,
        cert_fingerprint      TEXT,
        attestation_json      TEXT,
        attestation_mismatch  INTEGER NOT NULL DEFAULT 0,
        created_at            TEXT NOT NULL,
        updated_at            TEXT NOT NULL
    );

    CREATE TABLE integrations (
        id                TEXT PRIMARY KEY,
        type              TEXT NOT NULL,
        name              TEXT NOT NULL UNIQUE,
        config_encrypted  TEXT NOT NULL,
        status            TEXT NOT NULL DEFAULT 'untested',
        last_tested_at    TEXT,
        last_test_result  TEXT,
        created_at        TEXT NOT NULL,
        updated_at        TEXT NOT NULL
    );

    CREATE TABLE tags (
        entity_kind  TEXT NOT NULL,
        entity_id    TEXT NOT NULL,
        tag          TEXT NOT NULL,
        PRIMARY KEY (entity_kind, entity_id, tag)
    );
    "#,
    // 2: audit ledger.
    r#"
    CREATE TABLE audit_log (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp      TEXT NOT NULL,
        api_key_id     TEXT,
        agent_id       TEXT,
        probe          TEXT NOT NULL,
        status         TEXT NOT NULL,
        duration_ms    INTEGER NOT NULL,
        request_json   TEXT,
        response_json  TEXT,
        prev_hash      TEXT NOT NULL
    );
    "#,
    // 3: enrollment and CA.
    r#"
    CREATE TABLE enrollment_tokens (
        token          TEXT PRIMARY KEY,
        created_at     TEXT NOT NULL,
        expires_at     TEXT NOT NULL,
        used_at        TEXT,
        used_by_agent  TEXT
    );

    CREATE TABLE hub_ca (
        id          INTEGER PRIMARY KEY CHECK (id = 1),
        cert_pem    TEXT NOT NULL,
        key_pem     TEXT,
        key_pem_enc TEXT,
        created_at  TEXT NOT NULL
    );
    "#,
    // 4: API keys.
    r#"
    CREATE TABLE api_keys (
        id             TEXT PRIMARY KEY,
        name           TEXT NOT NULL,
        key_hash       TEXT NOT NULL UNIQUE,
        policy_json    TEXT NOT NULL DEFAULT '{}',
        role_id        TEXT,
        key_type       TEXT NOT NULL,
        owner_id       TEXT,
        created_at     TEXT NOT NULL,
        expires_at     TEXT,
        revoked_at     TEXT,
        last_used_at   TEXT
    );
    "#,
    // 5: rolling probe results.
    r#"
    CREATE TABLE probe_results (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        probe           TEXT NOT NULL,
        agent           TEXT,
        integration_id  TEXT,
        status          TEXT NOT NULL,
        duration_ms     INTEGER NOT NULL,
        data_json       TEXT,
        error_text      TEXT,
        ts              TEXT NOT NULL
    );
    CREATE INDEX idx_probe_results_probe_ts ON probe_results (probe, ts);
    CREATE INDEX idx_probe_results_agent_ts ON probe_results (agent, ts);
    "#,
    // 6: critical paths / runbooks / misc settings.
    r#"
    CREATE TABLE critical_paths (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );

    CREATE TABLE critical_path_steps (
        id                 TEXT PRIMARY KEY,
        critical_path_id   TEXT NOT NULL REFERENCES critical_paths(id),
        position           INTEGER NOT NULL,
        target_kind        TEXT NOT NULL,
        target_id          TEXT NOT NULL,
        probes_json        TEXT NOT NULL
    );
    CREATE INDEX idx_critical_path_steps_path ON critical_path_steps (critical_path_id, position);

    CREATE TABLE runbook_definitions (
        category       TEXT PRIMARY KEY,
        kind           TEXT NOT NULL,
        manifest_json  TEXT,
        created_at     TEXT NOT NULL
    );

    CREATE TABLE hub_settings (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );
    "#,
];
