/// Tables holding settled tick reports, keyed by run.
pub const REPORT_SCHEMA_DDL: &str = "\
CREATE TABLE IF NOT EXISTS runs (
    run_id      TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS ticks (
    run_id                TEXT NOT NULL REFERENCES runs(run_id),
    tick                  INTEGER NOT NULL,
    settled_at            TEXT NOT NULL,
    average_price         REAL NOT NULL,
    renewable_ratio       REAL NOT NULL,
    market_concentration  REAL NOT NULL,
    carbon_tax_rate       REAL NOT NULL,
    total_fines           REAL NOT NULL,
    report_json           TEXT NOT NULL,
    PRIMARY KEY (run_id, tick)
);
CREATE TABLE IF NOT EXISTS agent_deltas (
    run_id            TEXT NOT NULL,
    tick              INTEGER NOT NULL,
    agent_id          TEXT NOT NULL,
    kind              TEXT NOT NULL,
    resources_before  REAL NOT NULL,
    resources_after   REAL NOT NULL,
    profit_delta      REAL NOT NULL,
    PRIMARY KEY (run_id, tick, agent_id)
);
CREATE TABLE IF NOT EXISTS violations (
    run_id       TEXT NOT NULL,
    tick         INTEGER NOT NULL,
    agent_id     TEXT NOT NULL,
    kind         TEXT NOT NULL,
    fine_amount  REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS rejected_actions (
    run_id    TEXT NOT NULL,
    tick      INTEGER NOT NULL,
    agent_id  TEXT NOT NULL,
    action    TEXT NOT NULL,
    reason    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_violations_run_agent ON violations(run_id, agent_id);
CREATE INDEX IF NOT EXISTS idx_rejected_run_tick ON rejected_actions(run_id, tick);
";
