#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS workers (
          id TEXT PRIMARY KEY,
          pid INTEGER NOT NULL,
          status TEXT NOT NULL,
          started_at_ms INTEGER NOT NULL,
          last_heartbeat_ms INTEGER NOT NULL
        );
"#;
