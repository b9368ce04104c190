use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

pub const DEFAULT_RESELLER_COLOR: &str = "#4CAF50";

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS revendas (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  nome TEXT NOT NULL,
  cnpj TEXT NOT NULL UNIQUE,
  cnae TEXT,
  cor TEXT NOT NULL DEFAULT '#4CAF50',
  municipios TEXT NOT NULL DEFAULT '[]',
  ativo INTEGER NOT NULL DEFAULT 1 CHECK (ativo IN (0, 1)),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_revendas_ativo ON revendas(ativo);
CREATE INDEX IF NOT EXISTS idx_revendas_nome ON revendas(nome);
";

/// A reseller and its assigned municipality territory. Rows are
/// soft-deleted: `active` flips to false and the row stays behind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reseller {
    pub id: i64,
    #[serde(rename = "nome")]
    pub name: String,
    pub cnpj: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cnae: Option<String>,
    #[serde(rename = "cor")]
    pub color: String,
    #[serde(rename = "municipios")]
    pub municipalities: Vec<String>,
    #[serde(rename = "ativo")]
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewReseller {
    #[serde(rename = "nome")]
    pub name: String,
    pub cnpj: String,
    #[serde(default)]
    pub cnae: Option<String>,
    #[serde(rename = "cor", default)]
    pub color: Option<String>,
    #[serde(rename = "municipios", default)]
    pub municipalities: Vec<String>,
}

/// Partial update; `None` fields keep their stored value. The CNPJ is
/// immutable after creation and intentionally absent here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResellerUpdate {
    #[serde(rename = "nome", default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cnae: Option<String>,
    #[serde(rename = "cor", default)]
    pub color: Option<String>,
    #[serde(rename = "municipios", default)]
    pub municipalities: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

struct ResellerRow {
    id: i64,
    name: String,
    cnpj: String,
    cnae: Option<String>,
    color: String,
    municipalities_json: String,
    active: i64,
    created_at: String,
    updated_at: String,
}

pub struct ResellerStore {
    conn: Connection,
}

impl ResellerStore {
    /// Open the reseller database and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            self.conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&self.conn, 1)?;
            version = 1;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Insert a new reseller. The CNPJ must be unique across all rows,
    /// active and inactive alike.
    ///
    /// # Errors
    /// Returns an error when the insert fails, including on a duplicate CNPJ.
    pub fn create(&mut self, new: &NewReseller) -> Result<Reseller> {
        let now = now_rfc3339()?;
        let color = new.color.clone().unwrap_or_else(|| DEFAULT_RESELLER_COLOR.to_string());
        let municipalities_json = serde_json::to_string(&new.municipalities)
            .context("failed to serialize municipality codes")?;

        self.conn
            .execute(
                "INSERT INTO revendas(nome, cnpj, cnae, cor, municipios, ativo, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)",
                params![new.name, new.cnpj, new.cnae, color, municipalities_json, now, now],
            )
            .context("failed to insert reseller")?;

        let id = self.conn.last_insert_rowid();
        self.get_any(id)?.ok_or_else(|| anyhow!("reseller {id} missing after insert"))
    }

    /// Look up a reseller by CNPJ regardless of active flag, so callers can
    /// reject duplicates before inserting.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn find_by_cnpj(&self, cnpj: &str) -> Result<Option<Reseller>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, nome, cnpj, cnae, cor, municipios, ativo, created_at, updated_at
                 FROM revendas WHERE cnpj = ?1",
                params![cnpj],
                map_reseller_row,
            )
            .optional()
            .context("failed to query reseller by cnpj")?;
        row.map(reseller_from_row).transpose()
    }

    /// Fetch one active reseller by id.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get(&self, id: i64) -> Result<Option<Reseller>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, nome, cnpj, cnae, cor, municipios, ativo, created_at, updated_at
                 FROM revendas WHERE id = ?1 AND ativo = 1",
                params![id],
                map_reseller_row,
            )
            .optional()
            .context("failed to query reseller by id")?;
        row.map(reseller_from_row).transpose()
    }

    fn get_any(&self, id: i64) -> Result<Option<Reseller>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, nome, cnpj, cnae, cor, municipios, ativo, created_at, updated_at
                 FROM revendas WHERE id = ?1",
                params![id],
                map_reseller_row,
            )
            .optional()
            .context("failed to query reseller by id")?;
        row.map(reseller_from_row).transpose()
    }

    /// List active resellers ordered by name, then id for reproducibility.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_active(&self) -> Result<Vec<Reseller>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, nome, cnpj, cnae, cor, municipios, ativo, created_at, updated_at
                 FROM revendas WHERE ativo = 1 ORDER BY nome ASC, id ASC",
            )
            .context("failed to prepare reseller listing")?;

        let rows = stmt.query_map([], map_reseller_row).context("failed to list resellers")?;

        let mut resellers = Vec::new();
        for row in rows {
            let row = row.context("failed to read reseller row")?;
            resellers.push(reseller_from_row(row)?);
        }
        Ok(resellers)
    }

    /// Apply a partial update to an active reseller and refresh `updated_at`.
    /// Returns `None` when no active row has the id.
    ///
    /// # Errors
    /// Returns an error when the update or the re-read fails.
    pub fn update(&mut self, id: i64, update: &ResellerUpdate) -> Result<Option<Reseller>> {
        let Some(existing) = self.get(id)? else {
            return Ok(None);
        };

        let name = update.name.clone().unwrap_or(existing.name);
        let cnae = update.cnae.clone().or(existing.cnae);
        let color = update.color.clone().unwrap_or(existing.color);
        let municipalities =
            update.municipalities.clone().unwrap_or(existing.municipalities);
        let municipalities_json = serde_json::to_string(&municipalities)
            .context("failed to serialize municipality codes")?;
        let now = now_rfc3339()?;

        self.conn
            .execute(
                "UPDATE revendas
                 SET nome = ?1, cnae = ?2, cor = ?3, municipios = ?4, updated_at = ?5
                 WHERE id = ?6 AND ativo = 1",
                params![name, cnae, color, municipalities_json, now, id],
            )
            .context("failed to update reseller")?;

        self.get(id)
    }

    /// Soft-delete: mark the reseller inactive, keeping the row. Returns
    /// false when no active row has the id.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn deactivate(&mut self, id: i64) -> Result<bool> {
        let now = now_rfc3339()?;
        let changed = self
            .conn
            .execute(
                "UPDATE revendas SET ativo = 0, updated_at = ?1 WHERE id = ?2 AND ativo = 1",
                params![now, id],
            )
            .context("failed to deactivate reseller")?;
        Ok(changed > 0)
    }

    /// Municipality codes assigned to an active reseller, for territory
    /// resolution. Returns `None` when no active row has the id.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn municipality_codes(&self, id: i64) -> Result<Option<Vec<String>>> {
        Ok(self.get(id)?.map(|reseller| reseller.municipalities))
    }
}

fn map_reseller_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResellerRow> {
    Ok(ResellerRow {
        id: row.get(0)?,
        name: row.get(1)?,
        cnpj: row.get(2)?,
        cnae: row.get(3)?,
        color: row.get(4)?,
        municipalities_json: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn reseller_from_row(row: ResellerRow) -> Result<Reseller> {
    let municipalities = serde_json::from_str(&row.municipalities_json)
        .with_context(|| format!("invalid municipality list for reseller {}", row.id))?;

    Ok(Reseller {
        id: row.id,
        name: row.name,
        cnpj: row.cnpj,
        cnae: row.cnae,
        color: row.color,
        municipalities,
        active: row.active == 1,
        created_at: parse_rfc3339(&row.created_at)?,
        updated_at: parse_rfc3339(&row.updated_at)?,
    })
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
