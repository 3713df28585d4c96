//! SQLite-backed `DataService` for real deployments.
//!
//! A single `Arc<Mutex<Connection>>`, schema applied via `execute_batch` on
//! open, and every query run inside `tokio::task::spawn_blocking` so the
//! async executor never blocks on rusqlite's synchronous driver.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, AccountStatus, AccountType, Group, GroupId, Money, OrganizationType,
    ServiceType, UsageRecord,
};

use super::{AccountUsageDelta, DataError, DataService, HealthCheckHistoryRow};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS groups (
    id TEXT PRIMARY KEY NOT NULL,
    organization_type_json TEXT NOT NULL,
    members_json TEXT NOT NULL,
    resource_binding_json TEXT
);

CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    service_type TEXT NOT NULL,
    account_type TEXT NOT NULL,
    status TEXT NOT NULL,
    is_enabled INTEGER NOT NULL,
    current_load INTEGER NOT NULL,
    supported_models_json TEXT NOT NULL,
    daily_limit INTEGER NOT NULL,
    weight INTEGER NOT NULL,
    priority INTEGER,
    average_response_time_ms INTEGER,
    total_requests INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    total_cost_cents INTEGER NOT NULL DEFAULT 0,
    last_used_at TEXT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_accounts_service ON accounts(service_type);

CREATE TABLE IF NOT EXISTS usage_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT,
    group_id TEXT NOT NULL,
    account_id TEXT NOT NULL,
    service_type TEXT NOT NULL,
    model TEXT NOT NULL,
    request_tokens INTEGER NOT NULL,
    response_tokens INTEGER NOT NULL,
    total_tokens INTEGER NOT NULL,
    cost_cents INTEGER NOT NULL,
    request_time TEXT NOT NULL,
    response_time TEXT NOT NULL,
    status TEXT NOT NULL,
    error_type TEXT
);

CREATE INDEX IF NOT EXISTS idx_usage_group_time ON usage_records(group_id, request_time);

CREATE TABLE IF NOT EXISTS health_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id TEXT NOT NULL,
    is_healthy INTEGER NOT NULL,
    response_time_ms INTEGER NOT NULL,
    error_message TEXT,
    checked_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_health_account_time ON health_history(account_id, checked_at);
"#;

pub struct SqliteDataService {
    conn: Arc<Mutex<Connection>>,
}

fn service_type_str(s: ServiceType) -> &'static str {
    s.id()
}

fn parse_service_type(raw: &str) -> Result<ServiceType, DataError> {
    ServiceType::from_id(raw)
        .ok_or_else(|| DataError::Backend(format!("unknown service_type '{raw}'")))
}

fn account_type_str(t: AccountType) -> &'static str {
    match t {
        AccountType::Dedicated => "dedicated",
        AccountType::Shared => "shared",
    }
}

fn parse_account_type(raw: &str) -> Result<AccountType, DataError> {
    match raw {
        "dedicated" => Ok(AccountType::Dedicated),
        "shared" => Ok(AccountType::Shared),
        other => Err(DataError::Backend(format!("unknown account_type '{other}'"))),
    }
}

fn status_str(s: AccountStatus) -> &'static str {
    match s {
        AccountStatus::Active => "active",
        AccountStatus::Inactive => "inactive",
        AccountStatus::Error => "error",
    }
}

fn parse_status(raw: &str) -> Result<AccountStatus, DataError> {
    match raw {
        "active" => Ok(AccountStatus::Active),
        "inactive" => Ok(AccountStatus::Inactive),
        "error" => Ok(AccountStatus::Error),
        other => Err(DataError::Backend(format!("unknown status '{other}'"))),
    }
}

fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String, String, Account)> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let service_type_raw: String = row.get(2)?;
    let account_type_raw: String = row.get(3)?;
    let status_raw: String = row.get(4)?;
    let is_enabled: i64 = row.get(5)?;
    let current_load: i64 = row.get(6)?;
    let supported_models_json: String = row.get(7)?;
    let daily_limit: i64 = row.get(8)?;
    let weight: i64 = row.get(9)?;
    let priority: Option<i64> = row.get(10)?;
    let avg_rt: Option<i64> = row.get(11)?;
    let total_requests: i64 = row.get(12)?;
    let total_tokens: i64 = row.get(13)?;
    let total_cost_cents: i64 = row.get(14)?;
    let last_used_at: Option<String> = row.get(15)?;
    let error_message: Option<String> = row.get(16)?;

    let supported_models = serde_json::from_str(&supported_models_json).unwrap_or_default();

    let account = Account {
        id: AccountId(Uuid::nil()), // placeholder, filled by caller after parsing id_str
        name,
        service_type: ServiceType::Claude, // placeholder, filled by caller
        account_type: AccountType::Dedicated, // placeholder, filled by caller
        status: AccountStatus::Active,     // placeholder, filled by caller
        is_enabled: is_enabled != 0,
        current_load: current_load as u8,
        supported_models,
        daily_limit: daily_limit as u64,
        weight: weight as u32,
        priority: priority.map(|p| p as i32),
        average_response_time_ms: avg_rt.map(|v| v as u64),
        total_requests: total_requests as u64,
        total_tokens: total_tokens as u64,
        total_cost: Money::from_cents(total_cost_cents),
        last_used_at: last_used_at
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        error_message,
    };

    Ok((id_str, service_type_raw, account_type_raw, status_raw, account))
}

fn finish_account(
    id_str: String,
    service_type_raw: String,
    account_type_raw: String,
    status_raw: String,
    mut account: Account,
) -> Result<Account, DataError> {
    account.id = AccountId(
        Uuid::parse_str(&id_str).map_err(|e| DataError::Backend(format!("bad account id: {e}")))?,
    );
    account.service_type = parse_service_type(&service_type_raw)?;
    account.account_type = parse_account_type(&account_type_raw)?;
    account.status = parse_status(&status_raw)?;
    Ok(account)
}

impl SqliteDataService {
    pub async fn open(db_path: PathBuf) -> Result<Self, DataError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DataError::Backend(e.to_string()))?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| DataError::Backend(format!("failed to open sqlite db: {e}")))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| DataError::Backend(format!("failed to run schema: {e}")))?;
            Ok::<_, DataError>(conn)
        })
        .await
        .map_err(|e| DataError::Backend(format!("task join error: {e}")))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn open_in_memory() -> Result<Self, DataError> {
        let conn = tokio::task::spawn_blocking(|| {
            let conn = Connection::open_in_memory()
                .map_err(|e| DataError::Backend(format!("failed to open sqlite db: {e}")))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| DataError::Backend(format!("failed to run schema: {e}")))?;
            Ok::<_, DataError>(conn)
        })
        .await
        .map_err(|e| DataError::Backend(format!("task join error: {e}")))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl DataService for SqliteDataService {
    async fn get_group(&self, id: GroupId) -> Result<Option<Group>, DataError> {
        let conn = self.conn.clone();
        let id_str = id.0.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let row: Option<(String, String, Option<String>)> = conn
                .query_row(
                    "SELECT organization_type_json, members_json, resource_binding_json FROM groups WHERE id = ?1",
                    params![id_str],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()
                .map_err(|e| DataError::Backend(e.to_string()))?;

            let Some((org_json, members_json, binding_json)) = row else {
                return Ok(None);
            };

            let organization_type: OrganizationType = serde_json::from_str(&org_json)
                .map_err(|e| DataError::Backend(format!("bad organization_type json: {e}")))?;
            let members = serde_json::from_str(&members_json)
                .map_err(|e| DataError::Backend(format!("bad members json: {e}")))?;
            let resource_binding = binding_json
                .map(|j| serde_json::from_str(&j))
                .transpose()
                .map_err(|e| DataError::Backend(format!("bad resource_binding json: {e}")))?;

            Ok(Some(Group {
                id,
                organization_type,
                members,
                resource_binding,
            }))
        })
        .await
        .map_err(|e| DataError::Backend(e.to_string()))?
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, DataError> {
        let conn = self.conn.clone();
        let id_str = id.0.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let row = conn
                .query_row(
                    "SELECT id, name, service_type, account_type, status, is_enabled, current_load,
                            supported_models_json, daily_limit, weight, priority,
                            average_response_time_ms, total_requests, total_tokens,
                            total_cost_cents, last_used_at, error_message
                     FROM accounts WHERE id = ?1",
                    params![id_str],
                    row_to_account,
                )
                .optional()
                .map_err(|e| DataError::Backend(e.to_string()))?;

            match row {
                None => Ok(None),
                Some((id_str, st, at, status, account)) => {
                    Ok(Some(finish_account(id_str, st, at, status, account)?))
                }
            }
        })
        .await
        .map_err(|e| DataError::Backend(e.to_string()))?
    }

    async fn list_accounts_by_service(
        &self,
        service_type: ServiceType,
    ) -> Result<Vec<Account>, DataError> {
        let conn = self.conn.clone();
        let st = service_type_str(service_type).to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, service_type, account_type, status, is_enabled, current_load,
                            supported_models_json, daily_limit, weight, priority,
                            average_response_time_ms, total_requests, total_tokens,
                            total_cost_cents, last_used_at, error_message
                     FROM accounts WHERE service_type = ?1",
                )
                .map_err(|e| DataError::Backend(e.to_string()))?;
            let rows = stmt
                .query_map(params![st], row_to_account)
                .map_err(|e| DataError::Backend(e.to_string()))?;

            let mut out = Vec::new();
            for row in rows {
                let (id_str, st_raw, at_raw, status_raw, account) =
                    row.map_err(|e| DataError::Backend(e.to_string()))?;
                out.push(finish_account(id_str, st_raw, at_raw, status_raw, account)?);
            }
            Ok(out)
        })
        .await
        .map_err(|e| DataError::Backend(e.to_string()))?
    }

    async fn upsert_account(&self, account: Account) -> Result<(), DataError> {
        let conn = self.conn.clone();
        let supported_models_json = serde_json::to_string(&account.supported_models)
            .map_err(|e| DataError::Backend(e.to_string()))?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO accounts (id, name, service_type, account_type, status, is_enabled,
                    current_load, supported_models_json, daily_limit, weight, priority,
                    average_response_time_ms, total_requests, total_tokens, total_cost_cents,
                    last_used_at, error_message)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name, service_type = excluded.service_type,
                    account_type = excluded.account_type, status = excluded.status,
                    is_enabled = excluded.is_enabled, current_load = excluded.current_load,
                    supported_models_json = excluded.supported_models_json,
                    daily_limit = excluded.daily_limit, weight = excluded.weight,
                    priority = excluded.priority,
                    average_response_time_ms = excluded.average_response_time_ms,
                    total_requests = excluded.total_requests, total_tokens = excluded.total_tokens,
                    total_cost_cents = excluded.total_cost_cents,
                    last_used_at = excluded.last_used_at, error_message = excluded.error_message",
                params![
                    account.id.0.to_string(),
                    account.name,
                    service_type_str(account.service_type),
                    account_type_str(account.account_type),
                    status_str(account.status),
                    account.is_enabled as i64,
                    account.current_load as i64,
                    supported_models_json,
                    account.daily_limit as i64,
                    account.weight as i64,
                    account.priority,
                    account.average_response_time_ms.map(|v| v as i64),
                    account.total_requests as i64,
                    account.total_tokens as i64,
                    account.total_cost.cents,
                    account.last_used_at.map(|dt| dt.to_rfc3339()),
                    account.error_message,
                ],
            )
            .map_err(|e| DataError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DataError::Backend(e.to_string()))?
    }

    async fn apply_account_usage(
        &self,
        id: AccountId,
        delta: AccountUsageDelta,
    ) -> Result<(), DataError> {
        let conn = self.conn.clone();
        let id_str = id.0.to_string();
        let now = Utc::now().to_rfc3339();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE accounts SET
                    total_requests = total_requests + ?1,
                    total_tokens = total_tokens + ?2,
                    total_cost_cents = total_cost_cents + ?3,
                    last_used_at = ?4,
                    status = 'active',
                    error_message = NULL
                 WHERE id = ?5",
                params![
                    delta.requests as i64,
                    delta.tokens as i64,
                    delta.cost.cents,
                    now,
                    id_str,
                ],
            )
            .map_err(|e| DataError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DataError::Backend(e.to_string()))?
    }

    async fn set_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        error_message: Option<String>,
    ) -> Result<(), DataError> {
        let conn = self.conn.clone();
        let id_str = id.0.to_string();
        let status_raw = status_str(status).to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE accounts SET status = ?1, error_message = ?2 WHERE id = ?3",
                params![status_raw, error_message, id_str],
            )
            .map_err(|e| DataError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DataError::Backend(e.to_string()))?
    }

    async fn increment_failed_request_count(&self, id: AccountId) -> Result<(), DataError> {
        let conn = self.conn.clone();
        let id_str = id.0.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE accounts SET total_requests = total_requests + 1 WHERE id = ?1",
                params![id_str],
            )
            .map_err(|e| DataError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DataError::Backend(e.to_string()))?
    }

    async fn set_account_load(&self, id: AccountId, current_load: u8) -> Result<(), DataError> {
        let conn = self.conn.clone();
        let id_str = id.0.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE accounts SET current_load = ?1 WHERE id = ?2",
                params![current_load as i64, id_str],
            )
            .map_err(|e| DataError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DataError::Backend(e.to_string()))?
    }

    async fn append_usage_record(&self, record: UsageRecord) -> Result<(), DataError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO usage_records (user_id, group_id, account_id, service_type, model,
                    request_tokens, response_tokens, total_tokens, cost_cents, request_time,
                    response_time, status, error_type)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                params![
                    record.user_id.map(|u| u.0.to_string()),
                    record.group_id.0.to_string(),
                    record.account_id.0.to_string(),
                    service_type_str(record.service_type),
                    record.model,
                    record.request_tokens as i64,
                    record.response_tokens as i64,
                    record.total_tokens as i64,
                    record.cost.cents,
                    record.request_time.to_rfc3339(),
                    record.response_time.to_rfc3339(),
                    match record.status {
                        crate::domain::RequestStatus::Success => "success",
                        crate::domain::RequestStatus::Error => "error",
                    },
                    record.error_type,
                ],
            )
            .map_err(|e| DataError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DataError::Backend(e.to_string()))?
    }

    async fn sum_tokens_today(
        &self,
        group_id: GroupId,
        now: chrono::DateTime<Utc>,
    ) -> Result<u64, DataError> {
        let conn = self.conn.clone();
        let group_id_str = group_id.0.to_string();
        let day_start = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc().to_rfc3339();
        let day_end = now
            .date_naive()
            .succ_opt()
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .to_rfc3339();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let total: i64 = conn
                .query_row(
                    "SELECT COALESCE(SUM(total_tokens), 0) FROM usage_records
                     WHERE group_id = ?1 AND request_time >= ?2 AND request_time < ?3",
                    params![group_id_str, day_start, day_end],
                    |r| r.get(0),
                )
                .map_err(|e| DataError::Backend(e.to_string()))?;
            Ok(total as u64)
        })
        .await
        .map_err(|e| DataError::Backend(e.to_string()))?
    }

    async fn sum_cost_this_month(
        &self,
        group_id: GroupId,
        now: chrono::DateTime<Utc>,
    ) -> Result<Money, DataError> {
        let conn = self.conn.clone();
        let group_id_str = group_id.0.to_string();
        let month_start = now
            .date_naive()
            .with_day(1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .to_rfc3339();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let total: i64 = conn
                .query_row(
                    "SELECT COALESCE(SUM(cost_cents), 0) FROM usage_records
                     WHERE group_id = ?1 AND request_time >= ?2",
                    params![group_id_str, month_start],
                    |r| r.get(0),
                )
                .map_err(|e| DataError::Backend(e.to_string()))?;
            Ok(Money::from_cents(total))
        })
        .await
        .map_err(|e| DataError::Backend(e.to_string()))?
    }

    async fn append_health_history(&self, row: HealthCheckHistoryRow) -> Result<(), DataError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO health_history (account_id, is_healthy, response_time_ms, error_message, checked_at)
                 VALUES (?1,?2,?3,?4,?5)",
                params![
                    row.account_id.0.to_string(),
                    row.is_healthy as i64,
                    row.response_time_ms as i64,
                    row.error_message,
                    row.checked_at.to_rfc3339(),
                ],
            )
            .map_err(|e| DataError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DataError::Backend(e.to_string()))?
    }
}
