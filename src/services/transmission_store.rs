//! services/transmission_store.rs
//! Repositorio de transmisiones: fuente de verdad de estados e intentos.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use crate::errors::{TransmissionError, TransmissionResult};
use crate::models::transmission_model::{
    EdiOperation, TransmissionPatch, TransmissionRecord, TransmissionStatus,
};

/// Estados en los que un registro todavía no fue entregado; un segundo
/// submit para el mismo contenedor + operación se considera duplicado.
const UNDELIVERED: [TransmissionStatus; 2] =
    [TransmissionStatus::Pending, TransmissionStatus::Retrying];

#[async_trait]
pub trait TransmissionStore: Send + Sync {
    /// Inserta un registro PENDING. Falla con Conflict si ya hay uno sin entregar
    /// para el mismo contenedor + operación.
    async fn create(&self, record: TransmissionRecord) -> TransmissionResult<String>;

    async fn get(&self, id: &str) -> TransmissionResult<TransmissionRecord>;

    /// Update parcial atómico (lectura, validación y escritura en una sola unidad).
    async fn update(
        &self,
        id: &str,
        patch: TransmissionPatch,
    ) -> TransmissionResult<TransmissionRecord>;

    /// Registros en SENT o RETRYING.
    async fn list_pending(&self) -> TransmissionResult<Vec<TransmissionRecord>>;

    /// Snapshot de todos los registros en orden de creación.
    async fn export_all(&self) -> TransmissionResult<Vec<TransmissionRecord>>;
}

fn check_new_record(record: &TransmissionRecord) -> TransmissionResult<()> {
    if record.status != TransmissionStatus::Pending || record.attempts != 0 {
        return Err(TransmissionError::Validation(format!(
            "Un registro nuevo debe estar en PENDING sin intentos (status={}, attempts={})",
            record.status, record.attempts
        )));
    }
    Ok(())
}

fn duplicate_error(record: &TransmissionRecord) -> TransmissionError {
    TransmissionError::Conflict(format!(
        "Ya existe una transmisión {} pendiente para el contenedor {}",
        record.operation, record.container_number
    ))
}

fn not_found(id: &str) -> TransmissionError {
    TransmissionError::NotFound(format!("No se encontró transmisión con id {}", id))
}

// ============================================================================
// SQLite
// ============================================================================

#[derive(Clone, Debug)]
pub struct SqliteTransmissionStore {
    db_pool: Pool<Sqlite>,
}

impl SqliteTransmissionStore {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        SqliteTransmissionStore { db_pool }
    }

    /// Abre (o crea) la base en `database_url`.
    ///
    /// El pool usa una sola conexión: SQLite serializa escrituras de todos
    /// modos y así cada transacción de lectura-modificación-escritura queda
    /// aislada sin pelear por el lock.
    pub async fn connect(database_url: &str) -> TransmissionResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let db_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self::new(db_pool))
    }

    /// Corre migraciones con sqlx
    pub async fn run_migrations(&self) -> TransmissionResult<()> {
        sqlx::migrate!("./migrations").run(&self.db_pool).await?;
        Ok(())
    }

    async fn fetch_optional(
        &self,
        conn: &mut sqlx::SqliteConnection,
        id: &str,
    ) -> TransmissionResult<Option<TransmissionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, container_number, operation, partner_code, file_name, file_size,
                   status, attempts, last_attempt_at, created_at, error_message,
                   acknowledgment_received_at
            FROM transmissions
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }
}

fn decode_error<E>(e: E) -> TransmissionError
where
    E: std::error::Error + Send + Sync + 'static,
{
    TransmissionError::Storage(sqlx::Error::Decode(Box::new(e)))
}

/// Ancho fijo para que el ORDER BY sobre el texto respete el orden temporal.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: Option<String>) -> TransmissionResult<Option<DateTime<Utc>>> {
    raw.map(|s| s.parse::<DateTime<Utc>>().map_err(decode_error))
        .transpose()
}

fn row_to_record(row: &SqliteRow) -> TransmissionResult<TransmissionRecord> {
    let operation: String = row.try_get("operation")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let file_size: i64 = row.try_get("file_size")?;
    let attempts: i64 = row.try_get("attempts")?;

    Ok(TransmissionRecord {
        id: row.try_get("id")?,
        container_number: row.try_get("container_number")?,
        operation: EdiOperation::from_str(&operation).map_err(decode_error)?,
        partner_code: row.try_get("partner_code")?,
        file_name: row.try_get("file_name")?,
        file_size: file_size.max(0) as u64,
        status: TransmissionStatus::from_str(&status).map_err(decode_error)?,
        attempts: attempts.max(0) as u32,
        last_attempt_at: parse_ts(row.try_get("last_attempt_at")?)?,
        created_at: created_at.parse().map_err(decode_error)?,
        error_message: row.try_get("error_message")?,
        acknowledgment_received_at: parse_ts(row.try_get("acknowledgment_received_at")?)?,
    })
}

#[async_trait]
impl TransmissionStore for SqliteTransmissionStore {
    async fn create(&self, record: TransmissionRecord) -> TransmissionResult<String> {
        check_new_record(&record)?;
        let mut tx = self.db_pool.begin().await?;

        let existing: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM transmissions
            WHERE container_number = ?1 AND operation = ?2 AND status IN (?3, ?4)
            "#,
        )
        .bind(&record.container_number)
        .bind(record.operation.as_str())
        .bind(UNDELIVERED[0].as_str())
        .bind(UNDELIVERED[1].as_str())
        .fetch_one(&mut *tx)
        .await?;

        if existing > 0 {
            return Err(duplicate_error(&record));
        }

        sqlx::query(
            r#"
            INSERT INTO transmissions (
                id, container_number, operation, partner_code, file_name, file_size,
                status, attempts, last_attempt_at, created_at, error_message,
                acknowledgment_received_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, ?8, NULL, NULL)
            "#,
        )
        .bind(&record.id)
        .bind(&record.container_number)
        .bind(record.operation.as_str())
        .bind(&record.partner_code)
        .bind(&record.file_name)
        .bind(record.file_size as i64)
        .bind(record.status.as_str())
        .bind(fmt_ts(record.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record.id)
    }

    async fn get(&self, id: &str) -> TransmissionResult<TransmissionRecord> {
        let mut conn = self.db_pool.acquire().await?;
        self.fetch_optional(&mut *conn, id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    async fn update(
        &self,
        id: &str,
        patch: TransmissionPatch,
    ) -> TransmissionResult<TransmissionRecord> {
        let mut tx = self.db_pool.begin().await?;

        let mut record = self
            .fetch_optional(&mut *tx, id)
            .await?
            .ok_or_else(|| not_found(id))?;
        patch.apply_to(&mut record)?;

        sqlx::query(
            r#"
            UPDATE transmissions
            SET status = ?2,
                attempts = ?3,
                last_attempt_at = ?4,
                error_message = ?5,
                acknowledgment_received_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(record.status.as_str())
        .bind(record.attempts as i64)
        .bind(record.last_attempt_at.map(fmt_ts))
        .bind(record.error_message.as_deref())
        .bind(record.acknowledgment_received_at.map(fmt_ts))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn list_pending(&self) -> TransmissionResult<Vec<TransmissionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, container_number, operation, partner_code, file_name, file_size,
                   status, attempts, last_attempt_at, created_at, error_message,
                   acknowledgment_received_at
            FROM transmissions
            WHERE status IN ('SENT', 'RETRYING')
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.db_pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn export_all(&self) -> TransmissionResult<Vec<TransmissionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, container_number, operation, partner_code, file_name, file_size,
                   status, attempts, last_attempt_at, created_at, error_message,
                   acknowledgment_received_at
            FROM transmissions
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.db_pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}

// ============================================================================
// Memoria
// ============================================================================

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, TransmissionRecord>,
    /// Orden de inserción
    order: Vec<String>,
}

/// Store en memoria, para pruebas y despliegues efímeros.
#[derive(Default)]
pub struct MemoryTransmissionStore {
    state: Mutex<MemoryState>,
}

impl MemoryTransmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // Ninguna operación deja el estado a medias, así que un lock envenenado se puede usar
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TransmissionStore for MemoryTransmissionStore {
    async fn create(&self, record: TransmissionRecord) -> TransmissionResult<String> {
        check_new_record(&record)?;
        let mut state = self.lock();

        let duplicate = state.records.values().any(|r| {
            r.container_number == record.container_number
                && r.operation == record.operation
                && UNDELIVERED.contains(&r.status)
        });
        if duplicate {
            return Err(duplicate_error(&record));
        }
        if state.records.contains_key(&record.id) {
            return Err(TransmissionError::Conflict(format!(
                "Ya existe una transmisión con id {}",
                record.id
            )));
        }

        let id = record.id.clone();
        state.order.push(id.clone());
        state.records.insert(id.clone(), record);
        Ok(id)
    }

    async fn get(&self, id: &str) -> TransmissionResult<TransmissionRecord> {
        self.lock()
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn update(
        &self,
        id: &str,
        patch: TransmissionPatch,
    ) -> TransmissionResult<TransmissionRecord> {
        let mut state = self.lock();
        let current = state.records.get_mut(id).ok_or_else(|| not_found(id))?;

        // Se trabaja sobre una copia para no dejar cambios parciales si el patch falla
        let mut updated = current.clone();
        patch.apply_to(&mut updated)?;
        *current = updated.clone();
        Ok(updated)
    }

    async fn list_pending(&self) -> TransmissionResult<Vec<TransmissionRecord>> {
        let state = self.lock();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.records.get(id))
            .filter(|r| {
                matches!(
                    r.status,
                    TransmissionStatus::Sent | TransmissionStatus::Retrying
                )
            })
            .cloned()
            .collect())
    }

    async fn export_all(&self) -> TransmissionResult<Vec<TransmissionRecord>> {
        let state = self.lock();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.records.get(id))
            .cloned()
            .collect())
    }
}
