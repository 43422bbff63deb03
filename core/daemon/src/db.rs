//! SQLite persistence for zara-shiftd.
//!
//! The daemon is the single writer. Queries are free functions over a
//! `Connection` so that one logical step (close + archive + open + notify)
//! can compose them inside a single transaction opened by `Db`.
//!
//! Store-level invariants:
//! - partial unique index: one ACTIVE operation per machine;
//! - partial unique index: one active, non-archived shift per machine;
//! - triggers: archives are write-once and shift rows are never deleted.

use rusqlite::{
    params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::path::PathBuf;
use zara_shiftd_protocol::{
    MachineStatus, NotificationPriority, OperationStatus, ShiftType, UserRole,
};

use crate::error::{Result, ShiftError};
use crate::model::{Machine, MachineOperation, Notification, ProductionArchive, ShiftData, User};

pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    pub fn with_connection<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.open()?;
        op(&conn)
    }

    /// Runs `op` inside an IMMEDIATE transaction. The transaction is rolled
    /// back when `op` fails or the commit does not go through.
    pub fn with_transaction<T>(&self, op: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| ShiftError::storage("Failed to start transaction", err))?;
        let value = op(&tx)?;
        tx.commit()
            .map_err(|err| ShiftError::storage("Failed to commit transaction", err))?;
        Ok(value)
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS machines (
                    id TEXT PRIMARY KEY,
                    code TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    location TEXT,
                    status TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT UNIQUE,
                    role TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS machine_operations (
                    id TEXT PRIMARY KEY,
                    machine_id TEXT NOT NULL REFERENCES machines(id),
                    operator_id TEXT NOT NULL REFERENCES users(id),
                    status TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    end_time TEXT,
                    notes TEXT NOT NULL DEFAULT ''
                 );
                 CREATE UNIQUE INDEX IF NOT EXISTS idx_operations_one_active
                    ON machine_operations(machine_id) WHERE status = 'ACTIVE';
                 CREATE INDEX IF NOT EXISTS idx_operations_status_start
                    ON machine_operations(status, start_time);
                 CREATE INDEX IF NOT EXISTS idx_operations_machine_start
                    ON machine_operations(machine_id, start_time);
                 CREATE TABLE IF NOT EXISTS shift_data (
                    id TEXT PRIMARY KEY,
                    machine_id TEXT NOT NULL REFERENCES machines(id),
                    operator_id TEXT NOT NULL REFERENCES users(id),
                    shift_type TEXT NOT NULL,
                    shift_start TEXT NOT NULL,
                    shift_end TEXT NOT NULL,
                    total_production INTEGER NOT NULL DEFAULT 0,
                    target_production INTEGER NOT NULL,
                    efficiency REAL NOT NULL DEFAULT 0,
                    downtime INTEGER NOT NULL DEFAULT 0,
                    running_time INTEGER NOT NULL DEFAULT 0,
                    quality_tests INTEGER NOT NULL DEFAULT 0,
                    approved_tests INTEGER NOT NULL DEFAULT 0,
                    rejected_tests INTEGER NOT NULL DEFAULT 0,
                    is_active INTEGER NOT NULL,
                    is_archived INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE UNIQUE INDEX IF NOT EXISTS idx_shift_data_one_active
                    ON shift_data(machine_id) WHERE is_active = 1 AND is_archived = 0;
                 CREATE TRIGGER IF NOT EXISTS shift_data_no_delete
                    BEFORE DELETE ON shift_data
                    BEGIN SELECT RAISE(ABORT, 'shift_data rows are archived, never deleted'); END;
                 CREATE TABLE IF NOT EXISTS production_archive (
                    id TEXT PRIMARY KEY,
                    shift_data_id TEXT NOT NULL UNIQUE REFERENCES shift_data(id),
                    machine_id TEXT NOT NULL,
                    machine_code TEXT NOT NULL,
                    machine_name TEXT NOT NULL,
                    operator_id TEXT NOT NULL,
                    operator_name TEXT NOT NULL,
                    shift_type TEXT NOT NULL,
                    shift_start TEXT NOT NULL,
                    shift_end TEXT NOT NULL,
                    total_production INTEGER NOT NULL,
                    target_production INTEGER NOT NULL,
                    efficiency REAL NOT NULL,
                    downtime INTEGER NOT NULL,
                    running_time INTEGER NOT NULL,
                    quality_tests INTEGER NOT NULL,
                    approved_tests INTEGER NOT NULL,
                    rejected_tests INTEGER NOT NULL,
                    archived_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_archive_machine
                    ON production_archive(machine_id, archived_at);
                 CREATE TRIGGER IF NOT EXISTS production_archive_no_update
                    BEFORE UPDATE ON production_archive
                    BEGIN SELECT RAISE(ABORT, 'production_archive is write-once'); END;
                 CREATE TRIGGER IF NOT EXISTS production_archive_no_delete
                    BEFORE DELETE ON production_archive
                    BEGIN SELECT RAISE(ABORT, 'production_archive is write-once'); END;
                 CREATE TABLE IF NOT EXISTS notifications (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id),
                    type TEXT NOT NULL,
                    title TEXT NOT NULL,
                    message TEXT NOT NULL,
                    priority TEXT NOT NULL,
                    read INTEGER NOT NULL DEFAULT 0,
                    metadata TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_notifications_user
                    ON notifications(user_id, created_at);
                 COMMIT;",
            )
            .map_err(|err| ShiftError::storage("Failed to initialize schema", err))
        })
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| ShiftError::storage("Failed to create daemon data dir", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| ShiftError::storage("Failed to open sqlite db", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| ShiftError::storage("Failed to enable WAL", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| ShiftError::storage("Failed to set synchronous", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| ShiftError::storage("Failed to set busy_timeout", err))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|err| ShiftError::storage("Failed to enable foreign keys", err))?;

        Ok(conn)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Machines
// ─────────────────────────────────────────────────────────────────────────────

const MACHINE_COLUMNS: &str = "id, code, name, location, status, created_at, updated_at";

fn machine_from_row(row: &Row<'_>) -> rusqlite::Result<Machine> {
    Ok(Machine {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        location: row.get(3)?,
        status: decode_enum(row, 4, MachineStatus::from_str, "machine status")?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn insert_machine(conn: &Connection, machine: &Machine) -> Result<()> {
    conn.execute(
        "INSERT INTO machines (id, code, name, location, status, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            machine.id,
            machine.code,
            machine.name,
            machine.location,
            machine.status.as_str(),
            machine.created_at,
            machine.updated_at
        ],
    )
    .map_err(|err| ShiftError::storage("Failed to insert machine", err))?;
    Ok(())
}

pub fn get_machine(conn: &Connection, id: &str) -> Result<Option<Machine>> {
    conn.query_row(
        &format!("SELECT {} FROM machines WHERE id = ?1", MACHINE_COLUMNS),
        params![id],
        machine_from_row,
    )
    .optional()
    .map_err(|err| ShiftError::storage("Failed to query machine", err))
}

pub fn get_machine_by_code(conn: &Connection, code: &str) -> Result<Option<Machine>> {
    conn.query_row(
        &format!("SELECT {} FROM machines WHERE code = ?1", MACHINE_COLUMNS),
        params![code],
        machine_from_row,
    )
    .optional()
    .map_err(|err| ShiftError::storage("Failed to query machine by code", err))
}

pub fn set_machine_status(
    conn: &Connection,
    id: &str,
    status: MachineStatus,
    updated_at: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE machines SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), updated_at],
    )
    .map_err(|err| ShiftError::storage("Failed to update machine status", err))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

const USER_COLUMNS: &str = "id, name, email, role, is_active, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: decode_enum(row, 3, UserRole::from_str, "user role")?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn insert_user(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, email, role, is_active, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.id,
            user.name,
            user.email,
            user.role.as_str(),
            user.is_active,
            user.created_at
        ],
    )
    .map_err(|err| ShiftError::storage("Failed to insert user", err))?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &str) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![id],
        user_from_row,
    )
    .optional()
    .map_err(|err| ShiftError::storage("Failed to query user", err))
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
        params![email],
        user_from_row,
    )
    .optional()
    .map_err(|err| ShiftError::storage("Failed to query user by email", err))
}

pub fn list_active_users_with_roles(conn: &Connection, roles: &[UserRole]) -> Result<Vec<User>> {
    if roles.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = (1..=roles.len())
        .map(|index| format!("?{}", index))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM users WHERE is_active = 1 AND role IN ({}) ORDER BY created_at ASC, id ASC",
        USER_COLUMNS, placeholders
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|err| ShiftError::storage("Failed to prepare recipients query", err))?;
    let rows = stmt
        .query_map(params_from_iter(roles.iter().map(|role| role.as_str())), user_from_row)
        .map_err(|err| ShiftError::storage("Failed to query recipients", err))?;
    collect_rows(rows, "Failed to decode user row")
}

// ─────────────────────────────────────────────────────────────────────────────
// Machine operations
// ─────────────────────────────────────────────────────────────────────────────

const OPERATION_COLUMNS: &str = "id, machine_id, operator_id, status, start_time, end_time, notes";

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<MachineOperation> {
    Ok(MachineOperation {
        id: row.get(0)?,
        machine_id: row.get(1)?,
        operator_id: row.get(2)?,
        status: decode_enum(row, 3, OperationStatus::from_str, "operation status")?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        notes: row.get(6)?,
    })
}

pub fn insert_operation(conn: &Connection, operation: &MachineOperation) -> Result<()> {
    conn.execute(
        "INSERT INTO machine_operations \
            (id, machine_id, operator_id, status, start_time, end_time, notes) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            operation.id,
            operation.machine_id,
            operation.operator_id,
            operation.status.as_str(),
            operation.start_time,
            operation.end_time,
            operation.notes
        ],
    )
    .map_err(|err| ShiftError::storage("Failed to insert operation", err))?;
    Ok(())
}

pub fn get_operation(conn: &Connection, id: &str) -> Result<Option<MachineOperation>> {
    conn.query_row(
        &format!("SELECT {} FROM machine_operations WHERE id = ?1", OPERATION_COLUMNS),
        params![id],
        operation_from_row,
    )
    .optional()
    .map_err(|err| ShiftError::storage("Failed to query operation", err))
}

pub fn active_operation_for_machine(
    conn: &Connection,
    machine_id: &str,
) -> Result<Option<MachineOperation>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM machine_operations WHERE machine_id = ?1 AND status = 'ACTIVE'",
            OPERATION_COLUMNS
        ),
        params![machine_id],
        operation_from_row,
    )
    .optional()
    .map_err(|err| ShiftError::storage("Failed to query active operation", err))
}

/// ACTIVE operations whose `start_time` is strictly before `cutoff`.
pub fn list_active_operations_started_before(
    conn: &Connection,
    cutoff: &str,
) -> Result<Vec<MachineOperation>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM machine_operations \
             WHERE status = 'ACTIVE' AND start_time < ?1 \
             ORDER BY start_time ASC, id ASC",
            OPERATION_COLUMNS
        ))
        .map_err(|err| ShiftError::storage("Failed to prepare stuck operations query", err))?;
    let rows = stmt
        .query_map(params![cutoff], operation_from_row)
        .map_err(|err| ShiftError::storage("Failed to query stuck operations", err))?;
    collect_rows(rows, "Failed to decode operation row")
}

/// Moves an ACTIVE operation to a terminal status. Returns false when the
/// operation was no longer ACTIVE.
pub fn close_operation(
    conn: &Connection,
    id: &str,
    status: OperationStatus,
    end_time: &str,
    notes: &str,
) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE machine_operations SET status = ?2, end_time = ?3, notes = ?4 \
             WHERE id = ?1 AND status = 'ACTIVE'",
            params![id, status.as_str(), end_time, notes],
        )
        .map_err(|err| ShiftError::storage("Failed to close operation", err))?;
    Ok(changed == 1)
}

/// Operator of the most recently started operation on the machine.
pub fn latest_operator_for_machine(conn: &Connection, machine_id: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT operator_id FROM machine_operations WHERE machine_id = ?1 \
         ORDER BY start_time DESC, id DESC LIMIT 1",
        params![machine_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(|err| ShiftError::storage("Failed to query latest operator", err))
}

// ─────────────────────────────────────────────────────────────────────────────
// Shift data
// ─────────────────────────────────────────────────────────────────────────────

const SHIFT_COLUMNS: &str = "id, machine_id, operator_id, shift_type, shift_start, shift_end, \
     total_production, target_production, efficiency, downtime, running_time, \
     quality_tests, approved_tests, rejected_tests, is_active, is_archived, created_at, updated_at";

fn shift_from_row(row: &Row<'_>) -> rusqlite::Result<ShiftData> {
    Ok(ShiftData {
        id: row.get(0)?,
        machine_id: row.get(1)?,
        operator_id: row.get(2)?,
        shift_type: decode_enum(row, 3, ShiftType::from_str, "shift type")?,
        shift_start: row.get(4)?,
        shift_end: row.get(5)?,
        total_production: row.get(6)?,
        target_production: row.get(7)?,
        efficiency: row.get(8)?,
        downtime: row.get(9)?,
        running_time: row.get(10)?,
        quality_tests: row.get(11)?,
        approved_tests: row.get(12)?,
        rejected_tests: row.get(13)?,
        is_active: row.get(14)?,
        is_archived: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

pub fn insert_shift(conn: &Connection, shift: &ShiftData) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO shift_data ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            SHIFT_COLUMNS
        ),
        params![
            shift.id,
            shift.machine_id,
            shift.operator_id,
            shift.shift_type.as_str(),
            shift.shift_start,
            shift.shift_end,
            shift.total_production,
            shift.target_production,
            shift.efficiency,
            shift.downtime,
            shift.running_time,
            shift.quality_tests,
            shift.approved_tests,
            shift.rejected_tests,
            shift.is_active,
            shift.is_archived,
            shift.created_at,
            shift.updated_at
        ],
    )
    .map_err(|err| ShiftError::storage("Failed to insert shift", err))?;
    Ok(())
}

pub fn active_shift_for_machine(conn: &Connection, machine_id: &str) -> Result<Option<ShiftData>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM shift_data \
             WHERE machine_id = ?1 AND is_active = 1 AND is_archived = 0",
            SHIFT_COLUMNS
        ),
        params![machine_id],
        shift_from_row,
    )
    .optional()
    .map_err(|err| ShiftError::storage("Failed to query active shift", err))
}

pub fn list_active_shifts(conn: &Connection) -> Result<Vec<ShiftData>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM shift_data WHERE is_active = 1 AND is_archived = 0 \
             ORDER BY machine_id ASC",
            SHIFT_COLUMNS
        ))
        .map_err(|err| ShiftError::storage("Failed to prepare active shifts query", err))?;
    let rows = stmt
        .query_map([], shift_from_row)
        .map_err(|err| ShiftError::storage("Failed to query active shifts", err))?;
    collect_rows(rows, "Failed to decode shift row")
}

#[cfg(test)]
pub fn list_shifts_for_machine(conn: &Connection, machine_id: &str) -> Result<Vec<ShiftData>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM shift_data WHERE machine_id = ?1 ORDER BY created_at ASC, id ASC",
            SHIFT_COLUMNS
        ))
        .map_err(|err| ShiftError::storage("Failed to prepare shifts query", err))?;
    let rows = stmt
        .query_map(params![machine_id], shift_from_row)
        .map_err(|err| ShiftError::storage("Failed to query shifts", err))?;
    collect_rows(rows, "Failed to decode shift row")
}

/// Writes the counters of an open shift. Returns false when the row is no
/// longer open.
pub fn update_shift_counters(conn: &Connection, shift: &ShiftData) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE shift_data SET \
                total_production = ?2, \
                target_production = ?3, \
                efficiency = ?4, \
                downtime = ?5, \
                running_time = ?6, \
                quality_tests = ?7, \
                approved_tests = ?8, \
                rejected_tests = ?9, \
                updated_at = ?10 \
             WHERE id = ?1 AND is_active = 1 AND is_archived = 0",
            params![
                shift.id,
                shift.total_production,
                shift.target_production,
                shift.efficiency,
                shift.downtime,
                shift.running_time,
                shift.quality_tests,
                shift.approved_tests,
                shift.rejected_tests,
                shift.updated_at
            ],
        )
        .map_err(|err| ShiftError::storage("Failed to update shift counters", err))?;
    Ok(changed == 1)
}

/// Closes an open shift. Returns false when the row was already closed.
pub fn archive_shift(conn: &Connection, id: &str, updated_at: &str) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE shift_data SET is_active = 0, is_archived = 1, updated_at = ?2 \
             WHERE id = ?1 AND is_active = 1 AND is_archived = 0",
            params![id, updated_at],
        )
        .map_err(|err| ShiftError::storage("Failed to archive shift", err))?;
    Ok(changed == 1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Production archive
// ─────────────────────────────────────────────────────────────────────────────

const ARCHIVE_COLUMNS: &str = "id, shift_data_id, machine_id, machine_code, machine_name, \
     operator_id, operator_name, shift_type, shift_start, shift_end, total_production, \
     target_production, efficiency, downtime, running_time, quality_tests, approved_tests, \
     rejected_tests, archived_at";

fn archive_from_row(row: &Row<'_>) -> rusqlite::Result<ProductionArchive> {
    Ok(ProductionArchive {
        id: row.get(0)?,
        shift_data_id: row.get(1)?,
        machine_id: row.get(2)?,
        machine_code: row.get(3)?,
        machine_name: row.get(4)?,
        operator_id: row.get(5)?,
        operator_name: row.get(6)?,
        shift_type: decode_enum(row, 7, ShiftType::from_str, "shift type")?,
        shift_start: row.get(8)?,
        shift_end: row.get(9)?,
        total_production: row.get(10)?,
        target_production: row.get(11)?,
        efficiency: row.get(12)?,
        downtime: row.get(13)?,
        running_time: row.get(14)?,
        quality_tests: row.get(15)?,
        approved_tests: row.get(16)?,
        rejected_tests: row.get(17)?,
        archived_at: row.get(18)?,
    })
}

pub fn insert_archive(conn: &Connection, archive: &ProductionArchive) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO production_archive ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            ARCHIVE_COLUMNS
        ),
        params![
            archive.id,
            archive.shift_data_id,
            archive.machine_id,
            archive.machine_code,
            archive.machine_name,
            archive.operator_id,
            archive.operator_name,
            archive.shift_type.as_str(),
            archive.shift_start,
            archive.shift_end,
            archive.total_production,
            archive.target_production,
            archive.efficiency,
            archive.downtime,
            archive.running_time,
            archive.quality_tests,
            archive.approved_tests,
            archive.rejected_tests,
            archive.archived_at
        ],
    )
    .map_err(|err| ShiftError::storage("Failed to insert archive", err))?;
    Ok(())
}

/// Newest first, optionally restricted to one machine.
pub fn list_archives(
    conn: &Connection,
    machine_id: Option<&str>,
    limit: usize,
) -> Result<Vec<ProductionArchive>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM production_archive \
             WHERE (?1 IS NULL OR machine_id = ?1) \
             ORDER BY archived_at DESC, id DESC LIMIT ?2",
            ARCHIVE_COLUMNS
        ))
        .map_err(|err| ShiftError::storage("Failed to prepare archive query", err))?;
    let rows = stmt
        .query_map(params![machine_id, limit as i64], archive_from_row)
        .map_err(|err| ShiftError::storage("Failed to query archives", err))?;
    collect_rows(rows, "Failed to decode archive row")
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifications
// ─────────────────────────────────────────────────────────────────────────────

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, type, title, message, priority, read, metadata, created_at";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let metadata_raw: String = row.get(7)?;
    let metadata = serde_json::from_str(&metadata_raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        notification_type: row.get(2)?,
        title: row.get(3)?,
        message: row.get(4)?,
        priority: decode_enum(row, 5, NotificationPriority::from_str, "notification priority")?,
        read: row.get(6)?,
        metadata,
        created_at: row.get(8)?,
    })
}

pub fn insert_notification(conn: &Connection, notification: &Notification) -> Result<()> {
    let metadata = serde_json::to_string(&notification.metadata)
        .map_err(|err| ShiftError::storage("Failed to serialize notification metadata", err))?;
    conn.execute(
        &format!(
            "INSERT INTO notifications ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            NOTIFICATION_COLUMNS
        ),
        params![
            notification.id,
            notification.user_id,
            notification.notification_type,
            notification.title,
            notification.message,
            notification.priority.as_str(),
            notification.read,
            metadata,
            notification.created_at
        ],
    )
    .map_err(|err| ShiftError::storage("Failed to insert notification", err))?;
    Ok(())
}

pub fn list_notifications(
    conn: &Connection,
    user_id: &str,
    unread_only: bool,
    limit: usize,
) -> Result<Vec<Notification>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM notifications \
             WHERE user_id = ?1 AND (?2 = 0 OR read = 0) \
             ORDER BY created_at DESC, id DESC LIMIT ?3",
            NOTIFICATION_COLUMNS
        ))
        .map_err(|err| ShiftError::storage("Failed to prepare notifications query", err))?;
    let rows = stmt
        .query_map(
            params![user_id, unread_only, limit as i64],
            notification_from_row,
        )
        .map_err(|err| ShiftError::storage("Failed to query notifications", err))?;
    collect_rows(rows, "Failed to decode notification row")
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn decode_enum<T>(
    row: &Row<'_>,
    index: usize,
    parse: fn(&str) -> Option<T>,
    label: &str,
) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown {}: {}", label, raw),
            )),
        )
    })
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    context: &str,
) -> Result<Vec<T>> {
    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(|err| ShiftError::storage(context, err))?);
    }
    Ok(items)
}
