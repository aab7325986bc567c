//! Small key/value table for engine-wide state that is not tied to one item.

use super::db::Database;
use crate::error::StorageError;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};

const FREEZE_INVENTORY_KEY: &str = "freeze_inventory";
const FROZEN_DAYS_KEY: &str = "frozen_days";

#[derive(Clone)]
pub struct AppState {
    db: Database,
}

impl AppState {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.db.lock()?;
        read_value(&conn, key)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO app_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Streak freezes the user still holds.
    pub fn freeze_inventory(&self) -> Result<u32, StorageError> {
        parse_inventory(self.get(FREEZE_INVENTORY_KEY)?)
    }

    pub fn set_freeze_inventory(&self, count: u32) -> Result<(), StorageError> {
        self.set(FREEZE_INVENTORY_KEY, &count.to_string())
    }

    /// Days covered by a spent freeze, oldest first.
    pub fn frozen_days(&self) -> Result<Vec<NaiveDate>, StorageError> {
        parse_frozen_days(self.get(FROZEN_DAYS_KEY)?)
    }

    /// Spends one freeze on `day` in a single transaction. Returns `false`
    /// when no freeze is left or `day` is already frozen.
    pub fn spend_freeze(&self, day: NaiveDate) -> Result<bool, StorageError> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let inventory = parse_inventory(read_value(&tx, FREEZE_INVENTORY_KEY)?)?;
        if inventory == 0 {
            return Ok(false);
        }
        let mut days = parse_frozen_days(read_value(&tx, FROZEN_DAYS_KEY)?)?;
        if days.contains(&day) {
            return Ok(false);
        }
        days.push(day);
        days.sort();

        let days = serde_json::to_string(&days)
            .map_err(|e| StorageError::corrupt(FROZEN_DAYS_KEY, e.to_string()))?;
        for (key, value) in [
            (FREEZE_INVENTORY_KEY, (inventory - 1).to_string()),
            (FROZEN_DAYS_KEY, days),
        ] {
            tx.execute(
                "INSERT INTO app_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }
}

fn read_value(conn: &Connection, key: &str) -> Result<Option<String>, StorageError> {
    let value = conn
        .query_row(
            "SELECT value FROM app_state WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn parse_inventory(value: Option<String>) -> Result<u32, StorageError> {
    match value {
        Some(value) => value.parse().map_err(|_| {
            StorageError::corrupt(FREEZE_INVENTORY_KEY, format!("not a count: {value}"))
        }),
        None => Ok(0),
    }
}

fn parse_frozen_days(value: Option<String>) -> Result<Vec<NaiveDate>, StorageError> {
    match value {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| StorageError::corrupt(FROZEN_DAYS_KEY, e.to_string())),
        None => Ok(Vec::new()),
    }
}
