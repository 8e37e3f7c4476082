use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rand::Rng;
use rusqlite::types::Value;
use rusqlite::{params, Connection, ErrorCode, Row};
use uuid::Uuid;

use crate::models::user::User;
use crate::store::{AccountPatch, NewUser, ProfileFields, StoreError, UserStore};

/// Attempts to regenerate a colliding auto-generated username before
/// giving up.
const USERNAME_RETRIES: u32 = 5;

/// SQLite-backed user store.
pub struct SqliteUserStore {
    conn: Mutex<Connection>,
}

impl SqliteUserStore {
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        // Parse sqlite: prefix if present
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
        }

        let conn = Connection::open(path).map_err(map_sqlite_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                username TEXT NOT NULL UNIQUE,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                profile_picture_url TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1,
                email_notifications INTEGER NOT NULL DEFAULT 1,
                date_joined TEXT NOT NULL
            )",
            [],
        )
        .map_err(map_sqlite_err)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_users_date_joined ON users(date_joined)",
            [],
        )
        .map_err(map_sqlite_err)?;

        tracing::info!("User store initialized with database: {}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Generate a `User-` handle with a random lowercase alphanumeric suffix.
fn generate_username() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("User-{}", suffix)
}

fn map_sqlite_err(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(inner, ref message) = err {
        if inner.code == ErrorCode::ConstraintViolation {
            let message = message.as_deref().unwrap_or("");
            let column = if message.contains("users.email") {
                "email"
            } else if message.contains("users.username") {
                "username"
            } else {
                "users"
            };
            return StoreError::UniqueViolation(column.to_string());
        }
    }
    StoreError::Database(err.to_string())
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let date_joined: String = row.get(8)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        profile_picture_url: row.get(5)?,
        is_active: row.get::<_, i32>(6)? != 0,
        email_notifications: row.get::<_, i32>(7)? != 0,
        date_joined: chrono::DateTime::parse_from_rfc3339(&date_joined)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

const USER_COLUMNS: &str = "id, email, username, first_name, last_name, \
     profile_picture_url, is_active, email_notifications, date_joined";

impl UserStore for SqliteUserStore {
    fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS))
            .map_err(map_sqlite_err)?;
        let user = stmt
            .query_row(params![email], row_to_user)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(map_sqlite_err(other)),
            })?;
        Ok(user)
    }

    fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM users WHERE username = ?1",
                USER_COLUMNS
            ))
            .map_err(map_sqlite_err)?;
        let user = stmt
            .query_row(params![username], row_to_user)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(map_sqlite_err(other)),
            })?;
        Ok(user)
    }

    fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();

        // Regenerate the handle on a username collision; an email collision
        // is a real conflict and propagates to the caller.
        for _ in 0..USERNAME_RETRIES {
            let user = User {
                id: Uuid::new_v4().to_string(),
                email: new_user.email.clone(),
                username: generate_username(),
                first_name: new_user.first_name.clone(),
                last_name: new_user.last_name.clone(),
                profile_picture_url: new_user.profile_picture_url.clone(),
                is_active: new_user.is_active,
                email_notifications: true,
                date_joined: now,
            };

            let result = conn.execute(
                "INSERT INTO users (id, email, username, first_name, last_name, \
                 profile_picture_url, is_active, email_notifications, date_joined) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    user.id,
                    user.email,
                    user.username,
                    user.first_name,
                    user.last_name,
                    user.profile_picture_url,
                    user.is_active as i32,
                    user.email_notifications as i32,
                    user.date_joined.to_rfc3339(),
                ],
            );

            match result.map_err(map_sqlite_err) {
                Ok(_) => {
                    tracing::info!("Created new user: {}", user.email);
                    return Ok(user);
                }
                Err(StoreError::UniqueViolation(column)) if column == "username" => continue,
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::Database(
            "could not generate a unique username".to_string(),
        ))
    }

    fn update_profile(&self, email: &str, fields: &ProfileFields) -> Result<User, StoreError> {
        {
            let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            let changed = conn
                .execute(
                    "UPDATE users SET first_name = ?1, last_name = ?2, \
                     profile_picture_url = ?3 WHERE email = ?4",
                    params![
                        fields.first_name,
                        fields.last_name,
                        fields.profile_picture_url,
                        email
                    ],
                )
                .map_err(map_sqlite_err)?;
            if changed == 0 {
                return Err(StoreError::Database(format!(
                    "no user with email {} to update",
                    email
                )));
            }
        }
        self.find_by_email(email)?
            .ok_or_else(|| StoreError::Database(format!("user {} vanished mid-update", email)))
    }

    fn update_account(&self, email: &str, patch: &AccountPatch) -> Result<User, StoreError> {
        {
            let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

            let mut assignments: Vec<String> = Vec::new();
            let mut values: Vec<Value> = Vec::new();

            if let Some(first_name) = &patch.first_name {
                assignments.push(format!("first_name = ?{}", assignments.len() + 1));
                values.push(Value::Text(first_name.clone()));
            }
            if let Some(last_name) = &patch.last_name {
                assignments.push(format!("last_name = ?{}", assignments.len() + 1));
                values.push(Value::Text(last_name.clone()));
            }
            if let Some(username) = &patch.username {
                assignments.push(format!("username = ?{}", assignments.len() + 1));
                values.push(Value::Text(username.clone()));
            }
            if let Some(email_notifications) = patch.email_notifications {
                assignments.push(format!("email_notifications = ?{}", assignments.len() + 1));
                values.push(Value::Integer(email_notifications as i64));
            }

            if !assignments.is_empty() {
                let sql = format!(
                    "UPDATE users SET {} WHERE email = ?{}",
                    assignments.join(", "),
                    values.len() + 1
                );
                values.push(Value::Text(email.to_string()));
                conn.execute(&sql, rusqlite::params_from_iter(values))
                    .map_err(map_sqlite_err)?;
            }
        }
        self.find_by_email(email)?
            .ok_or_else(|| StoreError::Database(format!("no user with email {}", email)))
    }

    fn delete(&self, email: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute("DELETE FROM users WHERE email = ?1", params![email])
            .map_err(map_sqlite_err)?;
        Ok(())
    }

    fn email_taken(&self, email: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .map_err(map_sqlite_err)?;
        Ok(count > 0)
    }

    fn username_taken_by_other(&self, username: &str, own_email: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE username = ?1 AND email != ?2",
                params![username, own_email],
                |row| row.get(0),
            )
            .map_err(map_sqlite_err)?;
        Ok(count > 0)
    }
}
