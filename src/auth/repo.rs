use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::auth::repo_types::{NewUser, ProfileChanges, Role, User, UserRow};

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, phone, address, \
     role, is_active, created_at, last_login, updated_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already taken")]
    DuplicateEmail,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Record store the credential service is written against. Emails passed in
/// are expected to be normalized (trimmed, lowercased) by the caller.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new record. Uniqueness of the email must hold even under
    /// concurrent inserts; the losing insert gets `StoreError::DuplicateEmail`.
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    /// Apply a partial profile update; returns the updated record, or `None`
    /// if the id is unknown.
    async fn update_profile(
        &self,
        id: i64,
        changes: ProfileChanges,
    ) -> Result<Option<User>, StoreError>;

    /// Replace the stored password hash; returns false if the id is unknown.
    async fn set_password_hash(&self, id: i64, hash: &str) -> Result<bool, StoreError>;

    /// Stamp `last_login` with the current time.
    async fn record_login(&self, id: i64) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<User>, StoreError>;
}

/// Postgres-backed store. The unique index on `email` is the authority on
/// duplicates; SQLSTATE 23505 maps to `DuplicateEmail`.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_insert_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::DuplicateEmail;
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name, phone, address)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .bind(&user.address)
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_err)?;
        Ok(row.into())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"SELECT {USER_COLUMNS} FROM users WHERE email = $1"#,
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"SELECT {USER_COLUMNS} FROM users WHERE id = $1"#,
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn update_profile(
        &self,
        id: i64,
        changes: ProfileChanges,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET first_name = COALESCE($2, first_name),
                last_name  = COALESCE($3, last_name),
                phone      = COALESCE($4, phone),
                address    = COALESCE($5, address),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(changes.first_name)
        .bind(changes.last_name)
        .bind(changes.phone)
        .bind(changes.address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn set_password_hash(&self, id: i64, hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(id)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_login(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(r#"UPDATE users SET last_login = NOW() WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let rows =
            sqlx::query_as::<_, UserRow>(&format!(r#"SELECT {USER_COLUMNS} FROM users ORDER BY id"#))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// In-memory store with sequential ids. Duplicate checks happen under the
/// same lock as the insert, so concurrent registrations with one email
/// cannot both win. Used by the test suite and for local development.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    users: Vec<User>,
    next_id: i64,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the active flag directly. There is no API operation for this;
    /// deactivation is an operator-level action, mirrored here for tests.
    pub fn set_active(&self, id: i64, active: bool) -> bool {
        let mut inner = self.inner.lock().expect("store lock");
        match inner.users.iter_mut().find(|u| u.id == id) {
            Some(user) => {
                user.is_active = active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        if inner.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        inner.next_id += 1;
        let now = OffsetDateTime::now_utc();
        let record = User {
            id: inner.next_id,
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            address: user.address,
            role: Role::User,
            is_active: true,
            created_at: now,
            last_login: None,
            updated_at: now,
        };
        inner.users.push(record.clone());
        Ok(record)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner.users.iter().find(|u| u.id == id).cloned())
    }

    async fn update_profile(
        &self,
        id: i64,
        changes: ProfileChanges,
    ) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        let Some(user) = inner.users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(first_name) = changes.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            user.last_name = last_name;
        }
        if let Some(phone) = changes.phone {
            user.phone = phone;
        }
        if let Some(address) = changes.address {
            user.address = address;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn set_password_hash(&self, id: i64, hash: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        match inner.users.iter_mut().find(|u| u.id == id) {
            Some(user) => {
                user.password_hash = hash.to_string();
                user.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_login(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            user.last_login = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner.users.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: "$argon2id$fake".into(),
            first_name: "A".into(),
            last_name: "B".into(),
            phone: String::new(),
            address: String::new(),
        }
    }

    #[tokio::test]
    async fn memory_store_assigns_sequential_ids() {
        let store = MemoryUserStore::new();
        let first = store.insert(new_user("one@example.com")).await.expect("insert");
        let second = store.insert(new_user("two@example.com")).await.expect("insert");
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn memory_store_rejects_duplicate_email() {
        let store = MemoryUserStore::new();
        store.insert(new_user("dup@example.com")).await.expect("insert");
        let err = store.insert(new_user("dup@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn memory_store_partial_update_keeps_other_fields() {
        let store = MemoryUserStore::new();
        let user = store.insert(new_user("p@example.com")).await.expect("insert");
        let updated = store
            .update_profile(
                user.id,
                ProfileChanges {
                    phone: Some("555-0199".into()),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("exists");
        assert_eq!(updated.phone, "555-0199");
        assert_eq!(updated.first_name, "A");
        assert_eq!(updated.email, "p@example.com");
    }

    #[tokio::test]
    async fn memory_store_update_unknown_id_is_none() {
        let store = MemoryUserStore::new();
        let updated = store
            .update_profile(99, ProfileChanges::default())
            .await
            .expect("update");
        assert!(updated.is_none());
    }
}
