use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use mshb_shared::types::{UserId, UserStatus};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{AuthUser, Profile, ProfileUpdate};
use crate::rows::{collect_rows, enum_at, now, opt_ts_at, ts, ts_at, uuid_at};

const PROFILE_COLUMNS: &str = "id, username, display_name, avatar_url, banner_url, status, \
     custom_status, language, last_seen, created_at";

impl Database {
    // ----------------------------------------------------------------
    // Profiles
    // ----------------------------------------------------------------

    /// Create the profile row for a freshly signed-up user.
    pub fn create_profile(&self, id: UserId, username: &str) -> Result<Profile> {
        let profile = Profile {
            id,
            username: username.to_string(),
            display_name: None,
            avatar_url: None,
            banner_url: None,
            status: UserStatus::Online,
            custom_status: None,
            language: "en".into(),
            last_seen: None,
            created_at: now(),
        };

        self.conn()
            .execute(
                "INSERT INTO profiles (id, username, status, language, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    profile.id.to_string(),
                    profile.username,
                    profile.status.as_str(),
                    profile.language,
                    ts(&profile.created_at),
                ],
            )
            .map_err(|e| StoreError::conflict_or(e, "username already taken"))?;

        tracing::debug!(user = %id.short(), username, "profile created");
        self.emit_insert("profiles", &profile)?;
        Ok(profile)
    }

    pub fn get_profile(&self, id: UserId) -> Result<Profile> {
        self.conn()
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                params![id.to_string()],
                row_to_profile,
            )
            .map_err(StoreError::not_found_or)
    }

    /// Case-insensitive exact lookup.
    pub fn get_profile_by_username(&self, username: &str) -> Result<Option<Profile>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE username = ?1"),
                params![username.trim()],
                row_to_profile,
            )
            .optional()?)
    }

    pub fn get_profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_profile(*id) {
                Ok(p) => out.push(p),
                Err(StoreError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Prefix search on username and display name.
    pub fn search_profiles(&self, prefix: &str, limit: u32) -> Result<Vec<Profile>> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("{}%", escape_like(prefix));

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles
             WHERE username LIKE ?1 ESCAPE '\\' OR display_name LIKE ?1 ESCAPE '\\'
             ORDER BY username COLLATE NOCASE
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![pattern, limit], row_to_profile)?;
        collect_rows(rows)
    }

    pub fn update_profile(&self, id: UserId, update: &ProfileUpdate) -> Result<Profile> {
        let affected = self.conn().execute(
            "UPDATE profiles SET
                display_name  = COALESCE(?2, display_name),
                avatar_url    = COALESCE(?3, avatar_url),
                banner_url    = COALESCE(?4, banner_url),
                custom_status = COALESCE(?5, custom_status),
                language      = COALESCE(?6, language)
             WHERE id = ?1",
            params![
                id.to_string(),
                update.display_name,
                update.avatar_url,
                update.banner_url,
                update.custom_status,
                update.language,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        let profile = self.get_profile(id)?;
        self.emit_update("profiles", &profile)?;
        Ok(profile)
    }

    pub fn set_status(&self, id: UserId, status: UserStatus) -> Result<Profile> {
        let affected = self.conn().execute(
            "UPDATE profiles SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        let profile = self.get_profile(id)?;
        self.emit_update("profiles", &profile)?;
        Ok(profile)
    }

    pub fn touch_last_seen(&self, id: UserId, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE profiles SET last_seen = ?2 WHERE id = ?1",
            params![id.to_string(), ts(&at)],
        )?;
        Ok(())
    }

    // ----------------------------------------------------------------
    // Auth users
    // ----------------------------------------------------------------

    pub fn create_auth_user(&self, id: UserId, email: &str, password_hash: &str) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO auth_users (id, email, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), email.trim(), password_hash, ts(&now())],
            )
            .map_err(|e| StoreError::conflict_or(e, "email already registered"))?;
        Ok(())
    }

    /// Create the profile and credentials of a new account. Either both
    /// rows exist afterwards or neither does.
    pub fn register_user(&self, id: UserId, username: &str, email: &str, password_hash: &str) -> Result<Profile> {
        let tx = self.conn().unchecked_transaction()?;
        let profile = self.create_profile(id, username)?;
        self.create_auth_user(id, email, password_hash)?;
        tx.commit()?;
        Ok(profile)
    }

    pub fn find_auth_user_by_email(&self, email: &str) -> Result<Option<AuthUser>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, email, password_hash, created_at FROM auth_users WHERE email = ?1",
                params![email.trim()],
                |row| {
                    Ok(AuthUser {
                        id: uuid_at(row, 0)?,
                        email: row.get(1)?,
                        password_hash: row.get(2)?,
                        created_at: ts_at(row, 3)?,
                    })
                },
            )
            .optional()?)
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub(crate) fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: uuid_at(row, 0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        banner_url: row.get(4)?,
        status: enum_at(row, 5)?,
        custom_status: row.get(6)?,
        language: row.get(7)?,
        last_seen: opt_ts_at(row, 8)?,
        created_at: ts_at(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{db, user};

    #[test]
    fn duplicate_username_conflicts_case_insensitively() {
        let db = db();
        user(&db, "alice");
        let err = db.create_profile(UserId::new(), "ALICE").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn failed_registration_leaves_no_profile() {
        let db = db();
        db.register_user(UserId::new(), "alice", "a@example.com", "hash").unwrap();

        let err = db
            .register_user(UserId::new(), "bob", "a@example.com", "hash")
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(db.get_profile_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn lookup_by_username_ignores_case() {
        let db = db();
        let id = user(&db, "alice");
        let found = db.get_profile_by_username("Alice").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(db.get_profile_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn search_matches_prefix_only() {
        let db = db();
        user(&db, "alice");
        user(&db, "alfred");
        user(&db, "malice");

        let names: Vec<_> = db
            .search_profiles("al", 10)
            .unwrap()
            .into_iter()
            .map(|p| p.username)
            .collect();
        assert_eq!(names, vec!["alfred", "alice"]);

        // `_` must not act as a wildcard.
        assert!(db.search_profiles("a_", 10).unwrap().is_empty());
    }

    #[test]
    fn partial_update_keeps_other_fields() {
        let db = db();
        let id = user(&db, "alice");

        db.update_profile(
            id,
            &ProfileUpdate {
                display_name: Some("Alice A.".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let p = db
            .update_profile(
                id,
                &ProfileUpdate {
                    custom_status: Some("afk".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(p.display_name.as_deref(), Some("Alice A."));
        assert_eq!(p.custom_status.as_deref(), Some("afk"));
        assert_eq!(p.label(), "Alice A.");
    }

    #[test]
    fn status_change_is_published() {
        let db = db();
        let id = user(&db, "alice");
        let mut rx = db.subscribe_changes();

        db.set_status(id, UserStatus::Dnd).unwrap();

        let change = rx.try_recv().unwrap();
        assert_eq!(change.table, "profiles");
        assert_eq!(change.column("status").unwrap(), "dnd");
    }

    #[test]
    fn auth_user_lookup() {
        let db = db();
        let id = user(&db, "alice");
        db.create_auth_user(id, "alice@example.com", "$argon2id$stub").unwrap();

        let found = db
            .find_auth_user_by_email("alice@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
        assert!(matches!(
            db.create_auth_user(UserId::new(), "ALICE@example.com", "x"),
            Err(StoreError::Conflict(_))
        ));
    }
}
