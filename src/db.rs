use sqlx::postgres::PgPoolOptions;
use sqlx::{Error, PgPool};

use crate::FleetConfig;

impl FleetConfig {
    pub async fn connect_database(&self) -> Result<PgPool, Error> {
        let db = PgPoolOptions::new()
            .max_connections(self.db_max_connections)
            .acquire_timeout(self.db_acquire_timeout)
            .connect(&self.db_url)
            .await?;
        Ok(db)
    }
}

/// User and bot rows, keyed by the chat identity and by the owning user
/// respectively (§3: `users` unique on `(name, tripcode)`, `bots` unique
/// on `user_id`).
pub mod queries {
    use serde_json::Value;
    use sqlx::PgPool;
    use uuid::Uuid;

    pub struct UserRow {
        pub id: Uuid,
        pub name: String,
        pub tripcode: String,
    }

    pub async fn get_or_create_user(
        pool: &PgPool,
        name: &str,
        tripcode: &str,
        passcode_hash: &str,
        salt: &str,
    ) -> Result<UserRow, sqlx::Error> {
        let row = sqlx::query_as!(
            UserRow,
            r#"
            INSERT INTO users (id, name, tripcode, passcode_hash, salt)
            VALUES (gen_random_uuid(), $1, $2, $3, $4)
            ON CONFLICT (name, tripcode) DO UPDATE SET passcode_hash = EXCLUDED.passcode_hash
            RETURNING id, name, tripcode
            "#,
            name,
            tripcode,
            passcode_hash,
            salt,
        )
        .fetch_one(pool)
        .await?;

        Ok(row)
    }

    pub async fn get_or_create_bot(
        pool: &PgPool,
        user_id: Uuid,
        name: &str,
        tripcode: &str,
        passcode: &str,
        icon: &str,
        language: &str,
        command_prefix: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query!(
            r#"
            INSERT INTO bots (user_id, name, tripcode, passcode, icon, language, command_prefix,
                               whitelist, blacklist, groups)
            VALUES ($1, $2, $3, $4, $5, $6, $7, '{}'::jsonb, '{}'::jsonb, '{}'::jsonb)
            ON CONFLICT (user_id) DO NOTHING
            "#,
            user_id,
            name,
            tripcode,
            passcode,
            icon,
            language,
            command_prefix,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Snapshot-write `whitelist`/`blacklist`/`groups` on session close and
    /// on every heartbeat (§3 Invariant, §4.3 `update`/`disconnected`).
    pub async fn write_bot_state(
        pool: &PgPool,
        user_id: Uuid,
        whitelist: &Value,
        blacklist: &Value,
        groups: &Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query!(
            r#"
            UPDATE bots SET whitelist = $1, blacklist = $2, groups = $3
            WHERE user_id = $4
            "#,
            whitelist,
            blacklist,
            groups,
            user_id,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}
