//! SQLite adapter for the durable store.
//!
//! Holds the relational side of position sync: last-known positions plus the
//! zone definitions and spawn points imported from map files. The adapter
//! owns its schema and creates it on construction, so a fresh database file
//! (or `sqlite::memory:` in tests) works without a migration step.

use super::{unix_now, DurableStore, SpawnPoint, StoredPosition, ZoneBounds, ZoneDef};
use crate::error::StoreError;
use crate::{UserId, WorldId};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

/// Durable store adapter over a SQLite connection pool.
pub struct SqliteDurableStore {
    pool: SqlitePool,
}

impl SqliteDurableStore {
    /// Creates the adapter, preparing its tables if they do not exist.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                world_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                x REAL NOT NULL,
                y REAL NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (world_id, user_id)
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS zones (
                id TEXT PRIMARY KEY,
                world_id TEXT NOT NULL,
                name TEXT NOT NULL,
                zone_type TEXT NOT NULL DEFAULT 'PUBLIC',
                x REAL NOT NULL,
                y REAL NOT NULL,
                width REAL NOT NULL,
                height REAL NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spawn_points (
                world_id TEXT NOT NULL,
                name TEXT NOT NULL,
                x REAL NOT NULL,
                y REAL NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a zone definition. Insertion order is load order, which is
    /// also lookup precedence for overlapping zones.
    pub async fn insert_zone(&self, world: &str, zone: &ZoneDef) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO zones (id, world_id, name, zone_type, x, y, width, height) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&zone.id)
        .bind(world)
        .bind(&zone.name)
        .bind(&zone.zone_type)
        .bind(zone.bounds.x)
        .bind(zone.bounds.y)
        .bind(zone.bounds.width)
        .bind(zone.bounds.height)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts a spawn point.
    pub async fn insert_spawn_point(
        &self,
        world: &str,
        spawn: &SpawnPoint,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO spawn_points (world_id, name, x, y) VALUES (?, ?, ?, ?)")
            .bind(world)
            .bind(&spawn.name)
            .bind(spawn.x)
            .bind(spawn.y)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for SqliteDurableStore {
    async fn load_position(
        &self,
        world: &WorldId,
        user: &UserId,
    ) -> Result<Option<StoredPosition>, StoreError> {
        let row = sqlx::query(
            "SELECT x, y, updated_at FROM positions WHERE world_id = ? AND user_id = ?",
        )
        .bind(world)
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| StoredPosition {
            x: r.get::<f64, _>("x"),
            y: r.get::<f64, _>("y"),
            updated_at: r.get::<i64, _>("updated_at"),
        }))
    }

    async fn save_position(
        &self,
        world: &WorldId,
        user: &UserId,
        x: f64,
        y: f64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO positions (world_id, user_id, x, y, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (world_id, user_id) \
             DO UPDATE SET x = excluded.x, y = excluded.y, updated_at = excluded.updated_at",
        )
        .bind(world)
        .bind(user)
        .bind(x)
        .bind(y)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn zones(&self, world: &WorldId) -> Result<Vec<ZoneDef>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, zone_type, x, y, width, height FROM zones \
             WHERE world_id = ? ORDER BY rowid",
        )
        .bind(world)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ZoneDef {
                id: r.get::<String, _>("id"),
                name: r.get::<String, _>("name"),
                zone_type: r.get::<String, _>("zone_type"),
                bounds: ZoneBounds {
                    x: r.get::<f64, _>("x"),
                    y: r.get::<f64, _>("y"),
                    width: r.get::<f64, _>("width"),
                    height: r.get::<f64, _>("height"),
                },
            })
            .collect())
    }

    async fn spawn_points(&self, world: &WorldId) -> Result<Vec<SpawnPoint>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, x, y FROM spawn_points WHERE world_id = ? ORDER BY rowid",
        )
        .bind(world)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| SpawnPoint {
                name: r.get::<String, _>("name"),
                x: r.get::<f64, _>("x"),
                y: r.get::<f64, _>("y"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteDurableStore {
        // A single connection so every query sees the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        SqliteDurableStore::new(pool).await.expect("schema creation")
    }

    fn zone(id: &str, x: f64, y: f64, w: f64, h: f64) -> ZoneDef {
        ZoneDef {
            id: id.to_string(),
            name: id.to_string(),
            zone_type: "PUBLIC".to_string(),
            bounds: ZoneBounds { x, y, width: w, height: h },
        }
    }

    #[tokio::test]
    async fn position_upsert_and_resume() {
        let store = memory_store().await;
        let world = "w1".to_string();
        let user = "u1".to_string();

        assert!(store.load_position(&world, &user).await.unwrap().is_none());

        store.save_position(&world, &user, 40.0, 12.0).await.unwrap();
        store.save_position(&world, &user, 41.0, 13.0).await.unwrap();

        let pos = store.load_position(&world, &user).await.unwrap().unwrap();
        assert_eq!((pos.x, pos.y), (41.0, 13.0));
        assert!(pos.updated_at > 0);
    }

    #[tokio::test]
    async fn zones_come_back_in_insertion_order() {
        let store = memory_store().await;
        let world = "w1".to_string();
        store.insert_zone(&world, &zone("lounge", 0.0, 0.0, 10.0, 10.0)).await.unwrap();
        store.insert_zone(&world, &zone("stage", 5.0, 5.0, 10.0, 10.0)).await.unwrap();
        store.insert_zone(&world, &zone("cafe", 20.0, 0.0, 4.0, 4.0)).await.unwrap();

        let zones = store.zones(&world).await.unwrap();
        let ids: Vec<_> = zones.iter().map(|z| z.id.as_str()).collect();
        assert_eq!(ids, ["lounge", "stage", "cafe"]);

        assert!(store.zones(&"elsewhere".to_string()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn spawn_points_round_trip() {
        let store = memory_store().await;
        let world = "w1".to_string();
        store
            .insert_spawn_point(&world, &SpawnPoint { name: "north".into(), x: 2.0, y: 3.0 })
            .await
            .unwrap();
        let spawns = store.spawn_points(&world).await.unwrap();
        assert_eq!(spawns.len(), 1);
        assert_eq!((spawns[0].x, spawns[0].y), (2.0, 3.0));
    }
}
