//! Persistent alert state.
//!
//! Each alert kind occupies at most one row, enforced by the `id = 1`
//! check in the schema. Claiming an alert deletes its row and returns it
//! in a single statement, so two racing claimants can never both win.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{ProximityAlert, StopPoint, TimeAlert};

use super::AlertError;

#[derive(Clone)]
pub struct AlertStore {
    pool: SqlitePool,
}

impl AlertStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace the armed time alert, if any, with `alert`.
    pub async fn put_time_alert(&self, alert: &TimeAlert) -> Result<(), AlertError> {
        let services = serde_json::to_string(&alert.services)
            .map_err(|e| AlertError::Database(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO time_alerts (id, stop_code, services, trigger_minutes, token, armed_at)
            VALUES (1, ?, ?, ?, ?, datetime('now'))
            "#,
        )
        .bind(&alert.stop_code)
        .bind(services)
        .bind(alert.trigger_minutes as i64)
        .bind(alert.token.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AlertError::Database(e.to_string()))?;
        Ok(())
    }

    /// The currently armed time alert, if any.
    pub async fn active_time_alert(&self) -> Result<Option<TimeAlert>, AlertError> {
        let row: Option<(String, String, i64, String)> = sqlx::query_as(
            "SELECT stop_code, services, trigger_minutes, token FROM time_alerts WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AlertError::Database(e.to_string()))?;

        row.map(time_alert_from_row).transpose()
    }

    /// Remove and return the armed time alert, but only if `token` still
    /// matches. The delete-and-return runs as one statement, so exactly one
    /// caller can claim a given arming.
    pub async fn claim_time_alert(&self, token: Uuid) -> Result<Option<TimeAlert>, AlertError> {
        let row: Option<(String, String, i64, String)> = sqlx::query_as(
            r#"
            DELETE FROM time_alerts WHERE id = 1 AND token = ?
            RETURNING stop_code, services, trigger_minutes, token
            "#,
        )
        .bind(token.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AlertError::Database(e.to_string()))?;

        row.map(time_alert_from_row).transpose()
    }

    /// Remove the armed time alert unconditionally. Returns whether a row
    /// was present.
    pub async fn clear_time_alert(&self) -> Result<bool, AlertError> {
        let result = sqlx::query("DELETE FROM time_alerts WHERE id = 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AlertError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the armed proximity alert, if any, with `alert`.
    pub async fn put_proximity_alert(&self, alert: &ProximityAlert) -> Result<(), AlertError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO proximity_alerts (id, stop_code, radius_meters, latitude, longitude, token, armed_at)
            VALUES (1, ?, ?, ?, ?, ?, datetime('now'))
            "#,
        )
        .bind(&alert.stop_code)
        .bind(alert.radius_meters as i64)
        .bind(alert.position.latitude)
        .bind(alert.position.longitude)
        .bind(alert.token.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AlertError::Database(e.to_string()))?;
        Ok(())
    }

    /// The currently armed proximity alert, if any.
    pub async fn active_proximity_alert(&self) -> Result<Option<ProximityAlert>, AlertError> {
        let row: Option<(String, i64, f64, f64, String)> = sqlx::query_as(
            "SELECT stop_code, radius_meters, latitude, longitude, token FROM proximity_alerts WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AlertError::Database(e.to_string()))?;

        row.map(proximity_alert_from_row).transpose()
    }

    /// Remove and return the armed proximity alert if it watches `stop_code`.
    pub async fn claim_proximity_alert(
        &self,
        stop_code: &str,
    ) -> Result<Option<ProximityAlert>, AlertError> {
        let row: Option<(String, i64, f64, f64, String)> = sqlx::query_as(
            r#"
            DELETE FROM proximity_alerts WHERE id = 1 AND stop_code = ?
            RETURNING stop_code, radius_meters, latitude, longitude, token
            "#,
        )
        .bind(stop_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AlertError::Database(e.to_string()))?;

        row.map(proximity_alert_from_row).transpose()
    }

    /// Remove the armed proximity alert unconditionally. Returns whether a
    /// row was present.
    pub async fn clear_proximity_alert(&self) -> Result<bool, AlertError> {
        let result = sqlx::query("DELETE FROM proximity_alerts WHERE id = 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AlertError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    /// Topology version of the installed stop database, if one was recorded.
    pub async fn installed_topology(&self) -> Result<Option<String>, AlertError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT topo_id FROM topology WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AlertError::Database(e.to_string()))?;
        Ok(row.map(|(topo_id,)| topo_id))
    }

    pub async fn set_installed_topology(&self, topo_id: &str) -> Result<(), AlertError> {
        sqlx::query(
            "INSERT OR REPLACE INTO topology (id, topo_id, installed_at) VALUES (1, ?, datetime('now'))",
        )
        .bind(topo_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AlertError::Database(e.to_string()))?;
        Ok(())
    }
}

fn time_alert_from_row(
    (stop_code, services, trigger_minutes, token): (String, String, i64, String),
) -> Result<TimeAlert, AlertError> {
    Ok(TimeAlert {
        stop_code,
        services: serde_json::from_str(&services)
            .map_err(|e| AlertError::Database(format!("Stored service list is invalid: {}", e)))?,
        trigger_minutes: trigger_minutes as u32,
        token: parse_token(&token)?,
    })
}

fn proximity_alert_from_row(
    (stop_code, radius_meters, latitude, longitude, token): (String, i64, f64, f64, String),
) -> Result<ProximityAlert, AlertError> {
    Ok(ProximityAlert {
        stop_code,
        radius_meters: radius_meters as u32,
        position: StopPoint {
            latitude,
            longitude,
        },
        token: parse_token(&token)?,
    })
}

fn parse_token(token: &str) -> Result<Uuid, AlertError> {
    Uuid::parse_str(token)
        .map_err(|e| AlertError::Database(format!("Stored alert token is invalid: {}", e)))
}
