use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::{StorageError, SyncStore};
use crate::models::{
  BodyComposition, CanonicalLap, CompletedWorkout, DailyHealthRecord, DailyHealthUpdate, WorkoutRecord,
};

#[derive(Debug, Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  pub async fn find_workout(&self, workout_id: i64) -> Result<Option<WorkoutRecord>, StorageError> {
    let workout = sqlx::query_as::<_, WorkoutRecord>("SELECT * FROM workouts WHERE id = ?1")
      .bind(workout_id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(workout)
  }

  /// Laps of a workout in lap order
  pub async fn laps_for_workout(&self, workout_id: i64) -> Result<Vec<CanonicalLap>, StorageError> {
    let rows: Vec<(i64, f64, f64, Option<String>, i64, i64, i64)> = sqlx::query_as(
      r#"
      SELECT lap_number, distance_miles, duration_minutes, pace,
             average_heartrate, average_cadence, elevation_change_feet
      FROM workout_laps
      WHERE workout_id = ?1
      ORDER BY lap_number
      "#,
    )
    .bind(workout_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(
      rows
        .into_iter()
        .map(
          |(lap_number, distance_miles, duration_minutes, pace, average_heartrate, average_cadence, elevation_change_feet)| {
            CanonicalLap {
              lap_number,
              distance_miles,
              duration_minutes,
              pace,
              average_heartrate,
              average_cadence,
              elevation_change_feet,
            }
          },
        )
        .collect(),
    )
  }

  pub async fn find_body_composition(
    &self,
    user_id: &str,
    date: NaiveDate,
  ) -> Result<Option<BodyComposition>, StorageError> {
    let row: Option<(NaiveDate, Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>)> =
      sqlx::query_as(
        r#"
        SELECT date, weight_lbs, bmi, body_fat_pct, muscle_mass_lbs, bone_mass_lbs, body_water_pct
        FROM body_composition
        WHERE user_id = ?1 AND date = ?2
        "#,
      )
      .bind(user_id)
      .bind(date)
      .fetch_optional(&self.pool)
      .await?;

    Ok(row.map(
      |(date, weight_lbs, bmi, body_fat_pct, muscle_mass_lbs, bone_mass_lbs, body_water_pct)| BodyComposition {
        date,
        weight_lbs,
        bmi,
        body_fat_pct,
        muscle_mass_lbs,
        bone_mass_lbs,
        body_water_pct,
      },
    ))
  }
}

/// Replace every lap of `workout_id`
async fn replace_laps(
  conn: &mut SqliteConnection,
  workout_id: i64,
  laps: &[CanonicalLap],
) -> Result<(), StorageError> {
  sqlx::query("DELETE FROM workout_laps WHERE workout_id = ?1")
    .bind(workout_id)
    .execute(&mut *conn)
    .await?;

  for lap in laps {
    sqlx::query(
      r#"
      INSERT OR REPLACE INTO workout_laps (
        workout_id, lap_number, distance_miles, duration_minutes, pace,
        average_heartrate, average_cadence, elevation_change_feet
      )
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
      "#,
    )
    .bind(workout_id)
    .bind(lap.lap_number)
    .bind(lap.distance_miles)
    .bind(lap.duration_minutes)
    .bind(&lap.pace)
    .bind(lap.average_heartrate)
    .bind(lap.average_cadence)
    .bind(lap.elevation_change_feet)
    .execute(&mut *conn)
    .await?;
  }

  Ok(())
}

#[async_trait]
impl SyncStore for SqliteStore {
  async fn find_by_provider_id(
    &self,
    user_id: &str,
    provider_activity_id: &str,
  ) -> Result<Option<WorkoutRecord>, StorageError> {
    let workout = sqlx::query_as::<_, WorkoutRecord>(
      "SELECT * FROM workouts WHERE user_id = ?1 AND provider_activity_id = ?2",
    )
    .bind(user_id)
    .bind(provider_activity_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(workout)
  }

  async fn find_planned(
    &self,
    user_id: &str,
    date: NaiveDate,
    tolerance_days: i64,
  ) -> Result<Option<WorkoutRecord>, StorageError> {
    let workout = sqlx::query_as::<_, WorkoutRecord>(
      r#"
      SELECT * FROM workouts
      WHERE user_id = ?1
        AND status = 'planned'
        AND ABS(julianday(scheduled_date) - julianday(?2)) <= ?3
      ORDER BY ABS(julianday(scheduled_date) - julianday(?2)), scheduled_date, id
      LIMIT 1
      "#,
    )
    .bind(user_id)
    .bind(date)
    .bind(tolerance_days.max(0))
    .fetch_optional(&self.pool)
    .await?;
    Ok(workout)
  }

  async fn insert_workout(&self, user_id: &str, workout: &CompletedWorkout) -> Result<i64, StorageError> {
    let mut tx = self.pool.begin().await?;

    let workout_id = sqlx::query(
      r#"
      INSERT INTO workouts (
        user_id, status, scheduled_date, name, activity_type, provider_activity_id,
        started_at, duration_minutes, distance_miles, pace, average_heartrate,
        max_heartrate, average_cadence, average_watts, elevation_gain_feet,
        training_load, aerobic_training_effect, calories, raw_json, completed_at
      )
      VALUES (?1, 'completed', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
      "#,
    )
    .bind(user_id)
    .bind(workout.scheduled_date)
    .bind(&workout.name)
    .bind(&workout.activity_type)
    .bind(&workout.provider_activity_id)
    .bind(workout.started_at)
    .bind(workout.duration_minutes)
    .bind(workout.distance_miles)
    .bind(&workout.pace)
    .bind(workout.average_heartrate)
    .bind(workout.max_heartrate)
    .bind(workout.average_cadence)
    .bind(workout.average_watts)
    .bind(workout.elevation_gain_feet)
    .bind(workout.training_load)
    .bind(workout.aerobic_training_effect)
    .bind(workout.calories)
    .bind(&workout.raw_json)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    replace_laps(&mut tx, workout_id, &workout.laps).await?;
    tx.commit().await?;

    debug!(
      workout_id,
      provider_activity_id = %workout.provider_activity_id,
      laps = workout.laps.len(),
      "Inserted completed workout"
    );
    Ok(workout_id)
  }

  async fn update_workout(&self, workout_id: i64, workout: &CompletedWorkout) -> Result<(), StorageError> {
    let mut tx = self.pool.begin().await?;

    // The plan's own name wins over the device-generated one
    let updated = sqlx::query(
      r#"
      UPDATE workouts SET
        status = 'completed',
        name = COALESCE(name, ?1),
        activity_type = ?2,
        provider_activity_id = ?3,
        started_at = ?4,
        duration_minutes = ?5,
        distance_miles = ?6,
        pace = ?7,
        average_heartrate = ?8,
        max_heartrate = ?9,
        average_cadence = ?10,
        average_watts = ?11,
        elevation_gain_feet = ?12,
        training_load = ?13,
        aerobic_training_effect = ?14,
        calories = ?15,
        raw_json = ?16,
        completed_at = ?17,
        updated_at = CURRENT_TIMESTAMP
      WHERE id = ?18
      "#,
    )
    .bind(&workout.name)
    .bind(&workout.activity_type)
    .bind(&workout.provider_activity_id)
    .bind(workout.started_at)
    .bind(workout.duration_minutes)
    .bind(workout.distance_miles)
    .bind(&workout.pace)
    .bind(workout.average_heartrate)
    .bind(workout.max_heartrate)
    .bind(workout.average_cadence)
    .bind(workout.average_watts)
    .bind(workout.elevation_gain_feet)
    .bind(workout.training_load)
    .bind(workout.aerobic_training_effect)
    .bind(workout.calories)
    .bind(&workout.raw_json)
    .bind(Utc::now())
    .bind(workout_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
      return Err(StorageError::NotFound(format!("workout {}", workout_id)));
    }

    replace_laps(&mut tx, workout_id, &workout.laps).await?;
    tx.commit().await?;

    debug!(workout_id, provider_activity_id = %workout.provider_activity_id, "Completed planned workout");
    Ok(())
  }

  async fn find_daily_health(
    &self,
    user_id: &str,
    date: NaiveDate,
  ) -> Result<Option<DailyHealthRecord>, StorageError> {
    let record = sqlx::query_as::<_, DailyHealthRecord>(
      "SELECT * FROM daily_health WHERE user_id = ?1 AND date = ?2",
    )
    .bind(user_id)
    .bind(date)
    .fetch_optional(&self.pool)
    .await?;
    Ok(record)
  }

  async fn insert_daily_health(
    &self,
    user_id: &str,
    date: NaiveDate,
    update: &DailyHealthUpdate,
  ) -> Result<i64, StorageError> {
    let metadata = serde_json::to_string(&update.metadata)?;

    let id = sqlx::query(
      r#"
      INSERT INTO daily_health (
        user_id, date, steps, total_calories, active_calories, resting_heartrate,
        average_stress, body_battery_high, body_battery_low, average_spo2,
        sleep_total_minutes, sleep_deep_minutes, sleep_light_minutes, sleep_rem_minutes,
        sleep_awake_minutes, sleep_score, hrv_last_night, hrv_weekly_average, hrv_status,
        metadata_json
      )
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
      "#,
    )
    .bind(user_id)
    .bind(date)
    .bind(update.steps)
    .bind(update.total_calories)
    .bind(update.active_calories)
    .bind(update.resting_heartrate)
    .bind(update.average_stress)
    .bind(update.body_battery_high)
    .bind(update.body_battery_low)
    .bind(update.average_spo2)
    .bind(update.sleep_total_minutes)
    .bind(update.sleep_deep_minutes)
    .bind(update.sleep_light_minutes)
    .bind(update.sleep_rem_minutes)
    .bind(update.sleep_awake_minutes)
    .bind(update.sleep_score)
    .bind(update.hrv_last_night)
    .bind(update.hrv_weekly_average)
    .bind(&update.hrv_status)
    .bind(metadata)
    .execute(&self.pool)
    .await?
    .last_insert_rowid();

    Ok(id)
  }

  async fn update_daily_health(
    &self,
    existing: &DailyHealthRecord,
    update: &DailyHealthUpdate,
  ) -> Result<(), StorageError> {
    let mut metadata = existing.metadata();
    metadata.extend(update.metadata.clone());
    let metadata = serde_json::to_string(&metadata)?;

    let updated = sqlx::query(
      r#"
      UPDATE daily_health SET
        steps = COALESCE(?1, steps),
        total_calories = COALESCE(?2, total_calories),
        active_calories = COALESCE(?3, active_calories),
        resting_heartrate = COALESCE(?4, resting_heartrate),
        average_stress = COALESCE(?5, average_stress),
        body_battery_high = COALESCE(?6, body_battery_high),
        body_battery_low = COALESCE(?7, body_battery_low),
        average_spo2 = COALESCE(?8, average_spo2),
        sleep_total_minutes = COALESCE(?9, sleep_total_minutes),
        sleep_deep_minutes = COALESCE(?10, sleep_deep_minutes),
        sleep_light_minutes = COALESCE(?11, sleep_light_minutes),
        sleep_rem_minutes = COALESCE(?12, sleep_rem_minutes),
        sleep_awake_minutes = COALESCE(?13, sleep_awake_minutes),
        sleep_score = COALESCE(?14, sleep_score),
        hrv_last_night = COALESCE(?15, hrv_last_night),
        hrv_weekly_average = COALESCE(?16, hrv_weekly_average),
        hrv_status = COALESCE(?17, hrv_status),
        metadata_json = ?18,
        updated_at = CURRENT_TIMESTAMP
      WHERE id = ?19
      "#,
    )
    .bind(update.steps)
    .bind(update.total_calories)
    .bind(update.active_calories)
    .bind(update.resting_heartrate)
    .bind(update.average_stress)
    .bind(update.body_battery_high)
    .bind(update.body_battery_low)
    .bind(update.average_spo2)
    .bind(update.sleep_total_minutes)
    .bind(update.sleep_deep_minutes)
    .bind(update.sleep_light_minutes)
    .bind(update.sleep_rem_minutes)
    .bind(update.sleep_awake_minutes)
    .bind(update.sleep_score)
    .bind(update.hrv_last_night)
    .bind(update.hrv_weekly_average)
    .bind(&update.hrv_status)
    .bind(metadata)
    .bind(existing.id)
    .execute(&self.pool)
    .await?
    .rows_affected();

    if updated == 0 {
      return Err(StorageError::NotFound(format!("daily health {}", existing.id)));
    }
    Ok(())
  }

  async fn upsert_body_composition(&self, user_id: &str, entry: &BodyComposition) -> Result<(), StorageError> {
    sqlx::query(
      r#"
      INSERT INTO body_composition (
        user_id, date, weight_lbs, bmi, body_fat_pct, muscle_mass_lbs, bone_mass_lbs, body_water_pct
      )
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
      ON CONFLICT(user_id, date) DO UPDATE SET
        weight_lbs = COALESCE(excluded.weight_lbs, body_composition.weight_lbs),
        bmi = COALESCE(excluded.bmi, body_composition.bmi),
        body_fat_pct = COALESCE(excluded.body_fat_pct, body_composition.body_fat_pct),
        muscle_mass_lbs = COALESCE(excluded.muscle_mass_lbs, body_composition.muscle_mass_lbs),
        bone_mass_lbs = COALESCE(excluded.bone_mass_lbs, body_composition.bone_mass_lbs),
        body_water_pct = COALESCE(excluded.body_water_pct, body_composition.body_water_pct),
        updated_at = CURRENT_TIMESTAMP
      "#,
    )
    .bind(user_id)
    .bind(entry.date)
    .bind(entry.weight_lbs)
    .bind(entry.bmi)
    .bind(entry.body_fat_pct)
    .bind(entry.muscle_mass_lbs)
    .bind(entry.bone_mass_lbs)
    .bind(entry.body_water_pct)
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
