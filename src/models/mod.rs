pub mod activity;
pub mod health;
pub mod sync;
pub mod workout;

pub use activity::{CanonicalActivity, CanonicalLap};
pub use health::{
  BodyComposition, CanonicalDailyHealth, DailyHealthRecord, DailyHealthUpdate, HrvRecord,
  SleepRecord,
};
pub use sync::SyncResult;
pub use workout::{CompletedWorkout, WorkoutRecord, WorkoutStatus};
