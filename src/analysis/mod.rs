pub mod daily_change;
