pub mod chart_sampler;
pub mod market_calendar;
pub mod network_health;
pub mod retry;
pub mod scheduler;
pub mod target_evaluator;
pub mod trading_hours;
pub mod ttl_cache;
