//! Shared test harnesses, exported behind the `tests` feature
